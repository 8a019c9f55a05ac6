pub mod config;
pub mod error;
pub mod format;
pub mod level;
pub mod model;
pub mod time;

pub use error::{Result, SlacklogError};
