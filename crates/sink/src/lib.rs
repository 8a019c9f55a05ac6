pub mod dispatcher;
pub mod layer;
pub mod webhook;

pub use dispatcher::{DispatchStats, Dispatcher};
pub use layer::WebhookLayer;
