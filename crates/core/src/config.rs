use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{Result, SlacklogError};
use crate::level::Level;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
    pub icon: Option<String>,
    /// Record properties surfaced as extra fields, in this order.
    pub properties: Vec<String>,
    pub tidy_stack_traces: bool,
    pub minimum_level: Level,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Pending records allowed before `emit` starts dropping. `None` is unbounded.
    pub queue_limit: Option<usize>,
    pub request_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            channel: None,
            username: None,
            icon: None,
            properties: Vec::new(),
            tidy_stack_traces: false,
            minimum_level: Level::Verbose,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            queue_limit: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl SinkConfig {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            ..Self::default()
        }
    }

    /// Defaults, then the config file (if present), then `SLACKLOG_*` variables.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(file_overrides) = load_file_overrides(path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.webhook_url.trim();
        if url.is_empty() {
            return Err(SlacklogError::Config(
                "webhook_url is required and cannot be blank".to_string(),
            ));
        }
        let parsed = Url::parse(url)
            .map_err(|e| SlacklogError::Config(format!("bad webhook_url: {e} (value={url})")))?;
        if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
            return Err(SlacklogError::Config(format!(
                "webhook_url must be an absolute http(s) URL, got {url}"
            )));
        }
        if self.batch_size == 0 {
            return Err(SlacklogError::Config(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(SlacklogError::Config(
                "flush_interval must be greater than zero".to_string(),
            ));
        }
        if self.queue_limit == Some(0) {
            return Err(SlacklogError::Config(
                "queue_limit must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    webhook_url: Option<String>,
    channel: Option<String>,
    username: Option<String>,
    icon: Option<String>,
    properties: Option<Vec<String>>,
    tidy_stack_traces: Option<bool>,
    minimum_level: Option<String>,
    batch_size: Option<usize>,
    flush_interval: Option<String>,
    queue_limit: Option<usize>,
    request_timeout: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("SLACKLOG_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("slacklog/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| SlacklogError::Io(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| SlacklogError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        webhook_url: env::var("SLACKLOG_WEBHOOK_URL").ok(),
        channel: env::var("SLACKLOG_CHANNEL").ok(),
        username: env::var("SLACKLOG_USERNAME").ok(),
        icon: env::var("SLACKLOG_ICON").ok(),
        properties: env::var("SLACKLOG_PROPERTIES")
            .ok()
            .map(|v| parse_property_list(&v)),
        tidy_stack_traces: env_parsed("SLACKLOG_TIDY_STACK_TRACES", parse_flag)?,
        minimum_level: env::var("SLACKLOG_MINIMUM_LEVEL").ok(),
        batch_size: env_parsed("SLACKLOG_BATCH_SIZE", |v| v.parse::<usize>().ok())?,
        flush_interval: env::var("SLACKLOG_FLUSH_INTERVAL").ok(),
        queue_limit: env_parsed("SLACKLOG_QUEUE_LIMIT", |v| v.parse::<usize>().ok())?,
        request_timeout: env::var("SLACKLOG_REQUEST_TIMEOUT").ok(),
    })
}

fn env_parsed<T>(key: &str, parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>> {
    match env::var(key) {
        Ok(v) => parse(v.trim()).map(Some).ok_or_else(|| {
            SlacklogError::Config(format!("bad {key} in environment (value={v})"))
        }),
        Err(_) => Ok(None),
    }
}

fn apply_overrides(cfg: &mut SinkConfig, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.webhook_url {
        cfg.webhook_url = v;
    }
    if let Some(v) = overrides.channel {
        cfg.channel = Some(v);
    }
    if let Some(v) = overrides.username {
        cfg.username = Some(v);
    }
    if let Some(v) = overrides.icon {
        cfg.icon = Some(v);
    }
    if let Some(v) = overrides.properties {
        cfg.properties = v;
    }
    if let Some(v) = overrides.tidy_stack_traces {
        cfg.tidy_stack_traces = v;
    }
    if let Some(v) = overrides.minimum_level {
        cfg.minimum_level = Level::from_str(&v).map_err(|e| {
            SlacklogError::Config(format!("bad minimum_level in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.batch_size {
        cfg.batch_size = v;
    }
    if let Some(v) = overrides.flush_interval {
        cfg.flush_interval = humantime::parse_duration(&v).map_err(|e| {
            SlacklogError::Config(format!("bad flush_interval in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.queue_limit {
        cfg.queue_limit = Some(v);
    }
    if let Some(v) = overrides.request_timeout {
        cfg.request_timeout = humantime::parse_duration(&v).map_err(|e| {
            SlacklogError::Config(format!("bad request_timeout in {source}: {e} (value={v})"))
        })?;
    }
    Ok(())
}

pub fn parse_property_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
