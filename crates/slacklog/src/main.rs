mod output;
mod telemetry;

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use slacklog_core::config::SinkConfig;
use slacklog_core::format::{format_message, to_json_pretty};
use slacklog_core::level::Level;
use slacklog_core::model::record::{ExceptionInfo, LogRecord};
use slacklog_core::time::{parse_duration_str, parse_time_or_relative};
use slacklog_sink::Dispatcher;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::output::{print_pipe_summary, print_send_result};
use crate::telemetry::init_cli_tracing;

#[derive(Parser, Debug)]
#[command(name = "slacklog")]
#[command(about = "Ship log events to a Slack incoming webhook")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    sink: SinkArgs,
}

#[derive(Args, Debug)]
struct SinkArgs {
    #[arg(long, global = true, help = "Config file (default: ~/.config/slacklog/config.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    webhook_url: Option<String>,
    #[arg(long, global = true)]
    channel: Option<String>,
    #[arg(long, global = true)]
    username: Option<String>,
    #[arg(long, global = true)]
    icon: Option<String>,
    #[arg(long = "property", global = true, help = "Record property to show as a field (repeatable)")]
    properties: Vec<String>,
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Collapse async plumbing frames; --tidy-stack-traces=false turns it off"
    )]
    tidy_stack_traces: Option<bool>,
    #[arg(long, global = true)]
    minimum_level: Option<String>,
    #[arg(long, global = true)]
    batch_size: Option<usize>,
    #[arg(long, global = true, help = "Flush interval, e.g. 5s or 250ms")]
    flush_interval: Option<String>,
}

#[derive(Args, Debug)]
struct RecordArgs {
    message: String,
    #[arg(long, default_value = "information")]
    level: String,
    #[arg(long = "prop", help = "Record property as key=value (repeatable)")]
    props: Vec<String>,
    #[arg(long, help = "RFC3339 time or age such as 5m (default: now)")]
    timestamp: Option<String>,
    #[arg(long)]
    exception_type: Option<String>,
    #[arg(long)]
    exception_message: Option<String>,
    #[arg(long)]
    stack_trace_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Print the webhook payload for one event without sending it")]
    Preview {
        #[command(flatten)]
        record: RecordArgs,
    },
    #[command(about = "Send one event to the webhook")]
    Send {
        #[command(flatten)]
        record: RecordArgs,
    },
    #[command(about = "Ship stdin lines (plain text or JSON records) to the webhook")]
    Pipe {
        #[arg(long, default_value = "information", help = "Level for plain-text lines")]
        level: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_tracing();
    let config = resolve_config(&cli.sink)?;

    match cli.command {
        Commands::Preview { record } => {
            let record = record.into_record()?;
            println!("{}", to_json_pretty(&format_message(&record, &config))?);
            Ok(())
        }
        Commands::Send { record } => run_send(config, record.into_record()?).await,
        Commands::Pipe { level } => run_pipe(config, Level::from_str(&level)?).await,
    }
}

fn resolve_config(args: &SinkArgs) -> anyhow::Result<SinkConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file {} does not exist", path.display());
            }
            SinkConfig::load_from(path)?
        }
        None => SinkConfig::load()?,
    };

    if let Some(v) = &args.webhook_url {
        cfg.webhook_url = v.clone();
    }
    if let Some(v) = &args.channel {
        cfg.channel = Some(v.clone());
    }
    if let Some(v) = &args.username {
        cfg.username = Some(v.clone());
    }
    if let Some(v) = &args.icon {
        cfg.icon = Some(v.clone());
    }
    if !args.properties.is_empty() {
        cfg.properties = args.properties.clone();
    }
    if let Some(v) = args.tidy_stack_traces {
        cfg.tidy_stack_traces = v;
    }
    if let Some(v) = &args.minimum_level {
        cfg.minimum_level = Level::from_str(v)?;
    }
    if let Some(v) = args.batch_size {
        cfg.batch_size = v;
    }
    if let Some(v) = &args.flush_interval {
        cfg.flush_interval = parse_duration_str(v)?;
    }
    Ok(cfg)
}

impl RecordArgs {
    fn into_record(self) -> anyhow::Result<LogRecord> {
        let mut record = LogRecord::new(Level::from_str(&self.level)?, self.message);
        if let Some(ts) = &self.timestamp {
            record.timestamp = parse_time_or_relative(ts)?;
        }
        for prop in &self.props {
            let (key, value) = parse_prop(prop)?;
            record.properties.insert(key, value);
        }

        let stack_trace = match &self.stack_trace_file {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("read stack trace from {}", path.display()))?,
            ),
            None => None,
        };
        if self.exception_type.is_some() || self.exception_message.is_some() || stack_trace.is_some()
        {
            record.exception = Some(ExceptionInfo {
                message: self.exception_message.unwrap_or_default(),
                type_name: self.exception_type.unwrap_or_else(|| "Error".to_string()),
                stack_trace: stack_trace.unwrap_or_default(),
            });
        }
        Ok(record)
    }
}

fn parse_prop(input: &str) -> anyhow::Result<(String, String)> {
    let Some((key, value)) = input.split_once('=') else {
        anyhow::bail!("property must use key=value syntax, got {input}");
    };
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("property key cannot be empty: {input}");
    }
    Ok((key.to_string(), value.to_string()))
}

async fn run_send(config: SinkConfig, record: LogRecord) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(config).context("configure webhook sink")?;
    dispatcher.emit(record);
    dispatcher.shutdown().await.context("flush webhook sink")?;

    let stats = dispatcher.stats();
    print_send_result(&stats);
    if stats.delivered == 0 {
        anyhow::bail!("webhook delivery failed");
    }
    Ok(())
}

async fn run_pipe(config: SinkConfig, default_level: Level) -> anyhow::Result<()> {
    let minimum_level = config.minimum_level;
    let dispatcher = Dispatcher::new(config).context("configure webhook sink")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut skipped = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else {
                    break;
                };
                let Some(record) = parse_line(&line, default_level) else {
                    continue;
                };
                if record.level < minimum_level {
                    skipped += 1;
                    continue;
                }
                dispatcher.emit(record);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, flushing buffered events");
                break;
            }
        }
    }

    dispatcher.shutdown().await.context("flush webhook sink")?;
    print_pipe_summary(&dispatcher.stats(), skipped);
    Ok(())
}

/// JSON lines are read as records; any other non-blank line is the message.
fn parse_line(line: &str, default_level: Level) -> Option<LogRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{')
        && let Ok(record) = serde_json::from_str::<LogRecord>(trimmed)
    {
        return Some(record);
    }
    Some(LogRecord::new(default_level, trimmed))
}
