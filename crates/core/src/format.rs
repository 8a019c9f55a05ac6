//! Renders a [`LogRecord`] into the Slack webhook payload.

use crate::config::SinkConfig;
use crate::error::{Result, SlacklogError};
use crate::level::Level;
use crate::model::message::{Attachment, Field, OutgoingMessage};
use crate::model::record::{ExceptionInfo, LogRecord};
use crate::time::format_timestamp;

const ASYNC_FRAME_PREFIX: &str = "at System.Runtime.CompilerServices.";
const ASYNC_MARKER: &str = " -- (async)\r";

pub fn format_message(record: &LogRecord, config: &SinkConfig) -> OutgoingMessage {
    let mut attachments = vec![primary_attachment(record, config)];
    if let Some(exception) = &record.exception {
        attachments.push(exception_attachment(exception, config.tidy_stack_traces));
    }

    OutgoingMessage {
        text: record.message.clone(),
        channel: config.channel.clone().unwrap_or_default(),
        username: config.username.clone().unwrap_or_default(),
        icon_emoji: config.icon.clone().unwrap_or_default(),
        attachments,
    }
}

fn primary_attachment(record: &LogRecord, config: &SinkConfig) -> Attachment {
    let mut fields = vec![
        Field::new("Level", record.level.as_str()),
        Field::new("Timestamp", format_timestamp(&record.timestamp)),
    ];
    fields.extend(config.properties.iter().filter_map(|name| {
        record
            .properties
            .get(name)
            .map(|value| Field::new(name.as_str(), value.as_str()))
    }));

    Attachment {
        title: None,
        fallback: format!("[{}]{}", record.level, record.message),
        color: record.level.color().to_string(),
        fields,
        mrkdwn_in: None,
    }
}

fn exception_attachment(exception: &ExceptionInfo, tidy: bool) -> Attachment {
    let stack_trace = if tidy {
        tidy_stack_trace(&exception.stack_trace)
    } else {
        exception.stack_trace.clone()
    };

    Attachment {
        title: Some("Exception".to_string()),
        fallback: format!("Exception: {} \n {}", exception.message, stack_trace),
        color: Level::Fatal.color().to_string(),
        fields: vec![
            Field::new("Message", exception.message.as_str()),
            Field::new("Type", format!("`{}`", exception.type_name)),
            Field::long("Stack Trace", format!("```{stack_trace}```")),
        ],
        mrkdwn_in: Some(vec!["fields".to_string()]),
    }
}

/// Drops compiler-generated async frames, leaving one marker line before the
/// next surviving frame of each dropped run.
pub fn tidy_stack_trace(raw: &str) -> String {
    let mut lines = Vec::new();
    let mut dropped = false;
    for line in raw.split('\n') {
        if line.trim_start().starts_with(ASYNC_FRAME_PREFIX) {
            dropped = true;
            continue;
        }
        if dropped {
            lines.push(ASYNC_MARKER);
            dropped = false;
        }
        lines.push(line);
    }
    lines.join("\n")
}

pub fn to_json(message: &OutgoingMessage) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut serializer = serde_json::Serializer::new(&mut body);
    serde::Serialize::serialize(message, &mut serializer)
        .map_err(|e| SlacklogError::Serialize(format!("failed to encode payload: {e}")))?;
    Ok(body)
}

pub fn to_json_pretty(message: &OutgoingMessage) -> Result<String> {
    serde_json::to_string_pretty(message)
        .map_err(|e| SlacklogError::Serialize(format!("failed to encode payload: {e}")))
}
