use std::collections::BTreeMap;

use chrono::Utc;
use slacklog_core::level::Level;
use slacklog_core::model::record::{ExceptionInfo, LogRecord};
use tracing::field::{Field, Visit};
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::dispatcher::Dispatcher;

/// Events from these targets never reach the webhook, so delivery
/// diagnostics cannot loop back into the dispatcher.
const IGNORED_TARGETS: [&str; 4] = ["slacklog_sink", "reqwest", "hyper", "h2"];

/// Bridges `tracing` events into a [`Dispatcher`].
///
/// Events below the configured `minimum_level` are skipped. The `message`
/// field becomes the record message; `exception.message`, `exception.type`
/// and `exception.stacktrace` fields (or a field recorded as an error) build
/// the exception attachment; every other field becomes a property.
#[derive(Clone)]
pub struct WebhookLayer {
    dispatcher: Dispatcher,
    minimum_level: Level,
}

impl WebhookLayer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let minimum_level = dispatcher.config().minimum_level;
        Self {
            dispatcher,
            minimum_level,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl<S> Layer<S> for WebhookLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if IGNORED_TARGETS
            .iter()
            .any(|target| metadata.target().starts_with(target))
        {
            return;
        }

        let level = Level::from(*metadata.level());
        if level < self.minimum_level {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        self.dispatcher.emit(visitor.into_record(level, metadata));
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    properties: BTreeMap<String, String>,
    exception_message: Option<String>,
    exception_type: Option<String>,
    exception_stacktrace: Option<String>,
    error: Option<ExceptionInfo>,
}

impl RecordVisitor {
    fn record_value(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "exception.message" => self.exception_message = Some(value),
            "exception.type" => self.exception_type = Some(value),
            "exception.stacktrace" => self.exception_stacktrace = Some(value),
            _ => {
                self.properties.insert(name.to_string(), value);
            }
        }
    }

    fn into_record(self, level: Level, metadata: &Metadata<'_>) -> LogRecord {
        let mut properties = self.properties;
        properties
            .entry("target".to_string())
            .or_insert_with(|| metadata.target().to_string());

        let has_exception_fields = self.exception_message.is_some()
            || self.exception_type.is_some()
            || self.exception_stacktrace.is_some();
        let exception = if has_exception_fields {
            let error = self.error.unwrap_or_else(|| ExceptionInfo {
                message: String::new(),
                type_name: "Error".to_string(),
                stack_trace: String::new(),
            });
            Some(ExceptionInfo {
                message: self.exception_message.unwrap_or(error.message),
                type_name: self.exception_type.unwrap_or(error.type_name),
                stack_trace: self.exception_stacktrace.unwrap_or(error.stack_trace),
            })
        } else {
            self.error
        };

        LogRecord {
            timestamp: Utc::now(),
            level,
            message: self
                .message
                .unwrap_or_else(|| metadata.name().to_string()),
            properties,
            exception,
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_value(field.name(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field.name(), value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut causes = Vec::new();
        let mut source = value.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        self.error = Some(ExceptionInfo {
            message: value.to_string(),
            type_name: field.name().to_string(),
            stack_trace: causes.join("\n"),
        });
    }
}
