use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use slacklog_core::level::Level;
use slacklog_core::model::record::{ExceptionInfo, LogRecord};

pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn sample_record(level: Level, message: &str) -> LogRecord {
    LogRecord::new(level, message)
        .with_timestamp(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap())
        .with_property("service", "api")
        .with_property("request_id", "req-7")
}

pub fn sample_error_record(message: &str) -> LogRecord {
    sample_record(Level::Error, message).with_exception(ExceptionInfo {
        message: "connection reset by peer".to_string(),
        type_name: "IOException".to_string(),
        stack_trace: [
            "   at Api.Client.SendAsync()",
            "   at System.Runtime.CompilerServices.TaskAwaiter.ThrowForNonSuccess(Task task)",
            "   at System.Runtime.CompilerServices.TaskAwaiter.HandleNonSuccessAndDebuggerNotification(Task task)",
            "   at Api.Orders.PlaceAsync()",
        ]
        .join("\n"),
    })
}

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub content_type: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct HookState {
    requests: Vec<ReceivedRequest>,
    fail: HashSet<usize>,
    delay: HashMap<usize, Duration>,
}

/// In-process stand-in for a Slack incoming webhook at `POST /hook`.
#[derive(Clone)]
pub struct MockWebhook {
    addr: SocketAddr,
    state: Arc<Mutex<HookState>>,
}

impl MockWebhook {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(HookState::default()));
        let app = Router::new()
            .route("/hook", post(receive))
            .with_state(state.clone());

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }

    /// Answer HTTP 500 to the requests at these zero-based arrival indices.
    pub fn fail_requests(&self, indices: impl IntoIterator<Item = usize>) {
        self.state.lock().unwrap().fail.extend(indices);
    }

    /// Hold the response to the requests at these arrival indices for `delay`.
    pub fn delay_requests(&self, indices: impl IntoIterator<Item = usize>, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        for index in indices {
            state.delay.insert(index, delay);
        }
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.requests().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.requests().len() >= count
    }
}

async fn receive(
    State(state): State<Arc<Mutex<HookState>>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let (status, delay) = {
        let mut state = state.lock().unwrap();
        let index = state.requests.len();
        state.requests.push(ReceivedRequest {
            content_type: headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        });
        let status = if state.fail.contains(&index) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        };
        (status, state.delay.get(&index).copied())
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    status
}
