//! Runs plugin streams on behalf of the UI.
//!
//! Listens for `tui.stream.start` and `tui.stream.stop` on the UI action
//! topic, drives the plugin stream API and republishes what comes back as
//! `stream.started`, `stream.event` and `stream.ended` domain events.

use crate::bus::events::{
    StreamEnded, StreamEvent, StreamStartRequest, StreamStarted, StreamStopRequest,
    STREAM_ENDED, STREAM_EVENT, STREAM_STARTED, UI_STREAM_START, UI_STREAM_STOP,
};
use crate::bus::{topics, Envelope, EventBus};
use crate::runtime::{Client, OpContext};
use log::{debug, info, warn};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const STREAM_RUNNER: &str = "stream-runner";
pub const STREAM_START_TIMEOUT: Duration = Duration::from_secs(2);

/// Local identifier of a stream request: hex SHA-256 of the plugin id, the
/// op and the canonical JSON of the input.
pub fn stream_key(plugin_id: &str, op: &str, input: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plugin_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(op.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(input).as_bytes());
    hex::encode(hasher.finalize())
}

/// Compact JSON with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

pub struct StreamRunner {
    bus: EventBus,
    clients: Vec<Arc<dyn Client>>,
    running: Mutex<HashMap<String, CancellationToken>>,
    parent: CancellationToken,
}

impl StreamRunner {
    /// Streams live until stopped, until they end, or until `parent` fires.
    pub fn new(bus: EventBus, clients: Vec<Arc<dyn Client>>, parent: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            bus,
            clients,
            running: Mutex::new(HashMap::new()),
            parent,
        })
    }

    pub fn register(self: &Arc<Self>) {
        let runner = self.clone();
        self.bus.add_handler(STREAM_RUNNER, topics::UI_ACTIONS, move |env| {
            let runner = runner.clone();
            Box::pin(async move { runner.handle(env).await })
        });
    }

    pub fn active(&self) -> Vec<String> {
        let running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        running.keys().cloned().collect()
    }

    async fn handle(self: Arc<Self>, env: Envelope) -> anyhow::Result<()> {
        match env.kind.as_str() {
            UI_STREAM_START => {
                let req: StreamStartRequest = env.decode()?;
                self.start(req).await;
            }
            UI_STREAM_STOP => {
                let req: StreamStopRequest = env.decode()?;
                self.stop(&req.stream_key);
            }
            _ => {}
        }
        Ok(())
    }

    fn pick(&self, req: &StreamStartRequest) -> Option<Arc<dyn Client>> {
        self.clients
            .iter()
            .find(|c| match &req.plugin_id {
                Some(id) => c.id() == id,
                None => c.supports_stream(&req.op),
            })
            .cloned()
    }

    /// Starts the requested stream unless one with the same key runs.
    pub async fn start(self: &Arc<Self>, req: StreamStartRequest) {
        let client = match self.pick(&req) {
            Some(c) => c,
            None => {
                let key = stream_key(req.plugin_id.as_deref().unwrap_or_default(), &req.op, &req.input);
                self.ended(&key, false, Some(format!("no plugin provides stream {:?}", req.op)))
                    .await;
                return;
            }
        };
        let key = stream_key(client.id(), &req.op, &req.input);
        let token = {
            let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
            if running.contains_key(&key) {
                debug!("stream {} already running", key);
                return;
            }
            let token = self.parent.child_token();
            running.insert(key.clone(), token.clone());
            token
        };

        let scope = OpContext::with_token(token);
        let started = tokio::time::timeout(
            STREAM_START_TIMEOUT,
            client.start_stream(&scope, &req.op, req.input.clone()),
        )
        .await;
        let (stream_id, mut events) = match started {
            Ok(Ok(started)) => started,
            Ok(Err(e)) => {
                self.forget(&key);
                self.ended(&key, false, Some(e.to_string())).await;
                return;
            }
            Err(_) => {
                self.forget(&key);
                self.ended(&key, false, Some("stream start timed out".into()))
                    .await;
                return;
            }
        };
        info!("stream {} started: {} {} ({})", key, client.id(), req.op, stream_id);
        self.bus
            .emit(
                topics::DOMAIN,
                STREAM_STARTED,
                &StreamStarted {
                    stream_key: key.clone(),
                    plugin_id: client.id().to_string(),
                    op: req.op.clone(),
                    stream_id,
                    label: req.label.clone(),
                },
            )
            .await;

        let runner = self.clone();
        tokio::spawn(async move {
            let mut ok = false;
            let mut error = None;
            while let Some(event) = events.recv().await {
                if event.is_end() {
                    ok = event.ok.unwrap_or(true);
                    break;
                }
                runner
                    .bus
                    .emit(
                        topics::DOMAIN,
                        STREAM_EVENT,
                        &StreamEvent {
                            stream_key: key.clone(),
                            event,
                        },
                    )
                    .await;
            }
            if !ok && scope.token().is_cancelled() {
                error = Some("stopped".to_string());
            }
            runner.forget(&key);
            runner.ended(&key, ok, error).await;
        });
    }

    /// Cancels the stream with `key`. Unknown keys are ignored.
    pub fn stop(&self, key: &str) {
        let token = {
            let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
            running.remove(key)
        };
        match token {
            Some(t) => t.cancel(),
            None => warn!("stop for unknown stream {}", key),
        }
    }

    fn forget(&self, key: &str) {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        running.remove(key);
    }

    async fn ended(&self, key: &str, ok: bool, error: Option<String>) {
        self.bus
            .emit(
                topics::DOMAIN,
                STREAM_ENDED,
                &StreamEnded {
                    stream_key: key.to_string(),
                    ok,
                    error,
                },
            )
            .await;
    }
}
