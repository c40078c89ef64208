use super::context::{OpContext, RequestMeta};
use super::router::Router;
use super::spec::PluginSpec;
use crate::error::{DevctlError, OpError, Result};
use crate::process::terminate_group;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use plugin_protocol::errors::E_RUNTIME;
use plugin_protocol::{decode_incoming, write_frame, Event, Frame, Handshake, Incoming, ProtocolError, Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Capacity of each stream's event channel.
pub const STREAM_CAPACITY: usize = 256;

/// A live session with one plugin.
///
/// The pipeline and the stream runner only see this trait, so tests can
/// drive them with in-memory fakes.
#[async_trait]
pub trait Client: Send + Sync {
    fn spec(&self) -> &PluginSpec;

    fn handshake(&self) -> &Handshake;

    fn id(&self) -> &str {
        &self.spec().id
    }

    fn supports_op(&self, op: &str) -> bool {
        self.handshake().capabilities.has_op(op)
    }

    /// Streaming ops may be declared under `streams` or `ops`.
    fn supports_stream(&self, op: &str) -> bool {
        let caps = &self.handshake().capabilities;
        caps.has_stream(op) || caps.has_op(op)
    }

    /// Unary request/response. `ok = false` surfaces as [`DevctlError::Op`].
    async fn call(&self, ctx: &OpContext, op: &str, input: Value) -> Result<Value>;

    /// Starts a streaming op and returns the plugin's stream id with the
    /// channel its events are delivered on.
    async fn start_stream(
        &self,
        ctx: &OpContext,
        op: &str,
        input: Value,
    ) -> Result<(String, mpsc::Receiver<Event>)>;

    async fn close(&self, ctx: &OpContext) -> Result<()>;
}

/// Calls `op` with a serializable input and decodes the output.
///
/// A missing or `null` output decodes as an empty object, so output types
/// made of defaulted fields accept plugins that return nothing.
pub async fn call_typed<C, I, O>(client: &C, ctx: &OpContext, op: &str, input: &I) -> Result<O>
where
    C: Client + ?Sized,
    I: Serialize + Sync,
    O: DeserializeOwned,
{
    let input = serde_json::to_value(input)?;
    let output = match client.call(ctx, op, input).await? {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(output).map_err(|e| DevctlError::BadOutput {
        plugin_id: client.id().to_string(),
        op: op.to_string(),
        message: e.to_string(),
    })
}

/// A [`Client`] backed by a child process speaking the line protocol.
pub struct PluginClient {
    spec: PluginSpec,
    handshake: Handshake,
    meta: RequestMeta,
    router: Arc<Router>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pgid: i32,
    next_id: AtomicU64,
    closing: Arc<AtomicBool>,
    shutdown_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClient")
            .field("id", &self.spec.id)
            .field("pid", &self.pgid)
            .finish_non_exhaustive()
    }
}

impl PluginClient {
    /// Wraps a spawned child whose handshake was already accepted and starts
    /// the stdout reader. `stderr_task` is the drain the factory started
    /// before reading the handshake.
    pub(crate) fn start(
        spec: PluginSpec,
        handshake: Handshake,
        meta: RequestMeta,
        mut child: Child,
        stdout: BufReader<ChildStdout>,
        stderr_task: Option<JoinHandle<()>>,
        shutdown_timeout: Duration,
    ) -> Self {
        let pgid = child.id().map(|p| p as i32).unwrap_or(0);
        let stdin = child.stdin.take();
        let router = Arc::new(Router::new(STREAM_CAPACITY));
        let closing = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            spec.id.clone(),
            stdout,
            router.clone(),
            closing.clone(),
        ));
        let mut tasks = vec![reader];
        tasks.extend(stderr_task);

        Self {
            spec,
            handshake,
            meta,
            router,
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            pgid,
            next_id: AtomicU64::new(1),
            closing,
            shutdown_timeout,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pgid
    }

    fn next_request_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.spec.id, n)
    }

    fn request(&self, ctx: &OpContext, request_id: &str, op: &str, input: Value) -> Frame {
        let mut req = Request::new(request_id, op, input);
        req.ctx = ctx.request_context(&self.meta);
        Frame::Request(req)
    }

    async fn send(&self, frame: &Frame) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        match stdin.as_mut() {
            Some(w) => Ok(write_frame(w, frame).await?),
            None => Err(ProtocolError::runtime(format!("plugin {} is closed", self.spec.id)).into()),
        }
    }

    /// Turns a response into the op's output, logging any warnings.
    fn output(&self, op: &str, response: Response) -> Result<Value> {
        for w in &response.warnings {
            warn!("[{}] {}: {}", self.spec.id, op, w.message);
        }
        if !response.ok {
            let (code, message, details) = match response.error {
                Some(e) => (e.code, e.message, e.details),
                None => (E_RUNTIME.to_string(), "request failed".to_string(), None),
            };
            return Err(OpError {
                plugin_id: self.spec.id.clone(),
                op: op.to_string(),
                code,
                message,
                details,
            }
            .into());
        }
        Ok(response.output.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Client for PluginClient {
    fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    async fn call(&self, ctx: &OpContext, op: &str, input: Value) -> Result<Value> {
        if !self.supports_op(op) {
            return Err(DevctlError::Unsupported {
                plugin_id: self.spec.id.clone(),
                op: op.to_string(),
            });
        }
        let rid = self.next_request_id();
        let slot = self.router.register(&rid)?;
        let frame = self.request(ctx, &rid, op, input);

        let delivery = ctx
            .run(async {
                self.send(&frame).await?;
                slot.await.map_err(|_| {
                    DevctlError::from(ProtocolError::runtime("response slot dropped"))
                })
            })
            .await;
        let delivery = match delivery {
            Ok(d) => d,
            Err(e) => {
                self.router.cancel(&rid);
                return Err(e);
            }
        };
        self.output(op, delivery?)
    }

    async fn start_stream(
        &self,
        ctx: &OpContext,
        op: &str,
        input: Value,
    ) -> Result<(String, mpsc::Receiver<Event>)> {
        if !self.supports_stream(op) {
            return Err(DevctlError::Unsupported {
                plugin_id: self.spec.id.clone(),
                op: op.to_string(),
            });
        }
        let rid = self.next_request_id();
        let slot = self.router.register_stream(&rid)?;
        let frame = self.request(ctx, &rid, op, input);

        let delivery = ctx
            .run(async {
                self.send(&frame).await?;
                slot.await.map_err(|_| {
                    DevctlError::from(ProtocolError::runtime("response slot dropped"))
                })
            })
            .await;
        let (response, events) = match delivery {
            Ok(d) => d?,
            Err(e) => {
                self.router.cancel(&rid);
                return Err(e);
            }
        };
        let output = self.output(op, response)?;
        let stream_id = output
            .get("stream_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut events = match events {
            Some(rx) if !stream_id.is_empty() => rx,
            _ => {
                return Err(DevctlError::BadOutput {
                    plugin_id: self.spec.id.clone(),
                    op: op.to_string(),
                    message: "missing stream_id".to_string(),
                })
            }
        };

        // Hand the caller a channel that also closes when its scope ends.
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let scope = ctx.clone();
        tokio::spawn(async move {
            let forward = async {
                while let Some(ev) = events.recv().await {
                    if tx.send(ev).await.is_err() {
                        break;
                    }
                }
            };
            tokio::select! {
                _ = forward => {}
                _ = scope.done() => {}
            }
        });
        Ok((stream_id, rx))
    }

    async fn close(&self, ctx: &OpContext) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("closing plugin {}", self.spec.id);
        drop(self.stdin.lock().await.take());

        let child = self.child.lock().await.take();
        let mut result = Ok(());
        if let Some(mut child) = child {
            let budget = match ctx.remaining() {
                Some(left) => left.min(self.shutdown_timeout),
                None => self.shutdown_timeout,
            };
            // Give the plugin a moment to exit on stdin EOF before signalling.
            if tokio::time::timeout(budget.min(Duration::from_millis(100)), child.wait())
                .await
                .is_err()
            {
                match terminate_group(self.pgid, budget).await {
                    Ok(true) => {}
                    Ok(false) => {
                        result = Err(ProtocolError::runtime(format!(
                            "plugin {} survived SIGKILL",
                            self.spec.id
                        ))
                        .into())
                    }
                    Err(e) => result = Err(e.into()),
                }
                let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
            }
        }

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(Duration::from_millis(500), task).await.is_err() {
                debug!("plugin {} reader did not finish in time", self.spec.id);
            }
        }
        self.router.fail_all(ProtocolError::runtime(format!(
            "plugin {} closed",
            self.spec.id
        )));
        info!("plugin {} closed", self.spec.id);
        result
    }
}

async fn read_loop(
    plugin_id: String,
    stdout: BufReader<ChildStdout>,
    router: Arc<Router>,
    closing: Arc<AtomicBool>,
) {
    let mut lines = stdout.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                let msg = if closing.load(Ordering::SeqCst) {
                    format!("plugin {} closed", plugin_id)
                } else {
                    error!("plugin {} exited unexpectedly", plugin_id);
                    format!("plugin {} exited (stdout closed)", plugin_id)
                };
                router.fail_all(ProtocolError::runtime(msg));
                return;
            }
            Err(e) => {
                error!("plugin {}: stdout read failed: {}", plugin_id, e);
                router.fail_all(ProtocolError::invalid_json(e.to_string()));
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match decode_incoming(&line) {
            Ok(Incoming::Response(resp)) => router.deliver(resp),
            Ok(Incoming::Event(ev)) => router.publish(ev).await,
            Err(err) => {
                error!("plugin {}: {}", plugin_id, err);
                router.fail_all(err);
                return;
            }
        }
    }
}

/// Logs every stderr line of a plugin, tagged with its id.
pub(crate) async fn drain_stderr(plugin_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "devctl::plugin", "[{}] {}", plugin_id, line);
    }
}
