use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devctl_core::actions::{register_ui_transformer, stream_key, StreamRunner};
use devctl_core::bus::events::{
    StreamEnded, StreamEvent, StreamStartRequest, StreamStarted, StreamStopRequest, UI_STREAM_START,
    UI_STREAM_STOP,
};
use devctl_core::bus::{topics, Envelope, EventBus};
use devctl_core::error::{DevctlError, Result};
use devctl_core::runtime::{Client, OpContext, PluginSpec};
use plugin_protocol::{Capabilities, Event, Handshake};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Streams `lines` and then ends, or stays open forever when `endless`.
struct TickerClient {
    spec: PluginSpec,
    handshake: Handshake,
    lines: Vec<&'static str>,
    endless: bool,
}

impl TickerClient {
    fn new(lines: Vec<&'static str>, endless: bool) -> Self {
        let mut caps = Capabilities::default();
        caps.streams.push("logs.follow".into());
        Self {
            spec: PluginSpec::new("ticker", "/fake/ticker"),
            handshake: Handshake::new("ticker", caps),
            lines,
            endless,
        }
    }
}

#[async_trait]
impl Client for TickerClient {
    fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    async fn call(&self, _ctx: &OpContext, op: &str, _input: Value) -> Result<Value> {
        Err(DevctlError::Unsupported {
            plugin_id: "ticker".into(),
            op: op.into(),
        })
    }

    async fn start_stream(
        &self,
        ctx: &OpContext,
        _op: &str,
        _input: Value,
    ) -> Result<(String, mpsc::Receiver<Event>)> {
        let (tx, rx) = mpsc::channel(16);
        let lines = self.lines.clone();
        let endless = self.endless;
        let scope = ctx.clone();
        tokio::spawn(async move {
            for line in lines {
                let _ = tx.send(Event::log("s-1", "info", line)).await;
            }
            if endless {
                // Closing our sender is how a cancelled stream ends.
                scope.done().await;
                return;
            }
            let _ = tx.send(Event::end("s-1", true)).await;
        });
        Ok(("s-1".into(), rx))
    }

    async fn close(&self, _ctx: &OpContext) -> Result<()> {
        Ok(())
    }
}

fn ui_collector(bus: &EventBus) -> mpsc::UnboundedReceiver<Envelope> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.add_handler("test-ui", topics::UI_MSGS, move |env| {
        let tx = tx.clone();
        Box::pin(async move {
            tx.send(env)?;
            Ok(())
        })
    });
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no ui message in time")
        .expect("bus closed")
}

fn start(bus: EventBus, client: TickerClient) -> (CancellationToken, Arc<StreamRunner>) {
    let token = CancellationToken::new();
    let runner = StreamRunner::new(bus.clone(), vec![Arc::new(client)], token.clone());
    runner.register();
    register_ui_transformer(&bus);
    tokio::spawn({
        let token = token.clone();
        async move { bus.run(token).await }
    });
    (token, runner)
}

#[tokio::test]
async fn stream_events_are_republished_for_the_ui() {
    let bus = EventBus::new();
    let mut ui = ui_collector(&bus);
    let (token, _runner) = start(bus.clone(), TickerClient::new(vec!["hello", "world"], false));

    let input = json!({ "service": "api" });
    bus.emit(
        topics::UI_ACTIONS,
        UI_STREAM_START,
        &StreamStartRequest {
            plugin_id: None,
            op: "logs.follow".into(),
            input: input.clone(),
            label: "api logs".into(),
        },
    )
    .await;

    let key = stream_key("ticker", "logs.follow", &input);
    let started = next(&mut ui).await;
    assert_eq!(started.kind, "tui.stream.started");
    let started: StreamStarted = started.decode().unwrap();
    assert_eq!(started.stream_key, key);
    assert_eq!(started.stream_id, "s-1");

    for expected in ["hello", "world"] {
        let ev: StreamEvent = next(&mut ui).await.decode().unwrap();
        assert_eq!(ev.event.message.as_deref(), Some(expected));
    }
    let ended = next(&mut ui).await;
    assert_eq!(ended.kind, "tui.stream.ended");
    let ended: StreamEnded = ended.decode().unwrap();
    assert!(ended.ok);

    token.cancel();
}

#[tokio::test]
async fn stop_request_cancels_running_stream() {
    let bus = EventBus::new();
    let mut ui = ui_collector(&bus);
    let (token, runner) = start(bus.clone(), TickerClient::new(vec!["tick"], true));

    bus.emit(
        topics::UI_ACTIONS,
        UI_STREAM_START,
        &StreamStartRequest {
            plugin_id: Some("ticker".into()),
            op: "logs.follow".into(),
            input: Value::Null,
            label: String::new(),
        },
    )
    .await;
    let started: StreamStarted = next(&mut ui).await.decode().unwrap();
    let _tick = next(&mut ui).await;
    assert_eq!(runner.active(), [started.stream_key.clone()]);

    bus.emit(
        topics::UI_ACTIONS,
        UI_STREAM_STOP,
        &StreamStopRequest {
            stream_key: started.stream_key.clone(),
        },
    )
    .await;
    let ended: StreamEnded = next(&mut ui).await.decode().unwrap();
    assert_eq!(ended.stream_key, started.stream_key);
    assert!(!ended.ok);
    assert!(runner.active().is_empty());

    token.cancel();
}

#[tokio::test]
async fn unknown_stream_op_ends_immediately() {
    let bus = EventBus::new();
    let mut ui = ui_collector(&bus);
    let (token, _runner) = start(bus.clone(), TickerClient::new(vec![], false));

    bus.emit(
        topics::UI_ACTIONS,
        UI_STREAM_START,
        &StreamStartRequest {
            plugin_id: None,
            op: "metrics.watch".into(),
            input: Value::Null,
            label: String::new(),
        },
    )
    .await;
    let ended: StreamEnded = next(&mut ui).await.decode().unwrap();
    assert!(!ended.ok);
    assert!(ended.error.unwrap().contains("metrics.watch"));

    token.cancel();
}
