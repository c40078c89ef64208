//! # Event Bus
//!
//! In-process publish/subscribe between the orchestrator and its observers.
//!
//! Publishers post [`Envelope`]s to a named topic. Every handler registered
//! on that topic gets its own bounded queue and a task that feeds it
//! messages one at a time, in publish order. A handler acknowledges a
//! message by returning; an error is logged and the message dropped.
//!
//! The bus is started with a cancellation token and stops when it fires.

pub mod envelope;
pub mod events;
pub mod topics;

pub use envelope::Envelope;

use futures::future::BoxFuture;
use log::{debug, error, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Queue depth per subscriber. A full queue makes publishers wait.
pub const SUBSCRIBER_CAPACITY: usize = 1024;

pub type Handler = Arc<dyn Fn(Envelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Subscription {
    name: String,
    topic: String,
    tx: mpsc::Sender<Envelope>,
}

struct Worker {
    name: String,
    topic: String,
    rx: mpsc::Receiver<Envelope>,
    handler: Handler,
}

#[derive(Default)]
struct Table {
    subscriptions: Vec<Subscription>,
    idle: Vec<Worker>,
    running: Option<CancellationToken>,
}

/// Cloneable handle to one bus.
#[derive(Clone, Default)]
pub struct EventBus {
    table: Arc<Mutex<Table>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers `handler` as subscriber `name` on `topic`.
    ///
    /// Handlers added after [`EventBus::run`] start right away.
    pub fn add_handler<F>(&self, name: impl Into<String>, topic: impl Into<String>, handler: F)
    where
        F: Fn(Envelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let name = name.into();
        let topic = topic.into();
        let worker = Worker {
            name: name.clone(),
            topic: topic.clone(),
            rx,
            handler: Arc::new(handler),
        };
        let mut table = self.lock();
        table.subscriptions.push(Subscription { name, topic, tx });
        match &table.running {
            Some(token) => {
                tokio::spawn(drive(worker, token.clone()));
            }
            None => table.idle.push(worker),
        }
    }

    /// Delivers `envelope` to every subscriber of `topic`.
    ///
    /// Waits while a subscriber's queue is full. Queues only drain once
    /// [`EventBus::run`] has started, so publishing more than
    /// [`SUBSCRIBER_CAPACITY`] envelopes to a bus that is never run blocks
    /// forever. Subscribers that are gone are skipped.
    pub async fn publish(&self, topic: &str, envelope: Envelope) {
        let targets: Vec<(String, mpsc::Sender<Envelope>)> = self
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| (s.name.clone(), s.tx.clone()))
            .collect();
        if targets.is_empty() {
            debug!("bus: no subscriber for {} on {}", envelope.kind, topic);
        }
        for (name, tx) in targets {
            let pending = match tx.try_send(envelope.clone()) {
                Ok(()) => continue,
                Err(TrySendError::Closed(_)) => {
                    debug!("bus: subscriber {} on {} is gone", name, topic);
                    continue;
                }
                Err(TrySendError::Full(env)) => env,
            };
            warn!(
                "bus: subscriber {} on {} is full, waiting to deliver {}",
                name, topic, pending.kind
            );
            if tx.send(pending).await.is_err() {
                debug!("bus: subscriber {} on {} is gone", name, topic);
            }
        }
    }

    /// Wraps `payload` as `kind` and publishes it. Encoding errors are logged.
    pub async fn emit<T: Serialize>(&self, topic: &str, kind: &str, payload: &T) {
        match Envelope::new(kind, payload) {
            Ok(env) => self.publish(topic, env).await,
            Err(e) => warn!("bus: cannot encode {}: {}", kind, e),
        }
    }

    /// Starts every registered handler and runs until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let workers: Vec<Worker> = {
            let mut table = self.lock();
            table.running = Some(token.clone());
            table.idle.drain(..).collect()
        };
        let tasks: Vec<_> = workers
            .into_iter()
            .map(|w| tokio::spawn(drive(w, token.clone())))
            .collect();

        token.cancelled().await;
        for task in tasks {
            let _ = task.await;
        }
        let mut table = self.lock();
        table.running = None;
        table.subscriptions.clear();
    }
}

async fn drive(mut worker: Worker, token: CancellationToken) {
    loop {
        let envelope = tokio::select! {
            _ = token.cancelled() => break,
            next = worker.rx.recv() => match next {
                Some(env) => env,
                None => break,
            },
        };
        let kind = envelope.kind.clone();
        let handled = tokio::select! {
            _ = token.cancelled() => break,
            res = (worker.handler)(envelope) => res,
        };
        if let Err(e) = handled {
            error!(
                "bus: handler {} on {} failed for {}: {:#}",
                worker.name, worker.topic, kind, e
            );
        }
    }
    debug!("bus: handler {} on {} stopped", worker.name, worker.topic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn collector(bus: &EventBus, name: &str, topic: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.add_handler(name, topic, move |env| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(env)?;
                Ok(())
            })
        });
        rx
    }

    #[tokio::test]
    async fn delivers_in_publish_order_per_topic() {
        let bus = EventBus::new();
        let mut a = collector(&bus, "a", topics::DOMAIN);
        let mut b = collector(&bus, "b", topics::UI_MSGS);
        let token = CancellationToken::new();
        let running = tokio::spawn({
            let bus = bus.clone();
            let token = token.clone();
            async move { bus.run(token).await }
        });

        for n in 0..5 {
            bus.emit(topics::DOMAIN, "action.log", &json!({ "n": n })).await;
        }
        for n in 0..5 {
            let env = tokio::time::timeout(Duration::from_secs(1), a.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(env.payload["n"], n);
        }
        assert!(b.try_recv().is_err());

        token.cancel();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_holds_publisher_until_run() {
        let bus = EventBus::new();
        let mut rx = collector(&bus, "slow", topics::DOMAIN);
        for n in 0..SUBSCRIBER_CAPACITY {
            bus.emit(topics::DOMAIN, "action.log", &json!({ "n": n })).await;
        }
        let overflow = tokio::spawn({
            let bus = bus.clone();
            async move {
                let n = SUBSCRIBER_CAPACITY;
                bus.emit(topics::DOMAIN, "action.log", &json!({ "n": n })).await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!overflow.is_finished());

        let token = CancellationToken::new();
        let running = tokio::spawn({
            let bus = bus.clone();
            let token = token.clone();
            async move { bus.run(token).await }
        });
        tokio::time::timeout(Duration::from_secs(2), overflow)
            .await
            .unwrap()
            .unwrap();
        for n in 0..=SUBSCRIBER_CAPACITY {
            let env = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(env.payload["n"], n);
        }

        token.cancel();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn failing_handler_keeps_running() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.add_handler("picky", topics::DOMAIN, move |env| {
            let tx = tx.clone();
            Box::pin(async move {
                if env.payload["bad"] == true {
                    anyhow::bail!("rejected");
                }
                tx.send(env.kind)?;
                Ok(())
            })
        });
        let token = CancellationToken::new();
        let running = tokio::spawn({
            let bus = bus.clone();
            let token = token.clone();
            async move { bus.run(token).await }
        });

        bus.emit(topics::DOMAIN, "first", &json!({ "bad": true })).await;
        bus.emit(topics::DOMAIN, "second", &json!({})).await;
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("second"));

        token.cancel();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn late_handlers_start_immediately() {
        let bus = EventBus::new();
        let token = CancellationToken::new();
        let running = tokio::spawn({
            let bus = bus.clone();
            let token = token.clone();
            async move { bus.run(token).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut late = collector(&bus, "late", topics::UI_ACTIONS);
        bus.emit(topics::UI_ACTIONS, events::UI_STREAM_STOP, &json!({"stream_key": "k"}))
            .await;
        let env = tokio::time::timeout(Duration::from_secs(1), late.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.kind, events::UI_STREAM_STOP);

        token.cancel();
        running.await.unwrap();
    }
}
