use crate::bus::events::ui_type;
use crate::bus::{topics, EventBus};
use log::debug;

pub const UI_TRANSFORMER: &str = "ui-transformer";

/// Republishes every recognised domain event on the UI topic under its
/// `tui.` type. Unknown types are skipped.
pub fn register_ui_transformer(bus: &EventBus) {
    let publisher = bus.clone();
    bus.add_handler(UI_TRANSFORMER, topics::DOMAIN, move |env| {
        let publisher = publisher.clone();
        Box::pin(async move {
            match ui_type(&env.kind) {
                Some(kind) => publisher.publish(topics::UI_MSGS, env.retag(kind)).await,
                None => debug!("no ui mapping for {}", env.kind),
            }
            Ok(())
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::events::{ActionLog, ACTION_LOG};
    use crate::bus::Envelope;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn domain_events_reach_ui_topic_prefixed() {
        let bus = EventBus::new();
        register_ui_transformer(&bus);
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        bus.add_handler("ui", topics::UI_MSGS, move |env| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(env)?;
                Ok(())
            })
        });
        let token = CancellationToken::new();
        let running = tokio::spawn({
            let bus = bus.clone();
            let token = token.clone();
            async move { bus.run(token).await }
        });

        bus.emit(topics::DOMAIN, "not.a.domain.type", &()).await;
        bus.emit(topics::DOMAIN, ACTION_LOG, &ActionLog::now("up: starting"))
            .await;

        let env = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.kind, "tui.action.log");
        let log: ActionLog = env.decode().unwrap();
        assert_eq!(log.text, "up: starting");

        token.cancel();
        running.await.unwrap();
    }
}
