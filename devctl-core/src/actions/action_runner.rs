use super::orchestrator::Orchestrator;
use crate::bus::events::{ActionKind, ActionLog, ActionRequest, ACTION_LOG, UI_ACTION_REQUEST};
use crate::bus::{topics, EventBus};
use crate::runtime::OpContext;
use log::info;
use tokio_util::sync::CancellationToken;

pub const ACTION_RUNNER: &str = "action-runner";

/// Executes `tui.action.request` messages against `orchestrator`,
/// narrating progress as `action.log` events.
pub fn register_action_runner(bus: &EventBus, orchestrator: Orchestrator, token: CancellationToken) {
    let log_bus = bus.clone();
    bus.add_handler(ACTION_RUNNER, topics::UI_ACTIONS, move |env| {
        let orchestrator = orchestrator.clone();
        let bus = log_bus.clone();
        let token = token.clone();
        Box::pin(async move {
            if env.kind != UI_ACTION_REQUEST {
                return Ok(());
            }
            let req: ActionRequest = env.decode()?;
            let ctx = OpContext::with_token(token.child_token());
            run_action(&bus, &orchestrator, &ctx, req.kind).await;
            Ok(())
        })
    });
}

async fn say(bus: &EventBus, text: String) {
    info!("{}", text);
    bus.emit(topics::DOMAIN, ACTION_LOG, &ActionLog::now(text)).await;
}

async fn run_action(bus: &EventBus, orch: &Orchestrator, ctx: &OpContext, kind: ActionKind) {
    say(bus, format!("{:?}: starting", kind).to_lowercase()).await;
    let down = matches!(kind, ActionKind::Down | ActionKind::Restart);
    let up = matches!(kind, ActionKind::Up | ActionKind::Restart);

    if down {
        match orch.down(ctx).await {
            Ok(true) => say(bus, "down: services stopped".into()).await,
            Ok(false) => say(bus, "down: nothing to stop".into()).await,
            Err(e) => {
                say(bus, format!("down: failed: {}", e)).await;
                return;
            }
        }
    }
    if up {
        match orch.up(ctx).await {
            Ok(report) => {
                say(bus, format!("up: started {}", report.plan.names().join(", "))).await
            }
            Err(e) => say(bus, format!("up: failed: {}", e)).await,
        }
    }
}
