mod common;

use std::time::Duration;

use common::{init_logger, repo, state_file, wait_gone, Entry, HTTP_ECHO};
use devctl_core::actions::{register_action_runner, Orchestrator, OrchestratorOptions};
use devctl_core::bus::events::{
    ActionKind, ActionLog, ActionRequest, PipelineRunFinished, ServiceExitObserved, ACTION_LOG,
    PIPELINE_PHASE_FINISHED, PIPELINE_RUN_FINISHED, SERVICE_EXIT_OBSERVED, UI_ACTION_REQUEST,
};
use devctl_core::bus::{topics, Envelope, EventBus};
use devctl_core::error::DevctlError;
use devctl_core::runtime::OpContext;
use devctl_core::state::{self, REDACTED};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn orchestrator(root: &std::path::Path) -> Orchestrator {
    Orchestrator::new(OrchestratorOptions::new(root))
}

/// Starts `bus` and forwards everything published on the domain topic.
fn domain_feed(bus: &EventBus, token: &CancellationToken) -> mpsc::UnboundedReceiver<Envelope> {
    let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
    bus.add_handler("test", topics::DOMAIN, move |env| {
        let tx = tx.clone();
        Box::pin(async move {
            tx.send(env)?;
            Ok(())
        })
    });
    tokio::spawn({
        let bus = bus.clone();
        let token = token.clone();
        async move { bus.run(token).await }
    });
    rx
}

async fn next_of(rx: &mut mpsc::UnboundedReceiver<Envelope>, kind: &str) -> Envelope {
    loop {
        let env = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if env.kind == kind {
            return env;
        }
    }
}

#[tokio::test]
async fn happy_up_and_down() {
    init_logger();
    let dir = repo(&[Entry::new("web", &["http-service"]).env("HTTP_ECHO_BIN", HTTP_ECHO)]);
    let root = dir.path();
    let orch = orchestrator(root);
    let ctx = OpContext::new();

    let report = orch.up(&ctx).await.unwrap();
    assert!(state_file(root).is_file());
    let st = report.state.expect("services were started");
    assert_eq!(st.services.len(), 1);
    let rec = &st.services[0];
    assert_eq!(rec.name, "http");
    assert_eq!(rec.env["ECHO_API_TOKEN"], REDACTED);
    assert_eq!(rec.env["ECHO_GREETING"], "hi");

    let url = rec.health_url.clone().expect("http health url recorded");
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // A second up refuses to clobber the running services.
    assert!(matches!(orch.up(&ctx).await, Err(DevctlError::State(_))));

    assert!(orch.down(&ctx).await.unwrap());
    assert!(!state_file(root).exists());
    assert!(wait_gone(rec.pid, Duration::from_secs(1)).await);

    // Nothing left to stop.
    assert!(!orch.down(&ctx).await.unwrap());
}

#[tokio::test]
async fn dry_run_plans_without_starting() {
    init_logger();
    let dir = repo(&[Entry::new("web", &["http-service"]).env("HTTP_ECHO_BIN", HTTP_ECHO)]);
    let mut opts = OrchestratorOptions::new(dir.path());
    opts.dry_run = true;

    let report = Orchestrator::new(opts).up(&OpContext::new()).await.unwrap();
    assert!(report.state.is_none());
    assert_eq!(report.plan.names(), ["http"]);
    assert!(report.config["services"]["http"]["port"].as_u64().is_some());
    assert!(!state_file(dir.path()).exists());
}

#[tokio::test]
async fn plugins_run_in_priority_then_id_order() {
    init_logger();
    let log_dir = tempfile::tempdir().unwrap();
    let log = log_dir.path().join("order.log");
    let log_s = log.display().to_string();
    let dir = repo(&[
        Entry::new("b", &["set-x", "b", &log_s]).priority(10),
        Entry::new("a", &["set-x", "a", &log_s]).priority(10),
        Entry::new("c", &["set-x", "c", &log_s]).priority(5),
    ]);

    let report = orchestrator(dir.path()).plan(&OpContext::new()).await.unwrap();
    assert_eq!(report.config["x"], "b");
    let order = std::fs::read_to_string(&log).unwrap();
    assert_eq!(order.lines().collect::<Vec<_>>(), ["c", "a", "b"]);
}

#[tokio::test]
async fn validation_errors_abort_up() {
    init_logger();
    let dir = repo(&[Entry::new("checker", &["validate-fail"])]);
    let err = orchestrator(dir.path()).up(&OpContext::new()).await.unwrap_err();
    assert!(matches!(err, DevctlError::ValidationFailed), "{}", err);
    assert!(!state::exists(dir.path()));
}

#[tokio::test]
async fn plugin_commands_report_exit_codes() {
    init_logger();
    let dir = repo(&[Entry::new("tools", &["command"])]);
    let orch = orchestrator(dir.path());
    let ctx = OpContext::new();

    assert_eq!(orch.run_command(&ctx, "hello", &[]).await.unwrap(), 0);
    let err = orch
        .run_command(&ctx, "hello", &["fail".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exit code 3"), "{}", err);
}

#[tokio::test]
async fn run_events_are_published() {
    init_logger();
    let dir = repo(&[Entry::new("plain", &["ok"])]);
    let bus = EventBus::new();
    let token = CancellationToken::new();
    let mut rx = domain_feed(&bus, &token);

    let orch = orchestrator(dir.path()).with_bus(bus);
    orch.plan(&OpContext::new()).await.unwrap();

    let mut phases = 0;
    loop {
        let env = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if env.kind == PIPELINE_PHASE_FINISHED {
            phases += 1;
        }
        if env.kind == PIPELINE_RUN_FINISHED {
            let done: PipelineRunFinished = env.decode().unwrap();
            assert!(done.ok);
            break;
        }
    }
    // mutate, build, prepare, validate, launch plan
    assert_eq!(phases, 5);
    token.cancel();
}

#[tokio::test]
async fn ui_action_requests_drive_up_and_down() {
    init_logger();
    let dir = repo(&[Entry::new("web", &["http-service"]).env("HTTP_ECHO_BIN", HTTP_ECHO)]);
    let root = dir.path();
    let bus = EventBus::new();
    let token = CancellationToken::new();
    let orch = orchestrator(root).with_bus(bus.clone());
    register_action_runner(&bus, orch, token.clone());
    let mut rx = domain_feed(&bus, &token);

    let request = |kind| ActionRequest { kind };
    bus.emit(topics::UI_ACTIONS, UI_ACTION_REQUEST, &request(ActionKind::Up))
        .await;
    let mut logs = Vec::new();
    while logs.len() < 2 {
        let log: ActionLog = next_of(&mut rx, ACTION_LOG).await.decode().unwrap();
        logs.push(log.text);
    }
    assert_eq!(logs, ["up: starting", "up: started http"]);
    assert!(state_file(root).is_file());

    bus.emit(topics::UI_ACTIONS, UI_ACTION_REQUEST, &request(ActionKind::Down))
        .await;
    let mut exited = None;
    let mut stopped = None;
    while exited.is_none() || stopped.is_none() {
        let env = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if env.kind == SERVICE_EXIT_OBSERVED {
            let exit: ServiceExitObserved = env.decode().unwrap();
            exited = Some(exit.service);
        } else if env.kind == ACTION_LOG {
            let log: ActionLog = env.decode().unwrap();
            if log.text != "down: starting" {
                stopped = Some(log.text);
            }
        }
    }
    assert_eq!(exited.as_deref(), Some("http"));
    assert_eq!(stopped.as_deref(), Some("down: services stopped"));
    assert!(!state_file(root).exists());
    token.cancel();
}
