//! Types and payloads carried on the bus.
//!
//! Every domain type has a UI twin, the same string prefixed with `tui.`.

use crate::engine::{LaunchPlan, StepsResult, ValidateResult};
use crate::state::ServiceStatus;
use chrono::{DateTime, Utc};
use plugin_protocol::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATE_SNAPSHOT: &str = "state.snapshot";
pub const SERVICE_EXIT_OBSERVED: &str = "service.exit.observed";
pub const ACTION_LOG: &str = "action.log";
pub const PIPELINE_RUN_STARTED: &str = "pipeline.run.started";
pub const PIPELINE_RUN_FINISHED: &str = "pipeline.run.finished";
pub const PIPELINE_PHASE_STARTED: &str = "pipeline.phase.started";
pub const PIPELINE_PHASE_FINISHED: &str = "pipeline.phase.finished";
pub const PIPELINE_BUILD_RESULT: &str = "pipeline.build.result";
pub const PIPELINE_PREPARE_RESULT: &str = "pipeline.prepare.result";
pub const PIPELINE_VALIDATE_RESULT: &str = "pipeline.validate.result";
pub const PIPELINE_LAUNCH_PLAN: &str = "pipeline.launch.plan";
pub const STREAM_STARTED: &str = "stream.started";
pub const STREAM_EVENT: &str = "stream.event";
pub const STREAM_ENDED: &str = "stream.ended";

pub const DOMAIN_TYPES: [&str; 14] = [
    STATE_SNAPSHOT,
    SERVICE_EXIT_OBSERVED,
    ACTION_LOG,
    PIPELINE_RUN_STARTED,
    PIPELINE_RUN_FINISHED,
    PIPELINE_PHASE_STARTED,
    PIPELINE_PHASE_FINISHED,
    PIPELINE_BUILD_RESULT,
    PIPELINE_PREPARE_RESULT,
    PIPELINE_VALIDATE_RESULT,
    PIPELINE_LAUNCH_PLAN,
    STREAM_STARTED,
    STREAM_EVENT,
    STREAM_ENDED,
];

pub const UI_PREFIX: &str = "tui.";
pub const UI_ACTION_REQUEST: &str = "tui.action.request";
pub const UI_STREAM_START: &str = "tui.stream.start";
pub const UI_STREAM_STOP: &str = "tui.stream.stop";

/// UI type for a recognised domain type.
pub fn ui_type(domain: &str) -> Option<String> {
    DOMAIN_TYPES
        .contains(&domain)
        .then(|| format!("{}{}", UI_PREFIX, domain))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    MutateConfig,
    Build,
    Prepare,
    Validate,
    LaunchPlan,
    Supervise,
    StateSave,
    StopSupervise,
    RemoveState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Up,
    Down,
    Plan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub repo_root: String,
    pub at: DateTime<Utc>,
    pub exists: bool,
    #[serde(default)]
    pub services: Vec<ServiceStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceExitObserved {
    pub service: String,
    pub pid: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stderr_tail: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    pub at: DateTime<Utc>,
    pub text: String,
}

impl ActionLog {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunStarted {
    pub run_id: String,
    pub kind: RunKind,
    pub repo_root: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunFinished {
    pub run_id: String,
    pub kind: RunKind,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinePhaseStarted {
    pub run_id: String,
    pub phase: Phase,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinePhaseFinished {
    pub run_id: String,
    pub phase: Phase,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Payload of both `pipeline.build.result` and `pipeline.prepare.result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStepsResult {
    pub run_id: String,
    #[serde(flatten)]
    pub result: StepsResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineValidateResult {
    pub run_id: String,
    #[serde(flatten)]
    pub result: ValidateResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineLaunchPlan {
    pub run_id: String,
    pub plan: LaunchPlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStarted {
    pub stream_key: String,
    pub plugin_id: String,
    pub op: String,
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub stream_key: String,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnded {
    pub stream_key: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Up,
    Down,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    pub op: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStopRequest {
    pub stream_key: String,
}
