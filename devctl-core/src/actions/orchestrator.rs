use crate::bus::events::{
    Phase, PipelineLaunchPlan, PipelinePhaseFinished, PipelinePhaseStarted, PipelineRunFinished,
    PipelineRunStarted, PipelineStepsResult, PipelineValidateResult, RunKind,
    ServiceExitObserved, StateSnapshot, PIPELINE_BUILD_RESULT, PIPELINE_LAUNCH_PLAN,
    PIPELINE_PHASE_FINISHED, PIPELINE_PHASE_STARTED, PIPELINE_PREPARE_RESULT,
    PIPELINE_RUN_FINISHED, PIPELINE_RUN_STARTED, PIPELINE_VALIDATE_RESULT,
    SERVICE_EXIT_OBSERVED, STATE_SNAPSHOT,
};
use crate::bus::{topics, EventBus};
use crate::engine::{
    BuildResult, CommandRegistry, LaunchPlan, Pipeline, PipelineOptions, PrepareResult,
    ValidateResult,
};
use crate::error::{DevctlError, Result};
use crate::patch::Config;
use crate::repository::{close_clients, Repository, RepositoryOptions};
use crate::runtime::{Client, Factory, FactoryOptions, OpContext};
use crate::state::{self, service_status, tail_lines, ServiceStatus, State, DEFAULT_TAIL_BYTES, DEFAULT_TAIL_LINES};
use crate::supervise::wrapper::signal_name;
use crate::supervise::{ServiceExit, Supervisor, SupervisorOptions};
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub repo_root: PathBuf,
    /// Defaults to `<repo_root>/.devctl.yaml`.
    pub config_path: Option<PathBuf>,
    /// Forces strict plan merging regardless of the config file.
    pub strict: bool,
    /// Runs the pipeline without starting services.
    pub dry_run: bool,
    /// Budget of each phase.
    pub timeout: Duration,
    /// Enables wrapper mode in the supervisor.
    pub wrapper_exe: Option<PathBuf>,
    pub scan_plugins_dir: bool,
    pub factory: FactoryOptions,
}

impl OrchestratorOptions {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            config_path: None,
            strict: false,
            dry_run: false,
            timeout: Duration::from_secs(30),
            wrapper_exe: None,
            scan_plugins_dir: true,
            factory: FactoryOptions::default(),
        }
    }
}

/// What one pipeline run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub run_id: String,
    pub config: Config,
    pub build: BuildResult,
    pub prepare: PrepareResult,
    pub validate: ValidateResult,
    pub plan: LaunchPlan,
    /// Set when services were started.
    pub state: Option<State>,
}

/// Plugins of a repository, started and ready for calls.
pub struct Session {
    pub repository: Repository,
    pub clients: Vec<Arc<dyn Client>>,
    pub strict: bool,
}

impl Session {
    pub fn pipeline(&self, dry_run: bool) -> Pipeline {
        Pipeline::new(
            self.clients.clone(),
            PipelineOptions {
                strict: self.strict,
                dry_run,
            },
        )
    }

    pub async fn close(&self) -> Result<()> {
        close_clients(&self.clients).await
    }
}

/// Drives `up`, `down`, `plan` and `status` for one repository and
/// reports progress on the bus when one is attached.
#[derive(Clone)]
pub struct Orchestrator {
    options: OrchestratorOptions,
    bus: Option<EventBus>,
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions) -> Self {
        Self { options, bus: None }
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn repo_root(&self) -> &Path {
        &self.options.repo_root
    }

    async fn emit<T: Serialize>(&self, kind: &str, payload: &T) {
        if let Some(bus) = &self.bus {
            bus.emit(topics::DOMAIN, kind, payload).await;
        }
    }

    fn supervisor(&self) -> Result<Supervisor> {
        let mut opts = SupervisorOptions::new(self.options.repo_root.clone());
        opts.wrapper_exe = self.options.wrapper_exe.clone();
        Supervisor::new(opts)
    }

    /// Loads the repository and starts its plugins.
    pub async fn open(&self, dry_run: bool) -> Result<Session> {
        let repository = Repository::load(RepositoryOptions {
            repo_root: self.options.repo_root.clone(),
            config_path: self.options.config_path.clone(),
            cwd: None,
            dry_run,
            scan_plugins_dir: self.options.scan_plugins_dir,
        })?;
        let factory = Factory::new(self.options.factory.clone());
        let clients = repository.start_clients(&factory).await?;
        let strict = self.options.strict || repository.is_strict();
        Ok(Session {
            repository,
            clients,
            strict,
        })
    }

    /// Runs the full pipeline and supervises the resulting plan.
    ///
    /// Refuses to run over an existing state file unless dry-running.
    pub async fn up(&self, ctx: &OpContext) -> Result<RunReport> {
        let dry_run = self.options.dry_run;
        if !dry_run && state::exists(&self.options.repo_root) {
            return Err(DevctlError::State(
                "services are already up, run down first".into(),
            ));
        }
        let kind = if dry_run { RunKind::Plan } else { RunKind::Up };
        self.tracked(kind, |run_id| self.run_up(ctx, run_id, !dry_run))
            .await
    }

    /// Runs the pipeline up to the launch plan. Nothing is started.
    pub async fn plan(&self, ctx: &OpContext) -> Result<RunReport> {
        self.tracked(RunKind::Plan, |run_id| self.run_up(ctx, run_id, false))
            .await
    }

    /// Stops what the state file records and removes it.
    ///
    /// Returns `false` when there was nothing to stop.
    pub async fn down(&self, ctx: &OpContext) -> Result<bool> {
        self.tracked(RunKind::Down, |run_id| self.run_down(ctx, run_id))
            .await
    }

    /// Current status of every recorded service, `None` when nothing is up.
    pub fn status(&self, tail: usize) -> Result<Option<(State, Vec<ServiceStatus>)>> {
        if !state::exists(&self.options.repo_root) {
            return Ok(None);
        }
        let state = state::load(&self.options.repo_root)?;
        let services = service_status(&state, tail);
        Ok(Some((state, services)))
    }

    /// Publishes the current state as `state.snapshot`.
    pub async fn publish_snapshot(&self) {
        let snapshot = match self.status(DEFAULT_TAIL_LINES) {
            Ok(Some((_, services))) => StateSnapshot {
                repo_root: self.options.repo_root.display().to_string(),
                at: Utc::now(),
                exists: true,
                services,
            },
            Ok(None) => StateSnapshot {
                repo_root: self.options.repo_root.display().to_string(),
                at: Utc::now(),
                exists: false,
                services: Vec::new(),
            },
            Err(e) => {
                warn!("state snapshot: {}", e);
                return;
            }
        };
        self.emit(STATE_SNAPSHOT, &snapshot).await;
    }

    /// Starts plugins, mutates the config and runs plugin command `name`.
    pub async fn run_command(&self, ctx: &OpContext, name: &str, argv: &[String]) -> Result<i32> {
        let session = self.open(false).await?;
        let res = async {
            let registry = CommandRegistry::collect(&session.clients);
            let config = session
                .pipeline(false)
                .mutate_config(&ctx.with_timeout(self.options.timeout), Config::new())
                .await?;
            registry.run(ctx, name, argv, &config).await
        }
        .await;
        let closed = session.close().await;
        let code = res?;
        closed?;
        Ok(code)
    }

    /// Wraps a run with `pipeline.run.started` and `pipeline.run.finished`.
    async fn tracked<T, F, Fut>(&self, kind: RunKind, body: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        info!("{:?} run {} in {}", kind, run_id, self.options.repo_root.display());
        self.emit(
            PIPELINE_RUN_STARTED,
            &PipelineRunStarted {
                run_id: run_id.clone(),
                kind,
                repo_root: self.options.repo_root.display().to_string(),
                at: Utc::now(),
            },
        )
        .await;

        let res = body(run_id.clone()).await;
        self.emit(
            PIPELINE_RUN_FINISHED,
            &PipelineRunFinished {
                run_id,
                kind,
                ok: res.is_ok(),
                error: res.as_ref().err().map(|e| e.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        )
        .await;
        res
    }

    /// Runs one phase under the phase budget.
    ///
    /// The body gets the phase scope and is expected to honour it, so work
    /// that needs cleanup is never dropped halfway.
    async fn phase<T, F, Fut>(&self, ctx: &OpContext, run_id: &str, phase: Phase, body: F) -> Result<T>
    where
        F: FnOnce(OpContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.emit(
            PIPELINE_PHASE_STARTED,
            &PipelinePhaseStarted {
                run_id: run_id.to_string(),
                phase,
                at: Utc::now(),
            },
        )
        .await;
        let started = Instant::now();
        let res = body(ctx.with_timeout(self.options.timeout)).await;
        if let Err(e) = &res {
            warn!("phase {:?} failed: {}", phase, e);
        }
        self.emit(
            PIPELINE_PHASE_FINISHED,
            &PipelinePhaseFinished {
                run_id: run_id.to_string(),
                phase,
                ok: res.is_ok(),
                error: res.as_ref().err().map(|e| e.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        )
        .await;
        res
    }

    async fn run_up(&self, ctx: &OpContext, run_id: String, supervise: bool) -> Result<RunReport> {
        let session = self.open(!supervise).await?;
        let res = self.run_phases(ctx, &run_id, &session, supervise).await;
        if let Err(e) = session.close().await {
            warn!("closing plugins: {}", e);
        }
        let report = res?;
        if report.state.is_some() {
            self.publish_snapshot().await;
        }
        Ok(report)
    }

    async fn run_phases(
        &self,
        ctx: &OpContext,
        run_id: &str,
        session: &Session,
        supervise: bool,
    ) -> Result<RunReport> {
        let pipeline = session.pipeline(!supervise);
        let pipeline = &pipeline;

        let config = self
            .phase(ctx, run_id, Phase::MutateConfig, |scope| async move {
                pipeline.mutate_config(&scope, Config::new()).await
            })
            .await?;
        let config = &config;

        let build = self
            .phase(ctx, run_id, Phase::Build, |scope| async move {
                pipeline.build(&scope, config).await
            })
            .await?;
        self.emit(
            PIPELINE_BUILD_RESULT,
            &PipelineStepsResult {
                run_id: run_id.to_string(),
                result: build.clone(),
            },
        )
        .await;

        let prepare = self
            .phase(ctx, run_id, Phase::Prepare, |scope| async move {
                pipeline.prepare(&scope, config).await
            })
            .await?;
        self.emit(
            PIPELINE_PREPARE_RESULT,
            &PipelineStepsResult {
                run_id: run_id.to_string(),
                result: prepare.clone(),
            },
        )
        .await;

        let validate = self
            .phase(ctx, run_id, Phase::Validate, |scope| async move {
                pipeline.validate(&scope, config).await
            })
            .await?;
        self.emit(
            PIPELINE_VALIDATE_RESULT,
            &PipelineValidateResult {
                run_id: run_id.to_string(),
                result: validate.clone(),
            },
        )
        .await;
        if !validate.valid {
            return Err(DevctlError::ValidationFailed);
        }

        let plan = self
            .phase(ctx, run_id, Phase::LaunchPlan, |scope| async move {
                pipeline.launch_plan(&scope, config).await
            })
            .await?;
        self.emit(
            PIPELINE_LAUNCH_PLAN,
            &PipelineLaunchPlan {
                run_id: run_id.to_string(),
                plan: plan.clone(),
            },
        )
        .await;

        let mut report = RunReport {
            run_id: run_id.to_string(),
            config: config.clone(),
            build,
            prepare,
            validate,
            plan,
            state: None,
        };
        if !supervise {
            return Ok(report);
        }

        let supervisor = self.observed(self.supervisor()?);
        let plan = &report.plan;
        let supervisor = &supervisor;
        let started = self
            .phase(ctx, run_id, Phase::Supervise, |scope| async move {
                supervisor.start(&scope, plan).await
            })
            .await?;

        let root = self.options.repo_root.as_path();
        let recorded = &started;
        let saved = self
            .phase(ctx, run_id, Phase::StateSave, |_| async move {
                state::save(root, recorded)
            })
            .await;
        if let Err(e) = saved {
            // Without a state file `down` could never find these services.
            warn!("state not saved, stopping services");
            if let Err(stop_err) = supervisor.stop(&started).await {
                warn!("stopping unsaved services: {}", stop_err);
            }
            return Err(e);
        }
        report.state = Some(started);
        Ok(report)
    }

    async fn run_down(&self, ctx: &OpContext, run_id: String) -> Result<bool> {
        let root = self.options.repo_root.as_path();
        if !state::exists(root) {
            info!("nothing to stop in {}", root.display());
            return Ok(false);
        }
        let st = state::load(root)?;
        let supervisor = self.supervisor()?;
        let supervisor = &supervisor;
        let st = &st;
        self.phase(ctx, &run_id, Phase::StopSupervise, |_| async move {
            supervisor.stop(st).await
        })
        .await?;
        self.phase(ctx, &run_id, Phase::RemoveState, |_| async move {
            state::remove(root)
        })
        .await?;
        self.publish_snapshot().await;
        Ok(true)
    }

    /// Forwards exits the supervisor observes as `service.exit.observed`.
    fn observed(&self, supervisor: Supervisor) -> Supervisor {
        let bus = match &self.bus {
            Some(bus) => bus.clone(),
            None => return supervisor,
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<ServiceExit>();
        let root = self.options.repo_root.clone();
        tokio::spawn(async move {
            while let Some(exit) = rx.recv().await {
                let stderr_tail = state::load(&root)
                    .ok()
                    .and_then(|st| {
                        st.service(&exit.service).map(|rec| {
                            tail_lines(&rec.stderr_log, DEFAULT_TAIL_LINES, DEFAULT_TAIL_BYTES)
                                .unwrap_or_default()
                        })
                    })
                    .unwrap_or_default();
                let payload = ServiceExitObserved {
                    service: exit.service,
                    pid: exit.pid,
                    exit_code: exit.exit_code,
                    signal: exit.signal.map(signal_name),
                    at: Utc::now(),
                    stderr_tail,
                };
                bus.emit(topics::DOMAIN, SERVICE_EXIT_OBSERVED, &payload).await;
            }
        });
        supervisor.with_exit_observer(tx)
    }
}
