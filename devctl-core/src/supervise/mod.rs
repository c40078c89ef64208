//! # Supervisor
//!
//! Brings the services of a launch plan up, gates on their readiness and
//! tears them down again. Each service leads its own process group so that
//! stopping it also stops whatever it forked.
//!
//! Two launch modes exist. In direct mode the supervisor spawns the command
//! itself with its output appended to log files. In wrapper mode it spawns
//! the control-plane binary's `__wrap-service` subcommand, which supervises
//! the command and leaves an exit record behind.

pub mod readiness;
pub mod wrapper;

pub use readiness::wait_ready;
pub use wrapper::{parse_env_pair, run_wrapped, WrapServiceOptions, WRAP_SUBCOMMAND};

use crate::engine::{LaunchPlan, ServiceSpec};
use crate::error::{DevctlError, Result};
use crate::process::{process_alive, signal_group, terminate_group, wait_dead, KILL_GRACE};
use crate::runtime::OpContext;
use crate::state::{logs_dir, sanitize_env, ServiceRecord, State};
use chrono::{Local, Utc};
use log::{debug, error, info, warn};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use wrapper::open_log;

const WRAPPER_START_TIMEOUT: Duration = Duration::from_secs(2);
const WRAPPER_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub repo_root: PathBuf,
    pub shutdown_timeout: Duration,
    pub ready_timeout: Duration,
    /// Control-plane binary to use as service wrapper. `None` is direct mode.
    pub wrapper_exe: Option<PathBuf>,
}

impl SupervisorOptions {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            shutdown_timeout: Duration::from_secs(3),
            ready_timeout: Duration::from_secs(30),
            wrapper_exe: None,
        }
    }
}

/// A supervised process ended and was reaped by us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceExit {
    pub service: String,
    pub pid: i32,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

pub struct Supervisor {
    options: SupervisorOptions,
    exits: Option<mpsc::UnboundedSender<ServiceExit>>,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Result<Self> {
        if options.repo_root.as_os_str().is_empty() {
            return Err(DevctlError::Config("supervisor needs a repo root".into()));
        }
        Ok(Self {
            options,
            exits: None,
        })
    }

    /// Reports every exit the supervisor observes while it is alive.
    pub fn with_exit_observer(mut self, tx: mpsc::UnboundedSender<ServiceExit>) -> Self {
        self.exits = Some(tx);
        self
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Launches every service in plan order, then waits for each declared
    /// health check in plan order.
    ///
    /// # Returns
    ///
    /// * `Ok(State)` with one record per service once all are ready.
    /// * `Err` on the first launch or readiness failure. Everything started
    ///   so far has been stopped by then.
    pub async fn start(&self, ctx: &OpContext, plan: &LaunchPlan) -> Result<State> {
        let logs = logs_dir(&self.options.repo_root);
        std::fs::create_dir_all(&logs)?;

        let mut records = Vec::with_capacity(plan.services.len());
        for svc in &plan.services {
            let launched = match ctx.err() {
                Some(err) => Err(err),
                None => self.launch(svc, &logs).await,
            };
            match launched {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    error!("service {} failed to start: {}", svc.name, e);
                    self.rollback(records).await;
                    return Err(e);
                }
            }
        }

        let state = State::new(self.options.repo_root.display().to_string(), records);
        for svc in &plan.services {
            let health = match &svc.health {
                Some(h) => h,
                None => continue,
            };
            let outcome = match health.probe(&svc.name) {
                Ok(probe) => {
                    let timeout = health.timeout().unwrap_or(self.options.ready_timeout);
                    wait_ready(ctx, &svc.name, &probe, timeout).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                error!("service {} not ready: {}", svc.name, e);
                self.rollback(state.services).await;
                return Err(e);
            }
        }
        Ok(state)
    }

    async fn rollback(&self, records: Vec<ServiceRecord>) {
        if records.is_empty() {
            return;
        }
        let partial = State::new(self.options.repo_root.display().to_string(), records);
        if let Err(e) = self.stop(&partial).await {
            warn!("cleanup after failed start: {}", e);
        }
    }

    /// Stops every recorded service, best effort.
    ///
    /// Already dead services are skipped. Returns the last failure seen.
    pub async fn stop(&self, state: &State) -> Result<()> {
        let mut last_err = None;
        for rec in &state.services {
            if let Err(e) = self.stop_one(rec).await {
                error!("{}", e);
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn stop_one(&self, rec: &ServiceRecord) -> Result<()> {
        let mut stopped = true;
        if process_alive(rec.pid) {
            info!("stopping service {} (pid {})", rec.name, rec.pid);
            stopped = terminate_group(rec.pid, self.options.shutdown_timeout)
                .await
                .map_err(|e| DevctlError::service(&rec.name, format!("signal: {}", e)))?;
        } else {
            debug!("service {} (pid {}) already gone", rec.name, rec.pid);
        }
        // A wrapped child outlives a wrapper killed with SIGKILL.
        if let Some(child) = rec.child_pid.filter(|p| process_alive(*p)) {
            warn!("service {}: killing orphaned child group {}", rec.name, child);
            let _ = signal_group(child, libc::SIGKILL);
            stopped &= wait_dead(child, KILL_GRACE).await;
        }
        if !stopped {
            return Err(DevctlError::service(&rec.name, "failed to stop service"));
        }
        Ok(())
    }

    fn resolve_cwd(&self, svc: &ServiceSpec) -> PathBuf {
        let cwd = Path::new(&svc.cwd);
        if svc.cwd.is_empty() {
            self.options.repo_root.clone()
        } else if cwd.is_absolute() {
            cwd.to_path_buf()
        } else {
            self.options.repo_root.join(cwd)
        }
    }

    async fn launch(&self, svc: &ServiceSpec, logs: &Path) -> Result<ServiceRecord> {
        if svc.command.is_empty() {
            return Err(DevctlError::service(&svc.name, "missing command"));
        }
        if let Some(health) = &svc.health {
            health.probe(&svc.name)?;
        }
        let cwd = self.resolve_cwd(svc);
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let base = logs.join(format!("{}-{}", svc.name, stamp));
        let stdout_log = with_suffix(&base, ".stdout.log");
        let stderr_log = with_suffix(&base, ".stderr.log");

        let (pid, child_pid, exit_info) = match &self.options.wrapper_exe {
            None => (self.spawn_direct(svc, &cwd, &stdout_log, &stderr_log)?, None, None),
            Some(exe) => {
                let exit_info = with_suffix(&base, ".exit.json");
                let ready_file = with_suffix(&base, ".ready");
                let opts = WrapServiceOptions {
                    service: svc.name.clone(),
                    cwd: cwd.clone(),
                    stdout_log: stdout_log.clone(),
                    stderr_log: stderr_log.clone(),
                    exit_info: exit_info.clone(),
                    ready_file: ready_file.clone(),
                    env: svc.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    tail_lines: 0,
                    command: svc.command.clone(),
                };
                let (pid, child) = self.spawn_wrapped(exe, &opts).await?;
                (pid, Some(child), Some(exit_info))
            }
        };

        let health = svc.health.as_ref();
        Ok(ServiceRecord {
            name: svc.name.clone(),
            pid,
            child_pid,
            command: svc.command.clone(),
            cwd: cwd.display().to_string(),
            env: sanitize_env(&svc.env),
            stdout_log,
            stderr_log,
            exit_info,
            started_at: Utc::now(),
            health_type: health.map(|h| h.kind.clone()),
            health_address: health.map(|h| h.address.clone()).filter(|a| !a.is_empty()),
            health_url: health.map(|h| h.url.clone()).filter(|u| !u.is_empty()),
        })
    }

    fn spawn_direct(
        &self,
        svc: &ServiceSpec,
        cwd: &Path,
        stdout_log: &Path,
        stderr_log: &Path,
    ) -> Result<i32> {
        let stdout = open_log(stdout_log)?;
        let stderr = open_log(stderr_log)?;
        let child = Command::new(&svc.command[0])
            .args(&svc.command[1..])
            .envs(&svc.env)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .spawn()
            .map_err(|e| DevctlError::service(&svc.name, format!("spawn {}: {}", svc.command[0], e)))?;
        let pid = child.id().map(|p| p as i32).unwrap_or(0);
        info!("service started: {} (pid {}) {:?}", svc.name, pid, svc.command);
        self.reap(svc.name.clone(), pid, child);
        Ok(pid)
    }

    /// Starts the wrapper and waits for its ready file.
    ///
    /// Returns the wrapper pid and the pid of the child it started.
    async fn spawn_wrapped(&self, exe: &Path, opts: &WrapServiceOptions) -> Result<(i32, i32)> {
        let stderr = open_log(&opts.stderr_log)?;
        let mut child = Command::new(exe)
            .args(opts.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .spawn()
            .map_err(|e| DevctlError::service(&opts.service, format!("spawn wrapper: {}", e)))?;
        let pid = child.id().map(|p| p as i32).unwrap_or(0);

        let deadline = Instant::now() + WRAPPER_START_TIMEOUT;
        let child_pid = loop {
            if let Some(inner) = read_ready_file(&opts.ready_file) {
                break inner;
            }
            if let Ok(Some(status)) = child.try_wait() {
                return Err(DevctlError::service(
                    &opts.service,
                    format!("wrapper exited early: {}", status),
                ));
            }
            if Instant::now() >= deadline {
                let _ = terminate_group(pid, Duration::from_secs(1)).await;
                let _ = child.try_wait();
                return Err(DevctlError::service(
                    &opts.service,
                    "wrapper did not report child start",
                ));
            }
            sleep(WRAPPER_POLL).await;
        };
        info!(
            "service started: {} (wrapper pid {}, child pid {})",
            opts.service, pid, child_pid
        );
        self.reap(opts.service.clone(), pid, child);
        Ok((pid, child_pid))
    }

    /// Waits for `child` in the background so it never lingers as a zombie.
    fn reap(&self, service: String, pid: i32, mut child: Child) {
        let exits = self.exits.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let (exit_code, signal) = match &status {
                Ok(s) => (s.code(), s.signal()),
                Err(_) => (None, None),
            };
            debug!("service {} (pid {}) exited: {:?}", service, pid, status);
            if let Some(tx) = exits {
                let _ = tx.send(ServiceExit {
                    service,
                    pid,
                    exit_code,
                    signal,
                });
            }
        });
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn read_ready_file(path: &Path) -> Option<i32> {
    let text = std::fs::read_to_string(path).ok()?;
    if !text.ends_with('\n') {
        return None;
    }
    text.trim().parse().ok()
}
