//! Service wrapper run through the hidden `__wrap-service` subcommand.
//!
//! The wrapper owns the service's log files, starts the real command in a
//! process group of its own, reports the child pid through a ready file and
//! leaves an [`ExitInfo`] behind when the child is gone.

use crate::error::{DevctlError, Result};
use crate::process::signal_group;
use crate::state::{tail_lines, write_exit_info, ExitInfo, DEFAULT_TAIL_BYTES};
use chrono::Utc;
use log::debug;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};

pub const WRAP_SUBCOMMAND: &str = "__wrap-service";
pub const DEFAULT_WRAPPER_TAIL: usize = 25;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WrapServiceOptions {
    pub service: String,
    pub cwd: PathBuf,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    pub exit_info: PathBuf,
    pub ready_file: PathBuf,
    pub env: Vec<(String, String)>,
    pub tail_lines: usize,
    pub command: Vec<String>,
}

impl WrapServiceOptions {
    /// Command-line arguments that make the control-plane binary run this
    /// wrapper, subcommand included.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            WRAP_SUBCOMMAND.into(),
            "--service".into(),
            self.service.clone().into(),
            "--cwd".into(),
            self.cwd.clone().into(),
            "--stdout-log".into(),
            self.stdout_log.clone().into(),
            "--stderr-log".into(),
            self.stderr_log.clone().into(),
            "--exit-info".into(),
            self.exit_info.clone().into(),
            "--ready-file".into(),
            self.ready_file.clone().into(),
        ];
        for (k, v) in &self.env {
            args.push("--env".into());
            args.push(format!("{}={}", k, v).into());
        }
        if self.tail_lines > 0 {
            args.push("--tail-lines".into());
            args.push(self.tail_lines.to_string().into());
        }
        args.push("--".into());
        args.extend(self.command.iter().map(OsString::from));
        args
    }
}

/// Splits a `KEY=VALUE` flag. The value may itself contain `=`.
pub fn parse_env_pair(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(DevctlError::Config(format!("invalid --env {:?}, want KEY=VALUE", raw))),
    }
}

pub(crate) fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
}

pub fn signal_name(sig: i32) -> String {
    let name = match sig {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGABRT => "SIGABRT",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGTERM => "SIGTERM",
        other => return format!("signal {}", other),
    };
    name.to_string()
}

/// Runs the wrapped service to completion.
///
/// # Returns
///
/// The exit code the wrapper should exit with: the child's own code, or
/// `128 + signal` when it was killed.
pub async fn run_wrapped(opts: WrapServiceOptions) -> Result<i32> {
    let started_at = Utc::now();
    let tail = if opts.tail_lines == 0 { DEFAULT_WRAPPER_TAIL } else { opts.tail_lines };
    let program = opts.command.first().cloned().ok_or_else(|| {
        DevctlError::service(&opts.service, "missing command")
    })?;

    // Must be in place before the ready file exists: a stop may follow it
    // at once and has to reach the child's group.
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut hup = signal(SignalKind::hangup())?;

    let stdout = open_log(&opts.stdout_log)?;
    let stderr = open_log(&opts.stderr_log)?;
    let mut cmd = Command::new(&program);
    cmd.args(&opts.command[1..])
        .envs(opts.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .process_group(0);
    if !opts.cwd.as_os_str().is_empty() {
        cmd.current_dir(&opts.cwd);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let info = ExitInfo {
                service: opts.service.clone(),
                pid: 0,
                started_at,
                exited_at: Utc::now(),
                exit_code: None,
                signal: None,
                error: Some(format!("spawn {}: {}", program, e)),
                stderr_tail: Vec::new(),
                stdout_tail: Vec::new(),
            };
            write_exit_info(&opts.exit_info, &info)?;
            return Err(DevctlError::service(&opts.service, format!("spawn {}: {}", program, e)));
        }
    };
    let pid = child.id().map(|p| p as i32).unwrap_or(0);
    std::fs::write(&opts.ready_file, format!("{}\n", pid))?;

    let status = loop {
        let forward = tokio::select! {
            status = child.wait() => break status,
            _ = term.recv() => libc::SIGTERM,
            _ = int.recv() => libc::SIGINT,
            _ = hup.recv() => libc::SIGHUP,
        };
        debug!("forwarding {} to {}", signal_name(forward), pid);
        let _ = signal_group(pid, forward);
    };

    let (exit_code, signo, error) = match &status {
        Ok(status) => (status.code(), status.signal(), None),
        Err(e) => (None, None, Some(e.to_string())),
    };
    let info = ExitInfo {
        service: opts.service.clone(),
        pid,
        started_at,
        exited_at: Utc::now(),
        exit_code,
        signal: signo.map(signal_name),
        error,
        stderr_tail: tail_lines(&opts.stderr_log, tail, DEFAULT_TAIL_BYTES).unwrap_or_default(),
        stdout_tail: tail_lines(&opts.stdout_log, tail, DEFAULT_TAIL_BYTES).unwrap_or_default(),
    };
    write_exit_info(&opts.exit_info, &info)?;

    Ok(match (exit_code, signo) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::read_exit_info;

    fn opts(dir: &Path, command: &[&str]) -> WrapServiceOptions {
        WrapServiceOptions {
            service: "job".into(),
            cwd: dir.to_path_buf(),
            stdout_log: dir.join("job.stdout.log"),
            stderr_log: dir.join("job.stderr.log"),
            exit_info: dir.join("job.exit.json"),
            ready_file: dir.join("job.ready"),
            env: vec![("GREETING".into(), "a=b".into())],
            tail_lines: 2,
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn env_pairs_split_on_first_equals() {
        assert_eq!(
            parse_env_pair("URL=postgres://u@h/db?x=1").unwrap(),
            ("URL".into(), "postgres://u@h/db?x=1".into())
        );
        assert!(parse_env_pair("=oops").is_err());
        assert!(parse_env_pair("NOVALUE").is_err());
    }

    #[test]
    fn args_end_with_command() {
        let dir = tempfile::tempdir().unwrap();
        let args = opts(dir.path(), &["sleep", "1"]).to_args();
        assert_eq!(args[0], WRAP_SUBCOMMAND);
        let n = args.len();
        assert_eq!(args[n - 3], "--");
        assert_eq!(args[n - 1], "1");
        assert!(args.contains(&OsString::from("GREETING=a=b")));
    }

    #[tokio::test]
    async fn records_exit_code_and_tails() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts(
            dir.path(),
            &["sh", "-c", "echo one; echo $GREETING; echo e1 >&2; echo e2 >&2; echo e3 >&2; exit 3"],
        );
        let code = run_wrapped(o.clone()).await.unwrap();
        assert_eq!(code, 3);

        let ready = std::fs::read_to_string(&o.ready_file).unwrap();
        assert!(ready.ends_with('\n'));
        let info = read_exit_info(&o.exit_info).unwrap();
        assert_eq!(info.exit_code, Some(3));
        assert!(!info.success());
        assert_eq!(info.stderr_tail, ["e2", "e3"]);
        assert_eq!(info.stdout_tail, ["one", "a=b"]);
        assert_eq!(info.pid.to_string(), ready.trim());
    }

    #[tokio::test]
    async fn spawn_failure_leaves_exit_info() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts(dir.path(), &["/definitely/not/here"]);
        assert!(run_wrapped(o.clone()).await.is_err());
        let info = read_exit_info(&o.exit_info).unwrap();
        assert!(info.error.unwrap().contains("/definitely/not/here"));
    }
}
