use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Local development control plane.
#[derive(Parser, Debug)]
#[command(name = "devctl")]
#[command(about = "Bring a repository's development services up and down through plugins", long_about = None)]
pub struct Cli {
    /// Repository root.
    #[arg(long, global = true, default_value = ".")]
    pub repo_root: PathBuf,

    /// Plugin config file (default: <repo-root>/.devctl.yaml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Per-phase timeout in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline and start the planned services.
    Up {
        /// Plan only, start nothing.
        #[arg(long)]
        dry_run: bool,

        /// Fail on service name collisions between plugins.
        #[arg(long)]
        strict: bool,

        /// Run every service under the devctl service wrapper.
        #[arg(long)]
        wrap: bool,
    },
    /// Stop the services recorded in the state file.
    Down,
    /// Print the launch plan without starting anything.
    Plan {
        #[arg(long)]
        strict: bool,
    },
    /// Show recorded services and whether they are alive.
    Status {
        /// Stderr lines to show for dead services.
        #[arg(long, default_value_t = 20)]
        tail_lines: usize,

        #[arg(long)]
        json: bool,
    },
    /// Follow a plugin stream until it ends or Ctrl-C.
    Stream {
        /// Stream op, e.g. `logs.follow`.
        op: String,

        /// Plugin id (default: the first plugin declaring the op).
        #[arg(long)]
        plugin: Option<String>,

        /// JSON input for the op.
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Run a command contributed by a plugin.
    RunCommand {
        name: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Supervise one service process (used by `up --wrap`).
    #[command(name = "__wrap-service", hide = true)]
    WrapService(WrapArgs),
}

#[derive(Args, Debug)]
pub struct WrapArgs {
    #[arg(long)]
    pub service: String,
    #[arg(long)]
    pub cwd: PathBuf,
    #[arg(long)]
    pub stdout_log: PathBuf,
    #[arg(long)]
    pub stderr_log: PathBuf,
    #[arg(long)]
    pub exit_info: PathBuf,
    #[arg(long)]
    pub ready_file: PathBuf,
    /// KEY=VALUE, repeatable.
    #[arg(long = "env")]
    pub env: Vec<String>,
    #[arg(long, default_value_t = 0)]
    pub tail_lines: usize,
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}
