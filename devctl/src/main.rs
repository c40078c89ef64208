mod args;
mod output;

use anyhow::{bail, Context, Result};
use args::{Cli, Commands, WrapArgs};
use clap::Parser;
use devctl_core::actions::{Orchestrator, OrchestratorOptions};
use devctl_core::runtime::OpContext;
use devctl_core::supervise::{parse_env_pair, run_wrapped, WrapServiceOptions};
use log::{info, warn};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The wrapper's stderr is the service's log: keep it free of our logging.
    if let Commands::WrapService(wrap) = cli.command {
        std::process::exit(wrap_service(wrap).await);
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let repo_root = std::fs::canonicalize(&cli.repo_root)
        .with_context(|| format!("repo root {}", cli.repo_root.display()))?;
    let mut options = OrchestratorOptions::new(repo_root);
    options.config_path = cli.config.clone();
    options.timeout = Duration::from_secs(cli.timeout);

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                token.cancel();
            }
        }
    });
    let ctx = OpContext::with_token(token);

    match cli.command {
        Commands::Up {
            dry_run,
            strict,
            wrap,
        } => {
            options.dry_run = dry_run;
            options.strict = strict;
            if wrap {
                options.wrapper_exe = Some(std::env::current_exe().context("locate devctl binary")?);
            }
            let orch = Orchestrator::new(options);
            let report = orch.up(&ctx).await?;
            output::print_run(&report);
        }
        Commands::Down => {
            let orch = Orchestrator::new(options);
            if orch.down(&ctx).await? {
                println!("services stopped");
            } else {
                println!("nothing to stop");
            }
        }
        Commands::Plan { strict } => {
            options.strict = strict;
            let report = Orchestrator::new(options).plan(&ctx).await?;
            output::print_plan(&report.plan)?;
        }
        Commands::Status { tail_lines, json } => {
            let orch = Orchestrator::new(options);
            match orch.status(tail_lines)? {
                Some((_, services)) if json => {
                    println!("{}", serde_json::to_string_pretty(&services)?)
                }
                Some((state, services)) => output::print_status(&state, &services),
                None => println!("no services are up"),
            }
        }
        Commands::Stream { op, plugin, input } => {
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input is not JSON")?;
            stream(&ctx, Orchestrator::new(options), &op, plugin.as_deref(), input).await?;
        }
        Commands::RunCommand { name, args } => {
            let code = Orchestrator::new(options)
                .run_command(&ctx, &name, &args)
                .await?;
            info!("command {} exited {}", name, code);
        }
        Commands::WrapService(_) => {}
    }
    Ok(())
}

async fn stream(
    ctx: &OpContext,
    orch: Orchestrator,
    op: &str,
    plugin: Option<&str>,
    input: serde_json::Value,
) -> Result<()> {
    let session = orch.open(false).await?;
    let client = session
        .clients
        .iter()
        .find(|c| match plugin {
            Some(id) => c.id() == id,
            None => c.supports_stream(op),
        })
        .cloned();
    let res = async {
        let client = match client {
            Some(c) => c,
            None => bail!("no plugin provides stream {:?}", op),
        };
        let (stream_id, mut events) = client.start_stream(ctx, op, input).await?;
        info!("following {} {} ({})", client.id(), op, stream_id);
        while let Some(event) = events.recv().await {
            if event.is_end() {
                if event.ok == Some(false) {
                    bail!("stream {} ended with failure", stream_id);
                }
                break;
            }
            output::print_event(&event);
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;
    if let Err(e) = session.close().await {
        warn!("closing plugins: {}", e);
    }
    res
}

async fn wrap_service(wrap: WrapArgs) -> i32 {
    let env = match wrap.env.iter().map(|e| parse_env_pair(e)).collect::<Result<Vec<_>, _>>() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("devctl wrapper: {}", e);
            return 2;
        }
    };
    let opts = WrapServiceOptions {
        service: wrap.service,
        cwd: wrap.cwd,
        stdout_log: wrap.stdout_log,
        stderr_log: wrap.stderr_log,
        exit_info: wrap.exit_info,
        ready_file: wrap.ready_file,
        env,
        tail_lines: wrap.tail_lines,
        command: wrap.command,
    };
    match run_wrapped(opts).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("devctl wrapper: {}", e);
            127
        }
    }
}
