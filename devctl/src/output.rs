use devctl_core::actions::RunReport;
use devctl_core::engine::LaunchPlan;
use devctl_core::state::{ServiceStatus, State};
use plugin_protocol::Event;

pub fn print_run(report: &RunReport) {
    for w in &report.validate.warnings {
        eprintln!("WARN: {}: {}", w.code, w.message);
    }
    match &report.state {
        Some(state) => {
            println!("{:<20} | {:<8} | {}", "SERVICE", "PID", "STDOUT LOG");
            println!("{:-<20}-+-{:-<8}-+-{:-<30}", "", "", "");
            for rec in &state.services {
                println!("{:<20} | {:<8} | {}", rec.name, rec.pid, rec.stdout_log.display());
            }
        }
        None => {
            println!("dry run, nothing started");
            for svc in &report.plan.services {
                println!("  {} -> {}", svc.name, svc.command.join(" "));
            }
        }
    }
}

pub fn print_plan(plan: &LaunchPlan) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(plan)?);
    Ok(())
}

pub fn print_status(state: &State, services: &[ServiceStatus]) {
    println!("repo: {} (up since {})", state.repo_root, state.created_at);
    println!("{:<20} | {:<8} | {:<6}", "SERVICE", "PID", "ALIVE");
    println!("{:-<20}-+-{:-<8}-+-{:-<6}", "", "", "");
    for svc in services {
        println!("{:<20} | {:<8} | {:<6}", svc.name, svc.pid, if svc.alive { "yes" } else { "no" });
        if let Some(exit) = &svc.exit {
            match (&exit.exit_code, &exit.signal, &exit.error) {
                (_, _, Some(err)) => println!("    failed: {}", err),
                (_, Some(sig), _) => println!("    killed by {}", sig),
                (Some(code), _, _) => println!("    exited with {}", code),
                _ => {}
            }
            for line in &exit.stderr_tail {
                println!("    | {}", line);
            }
        }
        for line in &svc.stderr_tail {
            println!("    | {}", line);
        }
    }
}

pub fn print_event(event: &Event) {
    let level = event.level.as_deref().unwrap_or("info");
    match &event.message {
        Some(msg) => println!("[{}] {}", level, msg),
        None => println!("[{}] {}", level, event.event),
    }
}
