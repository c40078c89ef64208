//! Listens on a port, then exits with a failure after a delay.
//!
//! `crash-after --port <p> --after-ms <ms> [--code <n>]`

use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "crash-after")]
struct Args {
    #[arg(long, default_value_t = 0)]
    port: u16,
    #[arg(long, default_value_t = 1000)]
    after_ms: u64,
    #[arg(long, default_value_t = 1)]
    code: i32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    eprintln!("crash-after listening on {}", listener.local_addr()?);

    let accept = async {
        loop {
            if listener.accept().await.is_err() {
                break;
            }
        }
    };
    tokio::select! {
        _ = accept => {}
        _ = tokio::time::sleep(Duration::from_millis(args.after_ms)) => {}
    }
    eprintln!("crash-after giving up with code {}", args.code);
    std::process::exit(args.code);
}
