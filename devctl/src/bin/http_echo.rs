//! Tiny HTTP service used as a supervised process in tests.

use axum::{extract::Path, routing::get, Json, Router};
use clap::Parser;
use log::info;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "http-echo")]
struct Args {
    #[arg(long, default_value_t = 0)]
    port: u16,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "pid": std::process::id() }))
}

async fn echo(Path(text): Path<String>) -> Json<Value> {
    let greeting = std::env::var("ECHO_GREETING").unwrap_or_default();
    Json(json!({ "echo": text, "greeting": greeting }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let app = Router::new()
        .route("/health", get(health))
        .route("/echo/:text", get(echo));

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    info!("http-echo listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
