//! Test plugin whose behaviour is picked by its first argument.
//!
//! | mode                | behaviour                                                  |
//! |---------------------|------------------------------------------------------------|
//! | `ok`                | answers every pipeline op with empty results and `ping`    |
//! | `pipeline`          | `config.mutate` sets `services.demo.port`                  |
//! | `http-service`      | plans one `http` service running `$HTTP_ECHO_BIN`          |
//! | `crash-service`     | plans one `crash` service running `$CRASH_AFTER_BIN`       |
//! | `set-x <id> <log>`  | `config.mutate` sets `x = <id>` and appends `<id>` to log  |
//! | `timeout`           | never answers `ping`                                       |
//! | `stream`            | `logs.follow` emits `hello`, `world`, then ends            |
//! | `command`           | provides command `hello`; argv `fail` exits 3              |
//! | `validate-fail`     | `validate.run` reports an error                            |
//! | `noisy`             | prints garbage before its handshake                        |
//! | `invalid-handshake` | announces protocol `v1`                                    |
//! | `garbage`           | answers `ping` with a line that is not JSON                |
//! | `rehandshake`       | answers `ping` with a second handshake                     |
//! | `die`               | exits with code 4 on `ping` without answering              |

use anyhow::{Context, Result};
use plugin_protocol::model::ops;
use plugin_protocol::{Capabilities, CommandSpec, Event, Handshake, PluginServer, Request, Response};
use serde_json::{json, Value};
use std::io::Write;

const PING: &str = "ping";
const LOGS_FOLLOW: &str = "logs.follow";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("ok");
    eprintln!("fixture plugin starting in {} mode", mode);

    let mut server = PluginServer::stdio();
    match mode {
        "noisy" => {
            let mut out = std::io::stdout();
            writeln!(out, "Compiling fixture v0.0.0")?;
            out.flush()?;
        }
        "invalid-handshake" => {
            let mut hs = handshake(mode);
            hs.protocol_version = "v1".into();
            server.handshake(hs).await?;
            // Stay alive until the host kills us.
            while server.next_request().await?.is_some() {}
            return Ok(());
        }
        _ => {}
    }
    server.handshake(handshake(mode)).await?;

    while let Some(req) = server.next_request().await? {
        eprintln!("{} {}", req.request_id, req.op);
        match (mode, req.op.as_str()) {
            ("timeout", PING) => continue,
            ("garbage", PING) => {
                let mut out = std::io::stdout();
                writeln!(out, "this is not json")?;
                out.flush()?;
            }
            ("rehandshake", PING) => server.handshake(handshake(mode)).await?,
            ("die", PING) => std::process::exit(4),
            ("stream", LOGS_FOLLOW) => {
                let sid = format!("s-{}", req.request_id);
                server
                    .respond(Response::success(&req.request_id, json!({ "stream_id": sid })))
                    .await?;
                server.emit(Event::log(&sid, "info", "hello")).await?;
                server.emit(Event::log(&sid, "info", "world")).await?;
                server.emit(Event::end(&sid, true)).await?;
            }
            _ => {
                let resp = answer(mode, &args, &req)?;
                server.respond(resp).await?;
            }
        }
    }
    Ok(())
}

fn handshake(mode: &str) -> Handshake {
    let mut caps = Capabilities::with_ops([
        ops::CONFIG_MUTATE,
        ops::BUILD_RUN,
        ops::PREPARE_RUN,
        ops::VALIDATE_RUN,
        ops::LAUNCH_PLAN,
        PING,
    ]);
    match mode {
        "stream" => caps.streams.push(LOGS_FOLLOW.into()),
        "command" => {
            caps.ops.push(ops::COMMAND_RUN.into());
            caps.commands.push(CommandSpec {
                name: "hello".into(),
                help: "Say hello".into(),
                args_spec: Vec::new(),
            });
        }
        _ => {}
    }
    Handshake::new(format!("fixture-{}", mode), caps)
}

fn answer(mode: &str, args: &[String], req: &Request) -> Result<Response> {
    let rid = req.request_id.as_str();
    let out = match (mode, req.op.as_str()) {
        (_, PING) => json!({ "pong": true }),
        ("pipeline", ops::CONFIG_MUTATE) => {
            json!({ "config_patch": { "set": { "services.demo.port": 8080 } } })
        }
        ("set-x", ops::CONFIG_MUTATE) => {
            let id = args.get(1).context("set-x needs an id")?;
            if let Some(log) = args.get(2) {
                let mut f = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log)?;
                writeln!(f, "{}", id)?;
            }
            json!({ "config_patch": { "set": { "x": id } } })
        }
        ("http-service", ops::CONFIG_MUTATE) => {
            let port = free_port()?;
            json!({ "config_patch": { "set": { "services.http.port": port } } })
        }
        ("http-service", ops::LAUNCH_PLAN) => http_plan(&req.input)?,
        ("crash-service", ops::CONFIG_MUTATE) => {
            let port = free_port()?;
            json!({ "config_patch": { "set": { "services.crash.port": port } } })
        }
        ("crash-service", ops::LAUNCH_PLAN) => crash_plan(&req.input)?,
        ("validate-fail", ops::VALIDATE_RUN) => json!({
            "valid": false,
            "errors": [{ "code": "E_FIXTURE", "message": "fixture says no" }],
        }),
        ("command", ops::COMMAND_RUN) => {
            let fail = req.input["argv"]
                .as_array()
                .map(|a| a.iter().any(|v| v == "fail"))
                .unwrap_or(false);
            if fail {
                json!({ "exit_code": 3, "message": "asked to fail" })
            } else {
                json!({ "exit_code": 0 })
            }
        }
        (_, ops::LAUNCH_PLAN) => json!({ "services": [] }),
        (_, ops::CONFIG_MUTATE) | (_, ops::BUILD_RUN) | (_, ops::PREPARE_RUN) => json!({}),
        (_, ops::VALIDATE_RUN) => json!({ "valid": true }),
        (_, other) => {
            return Ok(Response::failure(
                rid,
                plugin_protocol::errors::E_UNSUPPORTED,
                format!("fixture does not handle {}", other),
            ))
        }
    };
    Ok(Response::success(rid, out))
}

fn free_port() -> Result<u16> {
    let l = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(l.local_addr()?.port())
}

fn http_plan(input: &Value) -> Result<Value> {
    let bin = std::env::var("HTTP_ECHO_BIN").context("HTTP_ECHO_BIN is not set")?;
    let port = input["config"]["services"]["http"]["port"]
        .as_u64()
        .context("config has no services.http.port")?;
    Ok(json!({
        "services": [{
            "name": "http",
            "command": [bin, "--port", port.to_string()],
            "env": { "ECHO_GREETING": "hi", "ECHO_API_TOKEN": "s3cr3t" },
            "health": { "type": "http", "url": format!("http://127.0.0.1:{}/health", port) },
        }]
    }))
}

fn crash_plan(input: &Value) -> Result<Value> {
    let bin = std::env::var("CRASH_AFTER_BIN").context("CRASH_AFTER_BIN is not set")?;
    let port = input["config"]["services"]["crash"]["port"]
        .as_u64()
        .context("config has no services.crash.port")?;
    Ok(json!({
        "services": [{
            "name": "crash",
            "command": [bin, "--port", port.to_string(), "--after-ms", "1500", "--code", "7"],
            "health": { "type": "tcp", "address": format!("127.0.0.1:{}", port) },
        }]
    }))
}
