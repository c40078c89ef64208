use crate::engine::Probe;
use crate::error::{DevctlError, Result};
use crate::runtime::OpContext;
use log::{debug, info};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

pub const TCP_DIAL_TIMEOUT: Duration = Duration::from_millis(200);
pub const TCP_TICK: Duration = Duration::from_millis(200);
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
pub const HTTP_TICK: Duration = Duration::from_millis(300);

/// Polls `probe` until it succeeds, `ready_timeout` elapses or `ctx` ends.
pub async fn wait_ready(
    ctx: &OpContext,
    service: &str,
    probe: &Probe,
    ready_timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + ready_timeout;
    let (tick, http) = match probe {
        Probe::Tcp { .. } => (TCP_TICK, None),
        Probe::Http { .. } => {
            let client = reqwest::Client::builder()
                .timeout(HTTP_REQUEST_TIMEOUT)
                .build()
                .map_err(|e| DevctlError::service(service, format!("http client: {}", e)))?;
            (HTTP_TICK, Some(client))
        }
    };

    loop {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let ready = match (probe, &http) {
            (Probe::Tcp { address }, _) => tcp_ready(address).await,
            (Probe::Http { url }, Some(client)) => http_ready(client, url).await,
            (Probe::Http { .. }, None) => false,
        };
        if ready {
            info!("service {} is ready", service);
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(DevctlError::ReadyTimeout {
                service: service.to_string(),
                timeout: ready_timeout,
            });
        }
        let pause = tick.min(deadline - now);
        tokio::select! {
            _ = sleep(pause) => {}
            err = ctx.done() => return Err(err),
        }
    }
}

async fn tcp_ready(address: &str) -> bool {
    match timeout(TCP_DIAL_TIMEOUT, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("tcp {}: {}", address, e);
            false
        }
        Err(_) => false,
    }
}

/// Any status below 500 means something is answering.
async fn http_ready(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => {
            let code = resp.status().as_u16();
            (200..500).contains(&code)
        }
        Err(e) => {
            debug!("http {}: {}", url, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_probe_sees_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let probe = Probe::Tcp {
            address: listener.local_addr().unwrap().to_string(),
        };
        wait_ready(&OpContext::new(), "db", &probe, Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tcp_probe_times_out_on_closed_port() {
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };
        let started = std::time::Instant::now();
        let err = wait_ready(
            &OpContext::new(),
            "db",
            &Probe::Tcp { address: addr },
            Duration::from_millis(500),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DevctlError::ReadyTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancelled_scope_stops_polling() {
        let ctx = OpContext::new();
        ctx.cancel();
        let err = wait_ready(
            &ctx,
            "web",
            &Probe::Http {
                url: "http://127.0.0.1:9/health".into(),
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DevctlError::Cancelled));
    }
}
