use crate::error::{DevctlError, Result};
use plugin_protocol::RequestContext;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Host metadata sent to plugins with every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub repo_root: String,
    pub cwd: String,
    pub dry_run: bool,
}

/// Cancellation scope for one operation: a token plus an optional deadline.
///
/// Child scopes share the parent's token hierarchy and can only tighten the
/// deadline, never extend it.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    meta: Option<RequestMeta>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    /// A child scope ending at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            meta: self.meta.clone(),
        }
    }

    /// Overrides the request metadata the client would otherwise attach.
    pub fn with_meta(mut self, meta: RequestMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn meta(&self) -> Option<&RequestMeta> {
        self.meta.as_ref()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Remaining budget in whole milliseconds, 0 meaning "no deadline".
    pub fn deadline_ms(&self) -> u64 {
        match self.remaining() {
            Some(left) => (left.as_millis() as u64).max(1),
            None => 0,
        }
    }

    /// The error this scope has ended with, if it has.
    pub fn err(&self) -> Option<DevctlError> {
        if self.token.is_cancelled() {
            return Some(DevctlError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(DevctlError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> DevctlError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => DevctlError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => DevctlError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DevctlError::Cancelled
            }
        }
    }

    /// Runs `fut` unless the scope ends first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            res = fut => res,
            err = self.done() => Err(err),
        }
    }

    /// Wire context for a request, falling back to the client's metadata.
    pub fn request_context(&self, fallback: &RequestMeta) -> RequestContext {
        let meta = self.meta.as_ref().unwrap_or(fallback);
        RequestContext {
            repo_root: meta.repo_root.clone(),
            cwd: meta.cwd.clone(),
            deadline_ms: self.deadline_ms(),
            dry_run: meta.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_fires() {
        let ctx = OpContext::new().with_timeout(Duration::from_millis(20));
        assert!(ctx.done().await.is_deadline());
        assert!(matches!(ctx.err(), Some(DevctlError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn parent_cancel_reaches_children() {
        let parent = OpContext::new();
        let child = parent.with_timeout(Duration::from_secs(30));
        parent.cancel();
        assert!(matches!(child.done().await, DevctlError::Cancelled));
    }

    #[test]
    fn child_never_extends_deadline() {
        let parent = OpContext::new().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn request_context_prefers_override() {
        let fallback = RequestMeta {
            repo_root: "/repo".into(),
            cwd: "/repo".into(),
            dry_run: false,
        };
        let ctx = OpContext::new();
        assert_eq!(ctx.request_context(&fallback).repo_root, "/repo");
        assert_eq!(ctx.request_context(&fallback).deadline_ms, 0);

        let ctx = ctx.with_meta(RequestMeta {
            dry_run: true,
            ..fallback.clone()
        });
        assert!(ctx.request_context(&fallback).dry_run);
    }
}
