//! # Error Policy
//!
//! Classification and handling of watch stream errors.
//!
//! Reconciliation errors never reach this layer: they are turned into
//! conditions and requeue decisions inside each target's task.

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, warn};

/// Kind of watch stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401, credentials or RBAC revoked
    Unauthorized,
    /// 410, resource version too old
    Expired,
    /// 429, API server storage reinitializing or throttling
    TooManyRequests,
    /// 404, usually a missing CRD
    NotFound,
    Other,
}

impl WatchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchErrorKind::Unauthorized => "unauthorized",
            WatchErrorKind::Expired => "expired",
            WatchErrorKind::TooManyRequests => "too_many_requests",
            WatchErrorKind::NotFound => "not_found",
            WatchErrorKind::Other => "other",
        }
    }
}

/// Classify a watch error from its debug representation
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    // 404 is checked before 401: a plain-text 404 body surfaces as a serde
    // error that also mentions WatchFailed
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 =
        (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        WatchErrorKind::Unauthorized
    } else if is_410 {
        WatchErrorKind::Expired
    } else if is_429 {
        WatchErrorKind::TooManyRequests
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Handle a watch stream error and wait as long as its kind calls for
///
/// Returns `true` when the watch should be restarted, `false` when the stream
/// can keep going. A kept stream still waits out the restart delay, since the
/// watcher relists on its next poll.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff_ms: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> bool {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );

    let kind = classify_watch_error(error_string);
    let (delay, restart) = {
        let _error_guard = error_span.enter();
        match kind {
            WatchErrorKind::Unauthorized => {
                error!("Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
                error!("Diagnostics:");
                error!("   1. Verify the ClusterRole still grants list/watch on configsyncs.configsync.io");
                error!("   2. Verify the ClusterRoleBinding still binds the controller ServiceAccount");
                error!(
                    "   3. kubectl auth can-i watch configsyncs.configsync.io --as=system:serviceaccount:<namespace>:configsync-controller --all-namespaces"
                );
                warn!(
                    "Waiting {:?} before retrying watch (RBAC may need time to propagate)...",
                    watch_restart_delay
                );
                (watch_restart_delay, true)
            }
            WatchErrorKind::Expired => {
                warn!("Watch resource version expired (410), restarting watch");
                (Duration::ZERO, true)
            }
            WatchErrorKind::TooManyRequests => {
                let current = backoff_ms.load(Ordering::Relaxed);
                warn!(
                    "API server storage reinitializing (429), backing off for {}ms before restart...",
                    current
                );
                backoff_ms.store(
                    current.saturating_mul(2).min(max_backoff_ms),
                    Ordering::Relaxed,
                );
                (Duration::from_millis(current), true)
            }
            WatchErrorKind::NotFound => {
                warn!(
                    "ConfigSync resource or CRD not found (404) - install the CRD with `crdgen | kubectl apply -f -`. Error: {}",
                    error_string
                );
                (watch_restart_delay, false)
            }
            WatchErrorKind::Other => {
                error!("Watch stream error: {}", error_string);
                (watch_restart_delay, true)
            }
        }
    };

    if restart {
        metrics::increment_watch_restarts(kind.as_str());
    }
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    restart
}
