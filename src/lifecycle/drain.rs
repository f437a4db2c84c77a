use std::future::Future;
use std::time::Duration;

/// Default bound on how long draining may take before the process stops anyway.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The drain hook finished inside the timeout.
    Completed,
    /// The timeout elapsed first; the hook was abandoned.
    TimedOut,
}

/// Run `hook` for at most `timeout`, whichever finishes first.
pub async fn drain<F>(hook: F, timeout: Duration) -> DrainOutcome
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(timeout, hook).await {
        Ok(()) => DrainOutcome::Completed,
        Err(_) => DrainOutcome::TimedOut,
    }
}
