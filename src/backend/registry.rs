use std::sync::Arc;

use tokio::sync::watch;

/// Counts RPC sessions that are currently open on this backend.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    active: Arc<watch::Sender<usize>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            active: Arc::new(active),
        }
    }

    /// Register a session; it counts as active until the ticket is dropped.
    pub fn enter(&self) -> SessionTicket {
        self.active.send_modify(|active| *active += 1);
        SessionTicket {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolves once no session is active.
    pub async fn wait_idle(self) {
        let mut active = self.active.subscribe();
        // The registry owns a sender, so the channel cannot close while we wait.
        let _ = active.wait_for(|active| *active == 0).await;
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct SessionTicket {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.active
            .send_modify(|active| *active = active.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_tickets_count_sessions() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.active(), 0);

        let first = registry.enter();
        let second = registry.enter();
        assert_eq!(registry.active(), 2);

        drop(first);
        assert_eq!(registry.active(), 1);
        drop(second);
        assert_eq!(registry.active(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_without_sessions() {
        let registry = SessionRegistry::new();
        tokio::time::timeout(Duration::from_secs(1), registry.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_waits_for_last_ticket() {
        let registry = SessionRegistry::new();
        let ticket = registry.enter();

        let waiter = tokio::spawn(registry.clone().wait_idle());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        drop(ticket);
        waiter.await.unwrap();
        assert_eq!(registry.active(), 0);
    }
}
