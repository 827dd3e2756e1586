//! Coalesced "something changed" signal
//!
//! Backed by [`tokio::sync::Notify`]: `notify_one` stores at most one
//! permit, so any number of emits between two waits collapse into a
//! single wake-up.

use std::sync::Arc;

use tokio::sync::Notify;

/// Shared, capacity-one change signal
#[derive(Debug, Clone, Default)]
pub struct ChangeSignal {
    notify: Arc<Notify>,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal without blocking; a pending signal absorbs this one
    pub fn emit(&self) {
        self.notify.notify_one();
    }

    /// Wait until the signal is raised, consuming it
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_emit_before_wait_is_kept() {
        let signal = ChangeSignal::new();
        signal.emit();

        tokio::time::timeout(Duration::from_millis(100), signal.changed())
            .await
            .expect("pending signal should be consumed immediately");
    }

    #[tokio::test]
    async fn test_emits_coalesce() {
        let signal = ChangeSignal::new();
        signal.emit();
        signal.emit();
        signal.emit();

        signal.changed().await;
        let second = tokio::time::timeout(Duration::from_millis(50), signal.changed()).await;
        assert!(second.is_err(), "three emits must collapse into one wake-up");
    }

    #[tokio::test]
    async fn test_clones_share_the_signal() {
        let signal = ChangeSignal::new();
        let emitter = signal.clone();

        let waiter = tokio::spawn(async move { signal.changed().await });
        tokio::task::yield_now().await;
        emitter.emit();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
