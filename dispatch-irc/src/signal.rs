//! One-shot broadcast signal.
//!
//! Fires at most once; every waiter, including ones that subscribe after
//! the fact, observes it. Used for the permanent quit and for the
//! per-generation reconnect request.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn fires_once() {
        let s = Signal::new();
        assert!(!s.is_fired());
        assert!(s.fire());
        assert!(!s.fire());
        assert!(s.is_fired());
    }

    #[tokio::test]
    async fn wakes_all_waiters() {
        let s = Signal::new();
        let a = tokio::spawn({
            let s = s.clone();
            async move { s.wait().await }
        });
        let b = tokio::spawn({
            let s = s.clone();
            async move { s.wait().await }
        });
        tokio::task::yield_now().await;
        s.fire();
        tokio::time::timeout(Duration::from_secs(1), async {
            a.await.unwrap();
            b.await.unwrap();
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn late_waiter_sees_fired_signal() {
        let s = Signal::new();
        s.fire();
        tokio::time::timeout(Duration::from_secs(1), s.wait()).await.unwrap();
    }
}
