//! The process-wide termination latch: write-once, read-many, observed
//! promptly by every long-lived loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::warn;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct TerminationSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl TerminationSignal {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sets the latch. Idempotent: once set, stays set.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Waits until either the latch is set or `duration` elapses, whichever
    /// is first — realizes a bounded, non-busy-looping wait for shutdown.
    pub async fn wait_or_timeout(&self, duration: std::time::Duration) {
        if self.is_set() {
            return;
        }
        let _ = tokio::time::timeout(duration, self.notify.notified()).await;
    }

    /// Spawns the task that races SIGINT/SIGTERM and sets the latch on
    /// whichever fires first, printing the one-line shutdown warning.
    pub fn spawn_signal_handler(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut terminate = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(s) => s,
                    Err(err) => {
                        warn!("failed to install SIGTERM handler: {err}");
                        let _ = ctrl_c.await;
                        signal.trip();
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
                signal.trip();
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                signal.trip();
            }
        });
    }

    fn trip(&self) {
        warn!("signal caught, please wait for server termination...");
        self.set();
    }
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_is_idempotent_and_visible_to_clones() {
        let sig = TerminationSignal::new();
        let clone = sig.clone();
        assert!(!sig.is_set());
        clone.set();
        assert!(sig.is_set());
        clone.set();
        assert!(sig.is_set());
    }

    #[tokio::test]
    async fn wait_or_timeout_returns_promptly_on_set() {
        let sig = TerminationSignal::new();
        let waiter = sig.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_or_timeout(Duration::from_secs(30)).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        sig.set();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait_or_timeout should return promptly after set")
            .unwrap();
    }
}
