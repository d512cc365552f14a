//! Operator interrupt propagation.
//!
//! The signal handler flips a watch channel; long-running loops poll
//! [`Shutdown::is_triggered`] between bounded steps and use
//! [`Shutdown::pause`] instead of a bare sleep.

use std::time::Duration;
use tokio::sync::watch;

/// Sending half, held by the signal handler.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace never fails, even with no receivers left.
        self.0.send_replace(true);
    }
}

/// Receiving half, cloned into every component that may block.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger(tx), Shutdown(rx))
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once shutdown is requested.
    ///
    /// If the trigger is dropped without firing this never resolves.
    pub async fn triggered(&mut self) {
        if self.0.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration`. Returns `false` if interrupted by shutdown.
    pub async fn pause(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.triggered() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pause_completes_without_trigger() {
        let (_trigger, mut shutdown) = Shutdown::channel();
        let start = tokio::time::Instant::now();
        assert!(shutdown.pause(Duration::from_secs(5)).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_interrupted_by_trigger() {
        let (trigger, mut shutdown) = Shutdown::channel();
        let start = tokio::time::Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.trigger();
        });

        assert!(!shutdown.pause(Duration::from_secs(60)).await);
        assert!(start.elapsed() < Duration::from_secs(60));
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trigger_does_not_interrupt() {
        let (trigger, mut shutdown) = Shutdown::channel();
        drop(trigger);
        assert!(shutdown.pause(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_pause_returns_immediately_when_triggered() {
        let (trigger, mut shutdown) = Shutdown::channel();
        trigger.trigger();
        assert!(!shutdown.pause(Duration::from_secs(3600)).await);
    }
}
