//! Stop / resume coordination between the controller and the run worker

use tokio::sync::{watch, Notify};

/// Signals for one run. A fresh set is created on every start.
pub(crate) struct RunSignals {
    /// Sticky for the whole run once raised
    stop: watch::Sender<bool>,
    /// One stored permit; consumed by the pause wait
    resume: Notify,
    /// Raised by the supervisor after the worker has exited
    done: watch::Sender<bool>,
}

impl RunSignals {
    pub(crate) fn new() -> Self {
        let (stop, _) = watch::channel(false);
        let (done, _) = watch::channel(false);
        Self {
            stop,
            resume: Notify::new(),
            done,
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    pub(crate) fn resume(&self) {
        self.resume.notify_one();
    }

    /// Block until resumed (`true`) or stopped (`false`); stop wins if both are pending
    pub(crate) async fn wait_for_resume(&self) -> bool {
        let mut stop = self.stop.subscribe();
        tokio::select! {
            biased;
            _ = until_true(&mut stop) => false,
            _ = self.resume.notified() => true,
        }
    }

    pub(crate) fn mark_done(&self) {
        self.done.send_replace(true);
    }

    pub(crate) fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    pub(crate) async fn wait_done(&self) {
        let mut done = self.done.subscribe();
        until_true(&mut done).await;
    }
}

async fn until_true(rx: &mut watch::Receiver<bool>) {
    loop {
        let raised = *rx.borrow_and_update();
        if raised {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: the flag can never be raised
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resume_before_wait_is_kept() {
        let signals = RunSignals::new();
        signals.resume();
        assert!(signals.wait_for_resume().await);
    }

    #[tokio::test]
    async fn test_stop_unblocks_pause() {
        let signals = Arc::new(RunSignals::new());
        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.wait_for_resume().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        signals.request_stop();

        let resumed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pause wait did not end")
            .unwrap();
        assert!(!resumed);
        assert!(signals.stop_requested());
    }

    #[tokio::test]
    async fn test_stop_wins_over_pending_resume() {
        let signals = RunSignals::new();
        signals.resume();
        signals.request_stop();
        assert!(!signals.wait_for_resume().await);
    }

    #[tokio::test]
    async fn test_done_flag() {
        let signals = Arc::new(RunSignals::new());
        assert!(!signals.is_done());

        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.wait_done().await })
        };
        signals.mark_done();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("done wait did not end")
            .unwrap();
        assert!(signals.is_done());
    }
}
