//! Cancellation signal handed to every blocking stage of a request.
//!
//! A [`Cancel`] fires either when its [`CancelHandle`] is triggered or when an
//! optional deadline passes, whichever comes first.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Cancel {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl Cancel {
    pub fn new() -> (CancelHandle, Cancel) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Cancel { rx, deadline: None })
    }

    /// A signal nobody can trigger.
    pub fn never() -> Self {
        let (_handle, cancel) = Self::new();
        cancel
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the signal fires. Pending forever if it never can.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let triggered = async move {
            // Sender gone without cancelling: only the deadline can fire now.
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = triggered => {}
                _ = tokio::time::sleep_until(deadline) => {}
            },
            None => triggered.await,
        }
    }
}
