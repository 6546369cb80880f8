//! A resettable one-shot timer.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Fires once, a fixed quiet period after the most recent [`Debouncer::reset`].
///
/// This is meant to be polled from a `tokio::select!` loop. While nothing is
/// pending, [`Debouncer::wait`] never completes.
#[derive(Debug)]
pub struct Debouncer {
    quiet_period: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            deadline: None,
        }
    }

    /// (Re)start the quiet period from now.
    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.quiet_period);
    }

    /// Forget any pending deadline.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Wait until the quiet period has passed. Cancel-safe: dropping this
    /// future leaves the deadline in place.
    pub async fn wait(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}
