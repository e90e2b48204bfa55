//! Injectable delays
//!
//! Every fixed wait in the bridge (OCR poll backoff, chat retry delay,
//! terminology rate limiting) goes through a [`Sleeper`], so tests can run
//! the full schedules instantly and assert on what was requested.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real delays on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records each requested delay
#[derive(Debug, Default)]
pub struct InstantSleeper {
    requested: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order
    pub fn requested(&self) -> Vec<Duration> {
        self.requested
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.requested().iter().sum()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(duration);
        }
    }
}
