//! Per-source rate budget.
//!
//! A rolling-window budget: at most `max` acquisitions per `window`. When
//! the window is full, `acquire` sleeps until the oldest slot rolls out
//! instead of letting callers flood the source.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rolling-window request budget shared by one adapter's fetches.
pub struct RateBudget {
    max: u32,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateBudget {
    /// Budget of `max` requests per `window`. A `max` of 0 disables the
    /// budget entirely.
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Take one slot, sleeping until one frees up if the window is full.
    pub async fn acquire(&self) {
        if self.max == 0 {
            return;
        }
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                while let Some(front) = stamps.front() {
                    if now.duration_since(*front) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }
                if stamps.len() < self.max as usize {
                    stamps.push_back(now);
                    return;
                }
                // Full: sleep until the oldest stamp leaves the window.
                self.window - now.duration_since(stamps[0])
            };
            tokio::time::sleep(wait).await;
        }
    }
}
