use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Rolling window the request ceiling applies to.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Cooperative sliding-window rate limiter.
///
/// Keeps a timestamp per request issued in the last 60 seconds. When the
/// window is full, `acquire` sleeps until the oldest entry ages out; calls
/// are delayed, never rejected. This is client-side self-throttling to stay
/// under the remote API's own limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: usize) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window: VecDeque::new(),
        }
    }

    /// Drop timestamps that have aged out of the window.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.window.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Prune, then report how long the caller must wait before the next
    /// request fits. Pure in `(self, now)` so tests can drive it with
    /// synthetic instants.
    fn required_delay(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.window.len() < self.max_requests {
            return None;
        }
        self.window
            .front()
            .map(|&oldest| WINDOW - now.duration_since(oldest))
    }

    /// Wait for a free slot in the window, then record the request.
    pub async fn acquire(&mut self) {
        if let Some(delay) = self.required_delay(Instant::now()) {
            debug!("rate limit window full, sleeping {:?}", delay);
            tokio::time::sleep(delay).await;
            self.prune(Instant::now());
        }
        self.window.push_back(Instant::now());
    }
}
