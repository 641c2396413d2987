use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Enforces a minimum spacing between any two outbound HTTP calls for one
/// device session. Callers queue on the mutex, so outbound calls are strictly
/// serialized with FIFO fairness; this never errors, it only delays.
pub(crate) struct Throttle {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Throttle {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub(crate) async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limiting API request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
