use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::client::Inner;

/// At most one outstanding debounced refresh per device.
#[derive(Default)]
pub(crate) struct DebounceState {
    pub(crate) deadline: Option<Instant>,
    pub(crate) task: Option<JoinHandle<()>>,
}

/// Effective poll interval plus the configured baseline it returns to after
/// backoff or boost ends.
pub(crate) struct IntervalState {
    pub(crate) current: Duration,
    pub(crate) configured_secs: u64,
    pub(crate) boost_task: Option<JoinHandle<()>>,
}

impl IntervalState {
    pub(crate) fn new(configured_secs: u64) -> Self {
        Self {
            current: Duration::from_secs(configured_secs),
            configured_secs,
            boost_task: None,
        }
    }
}

impl Inner {
    pub(crate) fn jitter(&self, (min, max): (Duration, Duration)) -> Duration {
        if max <= min {
            return min;
        }
        let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Schedule a single refresh after `delay` or the current cooldown,
    /// whichever is later, plus jitter. An existing deadline at or past the
    /// new target wins and the request is dropped; replacing it would only
    /// move an already-useful refresh around.
    pub(crate) fn schedule_debounced_refresh(self: &Arc<Self>, delay: Duration) {
        let now = Instant::now();
        let mut target = now + delay;
        if let Some(cooldown_until) = self.cooldown.cooldown_until() {
            target = target.max(cooldown_until);
        }
        target += self.jitter(self.tuning.debounce_jitter);

        let mut debounce = self.debounce.lock().unwrap();
        if let Some(existing) = debounce.deadline {
            if existing >= target {
                return;
            }
            if let Some(task) = debounce.task.take() {
                task.abort();
            }
        }
        debounce.deadline = Some(target);

        let session = Arc::clone(self);
        debounce.task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(target)).await;
            {
                let mut debounce = session.debounce.lock().unwrap();
                debounce.deadline = None;
                debounce.task = None;
            }
            // Conditions may have moved since this was scheduled; re-check
            // rather than assuming the original deadline still clears them.
            if session.cooldown.in_no_read_window()
                || session.cooldown.cooldown_remaining() > Duration::ZERO
            {
                session.schedule_debounced_refresh(Duration::ZERO);
                return;
            }
            if session
                .cooldown
                .recently_fetched(session.tuning.min_refresh_guard)
            {
                trace!("debounced refresh dropped, data is fresh enough");
                return;
            }
            if let Err(e) = session.refresh_request(false, false).await {
                warn!(error = %e, "debounced refresh failed");
            }
        }));
    }

    /// Exponential poll-interval backoff after a rate-limited read; returns
    /// the new interval so the caller can set a matching cooldown.
    pub(crate) fn backoff_interval(&self) -> Duration {
        let mut interval = self.interval.lock().unwrap();
        let current_secs = interval.current.as_secs().max(1);
        let new_secs = current_secs.max((current_secs * 2).min(self.tuning.refresh_max));
        if new_secs != current_secs {
            interval.current = Duration::from_secs(new_secs);
            warn!(seconds = new_secs, "429 Too Many Requests, backing off");
        } else {
            warn!(seconds = current_secs, "429 Too Many Requests, keeping interval");
        }
        interval.current
    }

    /// Collapse backoff on the first subsequent success, unless a boost is
    /// holding the interval down.
    pub(crate) fn restore_interval_after_success(&self) {
        let mut interval = self.interval.lock().unwrap();
        if interval.boost_task.is_none()
            && interval.current > Duration::from_secs(interval.configured_secs)
        {
            interval.current = Duration::from_secs(interval.configured_secs);
            debug!(
                seconds = interval.configured_secs,
                "restored polling interval after successful fetch"
            );
        }
    }

    pub(crate) fn set_refresh_interval(&self, seconds: u64) {
        let clamped = self.tuning.clamp_interval(seconds);
        let mut interval = self.interval.lock().unwrap();
        interval.configured_secs = clamped;
        if interval.boost_task.is_none() {
            interval.current = Duration::from_secs(clamped);
        }
        debug!(seconds = clamped, "set refresh interval");
    }

    /// Temporarily poll faster after a user-initiated change, then restore
    /// the configured interval. Independent of (and taking precedence over)
    /// the backoff logic.
    pub(crate) fn start_boost(self: &Arc<Self>) {
        let mut interval = self.interval.lock().unwrap();
        if interval.current > self.tuning.boost_interval {
            interval.current = self.tuning.boost_interval;
            debug!(
                seconds = self.tuning.boost_interval.as_secs(),
                "temporarily increased polling frequency"
            );
        }
        if let Some(task) = interval.boost_task.take() {
            task.abort();
        }
        let session = Arc::clone(self);
        interval.boost_task = Some(tokio::spawn(async move {
            tokio::time::sleep(session.tuning.boost_duration).await;
            let mut interval = session.interval.lock().unwrap();
            interval.current = Duration::from_secs(interval.configured_secs);
            interval.boost_task = None;
            debug!(
                seconds = interval.configured_secs,
                "restored polling interval after boost"
            );
        }));
    }
}
