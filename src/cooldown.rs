use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Read-suppression windows for one device session.
///
/// The device takes measurable time to reflect a write in its reported
/// shadow; a read issued too soon returns stale pre-write data and would
/// clobber the optimistic cache patch. Reads are therefore gated on these
/// windows instead of sharing a lock with the write path, so a deferred read
/// can still return cached data immediately.
#[derive(Default)]
pub(crate) struct CooldownState {
    inner: Mutex<Windows>,
}

#[derive(Default)]
struct Windows {
    cooldown_until: Option<Instant>,
    write_in_flight: u32,
    write_quiet_until: Option<Instant>,
    no_read_until: Option<Instant>,
    last_success_fetch: Option<Instant>,
}

impl CooldownState {
    /// Extend the cooldown to `max(current, now + duration)`. Monotonically
    /// non-decreasing: a later call with a smaller duration never shortens it.
    pub(crate) fn set_cooldown(&self, duration: Duration, reason: &str) {
        let until = Instant::now() + duration;
        let mut windows = self.inner.lock().unwrap();
        windows.cooldown_until = Some(match windows.cooldown_until {
            Some(existing) => existing.max(until),
            None => until,
        });
        debug!(seconds = duration.as_secs_f64(), reason, "cooldown set");
    }

    pub(crate) fn cooldown_until(&self) -> Option<Instant> {
        self.inner.lock().unwrap().cooldown_until
    }

    pub(crate) fn cooldown_remaining(&self) -> Duration {
        let now = Instant::now();
        match self.inner.lock().unwrap().cooldown_until {
            Some(until) if until > now => until - now,
            _ => Duration::ZERO,
        }
    }

    pub(crate) fn is_write_active(&self) -> bool {
        let windows = self.inner.lock().unwrap();
        windows.write_in_flight > 0
            || windows
                .write_quiet_until
                .is_some_and(|until| Instant::now() < until)
    }

    pub(crate) fn in_no_read_window(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .no_read_until
            .is_some_and(|until| Instant::now() < until)
    }

    pub(crate) fn should_defer_read(&self) -> bool {
        self.in_no_read_window()
            || self.is_write_active()
            || self.cooldown_remaining() > Duration::ZERO
    }

    /// Called at write-enqueue time: no read is trusted until the device has
    /// had `window` to apply the change.
    pub(crate) fn extend_no_read(&self, window: Duration) {
        self.inner.lock().unwrap().no_read_until = Some(Instant::now() + window);
    }

    pub(crate) fn begin_write(&self) {
        self.inner.lock().unwrap().write_in_flight += 1;
    }

    pub(crate) fn end_write(&self) {
        let mut windows = self.inner.lock().unwrap();
        windows.write_in_flight = windows.write_in_flight.saturating_sub(1);
    }

    pub(crate) fn mark_write_quiet(&self, window: Duration) {
        self.inner.lock().unwrap().write_quiet_until = Some(Instant::now() + window);
    }

    pub(crate) fn mark_fetch_success(&self) {
        self.inner.lock().unwrap().last_success_fetch = Some(Instant::now());
    }

    pub(crate) fn recently_fetched(&self, guard: Duration) -> bool {
        self.inner
            .lock()
            .unwrap()
            .last_success_fetch
            .is_some_and(|at| at.elapsed() < guard)
    }
}
