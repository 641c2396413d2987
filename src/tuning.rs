use std::time::Duration;

/// Timing knobs for the read/write coordination engine.
///
/// Defaults match the intervals the eXO cloud tolerates in practice; tests
/// substitute millisecond-scale values through the builder.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Default poll interval when none is configured.
    pub refresh_default: u64,
    /// Lower clamp for the configured poll interval (seconds).
    pub refresh_min: u64,
    /// Upper clamp for the configured poll interval and the backoff ceiling.
    pub refresh_max: u64,
    /// Poll interval while a boost is active.
    pub boost_interval: Duration,
    /// How long a boost lasts before the configured interval is restored.
    pub boost_duration: Duration,
    /// Minimum spacing between any two outbound HTTP calls.
    pub min_request_interval: Duration,
    /// Minimum spacing between successive network writes.
    pub write_gap: Duration,
    /// Read cooldown applied after every successful write.
    pub post_write_cooldown: Duration,
    /// Window after a write is enqueued during which reads are not trusted.
    pub no_read_window: Duration,
    /// A debounced refresh is dropped if a fetch succeeded this recently.
    pub min_refresh_guard: Duration,
    /// Extra settle time before refreshing after a schedule write.
    pub schedule_refresh_delay: Duration,
    /// Jitter added when a read is deferred because a write is active.
    pub read_deferral_jitter: (Duration, Duration),
    /// Jitter added to every debounced refresh deadline.
    pub debounce_jitter: (Duration, Duration),
    /// Extra post-write cooldown for writes requested with `delay_refresh`.
    pub delayed_refresh_extra: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            refresh_default: 600,
            refresh_min: 300,
            refresh_max: 3600,
            boost_interval: Duration::from_secs(10),
            boost_duration: Duration::from_secs(60),
            min_request_interval: Duration::from_secs(5),
            write_gap: Duration::from_secs(8),
            post_write_cooldown: Duration::from_secs(45),
            no_read_window: Duration::from_secs(30),
            min_refresh_guard: Duration::from_secs(120),
            schedule_refresh_delay: Duration::from_secs(180),
            read_deferral_jitter: (Duration::from_secs(15), Duration::from_secs(45)),
            debounce_jitter: (Duration::from_secs(30), Duration::from_secs(90)),
            delayed_refresh_extra: Duration::from_secs(10),
        }
    }
}

impl Tuning {
    /// Clamp a requested refresh interval to the allowed range.
    pub fn clamp_interval(&self, seconds: u64) -> u64 {
        seconds.clamp(self.refresh_min, self.refresh_max)
    }
}
