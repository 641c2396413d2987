use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{self, AuthTokens};
use crate::cooldown::CooldownState;
use crate::protocol::{
    deep_merge, is_rate_limited, is_token_expired, nested_value, parse_reported, schedule_patch,
    set_nested, shadow_path, DEFAULT_BASE_URL, USER_AGENT,
};
use crate::reconcile::schedule_changes;
use crate::refresh::{DebounceState, IntervalState};
use crate::throttle::Throttle;
use crate::tuning::Tuning;
use crate::types::{Event, ScheduleWindow, Snapshot, WriteKind};
use crate::writer::WriteQueue;
use crate::{Error, Result};

type UpdateCallback = Box<dyn Fn(&Snapshot) + Send + Sync>;
type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type TokenCallback = Box<dyn Fn(&AuthTokens) + Send + Sync>;

pub struct ExoClientBuilder {
    email: String,
    password: String,
    serial: String,
    base_url: String,
    tuning: Tuning,
    refresh_interval: Option<u64>,
    tokens: Option<AuthTokens>,
    update_callbacks: Vec<UpdateCallback>,
    event_callbacks: Vec<EventCallback>,
    token_callbacks: Vec<TokenCallback>,
}

impl ExoClientBuilder {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            serial: serial.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            tuning: Tuning::default(),
            refresh_interval: None,
            tokens: None,
            update_callbacks: Vec::new(),
            event_callbacks: Vec::new(),
            token_callbacks: Vec::new(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Configured poll interval in seconds, clamped to the allowed range.
    pub fn refresh_interval(mut self, seconds: u64) -> Self {
        self.refresh_interval = Some(seconds);
        self
    }

    /// Resume a previously persisted cloud session.
    pub fn tokens(mut self, tokens: AuthTokens) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Called after every successful fetch and every optimistic write.
    pub fn on_update(mut self, f: impl Fn(&Snapshot) + Send + Sync + 'static) -> Self {
        self.update_callbacks.push(Box::new(f));
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    /// Called whenever fresh tokens are obtained, so the host can persist
    /// them across restarts.
    pub fn on_tokens(mut self, f: impl Fn(&AuthTokens) + Send + Sync + 'static) -> Self {
        self.token_callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> ExoClient {
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to build HTTP client");

        let configured = self
            .tuning
            .clamp_interval(self.refresh_interval.unwrap_or(self.tuning.refresh_default));
        let throttle = Throttle::new(self.tuning.min_request_interval);

        ExoClient {
            inner: Arc::new(Inner {
                http,
                base_url: self.base_url,
                email: self.email,
                password: self.password,
                serial: self.serial,
                throttle,
                cooldown: CooldownState::default(),
                auth: Mutex::new(AuthState {
                    tokens: self.tokens,
                    token_rejected: false,
                    last_auth_error: None,
                }),
                queue: Mutex::new(WriteQueue::default()),
                debounce: Mutex::new(DebounceState::default()),
                interval: Mutex::new(IntervalState::new(configured)),
                snapshot: Mutex::new(None),
                update_callbacks: self.update_callbacks,
                event_callbacks: self.event_callbacks,
                token_callbacks: self.token_callbacks,
                tuning: self.tuning,
            }),
        }
    }
}

pub(crate) struct AuthState {
    pub(crate) tokens: Option<AuthTokens>,
    /// Set when the cloud rejects the bearer token mid-session; forces a
    /// refresh on the next cycle even though the expiry has not passed.
    pub(crate) token_rejected: bool,
    pub(crate) last_auth_error: Option<String>,
}

/// Per-device session state, shared with the worker/debounce/boost tasks.
pub(crate) struct Inner {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) email: String,
    pub(crate) password: String,
    pub(crate) serial: String,
    pub(crate) tuning: Tuning,
    pub(crate) throttle: Throttle,
    pub(crate) cooldown: CooldownState,
    pub(crate) auth: Mutex<AuthState>,
    pub(crate) queue: Mutex<WriteQueue>,
    pub(crate) debounce: Mutex<DebounceState>,
    pub(crate) interval: Mutex<IntervalState>,
    snapshot: Mutex<Option<Snapshot>>,
    update_callbacks: Vec<UpdateCallback>,
    event_callbacks: Vec<EventCallback>,
    token_callbacks: Vec<TokenCallback>,
}

/// Client for one eXO device. Writes are serialized and coalesced; reads are
/// deferred around write activity and server cooldowns, serving the cached
/// shadow in the meantime. Cloning is cheap and clones share the session.
#[derive(Clone)]
pub struct ExoClient {
    pub(crate) inner: Arc<Inner>,
}

impl ExoClient {
    pub fn builder(
        email: impl Into<String>,
        password: impl Into<String>,
        serial: impl Into<String>,
    ) -> ExoClientBuilder {
        ExoClientBuilder::new(email, password, serial)
    }

    /// The scheduled-refresh hook: fetch the device shadow, or serve the
    /// cached snapshot when reads are currently deferred.
    pub async fn refresh(&self) -> Result<Snapshot> {
        self.inner.update_data().await
    }

    /// Force a refresh now. Returns `false` when the request was deferred;
    /// a debounced refresh is scheduled instead and the cached snapshot
    /// stays current until it fires.
    pub async fn request_refresh(&self) -> Result<bool> {
        self.inner.refresh_request(true, true).await
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.inner.snapshot.lock().unwrap().clone()
    }

    /// Effective poll interval for the external coordinator, reflecting any
    /// active backoff or boost.
    pub fn poll_interval(&self) -> Duration {
        self.inner.interval.lock().unwrap().current
    }

    pub fn set_refresh_interval(&self, seconds: u64) {
        self.inner.set_refresh_interval(seconds);
    }

    /// Temporarily shorten the poll interval after a user-initiated change.
    pub fn boost(&self) {
        self.inner.start_boost();
    }

    pub fn last_auth_error(&self) -> Option<String> {
        self.inner.auth.lock().unwrap().last_auth_error.clone()
    }

    pub fn tokens(&self) -> Option<AuthTokens> {
        self.inner.auth.lock().unwrap().tokens.clone()
    }

    /// Set a chlorinator setting (dot-path under `equipment.swc_0`, e.g.
    /// `orp_sp` or `filter_pump.speed`). Resolves once the write has been
    /// executed against the cloud.
    pub async fn set_pool_value(
        &self,
        setting: &str,
        value: impl Into<Value>,
        delay_refresh: bool,
    ) -> Result<()> {
        let value = value.into();
        let mut path = vec!["equipment", "swc_0"];
        path.extend(setting.split('.'));
        self.inner.apply_optimistic(&path, value.clone());

        let payload = nested_value(setting, value);
        self.inner
            .enqueue_write(
                WriteKind::Pool,
                setting.to_string(),
                payload,
                self.inner.write_delay(delay_refresh),
            )
            .await
    }

    /// Set a top-level heating value (e.g. `sp` or `enabled`).
    pub async fn set_heating_value(
        &self,
        key: &str,
        value: impl Into<Value>,
        delay_refresh: bool,
    ) -> Result<()> {
        let value = value.into();
        self.inner
            .apply_optimistic(&["heating", key], value.clone());
        self.inner
            .enqueue_write(
                WriteKind::Heating,
                key.to_string(),
                value,
                self.inner.write_delay(delay_refresh),
            )
            .await
    }

    /// Patch a named schedule's window (and rpm, which only variable-speed
    /// pump schedules honor).
    pub async fn update_schedule(&self, key: &str, window: &ScheduleWindow) -> Result<()> {
        let mut patch = match schedule_patch(window)? {
            Some(patch) => patch,
            None => {
                debug!(schedule = key, "no schedule updates provided");
                return Ok(());
            }
        };

        if let Some(snapshot) = self.snapshot() {
            if let Some(schedules) = snapshot.schedules()
                && !schedules.contains_key(key)
            {
                return Err(Error::UnknownSchedule(key.to_string()));
            }
            if !snapshot.schedule_is_vsp(key) {
                if let Some(map) = patch.as_object_mut() {
                    map.remove("rpm");
                    if map.is_empty() {
                        return Ok(());
                    }
                }
            }
        }

        self.inner.apply_schedule_optimistic(key, &patch);
        self.inner
            .enqueue_write(WriteKind::Schedule, key.to_string(), patch, Duration::ZERO)
            .await
    }

    /// Disable a schedule by writing a zero-length window.
    pub async fn disable_schedule(&self, key: &str) -> Result<()> {
        self.update_schedule(key, &ScheduleWindow::disabled()).await
    }

    /// Cancel and await all background tasks. Pending write completions
    /// resolve as errors.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

impl Inner {
    fn write_delay(&self, delay_refresh: bool) -> Duration {
        if delay_refresh {
            self.tuning.delayed_refresh_extra
        } else {
            Duration::ZERO
        }
    }

    pub(crate) fn cached(&self) -> Snapshot {
        self.snapshot.lock().unwrap().clone().unwrap_or_default()
    }

    fn has_cache(&self) -> bool {
        self.snapshot.lock().unwrap().is_some()
    }

    /// The read path. Consults the defer policy before touching the network;
    /// deferred reads return the cached snapshot and leave a single debounced
    /// refresh behind.
    pub(crate) async fn update_data(self: &Arc<Self>) -> Result<Snapshot> {
        if self.cooldown.in_no_read_window()
            || self.cooldown.cooldown_remaining() > Duration::ZERO
        {
            self.schedule_debounced_refresh(Duration::ZERO);
            return Ok(self.cached());
        }
        if self.cooldown.is_write_active() {
            let delay = self.jitter(self.tuning.read_deferral_jitter);
            self.schedule_debounced_refresh(delay);
            return Ok(self.cached());
        }

        let id_token = self.ensure_token().await?;

        self.throttle.acquire().await;
        let url = format!("{}{}", self.base_url, shadow_path(&self.serial));
        debug!(serial = %self.serial, "fetching device shadow");
        let response = self
            .http
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .bearer_auth(&id_token)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if status != 200 {
            if is_rate_limited(status, &body) {
                warn!(status, "rate limited fetching device shadow");
                if self.has_cache() {
                    let new_interval = self.backoff_interval();
                    self.cooldown.set_cooldown(new_interval, "read_429");
                    return Ok(self.cached());
                }
                // First-run rate limiting cannot be masked behind a cache.
                return Err(Error::RateLimited(body));
            }
            if is_token_expired(&body) {
                let mut auth = self.auth.lock().unwrap();
                auth.token_rejected = true;
                auth.last_auth_error = Some(body.clone());
            }
            return Err(Error::Api { status, body });
        }

        let data: Value = serde_json::from_str(&body).map_err(|e| Error::Api {
            status,
            body: format!("invalid shadow response: {e}"),
        })?;
        let snapshot = Snapshot::new(parse_reported(&data));

        let events = {
            let mut cached = self.snapshot.lock().unwrap();
            let events = schedule_changes(cached.as_ref(), &snapshot);
            *cached = Some(snapshot.clone());
            events
        };
        self.cooldown.mark_fetch_success();
        self.restore_interval_after_success();

        for event in &events {
            for callback in &self.event_callbacks {
                callback(event);
            }
        }
        self.notify_update(&snapshot);
        Ok(snapshot)
    }

    /// Request a refresh, respecting the defer policy. `allow_debounce` is
    /// false when called from the debounce task itself, preventing an
    /// infinite self-rescheduling loop.
    pub(crate) async fn refresh_request(
        self: &Arc<Self>,
        manual: bool,
        allow_debounce: bool,
    ) -> Result<bool> {
        if self.cooldown.should_defer_read() {
            if allow_debounce {
                let delay = if self.cooldown.is_write_active() {
                    self.jitter(self.tuning.read_deferral_jitter)
                } else {
                    Duration::ZERO
                };
                self.schedule_debounced_refresh(delay);
            }
            if manual {
                debug!("manual refresh deferred (cooldown/write active), serving cached");
            }
            return Ok(false);
        }
        if manual {
            debug!("manual refresh requested, fetching now");
        }
        self.update_data().await?;
        Ok(true)
    }

    /// Ensure a valid bearer token: refresh if possible, full login
    /// otherwise. New tokens are pushed to the `on_tokens` callbacks.
    async fn ensure_token(self: &Arc<Self>) -> Result<String> {
        let (current, needs_auth) = {
            let auth = self.auth.lock().unwrap();
            let needs = match auth.tokens {
                Some(ref tokens) => tokens.is_expired() || auth.token_rejected,
                None => true,
            };
            (auth.tokens.clone(), needs)
        };
        if let Some(ref tokens) = current
            && !needs_auth
        {
            return Ok(tokens.id_token.clone());
        }
        debug!("refreshing authentication tokens (missing, expired, or rejected)");

        if let Some(ref prior) = current
            && prior.refresh_token.is_some()
        {
            self.throttle.acquire().await;
            match auth::refresh(&self.http, &self.base_url, &self.email, prior).await {
                Ok(tokens) => {
                    let id_token = tokens.id_token.clone();
                    self.store_tokens(tokens);
                    return Ok(id_token);
                }
                Err(e) => {
                    debug!(error = %e, "token refresh failed, falling back to full login");
                }
            }
        }

        self.throttle.acquire().await;
        match auth::login(&self.http, &self.base_url, &self.email, &self.password).await {
            Ok(tokens) => {
                let id_token = tokens.id_token.clone();
                self.store_tokens(tokens);
                Ok(id_token)
            }
            Err(e) => {
                self.auth.lock().unwrap().last_auth_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn store_tokens(&self, tokens: AuthTokens) {
        {
            let mut auth = self.auth.lock().unwrap();
            auth.tokens = Some(tokens.clone());
            auth.token_rejected = false;
            auth.last_auth_error = None;
        }
        for callback in &self.token_callbacks {
            callback(&tokens);
        }
    }

    /// Apply an optimistic leaf patch to the cached snapshot, shaped exactly
    /// as the server would report it, and notify listeners.
    fn apply_optimistic(&self, path: &[&str], value: Value) {
        let snapshot = {
            let mut cached = self.snapshot.lock().unwrap();
            let snapshot = cached.get_or_insert_with(Snapshot::default);
            set_nested(snapshot.as_value_mut(), path, value);
            snapshot.clone()
        };
        self.notify_update(&snapshot);
    }

    fn apply_schedule_optimistic(&self, key: &str, patch: &Value) {
        let snapshot = {
            let mut cached = self.snapshot.lock().unwrap();
            let snapshot = cached.get_or_insert_with(Snapshot::default);
            let root = snapshot.as_value_mut();
            if !root.is_object() {
                *root = Value::Object(serde_json::Map::new());
            }
            let schedules = root
                .as_object_mut()
                .expect("snapshot root was just made an object")
                .entry("schedules")
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !schedules.is_object() {
                *schedules = Value::Object(serde_json::Map::new());
            }
            let entry = schedules
                .as_object_mut()
                .expect("schedules was just made an object")
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            deep_merge(entry, patch);
            snapshot.clone()
        };
        self.notify_update(&snapshot);
    }

    pub(crate) fn notify_update(&self, snapshot: &Snapshot) {
        for callback in &self.update_callbacks {
            callback(snapshot);
        }
    }

    async fn shutdown(&self) {
        let worker = self.queue.lock().unwrap().worker.take();
        let debounce = {
            let mut debounce = self.debounce.lock().unwrap();
            debounce.deadline = None;
            debounce.task.take()
        };
        let boost = self.interval.lock().unwrap().boost_task.take();
        for task in [worker, debounce, boost].into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }
    }
}
