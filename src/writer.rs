use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::Inner;
use crate::protocol::{desired_document, is_rate_limited, shadow_path, USER_AGENT};
use crate::types::WriteKind;
use crate::{Error, Result};

/// One pending write group: the coalesced payload plus every caller waiting
/// on its outcome.
pub(crate) struct WriteItem {
    kind: WriteKind,
    key: String,
    target: String,
    payload: Value,
    waiters: Vec<oneshot::Sender<std::result::Result<(), String>>>,
    extra_delay: Duration,
}

/// Per-device write queue. Items are keyed by `kind:target`; a second write
/// to the same key before the worker dequeues it merges into the first
/// instead of producing another network call.
#[derive(Default)]
pub(crate) struct WriteQueue {
    pending: HashMap<String, WriteItem>,
    order: VecDeque<String>,
    pub(crate) worker: Option<JoinHandle<()>>,
}

impl Inner {
    /// Queue a write and wait for it to execute. Callers whose writes were
    /// merged into an earlier pending item observe that item's outcome.
    pub(crate) async fn enqueue_write(
        self: &Arc<Self>,
        kind: WriteKind,
        target: String,
        payload: Value,
        extra_delay: Duration,
    ) -> Result<()> {
        let key = format!("{}:{}", kind.as_str(), target);
        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.queue.lock().unwrap();
            self.cooldown.extend_no_read(self.tuning.no_read_window);
            match queue.pending.get_mut(&key) {
                Some(existing) => {
                    if kind == WriteKind::Schedule {
                        crate::protocol::deep_merge(&mut existing.payload, &payload);
                    } else {
                        existing.payload = payload;
                    }
                    existing.extra_delay = existing.extra_delay.max(extra_delay);
                    existing.waiters.push(tx);
                    debug!(key = %key, "coalesced write into pending item");
                }
                None => {
                    queue.pending.insert(
                        key.clone(),
                        WriteItem {
                            kind,
                            key: key.clone(),
                            target,
                            payload,
                            waiters: vec![tx],
                            extra_delay,
                        },
                    );
                    queue.order.push_back(key.clone());
                }
            }
            if queue.worker.as_ref().is_none_or(|w| w.is_finished()) {
                let session = Arc::clone(self);
                queue.worker = Some(tokio::spawn(async move {
                    session.write_worker().await;
                }));
            }
        }

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(Error::Write { key, reason }),
            Err(_) => Err(Error::Write {
                key,
                reason: "write worker shut down".to_string(),
            }),
        }
    }

    /// Drains the queue one item at a time, then exits; a later enqueue
    /// starts a fresh worker. At most one write is in flight per device.
    async fn write_worker(self: Arc<Self>) {
        loop {
            let item = {
                let mut queue = self.queue.lock().unwrap();
                match queue.order.pop_front() {
                    Some(key) => queue.pending.remove(&key),
                    None => return,
                }
            };
            let Some(mut item) = item else { continue };

            let cooldown = self.cooldown.cooldown_remaining();
            if cooldown > Duration::ZERO {
                tokio::time::sleep(cooldown).await;
            }

            self.cooldown.begin_write();
            let result = self.execute_write(&item).await;
            match result {
                Ok(()) => {
                    for tx in item.waiters.drain(..) {
                        let _ = tx.send(Ok(()));
                    }
                    self.cooldown.set_cooldown(
                        self.tuning.post_write_cooldown + item.extra_delay,
                        "post_write",
                    );
                    self.cooldown.mark_write_quiet(self.tuning.post_write_cooldown);
                    if item.kind == WriteKind::Schedule {
                        self.schedule_debounced_refresh(self.tuning.schedule_refresh_delay);
                    }
                }
                Err(e) => {
                    warn!(key = %item.key, error = %e, "write failed");
                    let reason = e.to_string();
                    for tx in item.waiters.drain(..) {
                        let _ = tx.send(Err(reason.clone()));
                    }
                    // The optimistic patch is now unconfirmed; pull the
                    // server's state to reconcile once reads reopen.
                    self.schedule_debounced_refresh(Duration::ZERO);
                }
            }
            self.cooldown.end_write();

            tokio::time::sleep(self.tuning.write_gap).await;
        }
    }

    async fn execute_write(&self, item: &WriteItem) -> Result<()> {
        let id_token = self
            .auth
            .lock()
            .unwrap()
            .tokens
            .as_ref()
            .map(|t| t.id_token.clone())
            .ok_or(Error::NotAuthenticated)?;

        let document = desired_document(item.kind, &item.target, &item.payload);
        self.throttle.acquire().await;
        let url = format!("{}{}", self.base_url, shadow_path(&self.serial));
        debug!(key = %item.key, "writing desired state");
        let response = self
            .http
            .post(&url)
            .header("User-Agent", USER_AGENT)
            .bearer_auth(&id_token)
            .json(&document)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if is_rate_limited(status, &body) {
            let configured = self.interval.lock().unwrap().configured_secs;
            self.cooldown
                .set_cooldown(Duration::from_secs(configured), "write_429");
            return Err(Error::RateLimited(body));
        }
        if status != 200 {
            return Err(Error::Api { status, body });
        }
        Ok(())
    }
}
