//! Background prefetch of upcoming slots.
//!
//! Each fetch runs as a [`TaskPool`] task keyed by entry id, so removing
//! or rescheduling an entry cancels its fetch. At most one task fetches a
//! given content ref; slots that share it are marked cached once that
//! task's asset is admitted. Tasks only write asset files; the index is
//! updated by the owner when the task event arrives.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::{AssetCache, CachedAsset, MediaStore};
use crate::clock::SharedClock;
use crate::error::{KioskError, TaskError};
use crate::protocol::SignedUrl;
use crate::schedule::{SlotBook, SlotState, Timeline};
use crate::task::{TaskEvent, TaskPool};

#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// How far ahead of "now" slots are fetched.
    pub lookahead: chrono::Duration,
    /// Signed URLs expiring within this margin are re-resolved first.
    pub url_margin: chrono::Duration,
    pub max_attempts: u32,
    /// Base delay between attempts, multiplied by the attempt number.
    pub retry_backoff: Duration,
    pub fetch_timeout: Duration,
    /// Wait before a slot whose fetch gave up is tried again.
    pub retry_cooldown: chrono::Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            lookahead: chrono::Duration::minutes(15),
            url_margin: chrono::Duration::seconds(30),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(30),
            retry_cooldown: chrono::Duration::seconds(60),
        }
    }
}

type UrlCache = Arc<Mutex<HashMap<String, SignedUrl>>>;

pub struct Prefetcher {
    store: Arc<dyn MediaStore>,
    clock: SharedClock,
    dir: PathBuf,
    config: PrefetchConfig,
    pool: TaskPool<u64, CachedAsset>,
    /// Content ref of each running fetch, by entry id.
    fetching: HashMap<u64, String>,
    urls: UrlCache,
    cooldown: HashMap<u64, DateTime<Utc>>,
    last_failure: Option<String>,
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("dir", &self.dir)
            .field("in_flight", &self.pool.running_count())
            .finish()
    }
}

impl Prefetcher {
    pub fn new(
        store: Arc<dyn MediaStore>,
        clock: SharedClock,
        dir: impl Into<PathBuf>,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            store,
            clock,
            dir: dir.into(),
            config,
            pool: TaskPool::new(),
            fetching: HashMap::new(),
            urls: Arc::new(Mutex::new(HashMap::new())),
            cooldown: HashMap::new(),
            last_failure: None,
        }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Mark already-cached slots and start fetches for pending slots in
    /// the lookahead window. Returns how many fetches were started.
    pub fn plan(
        &mut self,
        timeline: &Timeline,
        book: &mut SlotBook,
        cache: &AssetCache,
        now: DateTime<Utc>,
    ) -> usize {
        let mut started = 0;
        for slot in timeline.upcoming(now, now + self.config.lookahead) {
            let id = slot.entry.id;
            if book.state(id) != Some(SlotState::Pending) {
                continue;
            }
            if cache.contains(&slot.entry.content_ref) {
                let _ = book.mark_cached(id);
                self.cooldown.remove(&id);
                continue;
            }
            // Too late: the slot will be skipped, not fetched at its start.
            if slot.start() <= now || self.pool.is_running(&id) {
                continue;
            }
            if self.cooldown.get(&id).is_some_and(|not_before| now < *not_before) {
                continue;
            }
            if let Some((owner, _)) = self.fetching.iter().find(|(_, r)| **r == slot.entry.content_ref) {
                debug!(entry_id = id, owner = *owner, "content already being fetched");
                continue;
            }

            let task = fetch_asset(
                Arc::clone(&self.store),
                Arc::clone(&self.urls),
                Arc::clone(&self.clock),
                self.dir.clone(),
                slot.entry.content_ref.clone(),
                self.config.clone(),
            );
            if self.pool.spawn(id, move |_| task) {
                self.fetching.insert(id, slot.entry.content_ref.clone());
                debug!(entry_id = id, content_ref = %slot.entry.content_ref, "prefetch started");
                started += 1;
            }
        }
        started
    }

    pub async fn next_event(&mut self) -> Option<TaskEvent<u64, CachedAsset>> {
        let event = self.pool.recv().await?;
        self.fetching.remove(event.key());
        Some(event)
    }

    /// Remember a failed fetch so it is not retried before the cooldown.
    pub fn record_failure(&mut self, entry_id: u64, reason: &TaskError, now: DateTime<Utc>) {
        warn!(entry_id, "prefetch failed: {reason}");
        self.cooldown.insert(entry_id, now + self.config.retry_cooldown);
        self.last_failure = Some(format!("entry {entry_id}: {reason}"));
    }

    pub fn take_last_failure(&mut self) -> Option<String> {
        self.last_failure.take()
    }

    pub fn cancel(&mut self, entry_id: u64) -> bool {
        self.cooldown.remove(&entry_id);
        self.fetching.remove(&entry_id);
        self.pool.cancel(&entry_id)
    }

    pub fn cancel_all(&mut self) {
        self.fetching.clear();
        self.pool.cancel_all();
    }

    pub fn is_fetching(&self, entry_id: u64) -> bool {
        self.pool.is_running(&entry_id)
    }

    pub fn in_flight(&self) -> usize {
        self.pool.running_count()
    }
}

async fn fetch_asset(
    store: Arc<dyn MediaStore>,
    urls: UrlCache,
    clock: SharedClock,
    dir: PathBuf,
    content_ref: String,
    config: PrefetchConfig,
) -> Result<CachedAsset, TaskError> {
    let attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match fetch_once(store.as_ref(), &urls, clock.now(), &content_ref, &config).await {
            Ok(bytes) => {
                // Write failures are not retried.
                return AssetCache::materialize(&dir, &content_ref, &bytes, clock.now())
                    .await
                    .map_err(|e| TaskError::Failed(e.to_string()));
            }
            Err(e) => {
                debug!(content_ref = %content_ref, attempt, "prefetch attempt failed: {e}");
                last_error = e.to_string();
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.retry_backoff * attempt).await;
        }
    }
    Err(TaskError::Failed(last_error))
}

async fn fetch_once(
    store: &dyn MediaStore,
    urls: &UrlCache,
    now: DateTime<Utc>,
    content_ref: &str,
    config: &PrefetchConfig,
) -> Result<Vec<u8>, KioskError> {
    let known = urls.lock().await.get(content_ref).cloned();
    let url = match known {
        Some(url) if !url.is_stale(now, config.url_margin) => url,
        _ => {
            let url = store.resolve(content_ref).await?;
            urls.lock().await.insert(content_ref.to_string(), url.clone());
            url
        }
    };

    match timeout(config.fetch_timeout, store.download(&url)).await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => {
            // The authorization may have been revoked; resolve afresh next time.
            urls.lock().await.remove(content_ref);
            Err(e)
        }
        Err(_) => Err(KioskError::Prefetch {
            content_ref: content_ref.to_string(),
            reason: format!("download timed out after {:?}", config.fetch_timeout),
        }),
    }
}
