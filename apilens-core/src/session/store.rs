use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::capture::ApiRecord;

pub const SESSION_TTL_MS: u64 = 3_600_000;
pub const MAX_SESSIONS: usize = 100;
pub const CLEANUP_INTERVAL_MS: u64 = 900_000;

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub ttl: Duration,
    pub max_sessions: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(SESSION_TTL_MS),
            max_sessions: MAX_SESSIONS,
        }
    }
}

/// The stored result of one completed capture.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub url: String,
    pub records: Vec<ApiRecord>,
}

impl Session {
    pub fn new(url: impl Into<String>, records: Vec<ApiRecord>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            records,
        }
    }

    pub fn with_id(id: impl Into<String>, url: impl Into<String>, records: Vec<ApiRecord>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            records,
        }
    }
}

/// Owned snapshot handed to readers. Eviction after the snapshot was taken
/// cannot be observed through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub url: String,
    pub records: Vec<ApiRecord>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

#[derive(Debug)]
struct StoredSession {
    session: Session,
    created_at: Instant,
    created_wall: DateTime<Utc>,
    last_accessed_at: Instant,
    last_accessed_wall: DateTime<Utc>,
    access_count: u64,
}

impl StoredSession {
    fn view(&self) -> SessionView {
        SessionView {
            id: self.session.id.clone(),
            url: self.session.url.clone(),
            records: self.session.records.clone(),
            created_at: self.created_wall,
            last_accessed_at: self.last_accessed_wall,
            access_count: self.access_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupRequest {
    pub force: bool,
    pub max_age: Option<Duration>,
}

impl CleanupRequest {
    /// TTL sweep plus LRU enforcement, nothing more.
    pub fn standard() -> Self {
        Self::default()
    }

    pub fn force() -> Self {
        Self {
            force: true,
            max_age: None,
        }
    }

    pub fn max_age_minutes(minutes: u64) -> Self {
        Self {
            force: false,
            max_age: Some(Duration::from_secs(minutes * 60)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub removed: usize,
    pub evicted: usize,
    pub remaining: usize,
}

/// Bounded in-memory session store. The mutex makes every mutation and read
/// mutually exclusive, so a reader never observes a partially evicted map.
///
/// "Not found" deliberately covers never-existed, expired and evicted alike.
#[derive(Debug, Default)]
pub struct SessionStore {
    settings: StoreSettings,
    entries: Mutex<HashMap<String, StoredSession>>,
}

impl SessionStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Inserts a completed capture, evicting least-recently-accessed
    /// sessions whenever the bound would be exceeded. Returns the number of
    /// evictions the insert caused.
    pub fn put(&self, session: Session) -> usize {
        let mut entries = self.entries.lock().expect("session store poisoned");
        let id = session.id.clone();
        let now = Instant::now();
        let wall = Utc::now();
        entries.insert(
            id.clone(),
            StoredSession {
                session,
                created_at: now,
                created_wall: wall,
                last_accessed_at: now,
                last_accessed_wall: wall,
                access_count: 0,
            },
        );
        let evicted = enforce_capacity(&mut entries, self.settings.max_sessions);
        debug!(id = %id, evicted, total = entries.len(), "session stored");
        evicted
    }

    /// Reads a session. Expired entries are filtered here even before a
    /// sweep removes them; a hit bumps the access metadata first, so the
    /// snapshot already reflects this read.
    pub fn get(&self, id: &str) -> Option<SessionView> {
        let mut entries = self.entries.lock().expect("session store poisoned");
        let entry = entries.get_mut(id)?;
        if entry.created_at.elapsed() > self.settings.ttl {
            return None;
        }
        entry.last_accessed_at = Instant::now();
        entry.last_accessed_wall = Utc::now();
        entry.access_count += 1;
        Some(entry.view())
    }

    /// Removes one session. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().expect("session store poisoned");
        entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("session store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cleanup(&self, request: CleanupRequest) -> CleanupStats {
        let mut entries = self.entries.lock().expect("session store poisoned");

        if request.force {
            let removed = entries.len();
            entries.clear();
            return CleanupStats {
                removed,
                evicted: 0,
                remaining: 0,
            };
        }

        let mut removed = 0;
        if let Some(max_age) = request.max_age {
            removed += remove_older_than(&mut entries, max_age);
        }
        removed += remove_older_than(&mut entries, self.settings.ttl);
        let evicted = enforce_capacity(&mut entries, self.settings.max_sessions);

        CleanupStats {
            removed,
            evicted,
            remaining: entries.len(),
        }
    }
}

fn remove_older_than(entries: &mut HashMap<String, StoredSession>, age: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.created_at.elapsed() <= age);
    before - entries.len()
}

fn enforce_capacity(entries: &mut HashMap<String, StoredSession>, max: usize) -> usize {
    let mut evicted = 0;
    while entries.len() > max {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed_at)
            .map(|(id, _)| id.clone());
        match oldest {
            Some(id) => {
                entries.remove(&id);
                evicted += 1;
                debug!(id = %id, "session evicted");
            }
            None => break,
        }
    }
    evicted
}

/// Periodic TTL sweep, independent of the filtering `get` does. Stop it by
/// cancelling the token.
pub fn spawn_cleanup_task(
    store: Arc<SessionStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("session cleanup task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let stats = store.cleanup(CleanupRequest::standard());
                    if stats.removed > 0 || stats.evicted > 0 {
                        info!(
                            removed = stats.removed,
                            evicted = stats.evicted,
                            remaining = stats.remaining,
                            "session sweep"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn store_with(max_sessions: usize, ttl: Duration) -> SessionStore {
        SessionStore::new(StoreSettings { ttl, max_sessions })
    }

    fn session(id: &str) -> Session {
        Session::with_id(id, format!("https://example.com/{id}"), Vec::new())
    }

    #[tokio::test(start_paused = true)]
    async fn expired_sessions_are_never_returned() {
        let store = SessionStore::new(StoreSettings::default());
        store.put(session("s1"));

        advance(Duration::from_millis(SESSION_TTL_MS)).await;
        assert!(store.get("s1").is_some(), "exactly at ttl is still alive");

        advance(Duration::from_millis(1)).await;
        assert!(store.get("s1").is_none(), "past ttl must be filtered");
        // Not swept yet, only filtered.
        assert_eq!(store.len(), 1);

        let stats = store.cleanup(CleanupRequest::standard());
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_bump_access_metadata() {
        let store = SessionStore::new(StoreSettings::default());
        store.put(session("s1"));

        let first = store.get("s1").expect("hit");
        assert_eq!(first.access_count, 1);
        let second = store.get("s1").expect("hit");
        assert_eq!(second.access_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_keeps_the_most_recently_accessed_hundred() {
        let store = store_with(MAX_SESSIONS, Duration::from_secs(86_400));
        for index in 0..(MAX_SESSIONS + 50) {
            store.put(session(&format!("s{index}")));
            advance(Duration::from_millis(1)).await;
        }

        assert_eq!(store.len(), MAX_SESSIONS);
        for index in 0..50 {
            assert!(store.get(&format!("s{index}")).is_none(), "s{index} evicted");
        }
        for index in 50..(MAX_SESSIONS + 50) {
            assert!(store.get(&format!("s{index}")).is_some(), "s{index} kept");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_follows_access_order_not_insertion_order() {
        let store = store_with(3, Duration::from_secs(86_400));
        store.put(session("a"));
        advance(Duration::from_millis(1)).await;
        store.put(session("b"));
        advance(Duration::from_millis(1)).await;
        store.put(session("c"));
        advance(Duration::from_millis(1)).await;

        // Touching "a" makes "b" the least recently accessed.
        store.get("a").expect("hit");
        advance(Duration::from_millis(1)).await;

        let evicted = store.put(session("d"));
        assert_eq!(evicted, 1);
        assert!(store.get("b").is_none());
        assert!(store.get("a").is_some());
        assert!(store.get("c").is_some());
        assert!(store.get("d").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn force_cleanup_clears_everything() {
        let store = SessionStore::new(StoreSettings::default());
        store.put(session("s1"));
        store.put(session("s2"));

        let stats = store.cleanup(CleanupRequest::force());
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.remaining, 0);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn max_age_cleanup_overrides_the_default_ttl() {
        let store = SessionStore::new(StoreSettings::default());
        store.put(session("old"));
        advance(Duration::from_secs(600)).await;
        store.put(session("fresh"));

        let stats = store.cleanup(CleanupRequest::max_age_minutes(5));
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.remaining, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_expired_and_evicted_look_identical() {
        let store = store_with(1, Duration::from_millis(100));
        assert!(store.get("never").is_none());

        store.put(session("expired"));
        advance(Duration::from_millis(101)).await;
        assert!(store.get("expired").is_none());

        store.put(session("first"));
        advance(Duration::from_millis(1)).await;
        store.put(session("second"));
        assert!(store.get("first").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_sessions() {
        let store = Arc::new(store_with(MAX_SESSIONS, Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        let handle = spawn_cleanup_task(Arc::clone(&store), Duration::from_secs(5), cancel.clone());

        store.put(session("s1"));
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            if store.is_empty() {
                break;
            }
        }
        assert!(store.is_empty(), "sweeper removed the expired session");

        cancel.cancel();
        handle.await.expect("sweeper exits cleanly");
    }
}
