//! Dialog sessions and their storage.
//!
//! A [`Session`] is the durable conversational state of one
//! `(bot, session id)` pair. The [`SessionStore`] keeps exactly one
//! authoritative copy per pair and guards it two ways:
//!
//! - a per-session [`SessionLease`] that serializes processing, and
//! - a `version` compare-and-swap on `save`, so a stale writer fails instead
//!   of overwriting a newer state.

use crate::error::SessionError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parley_core::{BotId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Session variables, name → JSON value.
pub type SessionContext = Map<String, JsonValue>;

/// Composite storage key of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub bot_id: BotId,
    pub session_id: SessionId,
}

impl SessionKey {
    /// Keys the session `session_id` of `bot_id`.
    #[must_use]
    pub fn new(bot_id: BotId, session_id: SessionId) -> Self {
        Self { bot_id, session_id }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bot_id, self.session_id)
    }
}

/// Conversational state of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub bot_id: BotId,
    /// Flow the session is in.
    pub current_flow: String,
    /// Node of `current_flow` the session is on.
    pub current_node: String,
    /// Variables set by actions.
    #[serde(default)]
    pub context: SessionContext,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Number of successful writes. Zero until first stored.
    #[serde(default)]
    pub version: u64,
}

impl Session {
    /// Creates an unstored session positioned on a node.
    #[must_use]
    pub fn new(
        key: SessionKey,
        flow: impl Into<String>,
        node: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: key.session_id,
            bot_id: key.bot_id,
            current_flow: flow.into(),
            current_node: node.into(),
            context: SessionContext::new(),
            created_at: now,
            last_active_at: now,
            version: 0,
        }
    }

    /// The session's storage key.
    #[must_use]
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.bot_id.clone(), self.session_id.clone())
    }

    /// Moves the session to another node.
    pub fn move_to(&mut self, flow: impl Into<String>, node: impl Into<String>) {
        self.current_flow = flow.into();
        self.current_node = node.into();
    }

    /// Merges variables into the context, overwriting existing keys.
    pub fn merge_context(&mut self, updates: SessionContext) {
        self.context.extend(updates);
    }

    /// Returns true if the session was last active before `cutoff`.
    #[must_use]
    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_active_at < cutoff
    }
}

/// Exclusive right to process one session.
///
/// Dropping the lease releases the lock, then runs the release hook if one
/// was set.
pub struct SessionLease {
    key: SessionKey,
    guard: Option<OwnedMutexGuard<()>>,
    on_release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SessionLease {
    /// Wraps an acquired per-session lock.
    #[must_use]
    pub fn new(key: SessionKey, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            key,
            guard: Some(guard),
            on_release: None,
        }
    }

    /// Sets a hook that runs once the lock has been released.
    #[must_use]
    pub fn on_release(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// The leased session.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Storage for dialog sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Acquires the exclusive lease of a session, waiting at most `wait`.
    ///
    /// The session need not exist yet.
    async fn lease(&self, key: &SessionKey, wait: Duration) -> Result<SessionLease, SessionError>;

    /// Loads a session.
    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SessionError>;

    /// Stores a new session and returns it as stored (version 1).
    ///
    /// Fails with [`SessionError::AlreadyExists`] if the key is taken.
    async fn create(&self, session: Session) -> Result<Session, SessionError>;

    /// Replaces a stored session and returns it as stored.
    ///
    /// `session.version` must equal the stored version; the stored copy gets
    /// the next version. Fails with [`SessionError::Conflict`] otherwise.
    async fn save(&self, session: Session) -> Result<Session, SessionError>;

    /// Removes a session once its lease is free, waiting at most `wait`.
    ///
    /// Returns whether a session was removed.
    async fn delete(&self, key: &SessionKey, wait: Duration) -> Result<bool, SessionError>;

    /// Removes sessions idle for longer than `idle_for`.
    ///
    /// Sessions whose lease is held are skipped. Returns the evicted keys.
    async fn evict_idle(&self, idle_for: Duration) -> Result<Vec<SessionKey>, SessionError>;
}

type LeaseTable = Mutex<HashMap<SessionKey, Arc<AsyncMutex<()>>>>;

/// Process-local session store.
///
/// Lock entries live only while a lease is held or awaited.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
    leases: Arc<LeaseTable>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether no session is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_for(&self, key: &SessionKey) -> Arc<AsyncMutex<()>> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(leases.entry(key.clone()).or_default())
    }

    /// Drops lock entries nobody holds or waits for.
    fn prune_leases(&self) {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Removes the lock entry of `key` unless someone else still holds or
/// awaits it.
fn release_lease(leases: &LeaseTable, key: &SessionKey) {
    let mut leases = leases.lock().unwrap_or_else(|e| e.into_inner());
    if leases
        .get(key)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        leases.remove(key);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn lease(&self, key: &SessionKey, wait: Duration) -> Result<SessionLease, SessionError> {
        let lock = self.lock_for(key);
        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => {
                let leases = Arc::clone(&self.leases);
                let released = key.clone();
                Ok(SessionLease::new(key.clone(), guard)
                    .on_release(move || release_lease(&leases, &released)))
            }
            Err(_) => {
                release_lease(&self.leases, key);
                Err(SessionError::Busy {
                    key: key.clone(),
                    waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(key).cloned())
    }

    async fn create(&self, mut session: Session) -> Result<Session, SessionError> {
        let key = session.key();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(&key) {
            return Err(SessionError::AlreadyExists { key });
        }
        session.version = 1;
        sessions.insert(key, session.clone());
        Ok(session)
    }

    async fn save(&self, mut session: Session) -> Result<Session, SessionError> {
        let key = session.key();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let Some(stored) = sessions.get_mut(&key) else {
            return Err(SessionError::NotFound { key });
        };
        if stored.version != session.version {
            return Err(SessionError::Conflict {
                key,
                expected: session.version,
                found: stored.version,
            });
        }
        session.version += 1;
        *stored = session.clone();
        Ok(session)
    }

    async fn delete(&self, key: &SessionKey, wait: Duration) -> Result<bool, SessionError> {
        let lease = self.lease(key, wait).await?;
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some();
        drop(lease);
        Ok(removed)
    }

    async fn evict_idle(&self, idle_for: Duration) -> Result<Vec<SessionKey>, SessionError> {
        let Some(cutoff) = TimeDelta::from_std(idle_for)
            .ok()
            .and_then(|idle_for| Utc::now().checked_sub_signed(idle_for))
        else {
            return Ok(Vec::new());
        };

        let candidates: Vec<SessionKey> = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            sessions
                .values()
                .filter(|s| s.is_idle_since(cutoff))
                .map(Session::key)
                .collect()
        };

        let mut evicted = Vec::new();
        for key in candidates {
            let Ok(_guard) = self.lock_for(&key).try_lock_owned() else {
                debug!(session = %key, "session leased, skipping eviction");
                continue;
            };
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            // Re-check: the session may have been touched since the scan.
            if sessions.get(&key).is_some_and(|s| s.is_idle_since(cutoff)) {
                sessions.remove(&key);
                evicted.push(key);
            }
        }

        self.prune_leases();
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted idle sessions");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bot: &str, session: &str) -> SessionKey {
        SessionKey::new(
            BotId::try_new(bot).unwrap(),
            SessionId::try_new(session).unwrap(),
        )
    }

    fn session(bot: &str, id: &str) -> Session {
        Session::new(key(bot, id), "main", "start")
    }

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemorySessionStore::new();
        let created = store.create(session("bot1", "s1")).await.unwrap();
        assert_eq!(created.version, 1);

        let loaded = store.get(&key("bot1", "s1")).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert!(store.get(&key("bot2", "s1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let store = InMemorySessionStore::new();
        store.create(session("bot1", "s1")).await.unwrap();
        let err = store.create(session("bot1", "s1")).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn save_bumps_version() {
        let store = InMemorySessionStore::new();
        let mut s = store.create(session("bot1", "s1")).await.unwrap();
        s.current_node = "greet".to_string();

        let saved = store.save(s).await.unwrap();

        assert_eq!(saved.version, 2);
        let loaded = store.get(&key("bot1", "s1")).await.unwrap().unwrap();
        assert_eq!(loaded.current_node, "greet");
    }

    #[tokio::test]
    async fn stale_writer_conflicts() {
        let store = InMemorySessionStore::new();
        let original = store.create(session("bot1", "s1")).await.unwrap();

        let mut first = original.clone();
        first.current_node = "a".to_string();
        let mut second = original;
        second.current_node = "b".to_string();

        store.save(first).await.unwrap();
        let err = store.save(second).await.unwrap_err();

        assert_eq!(
            err,
            SessionError::Conflict {
                key: key("bot1", "s1"),
                expected: 1,
                found: 2,
            }
        );
        let loaded = store.get(&key("bot1", "s1")).await.unwrap().unwrap();
        assert_eq!(loaded.current_node, "a");
    }

    #[tokio::test]
    async fn save_without_record_fails() {
        let store = InMemorySessionStore::new();
        let err = store.save(session("bot1", "s1")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_dropped() {
        let store = InMemorySessionStore::new();
        let k = key("bot1", "s1");

        let held = store.lease(&k, WAIT).await.unwrap();
        assert_eq!(held.key(), &k);

        let err = store.lease(&k, WAIT).await.unwrap_err();
        assert!(matches!(err, SessionError::Busy { waited_ms: 50, .. }));

        // Other sessions are unaffected.
        store.lease(&key("bot1", "s2"), WAIT).await.unwrap();

        drop(held);
        store.lease(&k, WAIT).await.unwrap();
    }

    fn lease_entries(store: &InMemorySessionStore) -> usize {
        store.leases.lock().unwrap().len()
    }

    #[tokio::test]
    async fn released_leases_leave_no_lock_entries() {
        let store = InMemorySessionStore::new();

        for i in 0..1000 {
            let lease = store
                .lease(&key("bot1", &format!("s{i}")), WAIT)
                .await
                .unwrap();
            drop(lease);
        }

        assert!(store.is_empty());
        assert_eq!(lease_entries(&store), 0);
    }

    #[tokio::test]
    async fn lock_entry_outlives_a_timed_out_waiter() {
        let store = Arc::new(InMemorySessionStore::new());
        let k = key("bot1", "s1");

        let held = store.lease(&k, WAIT).await.unwrap();
        store.lease(&k, WAIT).await.unwrap_err();
        assert_eq!(lease_entries(&store), 1);

        let waiter = {
            let store = Arc::clone(&store);
            let k = k.clone();
            tokio::spawn(async move {
                let lease = store.lease(&k, Duration::from_secs(5)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                drop(lease);
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert_eq!(lease_entries(&store), 1);

        waiter.await.unwrap();
        assert_eq!(lease_entries(&store), 0);
    }

    #[tokio::test]
    async fn release_hook_runs_after_unlock() {
        let lock = Arc::new(AsyncMutex::new(()));
        let observed = Arc::new(Mutex::new(None));

        let lease = SessionLease::new(key("bot1", "s1"), Arc::clone(&lock).lock_owned().await)
            .on_release({
                let lock = Arc::clone(&lock);
                let observed = Arc::clone(&observed);
                move || *observed.lock().unwrap() = Some(lock.try_lock().is_ok())
            });
        drop(lease);

        assert_eq!(*observed.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn delete_waits_for_lease() {
        let store = Arc::new(InMemorySessionStore::new());
        store.create(session("bot1", "s1")).await.unwrap();
        let k = key("bot1", "s1");

        let held = store.lease(&k, WAIT).await.unwrap();
        let err = store.delete(&k, WAIT).await.unwrap_err();
        assert!(matches!(err, SessionError::Busy { .. }));
        assert_eq!(store.len(), 1);

        let deleter = {
            let store = Arc::clone(&store);
            let k = k.clone();
            tokio::spawn(async move { store.delete(&k, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(deleter.await.unwrap().unwrap());
        assert!(store.is_empty());
        assert!(!store.delete(&k, WAIT).await.unwrap());
    }

    #[tokio::test]
    async fn evict_idle_skips_leased_sessions() {
        let store = InMemorySessionStore::new();
        let long_ago = Utc::now() - TimeDelta::hours(2);

        for id in ["idle", "busy", "fresh"] {
            let mut s = session("bot1", id);
            if id != "fresh" {
                s.last_active_at = long_ago;
            }
            store.create(s).await.unwrap();
        }

        let lease = store.lease(&key("bot1", "busy"), WAIT).await.unwrap();
        let evicted = store.evict_idle(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(evicted, vec![key("bot1", "idle")]);
        assert!(store.get(&key("bot1", "busy")).await.unwrap().is_some());
        assert!(store.get(&key("bot1", "fresh")).await.unwrap().is_some());

        drop(lease);
        let evicted = store.evict_idle(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(evicted, vec![key("bot1", "busy")]);
    }

    #[test]
    fn key_display() {
        assert_eq!(key("bot1", "s1").to_string(), "bot1/s1");
    }

    #[test]
    fn merge_context_overwrites() {
        let mut s = session("bot1", "s1");
        s.context.insert("a".to_string(), JsonValue::from(1));
        let mut updates = SessionContext::new();
        updates.insert("a".to_string(), JsonValue::from(2));
        updates.insert("b".to_string(), JsonValue::from(3));

        s.merge_context(updates);

        assert_eq!(s.context.get("a"), Some(&JsonValue::from(2)));
        assert_eq!(s.context.len(), 2);
    }
}
