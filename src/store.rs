//! Verification session store.
//!
//! Holds one record per pending verification plus a time-ordered index of
//! pending sessions for the idle reaper. The `resolve` operation is the
//! correctness primitive for the whole bot: it atomically removes a
//! session from both the record map and the pending index, so under
//! concurrent resolution attempts (user answer, admin override, idle
//! sweep) exactly one caller receives the session and applies moderation
//! side effects. Losing callers receive `None` and treat the session as
//! already handled.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Error types for session store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// A pending session already exists for the key.
    #[error("pending session already exists: {0}")]
    Conflict(SessionKey),
    /// Backend failure (network KV implementations).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Identifies one pending verification: a candidate user in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub group_id: i64,
    pub user_id: i64,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.group_id, self.user_id)
    }
}

/// One pending challenge for a candidate in a group.
///
/// All fields are immutable for the session's life; resolution removes
/// the record instead of mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSession {
    pub group_id: i64,
    pub candidate_user_id: i64,
    /// Id of the bot's challenge message, deleted on resolution.
    pub challenge_message_id: i64,
    /// The correct answer.
    pub secret: String,
    /// Creation time, Unix ms.
    pub created_at: i64,
}

impl VerificationSession {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            group_id: self.group_id,
            user_id: self.candidate_user_id,
        }
    }
}

/// One entry of the pending queue, as seen by the idle reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    pub group_id: i64,
    pub user_id: i64,
    /// Creation time, Unix ms.
    pub created_at: i64,
}

/// Storage contract for pending verification sessions.
///
/// Implementable over any backend with an atomic remove; every resolution
/// path must go through [`SessionStore::resolve`] rather than separate
/// read-then-delete steps.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new pending session and insert it into the pending queue
    /// as one atomic unit. Fails with [`StoreError::Conflict`] if a
    /// pending session already exists for the key, leaving the existing
    /// session untouched.
    async fn put(&self, session: VerificationSession) -> Result<(), StoreError>;

    /// Fetch a pending session without resolving it.
    async fn get(&self, group_id: i64, user_id: i64) -> Option<VerificationSession>;

    /// Atomically remove a pending session from the record store and the
    /// pending queue, returning it. Returns `None` (not an error) if no
    /// pending session exists; only the caller that wins the removal may
    /// apply moderation side effects.
    async fn resolve(&self, group_id: i64, user_id: i64) -> Option<VerificationSession>;

    /// Snapshot of the pending queue in creation order. Entries resolved
    /// after the snapshot are tolerated: `resolve` on them is a no-op.
    async fn scan_pending(&self) -> Vec<PendingEntry>;
}

/// In-process store: a record map plus a creation-time-ordered index,
/// both guarded by a single mutex so `put` and `resolve` update them as
/// one atomic unit. The mutex is never held across an await.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<SessionKey, VerificationSession>,
    /// (created_at, key) pairs; BTreeSet iteration yields oldest first.
    queue: BTreeSet<(i64, SessionKey)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put(&self, session: VerificationSession) -> Result<(), StoreError> {
        let key = session.key();
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&key) {
            return Err(StoreError::Conflict(key));
        }
        inner.queue.insert((session.created_at, key));
        inner.sessions.insert(key, session);
        Ok(())
    }

    async fn get(&self, group_id: i64, user_id: i64) -> Option<VerificationSession> {
        let key = SessionKey { group_id, user_id };
        self.inner.lock().sessions.get(&key).cloned()
    }

    async fn resolve(&self, group_id: i64, user_id: i64) -> Option<VerificationSession> {
        let key = SessionKey { group_id, user_id };
        let mut inner = self.inner.lock();
        let session = inner.sessions.remove(&key)?;
        inner.queue.remove(&(session.created_at, key));
        Some(session)
    }

    async fn scan_pending(&self) -> Vec<PendingEntry> {
        self.inner
            .lock()
            .queue
            .iter()
            .map(|&(created_at, key)| PendingEntry {
                group_id: key.group_id,
                user_id: key.user_id,
                created_at,
            })
            .collect()
    }
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
