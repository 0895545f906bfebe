//! Conversation store: ordered, append-only turn history keyed by
//! conversation id.
//!
//! Two backends ship. [`InMemoryConversationStore`] keeps a sharded map of
//! per-conversation locks so appends to distinct ids never contend.
//! [`SqliteConversationStore`] persists turns in the `turns` table and
//! appends each exchange inside a transaction.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info};

use concierge_core::config::StoreConfig;
use concierge_core::error::ConciergeError;
use concierge_core::types::{NewTurn, Role, Turn};

use crate::db::{storage_err, Database};

/// Contract shared by every conversation backend.
///
/// Unknown ids read as an empty history and are created lazily by the first
/// append. Reads never mutate.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Every stored turn of the conversation, oldest first.
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<Turn>, ConciergeError>;

    /// Append a single turn and return it with its assigned sequence.
    async fn append(&self, conversation_id: &str, turn: NewTurn) -> Result<Turn, ConciergeError>;

    /// Append a user turn and its reply as one unit. No other turn of the
    /// same conversation can land between them.
    async fn append_exchange(
        &self,
        conversation_id: &str,
        user: NewTurn,
        assistant: NewTurn,
    ) -> Result<(), ConciergeError>;

    /// Number of live conversations.
    async fn conversation_count(&self) -> Result<usize, ConciergeError>;

    /// Evict every conversation idle past the expiry as of `now`. Returns
    /// how many were removed.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, ConciergeError>;
}

// =============================================================================
// Retention
// =============================================================================

/// Bounds on how many conversations are kept and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Live conversation cap; `0` disables the cap.
    pub max_conversations: usize,
    /// Idle time after which a conversation is discarded; `None` keeps
    /// conversations forever.
    pub idle_expiry: Option<Duration>,
}

impl RetentionPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_conversations: 0,
            idle_expiry: None,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            max_conversations: config.max_conversations,
            idle_expiry: (config.idle_expiry_minutes > 0)
                .then(|| Duration::minutes(config.idle_expiry_minutes as i64)),
        }
    }

    fn is_expired(&self, last_active: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.idle_expiry
            .map(|expiry| now - last_active > expiry)
            .unwrap_or(false)
    }

    fn over_capacity(&self, count: usize) -> bool {
        self.max_conversations > 0 && count > self.max_conversations
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// =============================================================================
// In-memory backend
// =============================================================================

#[derive(Debug)]
struct ConversationSlot {
    turns: Mutex<Vec<Turn>>,
    last_active_ms: AtomicI64,
}

impl ConversationSlot {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            turns: Mutex::new(Vec::new()),
            last_active_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    fn last_active(&self) -> DateTime<Utc> {
        from_millis(self.last_active_ms.load(Ordering::Acquire))
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.last_active_ms
            .store(now.timestamp_millis(), Ordering::Release);
    }

    /// A writer or reader currently holds the turn log.
    fn is_busy(&self) -> bool {
        self.turns.try_lock().is_err()
    }
}

/// Process-local conversation store.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<String, Arc<ConversationSlot>>,
    retention: RetentionPolicy,
}

impl InMemoryConversationStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            conversations: DashMap::new(),
            retention,
        }
    }

    /// Fetch the slot for `id`, creating it if absent. The shard guard is
    /// released before returning so callers may await on the slot lock.
    fn slot(&self, id: &str, now: DateTime<Utc>) -> (Arc<ConversationSlot>, bool) {
        if let Some(existing) = self.conversations.get(id) {
            return (Arc::clone(existing.value()), false);
        }
        let mut created = false;
        let slot = self
            .conversations
            .entry(id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(ConversationSlot::new(now))
            })
            .value()
            .clone();
        (slot, created)
    }

    /// Whether `slot` is still the live entry for `id`.
    fn is_current(&self, id: &str, slot: &Arc<ConversationSlot>) -> bool {
        self.conversations
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot))
    }

    /// Drop least recently active conversations until back under the cap.
    /// Slots with an append in flight are never evicted, so the cap may be
    /// exceeded briefly.
    fn evict_least_recent(&self, keep: &str) {
        while self.retention.over_capacity(self.conversations.len()) {
            let victim = self
                .conversations
                .iter()
                .filter(|entry| entry.key() != keep && !entry.value().is_busy())
                .min_by_key(|entry| entry.value().last_active_ms.load(Ordering::Acquire))
                .map(|entry| entry.key().clone());

            let Some(id) = victim else { break };
            if self
                .conversations
                .remove_if(&id, |_, slot| !slot.is_busy())
                .is_none()
            {
                break;
            }
            debug!(conversation_id = %id, "Evicted least recently active conversation");
        }
    }

    async fn push_turns(
        &self,
        conversation_id: &str,
        mut turns: Vec<NewTurn>,
    ) -> Result<Vec<Turn>, ConciergeError> {
        let now = Utc::now();

        let (stored, created) = loop {
            let (slot, created) = self.slot(conversation_id, now);
            let mut log = slot.turns.lock().await;
            // Evicted or swept while waiting for the lock.
            if !self.is_current(conversation_id, &slot) {
                continue;
            }
            if self.retention.is_expired(slot.last_active(), now) {
                debug!(conversation_id, "Conversation expired; starting fresh");
                log.clear();
            }
            slot.touch(now);

            let mut stored = Vec::with_capacity(turns.len());
            for turn in turns.drain(..) {
                let turn = turn.into_turn(log.len() as u64, now);
                log.push(turn.clone());
                stored.push(turn);
            }
            break (stored, created);
        };

        if created {
            self.evict_least_recent(conversation_id);
        }
        Ok(stored)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<Turn>, ConciergeError> {
        let slot = match self.conversations.get(conversation_id) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(Vec::new()),
        };
        let log = slot.turns.lock().await;
        if self.retention.is_expired(slot.last_active(), Utc::now()) {
            return Ok(Vec::new());
        }
        Ok(log.clone())
    }

    async fn append(&self, conversation_id: &str, turn: NewTurn) -> Result<Turn, ConciergeError> {
        let mut stored = self.push_turns(conversation_id, vec![turn]).await?;
        stored
            .pop()
            .ok_or_else(|| ConciergeError::Storage("Append produced no turn".to_string()))
    }

    async fn append_exchange(
        &self,
        conversation_id: &str,
        user: NewTurn,
        assistant: NewTurn,
    ) -> Result<(), ConciergeError> {
        self.push_turns(conversation_id, vec![user, assistant]).await?;
        Ok(())
    }

    async fn conversation_count(&self) -> Result<usize, ConciergeError> {
        Ok(self.conversations.len())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, ConciergeError> {
        let before = self.conversations.len();
        self.conversations.retain(|_, slot| {
            slot.is_busy() || !self.retention.is_expired(slot.last_active(), now)
        });
        let removed = before.saturating_sub(self.conversations.len());
        if removed > 0 {
            info!(removed, "Swept idle conversations");
        }
        Ok(removed)
    }
}

// =============================================================================
// SQLite backend
// =============================================================================

/// Conversation store persisted in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    db: Arc<Database>,
    retention: RetentionPolicy,
}

impl SqliteConversationStore {
    pub fn new(db: Arc<Database>, retention: RetentionPolicy) -> Self {
        Self { db, retention }
    }

    /// Run a blocking database closure off the async executor.
    async fn blocking<F, T>(&self, f: F) -> Result<T, ConciergeError>
    where
        F: FnOnce(&Connection, RetentionPolicy) -> Result<T, ConciergeError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let retention = self.retention;
        tokio::task::spawn_blocking(move || db.with_conn(|conn| f(conn, retention)))
            .await
            .map_err(|e| ConciergeError::Storage(format!("Store task panicked: {}", e)))?
    }

    fn insert_turns(
        conn: &Connection,
        retention: RetentionPolicy,
        conversation_id: &str,
        turns: Vec<NewTurn>,
    ) -> Result<Vec<Turn>, ConciergeError> {
        let now = Utc::now();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| storage_err("Failed to begin transaction", e))?;

        let last_active: Option<i64> = tx
            .query_row(
                "SELECT last_active FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_err("Failed to load conversation", e))?;

        let created = match last_active {
            Some(ms) if retention.is_expired(from_millis(ms), now) => {
                tx.execute("DELETE FROM conversations WHERE id = ?1", params![conversation_id])
                    .map_err(|e| storage_err("Failed to expire conversation", e))?;
                true
            }
            Some(_) => false,
            None => true,
        };

        if created {
            tx.execute(
                "INSERT INTO conversations (id, created_at, last_active) VALUES (?1, ?2, ?2)",
                params![conversation_id, now.timestamp_millis()],
            )
            .map_err(|e| storage_err("Failed to create conversation", e))?;
        } else {
            tx.execute(
                "UPDATE conversations SET last_active = ?2 WHERE id = ?1",
                params![conversation_id, now.timestamp_millis()],
            )
            .map_err(|e| storage_err("Failed to touch conversation", e))?;
        }

        let mut next: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), -1) + 1 FROM turns WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .map_err(|e| storage_err("Failed to read next sequence", e))?;

        let mut stored = Vec::with_capacity(turns.len());
        for turn in turns {
            tx.execute(
                "INSERT INTO turns (conversation_id, sequence, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    conversation_id,
                    next,
                    turn.role.to_string(),
                    turn.content,
                    now.timestamp_millis()
                ],
            )
            .map_err(|e| storage_err("Failed to append turn", e))?;
            stored.push(turn.into_turn(next as u64, now));
            next += 1;
        }

        if created {
            let count: i64 = tx
                .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
                .map_err(|e| storage_err("Failed to count conversations", e))?;
            if retention.over_capacity(count as usize) {
                let excess = count - retention.max_conversations as i64;
                let evicted = tx
                    .execute(
                        "DELETE FROM conversations WHERE id IN (
                            SELECT id FROM conversations WHERE id != ?1
                            ORDER BY last_active ASC
                            LIMIT ?2
                         )",
                        params![conversation_id, excess],
                    )
                    .map_err(|e| storage_err("Failed to evict conversations", e))?;
                debug!(evicted, "Evicted least recently active conversations");
            }
        }

        tx.commit()
            .map_err(|e| storage_err("Failed to commit turns", e))?;
        Ok(stored)
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<Turn>, ConciergeError> {
        let id = conversation_id.to_string();
        self.blocking(move |conn, retention| {
            let last_active: Option<i64> = conn
                .query_row(
                    "SELECT last_active FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| storage_err("Failed to load conversation", e))?;

            match last_active {
                None => return Ok(Vec::new()),
                Some(ms) if retention.is_expired(from_millis(ms), Utc::now()) => {
                    return Ok(Vec::new())
                }
                Some(_) => {}
            }

            let mut stmt = conn
                .prepare(
                    "SELECT role, content, sequence, created_at FROM turns
                     WHERE conversation_id = ?1 ORDER BY sequence ASC",
                )
                .map_err(|e| storage_err("Failed to prepare history query", e))?;
            let rows = stmt
                .query_map(params![id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(|e| storage_err("Failed to query history", e))?;

            let mut turns = Vec::new();
            for row in rows {
                let (role, content, sequence, created_at) =
                    row.map_err(|e| storage_err("Failed to read turn", e))?;
                let role: Role = role.parse().map_err(ConciergeError::Storage)?;
                turns.push(Turn {
                    role,
                    content,
                    sequence: sequence as u64,
                    created_at: from_millis(created_at),
                });
            }
            Ok(turns)
        })
        .await
    }

    async fn append(&self, conversation_id: &str, turn: NewTurn) -> Result<Turn, ConciergeError> {
        let id = conversation_id.to_string();
        let mut stored = self
            .blocking(move |conn, retention| Self::insert_turns(conn, retention, &id, vec![turn]))
            .await?;
        stored
            .pop()
            .ok_or_else(|| ConciergeError::Storage("Append produced no turn".to_string()))
    }

    async fn append_exchange(
        &self,
        conversation_id: &str,
        user: NewTurn,
        assistant: NewTurn,
    ) -> Result<(), ConciergeError> {
        let id = conversation_id.to_string();
        self.blocking(move |conn, retention| {
            Self::insert_turns(conn, retention, &id, vec![user, assistant])
        })
        .await?;
        Ok(())
    }

    async fn conversation_count(&self) -> Result<usize, ConciergeError> {
        self.blocking(|conn, _| {
            conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| storage_err("Failed to count conversations", e))
        })
        .await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, ConciergeError> {
        let removed = self
            .blocking(move |conn, retention| {
                let Some(expiry) = retention.idle_expiry else {
                    return Ok(0);
                };
                let cutoff = (now - expiry).timestamp_millis();
                conn.execute(
                    "DELETE FROM conversations WHERE last_active < ?1",
                    params![cutoff],
                )
                .map_err(|e| storage_err("Failed to sweep conversations", e))
            })
            .await?;
        if removed > 0 {
            info!(removed, "Swept idle conversations");
        }
        Ok(removed)
    }
}
