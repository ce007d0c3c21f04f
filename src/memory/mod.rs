//! SQLite-backed store for facts, the conversation log, and the
//! orchestrator's workspace entries.
//!
//! [`MemoryEngine`] is the sole gateway to `memory.db`. Reads run
//! concurrently against the pool; every mutation goes through one writer
//! actor behind an [`mpsc`] channel, so SQLite never sees competing
//! writers. Vector search is optional: with no embedder configured,
//! search is FTS5 alone.

pub mod embedder;
pub mod search;
pub mod writer;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{info, warn};

use self::embedder::Embedder;
use self::writer::WriteOp;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Declares an enum stored as text in SQLite: `as_str` renders the
/// canonical form for binding, `parse` reads it back, and anything else
/// is a [`MemoryError::InvalidEnum`] naming the column.
macro_rules! storage_enum {
    (
        $(#[$meta:meta])*
        $name:ident stored in $field:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Canonical string stored in SQLite.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            /// Parse a SQLite text value.
            ///
            /// # Errors
            ///
            /// Returns an error for an unrecognised value.
            pub fn parse(s: &str) -> Result<Self, MemoryError> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(MemoryError::InvalidEnum {
                        field: $field,
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

storage_enum! {
    /// Kind of memory stored.
    MemoryKind stored in "kind" {
        /// A declarative fact (e.g. "user prefers dark mode").
        Fact => "fact",
        /// A step-by-step procedure (e.g. "how to deploy the app").
        Procedure => "procedure",
        /// A conversation episode summary.
        Episode => "episode",
        /// A reusable skill or tool reference.
        Skill => "skill",
    }
}

storage_enum! {
    /// Lifecycle status of a memory entry.
    MemoryStatus stored in "status" {
        /// Included in search results.
        Active => "active",
        /// Awaiting promotion to active.
        Pending => "pending",
        /// Kept for history, excluded from search.
        Archived => "archived",
    }
}

storage_enum! {
    /// Origin that created a memory.
    MemorySource stored in "source" {
        /// Stored on an explicit user request ("remember that ...").
        User => "user",
        /// Harvested by a background observation pass.
        Observer => "observer",
        /// Written by the assistant itself mid-turn.
        Agent => "agent",
    }
}

/// One stored memory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Row id, `None` until persisted.
    pub id: Option<i64>,
    /// What kind of knowledge this row holds.
    pub kind: MemoryKind,
    /// The text itself.
    pub content: String,
    /// JSON side data: provenance, tags, the stored embedding vector.
    pub metadata: Option<serde_json::Value>,
    /// Lifecycle status.
    pub status: MemoryStatus,
    /// Who created it.
    pub source: MemorySource,
    /// ISO-8601 creation timestamp, set by SQLite on insert.
    pub created_at: Option<String>,
    /// ISO-8601 last-update timestamp, set by SQLite on insert/update.
    pub updated_at: Option<String>,
}

/// One turn in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Conversation/session identifier.
    pub session_id: String,
    /// `user`, `assistant`, `tool_call`, or `tool_result`.
    pub role: String,
    /// Turn text.
    pub content: String,
    /// Tokens this turn consumed, when the provider reported them.
    pub tokens_used: Option<i32>,
}

storage_enum! {
    /// Whether a workspace entry is user-editable or a read-only
    /// projection of an event.
    EntrySource stored in "_source" {
        /// User-editable row.
        Entry => "entry",
        /// Read-only row, projected from an event.
        Event => "event",
    }
}

impl EntrySource {
    /// Whether a row from this source may be edited in place.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Entry)
    }
}

/// A single row written to the orchestrator's workspace log.
///
/// The orchestrator writes one of these for the user message, each tool
/// result, and any approval request, in that order, for every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    /// Row id (`None` for entries not yet persisted).
    pub id: Option<i64>,
    /// Conversation this entry belongs to.
    pub conversation_id: String,
    /// What kind of entry this is (`user_message`, `tool_result`,
    /// `approval_requested`, `final_assistant`, ...).
    pub entry_type: String,
    /// Which pipeline layer produced this entry.
    pub source_layer: String,
    /// Entry body. For `entry_type="approval_requested"` this is a JSON
    /// object carrying `{skill_name, missing_packages}`.
    pub content: String,
    /// Structured event payload, present when `source = event`.
    pub event_data: Option<serde_json::Value>,
    /// Whether this row may be edited (`entry`) or is read-only (`event`).
    pub source: EntrySource,
    /// ISO-8601 creation timestamp (set by SQLite on insert).
    pub created_at: Option<String>,
}

impl WorkspaceEntry {
    /// Build the one shape an `approval_requested` entry is allowed to take:
    /// `content` always carries `{skill_name, missing_packages}`.
    pub fn approval_requested(
        conversation_id: impl Into<String>,
        source_layer: impl Into<String>,
        skill_name: &str,
        missing_packages: &[String],
    ) -> Self {
        let content = serde_json::json!({
            "skill_name": skill_name,
            "missing_packages": missing_packages,
        })
        .to_string();
        Self {
            id: None,
            conversation_id: conversation_id.into(),
            entry_type: "approval_requested".to_owned(),
            source_layer: source_layer.into(),
            content,
            event_data: None,
            source: EntrySource::Event,
            created_at: None,
        }
    }

    /// A plain, editable entry (user message, final assistant text).
    pub fn entry(
        conversation_id: impl Into<String>,
        entry_type: impl Into<String>,
        source_layer: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            conversation_id: conversation_id.into(),
            entry_type: entry_type.into(),
            source_layer: source_layer.into(),
            content: content.into(),
            event_data: None,
            source: EntrySource::Entry,
            created_at: None,
        }
    }

    /// A read-only event row (tool result).
    pub fn event(
        conversation_id: impl Into<String>,
        entry_type: impl Into<String>,
        source_layer: impl Into<String>,
        content: impl Into<String>,
        event_data: serde_json::Value,
    ) -> Self {
        Self {
            id: None,
            conversation_id: conversation_id.into(),
            entry_type: entry_type.into(),
            source_layer: source_layer.into(),
            content: content.into(),
            event_data: Some(event_data),
            source: EntrySource::Event,
            created_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from memory engine operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Write channel is closed (writer actor stopped).
    #[error("memory writer channel closed")]
    WriterClosed,

    /// Embedding generation failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// An invalid enum value was read from the database.
    #[error("invalid {field} value: {value:?}")]
    InvalidEnum {
        /// Which field contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// Content exceeds the maximum allowed size.
    #[error("content too large: {size} bytes exceeds {max} byte limit")]
    ContentTooLarge {
        /// Actual content size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Writer channel capacity — bounded to provide backpressure.
const WRITER_CHANNEL_CAPACITY: usize = 1024;

/// Maximum allowed content size in bytes for a single memory or conversation entry.
///
/// Prevents unbounded storage from a single write. 64 KiB is generous for
/// text content while preventing accidental multi-megabyte entries.
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Central memory engine managing persistence, search, and write serialization.
///
/// All reads go directly through the connection pool (concurrent).
/// All writes go through a single-writer actor via [`mpsc`].
pub struct MemoryEngine {
    /// Connection pool for reads.
    db: SqlitePool,
    /// Channel to the single-writer actor.
    writer_tx: mpsc::Sender<WriteOp>,
    /// Writer actor join handle (held so we can await on shutdown).
    writer_handle: tokio::task::JoinHandle<()>,
    /// Optional embedder for vector search.
    embedder: Option<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("embedder", &self.embedder.is_some())
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Create a new memory engine backed by the given SQLite pool.
    ///
    /// Spawns the single-writer actor as a background Tokio task.
    /// If an [`Embedder`] is provided, vector search is enabled.
    pub async fn new(
        db: SqlitePool,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self, MemoryError> {
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let writer_pool = db.clone();
        let writer_handle = tokio::spawn(writer::run_writer(writer_pool, writer_rx));

        info!(embedder = embedder.is_some(), "memory engine initialised");

        Ok(Self {
            db,
            writer_tx,
            writer_handle,
            embedder,
        })
    }

    /// Search memories using FTS5 (and optionally vector similarity).
    ///
    /// Returns up to `limit` active memories ranked by relevance.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Memory>, MemoryError> {
        search::search(&self.db, self.embedder.as_deref(), query, limit).await
    }

    /// Persist a new memory entry.
    ///
    /// The entry is sent to the single-writer actor for serialized insertion.
    /// If an embedder is configured the embedding is computed before sending.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::WriterClosed`] if the writer actor has stopped.
    pub async fn save_memory(&self, mut memory: Memory) -> Result<(), MemoryError> {
        if memory.content.len() > MAX_CONTENT_SIZE {
            return Err(MemoryError::ContentTooLarge {
                size: memory.content.len(),
                max: MAX_CONTENT_SIZE,
            });
        }

        // The embedding vector rides in metadata; the vector half of
        // hybrid search reads it back from there.
        if let Some(ref emb) = self.embedder {
            match emb.embed(&memory.content).await {
                Ok(embedding) => {
                    let mut meta = memory
                        .metadata
                        .take()
                        .unwrap_or_else(|| serde_json::json!({}));
                    if let Some(obj) = meta.as_object_mut() {
                        obj.insert("embedding".to_owned(), serde_json::json!(embedding));
                    }
                    memory.metadata = Some(meta);
                }
                Err(err) => {
                    warn!(error = %err, "embedding generation failed; saving without embedding");
                }
            }
        }
        self.writer_tx
            .send(WriteOp::SaveMemory(memory))
            .await
            .map_err(|_| MemoryError::WriterClosed)
    }

    /// Persist a conversation log entry.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::WriterClosed`] if the writer actor has stopped.
    pub async fn save_conversation(&self, entry: ConversationEntry) -> Result<(), MemoryError> {
        if entry.content.len() > MAX_CONTENT_SIZE {
            return Err(MemoryError::ContentTooLarge {
                size: entry.content.len(),
                max: MAX_CONTENT_SIZE,
            });
        }
        self.writer_tx
            .send(WriteOp::SaveConversation(entry))
            .await
            .map_err(|_| MemoryError::WriterClosed)
    }

    /// Update the status of an existing memory entry.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::WriterClosed`] if the writer actor has stopped.
    pub async fn update_memory_status(
        &self,
        id: i64,
        status: MemoryStatus,
    ) -> Result<(), MemoryError> {
        self.writer_tx
            .send(WriteOp::UpdateMemoryStatus { id, status })
            .await
            .map_err(|_| MemoryError::WriterClosed)
    }

    /// Search memories filtered by status, ordered by most recently updated.
    ///
    /// Returns up to `limit` memories with the given status.
    pub async fn search_by_status(
        &self,
        status: MemoryStatus,
        limit: usize,
    ) -> Result<Vec<Memory>, MemoryError> {
        search::search_by_status(&self.db, status.as_str(), limit).await
    }

    /// Delete a memory by its row id.
    ///
    /// The deletion is sent to the single-writer actor for serialized execution.
    /// Both the `memories` row and its corresponding FTS5 index entry are removed
    /// (via the `memories_ad` trigger).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::WriterClosed`] if the writer actor has stopped.
    pub async fn delete_memory(&self, id: i64) -> Result<(), MemoryError> {
        self.writer_tx
            .send(WriteOp::DeleteMemory { id })
            .await
            .map_err(|_| MemoryError::WriterClosed)
    }

    /// Count the number of memories with the given status.
    pub async fn count_by_status(&self, status: MemoryStatus) -> Result<u64, MemoryError> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM memories WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.db)
            .await?;
        // count(*) is always non-negative, safe to cast.
        Ok(row.0.cast_unsigned())
    }

    /// Get the database file size in bytes for health reporting.
    ///
    /// Uses SQLite's `page_count * page_size` PRAGMA to compute the size.
    /// This works for both file-backed and in-memory databases.
    pub async fn db_size_bytes(&self) -> Result<u64, MemoryError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.db)
        .await
        .map_err(MemoryError::Database)?;
        // page_count * page_size is always non-negative, safe to cast.
        Ok(row.0.cast_unsigned())
    }

    /// Returns `true` if an embedding model is configured for vector search.
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Search conversations by session id.
    pub async fn search_conversations(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>, MemoryError> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(String, String, String, Option<i32>)> = sqlx::query_as(
            "SELECT session_id, role, content, tokens_used \
             FROM conversations \
             WHERE session_id = ?1 \
             ORDER BY id ASC \
             LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit_i64)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(sid, role, content, tokens)| ConversationEntry {
                session_id: sid,
                role,
                content,
                tokens_used: tokens,
            })
            .collect())
    }

    /// Returns a reference to the underlying SQLite pool (for migrations, etc.).
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Append a workspace entry (user message, tool result, or approval
    /// request). The orchestrator is responsible for calling this in
    /// `created_at`-order for a given conversation.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::WriterClosed`] if the writer actor has stopped.
    pub async fn save_workspace_entry(&self, entry: WorkspaceEntry) -> Result<(), MemoryError> {
        if entry.content.len() > MAX_CONTENT_SIZE {
            return Err(MemoryError::ContentTooLarge {
                size: entry.content.len(),
                max: MAX_CONTENT_SIZE,
            });
        }
        self.writer_tx
            .send(WriteOp::SaveWorkspaceEntry(entry))
            .await
            .map_err(|_| MemoryError::WriterClosed)
    }

    /// Update an editable (`entry`) workspace row's content.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::WriterClosed`] if the writer actor has stopped.
    pub async fn update_workspace_entry(
        &self,
        id: i64,
        content: String,
    ) -> Result<(), MemoryError> {
        self.writer_tx
            .send(WriteOp::UpdateWorkspaceEntry { id, content })
            .await
            .map_err(|_| MemoryError::WriterClosed)
    }

    /// Delete a workspace row by id.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::WriterClosed`] if the writer actor has stopped.
    pub async fn delete_workspace_entry(&self, id: i64) -> Result<(), MemoryError> {
        self.writer_tx
            .send(WriteOp::DeleteWorkspaceEntry { id })
            .await
            .map_err(|_| MemoryError::WriterClosed)
    }

    /// Fetch one workspace entry by row id.
    pub async fn get_workspace_entry(&self, id: i64) -> Result<Option<WorkspaceEntry>, MemoryError> {
        search::get_workspace_entry(&self.db, id).await
    }

    /// List workspace entries for a conversation, oldest first (strictly
    /// non-decreasing in `created_at`).
    pub async fn list_workspace_entries(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkspaceEntry>, MemoryError> {
        search::list_workspace_entries(&self.db, conversation_id, limit).await
    }

    /// Gracefully shut down the writer actor.
    ///
    /// Drops the sender channel and awaits the writer task to drain.
    pub async fn shutdown(self) {
        drop(self.writer_tx);
        let _ = self.writer_handle.await;
        info!("memory engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine() -> MemoryEngine {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
        MemoryEngine::new(pool, None).await.expect("engine init")
    }

    fn fact(content: &str) -> Memory {
        Memory {
            id: None,
            kind: MemoryKind::Fact,
            content: content.to_owned(),
            metadata: None,
            status: MemoryStatus::Active,
            source: MemorySource::User,
            created_at: None,
            updated_at: None,
        }
    }

    // Writes go through the actor; a short sleep lets it apply them
    // before the test reads back.
    async fn drain_writer(_engine: &MemoryEngine) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn saved_fact_is_found_by_full_text_search() {
        let engine = engine().await;
        engine.save_memory(fact("the user prefers dark roast coffee")).await.unwrap();
        drain_writer(&engine).await;

        let hits = engine.search("coffee", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("dark roast"));
    }

    #[tokio::test]
    async fn archived_memories_are_excluded_from_search() {
        let engine = engine().await;
        engine.save_memory(fact("the cat is named Miso")).await.unwrap();
        drain_writer(&engine).await;

        let id = engine.search("Miso", 1).await.unwrap()[0].id.unwrap();
        engine.update_memory_status(id, MemoryStatus::Archived).await.unwrap();
        drain_writer(&engine).await;

        assert!(engine.search("Miso", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_content_is_refused_before_the_writer() {
        let engine = engine().await;
        let oversized = "x".repeat(MAX_CONTENT_SIZE + 1);
        let result = engine.save_memory(fact(&oversized)).await;
        assert!(matches!(result, Err(MemoryError::ContentTooLarge { .. })));
    }

    #[tokio::test]
    async fn workspace_entries_list_in_insertion_order() {
        let engine = engine().await;
        engine
            .save_workspace_entry(WorkspaceEntry::entry("c1", "user_message", "orchestrator", "hi"))
            .await
            .unwrap();
        engine
            .save_workspace_entry(WorkspaceEntry::event(
                "c1",
                "tool_result",
                "output_layer",
                "42",
                serde_json::json!({"tool_name": "calc"}),
            ))
            .await
            .unwrap();
        engine
            .save_workspace_entry(WorkspaceEntry::entry("c1", "final_assistant", "output_layer", "done"))
            .await
            .unwrap();
        drain_writer(&engine).await;

        let entries = engine.list_workspace_entries("c1", 10).await.unwrap();
        let types: Vec<&str> = entries.iter().map(|e| e.entry_type.as_str()).collect();
        assert_eq!(types, vec!["user_message", "tool_result", "final_assistant"]);

        let stamps: Vec<&String> = entries.iter().filter_map(|e| e.created_at.as_ref()).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted, "created_at never decreases down the list");
    }

    #[tokio::test]
    async fn update_only_touches_editable_rows() {
        let engine = engine().await;
        engine
            .save_workspace_entry(WorkspaceEntry::event(
                "c1",
                "tool_result",
                "output_layer",
                "original",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        drain_writer(&engine).await;

        let id = engine.list_workspace_entries("c1", 1).await.unwrap()[0].id.unwrap();
        engine.update_workspace_entry(id, "tampered".to_owned()).await.unwrap();
        drain_writer(&engine).await;

        let entry = engine.get_workspace_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.content, "original");
    }

    #[tokio::test]
    async fn approval_entry_carries_skill_name_and_missing_packages() {
        let entry = WorkspaceEntry::approval_requested(
            "c1",
            "skill_server",
            "demo",
            &["acme-widget".to_owned()],
        );
        let content: serde_json::Value = serde_json::from_str(&entry.content).unwrap();
        assert_eq!(content["skill_name"], "demo");
        assert_eq!(content["missing_packages"], serde_json::json!(["acme-widget"]));
        assert_eq!(entry.source, EntrySource::Event);
    }

    #[tokio::test]
    async fn conversation_log_round_trips_per_session() {
        let engine = engine().await;
        engine
            .save_conversation(ConversationEntry {
                session_id: "s1".to_owned(),
                role: "user".to_owned(),
                content: "hello".to_owned(),
                tokens_used: None,
            })
            .await
            .unwrap();
        engine
            .save_conversation(ConversationEntry {
                session_id: "s2".to_owned(),
                role: "user".to_owned(),
                content: "other session".to_owned(),
                tokens_used: Some(3),
            })
            .await
            .unwrap();
        drain_writer(&engine).await;

        let s1 = engine.search_conversations("s1", 10).await.unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].content, "hello");
    }
}
