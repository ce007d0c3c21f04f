//! The write half of the memory engine: one actor, one mutation at a
//! time.
//!
//! Every mutation arrives as a [`WriteOp`] over an
//! [`mpsc`](tokio::sync::mpsc) channel and is applied as a single SQL
//! statement, so reads stay concurrent while SQLite only ever sees one
//! writer.

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, trace};

use super::{ConversationEntry, Memory, MemoryStatus, WorkspaceEntry};

/// One mutation for the write actor.
#[derive(Debug)]
pub enum WriteOp {
    /// Insert a memory row.
    SaveMemory(Memory),

    /// Insert a conversation-log row.
    SaveConversation(ConversationEntry),

    /// Move a memory to a new lifecycle status.
    UpdateMemoryStatus {
        /// Memory row id.
        id: i64,
        /// New status value.
        status: MemoryStatus,
    },

    /// Delete a memory row (and its FTS index entry, via trigger).
    DeleteMemory {
        /// Memory row id.
        id: i64,
    },

    /// Append a workspace entry.
    SaveWorkspaceEntry(WorkspaceEntry),

    /// Update an editable workspace entry's content.
    UpdateWorkspaceEntry {
        /// Row id.
        id: i64,
        /// New content.
        content: String,
    },

    /// Delete a workspace entry.
    DeleteWorkspaceEntry {
        /// Row id.
        id: i64,
    },
}

/// The actor loop: apply ops until the sender half drops. A failed write
/// is logged and dropped; the next op still runs.
pub async fn run_writer(db: SqlitePool, mut rx: mpsc::Receiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        if let Err(err) = handle_op(&db, &op).await {
            error!(?op, error = %err, "memory write failed");
        }
    }
    trace!("memory writer actor stopped");
}

async fn handle_op(db: &SqlitePool, op: &WriteOp) -> Result<(), sqlx::Error> {
    match op {
        WriteOp::SaveMemory(memory) => {
            let metadata_str = memory.metadata.as_ref().map(|v| v.to_string());
            sqlx::query(
                "INSERT INTO memories (kind, content, metadata, status, source) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(memory.kind.as_str())
            .bind(&memory.content)
            .bind(&metadata_str)
            .bind(memory.status.as_str())
            .bind(memory.source.as_str())
            .execute(db)
            .await?;
            trace!(kind = memory.kind.as_str(), "memory saved");
        }

        WriteOp::SaveConversation(entry) => {
            sqlx::query(
                "INSERT INTO conversations (session_id, role, content, tokens_used) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&entry.session_id)
            .bind(&entry.role)
            .bind(&entry.content)
            .bind(entry.tokens_used)
            .execute(db)
            .await?;
            trace!(session = %entry.session_id, role = %entry.role, "conversation saved");
        }

        WriteOp::UpdateMemoryStatus { id, status } => {
            sqlx::query(
                "UPDATE memories SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            )
            .bind(status.as_str())
            .bind(id)
            .execute(db)
            .await?;
            trace!(id, status = status.as_str(), "memory status updated");
        }

        WriteOp::DeleteMemory { id } => {
            sqlx::query("DELETE FROM memories WHERE id = ?1")
                .bind(id)
                .execute(db)
                .await?;
            trace!(id, "memory deleted");
        }

        WriteOp::SaveWorkspaceEntry(entry) => {
            let event_data_str = entry.event_data.as_ref().map(|v| v.to_string());
            sqlx::query(
                "INSERT INTO workspace_entries \
                 (conversation_id, entry_type, source_layer, content, event_data, source) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&entry.conversation_id)
            .bind(&entry.entry_type)
            .bind(&entry.source_layer)
            .bind(&entry.content)
            .bind(&event_data_str)
            .bind(entry.source.as_str())
            .execute(db)
            .await?;
            trace!(
                conversation_id = %entry.conversation_id,
                entry_type = %entry.entry_type,
                "workspace entry saved"
            );
        }

        WriteOp::UpdateWorkspaceEntry { id, content } => {
            sqlx::query(
                "UPDATE workspace_entries SET content = ?1 WHERE id = ?2 AND source = 'entry'",
            )
            .bind(content)
            .bind(id)
            .execute(db)
            .await?;
            trace!(id, "workspace entry updated");
        }

        WriteOp::DeleteWorkspaceEntry { id } => {
            sqlx::query("DELETE FROM workspace_entries WHERE id = ?1")
                .bind(id)
                .execute(db)
                .await?;
            trace!(id, "workspace entry deleted");
        }
    }
    Ok(())
}
