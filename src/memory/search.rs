//! Read side of the memory engine: hybrid fact search and workspace
//! queries.
//!
//! Fact search runs FTS5 always, and, when an embedder is configured,
//! cosine-ranks stored embedding vectors and merges the two rankings with
//! Reciprocal Rank Fusion. An embedding failure mid-search degrades to the
//! FTS5 ranking alone rather than failing the query.

use sqlx::SqlitePool;
use tracing::debug;

use super::embedder::Embedder;
use super::{EntrySource, Memory, MemoryError, MemoryKind, MemorySource, MemoryStatus, WorkspaceEntry};

/// How many active memories the vector pass scans per query. Brute-force
/// cosine over a bounded recent window, not an index.
const VECTOR_SCAN_LIMIT: usize = 256;

/// Raw row returned by the FTS5 query.
///
/// Fields: `(id, kind, content, metadata, status, source, created_at, updated_at)`.
type MemoryRow = (
    i64,
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
);

/// Search active memories, ranked by relevance, up to `limit`.
pub async fn search(
    db: &SqlitePool,
    embedder: Option<&dyn Embedder>,
    query: &str,
    limit: usize,
) -> Result<Vec<Memory>, MemoryError> {
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let fts_results = fts5_search(db, query, limit).await?;

    let Some(embedder) = embedder else {
        return Ok(fts_results);
    };

    let query_vector = match embedder.embed(query).await {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "query embedding failed, serving FTS ranking only");
            return Ok(fts_results);
        }
    };

    let vector_results = vector_search(db, &query_vector, limit).await?;
    Ok(rrf_merge(fts_results, vector_results, limit))
}

/// Full-text search via FTS5 MATCH, restricted to active memories.
async fn fts5_search(
    db: &SqlitePool,
    query: &str,
    limit: usize,
) -> Result<Vec<Memory>, MemoryError> {
    let sanitised = sanitise_fts5_query(query);
    if sanitised.is_empty() {
        return Ok(Vec::new());
    }

    let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);

    let rows: Vec<MemoryRow> = sqlx::query_as(
        "SELECT m.id, m.kind, m.content, m.metadata, m.status, m.source, \
                    m.created_at, m.updated_at \
             FROM memories_fts f \
             JOIN memories m ON f.rowid = m.id \
             WHERE memories_fts MATCH ?1 \
               AND m.status = 'active' \
             ORDER BY f.rank \
             LIMIT ?2",
    )
    .bind(&sanitised)
    .bind(limit_i64)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(row_to_memory).collect()
}

/// Cosine-rank the most recent active memories that carry a stored
/// embedding vector in their metadata.
async fn vector_search(
    db: &SqlitePool,
    query_vector: &[f32],
    limit: usize,
) -> Result<Vec<Memory>, MemoryError> {
    let scan_limit = i64::try_from(VECTOR_SCAN_LIMIT).unwrap_or(i64::MAX);
    let rows: Vec<MemoryRow> = sqlx::query_as(
        "SELECT id, kind, content, metadata, status, source, created_at, updated_at \
             FROM memories \
             WHERE status = 'active' AND metadata IS NOT NULL \
             ORDER BY id DESC \
             LIMIT ?1",
    )
    .bind(scan_limit)
    .fetch_all(db)
    .await?;

    let mut scored: Vec<(f32, Memory)> = Vec::new();
    for row in rows {
        let memory = row_to_memory(row)?;
        let Some(vector) = stored_embedding(&memory) else {
            continue;
        };
        scored.push((cosine_similarity(query_vector, &vector), memory));
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored.into_iter().take(limit).map(|(_, m)| m).collect())
}

fn stored_embedding(memory: &Memory) -> Option<Vec<f32>> {
    let values = memory.metadata.as_ref()?.get("embedding")?.as_array()?;
    let mut vector = Vec::with_capacity(values.len());
    for value in values {
        // f64 -> f32 narrowing is acceptable for similarity scoring.
        #[allow(clippy::cast_possible_truncation)]
        vector.push(value.as_f64()? as f32);
    }
    Some(vector)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

/// Convert a raw query row tuple into a [`Memory`].
fn row_to_memory(row: MemoryRow) -> Result<Memory, MemoryError> {
    let (id, kind_str, content, metadata_str, status_str, source_str, created_at, updated_at) = row;
    let metadata = metadata_str
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| MemoryError::Database(sqlx::Error::Decode(Box::new(e))))?;

    Ok(Memory {
        id: Some(id),
        kind: MemoryKind::parse(&kind_str)?,
        content,
        metadata,
        status: MemoryStatus::parse(&status_str)?,
        source: MemorySource::parse(&source_str)?,
        created_at: Some(created_at),
        updated_at: Some(updated_at),
    })
}

/// Strip FTS5 operator syntax out of a user query, keeping the terms.
fn sanitise_fts5_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();

    // Bare FTS5 keywords are parse errors, not search terms.
    const FTS5_KEYWORDS: &[&str] = &["OR", "NOT", "AND", "NEAR"];

    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| !FTS5_KEYWORDS.contains(t))
        .collect();

    // Space-joined terms are an implicit AND in FTS5.
    tokens.join(" ")
}

/// Search memories by status, most recently updated first.
pub async fn search_by_status(
    db: &SqlitePool,
    status: &str,
    limit: usize,
) -> Result<Vec<Memory>, MemoryError> {
    let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows: Vec<MemoryRow> = sqlx::query_as(
        "SELECT id, kind, content, metadata, status, source, created_at, updated_at \
             FROM memories \
             WHERE status = ?1 \
             ORDER BY updated_at DESC, id DESC \
             LIMIT ?2",
    )
    .bind(status)
    .bind(limit_i64)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(row_to_memory).collect()
}

/// Raw row returned by a workspace query.
///
/// Fields: `(id, conversation_id, entry_type, source_layer, content, event_data, source, created_at)`.
type WorkspaceRow = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
);

/// List workspace entries for a conversation, oldest first.
///
/// Ordering is by row id, which is monotonic with insertion order and
/// therefore with `created_at`.
pub async fn list_workspace_entries(
    db: &SqlitePool,
    conversation_id: &str,
    limit: usize,
) -> Result<Vec<WorkspaceEntry>, MemoryError> {
    let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows: Vec<WorkspaceRow> = sqlx::query_as(
        "SELECT id, conversation_id, entry_type, source_layer, content, event_data, \
                source, created_at \
         FROM workspace_entries \
         WHERE conversation_id = ?1 \
         ORDER BY id ASC \
         LIMIT ?2",
    )
    .bind(conversation_id)
    .bind(limit_i64)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(row_to_workspace_entry).collect()
}

/// Fetch one workspace entry by row id.
pub async fn get_workspace_entry(
    db: &SqlitePool,
    id: i64,
) -> Result<Option<WorkspaceEntry>, MemoryError> {
    let row: Option<WorkspaceRow> = sqlx::query_as(
        "SELECT id, conversation_id, entry_type, source_layer, content, event_data, \
                source, created_at \
         FROM workspace_entries \
         WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;

    row.map(row_to_workspace_entry).transpose()
}

fn row_to_workspace_entry(row: WorkspaceRow) -> Result<WorkspaceEntry, MemoryError> {
    let (id, conversation_id, entry_type, source_layer, content, event_data_str, source_str, created_at) =
        row;
    let event_data = event_data_str
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| MemoryError::Database(sqlx::Error::Decode(Box::new(e))))?;

    Ok(WorkspaceEntry {
        id: Some(id),
        conversation_id,
        entry_type,
        source_layer,
        content,
        event_data,
        source: EntrySource::parse(&source_str)?,
        created_at: Some(created_at),
    })
}

/// Reciprocal Rank Fusion constant (standard value).
const RRF_K: f64 = 60.0;

/// Merge two ranked lists: each item scores `1/(k + rank)` per list it
/// appears in, summed, then descending-score order truncated to `limit`.
fn rrf_merge(list_a: Vec<Memory>, list_b: Vec<Memory>, limit: usize) -> Vec<Memory> {
    use std::collections::HashMap;

    let mut scores: HashMap<i64, (f64, Option<Memory>)> = HashMap::new();

    for list in [list_a, list_b] {
        for (rank, memory) in list.into_iter().enumerate() {
            let id = memory.id.unwrap_or(-1);
            let rank_u32 = u32::try_from(rank).unwrap_or(u32::MAX);
            let score = 1.0 / (RRF_K + f64::from(rank_u32));
            let entry = scores.entry(id).or_insert((0.0, None));
            entry.0 += score;
            if entry.1.is_none() {
                entry.1 = Some(memory);
            }
        }
    }

    let mut merged: Vec<(f64, Memory)> = scores
        .into_values()
        .filter_map(|(score, mem)| mem.map(|m| (score, m)))
        .collect();

    merged.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    merged.into_iter().take(limit).map(|(_, m)| m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(id: i64, content: &str) -> Memory {
        Memory {
            id: Some(id),
            kind: MemoryKind::Fact,
            content: content.to_owned(),
            metadata: None,
            status: MemoryStatus::Active,
            source: MemorySource::User,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn rrf_prefers_items_present_in_both_rankings() {
        let fts = vec![memory(1, "a"), memory(2, "b"), memory(3, "c")];
        let vector = vec![memory(3, "c"), memory(4, "d")];

        let merged = rrf_merge(fts, vector, 10);
        assert_eq!(merged[0].id, Some(3), "the only item in both lists wins");
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn rrf_respects_the_limit() {
        let fts = vec![memory(1, "a"), memory(2, "b")];
        let vector = vec![memory(3, "c"), memory(4, "d")];
        assert_eq!(rrf_merge(fts, vector, 2).len(), 2);
    }

    #[test]
    fn cosine_similarity_basic_geometry() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn stored_embedding_reads_metadata_vector() {
        let mut m = memory(1, "a");
        m.metadata = Some(serde_json::json!({"embedding": [0.5, 0.25]}));
        assert_eq!(stored_embedding(&m), Some(vec![0.5, 0.25]));

        m.metadata = Some(serde_json::json!({"other": true}));
        assert_eq!(stored_embedding(&m), None);
    }

    #[test]
    fn fts5_operator_syntax_is_stripped() {
        assert_eq!(sanitise_fts5_query("weather AND \"berlin\""), "weather berlin");
        assert_eq!(sanitise_fts5_query("NOT OR AND"), "");
        assert_eq!(sanitise_fts5_query("plain words"), "plain words");
    }
}
