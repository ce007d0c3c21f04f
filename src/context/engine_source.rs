//! [`ContextDataSource`] backed by the runtime's own collaborators: the
//! memory engine, the skill registry, the digest CSV log, the tool
//! catalog, and a persona file.
//!
//! Every method swallows its own retrieval failure into an empty
//! contribution (logged at debug), per the context builder's failure
//! semantics: a missing source is never fatal to prompt assembly.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::debug;

use crate::digest::source::FileDigestSource;
use crate::digest::DigestSource;
use crate::memory::{MemoryEngine, MemoryStatus};
use crate::pipeline::inference::InferenceProvider;
use crate::pipeline::tool_selector;
use crate::skills::registry::SkillRegistry;
use crate::tools::registry::ToolRegistry;
use crate::types::Request;

use super::{sections, ContextDataSource};

/// Policy reminders rendered into the RULES block on every turn.
const RULES: &[&str] = &[
    "Prefer calling a tool over guessing when a tool covers the question.",
    "This assistant runs on the user's own machine; never send data to services the user has not configured.",
];

const NOW_FACTS_LIMIT: usize = 5;
const NEXT_HINTS_LIMIT: usize = 50;
const CONTAINER_SCAN_LIMIT: usize = 200;

/// The production context data source wired over the runtime's own state.
pub struct EngineContextSource {
    memory: Arc<MemoryEngine>,
    skills: Arc<SkillRegistry>,
    tools: Arc<ToolRegistry>,
    digest_source: Arc<FileDigestSource>,
    provider: Arc<dyn InferenceProvider>,
    selector_model: String,
    persona_path: PathBuf,
}

impl EngineContextSource {
    /// Build a source over the given collaborators. `selector_model` is the
    /// small model the tool selector re-ranks with.
    pub fn new(
        memory: Arc<MemoryEngine>,
        skills: Arc<SkillRegistry>,
        tools: Arc<ToolRegistry>,
        digest_source: Arc<FileDigestSource>,
        provider: Arc<dyn InferenceProvider>,
        selector_model: impl Into<String>,
        persona_path: PathBuf,
    ) -> Self {
        Self {
            memory,
            skills,
            tools,
            digest_source,
            provider,
            selector_model: selector_model.into(),
            persona_path,
        }
    }
}

#[async_trait]
impl ContextDataSource for EngineContextSource {
    async fn persona(&self) -> Option<String> {
        match std::fs::read_to_string(&self.persona_path) {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
            Ok(_) => None,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(error = %e, "persona read failed");
                }
                None
            }
        }
    }

    async fn now_facts(&self, _conversation_id: &str) -> Vec<String> {
        match self.memory.search_by_status(MemoryStatus::Active, NOW_FACTS_LIMIT).await {
            Ok(memories) => {
                // Facts harvested from the same upstream event carry its id
                // in metadata; correlate keeps one of each such group.
                let items = memories
                    .into_iter()
                    .map(|m| {
                        let event_ids = m
                            .metadata
                            .as_ref()
                            .and_then(|meta| meta.get("source_event_ids"))
                            .and_then(|ids| ids.as_array())
                            .map(|ids| {
                                ids.iter()
                                    .filter_map(|id| id.as_str().map(str::to_owned))
                                    .collect()
                            })
                            .unwrap_or_default();
                        (m.content, event_ids)
                    })
                    .collect();
                sections::correlate(items)
            }
            Err(e) => {
                debug!(error = %e, "now-facts retrieval failed");
                Vec::new()
            }
        }
    }

    async fn rules(&self) -> Vec<String> {
        RULES.iter().map(|r| (*r).to_owned()).collect()
    }

    async fn active_containers(&self, conversation_id: &str) -> Vec<String> {
        let entries = match self
            .memory
            .list_workspace_entries(conversation_id, CONTAINER_SCAN_LIMIT)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "active-container scan failed");
                return Vec::new();
            }
        };

        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let mut active: Vec<String> = Vec::new();
        for entry in entries {
            let is_today = entry
                .created_at
                .as_deref()
                .is_some_and(|ts| ts.starts_with(&today));
            if !is_today {
                continue;
            }
            match entry.entry_type.as_str() {
                "container_started" => active.push(entry.content),
                "container_stopped" => {
                    if let Some(pos) = active.iter().position(|name| *name == entry.content) {
                        active.remove(pos);
                    }
                }
                _ => {}
            }
        }
        active
    }

    async fn selected_tools(&self, request: &Request) -> Vec<String> {
        let catalog = self.tools.catalog();
        if catalog.is_empty() {
            return Vec::new();
        }
        let query = request.last_user_text().unwrap_or_default();
        match tool_selector::select_tools(&*self.provider, &self.selector_model, query, &catalog).await {
            Ok(selected) => selected,
            Err(e) => {
                debug!(error = %e, "tool selection failed, offering no tools");
                Vec::new()
            }
        }
    }

    async fn skills_catalog(&self) -> Vec<String> {
        self.skills
            .active_records()
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    async fn relevant_facts(&self, _conversation_id: &str, query: &str, limit: usize) -> Vec<String> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        match self.memory.search(query, limit).await {
            Ok(memories) => memories.into_iter().map(|m| m.content).collect(),
            Err(e) => {
                debug!(error = %e, "relevant-facts search failed");
                Vec::new()
            }
        }
    }

    async fn recent_chat_history(&self, conversation_id: &str, limit: usize) -> Vec<String> {
        match self.memory.search_conversations(conversation_id, limit).await {
            Ok(entries) => entries
                .into_iter()
                .map(|e| format!("{}: {}", e.role, e.content))
                .collect(),
            Err(e) => {
                debug!(error = %e, "chat-history retrieval failed");
                Vec::new()
            }
        }
    }

    async fn next_hints(&self, conversation_id: &str) -> Vec<String> {
        let entries = match self
            .memory
            .list_workspace_entries(conversation_id, NEXT_HINTS_LIMIT)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "next-hints scan failed");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter(|e| e.entry_type == "approval_requested")
            .filter_map(|e| {
                let content: serde_json::Value = serde_json::from_str(&e.content).ok()?;
                let skill = content.get("skill_name")?.as_str()?.to_owned();
                Some(format!("Approval is pending for skill '{skill}'."))
            })
            .collect()
    }

    async fn jit_digest_events(&self, conversation_id: &str, window_hours: u32) -> Vec<String> {
        // CSV rows carry a calendar date only; a rolling-hour window maps
        // to the span of dates it can touch.
        let now = Utc::now();
        let cutoff = (now - Duration::hours(i64::from(window_hours))).date_naive();
        let today = now.date_naive();

        let mut events = Vec::new();
        let mut cursor = cutoff;
        while cursor <= today {
            for event in self.digest_source.events_on(cursor) {
                if event.conversation_id == conversation_id {
                    events.push(format!("{}: {}", cursor.format("%Y-%m-%d"), event.event_type));
                }
            }
            let Some(next) = cursor.succ_opt() else { break };
            cursor = next;
        }
        events
    }
}
