//! Tool selector: narrows the full tool catalog down to the small
//! set worth offering the planner. Semantic similarity picks a top-15
//! shortlist, then a fixed-template re-rank call narrows to 3-5.
//!
//! Deterministic given identical inputs and `temperature=0`: the re-rank
//! prompt is built the same way every time and responses are parsed, not
//! sampled from.

use super::inference::{InferenceError, InferenceProvider};

/// One entry in the tool catalog.
#[derive(Debug, Clone)]
pub struct ToolCatalogEntry {
    /// Tool name.
    pub name: String,
    /// Short description used for similarity scoring and the re-rank prompt.
    pub description: String,
}

const SHORTLIST_SIZE: usize = 15;
const MIN_SELECTED: usize = 3;
const MAX_SELECTED: usize = 5;

/// Score `catalog` entries against `query` by naive term overlap. Stands in
/// for an embedding-similarity lookup; callers needing real semantic
/// ranking should swap the scoring function, not this shape.
fn similarity_score(query: &str, entry: &ToolCatalogEntry) -> usize {
    let query_terms: std::collections::HashSet<&str> = query.split_whitespace().collect();
    let haystack = format!("{} {}", entry.name, entry.description).to_ascii_lowercase();
    query_terms
        .iter()
        .filter(|t| haystack.contains(&t.to_ascii_lowercase()))
        .count()
}

/// Rank the full catalog by similarity to `query` and keep the top 15,
/// ties broken by catalog order for determinism.
pub fn shortlist(query: &str, catalog: &[ToolCatalogEntry]) -> Vec<ToolCatalogEntry> {
    let mut scored: Vec<(usize, usize, &ToolCatalogEntry)> = catalog
        .iter()
        .enumerate()
        .map(|(i, entry)| (similarity_score(query, entry), i, entry))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored
        .into_iter()
        .take(SHORTLIST_SIZE)
        .map(|(_, _, entry)| entry.clone())
        .collect()
}

/// Build the fixed re-rank instruction template for a shortlist.
fn rerank_prompt(query: &str, shortlist: &[ToolCatalogEntry]) -> String {
    let mut prompt = format!(
        "Given the user query, pick between {MIN_SELECTED} and {MAX_SELECTED} of the most relevant tools.\nQuery: {query}\nTools:\n"
    );
    for entry in shortlist {
        prompt.push_str(&format!("- {}: {}\n", entry.name, entry.description));
    }
    prompt.push_str("Respond with a JSON array of tool names, most relevant first.");
    prompt
}

/// Errors selecting tools.
#[derive(Debug, thiserror::Error)]
pub enum ToolSelectionError {
    /// The re-rank call itself failed.
    #[error("tool re-rank inference failed: {0}")]
    Inference(#[from] InferenceError),
}

/// Select 3-5 tool names for `query` out of the full `catalog`.
///
/// # Errors
///
/// Returns an error only if the re-rank inference call fails; a malformed
/// re-rank response degrades gracefully to the top [`MAX_SELECTED`]
/// shortlist entries rather than erroring.
pub async fn select_tools(
    provider: &dyn InferenceProvider,
    model: &str,
    query: &str,
    catalog: &[ToolCatalogEntry],
) -> Result<Vec<String>, ToolSelectionError> {
    let shortlist = shortlist(query, catalog);
    if shortlist.is_empty() {
        return Ok(Vec::new());
    }

    let prompt = rerank_prompt(query, &shortlist);
    let response = provider.generate(model, &prompt, 256).await?;

    let parsed: Vec<String> = serde_json::from_str(&response).unwrap_or_default();
    let valid: Vec<String> = parsed
        .into_iter()
        .filter(|name| shortlist.iter().any(|entry| &entry.name == name))
        .take(MAX_SELECTED)
        .collect();

    if valid.len() >= MIN_SELECTED.min(shortlist.len()) {
        Ok(valid)
    } else {
        Ok(shortlist.into_iter().take(MAX_SELECTED).map(|e| e.name).collect())
    }
}
