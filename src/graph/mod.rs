//! Graph hygiene pipeline: reconciles graph-visible candidates against
//! the authoritative skill/blueprint store. Fail-closed by construction —
//! if the active set cannot be read, nothing is graph-visible.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw graph candidate before hygiene is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphCandidate {
    /// Id of the blueprint this candidate represents a revision of.
    pub blueprint_id: String,
    /// Relevance score.
    pub score: f64,
    /// Free-form metadata.
    pub meta: serde_json::Value,
    /// Rendered content.
    pub content: String,
    /// Last-updated timestamp.
    pub updated_at: DateTime<Utc>,
    /// Graph node id for this revision.
    pub node_id: String,
}

/// Counters emitted after one hygiene pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HygieneCounters {
    /// Candidates received.
    pub in_count: usize,
    /// Candidates that parsed successfully.
    pub parsed_ok: usize,
    /// Candidates removed by per-blueprint dedupe.
    pub deduped: usize,
    /// Candidates kept after filtering against the active set.
    pub active_kept: usize,
    /// Candidates removed by the active-set or extra filter.
    pub filtered: usize,
    /// Candidates in the final output.
    pub out: usize,
}

/// Result of one hygiene pass.
#[derive(Debug, Clone)]
pub struct HygieneResult {
    /// Surviving candidates.
    pub candidates: Vec<GraphCandidate>,
    /// Counters for observability.
    pub counters: HygieneCounters,
}

/// Parse a raw candidate value, nil-safely. Malformed candidates are
/// dropped rather than propagated.
///
/// # Errors
///
/// Returns an error (never panics) when `raw` cannot be deserialized into a
/// [`GraphCandidate`]; callers drop the candidate and log a marker.
pub fn parse_candidate(raw: &serde_json::Value) -> Result<GraphCandidate, serde_json::Error> {
    serde_json::from_value(raw.clone())
}

/// Keep the record with the latest `(updated_at desc, node_id desc)` per
/// `blueprint_id`.
pub fn dedupe_latest_by_blueprint_id(candidates: Vec<GraphCandidate>) -> Vec<GraphCandidate> {
    let mut latest: HashMap<String, GraphCandidate> = HashMap::new();
    for candidate in candidates {
        match latest.get(&candidate.blueprint_id) {
            Some(existing)
                if (existing.updated_at, existing.node_id.as_str())
                    >= (candidate.updated_at, candidate.node_id.as_str()) => {}
            _ => {
                latest.insert(candidate.blueprint_id.clone(), candidate);
            }
        }
    }
    latest.into_values().collect()
}

/// Filter candidates to those whose `blueprint_id` is in the authoritative
/// active set. `active_ids = None` means the active-set read failed:
/// fail-closed to empty.
pub fn filter_against_active_set(
    candidates: Vec<GraphCandidate>,
    active_ids: Option<&std::collections::HashSet<String>>,
) -> Vec<GraphCandidate> {
    match active_ids {
        None => Vec::new(),
        Some(active) => candidates
            .into_iter()
            .filter(|c| active.contains(&c.blueprint_id))
            .collect(),
    }
}

/// Run the full graph hygiene pipeline over raw candidate values.
///
/// `extra_filter` is applied after the active-set filter (e.g. a trust
/// level check) and receives only candidates that already survived it.
pub fn apply_graph_hygiene(
    raw_candidates: &[serde_json::Value],
    active_ids: Option<&std::collections::HashSet<String>>,
    extra_filter: Option<&dyn Fn(&GraphCandidate) -> bool>,
) -> HygieneResult {
    let in_count = raw_candidates.len();

    let mut parsed = Vec::with_capacity(raw_candidates.len());
    for raw in raw_candidates {
        match parse_candidate(raw) {
            Ok(candidate) => parsed.push(candidate),
            Err(err) => tracing::warn!(error = %err, "dropping malformed graph candidate"),
        }
    }
    let parsed_ok = parsed.len();

    let deduped_list = dedupe_latest_by_blueprint_id(parsed);
    let deduped = parsed_ok.saturating_sub(deduped_list.len());

    let active_filtered = filter_against_active_set(deduped_list, active_ids);
    let active_kept = active_filtered.len();

    let out_list: Vec<GraphCandidate> = match extra_filter {
        Some(f) => active_filtered.into_iter().filter(|c| f(c)).collect(),
        None => active_filtered,
    };
    let out = out_list.len();
    let filtered = in_count.saturating_sub(out).saturating_sub(deduped);

    HygieneResult {
        candidates: out_list,
        counters: HygieneCounters {
            in_count,
            parsed_ok,
            deduped,
            active_kept,
            filtered,
            out,
        },
    }
}

/// Reconcile the authoritative store against the graph index, removing
/// orphaned nodes whose blueprint no longer exists in the active set.
///
/// Returns the node ids tombstoned.
pub fn reconcile_orphans(
    graph_node_blueprint_ids: &[(String, String)],
    active_ids: &std::collections::HashSet<String>,
) -> Vec<String> {
    graph_node_blueprint_ids
        .iter()
        .filter(|(_, blueprint_id)| !active_ids.contains(blueprint_id))
        .map(|(node_id, _)| node_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn candidate(blueprint_id: &str, node_id: &str, updated_at: DateTime<Utc>) -> GraphCandidate {
        GraphCandidate {
            blueprint_id: blueprint_id.to_owned(),
            score: 1.0,
            meta: serde_json::json!({}),
            content: "content".to_owned(),
            updated_at,
            node_id: node_id.to_owned(),
        }
    }

    #[test]
    fn dedupe_keeps_only_latest_per_blueprint() {
        let t1 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let t2 = DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z").unwrap().with_timezone(&Utc);
        let candidates = vec![candidate("bp1", "n1", t1), candidate("bp1", "n2", t2)];
        let result = dedupe_latest_by_blueprint_id(candidates);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].node_id, "n2");
    }

    #[test]
    fn fail_closed_when_active_set_unreadable() {
        let t1 = Utc::now();
        let candidates = vec![candidate("bp1", "n1", t1); 10];
        let result = filter_against_active_set(candidates, None);
        assert!(result.is_empty());
    }

    #[test]
    fn apply_graph_hygiene_fails_closed_on_unreadable_active_set() {
        let raw: Vec<serde_json::Value> = (0..10)
            .map(|i| {
                serde_json::json!({
                    "blueprint_id": format!("bp{i}"),
                    "score": 1.0,
                    "meta": {},
                    "content": "c",
                    "updated_at": "2026-01-01T00:00:00Z",
                    "node_id": format!("n{i}"),
                })
            })
            .collect();

        let result = apply_graph_hygiene(&raw, None, None);
        assert_eq!(result.counters.out, 0);
        assert_eq!(result.counters.filtered, 10);
    }

    #[test]
    fn output_never_exceeds_input_and_at_most_one_per_blueprint() {
        let t1 = Utc::now();
        let raw: Vec<serde_json::Value> = vec![
            serde_json::to_value(candidate("bp1", "n1", t1)).unwrap(),
            serde_json::to_value(candidate("bp1", "n2", t1)).unwrap(),
            serde_json::to_value(candidate("bp2", "n3", t1)).unwrap(),
        ];
        let mut active = HashSet::new();
        active.insert("bp1".to_owned());
        active.insert("bp2".to_owned());

        let result = apply_graph_hygiene(&raw, Some(&active), None);
        assert!(result.counters.out <= result.counters.in_count);

        let mut seen = HashSet::new();
        for c in &result.candidates {
            assert!(seen.insert(c.blueprint_id.clone()));
        }
    }

    #[test]
    fn reconcile_orphans_finds_nodes_not_in_active_set() {
        let mut active = HashSet::new();
        active.insert("bp1".to_owned());
        let nodes = vec![
            ("n1".to_owned(), "bp1".to_owned()),
            ("n2".to_owned(), "bp_gone".to_owned()),
        ];
        let orphans = reconcile_orphans(&nodes, &active);
        assert_eq!(orphans, vec!["n2".to_owned()]);
    }
}
