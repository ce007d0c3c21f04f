//! Section rendering, dedupe/correlate/select-top, and hard-cap drop logic
//! for the context builder.

use std::collections::HashSet;

use super::{ContextDataSource, ContextError};

/// Fallback NOW block rendered when the normal renderer raises an exception.
pub const MINIMAL_NOW: &str = "## NOW\n(context temporarily unavailable)";

/// Relative drop priority when the assembled prompt exceeds the hard cap.
/// Sections are dropped in ascending order: `First` goes before `Second`,
/// and so on; `Never` is never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DropPriority {
    /// Dropped first: chat history.
    First,
    /// Dropped second: facts / JIT digest events.
    Second,
    /// Dropped third: skills catalog.
    Third,
    /// Dropped fourth: tools catalog.
    Fourth,
    /// Dropped fifth: RULES block.
    Fifth,
    /// Dropped last, before giving up and tail-truncating: NOW block.
    Last,
    /// Never dropped: persona, NEXT, and active-containers are kept as
    /// long as any section survives.
    Never,
}

/// One named, orderable chunk of the assembled prompt.
pub struct Section {
    /// Stable section name, surfaced in the observability trace.
    pub name: &'static str,
    /// Where this section falls in the hard-cap drop order.
    pub drop_priority: DropPriority,
    /// Rendered text.
    pub text: String,
}

impl Section {
    /// Build a new section.
    pub fn new(name: &'static str, drop_priority: DropPriority, text: String) -> Self {
        Self {
            name,
            drop_priority,
            text,
        }
    }
}

/// Render the NOW block from the latest facts and short-term observations.
///
/// # Errors
///
/// Returns [`ContextError::RendererFailed`] only in the (practically
/// unreachable) case the template itself cannot be built; callers fall back
/// to [`MINIMAL_NOW`] on any error.
pub async fn render_now(
    source: &dyn ContextDataSource,
    conversation_id: &str,
) -> Result<String, ContextError> {
    let facts = source.now_facts(conversation_id).await;
    Ok(render_list("NOW", &facts))
}

/// Render the RULES block from policy reminder strings.
pub fn render_rules(rules: &[String]) -> String {
    render_list("RULES", rules)
}

/// Render the NEXT block from typed-state hints.
pub fn render_next(hints: &[String]) -> String {
    render_list("NEXT", hints)
}

/// Render a bulleted, titled section. Deterministic given the same input.
pub fn render_list(title: &str, items: &[String]) -> String {
    if items.is_empty() {
        return format!("## {title}\n(none)");
    }
    let mut out = format!("## {title}\n");
    for item in items {
        out.push_str("- ");
        out.push_str(item.trim());
        out.push('\n');
    }
    out.pop();
    out
}

/// Remove duplicates by exact text, preserving first-seen order.
///
/// Stands in for `dedupe(window)` over `(conv_id, event_type, content_hash)`
/// when the caller has already scoped items to one conversation window.
pub fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Merge entries that share a source event id, keeping the first-seen
/// entry's content. Two facts harvested from the same upstream event would
/// otherwise both land in the prompt as near-duplicates.
pub fn correlate(items: Vec<(String, Vec<String>)>) -> Vec<String> {
    let mut seen_event_ids: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for (content, source_event_ids) in items {
        let already_covered = !source_event_ids.is_empty()
            && source_event_ids.iter().any(|id| seen_event_ids.contains(id));
        if already_covered {
            continue;
        }
        seen_event_ids.extend(source_event_ids);
        out.push(content);
    }
    out
}

/// Stable selection of the top `budget` items, preserving insertion order.
///
/// Callers are expected to have already sorted by `(recency desc, score
/// desc, id asc)` before calling this; `select_top` only truncates, it does
/// not reorder, so ties resolve by insertion order as required.
pub fn select_top(items: Vec<String>, budget: usize) -> Vec<String> {
    items.into_iter().take(budget).collect()
}

/// Join sections and, if the result exceeds `cap`, drop whole sections in
/// reverse-priority order until it fits. Returns `(text, truncated)`.
///
/// By construction this should never need to tail-truncate: dropping every
/// droppable section leaves only `Never`-priority sections, which are sized
/// by the caller to fit. If that still doesn't fit (pathological input),
/// the very last section is tail-truncated and `truncated=true` is set.
pub fn hard_cap(mut sections: Vec<Section>, cap: usize) -> (String, bool) {
    loop {
        let joined = join(&sections);
        if joined.chars().count() <= cap {
            return (joined, false);
        }

        let Some(drop_idx) = sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.drop_priority != DropPriority::Never)
            .max_by_key(|(_, s)| s.drop_priority)
            .map(|(i, _)| i)
        else {
            break;
        };
        sections.remove(drop_idx);
    }

    // Only non-droppable sections remain and the join still exceeds cap:
    // tail-truncate the last section deterministically.
    let mut joined = join(&sections);
    if joined.chars().count() > cap {
        joined = joined.chars().take(cap).collect();
    }
    (joined, true)
}

fn join(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_removes_exact_duplicates_preserving_order() {
        let items = vec!["a".to_owned(), "b".to_owned(), "a".to_owned()];
        assert_eq!(dedupe(items), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn correlate_merges_entries_sharing_a_source_event() {
        let items = vec![
            ("fact a".to_owned(), vec!["ev1".to_owned()]),
            ("fact b".to_owned(), vec!["ev1".to_owned(), "ev2".to_owned()]),
            ("fact c".to_owned(), vec!["ev3".to_owned()]),
            ("no provenance".to_owned(), Vec::new()),
        ];
        assert_eq!(
            correlate(items),
            vec![
                "fact a".to_owned(),
                "fact c".to_owned(),
                "no provenance".to_owned()
            ]
        );
    }

    #[test]
    fn select_top_truncates_without_reordering() {
        let items: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let top = select_top(items, 3);
        assert_eq!(top, vec!["0".to_owned(), "1".to_owned(), "2".to_owned()]);
    }

    #[test]
    fn hard_cap_drops_in_reverse_priority_order() {
        let sections = vec![
            Section::new("now", DropPriority::Last, "N".repeat(10)),
            Section::new("rules", DropPriority::Fifth, "R".repeat(10)),
            Section::new("chat_history", DropPriority::First, "H".repeat(10)),
        ];
        let (text, truncated) = hard_cap(sections, 15);
        assert!(!text.contains('H'), "chat_history should be dropped first");
        assert!(text.contains('N'), "now should survive longest");
        assert!(!truncated);
    }

    #[test]
    fn hard_cap_tail_truncates_when_only_never_sections_remain() {
        let sections = vec![Section::new("now", DropPriority::Never, "N".repeat(50))];
        let (text, truncated) = hard_cap(sections, 10);
        assert_eq!(text.chars().count(), 10);
        assert!(truncated);
    }

    #[test]
    fn render_list_empty_items_shows_none_marker() {
        assert_eq!(render_list("NOW", &[]), "## NOW\n(none)");
    }
}
