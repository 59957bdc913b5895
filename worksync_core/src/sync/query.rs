//! Query text for the cursor-filtered work item id query.
//!
//! Results are ordered by `(ChangedDate, Id)` ascending. The cursor predicate relies
//! on that ordering: every page starts strictly after the last `(changed, id)` consumed.

use crate::sync::models::SyncCursor;
use chrono::SecondsFormat;

/// Escape a value for embedding inside a single-quoted query literal.
///
/// Backslashes are doubled first, then single quotes.
pub fn escape_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "''")
}

/// Build the id query for one page.
///
/// An empty `area_path` drops the area clause; `None` cursor starts from the beginning.
#[tracing::instrument(level = "debug")]
pub fn build_id_query(project: &str, area_path: &str, cursor: Option<&SyncCursor>) -> String {
    let mut clauses = vec![format!(
        "[System.TeamProject] = '{}'",
        escape_literal(project)
    )];

    let area_path = area_path.trim();
    if !area_path.is_empty() {
        clauses.push(format!(
            "[System.AreaPath] UNDER '{}'",
            escape_literal(area_path)
        ));
    }

    if let Some(c) = cursor {
        let ts = c.changed.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        clauses.push(format!(
            "([System.ChangedDate] > '{ts}' OR ([System.ChangedDate] = '{ts}' AND [System.Id] > {}))",
            c.item_id
        ));
    }

    format!(
        "SELECT [System.Id] FROM WorkItems WHERE {} ORDER BY [System.ChangedDate] ASC, [System.Id] ASC",
        clauses.join(" AND ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape_literal(r"Fab\Web"), r"Fab\\Web");
        assert_eq!(escape_literal("O'Brien"), "O''Brien");
        assert_eq!(escape_literal(r"a\'b"), r"a\\''b");
    }

    #[test]
    fn first_page_has_no_cursor_predicate() {
        let q = build_id_query("Fabrikam", r"Fabrikam\Web", None);
        assert_eq!(
            q,
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = 'Fabrikam' \
             AND [System.AreaPath] UNDER 'Fabrikam\\\\Web' \
             ORDER BY [System.ChangedDate] ASC, [System.Id] ASC"
        );
    }

    #[test]
    fn cursor_predicate_breaks_timestamp_ties_on_id() {
        let changed = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let q = build_id_query("Fabrikam", "", Some(&SyncCursor::new(changed, 77)));
        assert!(!q.contains("[System.AreaPath]"));
        assert!(q.contains(
            "([System.ChangedDate] > '2024-03-01T08:30:00Z' OR \
             ([System.ChangedDate] = '2024-03-01T08:30:00Z' AND [System.Id] > 77))"
        ));
        assert!(q.ends_with("ORDER BY [System.ChangedDate] ASC, [System.Id] ASC"));
    }

    #[test]
    fn injected_area_path_stays_inside_literal() {
        let q = build_id_query("P", "x' OR [System.Id] > '0", None);
        assert!(q.contains("UNDER 'x'' OR [System.Id] > ''0'"));
    }
}
