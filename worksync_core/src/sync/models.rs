use crate::models::ConnectionId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of the last item a pass has consumed: `(changed, item_id)`.
///
/// The derived ordering compares `changed` first and breaks ties on `item_id`,
/// which is the order the source query sorts by.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncCursor {
    pub changed: DateTime<Utc>,
    pub item_id: i64,
}

impl SyncCursor {
    pub fn new(changed: DateTime<Utc>, item_id: i64) -> Self {
        Self { changed, item_id }
    }

    /// Move `current` to `candidate` if the candidate is strictly later. Returns whether it moved.
    pub fn advance(current: &mut Option<SyncCursor>, candidate: SyncCursor) -> bool {
        match current {
            Some(c) if *c >= candidate => false,
            _ => {
                *current = Some(candidate);
                true
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncRunStatus {
    NeverRun,
    Running,
    Succeeded,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::NeverRun => "never_run",
            SyncRunStatus::Running => "running",
            SyncRunStatus::Succeeded => "succeeded",
            SyncRunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncRunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "never_run" => Ok(SyncRunStatus::NeverRun),
            "running" => Ok(SyncRunStatus::Running),
            "succeeded" => Ok(SyncRunStatus::Succeeded),
            "failed" => Ok(SyncRunStatus::Failed),
            other => Err(Error::InvalidInput(format!(
                "unknown sync run status '{other}'"
            ))),
        }
    }
}

/// Durable per-connection sync record. Written only by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub connection_id: ConnectionId,
    pub last_successful_changed: Option<DateTime<Utc>>,
    pub last_successful_item_id: Option<i64>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_run_status: SyncRunStatus,
    pub last_error: Option<String>,
}

impl SyncState {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            last_successful_changed: None,
            last_successful_item_id: None,
            last_attempted_at: None,
            last_completed_at: None,
            last_run_status: SyncRunStatus::NeverRun,
            last_error: None,
        }
    }

    /// Stored watermark. Both halves must be present for a cursor to exist.
    pub fn cursor(&self) -> Option<SyncCursor> {
        match (self.last_successful_changed, self.last_successful_item_id) {
            (Some(changed), Some(item_id)) => Some(SyncCursor::new(changed, item_id)),
            _ => None,
        }
    }

    /// True when another pass reported `Running` recently enough to still be alive.
    pub fn is_running_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        if self.last_run_status != SyncRunStatus::Running {
            return false;
        }
        match self.last_attempted_at {
            Some(at) => now - at < window,
            None => false,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.last_attempted_at = Some(now);
        self.last_run_status = SyncRunStatus::Running;
        self.last_error = None;
    }

    /// Record success. The stored cursor never moves backwards.
    pub fn mark_succeeded(&mut self, cursor: Option<SyncCursor>, now: DateTime<Utc>) {
        let mut stored = self.cursor();
        if let Some(c) = cursor {
            SyncCursor::advance(&mut stored, c);
        }
        if let Some(c) = stored {
            self.last_successful_changed = Some(c.changed);
            self.last_successful_item_id = Some(c.item_id);
        }
        self.last_completed_at = Some(now);
        self.last_run_status = SyncRunStatus::Succeeded;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.last_completed_at = Some(now);
        self.last_run_status = SyncRunStatus::Failed;
        self.last_error = Some(error.into());
    }
}

/// Full work item record as returned by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemDetail {
    pub id: i64,
    pub rev: i64,
    pub changed: DateTime<Utc>,
    pub title: String,
    pub state: String,
    pub work_item_type: String,
    pub area_path: String,
    pub iteration_path: String,
    /// Login / unique name of the assignee as the source reports it.
    pub assigned_to: Option<String>,
}

impl WorkItemDetail {
    pub fn cursor(&self) -> SyncCursor {
        SyncCursor::new(self.changed, self.id)
    }
}

/// Local copy of a source work item. Identity is `(connection_id, external_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirroredItem {
    pub connection_id: ConnectionId,
    pub external_id: i64,
    pub revision: i64,
    pub changed_at: DateTime<Utc>,
    pub title: String,
    pub status: String,
    pub item_type: String,
    pub area_path: String,
    pub iteration_path: String,
    pub assigned_to: Option<String>,
    pub url: String,
}

impl MirroredItem {
    /// Fresh row for an item seen for the first time; populated by `apply_detail`.
    pub fn new(connection_id: ConnectionId, detail: &WorkItemDetail, url: String) -> Self {
        let mut item = Self {
            connection_id,
            external_id: detail.id,
            revision: 0,
            changed_at: detail.changed,
            title: String::new(),
            status: String::new(),
            item_type: String::new(),
            area_path: String::new(),
            iteration_path: String::new(),
            assigned_to: None,
            url: String::new(),
        };
        item.apply_detail(detail, url);
        item
    }

    /// Overwrite every mutable field from `detail`. Identity fields are left alone.
    pub fn apply_detail(&mut self, detail: &WorkItemDetail, url: String) {
        self.revision = detail.rev;
        self.changed_at = detail.changed;
        self.title = detail.title.trim().to_string();
        self.status = detail.state.trim().to_string();
        self.item_type = detail.work_item_type.trim().to_string();
        self.area_path = detail.area_path.trim().to_string();
        self.iteration_path = detail.iteration_path.trim().to_string();
        self.assigned_to = normalize_assignee(detail.assigned_to.as_deref());
        self.url = url;
    }
}

/// Case-insensitive login normalization so `Jane@Contoso.com` and `jane@contoso.com` collapse.
pub fn normalize_assignee(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

/// `{base}/{organization}/{project}/_workitems/edit/{id}`.
pub fn canonical_item_url(base_url: &str, organization: &str, project: &str, id: i64) -> String {
    format!(
        "{}/{}/{}/_workitems/edit/{id}",
        base_url.trim_end_matches('/'),
        encode_path_segment(organization),
        encode_path_segment(project),
    )
}

fn encode_path_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Scheduled,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Scheduled => f.write_str("scheduled"),
            SyncTrigger::Manual => f.write_str("manual"),
        }
    }
}

/// Result of one pass attempt, reported to the trigger caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub succeeded: bool,
    /// Set when no pass executed (gate busy or another pass still fresh).
    pub skipped: bool,
    pub items_fetched: u64,
    pub items_upserted: u64,
    pub last_changed: Option<DateTime<Utc>>,
    pub last_item_id: Option<i64>,
    pub error: Option<String>,
}

impl SyncOutcome {
    /// Soft success that did no work, e.g. a missing or disabled connection.
    pub fn not_run(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            skipped: false,
            items_fetched: 0,
            items_upserted: 0,
            last_changed: None,
            last_item_id: None,
            error: Some(message.into()),
        }
    }

    pub fn skipped(cursor: Option<SyncCursor>) -> Self {
        Self {
            succeeded: true,
            skipped: true,
            items_fetched: 0,
            items_upserted: 0,
            last_changed: cursor.map(|c| c.changed),
            last_item_id: cursor.map(|c| c.item_id),
            error: None,
        }
    }

    pub fn busy() -> Self {
        Self {
            error: Some("a sync pass is already in progress".to_string()),
            ..Self::skipped(None)
        }
    }

    pub fn cursor(&self) -> Option<SyncCursor> {
        match (self.last_changed, self.last_item_id) {
            (Some(changed), Some(item_id)) => Some(SyncCursor::new(changed, item_id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProject {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTeam {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUser {
    pub id: String,
    pub display_name: String,
    pub unique_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamAreaPath {
    pub value: String,
    pub include_children: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamAreaPaths {
    pub default_area_path: Option<String>,
    pub area_paths: Vec<TeamAreaPath>,
}
