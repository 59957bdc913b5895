//! Scripted fakes and fixtures shared by the crate's tests and downstream crates' tests.

use crate::models::Connection;
use crate::storage::MemorySyncRepository;
use crate::sync::models::{SourceProject, SourceTeam, SourceUser, TeamAreaPaths, WorkItemDetail};
use crate::sync::traits::{ConnectionStore, SourceClient, SourceTarget};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// One `query_ids` call as the fake saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    pub target: SourceTarget,
    pub project: String,
    pub query: String,
    pub top: usize,
}

#[derive(Default)]
struct Script {
    pages: VecDeque<Vec<i64>>,
    details: HashMap<i64, WorkItemDetail>,
    queries: Vec<RecordedQuery>,
    get_items_calls: usize,
    area_path_calls: usize,
    fail_query_on: Option<usize>,
    fail_get_items_on: Option<usize>,
    query_delay: Option<Duration>,
    projects: Vec<SourceProject>,
    teams: Vec<SourceTeam>,
    users: Vec<SourceUser>,
    team_area_paths: TeamAreaPaths,
}

/// `SourceClient` that replays scripted id pages and serves details from a fixture map.
///
/// Once the scripted pages run out every query returns an empty page. Failures are
/// injected by 1-based call number.
#[derive(Default)]
pub struct ScriptedSourceClient {
    script: Mutex<Script>,
}

impl ScriptedSourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_page(self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.script().pages.push_back(ids.into_iter().collect());
        self
    }

    pub fn with_items(self, items: impl IntoIterator<Item = WorkItemDetail>) -> Self {
        self.script()
            .details
            .extend(items.into_iter().map(|d| (d.id, d)));
        self
    }

    pub fn fail_query_on(self, call: usize) -> Self {
        self.script().fail_query_on = Some(call);
        self
    }

    pub fn fail_get_items_on(self, call: usize) -> Self {
        self.script().fail_get_items_on = Some(call);
        self
    }

    /// Every `query_ids` call sleeps this long before answering.
    pub fn with_query_delay(self, delay: Duration) -> Self {
        self.script().query_delay = Some(delay);
        self
    }

    pub fn with_projects(self, projects: Vec<SourceProject>) -> Self {
        self.script().projects = projects;
        self
    }

    pub fn with_teams(self, teams: Vec<SourceTeam>) -> Self {
        self.script().teams = teams;
        self
    }

    pub fn with_users(self, users: Vec<SourceUser>) -> Self {
        self.script().users = users;
        self
    }

    pub fn with_team_area_paths(self, paths: TeamAreaPaths) -> Self {
        self.script().team_area_paths = paths;
        self
    }

    /// Queue more pages after construction (e.g. between two passes).
    pub fn push_page(&self, ids: impl IntoIterator<Item = i64>) {
        self.script().pages.push_back(ids.into_iter().collect());
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.script().queries.clone()
    }

    pub fn query_count(&self) -> usize {
        self.script().queries.len()
    }

    pub fn area_path_calls(&self) -> usize {
        self.script().area_path_calls
    }
}

#[async_trait]
impl SourceClient for ScriptedSourceClient {
    async fn list_projects(&self, _target: &SourceTarget) -> Result<Vec<SourceProject>> {
        Ok(self.script().projects.clone())
    }

    async fn list_teams(&self, _target: &SourceTarget, _project: &str) -> Result<Vec<SourceTeam>> {
        Ok(self.script().teams.clone())
    }

    async fn list_users(&self, _target: &SourceTarget) -> Result<Vec<SourceUser>> {
        Ok(self.script().users.clone())
    }

    async fn get_team_area_paths(
        &self,
        _target: &SourceTarget,
        _project: &str,
        _team: &str,
    ) -> Result<TeamAreaPaths> {
        let mut script = self.script();
        script.area_path_calls += 1;
        Ok(script.team_area_paths.clone())
    }

    async fn query_ids(
        &self,
        target: &SourceTarget,
        project: &str,
        query: &str,
        top: usize,
    ) -> Result<Vec<i64>> {
        let delay = self.script().query_delay;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let mut script = self.script();
        script.queries.push(RecordedQuery {
            target: target.clone(),
            project: project.to_string(),
            query: query.to_string(),
            top,
        });
        let call = script.queries.len();
        if script.fail_query_on == Some(call) {
            return Err(Error::backend(
                "query work item ids",
                std::io::Error::other(format!("scripted failure on query {call}")),
            ));
        }
        let mut page = script.pages.pop_front().unwrap_or_default();
        page.truncate(top);
        Ok(page)
    }

    async fn get_items(&self, _target: &SourceTarget, ids: &[i64]) -> Result<Vec<WorkItemDetail>> {
        let mut script = self.script();
        script.get_items_calls += 1;
        let call = script.get_items_calls;
        if script.fail_get_items_on == Some(call) {
            return Err(Error::backend(
                "fetch work item details",
                std::io::Error::other(format!("scripted failure on fetch {call}")),
            ));
        }
        Ok(ids
            .iter()
            .filter_map(|id| script.details.get(id).cloned())
            .collect())
    }
}

/// Fixed epoch for fixtures: 2024-01-01T00:00:00Z plus `secs`.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200 + secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Minimal detail record changed at `changed`.
pub fn detail(id: i64, changed: DateTime<Utc>) -> WorkItemDetail {
    WorkItemDetail {
        id,
        rev: 1,
        changed,
        title: format!("Work item {id}"),
        state: "Active".to_string(),
        work_item_type: "Task".to_string(),
        area_path: r"Fabrikam\Web".to_string(),
        iteration_path: r"Fabrikam\Sprint 1".to_string(),
        assigned_to: Some(format!("User{}@Contoso.com", id % 3)),
    }
}

/// Details for `ids`, one second apart starting at `ts(start_secs)`.
pub fn details_in_order(
    ids: impl IntoIterator<Item = i64>,
    start_secs: i64,
) -> Vec<WorkItemDetail> {
    ids.into_iter()
        .enumerate()
        .map(|(i, id)| detail(id, ts(start_secs + i as i64)))
        .collect()
}

pub fn connection(enabled: bool) -> Result<Connection> {
    Connection::new("contoso", "Fabrikam", r"Fabrikam\Web", enabled, Some(ts(0)))
}

/// Memory repository holding one connection.
pub async fn seeded_memory_repository(enabled: bool) -> Result<(MemorySyncRepository, Connection)> {
    let repo = MemorySyncRepository::new();
    let conn = connection(enabled)?;
    repo.upsert_connection(&conn).await?;
    Ok((repo, conn))
}
