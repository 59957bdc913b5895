use crate::models::{Connection, SourceSettings};
use crate::sync::engine::SyncEngine;
use crate::sync::gate::SyncGate;
use crate::sync::models::{
    MirroredItem, SourceProject, SourceTeam, SourceUser, SyncOutcome, SyncState, SyncTrigger,
    TeamAreaPaths,
};
use crate::sync::traits::{ListQuery, SourceTarget};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entry point shared by the scheduler and the manual trigger path.
///
/// Cheap to clone; every clone shares the same gate.
#[derive(Clone)]
pub struct SyncService {
    engine: Arc<SyncEngine>,
    gate: SyncGate,
}

/// Connection summary plus current sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub connection: Option<Connection>,
    pub state: Option<SyncState>,
    /// True while this process holds the gate.
    pub in_progress: bool,
}

/// Editable connection fields, as submitted by the settings surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInput {
    pub organization: String,
    pub project: String,
    #[serde(default)]
    pub area_path: String,
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SyncService {
    pub fn new(engine: Arc<SyncEngine>, gate: SyncGate) -> Self {
        Self { engine, gate }
    }

    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }

    /// Attempt one pass. A held gate yields a skipped outcome without any I/O.
    #[tracing::instrument(level = "info", skip(self, cancel))]
    pub async fn trigger(&self, trigger: SyncTrigger, cancel: &CancellationToken) -> SyncOutcome {
        let Some(permit) = self.gate.try_acquire() else {
            tracing::info!("sync pass already in progress; skipping");
            return SyncOutcome::busy();
        };
        let outcome = self.engine.run_pass(trigger, cancel).await;
        permit.release();
        outcome
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn status(&self) -> Result<SyncStatus> {
        let repo = self.engine.repository();
        let connection = repo.get_connection().await?;
        let state = match &connection {
            Some(c) => repo.get_sync_state(c.id).await?,
            None => None,
        };
        Ok(SyncStatus {
            connection,
            state,
            in_progress: self.gate.is_busy(),
        })
    }

    /// Committed mirrored items of the current connection.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_items(&self, query: ListQuery) -> Result<Vec<MirroredItem>> {
        let repo = self.engine.repository();
        match repo.get_connection().await? {
            Some(c) => repo.list_items(c.id, query).await,
            None => Ok(Vec::new()),
        }
    }

    /// Create or replace the singleton connection, keeping its id and creation time.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn configure_connection(
        &self,
        input: ConnectionInput,
        now: DateTime<Utc>,
    ) -> Result<Connection> {
        let repo = self.engine.repository();
        let mut connection = Connection::new(
            input.organization,
            input.project,
            input.area_path,
            input.enabled,
            Some(now),
        )?
        .with_team(input.team_name, input.team_id);

        if let Some(existing) = repo.get_connection().await? {
            connection.id = existing.id;
            connection.created_at = existing.created_at;
        }
        connection.touch(now);
        repo.upsert_connection(&connection).await?;
        Ok(connection)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn source_settings(&self) -> Result<SourceSettings> {
        self.engine.repository().get_source_settings().await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn set_source_settings(&self, settings: SourceSettings) -> Result<()> {
        self.engine.repository().set_source_settings(&settings).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_projects(&self) -> Result<Vec<SourceProject>> {
        let target = self.source_target().await?;
        self.engine.client().list_projects(&target).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_teams(&self, project: &str) -> Result<Vec<SourceTeam>> {
        let project = non_blank("project", project)?;
        let target = self.source_target().await?;
        self.engine.client().list_teams(&target, project).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_users(&self) -> Result<Vec<SourceUser>> {
        let target = self.source_target().await?;
        self.engine.client().list_users(&target).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn team_area_paths(&self, project: &str, team: &str) -> Result<TeamAreaPaths> {
        let project = non_blank("project", project)?;
        let team = non_blank("team", team)?;
        let target = self.source_target().await?;
        self.engine
            .client()
            .get_team_area_paths(&target, project, team)
            .await
    }

    async fn source_target(&self) -> Result<SourceTarget> {
        let repo = self.engine.repository();
        let connection = repo
            .get_connection()
            .await?
            .ok_or_else(|| Error::NotFound("sync connection is not configured".to_string()))?;
        let settings = repo.get_source_settings().await?;
        Ok(SourceTarget::for_connection(&connection, &settings))
    }
}

fn non_blank<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{field} is empty")));
    }
    Ok(value)
}
