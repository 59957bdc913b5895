use crate::Result;
use crate::models::{Connection, ConnectionId, SourceSettings};
use crate::sync::models::{
    MirroredItem, SourceProject, SourceTeam, SourceUser, SyncState, TeamAreaPaths, WorkItemDetail,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where a source call goes: the tracker host and the organization on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTarget {
    pub base_url: String,
    pub organization: String,
}

impl SourceTarget {
    pub fn for_connection(connection: &Connection, settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.effective_base_url(),
            organization: connection.organization.clone(),
        }
    }
}

/// Client for the external issue tracker.
///
/// Transport and auth live with the implementor. Every call may be slow; the engine
/// treats any `Err` as a failure of the whole pass. The engine builds query text
/// (including value escaping) and the client only executes it.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn list_projects(&self, target: &SourceTarget) -> Result<Vec<SourceProject>>;

    async fn list_teams(&self, target: &SourceTarget, project: &str) -> Result<Vec<SourceTeam>>;

    async fn list_users(&self, target: &SourceTarget) -> Result<Vec<SourceUser>>;

    async fn get_team_area_paths(
        &self,
        target: &SourceTarget,
        project: &str,
        team: &str,
    ) -> Result<TeamAreaPaths>;

    /// Execute `query` and return at most `top` matching ids, in query order.
    async fn query_ids(
        &self,
        target: &SourceTarget,
        project: &str,
        query: &str,
        top: usize,
    ) -> Result<Vec<i64>>;

    /// Full records for `ids`. Ids the source no longer knows may be omitted.
    async fn get_items(&self, target: &SourceTarget, ids: &[i64]) -> Result<Vec<WorkItemDetail>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Connection + global settings records (owned by the settings surface).
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get_connection(&self) -> Result<Option<Connection>>;
    /// Replaces the singleton connection.
    async fn upsert_connection(&self, connection: &Connection) -> Result<()>;

    async fn get_source_settings(&self) -> Result<SourceSettings>;
    async fn set_source_settings(&self, settings: &SourceSettings) -> Result<()>;
}

/// Per-connection sync state, written outside any pass transaction.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get_sync_state(&self, connection_id: ConnectionId) -> Result<Option<SyncState>>;
    async fn put_sync_state(&self, state: &SyncState) -> Result<()>;
}

/// Mirrored item sink keyed by `(connection_id, external_id)`.
#[async_trait]
pub trait WorkItemStore: Send {
    async fn find_items(
        &mut self,
        connection_id: ConnectionId,
        external_ids: &[i64],
    ) -> Result<Vec<MirroredItem>>;

    /// Insert-or-replace each item by identity. Returns the number of rows written.
    async fn upsert_items(&mut self, items: &[MirroredItem]) -> Result<u64>;
}

/// One pass worth of writes. Nothing is visible to other readers until `commit`.
///
/// Dropping a unit of work without committing discards it.
#[async_trait]
pub trait SyncUnitOfWork: WorkItemStore {
    async fn put_sync_state(&mut self, state: &SyncState) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Everything the engine needs from persistence.
#[async_trait]
pub trait SyncRepository: ConnectionStore + SyncStateStore {
    async fn begin(&self) -> Result<Box<dyn SyncUnitOfWork>>;

    /// Committed mirrored items for read-side consumers, ordered by external id.
    async fn list_items(
        &self,
        connection_id: ConnectionId,
        query: ListQuery,
    ) -> Result<Vec<MirroredItem>>;
}
