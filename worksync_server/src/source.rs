use async_trait::async_trait;
use worksync_core::{
    Error, Result, SourceClient, SourceProject, SourceTarget, SourceTeam, SourceUser,
    TeamAreaPaths, WorkItemDetail,
};

const UNCONFIGURED: &str = "no source client is configured for this process";

/// Placeholder for processes started without a tracker transport.
///
/// Every call fails, so passes end as `Failed` with a clear message and metadata
/// routes answer 502. Embedders pass their own client to `server::build_state`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredSourceClient;

#[async_trait]
impl SourceClient for UnconfiguredSourceClient {
    async fn list_projects(&self, _target: &SourceTarget) -> Result<Vec<SourceProject>> {
        Err(Error::BackendMessage(UNCONFIGURED.to_string()))
    }

    async fn list_teams(&self, _target: &SourceTarget, _project: &str) -> Result<Vec<SourceTeam>> {
        Err(Error::BackendMessage(UNCONFIGURED.to_string()))
    }

    async fn list_users(&self, _target: &SourceTarget) -> Result<Vec<SourceUser>> {
        Err(Error::BackendMessage(UNCONFIGURED.to_string()))
    }

    async fn get_team_area_paths(
        &self,
        _target: &SourceTarget,
        _project: &str,
        _team: &str,
    ) -> Result<TeamAreaPaths> {
        Err(Error::BackendMessage(UNCONFIGURED.to_string()))
    }

    async fn query_ids(
        &self,
        _target: &SourceTarget,
        _project: &str,
        _query: &str,
        _top: usize,
    ) -> Result<Vec<i64>> {
        Err(Error::BackendMessage(UNCONFIGURED.to_string()))
    }

    async fn get_items(
        &self,
        _target: &SourceTarget,
        _ids: &[i64],
    ) -> Result<Vec<WorkItemDetail>> {
        Err(Error::BackendMessage(UNCONFIGURED.to_string()))
    }
}
