use crate::error::ApiError;
use crate::server::AppState;
use axum::Extension;
use axum::Json;
use axum::extract::{Path, Query};
use axum::routing::{get, post, put};
use serde::Deserialize;
use std::sync::Arc;
use worksync_core::{
    Connection, ConnectionInput, Error as CoreError, ListQuery, MirroredItem, SourceProject,
    SourceSettings, SourceTeam, SourceUser, SyncOutcome, SyncStatus, SyncTrigger, TeamAreaPaths,
};

const MAX_ITEMS_LIMIT: usize = 1_000;

#[derive(Debug, Deserialize)]
pub struct ItemsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/sync/run", post(run_sync))
        .route("/sync/state", get(get_state))
        .route("/sync/connection", put(put_connection))
        .route("/sync/items", get(list_items))
        .route(
            "/sync/source/settings",
            get(get_source_settings).put(put_source_settings),
        )
        .route("/sync/source/projects", get(list_projects))
        .route("/sync/source/projects/{project}/teams", get(list_teams))
        .route(
            "/sync/source/projects/{project}/teams/{team}/area-paths",
            get(get_team_area_paths),
        )
        .route("/sync/source/users", get(list_users))
}

/// Manual trigger. Waits for the pass and returns its outcome.
///
/// The pass runs on its own task so a dropped request cannot abandon it mid-page.
#[tracing::instrument(level = "info", skip_all)]
pub async fn run_sync(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<SyncOutcome>, ApiError> {
    let cancel = state.cancel.child_token();
    let sync = state.sync.clone();
    let outcome = tokio::spawn(async move { sync.trigger(SyncTrigger::Manual, &cancel).await })
        .await
        .map_err(|e| CoreError::BackendMessage(format!("sync task ended abnormally: {e}")))?;
    Ok(Json(outcome))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn get_state(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<SyncStatus>, ApiError> {
    Ok(Json(state.sync.status().await?))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn put_connection(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ConnectionInput>,
) -> Result<Json<Connection>, ApiError> {
    let now = state.clock.now();
    Ok(Json(state.sync.configure_connection(req, now).await?))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn list_items(
    Extension(state): Extension<Arc<AppState>>,
    Query(q): Query<ItemsQuery>,
) -> Result<Json<Vec<MirroredItem>>, ApiError> {
    let limit = q.limit.unwrap_or(ListQuery::default().limit);
    if limit == 0 || limit > MAX_ITEMS_LIMIT {
        return Err(ApiError::InvalidInput(format!(
            "limit must be within 1..={MAX_ITEMS_LIMIT}"
        )));
    }
    let query = ListQuery {
        limit,
        offset: q.offset.unwrap_or(0),
    };
    Ok(Json(state.sync.list_items(query).await?))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn get_source_settings(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<SourceSettings>, ApiError> {
    Ok(Json(state.sync.source_settings().await?))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn put_source_settings(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<SourceSettings>,
) -> Result<Json<SourceSettings>, ApiError> {
    state.sync.set_source_settings(req.clone()).await?;
    Ok(Json(req))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn list_projects(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<SourceProject>>, ApiError> {
    Ok(Json(state.sync.list_projects().await?))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn list_teams(
    Extension(state): Extension<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<Vec<SourceTeam>>, ApiError> {
    Ok(Json(state.sync.list_teams(&project).await?))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn get_team_area_paths(
    Extension(state): Extension<Arc<AppState>>,
    Path((project, team)): Path<(String, String)>,
) -> Result<Json<TeamAreaPaths>, ApiError> {
    Ok(Json(state.sync.team_area_paths(&project, &team).await?))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn list_users(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<SourceUser>>, ApiError> {
    Ok(Json(state.sync.list_users().await?))
}
