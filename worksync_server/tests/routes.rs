use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use worksync_core::test_support::{
    ScriptedSourceClient, details_in_order, seeded_memory_repository, ts,
};
use worksync_core::{
    ManualClock, MemorySyncRepository, SourceTeam, SourceUser, SyncConfig, SyncRunStatus,
    SyncStateStore, SyncTrigger, TeamAreaPath, TeamAreaPaths,
};
use worksync_server::server::{AppState, build_state, build_state_with, router};

fn state(repo: &MemorySyncRepository, client: Arc<ScriptedSourceClient>) -> AppState {
    build_state_with(
        &SyncConfig::default(),
        Arc::new(repo.clone()),
        client,
        Arc::new(ManualClock::new(ts(86_400))),
    )
}

async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
    let res = router(state.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn manual_run_returns_outcome_and_updates_state() {
    let (repo, _conn) = seeded_memory_repository(true).await.unwrap();
    let client = Arc::new(
        ScriptedSourceClient::new()
            .with_items(details_in_order(1..=2, 0))
            .with_page([1, 2]),
    );
    let state = state(&repo, client);

    let (status, body) = send(
        &state,
        Request::builder()
            .method("POST")
            .uri("/api/v1/sync/run")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"], true);
    assert_eq!(body["itemsFetched"], 2);
    assert_eq!(body["itemsUpserted"], 2);
    assert_eq!(body["lastItemId"], 2);

    let (status, body) = send(&state, get("/api/v1/sync/state")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inProgress"], false);
    assert_eq!(
        body["state"]["lastRunStatus"],
        serde_json::to_value(SyncRunStatus::Succeeded).unwrap()
    );
    assert_eq!(body["state"]["lastSuccessfulItemId"], 2);

    let (status, body) = send(&state, get("/api/v1/sync/items?limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["externalId"], 1);
}

#[tokio::test]
async fn run_without_connection_is_a_soft_success() {
    let repo = MemorySyncRepository::new();
    let state = state(&repo, Arc::new(ScriptedSourceClient::new()));

    let (status, body) = send(
        &state,
        Request::builder()
            .method("POST")
            .uri("/api/v1/sync/run")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"], true);
    assert!(body["error"].as_str().unwrap().contains("not configured"));

    let (_, body) = send(&state, get("/api/v1/sync/state")).await;
    assert_eq!(body["connection"], Value::Null);
}

#[tokio::test]
async fn connection_and_settings_round_trip_through_the_api() {
    let repo = MemorySyncRepository::new();
    let state = state(&repo, Arc::new(ScriptedSourceClient::new()));

    let (status, body) = send(
        &state,
        json(
            "PUT",
            "/api/v1/sync/connection",
            serde_json::json!({
                "organization": "contoso",
                "project": "Fabrikam",
                "teamName": "Web"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);
    assert_eq!(body["team_name"], "Web");

    let (status, _) = send(
        &state,
        json(
            "PUT",
            "/api/v1/sync/source/settings",
            serde_json::json!({ "base_url": "https://tfs.contoso.local/" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&state, get("/api/v1/sync/source/settings")).await;
    assert_eq!(body["base_url"], "https://tfs.contoso.local/");

    let (status, body) = send(
        &state,
        json(
            "PUT",
            "/api/v1/sync/connection",
            serde_json::json!({ "organization": "contoso", "project": "  " }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("project is empty"));
}

#[tokio::test]
async fn source_metadata_routes_delegate_to_client() {
    let (repo, _conn) = seeded_memory_repository(true).await.unwrap();
    let client = Arc::new(
        ScriptedSourceClient::new()
            .with_teams(vec![SourceTeam {
                id: "t1".into(),
                name: "Web".into(),
            }])
            .with_users(vec![SourceUser {
                id: "u1".into(),
                display_name: "Ada Lovelace".into(),
                unique_name: "ada@contoso.com".into(),
            }])
            .with_team_area_paths(TeamAreaPaths {
                default_area_path: Some(r"Fabrikam\Web".into()),
                area_paths: vec![TeamAreaPath {
                    value: r"Fabrikam\Web".into(),
                    include_children: true,
                }],
            }),
    );
    let state = state(&repo, client);

    let (status, body) = send(&state, get("/api/v1/sync/source/projects/Fabrikam/teams")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "Web");

    let (status, body) = send(
        &state,
        get("/api/v1/sync/source/projects/Fabrikam/teams/Web/area-paths"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["defaultAreaPath"], r"Fabrikam\Web");
    assert_eq!(body["areaPaths"][0]["includeChildren"], true);

    let (status, body) = send(&state, get("/api/v1/sync/source/users")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["uniqueName"], "ada@contoso.com");
}

#[tokio::test]
async fn metadata_without_connection_is_not_found() {
    let repo = MemorySyncRepository::new();
    let state = state(&repo, Arc::new(ScriptedSourceClient::new()));
    let (status, body) = send(&state, get("/api/v1/sync/source/projects")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not configured"));
}

#[tokio::test]
async fn invalid_item_limit_is_rejected() {
    let repo = MemorySyncRepository::new();
    let state = state(&repo, Arc::new(ScriptedSourceClient::new()));
    let (status, _) = send(&state, get("/api/v1/sync/items?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_ok() {
    let repo = MemorySyncRepository::new();
    let state = state(&repo, Arc::new(ScriptedSourceClient::new()));
    let (status, body) = send(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sync_in_progress"], false);
}

#[tokio::test]
async fn sqlite_backed_state_persists_configured_connection() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SyncConfig {
        database_path: dir.path().join("worksync.db"),
        ..SyncConfig::default()
    };

    let state = build_state(&cfg, Arc::new(ScriptedSourceClient::new()))
        .await
        .unwrap();
    let (status, _) = send(
        &state,
        json(
            "PUT",
            "/api/v1/sync/connection",
            serde_json::json!({ "organization": "contoso", "project": "Fabrikam" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let reopened = build_state(&cfg, Arc::new(ScriptedSourceClient::new()))
        .await
        .unwrap();
    let (_, body) = send(&reopened, get("/api/v1/sync/state")).await;
    assert_eq!(body["connection"]["project"], "Fabrikam");
}

#[tokio::test]
async fn dropped_run_request_still_finishes_the_pass() {
    let (repo, conn) = seeded_memory_repository(true).await.unwrap();
    let client = Arc::new(
        ScriptedSourceClient::new()
            .with_items(details_in_order(1..=1, 0))
            .with_page([1])
            .with_query_delay(Duration::from_millis(200)),
    );
    let state = state(&repo, client);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/sync/run")
        .body(Body::empty())
        .unwrap();
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), router(state.clone()).oneshot(req)).await;
    assert!(abandoned.is_err(), "request should still be waiting on the pass");

    for _ in 0..100 {
        if !state.sync.gate().is_busy() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stored = repo.get_sync_state(conn.id).await.unwrap().unwrap();
    assert_eq!(stored.last_run_status, SyncRunStatus::Succeeded);
    assert_eq!(stored.last_successful_item_id, Some(1));

    let next = state
        .sync
        .trigger(SyncTrigger::Manual, &CancellationToken::new())
        .await;
    assert!(next.succeeded && !next.skipped, "{next:?}");
}
