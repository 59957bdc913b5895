use crate::clock::Clock;
use crate::config::{DEFAULT_PAGE_SIZE, DEFAULT_RUNNING_FRESHNESS};
use crate::models::Connection;
use crate::sync::models::{
    MirroredItem, SyncCursor, SyncOutcome, SyncState, SyncTrigger, canonical_item_url,
};
use crate::sync::query::build_id_query;
use crate::sync::traits::{SourceClient, SourceTarget, SyncRepository, SyncUnitOfWork};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs one synchronization pass at a time against the configured connection.
///
/// The engine does not enforce single-flight by itself; callers go through
/// `SyncGate` (see `SyncService`).
pub struct SyncEngine {
    repository: Arc<dyn SyncRepository>,
    client: Arc<dyn SourceClient>,
    clock: Arc<dyn Clock>,
    page_size: usize,
    running_freshness: chrono::Duration,
}

enum Preflight {
    Ready {
        connection: Connection,
        state: SyncState,
    },
    Skip(SyncOutcome),
}

/// Counters for the pass in flight. `cursor` is the working watermark.
#[derive(Debug, Default)]
struct PassProgress {
    queries: u64,
    items_fetched: u64,
    items_upserted: u64,
    cursor: Option<SyncCursor>,
}

struct PassPlan {
    target: SourceTarget,
    area_path: String,
}

impl SyncEngine {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        repository: Arc<dyn SyncRepository>,
        client: Arc<dyn SourceClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            client,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
            running_freshness: to_chrono(DEFAULT_RUNNING_FRESHNESS),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_running_freshness(mut self, window: std::time::Duration) -> Self {
        self.running_freshness = to_chrono(window);
        self
    }

    pub fn repository(&self) -> &Arc<dyn SyncRepository> {
        &self.repository
    }

    pub fn client(&self) -> &Arc<dyn SourceClient> {
        &self.client
    }

    /// Execute one pass and report what happened. Never returns an error: failures
    /// are recorded in `SyncState` and in the outcome.
    #[tracing::instrument(
        level = "info",
        skip(self, cancel),
        fields(connection_id = tracing::field::Empty)
    )]
    pub async fn run_pass(&self, trigger: SyncTrigger, cancel: &CancellationToken) -> SyncOutcome {
        let (connection, mut state) = match self.preflight().await {
            Ok(Preflight::Ready { connection, state }) => (connection, state),
            Ok(Preflight::Skip(outcome)) => return outcome,
            Err(e) => {
                tracing::warn!(error = %e, "sync preflight failed");
                return failed_outcome(&PassProgress::default(), e.full_message());
            }
        };
        tracing::Span::current().record("connection_id", tracing::field::display(connection.id));

        // Liveness marker goes out before any source I/O and outside the pass transaction.
        state.mark_running(self.clock.now());
        if let Err(e) = self.repository.put_sync_state(&state).await {
            tracing::warn!(error = %e, "failed to record running sync state");
            return failed_outcome(&PassProgress::default(), e.full_message());
        }

        let mut progress = PassProgress {
            cursor: state.cursor(),
            ..Default::default()
        };

        match self
            .execute_pass(&connection, &state, &mut progress, cancel)
            .await
        {
            Ok(done) => {
                tracing::info!(
                    queries = progress.queries,
                    items_fetched = progress.items_fetched,
                    items_upserted = progress.items_upserted,
                    last_item_id = ?done.last_successful_item_id,
                    "sync pass succeeded"
                );
                SyncOutcome {
                    succeeded: true,
                    skipped: false,
                    items_fetched: progress.items_fetched,
                    items_upserted: progress.items_upserted,
                    last_changed: done.last_successful_changed,
                    last_item_id: done.last_successful_item_id,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.full_message();
                tracing::warn!(
                    error = %message,
                    queries = progress.queries,
                    items_fetched = progress.items_fetched,
                    "sync pass failed; changes rolled back"
                );
                state.mark_failed(self.clock.now(), message.clone());
                if let Err(store_err) = self.repository.put_sync_state(&state).await {
                    tracing::error!(error = %store_err, "failed to record failed sync state");
                }
                // Report the cursor the store still holds, not the discarded working one.
                progress.cursor = state.cursor();
                progress.items_upserted = 0;
                failed_outcome(&progress, message)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn preflight(&self) -> Result<Preflight> {
        let Some(connection) = self.repository.get_connection().await? else {
            return Ok(Preflight::Skip(SyncOutcome::not_run(
                "sync connection is not configured",
            )));
        };
        if !connection.enabled {
            return Ok(Preflight::Skip(SyncOutcome::not_run(
                "sync connection is disabled",
            )));
        }

        let state = self
            .repository
            .get_sync_state(connection.id)
            .await?
            .unwrap_or_else(|| SyncState::new(connection.id));

        if state.is_running_within(self.clock.now(), self.running_freshness) {
            tracing::info!(
                connection_id = %connection.id,
                last_attempted_at = ?state.last_attempted_at,
                "another sync pass is still marked running; skipping"
            );
            return Ok(Preflight::Skip(SyncOutcome::skipped(state.cursor())));
        }

        Ok(Preflight::Ready { connection, state })
    }

    /// Whole pass inside one unit of work: commit on success, roll back on any error.
    async fn execute_pass(
        &self,
        connection: &Connection,
        running: &SyncState,
        progress: &mut PassProgress,
        cancel: &CancellationToken,
    ) -> Result<SyncState> {
        let plan = self.plan(connection).await?;

        let mut unit = self.repository.begin().await?;
        match self
            .page_loop(unit.as_mut(), connection, &plan, progress, cancel)
            .await
        {
            Ok(()) => {
                let mut done = running.clone();
                done.mark_succeeded(progress.cursor, self.clock.now());
                unit.put_sync_state(&done).await?;
                unit.commit().await?;
                Ok(done)
            }
            Err(e) => {
                if let Err(rb) = unit.rollback().await {
                    tracing::warn!(error = %rb, "rollback of sync pass failed");
                }
                Err(e)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn plan(&self, connection: &Connection) -> Result<PassPlan> {
        let settings = self.repository.get_source_settings().await?;
        let target = SourceTarget::for_connection(connection, &settings);
        let area_path = self.resolve_area_path(connection, &target).await?;
        Ok(PassPlan { target, area_path })
    }

    /// Configured area path, else the team's default area path, else no area filter.
    async fn resolve_area_path(
        &self,
        connection: &Connection,
        target: &SourceTarget,
    ) -> Result<String> {
        if !connection.area_path.trim().is_empty() {
            return Ok(connection.area_path.trim().to_string());
        }
        let Some(team) = connection.team_ref() else {
            return Ok(String::new());
        };
        let paths = self
            .client
            .get_team_area_paths(target, &connection.project, team)
            .await?;
        Ok(paths
            .default_area_path
            .or_else(|| paths.area_paths.into_iter().next().map(|p| p.value))
            .unwrap_or_default())
    }

    async fn page_loop(
        &self,
        unit: &mut dyn SyncUnitOfWork,
        connection: &Connection,
        plan: &PassPlan,
        progress: &mut PassProgress,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let query =
                build_id_query(&connection.project, &plan.area_path, progress.cursor.as_ref());
            let ids = self
                .client
                .query_ids(&plan.target, &connection.project, &query, self.page_size)
                .await?;
            progress.queries += 1;
            if ids.is_empty() {
                return Ok(());
            }
            progress.items_fetched += ids.len() as u64;

            let details = self.client.get_items(&plan.target, &ids).await?;
            let mut existing: HashMap<i64, MirroredItem> = unit
                .find_items(connection.id, &ids)
                .await?
                .into_iter()
                .map(|item| (item.external_id, item))
                .collect();

            let page_start = progress.cursor;
            let mut page = Vec::with_capacity(details.len());
            for detail in &details {
                let url = canonical_item_url(
                    &plan.target.base_url,
                    &connection.organization,
                    &connection.project,
                    detail.id,
                );
                let item = match existing.remove(&detail.id) {
                    Some(mut item) => {
                        item.apply_detail(detail, url);
                        item
                    }
                    None => MirroredItem::new(connection.id, detail, url),
                };
                page.push(item);
                // Per record: the source may return ties out of id order.
                SyncCursor::advance(&mut progress.cursor, detail.cursor());
            }

            progress.items_upserted += unit.upsert_items(&page).await?;
            tracing::debug!(
                page_ids = ids.len(),
                page_items = page.len(),
                cursor = ?progress.cursor,
                "sync page applied"
            );

            if ids.len() < self.page_size {
                return Ok(());
            }
            if progress.cursor == page_start {
                return Err(Error::BackendMessage(format!(
                    "sync cursor did not advance after a full page of {} ids",
                    ids.len()
                )));
            }
        }
    }
}

fn failed_outcome(progress: &PassProgress, message: String) -> SyncOutcome {
    SyncOutcome {
        succeeded: false,
        skipped: false,
        items_fetched: progress.items_fetched,
        items_upserted: progress.items_upserted,
        last_changed: progress.cursor.map(|c| c.changed),
        last_item_id: progress.cursor.map(|c| c.item_id),
        error: Some(message),
    }
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::hours(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemorySyncRepository;
    use crate::sync::models::{SyncRunStatus, TeamAreaPaths};
    use crate::sync::traits::{ConnectionStore, ListQuery, SyncStateStore};
    use crate::test_support::{
        ScriptedSourceClient, connection, detail, details_in_order, seeded_memory_repository, ts,
    };

    fn engine(
        repo: &MemorySyncRepository,
        client: &Arc<ScriptedSourceClient>,
        page_size: usize,
    ) -> SyncEngine {
        SyncEngine::new(
            Arc::new(repo.clone()),
            client.clone(),
            Arc::new(ManualClock::new(ts(86_400))),
        )
        .with_page_size(page_size)
    }

    #[tokio::test]
    async fn pages_until_short_page() {
        let (repo, conn) = seeded_memory_repository(true).await.unwrap();
        let client = Arc::new(
            ScriptedSourceClient::new()
                .with_items(details_in_order(1..=450, 0))
                .with_page(1..=200)
                .with_page(201..=400)
                .with_page(401..=450),
        );

        let outcome = engine(&repo, &client, 200)
            .run_pass(SyncTrigger::Manual, &CancellationToken::new())
            .await;

        assert!(outcome.succeeded, "{outcome:?}");
        assert_eq!(outcome.items_fetched, 450);
        assert_eq!(outcome.items_upserted, 450);
        assert_eq!(outcome.cursor(), Some(SyncCursor::new(ts(449), 450)));
        assert_eq!(client.query_count(), 3);

        let queries = client.queries();
        assert!(!queries[0].query.contains("[System.Id] >"));
        assert!(queries[1].query.contains("[System.Id] > 200)"));
        assert!(queries[2].query.contains("[System.Id] > 400)"));
        assert!(queries.iter().all(|q| q.top == 200 && q.project == "Fabrikam"));

        let state = repo.get_sync_state(conn.id).await.unwrap().unwrap();
        assert_eq!(state.last_run_status, SyncRunStatus::Succeeded);
        assert_eq!(state.cursor(), Some(SyncCursor::new(ts(449), 450)));
        assert_eq!(repo.item_count().await, 450);
    }

    #[tokio::test]
    async fn equal_timestamps_break_ties_on_highest_id() {
        for order in [[7, 10], [10, 7]] {
            let (repo, _conn) = seeded_memory_repository(true).await.unwrap();
            let client = Arc::new(
                ScriptedSourceClient::new()
                    .with_items([detail(7, ts(60)), detail(10, ts(60))])
                    .with_page(order),
            );
            let outcome = engine(&repo, &client, 200)
                .run_pass(SyncTrigger::Manual, &CancellationToken::new())
                .await;
            assert_eq!(outcome.cursor(), Some(SyncCursor::new(ts(60), 10)));
        }
    }

    #[tokio::test]
    async fn disabled_connection_does_nothing() {
        let (repo, conn) = seeded_memory_repository(false).await.unwrap();
        let client = Arc::new(ScriptedSourceClient::new().with_page([1]));

        let outcome = engine(&repo, &client, 200)
            .run_pass(SyncTrigger::Scheduled, &CancellationToken::new())
            .await;

        assert!(outcome.succeeded);
        assert!(!outcome.skipped);
        assert_eq!(outcome.items_fetched, 0);
        assert!(outcome.error.unwrap().contains("disabled"));
        assert_eq!(client.query_count(), 0);
        assert!(repo.get_sync_state(conn.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_connection_reports_not_configured() {
        let repo = MemorySyncRepository::new();
        let client = Arc::new(ScriptedSourceClient::new());
        let outcome = engine(&repo, &client, 200)
            .run_pass(SyncTrigger::Manual, &CancellationToken::new())
            .await;
        assert!(outcome.succeeded);
        assert!(outcome.error.unwrap().contains("not configured"));
        assert_eq!(client.query_count(), 0);
    }

    #[tokio::test]
    async fn failure_rolls_back_earlier_pages() {
        let (repo, conn) = seeded_memory_repository(true).await.unwrap();
        let client = Arc::new(
            ScriptedSourceClient::new()
                .with_items(details_in_order(1..=4, 0))
                .with_page([1, 2])
                .with_page([3, 4])
                .fail_get_items_on(2),
        );

        let outcome = engine(&repo, &client, 2)
            .run_pass(SyncTrigger::Manual, &CancellationToken::new())
            .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.items_upserted, 0);
        assert_eq!(outcome.items_fetched, 4);
        assert_eq!(outcome.cursor(), None);
        assert!(outcome.error.as_deref().unwrap().contains("scripted failure on fetch 2"));
        assert_eq!(repo.item_count().await, 0);

        let state = repo.get_sync_state(conn.id).await.unwrap().unwrap();
        assert_eq!(state.last_run_status, SyncRunStatus::Failed);
        assert_eq!(state.cursor(), None);
        assert_eq!(state.last_completed_at, Some(ts(86_400)));
        assert!(state.last_error.unwrap().contains("fetch work item details"));
    }

    #[tokio::test]
    async fn failure_keeps_previous_cursor() {
        let (repo, conn) = seeded_memory_repository(true).await.unwrap();
        let mut state = SyncState::new(conn.id);
        state.mark_succeeded(Some(SyncCursor::new(ts(5), 5)), ts(10));
        repo.put_sync_state(&state).await.unwrap();

        let client = Arc::new(ScriptedSourceClient::new().fail_query_on(1));
        let outcome = engine(&repo, &client, 200)
            .run_pass(SyncTrigger::Manual, &CancellationToken::new())
            .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.cursor(), Some(SyncCursor::new(ts(5), 5)));
        let stored = repo.get_sync_state(conn.id).await.unwrap().unwrap();
        assert_eq!(stored.cursor(), Some(SyncCursor::new(ts(5), 5)));
        assert_eq!(stored.last_run_status, SyncRunStatus::Failed);
    }

    #[tokio::test]
    async fn fresh_running_state_skips_and_stale_one_proceeds() {
        let (repo, conn) = seeded_memory_repository(true).await.unwrap();
        let client = Arc::new(ScriptedSourceClient::new());
        let engine = engine(&repo, &client, 200);

        let mut running = SyncState::new(conn.id);
        running.mark_running(ts(86_400 - 30 * 60));
        repo.put_sync_state(&running).await.unwrap();

        let outcome = engine
            .run_pass(SyncTrigger::Scheduled, &CancellationToken::new())
            .await;
        assert!(outcome.succeeded && outcome.skipped);
        assert_eq!(outcome.error, None);
        assert_eq!(client.query_count(), 0);
        assert_eq!(repo.get_sync_state(conn.id).await.unwrap(), Some(running.clone()));

        // Left behind by a crashed process three hours ago.
        running.mark_running(ts(86_400 - 3 * 3600));
        repo.put_sync_state(&running).await.unwrap();
        let outcome = engine
            .run_pass(SyncTrigger::Scheduled, &CancellationToken::new())
            .await;
        assert!(outcome.succeeded && !outcome.skipped);
        assert_eq!(client.query_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_pass_is_recorded_as_failure() {
        let (repo, conn) = seeded_memory_repository(true).await.unwrap();
        let client = Arc::new(ScriptedSourceClient::new().with_page([1]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = engine(&repo, &client, 200)
            .run_pass(SyncTrigger::Manual, &cancel)
            .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.error.as_deref(), Some("sync cancelled"));
        assert_eq!(client.query_count(), 0);
        let state = repo.get_sync_state(conn.id).await.unwrap().unwrap();
        assert_eq!(state.last_error.as_deref(), Some("sync cancelled"));
    }

    #[tokio::test]
    async fn full_page_without_details_fails_instead_of_looping() {
        let (repo, _conn) = seeded_memory_repository(true).await.unwrap();
        let client = Arc::new(
            ScriptedSourceClient::new()
                .with_page([1, 2])
                .with_page([1, 2])
                .with_page([1, 2]),
        );

        let outcome = engine(&repo, &client, 2)
            .run_pass(SyncTrigger::Manual, &CancellationToken::new())
            .await;

        assert!(!outcome.succeeded);
        assert!(outcome.error.unwrap().contains("did not advance"));
        assert_eq!(client.query_count(), 1);
    }

    #[tokio::test]
    async fn blank_area_path_resolves_from_team_default() {
        let repo = MemorySyncRepository::new();
        let conn = connection(true)
            .unwrap()
            .with_team(Some("Platform".into()), None);
        let conn = Connection {
            area_path: String::new(),
            ..conn
        };
        repo.upsert_connection(&conn).await.unwrap();

        let client = Arc::new(ScriptedSourceClient::new().with_team_area_paths(TeamAreaPaths {
            default_area_path: Some(r"Fabrikam\Platform".into()),
            area_paths: Vec::new(),
        }));
        let outcome = engine(&repo, &client, 200)
            .run_pass(SyncTrigger::Manual, &CancellationToken::new())
            .await;

        assert!(outcome.succeeded);
        assert_eq!(client.area_path_calls(), 1);
        assert!(client.queries()[0]
            .query
            .contains(r"[System.AreaPath] UNDER 'Fabrikam\\Platform'"));
    }

    #[tokio::test]
    async fn items_carry_canonical_urls_and_normalized_assignees() {
        let (repo, conn) = seeded_memory_repository(true).await.unwrap();
        let client = Arc::new(
            ScriptedSourceClient::new()
                .with_items([detail(4, ts(1))])
                .with_page([4]),
        );
        engine(&repo, &client, 200)
            .run_pass(SyncTrigger::Manual, &CancellationToken::new())
            .await;

        let items = repo.list_items(conn.id, ListQuery::default()).await.unwrap();
        assert_eq!(
            items[0].url,
            "https://dev.azure.com/contoso/Fabrikam/_workitems/edit/4"
        );
        assert_eq!(items[0].assigned_to.as_deref(), Some("user1@contoso.com"));
    }
}
