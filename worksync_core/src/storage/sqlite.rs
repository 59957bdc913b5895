//! SQLite-backed `SyncRepository`.
//!
//! Holds the connection record, source settings, sync state and mirrored items in a
//! single WAL-mode SQLite file. A pass runs inside one `sqlx::Transaction`; the
//! liveness and failure writes of `SyncState` go through the pool directly.
//!
//! Usage:
//! ```ignore
//! let repo = SqliteSyncRepository::open("/var/lib/worksync/worksync.db").await?;
//! ```

use crate::models::{Connection, ConnectionId, SourceSettings};
use crate::sync::models::{MirroredItem, SyncRunStatus, SyncState};
use crate::sync::traits::{
    ConnectionStore, ListQuery, SyncRepository, SyncStateStore, SyncUnitOfWork, WorkItemStore,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;

/// Ids per `IN (...)` lookup; stays well below SQLite's bound-parameter limit.
const LOOKUP_CHUNK: usize = 500;

#[derive(Clone)]
pub struct SqliteSyncRepository {
    pool: SqlitePool,
}

impl SqliteSyncRepository {
    /// Create (or open) the database at `path`, creating parent directories and the schema.
    #[tracing::instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::backend("create sqlite directory", e))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| Error::backend("sqlite connect options", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("open sqlite pool", e))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and make sure the schema exists.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::backend("sqlite schema migration", e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
    connection_id TEXT NOT NULL,
    organization TEXT NOT NULL,
    project TEXT NOT NULL,
    area_path TEXT NOT NULL,
    team_name TEXT,
    team_id TEXT,
    enabled INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS source_settings (
    singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
    base_url TEXT
);

CREATE TABLE IF NOT EXISTS sync_state (
    connection_id TEXT PRIMARY KEY,
    last_successful_changed TEXT,
    last_successful_item_id INTEGER,
    last_attempted_at TEXT,
    last_completed_at TEXT,
    last_run_status TEXT NOT NULL,
    last_error TEXT
);

CREATE TABLE IF NOT EXISTS mirrored_items (
    connection_id TEXT NOT NULL,
    external_id INTEGER NOT NULL,
    revision INTEGER NOT NULL,
    changed_at TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    item_type TEXT NOT NULL,
    area_path TEXT NOT NULL,
    iteration_path TEXT NOT NULL,
    assigned_to TEXT,
    url TEXT NOT NULL,
    PRIMARY KEY (connection_id, external_id)
);

CREATE INDEX IF NOT EXISTS mirrored_items_assignee_idx ON mirrored_items(connection_id, assigned_to);
"#;

const UPSERT_SYNC_STATE: &str = "INSERT INTO sync_state (
        connection_id, last_successful_changed, last_successful_item_id,
        last_attempted_at, last_completed_at, last_run_status, last_error)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT(connection_id) DO UPDATE SET
        last_successful_changed = excluded.last_successful_changed,
        last_successful_item_id = excluded.last_successful_item_id,
        last_attempted_at = excluded.last_attempted_at,
        last_completed_at = excluded.last_completed_at,
        last_run_status = excluded.last_run_status,
        last_error = excluded.last_error";

const UPSERT_ITEM: &str = "INSERT INTO mirrored_items (
        connection_id, external_id, revision, changed_at, title, status, item_type,
        area_path, iteration_path, assigned_to, url)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
     ON CONFLICT(connection_id, external_id) DO UPDATE SET
        revision = excluded.revision,
        changed_at = excluded.changed_at,
        title = excluded.title,
        status = excluded.status,
        item_type = excluded.item_type,
        area_path = excluded.area_path,
        iteration_path = excluded.iteration_path,
        assigned_to = excluded.assigned_to,
        url = excluded.url";

const ITEM_COLUMNS: &str = "connection_id, external_id, revision, changed_at, title, status, \
     item_type, area_path, iteration_path, assigned_to, url";

// ── Helpers ─────────────────────────────────────────────────────

fn db_err(e: sqlx::Error) -> Error {
    Error::backend_sqlx(e)
}

/// Fixed-width UTC text so stored timestamps round-trip exactly.
fn fmt_ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::backend(format!("invalid stored timestamp '{raw}'"), e))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_connection_id(raw: &str) -> Result<ConnectionId> {
    ConnectionId::from_str(raw).map_err(|e| Error::backend("invalid stored connection id", e))
}

fn bind_sync_state<'q>(
    q: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    state: &'q SyncState,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    q.bind(state.connection_id.to_string())
        .bind(state.last_successful_changed.as_ref().map(fmt_ts))
        .bind(state.last_successful_item_id)
        .bind(state.last_attempted_at.as_ref().map(fmt_ts))
        .bind(state.last_completed_at.as_ref().map(fmt_ts))
        .bind(state.last_run_status.as_str())
        .bind(state.last_error.as_deref())
}

// ── Row mapping helpers ─────────────────────────────────────────

fn row_to_connection(r: &SqliteRow) -> Result<Connection> {
    let id: String = r.try_get("connection_id").map_err(db_err)?;
    let enabled: i64 = r.try_get("enabled").map_err(db_err)?;
    let created_at: String = r.try_get("created_at").map_err(db_err)?;
    let updated_at: String = r.try_get("updated_at").map_err(db_err)?;
    Ok(Connection {
        id: parse_connection_id(&id)?,
        organization: r.try_get("organization").map_err(db_err)?,
        project: r.try_get("project").map_err(db_err)?,
        area_path: r.try_get("area_path").map_err(db_err)?,
        team_name: r.try_get("team_name").map_err(db_err)?,
        team_id: r.try_get("team_id").map_err(db_err)?,
        enabled: enabled != 0,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn row_to_sync_state(r: &SqliteRow) -> Result<SyncState> {
    let id: String = r.try_get("connection_id").map_err(db_err)?;
    let status: String = r.try_get("last_run_status").map_err(db_err)?;
    Ok(SyncState {
        connection_id: parse_connection_id(&id)?,
        last_successful_changed: parse_opt_ts(
            r.try_get("last_successful_changed").map_err(db_err)?,
        )?,
        last_successful_item_id: r.try_get("last_successful_item_id").map_err(db_err)?,
        last_attempted_at: parse_opt_ts(r.try_get("last_attempted_at").map_err(db_err)?)?,
        last_completed_at: parse_opt_ts(r.try_get("last_completed_at").map_err(db_err)?)?,
        last_run_status: status.parse::<SyncRunStatus>()?,
        last_error: r.try_get("last_error").map_err(db_err)?,
    })
}

fn row_to_item(r: &SqliteRow) -> Result<MirroredItem> {
    let id: String = r.try_get("connection_id").map_err(db_err)?;
    let changed_at: String = r.try_get("changed_at").map_err(db_err)?;
    Ok(MirroredItem {
        connection_id: parse_connection_id(&id)?,
        external_id: r.try_get("external_id").map_err(db_err)?,
        revision: r.try_get("revision").map_err(db_err)?,
        changed_at: parse_ts(&changed_at)?,
        title: r.try_get("title").map_err(db_err)?,
        status: r.try_get("status").map_err(db_err)?,
        item_type: r.try_get("item_type").map_err(db_err)?,
        area_path: r.try_get("area_path").map_err(db_err)?,
        iteration_path: r.try_get("iteration_path").map_err(db_err)?,
        assigned_to: r.try_get("assigned_to").map_err(db_err)?,
        url: r.try_get("url").map_err(db_err)?,
    })
}

// ── Store impls ─────────────────────────────────────────────────

#[async_trait]
impl ConnectionStore for SqliteSyncRepository {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_connection(&self) -> Result<Option<Connection>> {
        let row = sqlx::query(
            "SELECT connection_id, organization, project, area_path, team_name, team_id,
                    enabled, created_at, updated_at
             FROM connections WHERE singleton = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_connection).transpose()
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, connection),
        fields(connection_id = %connection.id)
    )]
    async fn upsert_connection(&self, connection: &Connection) -> Result<()> {
        sqlx::query(
            "INSERT INTO connections (singleton, connection_id, organization, project, area_path,
                                      team_name, team_id, enabled, created_at, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(singleton) DO UPDATE SET
                connection_id = excluded.connection_id,
                organization = excluded.organization,
                project = excluded.project,
                area_path = excluded.area_path,
                team_name = excluded.team_name,
                team_id = excluded.team_id,
                enabled = excluded.enabled,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
        )
        .bind(connection.id.to_string())
        .bind(&connection.organization)
        .bind(&connection.project)
        .bind(&connection.area_path)
        .bind(connection.team_name.as_deref())
        .bind(connection.team_id.as_deref())
        .bind(connection.enabled)
        .bind(fmt_ts(&connection.created_at))
        .bind(fmt_ts(&connection.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_source_settings(&self) -> Result<SourceSettings> {
        let row = sqlx::query("SELECT base_url FROM source_settings WHERE singleton = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(r) => Ok(SourceSettings {
                base_url: r.try_get("base_url").map_err(db_err)?,
            }),
            None => Ok(SourceSettings::default()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn set_source_settings(&self, settings: &SourceSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO source_settings (singleton, base_url) VALUES (1, ?1)
             ON CONFLICT(singleton) DO UPDATE SET base_url = excluded.base_url",
        )
        .bind(settings.base_url.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl SyncStateStore for SqliteSyncRepository {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_sync_state(&self, connection_id: ConnectionId) -> Result<Option<SyncState>> {
        let row = sqlx::query(
            "SELECT connection_id, last_successful_changed, last_successful_item_id,
                    last_attempted_at, last_completed_at, last_run_status, last_error
             FROM sync_state WHERE connection_id = ?1",
        )
        .bind(connection_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_sync_state).transpose()
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, state),
        fields(status = %state.last_run_status)
    )]
    async fn put_sync_state(&self, state: &SyncState) -> Result<()> {
        bind_sync_state(sqlx::query(UPSERT_SYNC_STATE), state)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl SyncRepository for SqliteSyncRepository {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn begin(&self) -> Result<Box<dyn SyncUnitOfWork>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(SqliteUnitOfWork { tx }))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_items(
        &self,
        connection_id: ConnectionId,
        query: ListQuery,
    ) -> Result<Vec<MirroredItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM mirrored_items
             WHERE connection_id = ?1
             ORDER BY external_id ASC
             LIMIT ?2 OFFSET ?3"
        ))
        .bind(connection_id.to_string())
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_item).collect()
    }
}

/// One pass worth of writes inside a SQLite transaction. Dropped without commit, sqlx
/// rolls the transaction back.
pub struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl WorkItemStore for SqliteUnitOfWork {
    #[tracing::instrument(
        level = "debug",
        skip(self, external_ids),
        fields(ids = external_ids.len())
    )]
    async fn find_items(
        &mut self,
        connection_id: ConnectionId,
        external_ids: &[i64],
    ) -> Result<Vec<MirroredItem>> {
        let mut out = Vec::with_capacity(external_ids.len());
        for chunk in external_ids.chunks(LOOKUP_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {ITEM_COLUMNS} FROM mirrored_items WHERE connection_id = "
            ));
            qb.push_bind(connection_id.to_string());
            qb.push(" AND external_id IN (");
            let mut ids = qb.separated(", ");
            for id in chunk {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");

            let rows = qb.build().fetch_all(&mut *self.tx).await.map_err(db_err)?;
            for r in &rows {
                out.push(row_to_item(r)?);
            }
        }
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip(self, items), fields(items = items.len()))]
    async fn upsert_items(&mut self, items: &[MirroredItem]) -> Result<u64> {
        let mut written = 0u64;
        for item in items {
            let res = sqlx::query(UPSERT_ITEM)
                .bind(item.connection_id.to_string())
                .bind(item.external_id)
                .bind(item.revision)
                .bind(fmt_ts(&item.changed_at))
                .bind(&item.title)
                .bind(&item.status)
                .bind(&item.item_type)
                .bind(&item.area_path)
                .bind(&item.iteration_path)
                .bind(item.assigned_to.as_deref())
                .bind(&item.url)
                .execute(&mut *self.tx)
                .await
                .map_err(db_err)?;
            written += res.rows_affected();
        }
        Ok(written)
    }
}

#[async_trait]
impl SyncUnitOfWork for SqliteUnitOfWork {
    async fn put_sync_state(&mut self, state: &SyncState) -> Result<()> {
        bind_sync_state(sqlx::query(UPSERT_SYNC_STATE), state)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}
