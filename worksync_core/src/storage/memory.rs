//! In-process `SyncRepository` for tests and embedding.

use crate::models::{Connection, ConnectionId, SourceSettings};
use crate::sync::models::{MirroredItem, SyncState};
use crate::sync::traits::{
    ConnectionStore, ListQuery, SyncRepository, SyncStateStore, SyncUnitOfWork, WorkItemStore,
};
use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type ItemKey = (ConnectionId, i64);

/// Clones share the same underlying tables.
#[derive(Clone, Default)]
pub struct MemorySyncRepository {
    connection: Arc<RwLock<Option<Connection>>>,
    settings: Arc<RwLock<SourceSettings>>,
    sync_state: Arc<RwLock<HashMap<ConnectionId, SyncState>>>,
    items: Arc<RwLock<BTreeMap<ItemKey, MirroredItem>>>,
}

impl MemorySyncRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed item count across all connections.
    pub async fn item_count(&self) -> usize {
        self.items.read().await.len()
    }
}

#[async_trait]
impl ConnectionStore for MemorySyncRepository {
    async fn get_connection(&self) -> Result<Option<Connection>> {
        Ok(self.connection.read().await.clone())
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<()> {
        *self.connection.write().await = Some(connection.clone());
        Ok(())
    }

    async fn get_source_settings(&self) -> Result<SourceSettings> {
        Ok(self.settings.read().await.clone())
    }

    async fn set_source_settings(&self, settings: &SourceSettings) -> Result<()> {
        *self.settings.write().await = settings.clone();
        Ok(())
    }
}

#[async_trait]
impl SyncStateStore for MemorySyncRepository {
    async fn get_sync_state(&self, connection_id: ConnectionId) -> Result<Option<SyncState>> {
        Ok(self.sync_state.read().await.get(&connection_id).cloned())
    }

    async fn put_sync_state(&self, state: &SyncState) -> Result<()> {
        self.sync_state
            .write()
            .await
            .insert(state.connection_id, state.clone());
        Ok(())
    }
}

#[async_trait]
impl SyncRepository for MemorySyncRepository {
    async fn begin(&self) -> Result<Box<dyn SyncUnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            repo: self.clone(),
            staged_items: BTreeMap::new(),
            staged_state: None,
        }))
    }

    async fn list_items(
        &self,
        connection_id: ConnectionId,
        query: ListQuery,
    ) -> Result<Vec<MirroredItem>> {
        Ok(self
            .items
            .read()
            .await
            .range((connection_id, i64::MIN)..=(connection_id, i64::MAX))
            .map(|(_, item)| item.clone())
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}

/// Writes are staged locally and applied to the shared tables on `commit`.
struct MemoryUnitOfWork {
    repo: MemorySyncRepository,
    staged_items: BTreeMap<ItemKey, MirroredItem>,
    staged_state: Option<SyncState>,
}

#[async_trait]
impl WorkItemStore for MemoryUnitOfWork {
    async fn find_items(
        &mut self,
        connection_id: ConnectionId,
        external_ids: &[i64],
    ) -> Result<Vec<MirroredItem>> {
        let committed = self.repo.items.read().await;
        Ok(external_ids
            .iter()
            .filter_map(|id| {
                let key = (connection_id, *id);
                self.staged_items
                    .get(&key)
                    .or_else(|| committed.get(&key))
                    .cloned()
            })
            .collect())
    }

    async fn upsert_items(&mut self, items: &[MirroredItem]) -> Result<u64> {
        for item in items {
            self.staged_items
                .insert((item.connection_id, item.external_id), item.clone());
        }
        Ok(items.len() as u64)
    }
}

#[async_trait]
impl SyncUnitOfWork for MemoryUnitOfWork {
    async fn put_sync_state(&mut self, state: &SyncState) -> Result<()> {
        self.staged_state = Some(state.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork {
            repo,
            staged_items,
            staged_state,
        } = *self;
        // Lock order matches readers: items, then state.
        let mut items = repo.items.write().await;
        let mut states = repo.sync_state.write().await;
        items.extend(staged_items);
        if let Some(state) = staged_state {
            states.insert(state.connection_id, state);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
