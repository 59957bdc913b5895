//! Worksync core library: incremental work item mirroring from an external tracker
//! into local storage.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod o11y;
pub mod storage;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LogConfig, SyncConfig};
pub use error::{Error, Result};
pub use models::{Connection, ConnectionId, SourceSettings};
pub use storage::{MemorySyncRepository, SqliteSyncRepository};
pub use sync::engine::SyncEngine;
pub use sync::gate::{SyncGate, SyncPermit};
pub use sync::models::{
    MirroredItem, SourceProject, SourceTeam, SourceUser, SyncCursor, SyncOutcome, SyncRunStatus,
    SyncState, SyncTrigger, TeamAreaPath, TeamAreaPaths, WorkItemDetail,
};
pub use sync::schedule::DailySyncScheduler;
pub use sync::service::{ConnectionInput, SyncService, SyncStatus};
pub use sync::traits::{
    ConnectionStore, ListQuery, SourceClient, SourceTarget, SyncRepository, SyncStateStore,
    SyncUnitOfWork, WorkItemStore,
};
