//! Persistence backends implementing `sync::traits::SyncRepository`.

pub mod memory;
pub mod sqlite;

pub use memory::MemorySyncRepository;
pub use sqlite::SqliteSyncRepository;
