//! Incremental, cursor-based mirroring of tracker work items.
//!
//! - A daily scheduler (and a manual trigger) ask the `SyncService` for a pass
//! - The service admits at most one pass at a time through the `SyncGate`
//! - The `SyncEngine` pages through ids ordered by `(changed, id)`, fetches details
//!   via a `SourceClient`, and upserts `MirroredItem` rows inside one unit of work
//! - The `SyncState` cursor only moves forward, and only when the pass commits

pub mod engine;
pub mod gate;
pub mod models;
pub mod query;
pub mod schedule;
pub mod service;
pub mod traits;
