//! Local-first synchronization with a central server.
//!
//! Local writes are stamped by the [`MutationTracker`] and marked dirty.
//! A sync round, run by the [`SyncEngine`], pushes every pending change as a
//! [`ChangeSet`], then pulls everything the server saw since the last
//! checkpoint and applies it under record-level last-writer-wins. The
//! [`SyncScheduler`] decides when rounds run and keeps at most one in flight.
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use stitchbook::db::open_store;
//! use stitchbook::sync::{ConnectivityMonitor, HttpTransport, SyncEngine, SyncScheduler};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = open_store("/tmp/stitchbook.db").await?;
//! let transport = HttpTransport::new("http://localhost:8080", "key", Duration::from_secs(30))?;
//! let engine = SyncEngine::new(store, transport, "owner-1");
//! let scheduler = SyncScheduler::new(engine, ConnectivityMonitor::default(), Duration::from_secs(300)).await?;
//! scheduler.request_sync().await?;
//! # Ok(())
//! # }
//! ```

mod changeset;
pub mod checkpoint;
mod connectivity;
mod engine;
mod error;
mod scheduler;
mod tracker;
mod transport;
pub mod wire;

pub use changeset::{
    build_change_set, ChangeSet, EntityChanges, OutboundBatch, PushedVersion, Tombstone,
};
pub use connectivity::ConnectivityMonitor;
pub use engine::{RoundReport, SyncEngine, SyncPhase};
pub use error::SyncError;
pub use scheduler::{SyncScheduler, SyncState, SyncTrigger, SyncTriggers};
pub use tracker::MutationTracker;
pub use transport::{HttpTransport, PullResponse, PushRequest, Transport};
pub use wire::{MappingError, Syncable, WireRow};
