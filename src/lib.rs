//! Local-first data layer and sync engine for a tailoring workshop.
//!
//! Customers, measurements, measurement templates, orders and invoices live
//! in a local SQLite store, are usable fully offline, and reconcile with a
//! central server through push-then-pull sync rounds.

pub mod clock;
pub mod config;
pub mod db;
pub mod models;
pub mod server;
pub mod sync;
pub mod workshop;

pub use workshop::{PendingChanges, Workshop};
