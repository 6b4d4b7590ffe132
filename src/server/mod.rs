//! Reference sync server: an in-memory backend behind an axum router.

pub mod auth;
pub mod backend;
pub mod routes;

pub use auth::{ApiKeyStore, AuthUser};
pub use backend::{Backend, BackendError, PushSummary};
pub use routes::{router, AppState};
