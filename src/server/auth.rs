//! Bearer API-key authentication for the sync server.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::routes::AppState;

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    owner_id: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Authenticated account, added to request extensions after auth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub owner_id: String,
}

/// API key store - maps key -> AuthUser
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthUser>,
}

impl ApiKeyStore {
    /// Load API keys from config file
    pub fn load(config_path: &Path) -> Self {
        let keys = match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<ConfigFile>(&contents) {
                Ok(config) => Self::from_entries(
                    config
                        .api_keys
                        .into_iter()
                        .map(|entry| (entry.key, entry.owner_id)),
                )
                .keys,
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    HashMap::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                HashMap::new()
            }
        };

        tracing::info!("Loaded {} API key(s)", keys.len());
        Self { keys }
    }

    /// Builds a store from `(key, owner_id)` pairs
    pub fn from_entries<K, O>(entries: impl IntoIterator<Item = (K, O)>) -> Self
    where
        K: Into<String>,
        O: Into<String>,
    {
        let keys = entries
            .into_iter()
            .map(|(key, owner)| {
                (
                    key.into(),
                    AuthUser {
                        owner_id: owner.into(),
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// Validate an API key and return the associated account
    pub fn validate(&self, key: &str) -> Option<AuthUser> {
        self.keys.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub(crate) fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // Extract Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(key) => key,
            None => {
                return error_response(
                    StatusCode::UNAUTHORIZED,
                    "invalid_auth",
                    "Authorization header must use Bearer scheme",
                )
            }
        },
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "missing_auth",
                "Authorization header required",
            )
        }
    };

    // Validate API key
    match state.api_keys.validate(api_key) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => error_response(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_keys_from_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("server.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "api_keys:").unwrap();
        writeln!(file, "  - key: secret-1").unwrap();
        writeln!(file, "    owner_id: shop-a").unwrap();
        writeln!(file, "  - key: secret-2").unwrap();
        writeln!(file, "    owner_id: shop-b").unwrap();

        let store = ApiKeyStore::load(&path);
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.validate("secret-2"),
            Some(AuthUser {
                owner_id: "shop-b".into()
            })
        );
        assert_eq!(store.validate("nope"), None);
    }

    #[test]
    fn test_missing_file_loads_no_keys() {
        let temp_dir = tempdir().unwrap();
        let store = ApiKeyStore::load(&temp_dir.path().join("missing.yaml"));
        assert!(store.is_empty());
    }
}
