//! Runtime service settings.
//!
//! Connection targets come from environment variables at startup and can
//! be re-pointed afterwards through the config endpoints, so the user can
//! switch repositories or LimeSurvey installations without a restart.
//! In-memory state is backed by `RwLock`; readers get clones and never
//! observe a half-applied update.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::info;

/// Where SPARQL queries go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDbSettings {
    pub base_url: String,
    pub repository: String,
}

/// RemoteControl endpoint and credentials.
#[derive(Debug, Clone, Serialize)]
pub struct LimeSurveySettings {
    pub url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

/// Partial update body for the GraphDB config endpoint; absent fields
/// keep their current value.
#[derive(Debug, Deserialize)]
pub struct GraphDbUpdate {
    pub graphdb_url: Option<String>,
    pub repository: Option<String>,
}

/// Partial update body for the LimeSurvey config endpoint.
#[derive(Debug, Deserialize)]
pub struct LimeSurveyUpdate {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// In-memory store for both connection targets.
#[derive(Debug)]
pub struct SettingsStore {
    graphdb: RwLock<GraphDbSettings>,
    limesurvey: RwLock<LimeSurveySettings>,
}

impl SettingsStore {
    /// Load initial settings from the environment. Defaults match a local
    /// docker-compose setup; LimeSurvey credentials have no default.
    pub fn from_env() -> Self {
        let graphdb = GraphDbSettings {
            base_url: env_or("GRAPHDB_URL", "http://localhost:7200"),
            repository: env_or("GRAPHDB_REPOSITORY", "test_repo"),
        };
        let limesurvey = LimeSurveySettings {
            url: env_or(
                "LIMESURVEY_URL",
                "http://localhost/limesurvey/index.php/admin/remotecontrol",
            ),
            username: env_or("LIMESURVEY_USERNAME", ""),
            password: env_or("LIMESURVEY_PASSWORD", ""),
        };

        info!(
            graphdb = %graphdb.base_url,
            repository = %graphdb.repository,
            limesurvey = %limesurvey.url,
            "settings loaded"
        );

        Self {
            graphdb: RwLock::new(graphdb),
            limesurvey: RwLock::new(limesurvey),
        }
    }

    /// Current GraphDB settings (returns clone).
    pub fn graphdb(&self) -> GraphDbSettings {
        self.graphdb.read().unwrap().clone()
    }

    /// Current LimeSurvey settings (returns clone).
    pub fn limesurvey(&self) -> LimeSurveySettings {
        self.limesurvey.read().unwrap().clone()
    }

    /// Apply a partial GraphDB update and return the resulting settings.
    pub fn update_graphdb(&self, update: GraphDbUpdate) -> GraphDbSettings {
        let mut current = self.graphdb.write().unwrap();
        if let Some(url) = update.graphdb_url {
            current.base_url = url;
        }
        if let Some(repo) = update.repository {
            current.repository = repo;
        }
        info!(
            graphdb = %current.base_url,
            repository = %current.repository,
            "graphdb settings updated"
        );
        current.clone()
    }

    /// Apply a partial LimeSurvey update and return the resulting settings.
    pub fn update_limesurvey(&self, update: LimeSurveyUpdate) -> LimeSurveySettings {
        let mut current = self.limesurvey.write().unwrap();
        if let Some(url) = update.url {
            current.url = url;
        }
        if let Some(username) = update.username {
            current.username = username;
        }
        if let Some(password) = update.password {
            current.password = password;
        }
        info!(limesurvey = %current.url, "limesurvey settings updated");
        current.clone()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_keeps_unset_fields() {
        let store = SettingsStore::from_env();
        let before = store.graphdb();

        let after = store.update_graphdb(GraphDbUpdate {
            graphdb_url: None,
            repository: Some("surveys".to_string()),
        });

        assert_eq!(after.base_url, before.base_url);
        assert_eq!(after.repository, "surveys");
        assert_eq!(store.graphdb().repository, "surveys");
    }

    #[test]
    fn limesurvey_update_replaces_credentials() {
        let store = SettingsStore::from_env();

        let after = store.update_limesurvey(LimeSurveyUpdate {
            url: Some("http://ls.example/remotecontrol".to_string()),
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
        });

        assert_eq!(after.url, "http://ls.example/remotecontrol");
        assert_eq!(store.limesurvey().username, "admin");
    }

    #[test]
    fn password_is_never_serialized() {
        let settings = LimeSurveySettings {
            url: "http://ls".into(),
            username: "admin".into(),
            password: "secret".into(),
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
    }
}
