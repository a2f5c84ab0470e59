//! Runtime feature toggles exposed under `/actuator/features`

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub name: String,
    pub enabled: bool,
    pub description: String,
    pub last_modified: DateTime<Utc>,
}

impl Feature {
    pub fn new(name: impl Into<String>, enabled: bool, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled,
            description: description.into(),
            last_modified: Utc::now(),
        }
    }
}

/// Snapshot returned by the list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureList {
    pub features: IndexMap<String, Feature>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Body of a toggle write
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureUpdate {
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub status: DeleteStatus,
    pub feature: String,
}

pub struct FeatureStore {
    features: RwLock<IndexMap<String, Feature>>,
}

impl FeatureStore {
    pub fn empty() -> Self {
        Self {
            features: RwLock::new(IndexMap::new()),
        }
    }

    /// Store seeded with the stock toggles
    pub fn new() -> Self {
        let store = Self::empty();
        for (name, enabled, description) in [
            ("caching", true, "Enable caching"),
            ("logging", true, "Enable detailed logging"),
            ("metrics", true, "Enable metrics collection"),
            ("experimental", false, "Enable experimental features"),
        ] {
            store.insert(Feature::new(name, enabled, description));
        }
        store
    }

    fn insert(&self, feature: Feature) {
        self.features.write().insert(feature.name.clone(), feature);
    }

    pub fn list(&self) -> FeatureList {
        let features = self.features.read().clone();
        FeatureList {
            count: features.len(),
            features,
            timestamp: Utc::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Feature> {
        self.features.read().get(name).cloned()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.features.read().get(name).is_some_and(|f| f.enabled)
    }

    /// Create or replace a toggle; a missing description keeps the old one
    pub fn set(&self, name: &str, update: FeatureUpdate) -> Feature {
        let mut features = self.features.write();
        let description = update
            .description
            .or_else(|| features.get(name).map(|f| f.description.clone()))
            .unwrap_or_default();
        let feature = Feature::new(name, update.enabled, description);
        features.insert(name.to_string(), feature.clone());
        info!(feature = name, enabled = feature.enabled, "feature toggled");
        feature
    }

    pub fn delete(&self, name: &str) -> DeleteResult {
        let status = match self.features.write().shift_remove(name) {
            Some(_) => {
                info!(feature = name, "feature deleted");
                DeleteStatus::Deleted
            }
            None => DeleteStatus::NotFound,
        };
        DeleteResult {
            status,
            feature: name.to_string(),
        }
    }
}

impl Default for FeatureStore {
    fn default() -> Self {
        Self::new()
    }
}
