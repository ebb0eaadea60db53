//! JSON configuration models for the taxonomy, the selectable sources and the
//! optional source → type mapping.
//!
//! Required fields are enforced by deserialization; [`TaxonomyConfig::validate`]
//! and [`SourceConfig::validate`] add the checks serde cannot express (empty
//! ids, duplicate ids). Source item order is significant: it is the priority
//! order of the classification rules built from it.

use crate::{PoiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// A single `key=value` tag predicate
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagPair {
    pub k: String,
    pub v: String,
}

impl TagPair {
    pub fn new(k: impl Into<String>, v: impl Into<String>) -> Self {
        Self {
            k: k.into(),
            v: v.into(),
        }
    }

    /// Both key and value are present
    pub fn is_complete(&self) -> bool {
        !self.k.is_empty() && !self.v.is_empty()
    }
}

/// Hierarchical category → item taxonomy
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    /// Informational only; any JSON value is accepted
    #[serde(default)]
    pub version: serde_json::Value,
    pub categories: Vec<CategoryConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConfig {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub default_expanded: bool,
    pub items: Vec<ItemConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemConfig {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Items that can be queried for and classified against
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Informational only; any JSON value is accepted
    #[serde(default)]
    pub version: serde_json::Value,
    pub items: Vec<SourceItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    pub id: String,
    pub label: String,
    /// Matches when any pair matches
    #[serde(default, alias = "overpass")]
    pub tags: Vec<TagPair>,
    /// Matches when every pair matches (never matches when empty)
    #[serde(default)]
    pub tags_all: Vec<TagPair>,
    #[serde(default)]
    pub default_selected: bool,
    #[serde(default = "default_fetch")]
    pub fetch: bool,
    /// Taxonomy type this source classifies into, when configured inline
    #[serde(default)]
    pub type_id: Option<String>,
}

fn default_fetch() -> bool {
    true
}

/// Optional indirection from source item id to taxonomy item id
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Informational only; any JSON value is accepted
    #[serde(default)]
    pub version: serde_json::Value,
    pub map: BTreeMap<String, String>,
}

impl TaxonomyConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Reject empty ids/labels and item ids repeated anywhere in the taxonomy
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for category in &self.categories {
            if category.id.trim().is_empty() || category.label.trim().is_empty() {
                return Err(PoiError::Config(format!(
                    "Invalid category: {}",
                    display_id(&category.id)
                )));
            }
            for item in &category.items {
                if item.id.trim().is_empty() || item.label.trim().is_empty() {
                    return Err(PoiError::Config(format!(
                        "Invalid item in {}: {}",
                        category.id,
                        display_id(&item.id)
                    )));
                }
                if !seen.insert(item.id.as_str()) {
                    return Err(PoiError::Config(format!(
                        "Duplicate taxonomy item id: {}",
                        item.id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl SourceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for item in &self.items {
            if item.id.trim().is_empty() || item.label.trim().is_empty() {
                return Err(PoiError::Config(format!(
                    "Invalid source item: {}",
                    display_id(&item.id)
                )));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(PoiError::Config(format!(
                    "Duplicate source item id: {}",
                    item.id
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&SourceItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

impl MappingConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

fn display_id(id: &str) -> &str {
    if id.is_empty() { "(no id)" } else { id }
}
