//! Effect repository for resolving effect assets
//!
//! The repository maps an effect asset id to its display name, media type
//! and default parameters. Stacks only see it through [`AssetRepository`];
//! [`EffectRepository`] is the in-memory implementation filled from the
//! built-in set and from catalog XML files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use quick_xml::de::from_str;
use serde::Deserialize;

use super::types::{AssetType, EffectParameters, ParameterValue};
use crate::error::DocumentError;

/// Lookup of effect metadata by asset id
pub trait AssetRepository {
    /// Check if an asset id is known
    fn exists(&self, asset_id: &str) -> bool;

    /// Display name used in undo labels
    fn name(&self, asset_id: &str) -> Option<String>;

    /// Whether the effect processes audio or video
    fn asset_type(&self, asset_id: &str) -> Option<AssetType>;

    /// Fresh copy of the default parameter set
    fn default_parameters(&self, asset_id: &str) -> Option<EffectParameters>;
}

/// Description of one available effect
#[derive(Debug, Clone, PartialEq)]
pub struct EffectAsset {
    /// Asset identifier (e.g. "brightness", "volume")
    pub id: String,
    /// Display name
    pub name: String,
    /// Category for browsing
    pub category: String,
    /// Audio or video
    pub asset_type: AssetType,
    /// Defaults applied to new instances
    pub defaults: EffectParameters,
}

impl EffectAsset {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        asset_type: AssetType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            asset_type,
            defaults: EffectParameters::new(),
        }
    }

    /// Builder-style default parameter
    pub fn param(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.defaults.set(name, value);
        self
    }
}

/// Registry of available effects
///
/// Assets are registered at startup and can be queried by id or category.
#[derive(Debug, Default)]
pub struct EffectRepository {
    /// Assets by id
    assets: HashMap<String, EffectAsset>,
    /// Asset ids grouped by category
    categories: HashMap<String, Vec<String>>,
    /// Ordered list of categories for display
    category_order: Vec<String>,
}

impl EffectRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository holding the built-in effects
    pub fn with_builtin() -> Self {
        let mut repository = Self::new();
        super::builtin::register_builtin_effects(&mut repository);
        repository
    }

    /// Register an asset, replacing any previous asset with the same id
    pub fn register(&mut self, asset: EffectAsset) {
        if let Some(previous) = self.assets.remove(&asset.id) {
            if let Some(ids) = self.categories.get_mut(&previous.category) {
                ids.retain(|id| id != &previous.id);
            }
        }

        if !self.categories.contains_key(&asset.category) {
            self.category_order.push(asset.category.clone());
        }
        self.categories
            .entry(asset.category.clone())
            .or_default()
            .push(asset.id.clone());

        self.assets.insert(asset.id.clone(), asset);
    }

    /// Get an asset by id
    pub fn get(&self, asset_id: &str) -> Option<&EffectAsset> {
        self.assets.get(asset_id)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Get all category names in display order
    pub fn categories(&self) -> &[String] {
        &self.category_order
    }

    /// Get all asset ids in a category
    pub fn effects_in_category(&self, category: &str) -> Option<&[String]> {
        self.categories.get(category).map(|v| v.as_slice())
    }

    /// Get all assets matching a filter on id, name or category
    pub fn search(&self, query: &str) -> Vec<&EffectAsset> {
        let query_lower = query.to_lowercase();
        let mut results: Vec<&EffectAsset> = self
            .assets
            .values()
            .filter(|asset| {
                asset.name.to_lowercase().contains(&query_lower)
                    || asset.id.to_lowercase().contains(&query_lower)
                    || asset.category.to_lowercase().contains(&query_lower)
            })
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        results
    }

    /// Register every effect described in a catalog XML string.
    /// Returns the number of assets loaded.
    pub fn load_catalog_xml(&mut self, xml: &str) -> Result<usize, DocumentError> {
        let catalog: CatalogXml = from_str(xml)?;
        let mut loaded = 0;
        for effect in catalog.effects {
            let mut asset = EffectAsset::new(
                effect.id,
                effect.name,
                effect.category.unwrap_or_else(|| "Misc".to_string()),
                effect.asset_type,
            );
            for param in effect.params {
                let value = ParameterValue::parse(&param.name, &param.kind, &param.value)?;
                asset.defaults.set(param.name, value);
            }
            self.register(asset);
            loaded += 1;
        }
        tracing::debug!(loaded, total = self.len(), "Effect catalog loaded");
        Ok(loaded)
    }

    /// Register every effect described in a catalog file
    pub fn load_catalog_file(&mut self, path: &Path) -> Result<usize, DocumentError> {
        let contents = fs::read_to_string(path)?;
        let loaded = self.load_catalog_xml(&contents)?;
        tracing::info!(path = %path.display(), loaded, "Loaded effect catalog");
        Ok(loaded)
    }
}

impl AssetRepository for EffectRepository {
    fn exists(&self, asset_id: &str) -> bool {
        self.assets.contains_key(asset_id)
    }

    fn name(&self, asset_id: &str) -> Option<String> {
        self.get(asset_id).map(|asset| asset.name.clone())
    }

    fn asset_type(&self, asset_id: &str) -> Option<AssetType> {
        self.get(asset_id).map(|asset| asset.asset_type)
    }

    fn default_parameters(&self, asset_id: &str) -> Option<EffectParameters> {
        self.get(asset_id).map(|asset| asset.defaults.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename = "EffectCatalog")]
struct CatalogXml {
    #[serde(rename = "effect", default)]
    effects: Vec<CatalogEffectXml>,
}

#[derive(Debug, Deserialize)]
struct CatalogEffectXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@type", default)]
    asset_type: AssetType,
    #[serde(rename = "@category", default)]
    category: Option<String>,
    #[serde(rename = "param", default)]
    params: Vec<CatalogParamXml>,
}

#[derive(Debug, Deserialize)]
struct CatalogParamXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "@value")]
    value: String,
}
