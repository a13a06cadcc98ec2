//! Grouping of eligible items into batches.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde_json::json;

use crate::batch::Batch;
use crate::config::ConfigError;
use crate::item::Item;

/// Groups the eligible items of a run into change sets.
///
/// Every input item lands in exactly one output batch: nothing is dropped
/// and nothing is duplicated. Grouping is pure and synchronous.
pub trait Batcher: Send + Sync {
    fn name(&self) -> &str;

    fn batch(&self, items: Vec<Item>) -> anyhow::Result<Vec<Batch>>;
}

// ---------------------------------------------------------------------------
// SingleBatcher
// ---------------------------------------------------------------------------

/// Places every item into one batch, preserving order.
///
/// Always produces exactly one batch, even for an empty item set; an empty
/// batch runs as a no-change batch downstream.
#[derive(Debug)]
pub struct SingleBatcher {
    title: String,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl SingleBatcher {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl Default for SingleBatcher {
    fn default() -> Self {
        Self::new("")
    }
}

impl Batcher for SingleBatcher {
    fn name(&self) -> &str {
        "single"
    }

    fn batch(&self, items: Vec<Item>) -> anyhow::Result<Vec<Batch>> {
        let mut batch = Batch::new(&self.title).with_items(items);
        batch.metadata = self.metadata.clone();
        Ok(vec![batch])
    }
}

// ---------------------------------------------------------------------------
// DirectoryBatcher
// ---------------------------------------------------------------------------

/// Groups items by the parent directory of their key.
///
/// Batch order follows directory order (sorted), so output is stable for a
/// stable item set. The grouping directory is recorded in batch metadata.
#[derive(Debug)]
pub struct DirectoryBatcher {
    title_prefix: String,
}

impl DirectoryBatcher {
    pub fn new(title_prefix: impl Into<String>) -> Self {
        Self {
            title_prefix: title_prefix.into(),
        }
    }
}

impl Batcher for DirectoryBatcher {
    fn name(&self) -> &str {
        "directory"
    }

    fn batch(&self, items: Vec<Item>) -> anyhow::Result<Vec<Batch>> {
        let mut groups: BTreeMap<String, Vec<Item>> = BTreeMap::new();
        for item in items {
            let dir = Path::new(&item.key)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| ".".to_string());
            groups.entry(dir).or_default().push(item);
        }
        Ok(groups
            .into_iter()
            .map(|(dir, items)| {
                Batch::new(format!("{}{dir}", self.title_prefix))
                    .with_items(items)
                    .with_metadata("directory", json!(dir))
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// RegexBatcher
// ---------------------------------------------------------------------------

/// Groups items by the first capture of a pattern over their key.
///
/// A pattern without capture groups batches by the whole match. Keys the
/// pattern does not match are collected under the fallback title so no item
/// is dropped.
#[derive(Debug)]
pub struct RegexBatcher {
    pattern: Regex,
    fallback_title: String,
}

impl RegexBatcher {
    pub fn new(pattern: &str, fallback_title: impl Into<String>) -> Result<Self, ConfigError> {
        let pattern = Regex::new(pattern).map_err(|e| ConfigError::InvalidParams {
            component: "regex batcher".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            pattern,
            fallback_title: fallback_title.into(),
        })
    }
}

impl Batcher for RegexBatcher {
    fn name(&self) -> &str {
        "regex"
    }

    fn batch(&self, items: Vec<Item>) -> anyhow::Result<Vec<Batch>> {
        let mut groups: BTreeMap<String, Vec<Item>> = BTreeMap::new();
        for item in items {
            let group = self
                .pattern
                .captures(&item.key)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| self.fallback_title.clone());
            groups.entry(group).or_default().push(item);
        }
        Ok(groups
            .into_iter()
            .map(|(group, items)| {
                Batch::new(&group)
                    .with_items(items)
                    .with_metadata("group", json!(group))
            })
            .collect())
    }
}
