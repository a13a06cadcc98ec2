//! Batches group items into one logical change set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::item::Item;

/// An ordered group of items shipped as a single change.
///
/// Produced by a batcher and never mutated afterward. The title doubles as
/// the stable handle tying a batch to its outstanding [`crate::change::Change`]
/// across runs, so batchers must produce stable titles for stable groupings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Human-readable title, also the cross-run identity of the batch.
    pub title: String,
    /// Items carried by this batch, in batcher order.
    pub items: Vec<Item>,
    /// Batcher-defined annotations (grouping directory, capture value).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Batch {
    /// Empty batch with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_items(mut self, items: Vec<Item>) -> Self {
        self.items = items;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Item keys in batch order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.key.as_str())
    }
}
