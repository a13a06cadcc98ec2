//! Work items discovered by inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A unit of work discovered by an input, usually one file.
///
/// Identity within a run is the `key`. Extra data is a side channel for
/// component-specific payloads (a computed target path, a ticket id);
/// inputs and input decorators attach it before the item set leaves the
/// discovery layer, and it is treated as immutable afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier, usually a path relative to the repo root.
    pub key: String,
    /// Side-channel data attached at discovery time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<BTreeMap<String, serde_json::Value>>,
}

impl Item {
    /// Item with no extra data.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            extra_data: None,
        }
    }

    /// Attach one extra-data entry, creating the map on first use.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra_data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }

    /// Look up one extra-data entry.
    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra_data.as_ref().and_then(|data| data.get(key))
    }
}
