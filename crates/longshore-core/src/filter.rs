//! Item predicates and the inversion wrapper.

use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ConfigError;
use crate::item::Item;
use crate::script::ScriptSpec;

// ---------------------------------------------------------------------------
// Filter trait and inversion wrapper
// ---------------------------------------------------------------------------

/// Decides whether an item stays in a run.
///
/// `prepare` is called exactly once per run with the full candidate set,
/// before any `evaluate` call; bulk filters do their expensive work there.
/// `evaluate` is the raw predicate, before any inversion applies, and must
/// stay cheap and side-effect free.
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    /// One-time per-run hook. The default does nothing.
    async fn prepare(&mut self, _items: &[Item]) -> anyhow::Result<()> {
        Ok(())
    }

    fn evaluate(&self, item: &Item) -> bool;
}

/// Pairs a filter with its inversion flag.
///
/// The effective verdict is `inverted XOR evaluate(item)`; concrete filters
/// never see the flag. [`InvertibleFilter::invert`] toggles it, so two
/// inversions restore the original behavior.
pub struct InvertibleFilter {
    inverted: bool,
    inner: Box<dyn Filter>,
}

impl InvertibleFilter {
    pub fn new(inner: Box<dyn Filter>) -> Self {
        Self {
            inverted: false,
            inner,
        }
    }

    pub fn invert(mut self) -> Self {
        self.inverted = !self.inverted;
        self
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Forwarded once per run by the pipeline.
    pub async fn prepare(&mut self, items: &[Item]) -> anyhow::Result<()> {
        self.inner.prepare(items).await
    }

    /// Effective verdict with inversion applied.
    pub fn is_valid(&self, item: &Item) -> bool {
        self.inverted ^ self.inner.evaluate(item)
    }
}

impl std::fmt::Debug for InvertibleFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvertibleFilter")
            .field("name", &self.inner.name())
            .field("inverted", &self.inverted)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RegexFilter
// ---------------------------------------------------------------------------

/// Keeps items whose key matches a pattern.
#[derive(Debug)]
pub struct RegexFilter {
    pattern: Regex,
}

impl RegexFilter {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(pattern).map_err(|e| ConfigError::InvalidParams {
            component: "regex filter".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { pattern })
    }
}

#[async_trait]
impl Filter for RegexFilter {
    fn name(&self) -> &str {
        "regex"
    }

    fn evaluate(&self, item: &Item) -> bool {
        self.pattern.is_match(&item.key)
    }
}

// ---------------------------------------------------------------------------
// ShardFilter
// ---------------------------------------------------------------------------

/// Stable shard assignment for a key: the first eight bytes of its SHA-256
/// digest, big endian, modulo `num_shards`.
///
/// Hashing the key's bytes keeps assignments identical across processes and
/// runs, which the scheduler's shard rotation depends on.
pub fn shard_of(key: &str, num_shards: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(num_shards)) as u32
}

/// Deterministic hash partition over item keys.
///
/// For a fixed `num_shards`, the shards partition any item set: every item
/// lands in exactly one shard.
///
/// # Panics
///
/// Evaluating a shard filter that was never given a `valid_shard` is a
/// programming error and panics rather than silently matching nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardFilter {
    pub num_shards: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_shard: Option<u32>,
}

impl ShardFilter {
    pub fn new(num_shards: u32) -> Result<Self, ConfigError> {
        if num_shards == 0 {
            return Err(ConfigError::InvalidParams {
                component: "shard filter".to_string(),
                message: "num_shards must be positive".to_string(),
            });
        }
        Ok(Self {
            num_shards,
            valid_shard: None,
        })
    }

    pub fn with_valid_shard(mut self, shard: u32) -> Result<Self, ConfigError> {
        if shard >= self.num_shards {
            return Err(ConfigError::InvalidParams {
                component: "shard filter".to_string(),
                message: format!("valid_shard {shard} out of range for {} shards", self.num_shards),
            });
        }
        self.valid_shard = Some(shard);
        Ok(self)
    }
}

#[async_trait]
impl Filter for ShardFilter {
    fn name(&self) -> &str {
        "shard"
    }

    fn evaluate(&self, item: &Item) -> bool {
        let valid = self
            .valid_shard
            .expect("shard filter evaluated without an assigned shard");
        shard_of(&item.key, self.num_shards) == valid
    }
}

// ---------------------------------------------------------------------------
// ScriptFilter
// ---------------------------------------------------------------------------

/// Bulk filter backed by an external script.
///
/// `prepare` runs the script once with every candidate key (`{keys}`
/// placeholder) and records the keys the script prints as a JSON array on
/// stdout. `evaluate` is then plain set membership. A non-zero exit or
/// malformed output is fatal.
pub struct ScriptFilter {
    script: ScriptSpec,
    valid_keys: HashSet<String>,
    prepared: bool,
}

impl ScriptFilter {
    pub fn new(script: ScriptSpec) -> Self {
        Self {
            script,
            valid_keys: HashSet::new(),
            prepared: false,
        }
    }
}

#[async_trait]
impl Filter for ScriptFilter {
    fn name(&self) -> &str {
        "script"
    }

    async fn prepare(&mut self, items: &[Item]) -> anyhow::Result<()> {
        let keys: Vec<String> = items.iter().map(|item| item.key.clone()).collect();
        let args = self.script.args_for_keys(&keys);
        let output = self
            .script
            .run(&args)
            .await?
            .expect_success(&self.script.command_line())?;
        let valid: Vec<String> = serde_json::from_str(output.stdout.trim()).map_err(|e| {
            anyhow::anyhow!(
                "script filter {} emitted invalid JSON: {e}",
                self.script.command_line()
            )
        })?;
        self.valid_keys = valid.into_iter().collect();
        self.prepared = true;
        Ok(())
    }

    fn evaluate(&self, item: &Item) -> bool {
        debug_assert!(self.prepared, "script filter evaluated before prepare");
        self.valid_keys.contains(&item.key)
    }
}

// ---------------------------------------------------------------------------
// AggregateFilter
// ---------------------------------------------------------------------------

/// How child filter verdicts combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMode {
    All,
    Any,
}

/// Combines child filters under `all` or `any` semantics.
///
/// An empty `all` accepts every item; an empty `any` accepts none. Children
/// keep their own inversion flags, and `prepare` is forwarded to each child
/// exactly once per run.
pub struct AggregateFilter {
    mode: AggregateMode,
    children: Vec<InvertibleFilter>,
}

impl AggregateFilter {
    pub fn new(mode: AggregateMode, children: Vec<InvertibleFilter>) -> Self {
        Self { mode, children }
    }
}

#[async_trait]
impl Filter for AggregateFilter {
    fn name(&self) -> &str {
        "aggregate"
    }

    async fn prepare(&mut self, items: &[Item]) -> anyhow::Result<()> {
        for child in &mut self.children {
            child.prepare(items).await?;
        }
        Ok(())
    }

    fn evaluate(&self, item: &Item) -> bool {
        match self.mode {
            AggregateMode::All => self.children.iter().all(|child| child.is_valid(item)),
            AggregateMode::Any => self.children.iter().any(|child| child.is_valid(item)),
        }
    }
}
