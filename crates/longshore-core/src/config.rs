//! Config documents and the component registry.
//!
//! Schemas and managers persist as JSON documents in which every component
//! is an object carrying a `"type"` tag plus its params. A
//! [`ComponentRegistry`] maps tags to builder functions; other crates extend
//! it with their own components before documents are built.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batcher::{Batcher, DirectoryBatcher, RegexBatcher, SingleBatcher};
use crate::command::{Command, ScriptCommand};
use crate::filter::{
    AggregateFilter, AggregateMode, Filter, InvertibleFilter, RegexFilter, ScriptFilter,
    ShardFilter,
};
use crate::input::{DirectoryInput, InlineInput, Input, ScriptInput, TargetedInput};
use crate::manager::{Manager, RuleStep, StaleChangeStep, Step};
use crate::repo::Repo;
use crate::schema::{Schema, SchemaConfig};
use crate::script::ScriptSpec;
use crate::transformer::{RegexTransformer, ScriptTransformer, Transformer};
use crate::validation::ValidationLevel;
use crate::validator::{ScriptValidator, Validator};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Which registry table a component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Input,
    Filter,
    Batcher,
    Transformer,
    Validator,
    Command,
    Repo,
    Step,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Input => "input",
            ComponentKind::Filter => "filter",
            ComponentKind::Batcher => "batcher",
            ComponentKind::Transformer => "transformer",
            ComponentKind::Validator => "validator",
            ComponentKind::Command => "command",
            ComponentKind::Repo => "repo",
            ComponentKind::Step => "step",
        };
        f.write_str(name)
    }
}

/// Errors raised while parsing documents or assembling components.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{kind} config is missing a \"type\" field")]
    MissingType { kind: ComponentKind },

    #[error("unknown {kind} component: {name}")]
    UnknownComponent { kind: ComponentKind, name: String },

    #[error("invalid params for {component}: {message}")]
    InvalidParams { component: String, message: String },

    #[error("unknown schema: {name}")]
    UnknownSchema { name: String },

    #[error("schema already registered: {name}")]
    DuplicateSchema { name: String },

    #[error("invalid config document: {message}")]
    Invalid { message: String },
}

fn component_tag(kind: ComponentKind, value: &Value) -> Result<&str, ConfigError> {
    value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ConfigError::MissingType { kind })
}

fn parse_params<T: DeserializeOwned>(component: &str, value: &Value) -> Result<T, ConfigError> {
    serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidParams {
        component: component.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub type InputBuilder = fn(&ComponentRegistry, &Value) -> Result<Box<dyn Input>, ConfigError>;
pub type FilterBuilder = fn(&ComponentRegistry, &Value) -> Result<Box<dyn Filter>, ConfigError>;
pub type BatcherBuilder = fn(&ComponentRegistry, &Value) -> Result<Box<dyn Batcher>, ConfigError>;
pub type TransformerBuilder =
    fn(&ComponentRegistry, &Value) -> Result<Box<dyn Transformer>, ConfigError>;
pub type ValidatorBuilder =
    fn(&ComponentRegistry, &Value) -> Result<Box<dyn Validator>, ConfigError>;
pub type CommandBuilder = fn(&ComponentRegistry, &Value) -> Result<Box<dyn Command>, ConfigError>;
pub type RepoBuilder = fn(&ComponentRegistry, &Value) -> Result<Arc<dyn Repo>, ConfigError>;
pub type StepBuilder = fn(&ComponentRegistry, &Value) -> Result<Box<dyn Step>, ConfigError>;

/// Maps component tags to builder functions, one table per kind.
#[derive(Default)]
pub struct ComponentRegistry {
    inputs: BTreeMap<String, InputBuilder>,
    filters: BTreeMap<String, FilterBuilder>,
    batchers: BTreeMap<String, BatcherBuilder>,
    transformers: BTreeMap<String, TransformerBuilder>,
    validators: BTreeMap<String, ValidatorBuilder>,
    commands: BTreeMap<String, CommandBuilder>,
    repos: BTreeMap<String, RepoBuilder>,
    steps: BTreeMap<String, StepBuilder>,
}

impl ComponentRegistry {
    /// A registry with no components at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with every built-in component.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_input("directory", build_directory_input);
        registry.register_input("inline", build_inline_input);
        registry.register_input("script", build_script_input);
        registry.register_input("targeted", build_targeted_input);
        registry.register_filter("regex", build_regex_filter);
        registry.register_filter("shard", build_shard_filter);
        registry.register_filter("script", build_script_filter);
        registry.register_filter("aggregate", build_aggregate_filter);
        registry.register_batcher("single", build_single_batcher);
        registry.register_batcher("directory", build_directory_batcher);
        registry.register_batcher("regex", build_regex_batcher);
        registry.register_transformer("regex", build_regex_transformer);
        registry.register_transformer("script", build_script_transformer);
        registry.register_validator("script", build_script_validator);
        registry.register_command("script", build_script_command);
        registry.register_step("rule", build_rule_step);
        registry.register_step("stale", build_stale_step);
        registry
    }

    pub fn register_input(&mut self, tag: impl Into<String>, builder: InputBuilder) {
        self.inputs.insert(tag.into(), builder);
    }

    pub fn register_filter(&mut self, tag: impl Into<String>, builder: FilterBuilder) {
        self.filters.insert(tag.into(), builder);
    }

    pub fn register_batcher(&mut self, tag: impl Into<String>, builder: BatcherBuilder) {
        self.batchers.insert(tag.into(), builder);
    }

    pub fn register_transformer(&mut self, tag: impl Into<String>, builder: TransformerBuilder) {
        self.transformers.insert(tag.into(), builder);
    }

    pub fn register_validator(&mut self, tag: impl Into<String>, builder: ValidatorBuilder) {
        self.validators.insert(tag.into(), builder);
    }

    pub fn register_command(&mut self, tag: impl Into<String>, builder: CommandBuilder) {
        self.commands.insert(tag.into(), builder);
    }

    pub fn register_repo(&mut self, tag: impl Into<String>, builder: RepoBuilder) {
        self.repos.insert(tag.into(), builder);
    }

    pub fn register_step(&mut self, tag: impl Into<String>, builder: StepBuilder) {
        self.steps.insert(tag.into(), builder);
    }

    pub fn build_input(&self, value: &Value) -> Result<Box<dyn Input>, ConfigError> {
        let tag = component_tag(ComponentKind::Input, value)?;
        let builder = self
            .inputs
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: ComponentKind::Input,
                name: tag.to_string(),
            })?;
        builder(self, value)
    }

    pub fn build_filter(&self, value: &Value) -> Result<Box<dyn Filter>, ConfigError> {
        let tag = component_tag(ComponentKind::Filter, value)?;
        let builder = self
            .filters
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: ComponentKind::Filter,
                name: tag.to_string(),
            })?;
        builder(self, value)
    }

    /// Builds a filter and wraps it, honoring the common `"inverted"` field.
    pub fn build_invertible_filter(&self, value: &Value) -> Result<InvertibleFilter, ConfigError> {
        let inverted = value
            .get("inverted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let filter = InvertibleFilter::new(self.build_filter(value)?);
        Ok(if inverted { filter.invert() } else { filter })
    }

    pub fn build_batcher(&self, value: &Value) -> Result<Box<dyn Batcher>, ConfigError> {
        let tag = component_tag(ComponentKind::Batcher, value)?;
        let builder = self
            .batchers
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: ComponentKind::Batcher,
                name: tag.to_string(),
            })?;
        builder(self, value)
    }

    pub fn build_transformer(&self, value: &Value) -> Result<Box<dyn Transformer>, ConfigError> {
        let tag = component_tag(ComponentKind::Transformer, value)?;
        let builder = self
            .transformers
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: ComponentKind::Transformer,
                name: tag.to_string(),
            })?;
        builder(self, value)
    }

    pub fn build_validator(&self, value: &Value) -> Result<Box<dyn Validator>, ConfigError> {
        let tag = component_tag(ComponentKind::Validator, value)?;
        let builder = self
            .validators
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: ComponentKind::Validator,
                name: tag.to_string(),
            })?;
        builder(self, value)
    }

    pub fn build_command(&self, value: &Value) -> Result<Box<dyn Command>, ConfigError> {
        let tag = component_tag(ComponentKind::Command, value)?;
        let builder = self
            .commands
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: ComponentKind::Command,
                name: tag.to_string(),
            })?;
        builder(self, value)
    }

    pub fn build_repo(&self, value: &Value) -> Result<Arc<dyn Repo>, ConfigError> {
        let tag = component_tag(ComponentKind::Repo, value)?;
        let builder = self
            .repos
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: ComponentKind::Repo,
                name: tag.to_string(),
            })?;
        builder(self, value)
    }

    pub fn build_step(&self, value: &Value) -> Result<Box<dyn Step>, ConfigError> {
        let tag = component_tag(ComponentKind::Step, value)?;
        let builder = self
            .steps
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: ComponentKind::Step,
                name: tag.to_string(),
            })?;
        builder(self, value)
    }
}

// ---------------------------------------------------------------------------
// Built-in builders
// ---------------------------------------------------------------------------

fn build_directory_input(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Input>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        path: PathBuf,
    }
    let params: Params = parse_params("directory input", value)?;
    Ok(Box::new(DirectoryInput::new(params.path)))
}

fn build_inline_input(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Input>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        keys: Vec<String>,
    }
    let params: Params = parse_params("inline input", value)?;
    Ok(Box::new(InlineInput::new(params.keys)))
}

fn build_script_input(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Input>, ConfigError> {
    let script: ScriptSpec = parse_params("script input", value)?;
    Ok(Box::new(ScriptInput::new(script)))
}

fn build_targeted_input(
    registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Input>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        inner: Value,
        from_prefix: String,
        to_prefix: String,
    }
    let params: Params = parse_params("targeted input", value)?;
    let inner = registry.build_input(&params.inner)?;
    Ok(Box::new(TargetedInput::new(
        inner,
        params.from_prefix,
        params.to_prefix,
    )))
}

fn build_regex_filter(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Filter>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        pattern: String,
    }
    let params: Params = parse_params("regex filter", value)?;
    Ok(Box::new(RegexFilter::new(&params.pattern)?))
}

fn build_shard_filter(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Filter>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        num_shards: u32,
        valid_shard: u32,
    }
    let params: Params = parse_params("shard filter", value)?;
    let filter = ShardFilter::new(params.num_shards)?.with_valid_shard(params.valid_shard)?;
    Ok(Box::new(filter))
}

fn build_script_filter(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Filter>, ConfigError> {
    let script: ScriptSpec = parse_params("script filter", value)?;
    Ok(Box::new(ScriptFilter::new(script)))
}

fn build_aggregate_filter(
    registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Filter>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        mode: AggregateMode,
        filters: Vec<Value>,
    }
    let params: Params = parse_params("aggregate filter", value)?;
    let children = params
        .filters
        .iter()
        .map(|child| registry.build_invertible_filter(child))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Box::new(AggregateFilter::new(params.mode, children)))
}

fn build_single_batcher(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Batcher>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        #[serde(default)]
        title: String,
        #[serde(default)]
        metadata: BTreeMap<String, Value>,
    }
    let params: Params = parse_params("single batcher", value)?;
    let mut batcher = SingleBatcher::new(params.title);
    for (key, entry) in params.metadata {
        batcher = batcher.with_metadata(key, entry);
    }
    Ok(Box::new(batcher))
}

fn build_directory_batcher(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Batcher>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        #[serde(default)]
        title_prefix: String,
    }
    let params: Params = parse_params("directory batcher", value)?;
    Ok(Box::new(DirectoryBatcher::new(params.title_prefix)))
}

fn default_fallback_title() -> String {
    "ungrouped".to_string()
}

fn build_regex_batcher(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Batcher>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        pattern: String,
        #[serde(default = "default_fallback_title")]
        fallback_title: String,
    }
    let params: Params = parse_params("regex batcher", value)?;
    Ok(Box::new(RegexBatcher::new(
        &params.pattern,
        params.fallback_title,
    )?))
}

fn build_regex_transformer(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Transformer>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        pattern: String,
        replacement: String,
    }
    let params: Params = parse_params("regex transformer", value)?;
    Ok(Box::new(RegexTransformer::new(
        &params.pattern,
        params.replacement,
    )?))
}

fn build_script_transformer(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Transformer>, ConfigError> {
    let script: ScriptSpec = parse_params("script transformer", value)?;
    Ok(Box::new(ScriptTransformer::new(script)))
}

fn default_failure_level() -> ValidationLevel {
    ValidationLevel::Error
}

fn build_script_validator(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Validator>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        #[serde(flatten)]
        script: ScriptSpec,
        #[serde(default = "default_failure_level")]
        failure_level: ValidationLevel,
    }
    let params: Params = parse_params("script validator", value)?;
    Ok(Box::new(
        ScriptValidator::new(params.script).with_failure_level(params.failure_level),
    ))
}

fn build_script_command(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Command>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        #[serde(flatten)]
        script: ScriptSpec,
        #[serde(default)]
        run_pre_validation: bool,
    }
    let params: Params = parse_params("script command", value)?;
    let mut command = ScriptCommand::new(params.script);
    if params.run_pre_validation {
        command = command.pre_validation();
    }
    Ok(Box::new(command))
}

fn build_rule_step(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Step>, ConfigError> {
    let step: RuleStep = parse_params("rule step", value)?;
    Ok(Box::new(step))
}

fn build_stale_step(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Step>, ConfigError> {
    let step: StaleChangeStep = parse_params("stale step", value)?;
    Ok(Box::new(step))
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Persisted form of a schema: its settings plus one component config per
/// pipeline slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub name: String,
    #[serde(default)]
    pub allowed_validation_level: ValidationLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_submissions: Option<usize>,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Value>,
    pub batcher: Value,
    pub transformer: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<Value>,
    pub repo: Value,
}

impl SchemaSpec {
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(doc).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }

    /// Assembles a runnable [`Schema`] from this document.
    pub fn build(&self, registry: &ComponentRegistry) -> Result<Schema, ConfigError> {
        let input = registry.build_input(&self.input)?;
        let batcher = registry.build_batcher(&self.batcher)?;
        let transformer = registry.build_transformer(&self.transformer)?;
        let repo = registry.build_repo(&self.repo)?;

        let mut config = SchemaConfig::new(&self.name)
            .with_allowed_validation_level(self.allowed_validation_level);
        if let Some(max) = self.max_submissions {
            config = config.with_max_submissions(max);
        }

        let mut schema = Schema::new(config, input, batcher, transformer, repo);
        for value in &self.filters {
            schema = schema.with_filter(registry.build_invertible_filter(value)?);
        }
        for value in &self.validators {
            schema = schema.with_validator(registry.build_validator(value)?);
        }
        for value in &self.commands {
            schema = schema.with_command(registry.build_command(value)?);
        }
        Ok(schema)
    }
}

/// Persisted form of a manager: a repo config plus ordered step configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSpec {
    pub repo: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Value>,
}

impl ManagerSpec {
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(doc).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }

    pub fn build(&self, registry: &ComponentRegistry) -> Result<Manager, ConfigError> {
        let repo = registry.build_repo(&self.repo)?;
        let mut manager = Manager::new(repo);
        for value in &self.steps {
            manager = manager.with_step(registry.build_step(value)?);
        }
        Ok(manager)
    }
}
