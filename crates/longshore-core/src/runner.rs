//! Named-schema registry and run dispatch.
//!
//! A [`Runner`] owns the schemas a deployment knows about and is the single
//! entry point the scheduler, the manager, and the CLI go through to execute
//! them by name.

use std::collections::BTreeMap;

use crate::change::Change;
use crate::config::ConfigError;
use crate::context::ExecutionContext;
use crate::filter::InvertibleFilter;
use crate::schema::{BatchOutcome, Schema, SchemaRunReport};

/// Holds registered schemas keyed by name.
pub struct Runner {
    schemas: BTreeMap<String, Schema>,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            schemas: BTreeMap::new(),
        }
    }

    /// Registers a schema under its configured name.
    pub fn register(&mut self, schema: Schema) -> Result<(), ConfigError> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(ConfigError::DuplicateSchema { name });
        }
        self.schemas.insert(name, schema);
        Ok(())
    }

    /// Registered schema names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Schema, ConfigError> {
        self.schemas
            .get_mut(name)
            .ok_or_else(|| ConfigError::UnknownSchema {
                name: name.to_string(),
            })
    }

    /// Runs one schema by name.
    pub async fn run(
        &mut self,
        ctx: &ExecutionContext,
        name: &str,
    ) -> anyhow::Result<SchemaRunReport> {
        let schema = self.get_mut(name)?;
        schema.run(ctx).await
    }

    /// Runs one schema with an extra filter appended for just this run.
    pub async fn run_with_filter(
        &mut self,
        ctx: &ExecutionContext,
        name: &str,
        filter: InvertibleFilter,
    ) -> anyhow::Result<SchemaRunReport> {
        let schema = self.get_mut(name)?;
        schema.run_with_filter(ctx, filter).await
    }

    /// Re-runs the schema that produced `change` against that change.
    ///
    /// The owning schema is resolved through [`Change::schema`].
    pub async fn update(
        &mut self,
        ctx: &ExecutionContext,
        change: &Change,
    ) -> anyhow::Result<BatchOutcome> {
        let name = change.schema.clone();
        let schema = self.get_mut(&name)?;
        schema.update(ctx, change).await
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::batcher::SingleBatcher;
    use crate::fakes::MemoryRepo;
    use crate::input::InlineInput;
    use crate::schema::SchemaConfig;
    use crate::transformer::{RegexTransformer, Transformer};

    fn schema(name: &str) -> Schema {
        let transformer: Box<dyn Transformer> =
            Box::new(RegexTransformer::new("a", "b").unwrap());
        Schema::new(
            SchemaConfig::new(name),
            Box::new(InlineInput::new(Vec::<String>::new())),
            Box::new(SingleBatcher::default()),
            transformer,
            Arc::new(MemoryRepo::new()),
        )
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut runner = Runner::new();
        runner.register(schema("docs")).unwrap();
        let err = runner.register(schema("docs")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSchema { name } if name == "docs"));
    }

    #[tokio::test]
    async fn test_run_unknown_schema_fails() {
        let mut runner = Runner::new();
        let ctx = ExecutionContext::new();
        let err = runner.run(&ctx, "missing").await.unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(config_err, ConfigError::UnknownSchema { name } if name == "missing"));
    }

    #[test]
    fn test_names_are_sorted() {
        let mut runner = Runner::new();
        runner.register(schema("zeta")).unwrap();
        runner.register(schema("alpha")).unwrap();
        assert_eq!(runner.names(), vec!["alpha", "zeta"]);
    }
}
