//! Run-scoped execution context.
//!
//! The event sink, the file-content cache, and the active schema name travel
//! together through every pipeline call instead of living in process globals.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::events::{EventHandler, PipelineEvent, TracingEventHandler};

// ---------------------------------------------------------------------------
// FileCache
// ---------------------------------------------------------------------------

/// Shared read-through cache of file contents.
///
/// `write` goes to disk first and then updates the cache, so later reads in
/// the same run observe the write. Callers that reset the tree underneath
/// the cache (repo clean or rewind, external scripts) must invalidate with
/// [`FileCache::clear`] or [`FileCache::forget`].
#[derive(Debug, Default)]
pub struct FileCache {
    entries: Mutex<HashMap<PathBuf, String>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a file, serving repeat reads from the cache.
    pub fn read(&self, path: impl AsRef<Path>) -> std::io::Result<String> {
        let path = path.as_ref();
        let mut entries = self.entries.lock().unwrap();
        if let Some(contents) = entries.get(path) {
            return Ok(contents.clone());
        }
        let contents = std::fs::read_to_string(path)?;
        entries.insert(path.to_path_buf(), contents.clone());
        Ok(contents)
    }

    /// Write a file and keep the cache consistent with the write.
    pub fn write(&self, path: impl AsRef<Path>, contents: &str) -> std::io::Result<()> {
        let path = path.as_ref();
        std::fs::write(path, contents)?;
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    /// Drop one cached entry.
    pub fn forget(&self, path: impl AsRef<Path>) {
        self.entries.lock().unwrap().remove(path.as_ref());
    }

    /// Drop every cached entry. Called whenever the tree is reset.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Everything a pipeline call needs besides its own arguments.
///
/// Cloning is cheap: the sink and cache are shared handles. A schema run
/// derives a scoped copy via [`ExecutionContext::for_schema`] so repos and
/// components can see which schema is driving them.
#[derive(Clone)]
pub struct ExecutionContext {
    events: Arc<dyn EventHandler>,
    files: Arc<FileCache>,
    schema: Option<String>,
}

impl ExecutionContext {
    /// Context with the default tracing event sink.
    pub fn new() -> Self {
        Self::with_handler(Arc::new(TracingEventHandler))
    }

    pub fn with_handler(events: Arc<dyn EventHandler>) -> Self {
        Self {
            events,
            files: Arc::new(FileCache::new()),
            schema: None,
        }
    }

    /// Derive a context scoped to one schema run, sharing sink and cache.
    pub fn for_schema(&self, name: impl Into<String>) -> Self {
        Self {
            events: Arc::clone(&self.events),
            files: Arc::clone(&self.files),
            schema: Some(name.into()),
        }
    }

    /// Name of the schema driving the current run, if any.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn files(&self) -> &FileCache {
        &self.files
    }

    pub fn emit(&self, event: PipelineEvent) {
        self.events.handle(&event);
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
