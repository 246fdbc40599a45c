//! Schema resolution with a per-instance cache
//!
//! A [`SchemaResolver`] loads the spec for a model through a [`SpecSource`],
//! parses it and keeps the result for the lifetime of the resolver. Two jobs
//! racing on the same unseen model may both parse; parsing is deterministic,
//! so whichever insert lands last is indistinguishable from the first.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use fwload_common::{Schema, SpecError};

/// Where spec text comes from
#[async_trait]
pub trait SpecSource: Send + Sync {
    /// Return the raw spec text for `model`
    async fn load(&self, model: &str) -> std::io::Result<String>;
}

/// Reads `<dir>/<model>.<extension>` from disk
#[derive(Debug, Clone)]
pub struct DirectorySpecSource {
    dir: PathBuf,
    extension: String,
}

impl DirectorySpecSource {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn path_for(&self, model: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", model, self.extension.trim_start_matches('.')))
    }
}

#[async_trait]
impl SpecSource for DirectorySpecSource {
    async fn load(&self, model: &str) -> std::io::Result<String> {
        tokio::fs::read_to_string(self.path_for(model)).await
    }
}

/// Serves spec text from memory and counts lookups
#[derive(Debug, Default)]
pub struct StaticSpecSource {
    specs: HashMap<String, String>,
    loads: AtomicUsize,
}

impl StaticSpecSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spec(mut self, model: impl Into<String>, content: impl Into<String>) -> Self {
        self.specs.insert(model.into(), content.into());
        self
    }

    /// Number of `load` calls served so far
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpecSource for StaticSpecSource {
    async fn load(&self, model: &str) -> std::io::Result<String> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.specs.get(model).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no spec registered for '{}'", model),
            )
        })
    }
}

/// Loads and memoizes schemas by model name
pub struct SchemaResolver {
    source: Arc<dyn SpecSource>,
    cache: RwLock<HashMap<String, Arc<Schema>>>,
}

impl SchemaResolver {
    pub fn new(source: Arc<dyn SpecSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the schema for `model`, parsing it on first use.
    ///
    /// Failures are not cached; the next call retries the load.
    pub async fn resolve(&self, model: &str) -> Result<Arc<Schema>, SpecError> {
        if let Some(schema) = self.cached(model) {
            return Ok(schema);
        }

        let content = self.source.load(model).await.map_err(|source| SpecError::Read {
            model: model.to_string(),
            source,
        })?;
        let schema = Arc::new(Schema::parse(model, &content)?);

        debug!(model, columns = schema.columns().len(), "Schema loaded");

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.to_string(), Arc::clone(&schema));

        Ok(schema)
    }

    pub fn cached(&self, model: &str) -> Option<Arc<Schema>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SchemaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaResolver")
            .field("cached_models", &self.len())
            .finish()
    }
}
