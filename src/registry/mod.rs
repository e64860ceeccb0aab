//! Template registry: lazy loading, cached compilation and rendering
//!
//! The registry owns every template. Registration only records metadata and
//! indexes it; content is fetched through the template's [`ContentLoader`] on
//! first use, compiled once per content fingerprint and rendered through a
//! bounded render cache.
//!
//! ```rust
//! use doctemplate::{vars, TemplateMetadata, TemplateRegistry};
//!
//! let registry = TemplateRegistry::with_defaults().unwrap();
//! registry
//!     .register_content(TemplateMetadata::new("greeting"), "Hello {{name}}!")
//!     .unwrap();
//! let out = registry.render("greeting", &vars! { "name" => "World" }).unwrap();
//! assert_eq!(out, "Hello World!");
//! ```

mod error;
mod metrics;
mod pool;

pub use error::{RegistryError, Stage};
pub use metrics::RegistryMetrics;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{self, RecvTimeoutError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheLimits, LruCache, SingleFlight};
use crate::compiler::{self, CompiledTemplate};
use crate::config::{ConfigError, EngineConfig};
use crate::error::CompileError;
use crate::index::TemplateIndex;
use crate::render::{self, RenderError};
use crate::template::{ContentLoader, StaticContent, TemplateId, TemplateMetadata};
use crate::value::{Fingerprint, Variables};

use metrics::EngineCounters;
use pool::WorkerPool;

/// Render cache key: output depends on the content and the variables
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RenderKey {
    id: TemplateId,
    content: Fingerprint,
    variables: Fingerprint,
}

impl CacheKey for RenderKey {
    type Group = TemplateId;

    fn group(&self) -> &TemplateId {
        &self.id
    }
}

/// Compiled cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CompiledKey {
    id: TemplateId,
    content: Fingerprint,
}

impl CacheKey for CompiledKey {
    type Group = TemplateId;

    fn group(&self) -> &TemplateId {
        &self.id
    }
}

fn output_size(output: &Arc<str>) -> usize {
    output.len()
}

fn compiled_size(compiled: &Arc<CompiledTemplate>) -> usize {
    compiled.estimated_size()
}

#[derive(Debug)]
struct LoadedContent {
    text: String,
    fingerprint: Fingerprint,
}

struct TemplateEntry {
    metadata: TemplateMetadata,
    loader: Arc<dyn ContentLoader>,
    content: OnceCell<LoadedContent>,
}

impl TemplateEntry {
    fn id(&self) -> &TemplateId {
        &self.metadata.id
    }
}

/// One element of a batch render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub id: TemplateId,
    pub variables: Variables,
}

impl RenderRequest {
    pub fn new(id: impl Into<TemplateId>, variables: Variables) -> Self {
        Self {
            id: id.into(),
            variables,
        }
    }
}

/// State shared between the registry handle and its workers
struct RegistryInner {
    config: EngineConfig,
    templates: DashMap<TemplateId, Arc<TemplateEntry>>,
    index: TemplateIndex,
    render_cache: LruCache<RenderKey, Arc<str>>,
    compiled_cache: LruCache<CompiledKey, Arc<CompiledTemplate>>,
    compile_flight: SingleFlight<CompiledKey, Result<Arc<CompiledTemplate>, CompileError>>,
    counters: EngineCounters,
    loaders: WorkerPool,
}

impl RegistryInner {
    fn entry(&self, id: &str) -> Result<Arc<TemplateEntry>, RegistryError> {
        self.templates
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::not_found(id))
    }

    /// Whether `entry` is still the registered template for its id
    fn is_current(&self, entry: &Arc<TemplateEntry>) -> bool {
        self.templates
            .get(entry.id())
            .is_some_and(|current| Arc::ptr_eq(current.value(), entry))
    }

    fn render(&self, id: &str, variables: &Variables) -> Result<String, RegistryError> {
        let started = Instant::now();
        let result = self.render_uncounted(id, variables);
        self.counters.record_render(started.elapsed(), result.is_ok());
        result
    }

    fn render_uncounted(&self, id: &str, variables: &Variables) -> Result<String, RegistryError> {
        let entry = self.entry(id)?;
        let content = self.content(&entry)?;
        let key = RenderKey {
            id: entry.id().clone(),
            content: content.fingerprint,
            variables: Fingerprint::of_variables(variables),
        };

        if let Some(output) = self.render_cache.get(&key) {
            debug!("Render cache hit for template {}", key.id);
            return Ok(output.to_string());
        }
        debug!("Render cache miss for template {}", key.id);

        let compiled = self.compiled(&entry, content)?;
        let output = render::render(&compiled, variables, self.config.strict_variable_mode)
            .map_err(|err| match err {
                RenderError::MissingVariable { variable } => RegistryError::MissingVariable {
                    id: entry.id().clone(),
                    variable,
                },
            })?;

        self.render_cache.put(key.clone(), Arc::from(output.as_str()));
        // An invalidate that ran while we rendered must not leave this output behind.
        if !self.is_current(&entry) {
            self.render_cache.invalidate(&key);
        }
        Ok(output)
    }

    /// Loaded content for `entry`, fetching it on first use
    ///
    /// Concurrent callers for the same template wait on a single load. A failed
    /// load leaves the template unloaded so the next call retries.
    fn content<'e>(&self, entry: &'e TemplateEntry) -> Result<&'e LoadedContent, RegistryError> {
        entry.content.get_or_try_init(|| {
            let id = entry.id();
            let result = self.fetch(entry).and_then(|bytes| {
                String::from_utf8(bytes).map_err(|err| RegistryError::load(id.clone(), err))
            });
            self.counters.record_load(result.is_ok());

            let text = result.map_err(|err| {
                warn!(template = %id, error = %err, "template load failed");
                err
            })?;
            let fingerprint = Fingerprint::of_content(text.as_bytes());
            debug!(template = %id, %fingerprint, bytes = text.len(), "template content loaded");
            Ok(LoadedContent { text, fingerprint })
        })
    }

    /// Call the loader, bounded by the load timeout when one is configured
    fn fetch(&self, entry: &TemplateEntry) -> Result<Vec<u8>, RegistryError> {
        let id = entry.id();
        let timeout = match self.config.load_timeout() {
            Some(timeout) => timeout,
            None => {
                return entry
                    .loader
                    .load(id)
                    .map_err(|source| RegistryError::load(id.clone(), source))
            }
        };

        let timed_out = || RegistryError::Timeout {
            id: id.clone(),
            stage: Stage::Load,
            after: timeout,
        };
        let deadline = Instant::now() + timeout;
        let (tx, rx) = channel::bounded(1);
        let loader = Arc::clone(&entry.loader);
        let task_id = id.clone();
        let queued = self.loaders.submit_before(
            Box::new(move || {
                // Nobody is waiting for a load that sat in the queue past its deadline.
                if Instant::now() < deadline {
                    let _ = tx.send(loader.load(&task_id));
                }
            }),
            deadline,
        );
        if !queued {
            warn!(template = %id, "loader pool saturated");
            return Err(timed_out());
        }

        match rx.recv_deadline(deadline) {
            Ok(result) => result.map_err(|source| RegistryError::load(id.clone(), source)),
            Err(RecvTimeoutError::Timeout) => Err(timed_out()),
            // A job skipped at its deadline also hangs up without a result.
            Err(RecvTimeoutError::Disconnected) if Instant::now() >= deadline => Err(timed_out()),
            Err(RecvTimeoutError::Disconnected) => {
                Err(RegistryError::load(id.clone(), "content loader panicked"))
            }
        }
    }

    /// Compiled form of `content`, compiling at most once per content fingerprint
    fn compiled(
        &self,
        entry: &Arc<TemplateEntry>,
        content: &LoadedContent,
    ) -> Result<Arc<CompiledTemplate>, RegistryError> {
        let key = CompiledKey {
            id: entry.id().clone(),
            content: content.fingerprint,
        };
        if let Some(compiled) = self.compiled_cache.get(&key) {
            return Ok(compiled);
        }

        let result = self.compile_flight.run(&key, || {
            // An earlier leader may have finished between our miss and now.
            if let Some(compiled) = self.compiled_cache.peek(&key) {
                return Ok(compiled);
            }
            let deadline = self
                .config
                .compile_timeout()
                .map(|timeout| Instant::now() + timeout);
            let result = compiler::compile_with_deadline(&content.text, deadline).map(Arc::new);
            self.counters.record_compile(result.is_ok());
            if let Ok(compiled) = &result {
                debug!(
                    "Compiled template {} ({} instructions)",
                    key.id,
                    compiled.instruction_count()
                );
                self.compiled_cache.put(key.clone(), Arc::clone(compiled));
                if !self.is_current(entry) {
                    self.compiled_cache.invalidate(&key);
                }
            }
            result
        });

        result.map_err(|source| match source {
            CompileError::DeadlineExceeded { .. } => {
                let after = self.config.compile_timeout().unwrap_or_default();
                warn!(template = %key.id, ?after, "template compilation timed out");
                RegistryError::Timeout {
                    id: key.id.clone(),
                    stage: Stage::Compile,
                    after,
                }
            }
            source => RegistryError::Compilation {
                id: key.id.clone(),
                source,
            },
        })
    }
}

/// Registry of templates with lazy loading and two cache levels
///
/// Cheap operations (`register`, lookups, `search`) never touch template
/// content. `render_batch` fans requests out over a fixed pool of worker
/// threads which are joined when the registry is dropped.
pub struct TemplateRegistry {
    inner: Arc<RegistryInner>,
    pool: WorkerPool,
}

impl TemplateRegistry {
    /// Create a registry, validating `config` and starting the worker pool
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = WorkerPool::new(
            "template-worker",
            config.worker_pool_size,
            config.batch_queue_capacity,
        )?;
        // A hung loader must not block dropping the registry.
        let loaders =
            WorkerPool::new("template-loader", config.loader_pool_size, config.loader_pool_size)?
                .detached();
        let inner = RegistryInner {
            render_cache: LruCache::new(
                CacheLimits::new(config.render_cache_max_entries, config.render_cache_max_bytes),
                output_size,
            ),
            compiled_cache: LruCache::new(
                CacheLimits::new(
                    config.compiled_cache_max_entries,
                    config.compiled_cache_max_bytes,
                ),
                compiled_size,
            ),
            templates: DashMap::new(),
            index: TemplateIndex::new(),
            compile_flight: SingleFlight::new(),
            counters: EngineCounters::default(),
            loaders,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
            pool,
        })
    }

    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register a template without loading its content
    pub fn register(
        &self,
        metadata: TemplateMetadata,
        loader: impl ContentLoader,
    ) -> Result<TemplateId, RegistryError> {
        let id = metadata.id.clone();
        match self.inner.templates.entry(id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateId { id }),
            Entry::Vacant(slot) => {
                // Index while holding the slot so a racing invalidate sees both or neither.
                self.inner.index.add(&metadata);
                slot.insert(Arc::new(TemplateEntry {
                    metadata,
                    loader: Arc::new(loader),
                    content: OnceCell::new(),
                }));
                info!("Registered template {}", id);
                Ok(id)
            }
        }
    }

    /// Register a template whose content is already in memory
    pub fn register_content(
        &self,
        metadata: TemplateMetadata,
        content: impl AsRef<str>,
    ) -> Result<TemplateId, RegistryError> {
        self.register(metadata, StaticContent::new(content))
    }

    /// Load a template's content now instead of on first render
    pub fn load(&self, id: &str) -> Result<(), RegistryError> {
        let entry = self.inner.entry(id)?;
        self.inner.content(&entry).map(|_| ())
    }

    /// Load and compile a template, surfacing syntax errors before any render
    pub fn precompile(&self, id: &str) -> Result<(), RegistryError> {
        let entry = self.inner.entry(id)?;
        let content = self.inner.content(&entry)?;
        self.inner.compiled(&entry, content).map(|_| ())
    }

    /// Render a template with `variables`
    pub fn render(&self, id: &str, variables: &Variables) -> Result<String, RegistryError> {
        self.inner.render(id, variables)
    }

    /// Render many requests on the worker pool; results keep request order
    pub fn render_batch(&self, requests: Vec<RenderRequest>) -> Vec<Result<String, RegistryError>> {
        self.render_batch_with_cancel(requests, &CancellationToken::new())
    }

    /// Like [`render_batch`](Self::render_batch), but stops starting new
    /// renders once `cancel` fires
    ///
    /// Elements not yet started when the token is cancelled yield
    /// [`RegistryError::Cancelled`]; finished results are kept.
    pub fn render_batch_with_cancel(
        &self,
        requests: Vec<RenderRequest>,
        cancel: &CancellationToken,
    ) -> Vec<Result<String, RegistryError>> {
        let mut results: Vec<Option<Result<String, RegistryError>>> =
            (0..requests.len()).map(|_| None).collect();
        let mut ids = Vec::with_capacity(requests.len());
        let (done_tx, done_rx) = channel::unbounded();

        for (index, request) in requests.into_iter().enumerate() {
            ids.push(request.id.clone());
            if cancel.is_cancelled() {
                results[index] = Some(Err(RegistryError::Cancelled { id: request.id }));
                continue;
            }

            let inner = Arc::clone(&self.inner);
            let cancel = cancel.clone();
            let done = done_tx.clone();
            let submitted = self.pool.submit(Box::new(move || {
                let result = if cancel.is_cancelled() {
                    Err(RegistryError::Cancelled { id: request.id })
                } else {
                    inner.render(request.id.as_str(), &request.variables)
                };
                let _ = done.send((index, result));
            }));
            if !submitted {
                results[index] = Some(Err(RegistryError::Cancelled {
                    id: ids[index].clone(),
                }));
            }
        }
        drop(done_tx);

        // Ends once every job has either reported or been dropped by a panic.
        for (index, result) in done_rx.iter() {
            results[index] = Some(result);
        }

        results
            .into_iter()
            .zip(ids)
            .map(|(result, id)| {
                result.unwrap_or_else(|| {
                    warn!(template = %id, "batch element lost to a worker panic");
                    Err(RegistryError::WorkerPanicked { id })
                })
            })
            .collect()
    }

    /// Remove a template with its index entries and every cached artifact
    pub fn invalidate(&self, id: &str) -> Result<(), RegistryError> {
        let id = TemplateId::from(id);
        match self.inner.templates.entry(id.clone()) {
            Entry::Vacant(_) => return Err(RegistryError::NotFound { id }),
            Entry::Occupied(slot) => {
                self.inner.index.remove(&id);
                slot.remove();
            }
        }
        let compiled = self.inner.compiled_cache.invalidate_group(&id);
        let rendered = self.inner.render_cache.invalidate_group(&id);
        info!(
            "Invalidated template {} ({} compiled, {} rendered entries dropped)",
            id, compiled, rendered
        );
        Ok(())
    }

    /// Full-text search over template metadata
    pub fn search(&self, query: &str) -> Vec<TemplateId> {
        self.inner.index.search(query)
    }

    pub fn find_by_category(&self, category: &str) -> BTreeSet<TemplateId> {
        self.inner.index.find_by_category(category)
    }

    pub fn find_by_type(&self, template_type: &str) -> BTreeSet<TemplateId> {
        self.inner.index.find_by_type(template_type)
    }

    pub fn find_by_tag(&self, tag: &str) -> BTreeSet<TemplateId> {
        self.inner.index.find_by_tag(tag)
    }

    pub fn metadata(&self, id: &str) -> Option<TemplateMetadata> {
        self.inner
            .templates
            .get(id)
            .map(|entry| entry.metadata.clone())
    }

    /// Whether a template's content has been loaded
    pub fn is_loaded(&self, id: &str) -> bool {
        self.inner
            .templates
            .get(id)
            .is_some_and(|entry| entry.content.get().is_some())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.templates.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.templates.is_empty()
    }

    /// Snapshot of cache and engine counters
    pub fn metrics(&self) -> RegistryMetrics {
        self.inner.counters.snapshot(
            self.inner.render_cache.stats(),
            self.inner.compiled_cache.stats(),
        )
    }
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.len())
            .field("workers", &self.pool.size())
            .finish_non_exhaustive()
    }
}
