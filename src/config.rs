//! Configuration for a conversion pipeline.
//!
//! Everything the background worker needs to find its engine, and how it
//! reacts to a failed engine load, lives in [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. The config is cloned into the worker thread
//! once at launch; nothing in it changes afterwards.

use crate::engine::{EngineLoader, NativeEngineLoader};
use crate::error::FluxError;
use engine_auto::EngineSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default name of the background worker thread.
pub const DEFAULT_WORKER_THREAD_NAME: &str = "flux-worker";

/// Configuration for a [`crate::Session`].
///
/// # Example
/// ```rust
/// use flux_convert::{LoadPolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .engine_library("/opt/flux/libflux_engine.so")
///     .load_policy(LoadPolicy::Poison)
///     .build()
///     .unwrap();
/// assert_eq!(config.load_policy, LoadPolicy::Poison);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Explicit path to the native engine library.
    pub engine_library: Option<PathBuf>,

    /// Base URL hosting `flux-engine-{os}-{arch}.tgz` archives.
    ///
    /// Only consulted when no local copy of the engine is found.
    pub engine_url: Option<String>,

    /// Cache base directory for downloaded engines.
    pub engine_cache_dir: Option<PathBuf>,

    /// What a failed engine load means for later requests. Default: [`LoadPolicy::Retry`].
    pub load_policy: LoadPolicy,

    /// Name given to the background thread. Default: `flux-worker`.
    pub worker_thread_name: String,

    /// Pre-constructed engine loader. Takes precedence over the
    /// `engine_*` fields, which only feed the native loader.
    pub engine_loader: Option<Arc<dyn EngineLoader>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine_library: None,
            engine_url: None,
            engine_cache_dir: None,
            load_policy: LoadPolicy::default(),
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
            engine_loader: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("engine_library", &self.engine_library)
            .field("engine_url", &self.engine_url)
            .field("engine_cache_dir", &self.engine_cache_dir)
            .field("load_policy", &self.load_policy)
            .field("worker_thread_name", &self.worker_thread_name)
            .field(
                "engine_loader",
                &self.engine_loader.as_ref().map(|_| "<dyn EngineLoader>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Where the native loader should look for the engine.
    pub fn engine_source(&self) -> EngineSource {
        EngineSource {
            library_path: self.engine_library.clone(),
            download_base_url: self.engine_url.clone(),
            cache_dir: self.engine_cache_dir.clone(),
        }
    }

    /// The loader the worker will use: the injected one, else the native one.
    pub fn resolve_loader(&self) -> Arc<dyn EngineLoader> {
        match self.engine_loader {
            Some(ref loader) => Arc::clone(loader),
            None => Arc::new(NativeEngineLoader::new(self.engine_source())),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn engine_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.engine_library = Some(path.into());
        self
    }

    pub fn engine_url(mut self, url: impl Into<String>) -> Self {
        self.config.engine_url = Some(url.into());
        self
    }

    pub fn engine_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.engine_cache_dir = Some(dir.into());
        self
    }

    pub fn load_policy(mut self, policy: LoadPolicy) -> Self {
        self.config.load_policy = policy;
        self
    }

    pub fn worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.worker_thread_name = name.into();
        self
    }

    pub fn engine_loader(mut self, loader: Arc<dyn EngineLoader>) -> Self {
        self.config.engine_loader = Some(loader);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, FluxError> {
        let c = &self.config;
        if c.worker_thread_name.trim().is_empty() {
            return Err(FluxError::InvalidConfig(
                "worker thread name must not be empty".into(),
            ));
        }
        // Thread names are passed to the OS as C strings.
        if c.worker_thread_name.contains('\0') {
            return Err(FluxError::InvalidConfig(
                "worker thread name must not contain NUL".into(),
            ));
        }
        if let Some(ref url) = c.engine_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(FluxError::InvalidConfig(format!(
                    "engine URL must be http:// or https://, got '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the worker treats an engine that failed to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPolicy {
    /// Every request after a failed load tries again. (default)
    #[default]
    Retry,
    /// The first failure is remembered; later requests fail without
    /// re-running the loader.
    Poison,
}

impl FromStr for LoadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(LoadPolicy::Retry),
            "poison" => Ok(LoadPolicy::Poison),
            other => Err(format!("unknown load policy '{other}' (expected retry or poison)")),
        }
    }
}

impl fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadPolicy::Retry => "retry",
            LoadPolicy::Poison => "poison",
        })
    }
}
