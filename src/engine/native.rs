//! The shared-library engine, acquired through `engine-auto`.

use super::{ConversionEngine, EngineLoader};
use crate::error::EngineError;
use crate::format::FormatTag;
use engine_auto::{EngineSource, NativeEngine};
use tracing::{debug, info, trace};

/// Locates (downloading if configured) and binds the native engine.
#[derive(Debug, Clone)]
pub struct NativeEngineLoader {
    source: EngineSource,
}

impl NativeEngineLoader {
    pub fn new(source: EngineSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &EngineSource {
        &self.source
    }
}

impl EngineLoader for NativeEngineLoader {
    fn load(&self) -> Result<Box<dyn ConversionEngine>, EngineError> {
        debug!(source = ?self.source, "binding native conversion engine");
        let progress = |done: u64, total: Option<u64>| {
            trace!(done, total, "engine download progress");
        };
        let engine = engine_auto::bind_engine(&self.source, Some(&progress))
            .map_err(|e| EngineError::Load(e.to_string()))?;
        info!(path = %engine.path().display(), "native conversion engine bound");
        Ok(Box::new(engine))
    }
}

impl ConversionEngine for NativeEngine {
    fn convert(
        &self,
        input: Vec<u8>,
        source: &FormatTag,
        target: &FormatTag,
    ) -> Result<Vec<u8>, EngineError> {
        NativeEngine::convert(self, &input, source.as_str(), target.as_str())
            .map_err(|failure| EngineError::Convert(failure.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = NativeEngineLoader::new(EngineSource {
            library_path: Some(dir.path().join("absent").join("libflux_engine.so")),
            download_base_url: None,
            cache_dir: Some(dir.path().to_path_buf()),
        });
        if std::env::var(engine_auto::LIB_PATH_ENV).is_ok() {
            return;
        }

        match loader.load() {
            Err(EngineError::Load(reason)) => assert!(reason.contains("No engine library")),
            Err(other) => panic!("expected a load error, got {other}"),
            Ok(_) => panic!("expected a load error, got an engine"),
        }
    }
}
