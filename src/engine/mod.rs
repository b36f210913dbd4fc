//! The conversion engine boundary.
//!
//! The pipeline treats the engine as opaque: bytes in, bytes out, or a
//! failure with an optional message. Two traits split that boundary:
//!
//! * [`EngineLoader`]: produces an engine. Shared with the worker thread at
//!   launch and called there, lazily, on the first request.
//! * [`ConversionEngine`]: the loaded engine. Created and used only on the
//!   worker thread, so it need not be `Send`.
//!
//! [`EngineHandle`] owns the load lifecycle; [`NativeEngineLoader`] binds the
//! shared-library engine through `engine-auto`.

mod handle;
mod native;

pub use handle::{EngineHandle, EngineStatus};
pub use native::NativeEngineLoader;

use crate::error::EngineError;
use crate::format::FormatTag;
use std::sync::Arc;

/// A loaded conversion engine.
pub trait ConversionEngine {
    /// Convert `input` from `source` to `target`.
    ///
    /// `input` is passed by value so an engine may hand the same allocation
    /// back without copying.
    fn convert(
        &self,
        input: Vec<u8>,
        source: &FormatTag,
        target: &FormatTag,
    ) -> Result<Vec<u8>, EngineError>;
}

/// Produces a [`ConversionEngine`] on the worker thread.
pub trait EngineLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn ConversionEngine>, EngineError>;
}

impl<F> EngineLoader for F
where
    F: Fn() -> Result<Box<dyn ConversionEngine>, EngineError> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn ConversionEngine>, EngineError> {
        self()
    }
}

/// Wrap a closure as a shareable [`EngineLoader`].
pub fn loader_fn<F>(f: F) -> Arc<dyn EngineLoader>
where
    F: Fn() -> Result<Box<dyn ConversionEngine>, EngineError> + Send + Sync + 'static,
{
    Arc::new(f)
}

struct FnEngine<F>(F);

impl<F> ConversionEngine for FnEngine<F>
where
    F: Fn(Vec<u8>, &FormatTag, &FormatTag) -> Result<Vec<u8>, EngineError>,
{
    fn convert(
        &self,
        input: Vec<u8>,
        source: &FormatTag,
        target: &FormatTag,
    ) -> Result<Vec<u8>, EngineError> {
        (self.0)(input, source, target)
    }
}

/// Wrap a closure as a boxed [`ConversionEngine`].
pub fn engine_fn<F>(f: F) -> Box<dyn ConversionEngine>
where
    F: Fn(Vec<u8>, &FormatTag, &FormatTag) -> Result<Vec<u8>, EngineError> + 'static,
{
    Box::new(FnEngine(f))
}
