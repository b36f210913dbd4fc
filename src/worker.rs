//! The conversion worker: one request in, one structured response out.
//!
//! [`ConversionWorker::handle`] never fails and never unwinds for expected
//! problems. An engine that cannot be loaded, rejects the input, or panics
//! inside `convert` all come back as [`WorkerResponse::Error`]. Only a fault
//! outside this function reaches the UI side unstructured (see
//! [`crate::channel`]).

use crate::buffer::TransferBuffer;
use crate::config::PipelineConfig;
use crate::engine::EngineHandle;
use crate::error::{panic_message, EngineError};
use crate::protocol::{WorkerRequest, WorkerResponse};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Reported for every request the engine could not be loaded for.
pub const LOAD_FAILURE_MESSAGE: &str =
    "Failed to load the conversion module. It may be missing or blocked.";

/// Reported when a conversion failure carries no message of its own.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred.";

/// Per-thread conversion service.
#[derive(Debug)]
pub struct ConversionWorker {
    engine: EngineHandle,
    handled: u64,
}

impl ConversionWorker {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine, handled: 0 }
    }

    /// Worker with the loader and policy from `config`. The engine is not
    /// touched until the first request.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(EngineHandle::new(
            config.resolve_loader(),
            config.load_policy,
        ))
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Number of requests handled so far.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Handle one request.
    pub fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        self.handled += 1;
        let WorkerRequest {
            input_data,
            src_fmt,
            tgt_fmt,
        } = request;
        debug!(
            request = self.handled,
            bytes = input_data.len(),
            src = %src_fmt,
            tgt = %tgt_fmt,
            "handling conversion request"
        );

        let engine = match self.engine.ensure_ready() {
            Ok(engine) => engine,
            Err(e) => {
                warn!(error = %e, "cannot convert without an engine");
                return WorkerResponse::Error {
                    error: LOAD_FAILURE_MESSAGE.to_string(),
                };
            }
        };

        let input = input_data.into_vec();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.convert(input, &src_fmt, &tgt_fmt)
        }));

        match outcome {
            Ok(Ok(output)) => {
                debug!(bytes = output.len(), "conversion succeeded");
                WorkerResponse::Success {
                    data: TransferBuffer::new(output),
                }
            }
            Ok(Err(e)) => {
                let message = match e {
                    EngineError::Convert(message) => message,
                    EngineError::Load(reason) => Some(reason),
                };
                let error = message_or_fallback(message);
                warn!(%error, "conversion failed");
                WorkerResponse::Error { error }
            }
            Err(payload) => {
                let error = message_or_fallback(panic_message(&*payload));
                warn!(%error, "engine panicked during conversion");
                WorkerResponse::Error { error }
            }
        }
    }
}

fn message_or_fallback(message: Option<String>) -> String {
    message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadPolicy;
    use crate::engine::{engine_fn, loader_fn, EngineStatus};
    use crate::format::FormatPair;

    fn worker_with(
        engine: impl Fn(Vec<u8>) -> Result<Vec<u8>, EngineError> + Send + Sync + Copy + 'static,
    ) -> ConversionWorker {
        let loader = loader_fn(move || Ok(engine_fn(move |input, _, _| engine(input))));
        ConversionWorker::new(EngineHandle::new(loader, LoadPolicy::Retry))
    }

    fn request(bytes: &[u8]) -> WorkerRequest {
        WorkerRequest::new(
            TransferBuffer::new(bytes.to_vec()),
            FormatPair::new("ply", "spz"),
        )
    }

    #[test]
    fn echo_returns_input() {
        let mut w = worker_with(Ok);
        match w.handle(request(b"abc")) {
            WorkerResponse::Success { data } => assert_eq!(data.as_slice(), b"abc"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(w.engine().status(), EngineStatus::Ready);
        assert_eq!(w.handled(), 1);
    }

    #[test]
    fn engine_message_is_passed_through() {
        let mut w = worker_with(|_| Err(EngineError::convert("unsupported source format")));
        assert_eq!(
            w.handle(request(b"x")),
            WorkerResponse::Error {
                error: "unsupported source format".into()
            }
        );
    }

    #[test]
    fn missing_or_blank_message_falls_back() {
        let mut w = worker_with(|_| Err(EngineError::Convert(None)));
        assert_eq!(
            w.handle(request(b"x")),
            WorkerResponse::Error {
                error: UNKNOWN_ERROR_MESSAGE.into()
            }
        );

        let mut w = worker_with(|_| Err(EngineError::convert("   ")));
        assert_eq!(
            w.handle(request(b"x")),
            WorkerResponse::Error {
                error: UNKNOWN_ERROR_MESSAGE.into()
            }
        );
    }

    #[test]
    fn engine_panic_becomes_error_response() {
        let mut w = worker_with(|_| panic!("index out of bounds"));
        assert_eq!(
            w.handle(request(b"x")),
            WorkerResponse::Error {
                error: "index out of bounds".into()
            }
        );
        // The worker is still usable afterwards.
        assert!(matches!(
            w.handle(request(b"y")),
            WorkerResponse::Error { .. }
        ));
    }

    #[test]
    fn load_failure_uses_fixed_message() {
        let loader = loader_fn(|| Err(EngineError::Load("dlopen: no such file".into())));
        let mut w = ConversionWorker::new(EngineHandle::new(loader, LoadPolicy::Retry));

        assert_eq!(
            w.handle(request(b"x")),
            WorkerResponse::Error {
                error: LOAD_FAILURE_MESSAGE.into()
            }
        );
        assert_eq!(w.engine().status(), EngineStatus::Failed);
    }
}
