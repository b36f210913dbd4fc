//! Lazy, one-time engine initialisation.
//!
//! ## Why an explicit state cell?
//!
//! The engine is expensive to obtain (bind a shared library, maybe download
//! it first) and must be loaded at most once per worker. A boolean "loaded"
//! flag cannot tell "never tried" from "tried and failed", and it says
//! nothing about a load that blew up halfway. [`EngineHandle`] spells the
//! lifecycle out:
//!
//! ```text
//! Uninitialized ──► Loading ──► Ready
//!                      │
//!                      └──────► Failed ──► Loading (Retry policy only)
//! ```
//!
//! `Loading` is only ever observed while the loader runs. A loader that
//! panics is caught and lands in `Failed`, never `Ready`.

use super::{ConversionEngine, EngineLoader};
use crate::config::LoadPolicy;
use crate::error::{panic_message, EngineError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

enum EngineState {
    Uninitialized,
    Loading,
    Ready(Box<dyn ConversionEngine>),
    Failed(String),
}

/// Observable lifecycle state of an [`EngineHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

/// The worker's single engine slot.
///
/// Owned by the worker thread; every transition takes `&mut self`, so no
/// locking is involved.
pub struct EngineHandle {
    state: EngineState,
    loader: Arc<dyn EngineLoader>,
    policy: LoadPolicy,
    load_attempts: usize,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &self.status())
            .field("policy", &self.policy)
            .field("load_attempts", &self.load_attempts)
            .finish()
    }
}

impl EngineHandle {
    pub fn new(loader: Arc<dyn EngineLoader>, policy: LoadPolicy) -> Self {
        Self {
            state: EngineState::Uninitialized,
            loader,
            policy,
            load_attempts: 0,
        }
    }

    pub fn status(&self) -> EngineStatus {
        match self.state {
            EngineState::Uninitialized => EngineStatus::Uninitialized,
            EngineState::Loading => EngineStatus::Loading,
            EngineState::Ready(_) => EngineStatus::Ready,
            EngineState::Failed(_) => EngineStatus::Failed,
        }
    }

    /// How many times the loader has been invoked.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts
    }

    /// Reason for the last failed load, if the handle is `Failed`.
    pub fn failure(&self) -> Option<&str> {
        match self.state {
            EngineState::Failed(ref reason) => Some(reason),
            _ => None,
        }
    }

    /// Return the engine, loading it first if needed.
    ///
    /// Under [`LoadPolicy::Poison`] a failed handle reports its stored reason
    /// without calling the loader again.
    pub fn ensure_ready(&mut self) -> Result<&dyn ConversionEngine, EngineError> {
        match self.state {
            EngineState::Ready(_) => {}
            EngineState::Loading => {
                return Err(EngineError::Load(
                    "engine initialisation is already in progress".into(),
                ));
            }
            EngineState::Failed(ref reason) if self.policy == LoadPolicy::Poison => {
                return Err(EngineError::Load(reason.clone()));
            }
            EngineState::Uninitialized | EngineState::Failed(_) => self.initialize(),
        }

        match self.state {
            EngineState::Ready(ref engine) => Ok(engine.as_ref()),
            EngineState::Failed(ref reason) => Err(EngineError::Load(reason.clone())),
            EngineState::Uninitialized | EngineState::Loading => Err(EngineError::Load(
                "engine initialisation did not complete".into(),
            )),
        }
    }

    fn initialize(&mut self) {
        self.state = EngineState::Loading;
        self.load_attempts += 1;
        let attempt = self.load_attempts;

        let loader = Arc::clone(&self.loader);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| loader.load()));

        self.state = match outcome {
            Ok(Ok(engine)) => {
                info!(attempt, "conversion engine ready");
                EngineState::Ready(engine)
            }
            Ok(Err(e)) => {
                warn!(attempt, error = %e, "conversion engine failed to load");
                EngineState::Failed(match e {
                    EngineError::Load(reason) => reason,
                    other => other.to_string(),
                })
            }
            Err(payload) => {
                let reason = panic_message(&*payload)
                    .unwrap_or_else(|| "engine loader panicked".into());
                error!(attempt, %reason, "conversion engine loader panicked");
                EngineState::Failed(reason)
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{engine_fn, loader_fn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_loader(
        calls: Arc<AtomicUsize>,
        fail_first: usize,
    ) -> Arc<dyn EngineLoader> {
        loader_fn(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < fail_first {
                Err(EngineError::Load(format!("attempt {n} failed")))
            } else {
                Ok(engine_fn(|input, _, _| Ok(input)))
            }
        })
    }

    #[test]
    fn loads_once_and_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut h = EngineHandle::new(counting_loader(calls.clone(), 0), LoadPolicy::Retry);
        assert_eq!(h.status(), EngineStatus::Uninitialized);

        h.ensure_ready().unwrap();
        h.ensure_ready().unwrap();

        assert_eq!(h.status(), EngineStatus::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.load_attempts(), 1);
    }

    #[test]
    fn retry_policy_reruns_loader() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut h = EngineHandle::new(counting_loader(calls.clone(), 1), LoadPolicy::Retry);

        assert!(h.ensure_ready().is_err());
        assert_eq!(h.status(), EngineStatus::Failed);
        assert_eq!(h.failure(), Some("attempt 0 failed"));

        assert!(h.ensure_ready().is_ok());
        assert_eq!(h.status(), EngineStatus::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn poison_policy_is_sticky() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut h = EngineHandle::new(counting_loader(calls.clone(), 1), LoadPolicy::Poison);

        let first = h.ensure_ready().err().unwrap();
        let second = h.ensure_ready().err().unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.status(), EngineStatus::Failed);
    }

    #[test]
    fn panicking_loader_ends_failed() {
        let loader = loader_fn(|| panic!("bad relocation"));
        let mut h = EngineHandle::new(loader, LoadPolicy::Retry);

        let err = h.ensure_ready().err().unwrap();

        assert_eq!(err, EngineError::Load("bad relocation".into()));
        assert_eq!(h.status(), EngineStatus::Failed);
        assert_eq!(h.load_attempts(), 1);
    }
}
