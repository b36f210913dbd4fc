//! # flux-convert
//!
//! Convert files between formats on a background worker that lazily loads a
//! native conversion engine, while the UI-facing side stays responsive.
//!
//! ## Why a background worker?
//!
//! A conversion is one opaque, blocking call into a native engine that may
//! take seconds, and the engine itself must be located, possibly downloaded,
//! and bound before the first call. Doing that on the UI side would freeze
//! it. This crate keeps the engine on a dedicated thread and talks to it
//! only through messages, with buffer ownership moved rather than copied.
//!
//! ## Pipeline Overview
//!
//! ```text
//! UI context (tokio task)                    flux-worker thread
//!  │
//!  ├─ 1. Select   remember the chosen file
//!  ├─ 2. Submit   reject if busy / no file / worker lost
//!  ├─ 3. Read     tokio::fs::read of the captured file
//!  ├─ 4. Post     WorkerRequest ───────────────► lazy engine load (once)
//!  │                                             convert(bytes, src, tgt)
//!  ├─ 5. Resolve  WorkerResponse ◄────────────── success / error
//!  └─ 6. Expose   Artifact named <base>.<ext>
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flux_convert::{FormatPair, PipelineConfig, SelectedFile, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .engine_library("/opt/flux/libflux_engine.so")
//!         .build()?;
//!     let session = Session::launch(&config)?;
//!
//!     let view = session
//!         .convert(SelectedFile::from_path("scene.ply"), FormatPair::new("ply", "spz"))
//!         .await?;
//!     println!("{}", view.status);
//!     if let Some(artifact) = view.artifact {
//!         artifact.save_in_dir(".")?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `flux-convert` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! flux-convert = { version = "0.3", default-features = false }
//! ```
//!
//! ## Engine Discovery
//!
//! The native engine is found in this order: explicit path, then
//! `FLUX_ENGINE_LIB_PATH`, then the per-ABI cache directory, then a
//! download from the configured base URL. See the `engine-auto` crate.

pub mod artifact;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod format;
pub mod protocol;
pub mod session;
pub mod worker;

// Re-exports for convenience
pub use artifact::{Artifact, ArtifactSummary};
pub use buffer::TransferBuffer;
pub use channel::{WorkerChannel, WorkerEvents, WorkerSender};
pub use config::{LoadPolicy, PipelineConfig, PipelineConfigBuilder};
pub use controller::{Controller, Phase, ReadJob, SelectedFile, Status, ViewState};
pub use engine::{
    engine_fn, loader_fn, ConversionEngine, EngineHandle, EngineLoader, EngineStatus,
    NativeEngineLoader,
};
pub use error::{EngineError, FluxError};
pub use format::{output_file_name, FormatPair, FormatTag, KNOWN_FORMATS};
pub use protocol::{WorkerEvent, WorkerRequest, WorkerResponse};
pub use session::Session;
pub use worker::{ConversionWorker, LOAD_FAILURE_MESSAGE, UNKNOWN_ERROR_MESSAGE};
