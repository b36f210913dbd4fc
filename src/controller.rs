//! The UI-side state machine.
//!
//! [`Controller`] is pure: it does no I/O and owns no channel. Its methods
//! take the inputs of the outside world (a file chosen, a submit pressed,
//! the file's bytes, a worker event) and return what must happen next (a
//! file to read, a request to post). [`crate::Session`] wires it to tokio.
//!
//! ```text
//!            submit (file selected)          bytes read
//!   Idle ─────────────────────────► Reading ───────────► Dispatched
//!    ▲  ▲                              │                     │
//!    │  └──── read failed ─────────────┘                     │
//!    └──────────── success / error / fault ──────────────────┘
//! ```
//!
//! Only one request is ever in flight: a submit outside `Idle` is rejected,
//! not queued.

use crate::artifact::{Artifact, ArtifactSummary};
use crate::buffer::TransferBuffer;
use crate::error::FluxError;
use crate::format::{output_file_name, FormatPair};
use crate::protocol::{WorkerEvent, WorkerRequest, WorkerResponse};
use serde::{Serialize, Serializer};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const MSG_SELECT_FILE_FIRST: &str = "Please select a file first!";
pub const MSG_READING: &str = "Reading file...";
pub const MSG_SUCCESS: &str = "Conversion successful!";
pub const MSG_READ_FAILED: &str = "Error reading file.";
pub const MSG_WORKER_LOST: &str =
    "A critical error occurred in the background process. Please reload.";

// ── Types ────────────────────────────────────────────────────────────────

/// A file chosen by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedFile {
    /// Display name, used to derive the artifact name.
    pub name: String,
    /// Where the bytes are read from.
    pub path: PathBuf,
}

impl SelectedFile {
    /// Select a file by path, naming it after its final component.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { name, path }
    }
}

/// Where the controller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Reading,
    Dispatched,
}

/// The visible status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Empty,
    SelectFileFirst,
    Reading,
    Converting(FormatPair),
    Succeeded,
    Failed(String),
    ReadFailed,
    WorkerLost,
}

impl Status {
    pub fn message(&self) -> String {
        match self {
            Status::Empty => String::new(),
            Status::SelectFileFirst => MSG_SELECT_FILE_FIRST.to_string(),
            Status::Reading => MSG_READING.to_string(),
            Status::Converting(formats) => format!(
                "Converting from {} to {}...",
                formats.source.as_str().to_uppercase(),
                formats.target.as_str().to_uppercase()
            ),
            Status::Succeeded => MSG_SUCCESS.to_string(),
            Status::Failed(message) => format!("Error: {message}"),
            Status::ReadFailed => MSG_READ_FAILED.to_string(),
            Status::WorkerLost => MSG_WORKER_LOST.to_string(),
        }
    }
}

/// Snapshot of everything a view renders.
#[derive(Debug, Clone, Serialize)]
pub struct ViewState {
    pub phase: Phase,
    /// Status line text.
    pub status: String,
    /// Raw worker error message, when the last conversion failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(serialize_with = "serialize_artifact")]
    pub artifact: Option<Arc<Artifact>>,
    pub selected_file: Option<SelectedFile>,
    pub submit_enabled: bool,
    pub busy: bool,
    /// The worker is gone; a new session is needed.
    pub lost: bool,
    /// Requests posted to the worker over the session's life.
    pub requests_sent: u64,
}

impl ViewState {
    /// The worker's error message `M` behind an `Error: M` status.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn artifact_summary(&self) -> Option<ArtifactSummary> {
        self.artifact.as_deref().map(Artifact::summary)
    }
}

fn serialize_artifact<S: Serializer>(
    artifact: &Option<Arc<Artifact>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    artifact
        .as_deref()
        .map(Artifact::summary)
        .serialize(serializer)
}

/// File the caller must read before the submission can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadJob {
    pub file: SelectedFile,
}

#[derive(Debug, Clone)]
struct Submission {
    file: SelectedFile,
    formats: FormatPair,
}

// ── Controller ───────────────────────────────────────────────────────────

/// The pure controller state machine.
#[derive(Debug)]
pub struct Controller {
    phase: Phase,
    status: Status,
    selected: Option<SelectedFile>,
    in_flight: Option<Submission>,
    artifact: Option<Arc<Artifact>>,
    lost: bool,
    requests_sent: u64,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            status: Status::Empty,
            selected: None,
            in_flight: None,
            artifact: None,
            lost: false,
            requests_sent: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn artifact(&self) -> Option<&Arc<Artifact>> {
        self.artifact.as_ref()
    }

    /// Choose a file, replacing any previous choice.
    ///
    /// A submission already in flight keeps the file it captured.
    pub fn select_file(&mut self, file: SelectedFile) {
        debug!(name = %file.name, "file selected");
        self.selected = Some(file);
    }

    /// Start a submission. On success the caller must read the returned
    /// file and feed the result to [`Self::on_file_read`].
    pub fn begin_submit(&mut self, formats: FormatPair) -> Result<ReadJob, FluxError> {
        if self.lost {
            return Err(FluxError::WorkerLost);
        }
        if self.phase != Phase::Idle {
            return Err(FluxError::Busy);
        }
        let Some(file) = self.selected.clone() else {
            self.status = Status::SelectFileFirst;
            return Err(FluxError::NoFileSelected);
        };

        debug!(name = %file.name, %formats, "submission started");
        self.phase = Phase::Reading;
        self.status = Status::Reading;
        self.artifact = None;
        self.in_flight = Some(Submission {
            file: file.clone(),
            formats,
        });
        Ok(ReadJob { file })
    }

    /// Feed the result of reading the submitted file. Returns the request to
    /// post, or `None` when there is nothing to dispatch.
    pub fn on_file_read(&mut self, bytes: io::Result<Vec<u8>>) -> Option<WorkerRequest> {
        if self.phase != Phase::Reading {
            warn!(phase = ?self.phase, "file read completed outside the reading phase");
            return None;
        }
        let submission = self.in_flight.as_ref()?;

        match bytes {
            Ok(bytes) => {
                let formats = submission.formats.clone();
                debug!(bytes = bytes.len(), %formats, "dispatching conversion");
                self.phase = Phase::Dispatched;
                self.status = Status::Converting(formats.clone());
                self.requests_sent += 1;
                Some(WorkerRequest::new(TransferBuffer::new(bytes), formats))
            }
            Err(source) => {
                let err = FluxError::ReadFailed {
                    path: submission.file.path.clone(),
                    source,
                };
                warn!(error = %err, "submission abandoned");
                self.phase = Phase::Idle;
                self.status = Status::ReadFailed;
                self.in_flight = None;
                None
            }
        }
    }

    /// Feed an event from the worker.
    pub fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Fault(reason) => {
                error!(%reason, "background worker lost");
                self.lost = true;
                self.phase = Phase::Idle;
                self.status = Status::WorkerLost;
                self.artifact = None;
                self.in_flight = None;
            }
            WorkerEvent::Response(response) => {
                if self.phase != Phase::Dispatched {
                    warn!(phase = ?self.phase, "ignoring unsolicited worker response");
                    return;
                }
                let Some(submission) = self.in_flight.take() else {
                    warn!("worker response without a submission in flight");
                    return;
                };
                self.phase = Phase::Idle;
                match response {
                    WorkerResponse::Success { data } => {
                        let name = output_file_name(&submission.file.name, &submission.formats.target);
                        debug!(%name, bytes = data.len(), "conversion succeeded");
                        self.artifact = Some(Arc::new(Artifact::new(name, data)));
                        self.status = Status::Succeeded;
                    }
                    WorkerResponse::Error { error } => {
                        debug!(%error, "conversion failed");
                        self.artifact = None;
                        self.status = Status::Failed(error);
                    }
                }
            }
        }
    }

    /// Current snapshot for rendering.
    pub fn view(&self) -> ViewState {
        let error = match self.status {
            Status::Failed(ref message) => Some(message.clone()),
            _ => None,
        };
        ViewState {
            phase: self.phase,
            status: self.status.message(),
            error,
            artifact: self.artifact.clone(),
            selected_file: self.selected.clone(),
            submit_enabled: self.phase == Phase::Idle && !self.lost,
            busy: self.phase != Phase::Idle,
            lost: self.lost,
            requests_sent: self.requests_sent,
        }
    }
}
