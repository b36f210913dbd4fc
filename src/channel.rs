//! The message channel between the UI context and the background worker.
//!
//! ## Why a dedicated OS thread?
//!
//! Engine loading and conversion are blocking native calls that may take
//! seconds. Running them on the async runtime would stall every other task;
//! `spawn_blocking` would hand them to a pool thread that changes between
//! calls, while the loaded engine must stay on one thread for its whole
//! life. A named thread that owns the engine and processes one message at a
//! time gives exactly the single-slot background context the pipeline needs.
//!
//! Both directions are unbounded tokio mpsc channels. The worker side uses
//! `blocking_recv`; the UI side awaits `recv`. Each direction is FIFO with
//! at-most-once delivery.

use crate::error::{panic_message, FluxError};
use crate::protocol::{WorkerEvent, WorkerRequest, WorkerResponse};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Reported as the fault reason when the channel closes without a panic.
pub const CHANNEL_CLOSED: &str = "worker channel closed";

/// Sending half, held by the UI context.
#[derive(Debug)]
pub struct WorkerSender {
    tx: mpsc::UnboundedSender<WorkerRequest>,
    posted: u64,
}

impl WorkerSender {
    /// Post a request. The request, and the buffer inside it, now belong to
    /// the worker.
    pub fn post(&mut self, request: WorkerRequest) -> Result<(), FluxError> {
        self.tx.send(request).map_err(|_| FluxError::WorkerLost)?;
        self.posted += 1;
        Ok(())
    }

    /// Number of requests successfully posted.
    pub fn messages_posted(&self) -> u64 {
        self.posted
    }
}

/// Receiving half, held by the UI context.
#[derive(Debug)]
pub struct WorkerEvents {
    rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl WorkerEvents {
    /// Next event from the worker. A closed channel reads as a fault.
    ///
    /// Cancel-safe.
    pub async fn recv(&mut self) -> WorkerEvent {
        self.rx
            .recv()
            .await
            .unwrap_or_else(|| WorkerEvent::Fault(CHANNEL_CLOSED.to_string()))
    }
}

/// A running background worker and both ends of its channel.
#[derive(Debug)]
pub struct WorkerChannel {
    sender: WorkerSender,
    events: WorkerEvents,
    thread: thread::JoinHandle<()>,
}

impl WorkerChannel {
    /// Start a worker thread named `thread_name`.
    ///
    /// `make_handler` runs on the new thread, so whatever it builds (the
    /// engine included) never crosses threads. If the handler panics, or
    /// `make_handler` does, the thread reports a [`WorkerEvent::Fault`]
    /// and exits.
    pub fn spawn<F, H>(thread_name: &str, make_handler: F) -> Result<Self, FluxError>
    where
        F: FnOnce() -> H + Send + 'static,
        H: FnMut(WorkerRequest) -> WorkerResponse,
    {
        let (req_tx, mut req_rx) = mpsc::unbounded_channel::<WorkerRequest>();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel::<WorkerEvent>();

        let thread = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let fault_tx = evt_tx.clone();
                let run = panic::catch_unwind(AssertUnwindSafe(move || {
                    let mut handler = make_handler();
                    while let Some(request) = req_rx.blocking_recv() {
                        let response = handler(request);
                        if evt_tx.send(WorkerEvent::Response(response)).is_err() {
                            break;
                        }
                    }
                }));

                match run {
                    Ok(()) => debug!("conversion worker stopped"),
                    Err(payload) => {
                        let reason = panic_message(&*payload)
                            .unwrap_or_else(|| "worker thread panicked".into());
                        error!(%reason, "conversion worker faulted");
                        let _ = fault_tx.send(WorkerEvent::Fault(reason));
                    }
                }
            })
            .map_err(FluxError::WorkerSpawnFailed)?;

        debug!(thread = thread_name, "conversion worker started");
        Ok(Self {
            sender: WorkerSender {
                tx: req_tx,
                posted: 0,
            },
            events: WorkerEvents { rx: evt_rx },
            thread,
        })
    }

    pub fn post(&mut self, request: WorkerRequest) -> Result<(), FluxError> {
        self.sender.post(request)
    }

    pub async fn recv(&mut self) -> WorkerEvent {
        self.events.recv().await
    }

    pub fn messages_posted(&self) -> u64 {
        self.sender.messages_posted()
    }

    /// Name of the worker thread.
    pub fn thread_name(&self) -> Option<&str> {
        self.thread.thread().name()
    }

    /// Split into halves. The thread is detached; it exits once the sender
    /// is dropped and the last request is answered.
    pub fn split(self) -> (WorkerSender, WorkerEvents) {
        (self.sender, self.events)
    }
}
