//! The UI context: a tokio task driving a [`Controller`].
//!
//! A [`Session`] is a handle to that task. Commands go in over an mpsc
//! channel; every state change is published on a `watch` channel as a
//! [`ViewState`], so any number of observers can render it. The task awaits
//! the file read and the worker's answer concurrently with new commands,
//! which is what keeps a second submit answerable (and rejected) while a
//! conversion runs.
//!
//! Dropping the last handle stops the task, which drops the worker sender,
//! which lets the worker thread exit.

use crate::channel::{WorkerChannel, WorkerEvents, WorkerSender};
use crate::config::PipelineConfig;
use crate::controller::{Controller, SelectedFile, ViewState};
use crate::error::FluxError;
use crate::format::FormatPair;
use crate::protocol::WorkerEvent;
use crate::worker::ConversionWorker;
use futures::future::{BoxFuture, FutureExt, OptionFuture};
use std::io;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

enum UiCommand {
    Select(SelectedFile),
    Submit {
        formats: FormatPair,
        accepted: oneshot::Sender<Result<(), FluxError>>,
    },
}

/// Handle to a running conversion session.
#[derive(Debug)]
pub struct Session {
    commands: mpsc::UnboundedSender<UiCommand>,
    view: watch::Receiver<ViewState>,
}

impl Session {
    /// Start a worker thread for `config` and a session task driving it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(config: &PipelineConfig) -> Result<Self, FluxError> {
        let worker_config = config.clone();
        let channel = WorkerChannel::spawn(&config.worker_thread_name, move || {
            let mut worker = ConversionWorker::from_config(&worker_config);
            move |request| worker.handle(request)
        })?;
        info!(
            thread = %config.worker_thread_name,
            policy = %config.load_policy,
            "conversion session launched"
        );
        Ok(Self::with_channel(channel))
    }

    /// Drive an already running worker channel.
    pub fn with_channel(channel: WorkerChannel) -> Self {
        let controller = Controller::new();
        let (view_tx, view_rx) = watch::channel(controller.view());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sender, events) = channel.split();

        tokio::spawn(run(controller, cmd_rx, sender, events, view_tx));

        Self {
            commands: cmd_tx,
            view: view_rx,
        }
    }

    /// Choose the file for the next submit.
    pub fn select_file(&self, file: SelectedFile) -> Result<(), FluxError> {
        self.commands
            .send(UiCommand::Select(file))
            .map_err(|_| stopped())
    }

    /// Submit the selected file for conversion.
    ///
    /// Resolves once the submit is accepted or rejected, not when the
    /// conversion finishes; watch [`Self::updates`] or await
    /// [`Self::settled`] for that.
    pub async fn submit(&self, formats: FormatPair) -> Result<(), FluxError> {
        let (accepted, reply) = oneshot::channel();
        self.commands
            .send(UiCommand::Submit { formats, accepted })
            .map_err(|_| stopped())?;
        reply.await.map_err(|_| stopped())?
    }

    /// Current view.
    pub fn view(&self) -> ViewState {
        self.view.borrow().clone()
    }

    /// Stream of views, starting with the current one.
    pub fn updates(&self) -> WatchStream<ViewState> {
        WatchStream::new(self.view.clone())
    }

    /// Wait until no conversion is in progress and return that view.
    pub async fn settled(&self) -> Result<ViewState, FluxError> {
        let mut rx = self.view.clone();
        let view = rx.wait_for(|v| !v.busy).await.map_err(|_| stopped())?;
        Ok(view.clone())
    }

    /// Select `file`, submit it, and wait for the outcome.
    pub async fn convert(
        &self,
        file: SelectedFile,
        formats: FormatPair,
    ) -> Result<ViewState, FluxError> {
        self.select_file(file)?;
        self.submit(formats).await?;
        self.settled().await
    }
}

fn stopped() -> FluxError {
    FluxError::Internal("session task has stopped".into())
}

async fn run(
    mut controller: Controller,
    mut commands: mpsc::UnboundedReceiver<UiCommand>,
    mut sender: WorkerSender,
    mut events: WorkerEvents,
    view: watch::Sender<ViewState>,
) {
    let mut reading: Option<BoxFuture<'static, io::Result<Vec<u8>>>> = None;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    UiCommand::Select(file) => controller.select_file(file),
                    UiCommand::Submit { formats, accepted } => {
                        let outcome = controller.begin_submit(formats).map(|job| {
                            reading = Some(tokio::fs::read(job.file.path).boxed());
                        });
                        if let Err(ref e) = outcome {
                            debug!(reason = %e, "submit rejected");
                        }
                        // Publish before answering so `settled` sees the busy state.
                        view.send_replace(controller.view());
                        let _ = accepted.send(outcome);
                        continue;
                    }
                }
            }
            Some(bytes) = OptionFuture::from(reading.as_mut()) => {
                reading = None;
                if let Some(request) = controller.on_file_read(bytes) {
                    if let Err(e) = sender.post(request) {
                        warn!(error = %e, "worker unreachable");
                        controller.on_worker_event(WorkerEvent::Fault(e.to_string()));
                    }
                }
            }
            event = events.recv(), if !controller.is_lost() => {
                controller.on_worker_event(event);
            }
        }
        view.send_replace(controller.view());
    }

    debug!(posted = sender.messages_posted(), "session task stopped");
}
