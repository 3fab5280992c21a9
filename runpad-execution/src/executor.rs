// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The isolated context that instantiates and runs compiled programs.
//!
//! A program executor is spawned by (and private to) a compiler host. It is
//! the sole owner of the drawing surface once one is transferred, and it
//! holds the artifact halves between their `load` acknowledgments and the
//! `execute` request. Keeping execution out of the compiler's context means
//! a crashing or hanging program never corrupts the reusable toolchain.

use crate::{
    host::{spawn_context, Outbound},
    toolchain::{Instantiator, ProgramIo},
    ExecutionError,
};
use bytes::Bytes;
use runpad_base::{
    envelope::{ArtifactKind, Envelope, ErrorReport, Payload, RequestId, Stage},
    surface::DrawingSurface,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace, warn};

/// The endpoint pair connecting a compiler host to its program executor.
#[derive(Debug)]
pub struct ExecutorHandle {
    requests: mpsc::UnboundedSender<Envelope>,
    events: mpsc::UnboundedReceiver<Envelope>,
    cancellation: CancellationToken,
}

impl ExecutorHandle {
    /// Posts an envelope to the executor context.
    pub fn send(&self, envelope: Envelope) -> Result<(), ExecutionError> {
        if self.cancellation.is_cancelled() {
            return Err(ExecutionError::ExecutorUnavailable);
        }
        self.requests
            .send(envelope)
            .map_err(|_| ExecutionError::ExecutorUnavailable)
    }

    /// Receives the next envelope emitted by the executor context, or
    /// [`None`] once the context is gone.
    pub async fn next_event(&mut self) -> Option<Envelope> {
        self.events.recv().await
    }

    /// Terminates the executor context.
    pub fn shut_down(&self) {
        self.cancellation.cancel();
    }
}

/// The actor owning the instantiator, the loaded artifacts and the surface.
pub struct ProgramExecutor {
    instantiator: Box<dyn Instantiator>,
    surface: Option<DrawingSurface>,
    script: Option<Bytes>,
    binary: Option<Bytes>,
    requests: mpsc::UnboundedReceiver<Envelope>,
    outbound: Outbound,
    cancellation: CancellationToken,
}

impl ProgramExecutor {
    /// Spawns the executor context.
    pub fn spawn(instantiator: Box<dyn Instantiator>) -> ExecutorHandle {
        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let cancellation = CancellationToken::new();

        let actor_cancellation = cancellation.clone();
        let outbound = Outbound::new(event_sender, cancellation.clone());
        spawn_context("program-executor".to_owned(), move || async move {
            let actor = ProgramExecutor {
                instantiator,
                surface: None,
                script: None,
                binary: None,
                requests: request_receiver,
                outbound,
                cancellation: actor_cancellation,
            };
            actor.run().await;
        });

        ExecutorHandle {
            requests: request_sender,
            events: event_receiver,
            cancellation,
        }
    }

    /// Runs the executor until it is shut down or its host is gone.
    #[instrument(skip_all)]
    async fn run(mut self) {
        trace!("Starting program executor");

        loop {
            let envelope = tokio::select! {
                _ = self.cancellation.cancelled() => break,
                maybe_envelope = self.requests.recv() => match maybe_envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.handle_envelope(envelope);
        }

        trace!("Program executor finished");
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope { id, body, .. } = envelope;
        let Ok(payload) = body else {
            trace!("Ignoring inbound error envelope");
            return;
        };

        match payload {
            Payload::SetCanvas(surface) => {
                // Ownership transfer happens at most once; the first
                // transferred surface stays for the executor's lifetime.
                if self.surface.is_none() {
                    self.surface = Some(surface);
                } else {
                    warn!("Ignoring repeated drawing surface transfer");
                }
            }
            Payload::Load(chunk) => {
                match chunk.kind {
                    ArtifactKind::Script => self.script = Some(chunk.bytes),
                    ArtifactKind::Binary => self.binary = Some(chunk.bytes),
                }
                self.outbound.emit(Envelope::system(id, Payload::Loaded));
            }
            Payload::Execute { entry } => self.execute(id, entry),
            _ => trace!("Ignoring unexpected envelope"),
        }
    }

    /// Instantiates the loaded artifacts and runs the program to completion.
    ///
    /// The artifacts are consumed: a subsequent `execute` needs a fresh
    /// handoff. A failure is reported as an application error envelope
    /// followed by a best-effort `exit` stage, so the upstream consumer
    /// never stays stuck in the running state.
    fn execute(&mut self, id: RequestId, entry: String) {
        let (script, binary) = match (self.script.take(), self.binary.take()) {
            (Some(script), Some(binary)) => (script, binary),
            _ => {
                warn!("Execute request before both artifact halves were loaded");
                self.outbound.emit(Envelope::application_error(
                    id.clone(),
                    ErrorReport::new("program artifacts were not loaded before execution"),
                ));
                self.outbound.emit(Envelope::stage(id, Stage::Exit));
                return;
            }
        };

        let streams = ProgramStreams {
            id: id.clone(),
            outbound: self.outbound.clone(),
            surface: self.surface.as_ref(),
        };

        match self.instantiator.execute(&script, &binary, &entry, &streams) {
            Ok(()) => {
                self.outbound.emit(Envelope::stage(id, Stage::Exit));
            }
            Err(error) => {
                warn!(%error, "Program did not finish normally");
                self.outbound.emit(Envelope::application_error(
                    id.clone(),
                    ErrorReport::from_error(&error),
                ));
                self.outbound.emit(Envelope::stage(id, Stage::Exit));
            }
        }
    }
}

/// The endpoints handed to the instantiator for one program run.
struct ProgramStreams<'surface> {
    id: RequestId,
    outbound: Outbound,
    surface: Option<&'surface DrawingSurface>,
}

impl ProgramIo for ProgramStreams<'_> {
    fn print(&self, line: &str) {
        self.outbound
            .emit(Envelope::text_chunk(self.id.clone(), format!("{line}\n")));
    }

    fn print_err(&self, line: &str) {
        self.outbound.emit(Envelope::application_error(
            self.id.clone(),
            ErrorReport::new(format!("{line}\n")),
        ));
    }

    fn surface(&self) -> Option<&DrawingSurface> {
        self.surface
    }
}

#[cfg(test)]
#[path = "unit_tests/executor.rs"]
mod tests;
