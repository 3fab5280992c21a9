// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The runtime host for interpreted languages.

use super::{spawn_context, HostHandle, Outbound};
use crate::{
    toolchain::{Interpreter, InterpreterFactory, InterpreterIo},
    ExecutionError,
};
use runpad_base::{
    envelope::{Envelope, ErrorReport, Payload, PlotImage, RequestId, RunRequest, Stage},
    input_bridge::SharedInputRegion,
    language::HostKey,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// A host owning one interpreter instance inside an isolated context.
///
/// Runs submitted source directly: there is no compile step, so the first
/// stage a run reports is `running`. Output is streamed per flushed batch,
/// a rendered plot (if any) is forwarded once after a successful run, and
/// stdin requests block on the shared input region.
pub struct InterpreterHost {
    host: HostKey,
    interpreter: Box<dyn Interpreter>,
    stdin_region: Option<Arc<SharedInputRegion>>,
    requests: mpsc::UnboundedReceiver<Envelope>,
    outbound: Outbound,
    cancellation: CancellationToken,
}

impl InterpreterHost {
    /// Spawns the host context, beginning interpreter bootstrap immediately.
    ///
    /// The readiness signal is emitted exactly once, after the interpreter
    /// finished loading. A bootstrap failure is reported as a lifecycle
    /// error envelope and ends the context.
    pub fn spawn(host: HostKey, factory: Arc<dyn InterpreterFactory>) -> HostHandle {
        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let cancellation = CancellationToken::new();
        let outbound = Outbound::new(event_sender, cancellation.clone());

        let actor_cancellation = cancellation.clone();
        spawn_context(format!("{host}-host"), move || async move {
            let interpreter = match factory.load().await {
                Ok(interpreter) => interpreter,
                Err(error) => {
                    warn!(%host, %error, "Interpreter bootstrap failed");
                    outbound.emit(Envelope::system_error(
                        RequestId::lifecycle(),
                        ErrorReport::from_error(&error),
                    ));
                    return;
                }
            };

            outbound.emit(Envelope::system(
                RequestId::lifecycle(),
                Payload::Ready { host },
            ));

            let actor = InterpreterHost {
                host,
                interpreter,
                stdin_region: None,
                requests: request_receiver,
                outbound,
                cancellation: actor_cancellation,
            };
            actor.run().await;
        });

        HostHandle::new(host, request_sender, event_receiver, cancellation)
    }

    /// Runs the host until it is destroyed or all request senders are gone.
    #[instrument(skip_all, fields(host = %self.host))]
    async fn run(mut self) {
        trace!("Starting interpreter host");

        loop {
            let envelope = tokio::select! {
                _ = self.cancellation.cancelled() => break,
                maybe_envelope = self.requests.recv() => match maybe_envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.handle_envelope(envelope).await;
        }

        trace!("Interpreter host finished");
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope { id, body, .. } = envelope;
        let Ok(payload) = body else {
            trace!("Ignoring inbound error envelope");
            return;
        };

        match payload {
            Payload::StdinInit(region) => {
                // The first transfer wins; the region is never replaced.
                if self.stdin_region.is_none() {
                    self.stdin_region = Some(region);
                } else {
                    warn!("Ignoring repeated input region transfer");
                }
            }
            Payload::Run(request) if request.language.host() == self.host => {
                if request.code.is_empty() {
                    trace!("Ignoring run request with empty source");
                } else {
                    self.run_source(id, request).await;
                }
            }
            Payload::SetCanvas(_) => {
                trace!("Ignoring drawing surface transfer on an interpreted host");
            }
            _ => trace!("Ignoring unexpected envelope"),
        }
    }

    /// Runs one piece of source to completion.
    ///
    /// Emits the `running` stage, streams output while the interpreter
    /// flushes it, forwards the rendered plot if one was produced, and
    /// finishes with the `exit` stage. An interpreter failure becomes an
    /// error envelope on the same id instead, with no `exit` following.
    async fn run_source(&mut self, id: RequestId, request: RunRequest) {
        if request.compile_option.is_some() {
            trace!(
                language = %request.language,
                "Language has no compile step; ignoring compile option",
            );
        }

        self.outbound.emit(Envelope::stage(id.clone(), Stage::Running));

        let streams = HostStreams {
            id: id.clone(),
            outbound: self.outbound.clone(),
            stdin_region: self.stdin_region.clone(),
        };

        match self.interpreter.run(&request.code, &streams).await {
            Ok(()) => {
                if let Some(bytes) = self.interpreter.take_rendered_plot() {
                    debug!(len = bytes.len(), "Forwarding rendered plot");
                    self.outbound.emit(Envelope::system(
                        id.clone(),
                        Payload::PlotImage(PlotImage::new(bytes)),
                    ));
                }
                self.outbound.emit(Envelope::stage(id, Stage::Exit));
            }
            Err(error) => {
                warn!(%error, "Run failed");
                self.outbound
                    .emit(Envelope::system_error(id, ErrorReport::from_error(&error)));
            }
        }
    }
}

/// The stream endpoints handed to the interpreter for one run.
struct HostStreams {
    id: RequestId,
    outbound: Outbound,
    stdin_region: Option<Arc<SharedInputRegion>>,
}

impl InterpreterIo for HostStreams {
    fn stdout_batch(&self, batch: &str) {
        self.outbound
            .emit(Envelope::text_chunk(self.id.clone(), format!("{batch}\n")));
    }

    fn stderr_batch(&self, batch: &str) {
        self.outbound.emit(Envelope::application_error(
            self.id.clone(),
            ErrorReport::new(format!("{batch}\n")),
        ));
    }

    fn read_stdin(&self) -> Result<String, ExecutionError> {
        let region = self
            .stdin_region
            .as_deref()
            .ok_or(ExecutionError::InputBridgeMissing)?;
        region.begin_request()?;
        self.outbound
            .emit(Envelope::system(self.id.clone(), Payload::StdinRequest));
        // Blocks this context's thread until the user side submits.
        Ok(region.read_input()?)
    }
}

#[cfg(test)]
#[path = "unit_tests/interpreted.rs"]
mod tests;
