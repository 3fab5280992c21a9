// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The runtime host for compiled-native languages.
//!
//! The host owns the heavyweight, reusable compiler toolchain; the compiled
//! program itself runs in a separate [`ProgramExecutor`] context, driven
//! through a private envelope exchange with a strict two-phase artifact
//! handoff: the launcher script is transferred and acknowledged before the
//! binary, and execution starts only after both acknowledgments.

use super::{spawn_context, HostHandle, Outbound};
use crate::{
    executor::{ExecutorHandle, ProgramExecutor},
    toolchain::{CompilerToolchain, InstantiatorFactory, ToolchainFactory},
    ExecutionError,
};
use bytes::Bytes;
use runpad_base::{
    envelope::{ArtifactChunk, ArtifactKind, Envelope, ErrorReport, Payload, RequestId, RunRequest, Stage},
    language::HostKey,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// Virtual filesystem layout and entry naming used by the compile pipeline.
#[derive(Clone, Debug)]
pub struct PipelinePlan {
    /// Where the submitted source is written.
    pub source_path: String,

    /// Where the linker leaves the launcher script.
    pub script_path: String,

    /// Where the linker leaves the binary artifact.
    pub binary_path: String,

    /// The export invoked to start the program.
    pub entry_export: String,
}

impl Default for PipelinePlan {
    fn default() -> Self {
        PipelinePlan {
            source_path: "/working/main.cpp".to_owned(),
            script_path: "/working/main.js".to_owned(),
            binary_path: "/working/main.wasm".to_owned(),
            entry_export: "create_program".to_owned(),
        }
    }
}

/// A host owning one compiler toolchain and its private program executor.
pub struct CompilerHost {
    host: HostKey,
    toolchain: Box<dyn CompilerToolchain>,
    executor: ExecutorHandle,
    plan: PipelinePlan,
    requests: mpsc::UnboundedReceiver<Envelope>,
    outbound: Outbound,
    cancellation: CancellationToken,
}

impl CompilerHost {
    /// Spawns the host context, beginning toolchain bootstrap immediately.
    ///
    /// The program executor context is spawned alongside the host, before
    /// the readiness signal, so that a drawing surface transferred right
    /// after readiness always finds its consumer.
    pub fn spawn(
        host: HostKey,
        factory: Arc<dyn ToolchainFactory>,
        instantiator: Arc<dyn InstantiatorFactory>,
        plan: PipelinePlan,
    ) -> HostHandle {
        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let cancellation = CancellationToken::new();
        let outbound = Outbound::new(event_sender, cancellation.clone());

        let actor_cancellation = cancellation.clone();
        spawn_context(format!("{host}-host"), move || async move {
            let toolchain = match factory.load().await {
                Ok(toolchain) => toolchain,
                Err(error) => {
                    warn!(%host, %error, "Toolchain bootstrap failed");
                    outbound.emit(Envelope::system_error(
                        RequestId::lifecycle(),
                        ErrorReport::from_error(&error),
                    ));
                    return;
                }
            };
            let executor = ProgramExecutor::spawn(instantiator.create());

            outbound.emit(Envelope::system(
                RequestId::lifecycle(),
                Payload::Ready { host },
            ));

            let actor = CompilerHost {
                host,
                toolchain,
                executor,
                plan,
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
        trace!("Starting compiler host");

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

        self.executor.shut_down();
        trace!("Compiler host finished");
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope { id, body, .. } = envelope;
        let Ok(payload) = body else {
            trace!("Ignoring inbound error envelope");
            return;
        };

        match payload {
            Payload::Run(request) if request.language.host() == self.host => {
                if request.code.is_empty() {
                    trace!("Ignoring run request with empty source");
                } else {
                    self.run_source(id, request).await;
                }
            }
            Payload::SetCanvas(surface) => {
                // The surface's consumer is the executor; pass it through.
                if let Err(error) = self
                    .executor
                    .send(Envelope::system(id, Payload::SetCanvas(surface)))
                {
                    warn!(%error, "Failed to forward the drawing surface");
                }
            }
            Payload::StdinInit(_) => {
                // Compiled programs take no interactive stdin.
                trace!("Ignoring input region transfer on a compiler host");
            }
            _ => trace!("Ignoring unexpected envelope"),
        }
    }

    /// Drives one run request through the compile pipeline.
    ///
    /// Write source → compile → transfer artifacts → execute. Every failure
    /// short-circuits into an error envelope on the run's id; stage
    /// envelopes are only emitted for phases that were actually reached.
    async fn run_source(&mut self, id: RequestId, request: RunRequest) {
        if let Err(error) = self
            .toolchain
            .write_file(&self.plan.source_path, request.code.as_bytes())
            .await
        {
            warn!(%error, "Failed to write submitted source");
            self.outbound
                .emit(Envelope::system_error(id, ErrorReport::from_error(&error)));
            return;
        }

        self.outbound
            .emit(Envelope::stage(id.clone(), Stage::Compilation));

        let options = request.effective_compile_option().unwrap_or_default();
        debug!(options, "Compiling submitted source");
        let output = match self.toolchain.compile(&self.plan.source_path, options).await {
            Ok(output) => output,
            Err(error) => {
                warn!(%error, "Toolchain failed to run the compiler");
                self.outbound
                    .emit(Envelope::system_error(id, ErrorReport::from_error(&error)));
                return;
            }
        };

        if !output.succeeded() {
            debug!(returncode = output.returncode, "Compilation failed");
            self.outbound
                .emit(Envelope::system_error(id, ErrorReport::new(output.stderr)));
            return;
        }

        let script_path = self.plan.script_path.clone();
        let binary_path = self.plan.binary_path.clone();
        let script = match self.read_artifact(&script_path, &id).await {
            Some(bytes) => bytes,
            None => return,
        };
        let binary = match self.read_artifact(&binary_path, &id).await {
            Some(bytes) => bytes,
            None => return,
        };

        // Two-phase handoff: the binary is not sent before the script is
        // acknowledged, and execution does not start before both are.
        if let Err(error) = self.load_artifact(&id, ArtifactKind::Script, script).await {
            self.outbound
                .emit(Envelope::system_error(id, ErrorReport::from_error(&error)));
            return;
        }
        if let Err(error) = self.load_artifact(&id, ArtifactKind::Binary, binary).await {
            self.outbound
                .emit(Envelope::system_error(id, ErrorReport::from_error(&error)));
            return;
        }

        self.outbound.emit(Envelope::stage(id.clone(), Stage::Running));

        if let Err(error) = self.execute_and_relay(&id).await {
            warn!(%error, "Program execution failed");
            self.outbound.emit(Envelope::system_error(
                id.clone(),
                ErrorReport::from_error(&error),
            ));
            // Best effort, so the user interface leaves the running state.
            self.outbound.emit(Envelope::stage(id, Stage::Exit));
        }
    }

    async fn read_artifact(&mut self, path: &str, id: &RequestId) -> Option<Bytes> {
        match self.toolchain.read_file(path).await {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                warn!(path, %error, "Failed to read compile artifact");
                self.outbound.emit(Envelope::system_error(
                    id.clone(),
                    ErrorReport::from_error(&error),
                ));
                None
            }
        }
    }

    /// Transfers one artifact half and waits for its acknowledgment.
    async fn load_artifact(
        &mut self,
        id: &RequestId,
        kind: ArtifactKind,
        bytes: Bytes,
    ) -> Result<(), ExecutionError> {
        self.executor.send(Envelope::system(
            id.clone(),
            Payload::Load(ArtifactChunk { kind, bytes }),
        ))?;

        loop {
            let event = self
                .executor
                .next_event()
                .await
                .ok_or(ExecutionError::ExecutorUnavailable)?;
            match event.body {
                Ok(Payload::Loaded) => return Ok(()),
                Ok(_) => warn!("Unexpected executor envelope during artifact handoff"),
                Err(report) => return Err(ExecutionError::Instantiation(report.message)),
            }
        }
    }

    /// Starts the loaded program and relays its envelopes verbatim.
    ///
    /// The host is a pure relay here: it does not interpret program output,
    /// it only forwards the executor's envelopes upstream until the `exit`
    /// stage passes through.
    async fn execute_and_relay(&mut self, id: &RequestId) -> Result<(), ExecutionError> {
        self.executor.send(Envelope::system(
            id.clone(),
            Payload::Execute {
                entry: self.plan.entry_export.clone(),
            },
        ))?;

        loop {
            let event = self
                .executor
                .next_event()
                .await
                .ok_or(ExecutionError::ExecutorUnavailable)?;
            let is_exit = event.as_stage() == Some(Stage::Exit);
            self.outbound.emit(event);
            if is_exit {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
#[path = "unit_tests/compiled.rs"]
mod tests;
