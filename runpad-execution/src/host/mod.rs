// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Runtime hosts: one isolated execution context per host key.
//!
//! A host is spawned on a dedicated OS thread driving its own
//! single-threaded async runtime, so that the synchronous input bridge may
//! block the host without stalling any other context. All communication
//! with a host goes through the envelope channels of its [`HostHandle`].

mod compiled;
mod interpreted;

pub use self::{
    compiled::{CompilerHost, PipelinePlan},
    interpreted::InterpreterHost,
};

use crate::{
    toolchain::{InstantiatorFactory, InterpreterFactory, ToolchainFactory},
    ExecutionError,
};
use runpad_base::{envelope::Envelope, language::HostKey};
use std::{future::Future, sync::Arc, thread};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Everything needed to spawn the host implementing a host key.
#[derive(Clone)]
pub enum HostProvision {
    /// An interpreted-language host.
    Interpreted {
        interpreter: Arc<dyn InterpreterFactory>,
    },

    /// A compiled-language host with its private program executor.
    Compiled {
        toolchain: Arc<dyn ToolchainFactory>,
        instantiator: Arc<dyn InstantiatorFactory>,
        plan: PipelinePlan,
    },
}

/// Spawns the host context implementing `host`.
pub fn spawn_host(host: HostKey, provision: HostProvision) -> HostHandle {
    match provision {
        HostProvision::Interpreted { interpreter } => InterpreterHost::spawn(host, interpreter),
        HostProvision::Compiled {
            toolchain,
            instantiator,
            plan,
        } => CompilerHost::spawn(host, toolchain, instantiator, plan),
    }
}

/// The endpoint pair connecting a runtime host to the rest of the process.
///
/// Requests travel in through [`HostHandle::send`]; everything the host
/// emits (the readiness signal, stage transitions, output chunks, errors)
/// comes back in send order through [`HostHandle::next_event`].
#[derive(Debug)]
pub struct HostHandle {
    host: HostKey,
    requests: mpsc::UnboundedSender<Envelope>,
    events: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    cancellation: CancellationToken,
}

impl HostHandle {
    fn new(
        host: HostKey,
        requests: mpsc::UnboundedSender<Envelope>,
        events: mpsc::UnboundedReceiver<Envelope>,
        cancellation: CancellationToken,
    ) -> Self {
        HostHandle {
            host,
            requests,
            events: Mutex::new(events),
            cancellation,
        }
    }

    /// The host implementation this handle leads to.
    pub fn host(&self) -> HostKey {
        self.host
    }

    /// Posts an envelope to the host context.
    pub fn send(&self, envelope: Envelope) -> Result<(), ExecutionError> {
        if self.cancellation.is_cancelled() {
            return Err(ExecutionError::HostDestroyed);
        }
        self.requests
            .send(envelope)
            .map_err(|_| ExecutionError::HostDestroyed)
    }

    /// Receives the next envelope emitted by the host context, or [`None`]
    /// once the context is gone.
    pub async fn next_event(&self) -> Option<Envelope> {
        self.events.lock().await.recv().await
    }

    /// Returns [`true`] once the host was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Terminates the host context.
    ///
    /// Hard cancellation: in-flight requests receive no further envelopes,
    /// and whatever state they had is lost.
    pub fn destroy(&self) {
        self.cancellation.cancel();
    }
}

/// Emitting half of a context's channel pair.
///
/// Envelopes are dropped once the context is cancelled, so a destroyed
/// context emits nothing further.
#[derive(Clone)]
pub(crate) struct Outbound {
    sender: mpsc::UnboundedSender<Envelope>,
    cancellation: CancellationToken,
}

impl Outbound {
    pub(crate) fn new(
        sender: mpsc::UnboundedSender<Envelope>,
        cancellation: CancellationToken,
    ) -> Self {
        Outbound {
            sender,
            cancellation,
        }
    }

    /// Emits an envelope, unless the context was cancelled.
    pub(crate) fn emit(&self, envelope: Envelope) {
        if self.cancellation.is_cancelled() {
            tracing::trace!("Dropping envelope emitted after cancellation");
            return;
        }
        let _ = self.sender.send(envelope);
    }
}

/// Runs `actor` on a dedicated OS thread with its own single-threaded async
/// runtime.
///
/// If the thread cannot be spawned the actor is dropped, closing its
/// channels; creation then fails upstream instead of hanging.
pub(crate) fn spawn_context<Actor, ActorFuture>(name: String, actor: Actor)
where
    Actor: FnOnce() -> ActorFuture + Send + 'static,
    ActorFuture: Future<Output = ()>,
{
    let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("Failed to build a context runtime");
        runtime.block_on(actor());
    });

    if let Err(error) = spawned {
        tracing::error!(name, %error, "Failed to spawn a context thread");
    }
}
