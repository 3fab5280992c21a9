// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The manager of runtime contexts.
//!
//! Runtime hosts are expensive: each owns a full toolchain inside its own
//! context. The orchestrator creates them lazily on first request, caches
//! them per host key, and lets concurrent requests for the same key attach
//! to one shared creation, so a burst of requests never spawns a duplicate
//! context. A creation failure leaves the cache empty, so retrying creates
//! a fresh context rather than reusing a poisoned entry.

use dashmap::{mapref::entry::Entry, DashMap};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use runpad_base::{
    envelope::{Envelope, Payload, RequestId},
    input_bridge::SharedInputRegion,
    language::{HostKey, Language, OutputKind},
    surface::DrawingSurface,
};
use runpad_execution::{
    host::{spawn_host, HostHandle, HostProvision, PipelinePlan},
    toolchain::{InstantiatorFactory, InterpreterFactory, ToolchainFactory},
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tracing::{debug, info, instrument, trace};

/// Errors surfaced by the orchestrator.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum OrchestratorError {
    /// The host context failed while initializing. The cache is left empty,
    /// so retrying creates a fresh context.
    #[error("runtime creation failed: {message}")]
    CreationFailed { message: String },

    /// No toolchain factory was registered for the requested host.
    #[error("no toolchain is registered for host `{0}`")]
    UnregisteredHost(HostKey),

    /// No runtime context exists for the language.
    #[error("no runtime context exists for `{0}`")]
    NoRuntime(Language),

    /// The runtime context exists but has not become ready yet.
    #[error("the runtime for `{0}` is still initializing")]
    RuntimeNotReady(Language),

    /// The runtime context was destroyed while it was being created.
    #[error("the runtime context was destroyed while being created")]
    Destroyed,

    /// The drawing surface was already transferred in this process.
    #[error("the drawing surface has already been transferred")]
    SurfaceAlreadyInstalled,

    /// The language renders no drawing surface.
    #[error("`{0}` does not render to a drawing surface")]
    NotCanvasLanguage(Language),

    /// The runtime context rejected an envelope.
    #[error("the runtime context rejected the transfer: {message}")]
    HostUnreachable { message: String },
}

/// The per-host toolchain factories injected into an [`Orchestrator`].
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    provisions: HashMap<HostKey, HostProvision>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        RuntimeRegistry::default()
    }

    /// Registers an interpreted-language host.
    pub fn with_interpreter(
        mut self,
        host: HostKey,
        interpreter: Arc<dyn InterpreterFactory>,
    ) -> Self {
        self.provisions
            .insert(host, HostProvision::Interpreted { interpreter });
        self
    }

    /// Registers a compiled-language host with the default pipeline layout.
    pub fn with_compiler(
        mut self,
        host: HostKey,
        toolchain: Arc<dyn ToolchainFactory>,
        instantiator: Arc<dyn InstantiatorFactory>,
    ) -> Self {
        self.provisions.insert(
            host,
            HostProvision::Compiled {
                toolchain,
                instantiator,
                plan: PipelinePlan::default(),
            },
        );
        self
    }

    fn provision(&self, host: HostKey) -> Option<HostProvision> {
        self.provisions.get(&host).cloned()
    }
}

/// A runtime context that finished creation.
#[derive(Clone)]
struct ActiveRuntime {
    handle: Arc<HostHandle>,
    bridge: Arc<SharedInputRegion>,
}

type CreationFuture = Shared<BoxFuture<'static, Result<ActiveRuntime, OrchestratorError>>>;

/// Cache slot for one host key: either a creation in flight that waiters
/// attach to, or the finished runtime.
///
/// The epoch identifies one particular creation attempt, so that waiters
/// finishing late can tell whether the slot still belongs to them or was
/// destroyed and re-created underneath them.
enum RuntimeSlot {
    Creating { future: CreationFuture, epoch: u64 },
    Active(ActiveRuntime),
}

/// The manager owning every runtime context in the process.
///
/// Constructed once at startup and shared by all user-interface components;
/// [`Orchestrator::shutdown`] tears every context down at process exit.
pub struct Orchestrator {
    registry: RuntimeRegistry,
    runtimes: DashMap<HostKey, RuntimeSlot>,
    creation_epoch: AtomicU64,
    surface_installed: AtomicBool,
}

impl Orchestrator {
    pub fn new(registry: RuntimeRegistry) -> Self {
        Orchestrator {
            registry,
            runtimes: DashMap::new(),
            creation_epoch: AtomicU64::new(0),
            surface_installed: AtomicBool::new(false),
        }
    }

    /// Returns the runtime handle for `language`, creating its host context
    /// on first request.
    ///
    /// Concurrent calls for the same host key attach to one shared creation
    /// and all resolve to the same handle. The handle is only exposed after
    /// the host's readiness signal was observed and its input bridge was
    /// transferred.
    #[instrument(skip(self))]
    pub async fn get_runtime(
        &self,
        language: Language,
    ) -> Result<Arc<HostHandle>, OrchestratorError> {
        let host = language.host();

        let (creation, epoch) = match self.runtimes.entry(host) {
            Entry::Occupied(entry) => match entry.get() {
                RuntimeSlot::Active(active) => return Ok(active.handle.clone()),
                RuntimeSlot::Creating { future, epoch } => (future.clone(), *epoch),
            },
            Entry::Vacant(entry) => {
                let provision = self
                    .registry
                    .provision(host)
                    .ok_or(OrchestratorError::UnregisteredHost(host))?;
                debug!(%host, "Creating a new runtime context");
                let future = Self::create_runtime(host, provision).boxed().shared();
                let epoch = self.creation_epoch.fetch_add(1, Ordering::SeqCst);
                entry.insert(RuntimeSlot::Creating {
                    future: future.clone(),
                    epoch,
                });
                (future, epoch)
            }
        };
        // The map guard is dropped by now: the await below runs unlocked,
        // with every concurrent caller attached to the same shared future.

        match creation.await {
            Ok(active) => self.finish_creation(host, epoch, active),
            Err(error) => {
                self.abandon_creation(host, epoch);
                Err(error)
            }
        }
    }

    /// Spawns the host context and waits for it to become usable.
    async fn create_runtime(
        host: HostKey,
        provision: HostProvision,
    ) -> Result<ActiveRuntime, OrchestratorError> {
        let handle = spawn_host(host, provision);

        // Await the readiness signal: the first envelope reporting `ready`.
        loop {
            match handle.next_event().await {
                Some(envelope) => {
                    if envelope.as_ready().is_some() {
                        break;
                    }
                    if let Err(report) = envelope.body {
                        handle.destroy();
                        return Err(OrchestratorError::CreationFailed {
                            message: report.message,
                        });
                    }
                    trace!("Ignoring envelope emitted before readiness");
                }
                None => {
                    return Err(OrchestratorError::CreationFailed {
                        message: "host context ended before becoming ready".to_owned(),
                    });
                }
            }
        }

        // Allocate this host's input bridge and transfer it, once.
        let bridge = Arc::new(SharedInputRegion::new());
        handle
            .send(Envelope::system(
                RequestId::lifecycle(),
                Payload::StdinInit(bridge.clone()),
            ))
            .map_err(|error| OrchestratorError::CreationFailed {
                message: error.to_string(),
            })?;

        info!(%host, "Runtime context ready");
        Ok(ActiveRuntime {
            handle: Arc::new(handle),
            bridge,
        })
    }

    /// Records a finished creation in the cache, unless the slot changed
    /// underneath the waiters.
    fn finish_creation(
        &self,
        host: HostKey,
        epoch: u64,
        active: ActiveRuntime,
    ) -> Result<Arc<HostHandle>, OrchestratorError> {
        match self.runtimes.entry(host) {
            Entry::Occupied(mut entry) => match entry.get() {
                RuntimeSlot::Creating {
                    epoch: pending_epoch,
                    ..
                } if *pending_epoch == epoch => {
                    let handle = active.handle.clone();
                    entry.insert(RuntimeSlot::Active(active));
                    Ok(handle)
                }
                RuntimeSlot::Active(existing) => Ok(existing.handle.clone()),
                RuntimeSlot::Creating { .. } => {
                    Self::tear_down(&active);
                    Err(OrchestratorError::Destroyed)
                }
            },
            Entry::Vacant(_) => {
                // Destroyed while being created: hard cancellation.
                Self::tear_down(&active);
                Err(OrchestratorError::Destroyed)
            }
        }
    }

    /// Drops a failed creation from the cache, so a retry starts fresh.
    fn abandon_creation(&self, host: HostKey, epoch: u64) {
        if let Entry::Occupied(entry) = self.runtimes.entry(host) {
            let matches_epoch = matches!(
                entry.get(),
                RuntimeSlot::Creating { epoch: pending_epoch, .. } if *pending_epoch == epoch
            );
            if matches_epoch {
                entry.remove();
            }
        }
    }

    /// Writes one line of user input into the language's input bridge and
    /// wakes the blocked reader.
    ///
    /// Submitting while no input request is outstanding is a benign no-op:
    /// the input is discarded and nothing observes it.
    pub fn submit_input(&self, language: Language, text: &str) -> Result<(), OrchestratorError> {
        let host = language.host();
        let slot = self
            .runtimes
            .get(&host)
            .ok_or(OrchestratorError::NoRuntime(language))?;
        match slot.value() {
            RuntimeSlot::Active(active) => {
                if !active.bridge.submit(text) {
                    debug!(%language, "Discarded input: no request is outstanding");
                }
                Ok(())
            }
            RuntimeSlot::Creating { .. } => Err(OrchestratorError::RuntimeNotReady(language)),
        }
    }

    /// Terminates the language's runtime context and drops all cached state
    /// for its host key. Safe to call when no context exists.
    ///
    /// Hard cancellation: the input bridge is closed (waking any blocked
    /// reader with an error) and in-flight requests receive no further
    /// envelopes.
    #[instrument(skip(self))]
    pub fn destroy_runtime(&self, language: Language) {
        let host = language.host();
        if let Some((_, slot)) = self.runtimes.remove(&host) {
            match slot {
                RuntimeSlot::Active(active) => {
                    debug!(%host, "Destroying runtime context");
                    Self::tear_down(&active);
                }
                RuntimeSlot::Creating { .. } => {
                    debug!(%host, "Dropping in-flight runtime creation");
                }
            }
        }
    }

    /// Transfers ownership of the drawing surface to the language's program
    /// executor.
    ///
    /// Happens at most once per process, no matter how many times languages
    /// are switched or hosts are recreated.
    pub fn install_surface(
        &self,
        language: Language,
        surface: DrawingSurface,
    ) -> Result<(), OrchestratorError> {
        if language.output() != OutputKind::Canvas {
            return Err(OrchestratorError::NotCanvasLanguage(language));
        }

        let handle = {
            let slot = self
                .runtimes
                .get(&language.host())
                .ok_or(OrchestratorError::NoRuntime(language))?;
            match slot.value() {
                RuntimeSlot::Active(active) => active.handle.clone(),
                RuntimeSlot::Creating { .. } => {
                    return Err(OrchestratorError::RuntimeNotReady(language))
                }
            }
        };

        if self
            .surface_installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestratorError::SurfaceAlreadyInstalled);
        }

        let transfer = handle.send(Envelope::system(
            RequestId::lifecycle(),
            Payload::SetCanvas(surface),
        ));
        if let Err(error) = transfer {
            self.surface_installed.store(false, Ordering::SeqCst);
            return Err(OrchestratorError::HostUnreachable {
                message: error.to_string(),
            });
        }
        Ok(())
    }

    /// Tears down every runtime context. Called once at process shutdown.
    pub fn shutdown(&self) {
        let hosts: Vec<HostKey> = self.runtimes.iter().map(|entry| *entry.key()).collect();
        for host in hosts {
            if let Some((_, RuntimeSlot::Active(active))) = self.runtimes.remove(&host) {
                Self::tear_down(&active);
            }
        }
    }

    fn tear_down(active: &ActiveRuntime) {
        active.bridge.close();
        active.handle.destroy();
    }
}

#[cfg(test)]
#[path = "unit_tests/orchestrator.rs"]
mod tests;
