// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The orchestration layer of the runpad playground.
//!
//! One [`Orchestrator`] is constructed at process start from a
//! [`RuntimeRegistry`] of toolchain factories and threaded through the user
//! interface. It creates runtime contexts lazily per host key, caches them
//! for reuse, deduplicates concurrent creation requests, owns every input
//! bridge, and performs the one-time drawing-surface handoff. It is torn
//! down once, at process shutdown.

pub mod orchestrator;

pub use self::orchestrator::{Orchestrator, OrchestratorError, RuntimeRegistry};
