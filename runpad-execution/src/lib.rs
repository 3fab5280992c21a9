// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Runtime hosts and the program executor of the runpad playground.
//!
//! Each supported language is implemented by a *runtime host*: an isolated
//! execution context owning one toolchain instance, reachable only through
//! envelope channels. Interpreted languages run directly inside their host;
//! compiled languages drive a second, disposable context, the *program
//! executor*, through a private envelope exchange, so that a crashing or
//! hanging user program cannot corrupt the reusable compiler state.
//!
//! The toolchains themselves are opaque collaborators behind the seams in
//! [`toolchain`]; an optional [`wasmtime`]-backed instantiator is provided
//! behind the `wasmtime` feature.

pub mod executor;
pub mod host;
#[cfg(feature = "test")]
pub mod test_utils;
pub mod toolchain;
#[cfg(feature = "wasmtime")]
pub mod wasmtime;

use runpad_base::input_bridge::InputBridgeError;
use thiserror::Error;

/// Errors raised while driving a toolchain or executing a program.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Toolchain bootstrap failed while the host context was initializing.
    #[error("toolchain failed to initialize: {0}")]
    Bootstrap(String),

    /// The toolchain itself failed, outside of a reported compile error.
    #[error("toolchain failure: {0}")]
    Toolchain(String),

    /// A write into the toolchain's virtual filesystem failed.
    #[error("virtual filesystem write to `{path}` failed: {reason}")]
    FilesystemWrite { path: String, reason: String },

    /// An expected compile artifact could not be read back.
    #[error("compile artifact `{path}` is missing: {reason}")]
    MissingArtifact { path: String, reason: String },

    /// The compiled artifacts could not be instantiated into a program.
    #[error("program instantiation failed: {0}")]
    Instantiation(String),

    /// The program started but aborted abnormally.
    #[error("program fault: {0}")]
    ProgramFault(String),

    /// The interpreter reported a failure while running the source.
    #[error("{0}")]
    Interpreter(String),

    /// A program asked for input before the input region was transferred.
    #[error("no input region is installed for this host")]
    InputBridgeMissing,

    /// The input bridge failed or was torn down.
    #[error(transparent)]
    InputBridge(#[from] InputBridgeError),

    /// The host context was destroyed.
    #[error("host context was destroyed")]
    HostDestroyed,

    /// The program executor context is gone.
    #[error("program executor is not available")]
    ExecutorUnavailable,
}
