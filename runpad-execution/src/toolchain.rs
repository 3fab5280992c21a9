// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Seams for the opaque language toolchains driven by the runtime hosts.
//!
//! The toolchains are external collaborators: an interpreter consumes source
//! text and produces output streams, a compiler toolchain owns a virtual
//! filesystem and turns a source file into a script/binary artifact pair,
//! and an instantiator turns that pair into a running program. How any of
//! them work internally is outside this crate; the traits here only describe
//! how a host supplies their input and collects their output.

use crate::ExecutionError;
use async_trait::async_trait;
use bytes::Bytes;
use runpad_base::surface::DrawingSurface;
use serde::{Deserialize, Serialize};

/// Stream endpoints for a running interpreted program.
///
/// Handed to the interpreter for the duration of one run. `read_stdin`
/// blocks the calling thread until the user side submits a line, which is
/// why interpreters always run inside a dedicated context thread.
pub trait InterpreterIo: Send + Sync {
    /// Forwards one flushed batch of standard output.
    fn stdout_batch(&self, batch: &str);

    /// Forwards one flushed batch of standard error output.
    fn stderr_batch(&self, batch: &str);

    /// Blocks until one line of user input is available.
    fn read_stdin(&self) -> Result<String, ExecutionError>;
}

/// An interpreted-language runtime, such as a Python interpreter.
#[async_trait]
pub trait Interpreter: Send {
    /// Runs `source` to completion, routing its streams through `io`.
    async fn run(&mut self, source: &str, io: &dyn InterpreterIo) -> Result<(), ExecutionError>;

    /// Takes the plot rendered by the last run, if any, resetting the
    /// interpreter's plot buffer.
    fn take_rendered_plot(&mut self) -> Option<Bytes>;
}

/// Bootstraps an [`Interpreter`] inside its host context.
#[async_trait]
pub trait InterpreterFactory: Send + Sync + 'static {
    async fn load(&self) -> Result<Box<dyn Interpreter>, ExecutionError>;
}

/// What a compiler invocation reported back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompilationOutput {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CompilationOutput {
    /// Returns [`true`] if the invocation exited successfully.
    pub fn succeeded(&self) -> bool {
        self.returncode == 0
    }
}

/// A compiled-language toolchain together with its virtual filesystem.
///
/// The filesystem is private to the owning host and never mutated by two
/// runs concurrently.
#[async_trait]
pub trait CompilerToolchain: Send {
    /// Writes `contents` at `path` in the toolchain's virtual filesystem.
    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), ExecutionError>;

    /// Reads the file at `path` back from the virtual filesystem.
    async fn read_file(&mut self, path: &str) -> Result<Bytes, ExecutionError>;

    /// Invokes the compiler/linker on the source at `path` with the given
    /// option string.
    ///
    /// A compile error is not an [`Err`]: it comes back as a
    /// [`CompilationOutput`] with a non-zero return code and the diagnostics
    /// in `stderr`. [`Err`] is reserved for the toolchain itself failing.
    async fn compile(&mut self, path: &str, options: &str)
        -> Result<CompilationOutput, ExecutionError>;
}

/// Bootstraps a [`CompilerToolchain`] inside its host context.
#[async_trait]
pub trait ToolchainFactory: Send + Sync + 'static {
    async fn load(&self) -> Result<Box<dyn CompilerToolchain>, ExecutionError>;
}

/// Host-side endpoints a running compiled program interacts with.
pub trait ProgramIo: Send + Sync {
    /// Forwards one line of program output, without its trailing newline.
    fn print(&self, line: &str);

    /// Forwards one line of program error output, without its trailing
    /// newline.
    fn print_err(&self, line: &str);

    /// The drawing surface, when one has been transferred to the executor.
    fn surface(&self) -> Option<&DrawingSurface>;
}

/// Instantiates compiled artifacts into running programs.
///
/// Implementations know the import/export surface the launcher script
/// expects; the artifacts themselves stay opaque to the executor.
pub trait Instantiator: Send + 'static {
    /// Instantiates `binary` against `script`'s import surface and runs the
    /// `entry` export to completion, routing program output through `io`.
    fn execute(
        &mut self,
        script: &[u8],
        binary: &[u8],
        entry: &str,
        io: &dyn ProgramIo,
    ) -> Result<(), ExecutionError>;
}

/// Creates the [`Instantiator`] moved into a program executor context.
pub trait InstantiatorFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn Instantiator>;
}
