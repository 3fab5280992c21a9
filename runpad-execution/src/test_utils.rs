// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mock toolchains for exercising hosts without a real language runtime.
//!
//! The mocks speak a tiny line-based source language, just enough to drive
//! every path of the hosts and the executor:
//!
//! - interpreted sources understand `print("…")`, `print(input())`,
//!   `input()`, `warn("…")`, `plot()` and `fail("…")`;
//! - compiled sources understand `printf("…")`, `draw()` and `trap!`, plus
//!   a `#error …` line to make the mock compiler fail with that line as its
//!   captured stderr.

use crate::{
    toolchain::{
        CompilationOutput, CompilerToolchain, Instantiator, InstantiatorFactory, Interpreter,
        InterpreterFactory, InterpreterIo, ProgramIo, ToolchainFactory,
    },
    ExecutionError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// The bytes the mock interpreter "renders" when a source calls `plot()`.
pub const FAKE_PLOT: &[u8] = b"\x89PNG\r\n\x1a\nmock-plot";

/// Extracts the string literal argument of `function("…")` calls.
fn string_argument<'line>(line: &'line str, function: &str) -> Option<&'line str> {
    line.strip_prefix(function)?
        .strip_prefix("(\"")?
        .strip_suffix("\")")
}

/// A scripted interpreter understanding the line-based test language.
#[derive(Default)]
pub struct MockInterpreter {
    rendered_plot: Option<Bytes>,
}

#[async_trait]
impl Interpreter for MockInterpreter {
    async fn run(&mut self, source: &str, io: &dyn InterpreterIo) -> Result<(), ExecutionError> {
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "print(input())" {
                let input = io.read_stdin()?;
                io.stdout_batch(&input);
            } else if line == "input()" {
                io.read_stdin()?;
            } else if line == "plot()" {
                self.rendered_plot = Some(Bytes::from_static(FAKE_PLOT));
            } else if let Some(text) = string_argument(line, "print") {
                io.stdout_batch(text);
            } else if let Some(text) = string_argument(line, "warn") {
                io.stderr_batch(text);
            } else if let Some(message) = string_argument(line, "fail") {
                return Err(ExecutionError::Interpreter(message.to_owned()));
            } else {
                return Err(ExecutionError::Interpreter(format!(
                    "SyntaxError: invalid statement `{line}`"
                )));
            }
        }
        Ok(())
    }

    fn take_rendered_plot(&mut self) -> Option<Bytes> {
        self.rendered_plot.take()
    }
}

/// Factory for [`MockInterpreter`]s, tracking bootstrap attempts.
#[derive(Default)]
pub struct MockInterpreterFactory {
    loads: AtomicUsize,
    failures: AtomicUsize,
}

impl MockInterpreterFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(MockInterpreterFactory::default())
    }

    /// A factory whose first `times` bootstrap attempts fail.
    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(MockInterpreterFactory {
            loads: AtomicUsize::new(0),
            failures: AtomicUsize::new(times),
        })
    }

    /// How many bootstrap attempts were made so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InterpreterFactory for MockInterpreterFactory {
    async fn load(&self) -> Result<Box<dyn Interpreter>, ExecutionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ExecutionError::Bootstrap(
                "mock interpreter failed to load".to_owned(),
            ));
        }
        Ok(Box::new(MockInterpreter::default()))
    }
}

/// A compiler toolchain with an in-memory virtual filesystem.
///
/// "Compiling" a source produces a launcher script recording the options it
/// was invoked with, and a "binary" that is simply the source text, which
/// the [`MockInstantiator`] then interprets.
pub struct MockToolchain {
    files: HashMap<String, Bytes>,
    recorded_options: Arc<Mutex<Vec<String>>>,
    fail_writes: bool,
}

#[async_trait]
impl CompilerToolchain for MockToolchain {
    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), ExecutionError> {
        if self.fail_writes {
            return Err(ExecutionError::FilesystemWrite {
                path: path.to_owned(),
                reason: "mock filesystem is read-only".to_owned(),
            });
        }
        self.files
            .insert(path.to_owned(), Bytes::copy_from_slice(contents));
        Ok(())
    }

    async fn read_file(&mut self, path: &str) -> Result<Bytes, ExecutionError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ExecutionError::MissingArtifact {
                path: path.to_owned(),
                reason: "no such file".to_owned(),
            })
    }

    async fn compile(
        &mut self,
        path: &str,
        options: &str,
    ) -> Result<CompilationOutput, ExecutionError> {
        self.recorded_options
            .lock()
            .expect("Failed to lock recorded options")
            .push(options.to_owned());

        let source = self.read_file(path).await?;
        let source = std::str::from_utf8(&source)
            .map_err(|_| ExecutionError::Toolchain("source is not valid UTF-8".to_owned()))?
            .to_owned();

        if let Some(directive) = source
            .lines()
            .find_map(|line| line.trim().strip_prefix("#error "))
        {
            return Ok(CompilationOutput {
                returncode: 1,
                stdout: String::new(),
                stderr: format!("main.cpp:1: error: {directive}"),
            });
        }

        let script_path = replace_extension(path, "js");
        let binary_path = replace_extension(path, "wasm");
        self.write_file(&script_path, format!("launcher {options}").as_bytes())
            .await?;
        self.write_file(&binary_path, source.as_bytes()).await?;

        Ok(CompilationOutput {
            returncode: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

fn replace_extension(path: &str, extension: &str) -> String {
    match path.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.{extension}"),
        None => format!("{path}.{extension}"),
    }
}

/// Factory for [`MockToolchain`]s, tracking bootstrap attempts and the
/// compile options every instance was invoked with.
#[derive(Default)]
pub struct MockToolchainFactory {
    loads: AtomicUsize,
    failures: AtomicUsize,
    fail_writes: bool,
    recorded_options: Arc<Mutex<Vec<String>>>,
}

impl MockToolchainFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(MockToolchainFactory::default())
    }

    /// A factory whose first `times` bootstrap attempts fail.
    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(MockToolchainFactory {
            failures: AtomicUsize::new(times),
            ..MockToolchainFactory::default()
        })
    }

    /// A factory producing toolchains whose filesystem rejects writes.
    pub fn with_failing_writes() -> Arc<Self> {
        Arc::new(MockToolchainFactory {
            fail_writes: true,
            ..MockToolchainFactory::default()
        })
    }

    /// How many bootstrap attempts were made so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// The option strings passed to every compile invocation so far.
    pub fn recorded_options(&self) -> Vec<String> {
        self.recorded_options
            .lock()
            .expect("Failed to lock recorded options")
            .clone()
    }
}

#[async_trait]
impl ToolchainFactory for MockToolchainFactory {
    async fn load(&self) -> Result<Box<dyn CompilerToolchain>, ExecutionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ExecutionError::Bootstrap(
                "mock toolchain failed to load".to_owned(),
            ));
        }
        Ok(Box::new(MockToolchain {
            files: HashMap::new(),
            recorded_options: self.recorded_options.clone(),
            fail_writes: self.fail_writes,
        }))
    }
}

/// Runs mock "binaries": the source text produced by [`MockToolchain`].
pub struct MockInstantiator;

impl Instantiator for MockInstantiator {
    fn execute(
        &mut self,
        script: &[u8],
        binary: &[u8],
        entry: &str,
        io: &dyn ProgramIo,
    ) -> Result<(), ExecutionError> {
        tracing::trace!(entry, "Executing mock program");
        if script.is_empty() {
            return Err(ExecutionError::Instantiation(
                "missing launcher script".to_owned(),
            ));
        }
        let source = std::str::from_utf8(binary).map_err(|_| {
            ExecutionError::Instantiation("binary artifact is not mock source".to_owned())
        })?;

        for line in source.lines() {
            let line = line.trim().trim_end_matches(';');
            if line == "trap!" {
                return Err(ExecutionError::ProgramFault(
                    "mock program trapped".to_owned(),
                ));
            } else if line == "draw()" {
                if let Some(surface) = io.surface() {
                    surface.present(Bytes::from_static(&[0, 0, 0, 0]));
                }
            } else if let Some(text) = string_argument(line, "printf") {
                io.print(text);
            } else if let Some(text) = string_argument(line, "eprintf") {
                io.print_err(text);
            }
        }
        Ok(())
    }
}

/// Factory handing out [`MockInstantiator`]s.
#[derive(Default)]
pub struct MockInstantiatorFactory;

impl MockInstantiatorFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(MockInstantiatorFactory)
    }
}

impl InstantiatorFactory for MockInstantiatorFactory {
    fn create(&self) -> Box<dyn Instantiator> {
        Box::new(MockInstantiator)
    }
}
