// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A [`wasmtime`]-backed instantiator for compiled program artifacts.
//!
//! The launcher script's import surface is fixed: the guest module may
//! import `env.print_line`, `env.print_error` and `env.present_frame`, each
//! taking a pointer/length pair into its linear memory, and must export the
//! entry function named in the `execute` envelope together with a linear
//! memory called `memory`.

use crate::{
    toolchain::{Instantiator, ProgramIo},
    ExecutionError,
};
use bytes::Bytes;
use std::{sync::mpsc, thread};
use wasmtime::{Caller, Engine, Linker, Module, Store};

/// Executes binary artifacts with the `wasmtime` runtime.
pub struct WasmtimeInstantiator {
    engine: Engine,
}

impl WasmtimeInstantiator {
    pub fn new() -> Self {
        WasmtimeInstantiator {
            engine: Engine::default(),
        }
    }
}

impl Default for WasmtimeInstantiator {
    fn default() -> Self {
        WasmtimeInstantiator::new()
    }
}

/// One output event produced by the running guest.
enum SinkEvent {
    Line(String),
    ErrorLine(String),
    Frame(Bytes),
}

/// Per-store state: where the guest's output events go.
struct StoreData {
    events: mpsc::Sender<SinkEvent>,
}

impl Instantiator for WasmtimeInstantiator {
    fn execute(
        &mut self,
        script: &[u8],
        binary: &[u8],
        entry: &str,
        io: &dyn ProgramIo,
    ) -> Result<(), ExecutionError> {
        // The launcher script only pins the import surface described above;
        // it must at least be readable.
        std::str::from_utf8(script).map_err(|_| {
            ExecutionError::Instantiation("launcher script is not valid UTF-8".to_owned())
        })?;

        let module = Module::new(&self.engine, binary)
            .map_err(|error| ExecutionError::Instantiation(error.to_string()))?;

        let mut linker = Linker::new(&self.engine);
        add_host_imports(&mut linker)
            .map_err(|error| ExecutionError::Instantiation(error.to_string()))?;

        // The guest call is synchronous, so output is relayed to `io` from a
        // scoped thread while the program runs, keeping it streamed rather
        // than buffered.
        thread::scope(|scope| {
            let (events, sink) = mpsc::channel();
            scope.spawn(move || {
                while let Ok(event) = sink.recv() {
                    match event {
                        SinkEvent::Line(line) => io.print(&line),
                        SinkEvent::ErrorLine(line) => io.print_err(&line),
                        SinkEvent::Frame(pixels) => {
                            if let Some(surface) = io.surface() {
                                surface.present(pixels);
                            }
                        }
                    }
                }
            });

            let mut store = Store::new(&self.engine, StoreData { events });
            let instance = linker
                .instantiate(&mut store, &module)
                .map_err(|error| ExecutionError::Instantiation(error.to_string()))?;
            let entry_function = instance
                .get_typed_func::<(), ()>(&mut store, entry)
                .map_err(|error| {
                    ExecutionError::Instantiation(format!("missing entry export `{entry}`: {error}"))
                })?;

            entry_function
                .call(&mut store, ())
                .map_err(|error| ExecutionError::ProgramFault(error.to_string()))
            // Dropping the store here closes the event stream, which lets
            // the relay thread finish before the scope joins it.
        })
    }
}

fn add_host_imports(linker: &mut Linker<StoreData>) -> wasmtime::Result<()> {
    linker.func_wrap(
        "env",
        "print_line",
        |caller: Caller<'_, StoreData>, pointer: u32, length: u32| {
            forward_text(caller, pointer, length, SinkEvent::Line)
        },
    )?;
    linker.func_wrap(
        "env",
        "print_error",
        |caller: Caller<'_, StoreData>, pointer: u32, length: u32| {
            forward_text(caller, pointer, length, SinkEvent::ErrorLine)
        },
    )?;
    linker.func_wrap(
        "env",
        "present_frame",
        |mut caller: Caller<'_, StoreData>, pointer: u32, length: u32| {
            let pixels = read_guest_bytes(&mut caller, pointer, length)?;
            let _ = caller.data().events.send(SinkEvent::Frame(pixels.into()));
            Ok(())
        },
    )?;
    Ok(())
}

fn forward_text(
    mut caller: Caller<'_, StoreData>,
    pointer: u32,
    length: u32,
    event: impl FnOnce(String) -> SinkEvent,
) -> wasmtime::Result<()> {
    let bytes = read_guest_bytes(&mut caller, pointer, length)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let _ = caller.data().events.send(event(text));
    Ok(())
}

fn read_guest_bytes(
    caller: &mut Caller<'_, StoreData>,
    pointer: u32,
    length: u32,
) -> wasmtime::Result<Vec<u8>> {
    let memory = caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| wasmtime::Error::msg("guest has no exported linear memory"))?;
    let mut bytes = vec![0; length as usize];
    memory.read(&mut *caller, pointer as usize, &mut bytes)?;
    Ok(bytes)
}
