// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The shared-memory handshake that gives a running program synchronous
//! stdin across an asynchronous messaging boundary.
//!
//! A program inside an isolated execution context may need to block on user
//! input even though the only user-facing channel into that context is
//! asynchronous message passing. The [`SharedInputRegion`] is the one place
//! where true blocking happens: the host side parks its whole thread on the
//! region until the user-facing side submits a line of input.
//!
//! The region is a fixed-capacity buffer: one control slot plus
//! [`INPUT_CAPACITY`] payload bytes. The control slot holds `0` while the
//! bridge is idle and the payload byte length once an input is available.
//! Waiting and waking follow atomic wait/notify semantics, rendered with a
//! [`Mutex`] and a [`Condvar`]; [`WaitStatus`] mirrors the wait statuses.
//!
//! At most one input request may be outstanding per region. The host side
//! marks the request with [`SharedInputRegion::begin_request`] *before*
//! announcing it upstream, so a submission can never race ahead of the
//! blocked reader and corrupt the slot.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{Condvar, Mutex},
};
use thiserror::Error;

/// Number of payload bytes the region can carry per input.
///
/// Longer submissions are truncated at a character boundary.
pub const INPUT_CAPACITY: usize = 1024;

/// Outcome of a blocking wait on the control slot.
///
/// Mirrors the statuses of an atomic wait. [`WaitStatus::TimedOut`] is never
/// produced: no timeout is configured and waits are unbounded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitStatus {
    /// The control slot changed and an input is available.
    Ok,

    /// The control slot did not hold the expected value when the wait
    /// started, without an input having been delivered.
    NotEqual,

    /// Unused; waits are unbounded.
    TimedOut,
}

/// Errors raised by the input bridge.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InputBridgeError {
    /// The control slot was changed by something other than a proper input
    /// delivery.
    #[error("control slot holds {found} while a reader expected {expected}")]
    Violation { expected: u32, found: u32 },

    /// An input request was started while another one is still outstanding.
    #[error("an input request is already outstanding on this region")]
    AlreadyOutstanding,

    /// The region was closed, waking any blocked reader.
    #[error("input region was closed while waiting for input")]
    Closed,

    /// The payload bytes do not decode as UTF-8.
    #[error("input payload is not valid UTF-8")]
    MalformedPayload,
}

/// The fixed-capacity shared memory region behind the input bridge.
///
/// Exclusively owned by one (orchestrator, runtime host) pair: the
/// orchestrator submits, the host blocks and reads.
pub struct SharedInputRegion {
    state: Mutex<RegionState>,
    readers: Condvar,
}

struct RegionState {
    /// `0` while idle, the payload byte length once an input is available.
    control: u32,
    payload: [u8; INPUT_CAPACITY],
    /// A reader announced a request and has not consumed an input yet.
    outstanding: bool,
    /// An input was written and not yet consumed. This is the wake-up edge,
    /// so that an empty input (zero payload bytes) still wakes the reader.
    delivered: bool,
    closed: bool,
}

impl Default for SharedInputRegion {
    fn default() -> Self {
        SharedInputRegion {
            state: Mutex::new(RegionState {
                control: 0,
                payload: [0; INPUT_CAPACITY],
                outstanding: false,
                delivered: false,
                closed: false,
            }),
            readers: Condvar::new(),
        }
    }
}

impl SharedInputRegion {
    /// Creates an idle region.
    pub fn new() -> Self {
        SharedInputRegion::default()
    }

    /// Marks the start of an input request.
    ///
    /// Must be called before the request is announced upstream, so that a
    /// prompt submission finds the region accepting input even if the reader
    /// has not started blocking yet.
    pub fn begin_request(&self) -> Result<(), InputBridgeError> {
        let mut state = self.lock();
        if state.closed {
            return Err(InputBridgeError::Closed);
        }
        if state.outstanding {
            return Err(InputBridgeError::AlreadyOutstanding);
        }
        state.outstanding = true;
        Ok(())
    }

    /// Blocks the calling thread until an input is delivered or the region
    /// is closed.
    ///
    /// `expected` is compared against the control slot on entry, mirroring
    /// an atomic wait: finding any other value without a pending delivery
    /// reports [`WaitStatus::NotEqual`].
    pub fn wait(&self, expected: u32) -> Result<WaitStatus, InputBridgeError> {
        let mut state = self.lock();
        if state.closed {
            return Err(InputBridgeError::Closed);
        }
        if !state.delivered && state.control != expected {
            return Ok(WaitStatus::NotEqual);
        }
        while !state.delivered && !state.closed {
            state = self
                .readers
                .wait(state)
                .expect("Failed to lock `SharedInputRegion` mutex after notification");
        }
        if state.closed {
            return Err(InputBridgeError::Closed);
        }
        Ok(WaitStatus::Ok)
    }

    /// Takes the delivered input out of the region, marking it idle again.
    pub fn take_input(&self) -> Result<String, InputBridgeError> {
        let mut state = self.lock();
        let length = state.control as usize;
        let text = std::str::from_utf8(&state.payload[..length])
            .map_err(|_| InputBridgeError::MalformedPayload)?
            .to_owned();
        state.control = 0;
        state.delivered = false;
        state.outstanding = false;
        Ok(text)
    }

    /// Blocks until one line of input is available and returns it.
    ///
    /// The control slot is expected to be idle (`0`) on entry; any other
    /// value is a protocol violation. Afterwards the slot is reset to `0`.
    pub fn read_input(&self) -> Result<String, InputBridgeError> {
        match self.wait(0)? {
            WaitStatus::Ok => self.take_input(),
            WaitStatus::NotEqual => Err(InputBridgeError::Violation {
                expected: 0,
                found: self.control_value(),
            }),
            WaitStatus::TimedOut => unreachable!("waits on the input region are unbounded"),
        }
    }

    /// Writes `text` into the region and wakes the blocked reader.
    ///
    /// The text is truncated to [`INPUT_CAPACITY`] bytes at a character
    /// boundary. Returns [`false`] when the input was discarded because no
    /// request is outstanding (or a previous delivery was not consumed yet);
    /// such submissions are benign and have no observer.
    pub fn submit(&self, text: &str) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        if !state.outstanding || state.delivered {
            tracing::debug!("Discarding input submitted while the bridge is idle");
            return false;
        }
        let bytes = truncate_to_char_boundary(text, INPUT_CAPACITY).as_bytes();
        state.payload[..bytes.len()].copy_from_slice(bytes);
        state.control = bytes.len() as u32;
        state.delivered = true;
        self.readers.notify_all();
        true
    }

    /// Closes the region, waking any blocked reader with
    /// [`InputBridgeError::Closed`]. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.readers.notify_all();
    }

    /// Returns [`true`] once the region was closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// The current value of the control slot.
    pub fn control_value(&self) -> u32 {
        self.lock().control
    }

    /// Returns [`true`] while no input is delivered or outstanding.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.control == 0 && !state.delivered && !state.outstanding
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegionState> {
        self.state
            .lock()
            .expect("Failed to lock `SharedInputRegion` mutex")
    }
}

impl Debug for SharedInputRegion {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter
            .debug_struct("SharedInputRegion")
            .finish_non_exhaustive()
    }
}

/// Truncates `text` to at most `max_bytes` bytes without splitting a
/// multi-byte character.
pub fn truncate_to_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
#[path = "unit_tests/input_bridge.rs"]
mod tests;
