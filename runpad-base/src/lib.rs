// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Base definitions shared by the runpad execution stack.
//!
//! This crate holds the leaves of the system: the [`envelope`] wire format
//! used on every channel, the [`language`] keys that select a runtime host,
//! the [`input_bridge`] shared-memory handshake that gives a running program
//! synchronous stdin, and the transferable drawing [`surface`].

pub mod envelope;
pub mod input_bridge;
pub mod language;
pub mod surface;
