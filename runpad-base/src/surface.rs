// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A transferable rendering target for canvas-output programs.
//!
//! The surface is created on the user-interface side, which keeps the
//! [`FrameReceiver`] and hands the [`DrawingSurface`] itself over to exactly
//! one program executor. The surface is not [`Clone`]: passing
//! it along a channel is an ownership transfer, never a copy, so there can
//! only ever be one producer of frames.

use bytes::Bytes;
use std::fmt::{self, Debug, Formatter};
use tokio::sync::mpsc;

/// A frame of rendered pixels presented by a running program.
#[derive(Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

impl Debug for Frame {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter
            .debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixels", &self.pixels.len())
            .finish()
    }
}

/// A transferable rendering target owned by at most one consumer.
#[derive(Debug)]
pub struct DrawingSurface {
    width: u32,
    height: u32,
    frames: mpsc::UnboundedSender<Frame>,
}

impl DrawingSurface {
    /// Creates a surface, returning it together with the receiver end that
    /// stays behind on the user-interface side.
    pub fn new(width: u32, height: u32) -> (Self, FrameReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let surface = DrawingSurface {
            width,
            height,
            frames: sender,
        };
        (surface, FrameReceiver { inner: receiver })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Presents one frame of pixels to the user interface.
    ///
    /// Returns [`false`] when the receiving side is gone and the frame was
    /// dropped.
    pub fn present(&self, pixels: impl Into<Bytes>) -> bool {
        let frame = Frame {
            width: self.width,
            height: self.height,
            pixels: pixels.into(),
        };
        self.frames.send(frame).is_ok()
    }
}

/// The user-interface endpoint that receives presented frames.
#[derive(Debug)]
pub struct FrameReceiver {
    inner: mpsc::UnboundedReceiver<Frame>,
}

impl FrameReceiver {
    /// Receives the next presented frame, or [`None`] once the surface was
    /// dropped.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.inner.recv().await
    }

    /// Returns an already presented frame without waiting.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.inner.try_recv().ok()
    }
}

#[cfg(test)]
#[path = "unit_tests/surface.rs"]
mod tests;
