// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The wire format shared by every channel in the system.
//!
//! All parties (the user interface, the orchestrator, the runtime hosts and
//! the program executors) exchange [`Envelope`]s. An envelope correlates a
//! message with the request it belongs to, says which [`Channel`] it travels
//! on, and carries exactly one of a [`Payload`] or an [`ErrorReport`].
//!
//! A run request may produce many envelopes over its lifetime: stage
//! transitions, zero or more output chunks, a rendered plot, and a final
//! exit stage, all tagged with the run's [`RequestId`].

use crate::{
    input_bridge::SharedInputRegion,
    language::{HostKey, Language},
    surface::DrawingSurface,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};
use thiserror::Error;

/// Correlates a request with all of the response envelopes it produces.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a request id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        RequestId(id.into())
    }

    /// The empty id used by lifecycle envelopes that belong to no request,
    /// such as readiness signals and one-time resource handoffs.
    pub fn lifecycle() -> Self {
        RequestId::default()
    }

    /// Returns [`true`] if this is the lifecycle id.
    pub fn is_lifecycle(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Which channel an envelope belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Orchestration and lifecycle signals.
    System,

    /// User-program output.
    Application,
}

/// Lifecycle stage of an in-flight run, reported while it progresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Compilation,
    Running,
    Exit,
}

/// A request to execute a piece of source code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRequest {
    /// The submitted source text.
    pub code: String,

    /// The language the source is written in.
    pub language: Language,

    /// Compile option supplied by the user, if any.
    ///
    /// Ignored by languages without a compile step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_option: Option<String>,
}

impl RunRequest {
    /// Creates a run request without an explicit compile option.
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        RunRequest {
            code: code.into(),
            language,
            compile_option: None,
        }
    }

    /// Sets the compile option to use for this run.
    pub fn with_compile_option(mut self, option: impl Into<String>) -> Self {
        self.compile_option = Some(option.into());
        self
    }

    /// The option string the compiler is effectively invoked with: the
    /// supplied option, or the language's default.
    pub fn effective_compile_option(&self) -> Option<&str> {
        self.compile_option
            .as_deref()
            .or_else(|| self.language.default_compile_option())
    }
}

/// The two halves of a compile artifact, transferred in this order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// The linked launcher script.
    #[serde(rename = "js")]
    Script,

    /// The compiled binary blob.
    #[serde(rename = "wasm")]
    Binary,
}

/// One half of a compile artifact on its way to a program executor.
///
/// The bytes are reference counted, so moving a chunk between contexts never
/// duplicates the artifact.
#[derive(Clone)]
pub struct ArtifactChunk {
    pub kind: ArtifactKind,
    pub bytes: Bytes,
}

impl Debug for ArtifactChunk {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter
            .debug_struct("ArtifactChunk")
            .field("kind", &self.kind)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// A rendered plot, as raw encoded image bytes.
#[derive(Clone)]
pub struct PlotImage(Bytes);

impl PlotImage {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        PlotImage(bytes.into())
    }

    /// The encoded image bytes, shared without copying.
    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for PlotImage {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter
            .debug_tuple("PlotImage")
            .field(&self.0.len())
            .finish()
    }
}

/// Every kind of message that travels in an envelope.
///
/// The set is closed: each channel endpoint matches on the variants it
/// understands and ignores the rest.
#[derive(Debug)]
pub enum Payload {
    /// One-time readiness signal, emitted by a runtime host after its
    /// toolchain finished initializing.
    Ready {
        host: HostKey,
    },

    /// A request to run source code.
    Run(RunRequest),

    /// A lifecycle stage of an in-flight run.
    Stage(Stage),

    /// A chunk of textual program output, flushed as the program produces it.
    TextChunk(String),

    /// A rendered plot image produced by an interpreted run.
    PlotImage(PlotImage),

    /// The runtime host asks for one line of user input and blocks until
    /// the input bridge delivers it.
    StdinRequest,

    /// One-time transfer of the shared input region to a runtime host.
    StdinInit(Arc<SharedInputRegion>),

    /// One-time ownership transfer of the drawing surface.
    SetCanvas(DrawingSurface),

    /// Transfer of one compile-artifact half to a program executor.
    Load(ArtifactChunk),

    /// Acknowledges that the previously transferred artifact half is loaded.
    Loaded,

    /// Starts the loaded program by invoking the named entry export.
    Execute {
        entry: String,
    },
}

/// An error conveyed through an envelope, flattened to its display message.
#[derive(Clone, Debug, Eq, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ErrorReport {
    pub message: String,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorReport {
            message: message.into(),
        }
    }

    /// Flattens an error into a report, keeping only its display message.
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        ErrorReport {
            message: error.to_string(),
        }
    }
}

/// A message and the request it belongs to, as sent on every channel.
#[derive(Debug)]
pub struct Envelope {
    /// The request this envelope responds to, or the lifecycle id.
    pub id: RequestId,

    /// The channel the envelope travels on.
    pub channel: Channel,

    /// Exactly one of a payload or an error, never both.
    pub body: Result<Payload, ErrorReport>,
}

impl Envelope {
    /// Creates a system envelope carrying `payload`.
    pub fn system(id: RequestId, payload: Payload) -> Self {
        Envelope {
            id,
            channel: Channel::System,
            body: Ok(payload),
        }
    }

    /// Creates an application envelope carrying `payload`.
    pub fn application(id: RequestId, payload: Payload) -> Self {
        Envelope {
            id,
            channel: Channel::Application,
            body: Ok(payload),
        }
    }

    /// Creates a system envelope carrying an error report.
    pub fn system_error(id: RequestId, report: ErrorReport) -> Self {
        Envelope {
            id,
            channel: Channel::System,
            body: Err(report),
        }
    }

    /// Creates an application envelope carrying an error report.
    pub fn application_error(id: RequestId, report: ErrorReport) -> Self {
        Envelope {
            id,
            channel: Channel::Application,
            body: Err(report),
        }
    }

    /// Creates the system envelope reporting a stage transition.
    pub fn stage(id: RequestId, stage: Stage) -> Self {
        Envelope::system(id, Payload::Stage(stage))
    }

    /// Creates the application envelope carrying one chunk of output text.
    pub fn text_chunk(id: RequestId, chunk: impl Into<String>) -> Self {
        Envelope::application(id, Payload::TextChunk(chunk.into()))
    }

    /// Returns the host key if this envelope is a readiness signal.
    pub fn as_ready(&self) -> Option<HostKey> {
        match &self.body {
            Ok(Payload::Ready { host }) => Some(*host),
            _ => None,
        }
    }

    /// Returns the stage if this envelope reports a stage transition.
    pub fn as_stage(&self) -> Option<Stage> {
        match &self.body {
            Ok(Payload::Stage(stage)) => Some(*stage),
            _ => None,
        }
    }

    /// Returns the error report if this envelope carries one.
    pub fn error(&self) -> Option<&ErrorReport> {
        self.body.as_ref().err()
    }

    /// Returns [`true`] if this envelope travels on the system channel.
    pub fn is_system(&self) -> bool {
        self.channel == Channel::System
    }

    /// Returns [`true`] if this envelope travels on the application channel.
    pub fn is_application(&self) -> bool {
        self.channel == Channel::Application
    }
}

#[cfg(test)]
#[path = "unit_tests/envelope.rs"]
mod tests;
