// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The closed set of supported languages and their runtime-host mapping.
//!
//! Every language key carries its own configuration: which host implements
//! it, whether running it involves a compile step, and what output modality
//! to expect besides plain text. The set is a closed enum so that every
//! dispatch on a language is checked exhaustively at compile time.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A supported source language, as selected in the editor.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Interpreted; may render a plot image.
    #[display("python")]
    Python,

    /// Compiled to a script/binary artifact pair; may draw on a canvas.
    #[display("cpp")]
    Cpp,

    /// Compiled; executes on the same host implementation as [`Language::Cpp`].
    #[display("c")]
    C,
}

/// The runtime-host implementations backing the supported languages.
///
/// Several languages may share one host: the host is what owns the isolated
/// execution context and its toolchain instance.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum HostKey {
    #[display("python")]
    Python,

    #[display("cpp")]
    Cpp,
}

/// The output modality a run may produce besides streamed text.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputKind {
    /// Streamed text only.
    Text,

    /// A rasterized image, rendered once per run.
    Image,

    /// A live drawing surface the program presents frames to.
    Canvas,
}

impl Language {
    /// All supported languages.
    pub const ALL: [Language; 3] = [Language::Python, Language::Cpp, Language::C];

    /// Returns the host implementation that executes this language.
    pub fn host(self) -> HostKey {
        match self {
            Language::Python => HostKey::Python,
            Language::Cpp | Language::C => HostKey::Cpp,
        }
    }

    /// Returns [`true`] if running this language involves a compile step.
    pub fn has_compile_step(self) -> bool {
        match self {
            Language::Python => false,
            Language::Cpp | Language::C => true,
        }
    }

    /// Returns the output modality to expect from a run of this language.
    pub fn output(self) -> OutputKind {
        match self {
            Language::Python => OutputKind::Image,
            Language::Cpp | Language::C => OutputKind::Canvas,
        }
    }

    /// Returns the compile option used when a run request carries none.
    ///
    /// Languages without a compile step have no default; any option supplied
    /// for them is ignored by their host.
    pub fn default_compile_option(self) -> Option<&'static str> {
        match self {
            Language::Python => None,
            Language::Cpp | Language::C => Some("-O2"),
        }
    }
}

/// Error when parsing an unsupported language key.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unsupported language key `{0}`")]
pub struct UnknownLanguage(String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "python" => Ok(Language::Python),
            "cpp" => Ok(Language::Cpp),
            "c" => Ok(Language::C),
            other => Err(UnknownLanguage(other.to_owned())),
        }
    }
}

#[cfg(test)]
#[path = "unit_tests/language.rs"]
mod tests;
