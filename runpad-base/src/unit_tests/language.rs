// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{HostKey, Language, OutputKind, UnknownLanguage};
use assert_matches::assert_matches;

/// Test that C runs on the same host implementation as C++.
#[test]
fn c_shares_the_cpp_host() {
    assert_eq!(Language::C.host(), HostKey::Cpp);
    assert_eq!(Language::Cpp.host(), HostKey::Cpp);
    assert_eq!(Language::Python.host(), HostKey::Python);
}

#[test]
fn only_compiled_languages_have_a_compile_step() {
    assert!(!Language::Python.has_compile_step());
    assert!(Language::Cpp.has_compile_step());
    assert!(Language::C.has_compile_step());
}

#[test]
fn output_modalities() {
    assert_eq!(Language::Python.output(), OutputKind::Image);
    assert_eq!(Language::Cpp.output(), OutputKind::Canvas);
    assert_eq!(Language::C.output(), OutputKind::Canvas);
}

#[test]
fn compile_option_defaults() {
    assert_eq!(Language::Python.default_compile_option(), None);
    assert_eq!(Language::Cpp.default_compile_option(), Some("-O2"));
    assert_eq!(Language::C.default_compile_option(), Some("-O2"));
}

/// Test that every language key parses back from its display form.
#[test]
fn keys_round_trip_through_their_string_form() {
    for language in Language::ALL {
        let parsed = language.to_string().parse::<Language>();
        assert_eq!(parsed, Ok(language));
    }
}

#[test]
fn unsupported_keys_are_rejected() {
    assert_matches!("rust".parse::<Language>(), Err(UnknownLanguage(_)));
    assert_matches!("".parse::<Language>(), Err(UnknownLanguage(_)));
}

#[test]
fn wire_names_are_lowercase() {
    assert_eq!(serde_json::to_string(&Language::Python).unwrap(), "\"python\"");
    assert_eq!(serde_json::to_string(&Language::Cpp).unwrap(), "\"cpp\"");
    assert_eq!(serde_json::to_string(&Language::C).unwrap(), "\"c\"");
    assert_eq!(serde_json::to_string(&HostKey::Cpp).unwrap(), "\"cpp\"");
}
