// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{
    ArtifactKind, Channel, Envelope, ErrorReport, Payload, PlotImage, RequestId, RunRequest, Stage,
};
use crate::language::{HostKey, Language};
use assert_matches::assert_matches;

#[test]
fn system_envelopes_carry_a_payload_and_no_error() {
    let envelope = Envelope::system(
        RequestId::lifecycle(),
        Payload::Ready {
            host: HostKey::Python,
        },
    );

    assert!(envelope.is_system());
    assert!(envelope.error().is_none());
    assert_eq!(envelope.as_ready(), Some(HostKey::Python));
}

#[test]
fn error_envelopes_carry_a_report_and_no_payload() {
    let envelope = Envelope::system_error(RequestId::new("run-1"), ErrorReport::new("boom"));

    assert_matches!(envelope.body, Err(ref report) if report.message == "boom");
    assert_eq!(envelope.as_ready(), None);
    assert_eq!(envelope.as_stage(), None);
}

#[test]
fn stage_envelopes_classify_as_stages() {
    let envelope = Envelope::stage(RequestId::new("run-1"), Stage::Compilation);

    assert!(envelope.is_system());
    assert_eq!(envelope.as_stage(), Some(Stage::Compilation));
}

#[test]
fn text_chunks_travel_on_the_application_channel() {
    let envelope = Envelope::text_chunk(RequestId::new("run-1"), "hi\n");

    assert_eq!(envelope.channel, Channel::Application);
    assert_matches!(envelope.body, Ok(Payload::TextChunk(ref chunk)) if chunk == "hi\n");
}

#[test]
fn lifecycle_id_is_empty() {
    assert!(RequestId::lifecycle().is_lifecycle());
    assert!(!RequestId::new("run-1").is_lifecycle());
    assert_eq!(RequestId::new("run-1").as_str(), "run-1");
}

#[test]
fn effective_compile_option_falls_back_to_the_language_default() {
    let request = RunRequest::new(Language::Cpp, "int main() {}");
    assert_eq!(request.effective_compile_option(), Some("-O2"));

    let request = request.with_compile_option("-O0");
    assert_eq!(request.effective_compile_option(), Some("-O0"));

    let request = RunRequest::new(Language::Python, "print()");
    assert_eq!(request.effective_compile_option(), None);
}

#[test]
fn wire_names_match_the_protocol() {
    assert_eq!(serde_json::to_string(&Stage::Compilation).unwrap(), "\"compilation\"");
    assert_eq!(serde_json::to_string(&Stage::Running).unwrap(), "\"running\"");
    assert_eq!(serde_json::to_string(&Stage::Exit).unwrap(), "\"exit\"");
    assert_eq!(serde_json::to_string(&ArtifactKind::Script).unwrap(), "\"js\"");
    assert_eq!(serde_json::to_string(&ArtifactKind::Binary).unwrap(), "\"wasm\"");
    assert_eq!(serde_json::to_string(&Channel::System).unwrap(), "\"system\"");
    assert_eq!(
        serde_json::to_string(&Channel::Application).unwrap(),
        "\"application\""
    );
}

/// Test that debug-formatting a plot image elides the raw bytes.
#[test]
fn plot_images_debug_as_their_length() {
    let image = PlotImage::new(vec![0_u8; 128]);
    assert_eq!(format!("{image:?}"), "PlotImage(128)");
    assert_eq!(image.len(), 128);
    assert!(!image.is_empty());
}
