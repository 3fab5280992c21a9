// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{CompilerHost, PipelinePlan};
use crate::{
    host::HostHandle,
    test_utils::{MockInstantiatorFactory, MockToolchainFactory},
};
use assert_matches::assert_matches;
use runpad_base::{
    envelope::{Channel, Envelope, Payload, RequestId, RunRequest, Stage},
    language::{HostKey, Language},
    surface::DrawingSurface,
};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn next_event(handle: &HostHandle) -> Envelope {
    timeout(EVENT_TIMEOUT, handle.next_event())
        .await
        .expect("Host did not emit an envelope in time")
        .expect("Host context ended unexpectedly")
}

async fn spawn_ready_host_with(
    toolchains: Arc<MockToolchainFactory>,
) -> (HostHandle, Arc<MockToolchainFactory>) {
    let handle = CompilerHost::spawn(
        HostKey::Cpp,
        toolchains.clone(),
        MockInstantiatorFactory::new(),
        PipelinePlan::default(),
    );

    let ready = next_event(&handle).await;
    assert_eq!(ready.as_ready(), Some(HostKey::Cpp));

    (handle, toolchains)
}

async fn spawn_ready_host() -> (HostHandle, Arc<MockToolchainFactory>) {
    spawn_ready_host_with(MockToolchainFactory::new()).await
}

fn run_envelope(id: &str, request: RunRequest) -> Envelope {
    Envelope::system(RequestId::new(id), Payload::Run(request))
}

async fn drain_until_exit(handle: &HostHandle) {
    while next_event(handle).await.as_stage() != Some(Stage::Exit) {}
}

#[test_log::test(tokio::test)]
async fn pipeline_emits_stages_in_order() {
    let (handle, toolchains) = spawn_ready_host().await;

    let request =
        RunRequest::new(Language::Cpp, "printf(\"Hello World!\");").with_compile_option("-O0");
    handle.send(run_envelope("run-1", request)).unwrap();

    assert_eq!(
        next_event(&handle).await.as_stage(),
        Some(Stage::Compilation)
    );
    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));

    let chunk = next_event(&handle).await;
    assert_eq!(chunk.channel, Channel::Application);
    assert_matches!(
        chunk.body,
        Ok(Payload::TextChunk(ref text)) if text.contains("Hello World!")
    );

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
    assert_eq!(toolchains.recorded_options(), vec!["-O0".to_owned()]);
}

#[test_log::test(tokio::test)]
async fn missing_compile_option_falls_back_to_the_language_default() {
    let (handle, toolchains) = spawn_ready_host().await;

    let request = RunRequest::new(Language::Cpp, "printf(\"x\")");
    handle.send(run_envelope("run-2", request)).unwrap();

    drain_until_exit(&handle).await;
    assert_eq!(toolchains.recorded_options(), vec!["-O2".to_owned()]);
}

/// Test that a failed compilation produces a single error envelope whose
/// message is the captured stderr text, with no `running` or `exit` stage.
#[test_log::test(tokio::test)]
async fn compile_failure_reports_the_captured_stderr() {
    let (handle, _toolchains) = spawn_ready_host().await;

    let request = RunRequest::new(Language::Cpp, "#error something went wrong");
    handle.send(run_envelope("run-3", request)).unwrap();

    assert_eq!(
        next_event(&handle).await.as_stage(),
        Some(Stage::Compilation)
    );
    let error = next_event(&handle).await;
    assert_eq!(error.id, RequestId::new("run-3"));
    assert_matches!(
        error.body,
        Err(ref report) if report.message == "main.cpp:1: error: something went wrong"
    );

    // The next envelope belongs to a fresh run: no `running` or `exit`
    // stage followed the compile failure.
    let request = RunRequest::new(Language::Cpp, "printf(\"ok\")");
    handle.send(run_envelope("run-4", request)).unwrap();
    let stage = next_event(&handle).await;
    assert_eq!(stage.id, RequestId::new("run-4"));
    assert_eq!(stage.as_stage(), Some(Stage::Compilation));
}

#[test_log::test(tokio::test)]
async fn write_failure_aborts_before_any_stage() {
    let (handle, _toolchains) =
        spawn_ready_host_with(MockToolchainFactory::with_failing_writes()).await;

    let request = RunRequest::new(Language::Cpp, "printf(\"x\")");
    handle.send(run_envelope("run-5", request)).unwrap();

    let error = next_event(&handle).await;
    assert_eq!(error.id, RequestId::new("run-5"));
    assert_matches!(
        error.body,
        Err(ref report) if report.message.contains("virtual filesystem write")
    );
}

#[test_log::test(tokio::test)]
async fn program_fault_is_reported_with_a_best_effort_exit() {
    let (handle, _toolchains) = spawn_ready_host().await;

    let request = RunRequest::new(Language::Cpp, "trap!");
    handle.send(run_envelope("run-6", request)).unwrap();

    assert_eq!(
        next_event(&handle).await.as_stage(),
        Some(Stage::Compilation)
    );
    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));

    let error = next_event(&handle).await;
    assert_eq!(error.channel, Channel::Application);
    assert_matches!(
        error.body,
        Err(ref report) if report.message.contains("mock program trapped")
    );

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
}

/// Test that a transferred surface reaches the running program through the
/// executor.
#[test_log::test(tokio::test)]
async fn surface_handoff_reaches_the_program() {
    let (handle, _toolchains) = spawn_ready_host().await;
    let (surface, mut frames) = DrawingSurface::new(32, 32);

    handle
        .send(Envelope::system(
            RequestId::lifecycle(),
            Payload::SetCanvas(surface),
        ))
        .unwrap();

    let request = RunRequest::new(Language::Cpp, "draw();");
    handle.send(run_envelope("run-7", request)).unwrap();

    drain_until_exit(&handle).await;

    let frame = frames.try_next_frame().expect("Program presented a frame");
    assert_eq!(frame.width, 32);
}

#[test_log::test(tokio::test)]
async fn c_runs_on_the_cpp_host() {
    let (handle, _toolchains) = spawn_ready_host().await;

    let request = RunRequest::new(Language::C, "printf(\"from c\")");
    handle.send(run_envelope("run-8", request)).unwrap();

    assert_eq!(
        next_event(&handle).await.as_stage(),
        Some(Stage::Compilation)
    );
}
