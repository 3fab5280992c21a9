// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::InterpreterHost;
use crate::{host::HostHandle, test_utils::MockInterpreterFactory};
use assert_matches::assert_matches;
use runpad_base::{
    envelope::{Channel, Envelope, Payload, RequestId, RunRequest, Stage},
    input_bridge::SharedInputRegion,
    language::{HostKey, Language},
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

async fn spawn_ready_host() -> (HostHandle, Arc<MockInterpreterFactory>) {
    let factory = MockInterpreterFactory::new();
    let handle = InterpreterHost::spawn(HostKey::Python, factory.clone());

    let ready = next_event(&handle).await;
    assert_eq!(ready.as_ready(), Some(HostKey::Python));
    assert!(ready.id.is_lifecycle());

    (handle, factory)
}

fn run_envelope(id: &str, code: &str) -> Envelope {
    Envelope::system(
        RequestId::new(id),
        Payload::Run(RunRequest::new(Language::Python, code)),
    )
}

#[test_log::test(tokio::test)]
async fn emits_ready_then_runs_source() {
    let (handle, _factory) = spawn_ready_host().await;

    handle.send(run_envelope("run-1", "print(\"hi\")")).unwrap();

    let stage = next_event(&handle).await;
    assert_eq!(stage.as_stage(), Some(Stage::Running));
    assert_eq!(stage.id, RequestId::new("run-1"));

    let chunk = next_event(&handle).await;
    assert_eq!(chunk.channel, Channel::Application);
    assert_matches!(chunk.body, Ok(Payload::TextChunk(ref text)) if text == "hi\n");

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
}

#[test_log::test(tokio::test)]
async fn bootstrap_failure_is_reported_and_ends_the_context() {
    let factory = MockInterpreterFactory::failing(1);
    let handle = InterpreterHost::spawn(HostKey::Python, factory);

    let failure = next_event(&handle).await;
    assert!(failure.id.is_lifecycle());
    assert_matches!(
        failure.body,
        Err(ref report) if report.message.contains("failed to load")
    );

    let ended = timeout(EVENT_TIMEOUT, handle.next_event())
        .await
        .expect("Host context should end after a bootstrap failure");
    assert!(ended.is_none());
}

#[test_log::test(tokio::test)]
async fn runs_for_other_hosts_are_ignored() {
    let (handle, _factory) = spawn_ready_host().await;

    handle
        .send(Envelope::system(
            RequestId::new("run-cpp"),
            Payload::Run(RunRequest::new(Language::Cpp, "printf(\"nope\")")),
        ))
        .unwrap();
    handle.send(run_envelope("run-2", "print(\"ok\")")).unwrap();

    // The first envelope to come back belongs to the python run.
    let stage = next_event(&handle).await;
    assert_eq!(stage.id, RequestId::new("run-2"));
    assert_eq!(stage.as_stage(), Some(Stage::Running));
}

#[test_log::test(tokio::test)]
async fn empty_source_is_ignored() {
    let (handle, _factory) = spawn_ready_host().await;

    handle.send(run_envelope("run-empty", "")).unwrap();
    handle.send(run_envelope("run-3", "print(\"ok\")")).unwrap();

    let stage = next_event(&handle).await;
    assert_eq!(stage.id, RequestId::new("run-3"));
}

#[test_log::test(tokio::test)]
async fn stderr_batches_become_application_error_envelopes() {
    let (handle, _factory) = spawn_ready_host().await;

    handle.send(run_envelope("run-4", "warn(\"bad\")")).unwrap();

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));

    let error = next_event(&handle).await;
    assert_eq!(error.channel, Channel::Application);
    assert_matches!(error.body, Err(ref report) if report.message == "bad\n");

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
}

/// Test that an interpreter failure produces an error envelope and no
/// `exit` stage.
#[test_log::test(tokio::test)]
async fn interpreter_failure_emits_error_without_exit() {
    let (handle, _factory) = spawn_ready_host().await;

    handle
        .send(run_envelope("run-5", "fail(\"ValueError: nope\")"))
        .unwrap();

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));

    let error = next_event(&handle).await;
    assert_eq!(error.id, RequestId::new("run-5"));
    assert_matches!(error.body, Err(ref report) if report.message == "ValueError: nope");

    // The next envelope belongs to a fresh run, proving no `exit` followed.
    handle.send(run_envelope("run-6", "print(\"ok\")")).unwrap();
    let stage = next_event(&handle).await;
    assert_eq!(stage.id, RequestId::new("run-6"));
    assert_eq!(stage.as_stage(), Some(Stage::Running));
}

#[test_log::test(tokio::test)]
async fn stdin_without_a_region_reports_an_error() {
    let (handle, _factory) = spawn_ready_host().await;

    handle.send(run_envelope("run-7", "print(input())")).unwrap();

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));
    let error = next_event(&handle).await;
    assert_matches!(
        error.body,
        Err(ref report) if report.message.contains("no input region")
    );
}

#[test_log::test(tokio::test)]
async fn stdin_round_trip_through_the_input_region() {
    let (handle, _factory) = spawn_ready_host().await;
    let region = Arc::new(SharedInputRegion::new());

    handle
        .send(Envelope::system(
            RequestId::lifecycle(),
            Payload::StdinInit(region.clone()),
        ))
        .unwrap();
    handle.send(run_envelope("run-8", "print(input())")).unwrap();

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));

    let request = next_event(&handle).await;
    assert_matches!(request.body, Ok(Payload::StdinRequest));
    assert_eq!(request.id, RequestId::new("run-8"));

    assert!(region.submit("hello"));

    let chunk = next_event(&handle).await;
    assert_matches!(chunk.body, Ok(Payload::TextChunk(ref text)) if text == "hello\n");
    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
    assert_eq!(region.control_value(), 0);
}

/// Test that a rendered plot is forwarded once and the buffer resets.
#[test_log::test(tokio::test)]
async fn plot_is_forwarded_once_per_run() {
    let (handle, _factory) = spawn_ready_host().await;

    handle.send(run_envelope("run-9", "plot()")).unwrap();

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));
    let plot = next_event(&handle).await;
    assert_matches!(plot.body, Ok(Payload::PlotImage(ref image)) if !image.is_empty());
    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));

    // A run that does not plot forwards no image.
    handle.send(run_envelope("run-10", "print(\"x\")")).unwrap();
    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));
    let chunk = next_event(&handle).await;
    assert_matches!(chunk.body, Ok(Payload::TextChunk(_)));
    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
}

#[test_log::test(tokio::test)]
async fn compile_options_are_ignored_without_a_compile_step() {
    let (handle, _factory) = spawn_ready_host().await;

    let request = RunRequest::new(Language::Python, "print(\"hi\")").with_compile_option("-O3");
    handle
        .send(Envelope::system(
            RequestId::new("run-11"),
            Payload::Run(request),
        ))
        .unwrap();

    // The first stage is `running`: no compilation happens.
    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));
}

#[test_log::test(tokio::test)]
async fn destroying_the_host_closes_the_event_stream() {
    let (handle, _factory) = spawn_ready_host().await;

    handle.destroy();

    assert!(handle.is_destroyed());
    assert_matches!(
        handle.send(run_envelope("run-12", "print(\"late\")")),
        Err(crate::ExecutionError::HostDestroyed)
    );
    let ended = timeout(EVENT_TIMEOUT, handle.next_event())
        .await
        .expect("Host context should end after being destroyed");
    assert!(ended.is_none());
}
