// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driving runtime contexts through the orchestrator.

use assert_matches::assert_matches;
use futures::future;
use runpad_base::{
    envelope::{Channel, Envelope, Payload, RequestId, RunRequest, Stage},
    language::{HostKey, Language},
    surface::DrawingSurface,
};
use runpad_core::{Orchestrator, OrchestratorError, RuntimeRegistry};
use runpad_execution::{
    host::HostHandle,
    test_utils::{MockInstantiatorFactory, MockInterpreterFactory, MockToolchainFactory},
};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A bounded wait long enough for a runaway host to have emitted something.
const QUIET_PERIOD: Duration = Duration::from_millis(300);

struct Playground {
    orchestrator: Orchestrator,
    interpreters: Arc<MockInterpreterFactory>,
    toolchains: Arc<MockToolchainFactory>,
}

fn playground() -> Playground {
    let interpreters = MockInterpreterFactory::new();
    let toolchains = MockToolchainFactory::new();
    let registry = RuntimeRegistry::new()
        .with_interpreter(HostKey::Python, interpreters.clone())
        .with_compiler(
            HostKey::Cpp,
            toolchains.clone(),
            MockInstantiatorFactory::new(),
        );
    Playground {
        orchestrator: Orchestrator::new(registry),
        interpreters,
        toolchains,
    }
}

async fn next_event(handle: &HostHandle) -> Envelope {
    timeout(EVENT_TIMEOUT, handle.next_event())
        .await
        .expect("Host did not emit an envelope in time")
        .expect("Host context ended unexpectedly")
}

/// Asserts that the host emits nothing for a bounded period.
async fn assert_quiet(handle: &HostHandle) {
    if let Ok(envelope) = timeout(QUIET_PERIOD, handle.next_event()).await {
        panic!("Expected no envelope, received {envelope:?}");
    }
}

fn run(id: &str, language: Language, code: &str) -> Envelope {
    Envelope::system(
        RequestId::new(id),
        Payload::Run(RunRequest::new(language, code)),
    )
}

/// Scenario A: an interpreted print streams one chunk between the `running`
/// and `exit` stages.
#[test_log::test(tokio::test)]
async fn scenario_a_interpreted_print() {
    let playground = playground();
    let handle = playground
        .orchestrator
        .get_runtime(Language::Python)
        .await
        .unwrap();

    handle
        .send(run("run-a", Language::Python, "print(\"hi\")"))
        .unwrap();

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));

    let chunk = next_event(&handle).await;
    assert_eq!(chunk.channel, Channel::Application);
    assert_eq!(chunk.id, RequestId::new("run-a"));
    assert_matches!(chunk.body, Ok(Payload::TextChunk(ref text)) if text == "hi\n");

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
}

/// Scenario B: a compiled hello-world passes through `compilation`,
/// `running`, its output chunk and `exit`, with the submitted compile
/// option in effect.
#[test_log::test(tokio::test)]
async fn scenario_b_compiled_hello_world() {
    let playground = playground();
    let handle = playground
        .orchestrator
        .get_runtime(Language::Cpp)
        .await
        .unwrap();

    let request =
        RunRequest::new(Language::Cpp, "printf(\"Hello World!\");").with_compile_option("-O0");
    handle
        .send(Envelope::system(
            RequestId::new("run-b"),
            Payload::Run(request),
        ))
        .unwrap();

    assert_eq!(
        next_event(&handle).await.as_stage(),
        Some(Stage::Compilation)
    );
    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));

    let chunk = next_event(&handle).await;
    assert_matches!(
        chunk.body,
        Ok(Payload::TextChunk(ref text)) if text.contains("Hello World!")
    );

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
    assert_eq!(playground.toolchains.recorded_options(), vec!["-O0"]);
}

/// Scenario C: a failed compilation produces one error envelope carrying
/// the captured stderr text, and neither `running` nor `exit` follows.
#[test_log::test(tokio::test)]
async fn scenario_c_compile_failure() {
    let playground = playground();
    let handle = playground
        .orchestrator
        .get_runtime(Language::Cpp)
        .await
        .unwrap();

    handle
        .send(run("run-c", Language::Cpp, "#error borked"))
        .unwrap();

    assert_eq!(
        next_event(&handle).await.as_stage(),
        Some(Stage::Compilation)
    );

    let error = next_event(&handle).await;
    assert_eq!(error.id, RequestId::new("run-c"));
    assert_matches!(
        error.body,
        Err(ref report) if report.message == "main.cpp:1: error: borked"
    );

    assert_quiet(&handle).await;
}

/// Scenario D: a program blocked on stdin stays blocked while no input is
/// submitted: the bridge never wakes spuriously.
#[test_log::test(tokio::test)]
async fn scenario_d_stdin_program_stays_blocked() {
    let playground = playground();
    let handle = playground
        .orchestrator
        .get_runtime(Language::Python)
        .await
        .unwrap();

    handle
        .send(run("run-d", Language::Python, "input()"))
        .unwrap();

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));
    assert_matches!(next_event(&handle).await.body, Ok(Payload::StdinRequest));

    // No `exit` (nor anything else) within a bounded wait.
    assert_quiet(&handle).await;

    // Destroying the runtime releases the blocked reader.
    playground.orchestrator.destroy_runtime(Language::Python);
    let ended = timeout(EVENT_TIMEOUT, handle.next_event())
        .await
        .expect("Destroyed host should close its event stream");
    assert!(ended.is_none());
}

/// Concurrent requests for one language create exactly one context, and
/// every caller resolves to the same handle.
#[test_log::test(tokio::test)]
async fn concurrent_requests_share_one_creation() {
    let playground = playground();

    let handles = future::join_all(
        (0..8).map(|_| playground.orchestrator.get_runtime(Language::Python)),
    )
    .await;

    let first = handles[0].as_ref().unwrap();
    for handle in &handles {
        assert!(Arc::ptr_eq(first, handle.as_ref().unwrap()));
    }
    assert_eq!(playground.interpreters.load_count(), 1);
}

/// `c` and `cpp` resolve to the same cached host context.
#[test_log::test(tokio::test)]
async fn c_and_cpp_share_one_context() {
    let playground = playground();

    let cpp = playground
        .orchestrator
        .get_runtime(Language::Cpp)
        .await
        .unwrap();
    let c = playground
        .orchestrator
        .get_runtime(Language::C)
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&cpp, &c));
    assert_eq!(playground.toolchains.load_count(), 1);
}

/// A second request never re-awaits creation: readiness is observed once
/// per context lifetime.
#[test_log::test(tokio::test)]
async fn repeated_requests_reuse_the_cached_context() {
    let playground = playground();

    let first = playground
        .orchestrator
        .get_runtime(Language::Python)
        .await
        .unwrap();
    let second = playground
        .orchestrator
        .get_runtime(Language::Python)
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(playground.interpreters.load_count(), 1);
}

/// A creation failure is surfaced to the caller and does not poison the
/// cache: the next request bootstraps a fresh context.
#[test_log::test(tokio::test)]
async fn failed_creation_is_retryable() {
    let interpreters = MockInterpreterFactory::failing(1);
    let registry =
        RuntimeRegistry::new().with_interpreter(HostKey::Python, interpreters.clone());
    let orchestrator = Orchestrator::new(registry);

    assert_matches!(
        orchestrator.get_runtime(Language::Python).await,
        Err(OrchestratorError::CreationFailed { ref message })
            if message.contains("failed to load")
    );

    let handle = orchestrator.get_runtime(Language::Python).await;
    assert!(handle.is_ok());
    assert_eq!(interpreters.load_count(), 2);
}

/// A full synchronous stdin round trip: request, blocked host, submitted
/// input, echoed output.
#[test_log::test(tokio::test)]
async fn stdin_round_trip_through_the_orchestrator() {
    let playground = playground();
    let handle = playground
        .orchestrator
        .get_runtime(Language::Python)
        .await
        .unwrap();

    handle
        .send(run("run-in", Language::Python, "print(input())"))
        .unwrap();

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));
    assert_matches!(next_event(&handle).await.body, Ok(Payload::StdinRequest));

    playground
        .orchestrator
        .submit_input(Language::Python, "bonjour")
        .unwrap();

    let chunk = next_event(&handle).await;
    assert_matches!(chunk.body, Ok(Payload::TextChunk(ref text)) if text == "bonjour\n");
    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
}

/// Input submitted while no request is outstanding is discarded silently.
#[test_log::test(tokio::test)]
async fn idle_input_submission_has_no_observer() {
    let playground = playground();
    let handle = playground
        .orchestrator
        .get_runtime(Language::Python)
        .await
        .unwrap();

    playground
        .orchestrator
        .submit_input(Language::Python, "unsolicited")
        .unwrap();

    assert_quiet(&handle).await;
}

/// Destroying a runtime drops the cached context; the next request creates
/// a fresh one.
#[test_log::test(tokio::test)]
async fn destroyed_runtimes_are_recreated_on_demand() {
    let playground = playground();

    let first = playground
        .orchestrator
        .get_runtime(Language::Python)
        .await
        .unwrap();
    playground.orchestrator.destroy_runtime(Language::Python);

    let second = playground
        .orchestrator
        .get_runtime(Language::Python)
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(playground.interpreters.load_count(), 2);
}

/// The drawing surface is transferred at most once per process, even
/// through the orchestrator.
#[test_log::test(tokio::test)]
async fn surface_is_installed_at_most_once() {
    let playground = playground();
    playground
        .orchestrator
        .get_runtime(Language::Cpp)
        .await
        .unwrap();

    let (first_surface, _frames) = DrawingSurface::new(640, 480);
    playground
        .orchestrator
        .install_surface(Language::Cpp, first_surface)
        .unwrap();

    let (second_surface, _other_frames) = DrawingSurface::new(640, 480);
    assert_matches!(
        playground
            .orchestrator
            .install_surface(Language::C, second_surface),
        Err(OrchestratorError::SurfaceAlreadyInstalled)
    );
}

/// A plotting run forwards its rendered image before the `exit` stage.
#[test_log::test(tokio::test)]
async fn rendered_plots_are_forwarded() {
    let playground = playground();
    let handle = playground
        .orchestrator
        .get_runtime(Language::Python)
        .await
        .unwrap();

    handle
        .send(run("run-plot", Language::Python, "plot()"))
        .unwrap();

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Running));

    let plot = next_event(&handle).await;
    assert!(plot.is_system());
    assert_matches!(plot.body, Ok(Payload::PlotImage(ref image)) if !image.is_empty());

    assert_eq!(next_event(&handle).await.as_stage(), Some(Stage::Exit));
}
