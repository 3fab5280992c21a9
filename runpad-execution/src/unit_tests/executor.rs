// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{ExecutorHandle, ProgramExecutor};
use crate::test_utils::MockInstantiator;
use assert_matches::assert_matches;
use bytes::Bytes;
use runpad_base::{
    envelope::{ArtifactChunk, ArtifactKind, Channel, Envelope, Payload, RequestId, Stage},
    surface::DrawingSurface,
};
use std::time::Duration;
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn spawn_executor() -> ExecutorHandle {
    ProgramExecutor::spawn(Box::new(MockInstantiator))
}

async fn next_event(handle: &mut ExecutorHandle) -> Envelope {
    timeout(EVENT_TIMEOUT, handle.next_event())
        .await
        .expect("Executor did not emit an envelope in time")
        .expect("Executor context ended unexpectedly")
}

fn load(id: &str, kind: ArtifactKind, bytes: &'static [u8]) -> Envelope {
    Envelope::system(
        RequestId::new(id),
        Payload::Load(ArtifactChunk {
            kind,
            bytes: Bytes::from_static(bytes),
        }),
    )
}

fn execute(id: &str) -> Envelope {
    Envelope::system(
        RequestId::new(id),
        Payload::Execute {
            entry: "create_program".to_owned(),
        },
    )
}

async fn handoff(handle: &mut ExecutorHandle, id: &str, program: &'static [u8]) {
    handle
        .send(load(id, ArtifactKind::Script, b"launcher"))
        .unwrap();
    assert_matches!(next_event(handle).await.body, Ok(Payload::Loaded));

    handle.send(load(id, ArtifactKind::Binary, program)).unwrap();
    assert_matches!(next_event(handle).await.body, Ok(Payload::Loaded));
}

/// Test the strict two-phase handoff: each artifact half is acknowledged,
/// and execution only runs once both are loaded.
#[test_log::test(tokio::test)]
async fn handshake_acknowledges_each_artifact_half() {
    let mut handle = spawn_executor();

    handoff(&mut handle, "run-1", b"printf(\"out\")").await;
    handle.send(execute("run-1")).unwrap();

    let chunk = next_event(&mut handle).await;
    assert_eq!(chunk.channel, Channel::Application);
    assert_matches!(chunk.body, Ok(Payload::TextChunk(ref text)) if text == "out\n");

    assert_eq!(next_event(&mut handle).await.as_stage(), Some(Stage::Exit));
}

#[test_log::test(tokio::test)]
async fn execute_before_loading_fails_with_a_best_effort_exit() {
    let mut handle = spawn_executor();

    handle.send(execute("run-2")).unwrap();

    let error = next_event(&mut handle).await;
    assert_eq!(error.channel, Channel::Application);
    assert_matches!(
        error.body,
        Err(ref report) if report.message.contains("not loaded")
    );
    assert_eq!(next_event(&mut handle).await.as_stage(), Some(Stage::Exit));
}

/// Test that the artifacts are consumed by execution and a second run needs
/// a fresh handoff.
#[test_log::test(tokio::test)]
async fn artifacts_are_consumed_by_execution() {
    let mut handle = spawn_executor();

    handoff(&mut handle, "run-3", b"printf(\"once\")").await;
    handle.send(execute("run-3")).unwrap();
    assert_matches!(
        next_event(&mut handle).await.body,
        Ok(Payload::TextChunk(_))
    );
    assert_eq!(next_event(&mut handle).await.as_stage(), Some(Stage::Exit));

    handle.send(execute("run-3-again")).unwrap();
    let error = next_event(&mut handle).await;
    assert_matches!(error.body, Err(_));
}

#[test_log::test(tokio::test)]
async fn program_faults_are_reported_before_the_exit_stage() {
    let mut handle = spawn_executor();

    handoff(&mut handle, "run-4", b"trap!").await;
    handle.send(execute("run-4")).unwrap();

    let error = next_event(&mut handle).await;
    assert_matches!(
        error.body,
        Err(ref report) if report.message.contains("mock program trapped")
    );
    assert_eq!(next_event(&mut handle).await.as_stage(), Some(Stage::Exit));
}

/// Test that only the first transferred surface is kept.
#[test_log::test(tokio::test)]
async fn surface_is_transferred_at_most_once() {
    let mut handle = spawn_executor();
    let (first_surface, mut first_frames) = DrawingSurface::new(8, 8);
    let (second_surface, mut second_frames) = DrawingSurface::new(16, 16);

    handle
        .send(Envelope::system(
            RequestId::lifecycle(),
            Payload::SetCanvas(first_surface),
        ))
        .unwrap();
    handle
        .send(Envelope::system(
            RequestId::lifecycle(),
            Payload::SetCanvas(second_surface),
        ))
        .unwrap();

    handoff(&mut handle, "run-5", b"draw()").await;
    handle.send(execute("run-5")).unwrap();
    assert_eq!(next_event(&mut handle).await.as_stage(), Some(Stage::Exit));

    assert!(first_frames.try_next_frame().is_some());
    assert!(second_frames.try_next_frame().is_none());
}

#[test_log::test(tokio::test)]
async fn shutting_down_closes_the_channels() {
    let mut handle = spawn_executor();

    handle.shut_down();

    assert_matches!(
        handle.send(execute("run-6")),
        Err(crate::ExecutionError::ExecutorUnavailable)
    );
    let ended = timeout(EVENT_TIMEOUT, handle.next_event())
        .await
        .expect("Executor context should end after shutdown");
    assert!(ended.is_none());
}
