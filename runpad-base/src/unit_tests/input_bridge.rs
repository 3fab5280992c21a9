// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{
    truncate_to_char_boundary, InputBridgeError, SharedInputRegion, WaitStatus, INPUT_CAPACITY,
};
use assert_matches::assert_matches;
use proptest::prelude::*;
use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

/// Spawns a reader thread that performs one full request/read cycle.
fn spawn_reader(
    region: &Arc<SharedInputRegion>,
) -> thread::JoinHandle<Result<String, InputBridgeError>> {
    region.begin_request().expect("Fresh region accepts a request");
    let region = region.clone();
    thread::spawn(move || region.read_input())
}

#[test]
fn round_trip_wakes_the_blocked_reader() {
    let region = Arc::new(SharedInputRegion::new());
    let reader = spawn_reader(&region);

    while !region.submit("hello") {
        thread::yield_now();
    }

    assert_eq!(reader.join().unwrap(), Ok("hello".to_owned()));
    assert_eq!(region.control_value(), 0);
    assert!(region.is_idle());
}

/// Test that a submission arriving before the reader blocks is still
/// delivered, because the request was announced first.
#[test]
fn submission_may_arrive_before_the_reader_blocks() {
    let region = Arc::new(SharedInputRegion::new());
    region.begin_request().unwrap();

    assert!(region.submit("early"));

    assert_eq!(region.read_input(), Ok("early".to_owned()));
    assert_eq!(region.control_value(), 0);
}

#[test]
fn empty_input_still_wakes_the_reader() {
    let region = Arc::new(SharedInputRegion::new());
    let reader = spawn_reader(&region);

    while !region.submit("") {
        thread::yield_now();
    }

    assert_eq!(reader.join().unwrap(), Ok(String::new()));
    assert!(region.is_idle());
}

#[test]
fn submission_while_idle_is_discarded() {
    let region = SharedInputRegion::new();

    assert!(!region.submit("nobody is listening"));
    assert!(region.is_idle());
    assert_eq!(region.control_value(), 0);
}

#[test]
fn overlapping_requests_are_rejected() {
    let region = SharedInputRegion::new();
    region.begin_request().unwrap();

    assert_eq!(
        region.begin_request(),
        Err(InputBridgeError::AlreadyOutstanding)
    );
}

#[test]
fn waiting_on_an_unexpected_value_reports_not_equal() {
    let region = SharedInputRegion::new();

    assert_eq!(region.wait(7), Ok(WaitStatus::NotEqual));
}

/// Test that a control slot changed by anything other than a proper
/// delivery is reported as a protocol violation.
#[test]
fn corrupted_control_slot_is_a_violation() {
    let region = SharedInputRegion::new();
    region.state.lock().unwrap().control = 9;

    assert_eq!(
        region.read_input(),
        Err(InputBridgeError::Violation {
            expected: 0,
            found: 9
        })
    );
}

#[test]
fn closing_wakes_the_reader_with_an_error() {
    let region = Arc::new(SharedInputRegion::new());
    let reader = spawn_reader(&region);

    thread::sleep(Duration::from_millis(10));
    region.close();

    assert_eq!(reader.join().unwrap(), Err(InputBridgeError::Closed));
    assert!(region.is_closed());
    assert!(!region.submit("too late"));
}

/// Test that a blocked reader does not wake without a submission.
#[test]
fn reader_does_not_wake_spuriously() {
    let region = Arc::new(SharedInputRegion::new());
    region.begin_request().unwrap();

    let (finished, probe) = mpsc::channel();
    let reader = {
        let region = region.clone();
        thread::spawn(move || {
            let result = region.read_input();
            let _ = finished.send(());
            result
        })
    };

    assert_eq!(
        probe.recv_timeout(Duration::from_millis(100)),
        Err(mpsc::RecvTimeoutError::Timeout)
    );

    region.close();
    assert_matches!(reader.join().unwrap(), Err(InputBridgeError::Closed));
}

#[test]
fn oversized_input_is_truncated_at_a_character_boundary() {
    let region = Arc::new(SharedInputRegion::new());

    // One leading byte followed by two-byte characters straddling the
    // capacity boundary.
    let text = format!("a{}", "é".repeat(INPUT_CAPACITY));
    let reader = spawn_reader(&region);
    while !region.submit(&text) {
        thread::yield_now();
    }

    let received = reader.join().unwrap().unwrap();
    assert_eq!(received.len(), INPUT_CAPACITY - 1);
    assert!(text.starts_with(&received));
}

proptest! {
    /// Truncation never exceeds the limit, never splits a character, and
    /// always keeps a prefix of the original text.
    #[test]
    fn truncation_is_a_character_safe_prefix(text: String, max_bytes in 0_usize..=INPUT_CAPACITY) {
        let truncated = truncate_to_char_boundary(&text, max_bytes);

        prop_assert!(truncated.len() <= max_bytes);
        prop_assert!(text.starts_with(truncated));
        // A character is at most four bytes, so truncation drops less than
        // four bytes below the limit.
        if text.len() > max_bytes {
            prop_assert!(max_bytes - truncated.len() < 4);
        } else {
            prop_assert_eq!(truncated, text.as_str());
        }
    }

    /// Any submission below capacity round-trips exactly.
    #[test]
    fn submissions_round_trip(text in "\\PC{0,200}") {
        prop_assume!(text.len() <= INPUT_CAPACITY);

        let region = Arc::new(SharedInputRegion::new());
        let reader = spawn_reader(&region);
        while !region.submit(&text) {
            thread::yield_now();
        }

        prop_assert_eq!(reader.join().unwrap(), Ok(text));
        prop_assert_eq!(region.control_value(), 0);
    }
}
