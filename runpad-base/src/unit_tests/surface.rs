// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::DrawingSurface;
use bytes::Bytes;

#[tokio::test]
async fn presented_frames_reach_the_receiver() {
    let (surface, mut frames) = DrawingSurface::new(320, 200);

    assert!(surface.present(Bytes::from_static(&[1, 2, 3])));

    let frame = frames.next_frame().await.expect("A frame was presented");
    assert_eq!(frame.width, 320);
    assert_eq!(frame.height, 200);
    assert_eq!(frame.pixels.as_ref(), &[1, 2, 3][..]);
}

#[test]
fn presenting_without_a_receiver_reports_failure() {
    let (surface, frames) = DrawingSurface::new(1, 1);
    drop(frames);

    assert!(!surface.present(Bytes::new()));
}

#[tokio::test]
async fn dropping_the_surface_ends_the_frame_stream() {
    let (surface, mut frames) = DrawingSurface::new(1, 1);

    surface.present(Bytes::from_static(&[0]));
    drop(surface);

    assert!(frames.next_frame().await.is_some());
    assert!(frames.next_frame().await.is_none());
    assert!(frames.try_next_frame().is_none());
}
