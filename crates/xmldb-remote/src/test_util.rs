// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Wire captures under `tests/fixtures`, decoded once for assertions.

use std::io::Cursor;

use serde::Deserialize;

use crate::protocol::{read_frame, Frame};

#[derive(Deserialize)]
struct Capture {
    frame_hex: String,
}

/// A captured frame: the raw bytes and what `read_frame` makes of them.
pub struct FrameFixture {
    pub bytes: Vec<u8>,
    pub frame: Frame,
}

impl FrameFixture {
    pub fn load(name: &str) -> Self {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(format!("{name}.json"));
        let text = std::fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("{}: {err}", path.display()));
        let capture: Capture = serde_json::from_str(&text)
            .unwrap_or_else(|err| panic!("{}: {err}", path.display()));
        let bytes = hex::decode(capture.frame_hex.trim())
            .unwrap_or_else(|err| panic!("{name}: bad hex: {err}"));

        let mut cursor = Cursor::new(bytes.as_slice());
        let frame = read_frame(&mut cursor).unwrap_or_else(|err| panic!("{name}: {err}"));
        assert_eq!(
            cursor.position() as usize,
            bytes.len(),
            "{name}: bytes after the frame"
        );
        Self { bytes, frame }
    }
}
