// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::io::{Read, Write};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

pub const MSG_HELLO: u16 = 1;
pub const MSG_UNARY: u16 = 2;
pub const MSG_REPLY: u16 = 3;
pub const MSG_STREAM_OPEN: u16 = 4;
pub const MSG_STREAM_ITEM: u16 = 5;
pub const MSG_STREAM_END: u16 = 6;
pub const MSG_UPLOAD_OPEN: u16 = 7;
pub const MSG_UPLOAD_CHUNK: u16 = 8;
pub const MSG_UPLOAD_END: u16 = 9;
pub const MSG_UPLOAD_STATUS: u16 = 10;
pub const MSG_ERROR: u16 = 255;

pub const PROTOCOL_VERSION: u16 = 1;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const HEADER_LEN: usize = 16;
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024; // 64 MiB
/// Largest chunk whose stream item envelope still fits in one frame.
pub const MAX_CHUNK_SIZE: usize = MAX_FRAME_SIZE as usize - 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub len: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub req_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

pub fn write_frame<W: Write>(
    writer: &mut W,
    msg_type: u16,
    flags: u16,
    req_id: u64,
    payload: &[u8],
) -> Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            Error::invalid_response(format!(
                "payload of {} bytes exceeds maximum {MAX_FRAME_SIZE}",
                payload.len()
            ))
        })?;

    // One buffer so concurrent writers never interleave partial frames.
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.write_u32::<LittleEndian>(len)?;
    buf.write_u16::<LittleEndian>(msg_type)?;
    buf.write_u16::<LittleEndian>(flags)?;
    buf.write_u64::<LittleEndian>(req_id)?;
    buf.extend_from_slice(payload);
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut raw = [0u8; HEADER_LEN];
    read_or_truncated(reader, &mut raw, "frame header truncated")?;
    let header = decode_header(&raw)?;

    let mut payload = vec![0u8; header.len as usize];
    read_or_truncated(reader, &mut payload, "frame payload truncated")?;
    Ok(Frame { header, payload })
}

fn decode_header(mut raw: &[u8]) -> Result<FrameHeader> {
    let len = raw.read_u32::<LittleEndian>()?;
    if len > MAX_FRAME_SIZE {
        return Err(Error::invalid_response(format!(
            "frame size {len} exceeds maximum {MAX_FRAME_SIZE}"
        )));
    }
    Ok(FrameHeader {
        len,
        msg_type: raw.read_u16::<LittleEndian>()?,
        flags: raw.read_u16::<LittleEndian>()?,
        req_id: raw.read_u64::<LittleEndian>()?,
    })
}

/// A stream that ends mid-frame is a protocol violation, not an I/O failure.
fn read_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::invalid_response(what),
        _ => Error::Io(err),
    })
}
