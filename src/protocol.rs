//! Wire protocol for the block server.
//!
//! All frames are packed and big-endian on the wire. The codec performs no
//! I/O: it only builds network-order frames and decodes host-order views of
//! received bytes. Fixed-size frames are plain zerocopy structs; the two
//! variable-length frames (read response, write request) are owned
//! contiguous buffers with the header at offset zero and the payload
//! immediately after.
//!
//! A session looks like this:
//!
//! 1. Server -> client: [`ServerInfo`] (9 bytes), immediately on accept.
//! 2. Zero or more request/response pairs: [`ReadRequest`] ->
//!    read response, or [`WriteRequest`] -> [`WriteResponse`].
//! 3. Client -> server: `FINISH` (1 byte) or TCP close ends the session.

use thiserror::Error;
use zerocopy::byteorder::network_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::constants::HANDSHAKE_MAGIC;

/// Codec error type
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid request tag {0:#04x}")]
    InvalidTag(u8),

    #[error("handshake magic mismatch: {0:#010x}")]
    BadMagic(u32),
}

/// Request tags, the leading byte of every client-to-server frame.
///
/// The set is closed: any other leading byte is a framing violation. The
/// tag can be parsed from the first byte of a buffer without consuming
/// anything else, so the server dispatches before decoding the full frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read = 0xB1,
    Write = 0xB2,
    Finish = 0xB3,
}

impl RequestKind {
    pub fn from_tag(tag: u8) -> Option<RequestKind> {
        match tag {
            0xB1 => Some(RequestKind::Read),
            0xB2 => Some(RequestKind::Write),
            0xB3 => Some(RequestKind::Finish),
            _ => None,
        }
    }

    /// True only for members of the closed request set.
    pub fn is_valid(tag: u8) -> bool {
        Self::from_tag(tag).is_some()
    }
}

/// The one-byte graceful-close frame.
pub fn finish_frame() -> [u8; 1] {
    [RequestKind::Finish as u8]
}

/// Handshake sent by the server immediately on accept: the backing
/// device's geometry.
///
/// The size field is 32-bit, so devices above 4 GiB cannot be announced.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub magic: U32,
    pub device_size: U32,
    pub read_only: u8,
}

impl ServerInfo {
    pub const WIRE_SIZE: usize = 9;

    pub fn new(device_size: u32, read_only: bool) -> Self {
        Self {
            magic: U32::new(HANDSHAKE_MAGIC),
            device_size: U32::new(device_size),
            read_only: u8::from(read_only),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic.get() == HANDSHAKE_MAGIC
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only != 0
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        Self::read_from_bytes(bytes).map_err(|_| WireError::Truncated {
            expected: Self::WIRE_SIZE,
            actual: bytes.len(),
        })
    }
}

/// Fixed 9-byte read request: tag, payload size, device offset.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub tag: u8,
    pub size: U32,
    pub offset: U32,
}

impl ReadRequest {
    pub const WIRE_SIZE: usize = 9;

    pub fn new(size: u32, offset: u32) -> Self {
        Self {
            tag: RequestKind::Read as u8,
            size: U32::new(size),
            offset: U32::new(offset),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let request = Self::read_from_bytes(bytes).map_err(|_| WireError::Truncated {
            expected: Self::WIRE_SIZE,
            actual: bytes.len(),
        })?;
        if request.tag != RequestKind::Read as u8 {
            return Err(WireError::InvalidTag(request.tag));
        }
        Ok(request)
    }
}

/// Header of the variable-length write request. The payload of `size`
/// bytes follows it on the wire; [`WriteRequest::frame`] builds the whole
/// contiguous frame.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequest {
    pub tag: u8,
    pub size: U32,
    pub offset: U32,
}

impl WriteRequest {
    pub const WIRE_SIZE: usize = 9;

    pub fn new(size: u32, offset: u32) -> Self {
        Self {
            tag: RequestKind::Write as u8,
            size: U32::new(size),
            offset: U32::new(offset),
        }
    }

    /// Build the complete network-order frame: header followed by payload.
    pub fn frame(payload: &[u8], offset: u32) -> Vec<u8> {
        let header = Self::new(payload.len() as u32, offset);
        let mut frame = Vec::with_capacity(Self::WIRE_SIZE + payload.len());
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let request = Self::read_from_bytes(bytes).map_err(|_| WireError::Truncated {
            expected: Self::WIRE_SIZE,
            actual: bytes.len(),
        })?;
        if request.tag != RequestKind::Write as u8 {
            return Err(WireError::InvalidTag(request.tag));
        }
        Ok(request)
    }
}

/// Metadata of the variable-length read response: the byte count that
/// follows. Read this first, then exactly that many payload bytes.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResponseHeader {
    pub size: U32,
}

impl ReadResponseHeader {
    pub const WIRE_SIZE: usize = 4;

    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        Self::read_from_bytes(bytes).map_err(|_| WireError::Truncated {
            expected: Self::WIRE_SIZE,
            actual: bytes.len(),
        })
    }
}

/// Owned read-response frame: 4-byte header followed by the payload in one
/// allocation. The server fills [`payload_mut`](Self::payload_mut), then
/// [`finish`](Self::finish) stamps the actual byte count (which may be
/// smaller than the capacity when the read hit end of device) and trims
/// the frame to it.
pub struct ReadResponseFrame {
    buf: Vec<u8>,
}

impl ReadResponseFrame {
    pub fn with_capacity(payload_len: u32) -> Self {
        let mut buf = vec![0u8; ReadResponseHeader::WIRE_SIZE + payload_len as usize];
        buf[..ReadResponseHeader::WIRE_SIZE].copy_from_slice(U32::new(payload_len).as_bytes());
        Self { buf }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[ReadResponseHeader::WIRE_SIZE..]
    }

    pub fn finish(mut self, actual: u32) -> Vec<u8> {
        self.buf[..ReadResponseHeader::WIRE_SIZE].copy_from_slice(U32::new(actual).as_bytes());
        self.buf.truncate(ReadResponseHeader::WIRE_SIZE + actual as usize);
        self.buf
    }
}

/// Fixed 4-byte write response: the byte count the server accepted.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    pub size: U32,
}

impl WriteResponse {
    pub const WIRE_SIZE: usize = 4;

    pub fn new(size: u32) -> Self {
        Self { size: U32::new(size) }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        Self::read_from_bytes(bytes).map_err(|_| WireError::Truncated {
            expected: Self::WIRE_SIZE,
            actual: bytes.len(),
        })
    }
}

// Frames must be byte-exact: no padding between fields.
const _: () = assert!(std::mem::size_of::<ServerInfo>() == ServerInfo::WIRE_SIZE);
const _: () = assert!(std::mem::size_of::<ReadRequest>() == ReadRequest::WIRE_SIZE);
const _: () = assert!(std::mem::size_of::<WriteRequest>() == WriteRequest::WIRE_SIZE);
const _: () = assert!(std::mem::size_of::<ReadResponseHeader>() == ReadResponseHeader::WIRE_SIZE);
const _: () = assert!(std::mem::size_of::<WriteResponse>() == WriteResponse::WIRE_SIZE);
