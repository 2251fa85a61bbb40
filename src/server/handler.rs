//! Per-connection request handler.
//!
//! Each accepted client gets the handshake first, then a request loop:
//! read a chunk off the socket, peek the leading tag byte, dispatch. A
//! write payload may arrive fragmented across any number of socket reads,
//! so the handler reassembles it: the bytes that arrived with the header
//! are copied first, then reads continue until the declared size is in.
//!
//! The handler returns `Ok` on a graceful end (FINISH, client disconnect,
//! or an invalid tag that tears the connection down) and `Err` only on
//! socket or backing-file failures; either way the listener closes the
//! socket.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use tracing::{debug, info, warn};
use zerocopy::IntoBytes;

use crate::constants::{MAX_PAYLOAD_SIZE, REQUEST_BUFFER_SIZE};
use crate::protocol::{
    ReadRequest, ReadResponseFrame, RequestKind, ServerInfo, WriteRequest, WriteResponse,
};

use super::backing::BackingDevice;

pub fn handle_client(mut stream: TcpStream, device: &BackingDevice) -> io::Result<()> {
    let info = ServerInfo::new(device.size(), device.read_only());
    stream.write_all(info.as_bytes())?;

    let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            info!("client disconnected");
            return Ok(());
        }

        let tag = buf[0];
        let Some(kind) = RequestKind::from_tag(tag) else {
            warn!("invalid request tag {tag:#04x}, dropping connection");
            return Ok(());
        };

        match kind {
            RequestKind::Read => handle_read(&mut stream, device, &mut buf, n)?,
            RequestKind::Write => handle_write(&mut stream, device, &mut buf, n)?,
            RequestKind::Finish => {
                info!("client asked to finish");
                return Ok(());
            }
        }
    }
}

fn handle_read(
    stream: &mut TcpStream,
    device: &BackingDevice,
    buf: &mut [u8],
    have: usize,
) -> io::Result<()> {
    fill_header(stream, buf, have, ReadRequest::WIRE_SIZE)?;
    let request = ReadRequest::parse(&buf[..ReadRequest::WIRE_SIZE])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let size = request.size.get();
    let offset = request.offset.get();
    check_payload_size(size)?;

    let mut frame = ReadResponseFrame::with_capacity(size);
    let read = device.read_at(frame.payload_mut(), u64::from(offset))?;
    debug!(size, offset, read, "read request");

    stream.write_all(&frame.finish(read as u32))?;
    Ok(())
}

fn handle_write(
    stream: &mut TcpStream,
    device: &BackingDevice,
    buf: &mut [u8],
    have: usize,
) -> io::Result<()> {
    let have = fill_header(stream, buf, have, WriteRequest::WIRE_SIZE)?;
    let request = WriteRequest::parse(&buf[..WriteRequest::WIRE_SIZE])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let size = request.size.get() as usize;
    let offset = request.offset.get();
    check_payload_size(request.size.get())?;

    // Reassemble the payload: whatever arrived with the header first, then
    // additional reads until the declared size is complete.
    let mut payload = vec![0u8; size];
    let already = (have - WriteRequest::WIRE_SIZE).min(size);
    payload[..already]
        .copy_from_slice(&buf[WriteRequest::WIRE_SIZE..WriteRequest::WIRE_SIZE + already]);
    stream.read_exact(&mut payload[already..])?;

    if device.read_only() {
        debug!(size, offset, "write request ignored on read-only device");
        stream.write_all(WriteResponse::new(0).as_bytes())?;
        return Ok(());
    }

    let written = device.write_at(&payload, u64::from(offset))?;
    debug!(size, offset, written, "write request");

    stream.write_all(WriteResponse::new(written as u32).as_bytes())?;
    Ok(())
}

/// Top up the request buffer until the fixed header is complete; the
/// first read may have split it.
fn fill_header(
    stream: &mut TcpStream,
    buf: &mut [u8],
    mut have: usize,
    need: usize,
) -> io::Result<usize> {
    while have < need {
        let n = stream.read(&mut buf[have..])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-request",
            ));
        }
        have += n;
    }
    Ok(have)
}

fn check_payload_size(size: u32) -> io::Result<()> {
    if size as usize > MAX_PAYLOAD_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("declared payload of {size} bytes exceeds the frame limit"),
        ));
    }
    Ok(())
}
