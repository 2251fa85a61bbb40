//! Network block device client.
//!
//! Forwards reads and writes over a TCP connection to a block server. The
//! wire is a single FIFO and responses carry no request tags, so every
//! operation on one device serializes on a per-device lock to keep
//! request/response pairs aligned. Distinct devices run independently.
//!
//! Any framing anomaly (short write of a request, short read of response
//! metadata, advertised size differing from the requested size, short read
//! of the payload) leaves the stream cursor unknown: stale bytes of the
//! old response must never contaminate the next request. The policy is to
//! close the socket, attempt one immediate reconnect plus handshake, and
//! fail the current call; any in-flight response is abandoned with the old
//! socket.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

use parking_lot::Mutex;
use tracing::{debug, warn};
use zerocopy::IntoBytes;

use crate::constants::DEFAULT_SERVER_ADDR;
use crate::protocol::{
    finish_frame, ReadRequest, ReadResponseHeader, ServerInfo, WireError, WriteRequest,
    WriteResponse,
};

use super::{DeviceError, DeviceResult};

/// A live connection to a block server: the socket plus the handshake the
/// server sent on accept.
#[derive(Debug)]
pub struct ServerConnection {
    stream: TcpStream,
    pub info: ServerInfo,
}

impl ServerConnection {
    /// Connect and consume the handshake. Rejects a handshake whose magic
    /// does not match; the socket is dropped on any failure.
    pub fn establish(addr: SocketAddr) -> std::io::Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        let mut buf = [0u8; ServerInfo::WIRE_SIZE];
        stream.read_exact(&mut buf)?;
        let info = ServerInfo::parse(&buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if !info.is_valid() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                WireError::BadMagic(info.magic.get()),
            ));
        }
        Ok(Self { stream, info })
    }
}

#[derive(Debug)]
enum ConnectionState {
    Connected(ServerConnection),
    Disconnected,
}

/// A block device living behind a TCP connection to a block server.
///
/// Size and read-only flag come from the initial handshake and are fixed
/// for the life of the device.
#[derive(Debug)]
pub struct NetworkDevice {
    target: String,
    addr: SocketAddr,
    device_size: u32,
    read_only: bool,
    state: Mutex<ConnectionState>,
}

impl NetworkDevice {
    /// Connect to the server named by `target`.
    ///
    /// TODO: parse host:port out of the target string; today every target
    /// resolves to the default endpoint.
    pub fn connect(target: &str) -> std::io::Result<Self> {
        Self::connect_to(DEFAULT_SERVER_ADDR, target)
    }

    /// Connect to an explicit endpoint, keeping `target` as the name the
    /// device resolves to via readlink.
    pub fn connect_to(addr: SocketAddr, target: &str) -> std::io::Result<Self> {
        let conn = ServerConnection::establish(addr)?;
        debug!(
            target,
            size = conn.info.device_size.get(),
            read_only = conn.info.is_read_only(),
            "connected to block server"
        );
        Ok(Self {
            target: target.to_string(),
            addr,
            device_size: conn.info.device_size.get(),
            read_only: conn.info.is_read_only(),
            state: Mutex::new(ConnectionState::Connected(conn)),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn size(&self) -> u64 {
        u64::from(self.device_size)
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), ConnectionState::Connected(_))
    }

    /// Read `buf.len()` bytes at `offset`.
    ///
    /// The advertised response size must equal the requested size; a
    /// mismatch in either direction is a framing violation. The equality
    /// check also closes the window where an oversized response could
    /// overrun the caller's buffer: nothing beyond the requested length is
    /// ever read into it.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> DeviceResult<usize> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let conn = self.ensure_connected(state)?;
        let result = Self::transact_read(conn, buf, offset as u32);
        if result.is_err() {
            self.reconnect(state);
        }
        result
    }

    /// Write `buf` at `offset`, returning the full requested length.
    ///
    /// The server's echoed count is logged when it differs but does not
    /// fail the call; the protocol has no partial-write recovery.
    pub fn write(&self, buf: &[u8], offset: u64) -> DeviceResult<usize> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let conn = self.ensure_connected(state)?;
        let result = Self::transact_write(conn, buf, offset as u32);
        if result.is_err() {
            self.reconnect(state);
        }
        result
    }

    fn transact_read(
        conn: &mut ServerConnection,
        buf: &mut [u8],
        offset: u32,
    ) -> DeviceResult<usize> {
        let size = buf.len() as u32;
        let request = ReadRequest::new(size, offset);
        conn.stream.write_all(request.as_bytes())?;

        let mut header = [0u8; ReadResponseHeader::WIRE_SIZE];
        conn.stream.read_exact(&mut header)?;
        let advertised = ReadResponseHeader::parse(&header)?.size.get();
        if advertised != size {
            return Err(DeviceError::Framing(format!(
                "read response announced {advertised} bytes, requested {size}"
            )));
        }

        // A single socket read may return short; read_exact loops until
        // the full payload has arrived.
        conn.stream.read_exact(buf)?;
        Ok(size as usize)
    }

    fn transact_write(
        conn: &mut ServerConnection,
        buf: &[u8],
        offset: u32,
    ) -> DeviceResult<usize> {
        let frame = WriteRequest::frame(buf, offset);
        conn.stream.write_all(&frame)?;

        let mut header = [0u8; WriteResponse::WIRE_SIZE];
        conn.stream.read_exact(&mut header)?;
        let accepted = WriteResponse::parse(&header)?.size.get();
        if accepted as usize != buf.len() {
            warn!(
                accepted,
                requested = buf.len(),
                "server accepted fewer bytes than requested"
            );
        }
        Ok(buf.len())
    }

    /// Get the live connection, re-establishing it first if a previous
    /// anomaly left the device disconnected.
    fn ensure_connected<'a>(
        &self,
        state: &'a mut ConnectionState,
    ) -> DeviceResult<&'a mut ServerConnection> {
        if matches!(state, ConnectionState::Disconnected) {
            let conn = ServerConnection::establish(self.addr)?;
            self.check_geometry(&conn.info);
            *state = ConnectionState::Connected(conn);
        }
        match state {
            ConnectionState::Connected(conn) => Ok(conn),
            ConnectionState::Disconnected => Err(DeviceError::Disconnected),
        }
    }

    /// Drop the current connection and try once to establish a fresh one.
    /// Best effort: on failure the device stays disconnected and later
    /// operations retry.
    fn reconnect(&self, state: &mut ConnectionState) {
        *state = ConnectionState::Disconnected;
        match ServerConnection::establish(self.addr) {
            Ok(conn) => {
                self.check_geometry(&conn.info);
                debug!(target = %self.target, "reconnected to block server");
                *state = ConnectionState::Connected(conn);
            }
            Err(e) => {
                warn!(target = %self.target, error = %e, "reconnect failed; device stays disconnected");
            }
        }
    }

    fn check_geometry(&self, info: &ServerInfo) {
        if info.device_size.get() != self.device_size || info.is_read_only() != self.read_only {
            warn!(
                target = %self.target,
                "server geometry changed since the initial handshake"
            );
        }
    }
}

impl Drop for NetworkDevice {
    fn drop(&mut self) {
        // Graceful close; the server also copes with a plain TCP close.
        if let ConnectionState::Connected(conn) = self.state.get_mut() {
            let _ = conn.stream.write_all(&finish_frame());
        }
    }
}
