//! Global constants for blockfs
//!
//! This module centralizes the wire and transport constants shared by the
//! frontend, the network device client, and the server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Magic value announced in the server handshake.
///
/// A handshake whose magic does not match is rejected and the connection
/// is closed.
pub const HANDSHAKE_MAGIC: u32 = 0xB0B0_B0B0;

/// Default TCP port the block server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 22000;

/// Default endpoint the frontend dials when a network device is created.
///
/// The symlink target is meant to select the endpoint eventually; until it
/// grows host:port syntax every device connects here.
pub const DEFAULT_SERVER_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_SERVER_PORT);

/// Size of the server's per-connection request buffer.
///
/// Must hold at least the largest fixed request header (9 bytes); request
/// payloads beyond it are reassembled with additional socket reads.
pub const REQUEST_BUFFER_SIZE: usize = 4096;

/// Sanity limit on a single request or response payload (1 GiB).
///
/// A declared payload size above this is treated as a framing violation
/// rather than an allocation request.
pub const MAX_PAYLOAD_SIZE: usize = 1 << 30;
