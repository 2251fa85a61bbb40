//! blockfs - virtual block devices behind a FUSE mount
//!
//! blockfs exposes block devices as files in a flat user-space
//! filesystem. An entry is either an in-memory device created on demand
//! or a network device that forwards reads and writes over TCP to a
//! `blockfsd` server, which services them against a local disk image or
//! block device.
//!
//! # Architecture
//!
//! - **Wire protocol** ([`protocol`]): packed big-endian frames for the
//!   handshake, read/write request/response pairs, and graceful close.
//!   Pure codec, no I/O.
//! - **Devices** ([`device`]): the closed Memory/Network variant pair
//!   behind one read/write/size/read_only surface. The network client
//!   serializes operations per device and reconnects on any framing
//!   anomaly.
//! - **Registry** ([`registry`]): process-wide path-to-device table with
//!   a target alias per network device.
//! - **Filesystem adapter** ([`fs`]): routes FUSE callbacks (getattr,
//!   readdir, open, create, symlink, readlink, truncate, read, write,
//!   unlink) to the registry and devices.
//! - **Server** ([`server`]): accepts clients serially, announces the
//!   backing device's geometry, and runs the per-connection request loop
//!   with write-payload reassembly and read-only enforcement.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use blockfs::fs::BlockFs;
//! use blockfs::registry::DeviceRegistry;
//!
//! let registry = Arc::new(DeviceRegistry::new());
//! let fs = BlockFs::new(registry);
//! fuser::mount2(fs, "/mnt/blockfs", &[]).unwrap();
//! ```

pub mod config;
pub mod constants;
pub mod device;
pub mod fs;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod server;
