//! Block device abstraction.
//!
//! A device is one of two closed variants: a memory device backed by an
//! in-process heap buffer, or a network device backed by a TCP connection
//! to a block server. The set of kinds is fixed by the filesystem
//! semantics, so variant dispatch replaces open inheritance.

use thiserror::Error;

use crate::protocol::WireError;

pub mod memory;
pub mod network;

pub use memory::MemoryDevice;
pub use network::{NetworkDevice, ServerConnection};

/// Device error type
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("framing anomaly: {0}")]
    Framing(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("device is already sized ({size} bytes)")]
    AlreadySized { size: u64 },
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// A registered block device.
#[derive(Debug)]
pub enum BlockDevice {
    Memory(MemoryDevice),
    Network(NetworkDevice),
}

impl BlockDevice {
    pub fn read_only(&self) -> bool {
        match self {
            BlockDevice::Memory(_) => false,
            BlockDevice::Network(device) => device.read_only(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            BlockDevice::Memory(device) => device.size(),
            BlockDevice::Network(device) => device.size(),
        }
    }

    /// Read into `buf` at `offset`. The caller clamps `offset + buf.len()`
    /// to `size()` before dispatching here.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> DeviceResult<usize> {
        match self {
            BlockDevice::Memory(device) => Ok(device.read(buf, offset)),
            BlockDevice::Network(device) => device.read(buf, offset),
        }
    }

    /// Write `buf` at `offset`, pre-clamped like [`read`](Self::read).
    pub fn write(&self, buf: &[u8], offset: u64) -> DeviceResult<usize> {
        match self {
            BlockDevice::Memory(device) => Ok(device.write(buf, offset)),
            BlockDevice::Network(device) => device.write(buf, offset),
        }
    }

    pub fn as_memory(&self) -> Option<&MemoryDevice> {
        match self {
            BlockDevice::Memory(device) => Some(device),
            BlockDevice::Network(_) => None,
        }
    }

    pub fn as_network(&self) -> Option<&NetworkDevice> {
        match self {
            BlockDevice::Network(device) => Some(device),
            BlockDevice::Memory(_) => None,
        }
    }
}
