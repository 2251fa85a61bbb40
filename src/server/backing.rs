//! Backing device for the block server.
//!
//! The server fulfills client requests against one local file opened at
//! startup: a regular disk image or a block device. Writes are opened with
//! synchronous semantics, so a write acknowledged to the client is durable
//! at return; the protocol has no separate flush.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;

use parking_lot::RwLock;
use thiserror::Error;

/// Server error type
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported backing file type (need a regular file or block device): {0}")]
    UnsupportedFileType(String),

    #[error("backing device too large for the 32-bit wire geometry: {size} bytes")]
    DeviceTooLarge { size: u64 },
}

pub type ServerResult<T> = Result<T, ServerError>;

/// The file the server reads and writes to fulfill client requests.
///
/// A shared/exclusive lock guards it: reads take it shared (pread is
/// positionless, so concurrent readers are safe), writes take it
/// exclusive. Under the serial-accept listener the lock is redundant, but
/// it keeps the device safe under a per-client-thread server.
#[derive(Debug)]
pub struct BackingDevice {
    file: File,
    size: u32,
    read_only: bool,
    lock: RwLock<()>,
}

impl BackingDevice {
    /// Stat and open the backing file. Regular files take their size from
    /// the stat; block devices are queried with the kernel's size ioctl;
    /// any other file type is rejected. Sizes the handshake cannot
    /// represent are rejected up front.
    pub fn open(path: &Path, read_only: bool) -> ServerResult<Self> {
        let metadata = std::fs::metadata(path)?;
        let file_type = metadata.file_type();

        let is_block_device = {
            use std::os::unix::fs::FileTypeExt;
            file_type.is_block_device()
        };
        if !file_type.is_file() && !is_block_device {
            return Err(ServerError::UnsupportedFileType(format!("{file_type:?}")));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .custom_flags(libc::O_SYNC)
            .open(path)?;

        let size = if is_block_device {
            block_device_size(&file)?
        } else {
            metadata.len()
        };
        if size > u64::from(u32::MAX) {
            return Err(ServerError::DeviceTooLarge { size });
        }

        Ok(Self {
            file,
            size: size as u32,
            read_only,
            lock: RwLock::new(()),
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Read at `offset`, clamped to the device size. Loops until the
    /// buffer is full or the file ends, so a transfer near the end of the
    /// device returns the truncated prefix.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let len = u64::from(self.size);
        if offset >= len {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(len - offset) as usize;

        let _shared = self.lock.read();
        let mut filled = 0;
        while filled < want {
            let n = self.file.read_at(&mut buf[filled..want], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Write at `offset`, clamped to the device size so the geometry never
    /// grows. Returns the byte count accepted.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let len = u64::from(self.size);
        if offset >= len {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(len - offset) as usize;

        let _exclusive = self.lock.write();
        self.file.write_all_at(&buf[..n], offset)?;
        Ok(n)
    }
}

/// Total size in bytes of a block device, via the BLKGETSIZE64 ioctl.
#[cfg(target_os = "linux")]
fn block_device_size(file: &File) -> io::Result<u64> {
    use std::os::unix::io::AsRawFd;

    // _IOR(0x12, 114, u64)
    const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

    let mut size: u64 = 0;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut size) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(size)
}

#[cfg(not(target_os = "linux"))]
fn block_device_size(_file: &File) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "block device size query is only supported on Linux",
    ))
}
