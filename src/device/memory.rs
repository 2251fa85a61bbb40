//! In-memory block device.

use parking_lot::RwLock;

use super::{DeviceError, DeviceResult};

/// A block device whose storage is a heap buffer.
///
/// A fresh device is unsized (empty buffer). The size is established
/// exactly once by [`set_content`](Self::set_content); any later attempt
/// to resize is refused. Always writable.
#[derive(Debug)]
pub struct MemoryDevice {
    content: RwLock<Vec<u8>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self {
            content: RwLock::new(Vec::new()),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.read().len() as u64
    }

    /// Allocate the backing buffer. Refused once the device is sized.
    pub fn set_content(&self, size: u64) -> DeviceResult<()> {
        let mut content = self.content.write();
        if !content.is_empty() {
            return Err(DeviceError::AlreadySized {
                size: content.len() as u64,
            });
        }
        *content = vec![0u8; size as usize];
        Ok(())
    }

    pub fn read(&self, buf: &mut [u8], offset: u64) -> usize {
        let content = self.content.read();
        let offset = offset as usize;
        if offset >= content.len() {
            return 0;
        }
        let n = buf.len().min(content.len() - offset);
        buf[..n].copy_from_slice(&content[offset..offset + n]);
        n
    }

    pub fn write(&self, buf: &[u8], offset: u64) -> usize {
        let mut content = self.content.write();
        let offset = offset as usize;
        if offset >= content.len() {
            return 0;
        }
        let n = buf.len().min(content.len() - offset);
        content[offset..offset + n].copy_from_slice(&buf[..n]);
        n
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unsized() {
        let device = MemoryDevice::new();
        assert_eq!(device.size(), 0);
    }

    #[test]
    fn test_sized_exactly_once() {
        let device = MemoryDevice::new();
        device.set_content(16).unwrap();
        assert_eq!(device.size(), 16);

        let err = device.set_content(32).unwrap_err();
        assert!(matches!(err, DeviceError::AlreadySized { size: 16 }));
        assert_eq!(device.size(), 16);
    }

    #[test]
    fn test_write_then_read() {
        let device = MemoryDevice::new();
        device.set_content(16).unwrap();

        assert_eq!(device.write(b"HELLOWORLD______", 0), 16);

        let mut buf = [0u8; 16];
        assert_eq!(device.read(&mut buf, 0), 16);
        assert_eq!(&buf, b"HELLOWORLD______");
    }

    #[test]
    fn test_read_at_offset() {
        let device = MemoryDevice::new();
        device.set_content(10).unwrap();
        device.write(b"hello sir!", 0);

        let mut buf = [0u8; 4];
        assert_eq!(device.read(&mut buf, 6), 4);
        assert_eq!(&buf, b"sir!");
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let device = MemoryDevice::new();
        device.set_content(8).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(device.read(&mut buf, 8), 0);
        assert_eq!(device.read(&mut buf, 100), 0);
    }

    #[test]
    fn test_transfers_clamped_to_size() {
        let device = MemoryDevice::new();
        device.set_content(8).unwrap();

        assert_eq!(device.write(b"0123456789", 4), 4);
        let mut buf = [0u8; 10];
        assert_eq!(device.read(&mut buf, 4), 4);
        assert_eq!(&buf[..4], b"0123");
    }
}
