//! Filesystem adapter.
//!
//! `BlockFs` presents the device registry as a flat directory: one entry
//! per registered device. The core operations are path-level and perform
//! no byte transfer themselves; all I/O is delegated to the device behind
//! the path. The `fuser::Filesystem` impl at the bottom is a thin shim
//! that maps kernel inodes to paths and errors to errnos.
//!
//! Dispatch rules:
//! - `/` is a directory (0755, nlink 2) and never a registry entry.
//! - A memory device is a regular file, 0644.
//! - A network device is a symlink under its linkpath and a regular file
//!   under its `/target` self-alias; 0444 when the server is read-only.
//! - Reads and writes clamp `offset + len` to the device size; at or past
//!   the end they transfer nothing.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::DEFAULT_SERVER_ADDR;
use crate::device::{BlockDevice, NetworkDevice};
use crate::registry::{DeviceRegistry, RegistryError};

const TTL: Duration = Duration::from_secs(1);

/// Inode of the mount root, fixed by the FUSE protocol.
pub const ROOT_INO: u64 = 1;

/// Adapter error type, one variant per filesystem error kind.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such device: {0}")]
    NotFound(String),

    #[error("device already exists: {0}")]
    AlreadyExists(String),

    #[error("operation not supported on {0}")]
    NotSupported(String),

    #[error("write access denied on read-only device {0}")]
    AccessDenied(String),

    #[error("device {0} is read-only")]
    ReadOnly(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotSupported(_) => libc::EPERM,
            FsError::AccessDenied(_) => libc::EACCES,
            FsError::ReadOnly(_) => libc::EBADF,
            FsError::Io(_) => libc::EIO,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// What a directory entry looks like to stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Symlink,
}

#[derive(Debug, Clone, Copy)]
pub struct EntryAttr {
    pub kind: EntryKind,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
}

struct InodeTable {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next_ino: u64,
}

impl InodeTable {
    fn new() -> Self {
        Self {
            by_ino: HashMap::new(),
            by_path: HashMap::new(),
            next_ino: ROOT_INO + 1,
        }
    }

    fn get_or_assign(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_ino.insert(ino, path.to_string());
        self.by_path.insert(path.to_string(), ino);
        ino
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.by_ino.get(&ino).cloned()
    }

    fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.by_path.remove(path) {
            self.by_ino.remove(&ino);
        }
    }
}

/// The filesystem frontend: a device registry plus the inode bookkeeping
/// the kernel interface needs.
pub struct BlockFs {
    registry: Arc<DeviceRegistry>,
    inodes: Mutex<InodeTable>,
    server_addr: SocketAddr,
    mounted_at: SystemTime,
    uid: u32,
    gid: u32,
}

impl BlockFs {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self::with_server_addr(registry, DEFAULT_SERVER_ADDR)
    }

    /// Use an explicit block-server endpoint for new network devices.
    pub fn with_server_addr(registry: Arc<DeviceRegistry>, server_addr: SocketAddr) -> Self {
        Self {
            registry,
            inodes: Mutex::new(InodeTable::new()),
            server_addr,
            mounted_at: SystemTime::now(),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Stat an entry by path.
    pub fn attr_of(&self, path: &str) -> FsResult<EntryAttr> {
        if path == "/" {
            return Ok(EntryAttr {
                kind: EntryKind::Directory,
                size: 0,
                perm: 0o755,
                nlink: 2,
            });
        }
        let device = self.device_at(path)?;
        let kind = match device.as_ref() {
            BlockDevice::Memory(_) => EntryKind::RegularFile,
            BlockDevice::Network(net) => {
                // The target alias presents as the device file itself; the
                // linkpath presents as a symlink resolving to the target.
                if path == format!("/{}", net.target()) {
                    EntryKind::RegularFile
                } else {
                    EntryKind::Symlink
                }
            }
        };
        let perm = if device.read_only() { 0o444 } else { 0o644 };
        Ok(EntryAttr {
            kind,
            size: device.size(),
            perm,
            nlink: 1,
        })
    }

    /// Basenames for the root directory listing; aliases stay hidden.
    pub fn list_root(&self) -> Vec<String> {
        self.registry
            .enumerate()
            .into_iter()
            .map(|path| path.trim_start_matches('/').to_string())
            .collect()
    }

    /// Open-time permission check: write access on a read-only device is
    /// refused.
    pub fn check_open(&self, path: &str, flags: i32) -> FsResult<()> {
        let device = self.device_at(path)?;
        if device.read_only() && (flags & libc::O_ACCMODE) != libc::O_RDONLY {
            return Err(FsError::AccessDenied(path.to_string()));
        }
        Ok(())
    }

    /// Create a memory device at `path` unless one already exists. With
    /// `exclusive`, an existing entry is an error.
    pub fn create_device(&self, path: &str, exclusive: bool) -> FsResult<()> {
        match self.registry.add_memory(path) {
            Ok(_) => Ok(()),
            Err(RegistryError::AlreadyExists(_)) if !exclusive => Ok(()),
            Err(RegistryError::AlreadyExists(p)) => Err(FsError::AlreadyExists(p)),
        }
    }

    /// Create a network device: connect to the server named by `target`,
    /// validate the handshake, and register the device under `linkpath`
    /// and its target alias.
    pub fn link_remote(&self, target: &str, linkpath: &str) -> FsResult<()> {
        if self.registry.exists(linkpath) {
            return Err(FsError::AlreadyExists(linkpath.to_string()));
        }
        let device = NetworkDevice::connect_to(self.server_addr, target).map_err(|e| {
            warn!(target, error = %e, "block server connection failed");
            FsError::Io(e.to_string())
        })?;
        match self.registry.add_network(linkpath, device) {
            Ok(_) => Ok(()),
            Err(RegistryError::AlreadyExists(p)) => Err(FsError::AlreadyExists(p)),
        }
    }

    /// The symlink destination of a network device.
    pub fn link_target(&self, path: &str) -> FsResult<String> {
        let device = self.device_at(path)?;
        match device.as_network() {
            Some(net) => Ok(net.target().to_string()),
            None => Err(FsError::NotSupported(path.to_string())),
        }
    }

    /// Size a freshly created memory device. Only an unsized memory
    /// device accepts this; everything else is refused.
    pub fn resize(&self, path: &str, size: u64) -> FsResult<()> {
        let device = self.device_at(path)?;
        let memory = device
            .as_memory()
            .ok_or_else(|| FsError::NotSupported(path.to_string()))?;
        memory
            .set_content(size)
            .map_err(|_| FsError::NotSupported(path.to_string()))
    }

    /// Read up to `size` bytes at `offset`, clamped to the device size.
    /// Returns empty at or past the end of the device.
    pub fn read_at(&self, path: &str, size: u32, offset: i64) -> FsResult<Vec<u8>> {
        let device = self.device_at(path)?;
        let len = device.size();
        let offset = offset.max(0) as u64;
        if offset >= len {
            return Ok(Vec::new());
        }
        let n = u64::from(size).min(len - offset) as usize;
        let mut buf = vec![0u8; n];
        let read = device
            .read(&mut buf, offset)
            .map_err(|e| FsError::Io(e.to_string()))?;
        if read != n {
            warn!(path, requested = n, read, "short read from device");
            return Err(FsError::Io(format!(
                "short read: wanted {n} bytes, got {read}"
            )));
        }
        Ok(buf)
    }

    /// Write `data` at `offset`, clamped to the device size. Returns the
    /// byte count actually forwarded, 0 at or past the end.
    pub fn write_at(&self, path: &str, data: &[u8], offset: i64) -> FsResult<usize> {
        let device = self.device_at(path)?;
        if device.read_only() {
            return Err(FsError::ReadOnly(path.to_string()));
        }
        let len = device.size();
        let offset = offset.max(0) as u64;
        if offset >= len {
            return Ok(0);
        }
        let n = (data.len() as u64).min(len - offset) as usize;
        let written = device
            .write(&data[..n], offset)
            .map_err(|e| FsError::Io(e.to_string()))?;
        if written != n {
            warn!(path, requested = n, written, "short write to device");
            return Err(FsError::Io(format!(
                "short write: wanted {n} bytes, accepted {written}"
            )));
        }
        Ok(n)
    }

    /// Drop a device from the registry and the inode table.
    pub fn remove_entry(&self, path: &str) -> FsResult<()> {
        let device = self
            .registry
            .remove(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let mut inodes = self.inodes.lock();
        inodes.forget_path(path);
        if let BlockDevice::Network(net) = device.as_ref() {
            inodes.forget_path(&format!("/{}", net.target()));
        }
        Ok(())
    }

    fn device_at(&self, path: &str) -> FsResult<Arc<BlockDevice>> {
        self.registry
            .lookup(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn ino_for(&self, path: &str) -> u64 {
        self.inodes.lock().get_or_assign(path)
    }

    fn path_for(&self, ino: u64) -> FsResult<String> {
        self.inodes
            .lock()
            .path_of(ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
    }

    fn fuse_attr(&self, ino: u64, entry: &EntryAttr) -> FileAttr {
        let kind = match entry.kind {
            EntryKind::Directory => FileType::Directory,
            EntryKind::RegularFile => FileType::RegularFile,
            EntryKind::Symlink => FileType::Symlink,
        };
        FileAttr {
            ino,
            size: entry.size,
            blocks: entry.size.div_ceil(512),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm: entry.perm,
            nlink: entry.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }
}

impl Filesystem for BlockFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let path = format!("/{}", name.to_string_lossy());
        match self.attr_of(&path) {
            Ok(entry) => {
                let ino = self.ino_for(&path);
                reply.entry(&TTL, &self.fuse_attr(ino, &entry), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = if ino == ROOT_INO {
            "/".to_string()
        } else {
            match self.path_for(ino) {
                Ok(path) => path,
                Err(e) => {
                    reply.error(e.errno());
                    return;
                }
            }
        };
        match self.attr_of(&path) {
            Ok(entry) => reply.attr(&TTL, &self.fuse_attr(ino, &entry)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_for(ino) {
            Ok(path) => path,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        if let Some(size) = size {
            debug!(%path, size, "truncate");
            if let Err(e) = self.resize(&path, size) {
                reply.error(e.errno());
                return;
            }
        }
        match self.attr_of(&path) {
            Ok(entry) => reply.attr(&TTL, &self.fuse_attr(ino, &entry)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let result = self.path_for(ino).and_then(|path| self.link_target(&path));
        match result {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let linkpath = format!("/{}", link_name.to_string_lossy());
        let target = target.to_string_lossy().into_owned();
        debug!(%linkpath, %target, "symlink");
        if let Err(e) = self.link_remote(&target, &linkpath) {
            reply.error(e.errno());
            return;
        }
        match self.attr_of(&linkpath) {
            Ok(entry) => {
                let ino = self.ino_for(&linkpath);
                reply.entry(&TTL, &self.fuse_attr(ino, &entry), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let path = format!("/{}", name.to_string_lossy());
        debug!(%path, "unlink");
        match self.remove_entry(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let result = self
            .path_for(ino)
            .and_then(|path| self.check_open(&path, flags));
        match result {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let path = format!("/{}", name.to_string_lossy());
        let exclusive = flags & libc::O_EXCL != 0;
        debug!(%path, exclusive, "create");
        if let Err(e) = self.create_device(&path, exclusive) {
            reply.error(e.errno());
            return;
        }
        match self.attr_of(&path) {
            Ok(entry) => {
                let ino = self.ino_for(&path);
                reply.created(&TTL, &self.fuse_attr(ino, &entry), 0, 0, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let result = self
            .path_for(ino)
            .and_then(|path| self.read_at(&path, size, offset));
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let result = self
            .path_for(ino)
            .and_then(|path| self.write_at(&path, data, offset));
        match result {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if ino != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ROOT_INO, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
        ];
        for name in self.list_root() {
            let path = format!("/{name}");
            let kind = match self.attr_of(&path) {
                Ok(entry) => match entry.kind {
                    EntryKind::Symlink => FileType::Symlink,
                    _ => FileType::RegularFile,
                },
                Err(_) => continue,
            };
            entries.push((self.ino_for(&path), kind, name));
        }
        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_fs() -> BlockFs {
        BlockFs::new(Arc::new(DeviceRegistry::new()))
    }

    #[test]
    fn test_root_attr() {
        let fs = new_fs();
        let attr = fs.attr_of("/").unwrap();
        assert_eq!(attr.kind, EntryKind::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.nlink, 2);
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let fs = new_fs();
        let err = fs.attr_of("/nope").unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn test_inode_assignment_is_stable() {
        let fs = new_fs();
        fs.create_device("/m", false).unwrap();
        let first = fs.ino_for("/m");
        assert_eq!(fs.ino_for("/m"), first);
        assert_eq!(fs.path_for(first).unwrap(), "/m");
    }

    #[test]
    fn test_remove_entry_forgets_inode() {
        let fs = new_fs();
        fs.create_device("/m", false).unwrap();
        let ino = fs.ino_for("/m");
        fs.remove_entry("/m").unwrap();
        assert!(fs.path_for(ino).is_err());
        assert_eq!(fs.remove_entry("/m").unwrap_err().errno(), libc::ENOENT);
    }
}
