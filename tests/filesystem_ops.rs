//! End-to-end filesystem scenarios at the adapter level.
//!
//! These drive the same code paths the FUSE callbacks use, without a
//! kernel mount: device creation and sizing, symlink-backed network
//! devices against a live server, permission checks, and the EOF
//! clamping rules.

mod common;

use std::net::TcpListener;
use std::sync::Arc;

use blockfs::fs::{BlockFs, EntryKind, FsError};
use blockfs::registry::DeviceRegistry;

use common::spawn_server;

fn memory_fs() -> BlockFs {
    BlockFs::new(Arc::new(DeviceRegistry::new()))
}

#[test]
fn memory_device_create_truncate_write_read() {
    let fs = memory_fs();

    fs.create_device("/m", false).unwrap();
    fs.resize("/m", 16).unwrap();

    assert_eq!(fs.write_at("/m", b"HELLOWORLD______", 0).unwrap(), 16);
    assert_eq!(fs.read_at("/m", 16, 0).unwrap(), b"HELLOWORLD______");

    let attr = fs.attr_of("/m").unwrap();
    assert_eq!(attr.kind, EntryKind::RegularFile);
    assert_eq!(attr.size, 16);
    assert_eq!(attr.perm, 0o644);
    assert_eq!(fs.list_root(), vec!["m".to_string()]);
}

#[test]
fn exclusive_create_clash() {
    let fs = memory_fs();
    fs.create_device("/m", false).unwrap();

    // Plain create of an existing entry is fine; exclusive is not.
    fs.create_device("/m", false).unwrap();
    let err = fs.create_device("/m", true).unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists(_)));
    assert_eq!(err.errno(), libc::EEXIST);
}

#[test]
fn memory_device_resize_refused() {
    let fs = memory_fs();
    fs.create_device("/m", false).unwrap();
    fs.resize("/m", 16).unwrap();

    let err = fs.resize("/m", 32).unwrap_err();
    assert_eq!(err.errno(), libc::EPERM);
    assert_eq!(fs.attr_of("/m").unwrap().size, 16);
}

#[test]
fn resize_unknown_path_is_not_found() {
    let fs = memory_fs();
    assert_eq!(fs.resize("/nope", 16).unwrap_err().errno(), libc::ENOENT);
}

#[test]
fn readlink_on_memory_device_refused() {
    let fs = memory_fs();
    fs.create_device("/m", false).unwrap();
    assert_eq!(fs.link_target("/m").unwrap_err().errno(), libc::EPERM);
}

#[test]
fn reads_clamp_at_end_of_device() {
    let fs = memory_fs();
    fs.create_device("/m", false).unwrap();
    fs.resize("/m", 16).unwrap();
    fs.write_at("/m", b"0123456789abcdef", 0).unwrap();

    // Spanning the end returns the truncated prefix.
    assert_eq!(fs.read_at("/m", 100, 10).unwrap(), b"abcdef");

    // At or past the end reads nothing.
    assert!(fs.read_at("/m", 4, 16).unwrap().is_empty());
    assert!(fs.read_at("/m", 4, 100).unwrap().is_empty());
}

#[test]
fn writes_clamp_at_end_of_device() {
    let fs = memory_fs();
    fs.create_device("/m", false).unwrap();
    fs.resize("/m", 16).unwrap();

    assert_eq!(fs.write_at("/m", b"0123456789", 10).unwrap(), 6);
    assert_eq!(fs.write_at("/m", b"xx", 16).unwrap(), 0);
    assert_eq!(fs.read_at("/m", 6, 10).unwrap(), b"012345");
}

#[test]
fn network_device_symlink_and_read() {
    let (addr, _file) = spawn_server(b"hello sir!", true);
    let fs = BlockFs::with_server_addr(Arc::new(DeviceRegistry::new()), addr);

    fs.link_remote("target", "/n").unwrap();

    let attr = fs.attr_of("/n").unwrap();
    assert_eq!(attr.kind, EntryKind::Symlink);
    assert_eq!(attr.size, 10);
    assert_eq!(attr.perm, 0o444);

    assert_eq!(fs.read_at("/n", 10, 0).unwrap(), b"hello sir!");
    assert_eq!(fs.link_target("/n").unwrap(), "target");

    // The target alias resolves to the same device as a regular file and
    // stays out of the directory listing.
    let alias = fs.attr_of("/target").unwrap();
    assert_eq!(alias.kind, EntryKind::RegularFile);
    assert_eq!(alias.size, 10);
    assert_eq!(fs.list_root(), vec!["n".to_string()]);
}

#[test]
fn network_device_write_forwarded() {
    let (addr, _file) = spawn_server(b"hello sir!", false);
    let fs = BlockFs::with_server_addr(Arc::new(DeviceRegistry::new()), addr);

    fs.link_remote("target", "/n").unwrap();
    assert_eq!(fs.write_at("/n", b"crazy", 0).unwrap(), 5);
    assert_eq!(fs.read_at("/n", 10, 0).unwrap(), b"crazy sir!");
}

#[test]
fn read_only_network_device_rejections() {
    let (addr, _file) = spawn_server(b"hello sir!", true);
    let fs = BlockFs::with_server_addr(Arc::new(DeviceRegistry::new()), addr);

    fs.link_remote("target", "/n").unwrap();

    // Opening for writing is refused up front.
    let err = fs.check_open("/n", libc::O_RDWR).unwrap_err();
    assert_eq!(err.errno(), libc::EACCES);
    let err = fs.check_open("/n", libc::O_WRONLY).unwrap_err();
    assert_eq!(err.errno(), libc::EACCES);
    fs.check_open("/n", libc::O_RDONLY).unwrap();

    // A write that slips past open is refused per call.
    let err = fs.write_at("/n", b"crazy", 0).unwrap_err();
    assert_eq!(err.errno(), libc::EBADF);

    // Truncate is a memory-device operation.
    assert_eq!(fs.resize("/n", 4).unwrap_err().errno(), libc::EPERM);
}

#[test]
fn symlink_over_existing_entry_refused() {
    let (addr, _file) = spawn_server(b"hello sir!", true);
    let fs = BlockFs::with_server_addr(Arc::new(DeviceRegistry::new()), addr);

    fs.create_device("/n", false).unwrap();
    let err = fs.link_remote("target", "/n").unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);
}

#[test]
fn symlink_without_server_is_io_error() {
    // Grab an ephemeral port and close it again so the connection is
    // refused.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let fs = BlockFs::with_server_addr(Arc::new(DeviceRegistry::new()), addr);

    let err = fs.link_remote("target", "/n").unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
    assert!(fs.attr_of("/n").is_err());
}

#[test]
fn unlink_removes_network_device_and_alias() {
    let (addr, _file) = spawn_server(b"hello sir!", true);
    let fs = BlockFs::with_server_addr(Arc::new(DeviceRegistry::new()), addr);

    fs.link_remote("target", "/n").unwrap();
    fs.remove_entry("/n").unwrap();

    assert_eq!(fs.attr_of("/n").unwrap_err().errno(), libc::ENOENT);
    assert_eq!(fs.attr_of("/target").unwrap_err().errno(), libc::ENOENT);
    assert!(fs.list_root().is_empty());
}

#[test]
fn open_unknown_path_is_not_found() {
    let fs = memory_fs();
    assert_eq!(
        fs.check_open("/nope", libc::O_RDONLY).unwrap_err().errno(),
        libc::ENOENT
    );
}
