//! Shared helpers for the integration tests.

use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::thread;

use tempfile::NamedTempFile;

use blockfs::server::{self, BackingDevice};

/// Spawn a real block server on an ephemeral port, backed by a temp file
/// with the given contents. The temp file handle keeps the backing file
/// alive for the duration of the test.
pub fn spawn_server(contents: &[u8], read_only: bool) -> (SocketAddr, NamedTempFile) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();

    let device = BackingDevice::open(file.path(), read_only).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let _ = server::run(device, listener);
    });

    (addr, file)
}
