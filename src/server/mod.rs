//! Backing-device server.
//!
//! Listens on a TCP port and serves the backing device to one client at a
//! time: clients are accepted serially and each connection is handled to
//! completion before the next accept. The backing device's own
//! shared/exclusive lock keeps the handler logic correct if accepts ever
//! move to one thread per client.

use std::net::TcpListener;

use tracing::{info, warn};

pub mod backing;
pub mod handler;

pub use backing::{BackingDevice, ServerError, ServerResult};

/// Accept clients forever, handling each connection to completion.
pub fn run(device: BackingDevice, listener: TcpListener) -> ServerResult<()> {
    info!(
        addr = %listener.local_addr()?,
        size = device.size(),
        read_only = device.read_only(),
        "listening for clients"
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                info!(%peer, "new client");
                match handler::handle_client(stream, &device) {
                    Ok(()) => info!(%peer, "client session ended"),
                    Err(e) => warn!(%peer, error = %e, "client session aborted"),
                }
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
    Ok(())
}
