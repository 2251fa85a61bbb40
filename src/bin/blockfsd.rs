//! blockfsd - the backing-device server
//!
//! Serves a local disk image or block device to blockfs clients over TCP.
//!
//! # Usage
//!
//! ```bash
//! blockfsd /var/lib/images/disk.img
//! blockfsd /dev/sdb --read-only --port 22000
//! ```

use std::net::TcpListener;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use blockfs::config::ServerConfig;
use blockfs::server::{self, BackingDevice};

/// blockfs backing-device server
#[derive(Parser, Debug)]
#[command(name = "blockfsd")]
#[command(about = "Serves a local file or block device to blockfs clients over TCP")]
struct Args {
    /// Backing file or block device to serve
    device: PathBuf,

    /// Refuse writes and announce the device as read-only
    #[arg(long)]
    read_only: bool,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error; overrides the config file)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match ServerConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    blockfs::logging::init(&config.log_level);

    info!(device = %args.device.display(), read_only = args.read_only, "starting blockfsd");

    let device = match BackingDevice::open(&args.device, args.read_only) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Failed to open backing device: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind((config.bind_addr.as_str(), config.port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}:{}: {}", config.bind_addr, config.port, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server::run(device, listener) {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
