//! blockfs - the filesystem frontend
//!
//! Mounts the virtual block-device directory. Create a regular file and
//! truncate it to get a memory device; symlink a server target to get a
//! network device:
//!
//! ```bash
//! blockfs /mnt/blockfs &
//! truncate -s 16M /mnt/blockfs/scratch          # memory device
//! ln -s target /mnt/blockfs/remote              # network device
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fuser::MountOption;
use tracing::info;

use blockfs::fs::BlockFs;
use blockfs::registry::DeviceRegistry;

/// blockfs filesystem frontend
#[derive(Parser, Debug)]
#[command(name = "blockfs")]
#[command(about = "Mounts a directory of virtual block devices")]
struct Args {
    /// Directory to mount the filesystem on
    mountpoint: PathBuf,

    /// Unmount automatically when the process exits
    #[arg(long)]
    auto_unmount: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    blockfs::logging::init(&args.log_level);

    let registry = Arc::new(DeviceRegistry::new());
    let fs = BlockFs::new(registry);

    let mut options = vec![MountOption::FSName("blockfs".to_string())];
    if args.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }

    info!(mountpoint = %args.mountpoint.display(), "mounting blockfs");

    if let Err(e) = fuser::mount2(fs, &args.mountpoint, &options) {
        eprintln!("Mount failed: {}", e);
        std::process::exit(1);
    }
}
