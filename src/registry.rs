//! Device registry.
//!
//! Process-wide mapping from filesystem path to device. A network device
//! is additionally indexed under `"/" + target` so directory resolution
//! can reach it under either name; the two-map insert and removal are
//! atomic under one lock. Enumeration (for readdir) uses the primary map
//! only, so a network device lists under its linkpath, not its alias.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::device::{BlockDevice, MemoryDevice, NetworkDevice};

/// Registry error type
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device already registered at {0}")]
    AlreadyExists(String),
}

#[derive(Default)]
struct Maps {
    primary: HashMap<String, Arc<BlockDevice>>,
    aliases: HashMap<String, Arc<BlockDevice>>,
}

/// Path-keyed device table. Path keys begin with `/`; the synthetic root
/// `/` is never an entry.
pub struct DeviceRegistry {
    maps: RwLock<Maps>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
        }
    }

    /// Register a fresh, unsized memory device under `path`.
    pub fn add_memory(&self, path: &str) -> Result<Arc<BlockDevice>, RegistryError> {
        let mut maps = self.maps.write();
        if maps.primary.contains_key(path) || maps.aliases.contains_key(path) {
            return Err(RegistryError::AlreadyExists(path.to_string()));
        }
        let device = Arc::new(BlockDevice::Memory(MemoryDevice::new()));
        maps.primary.insert(path.to_string(), device.clone());
        Ok(device)
    }

    /// Register a connected network device under `path` and under its
    /// `"/" + target` alias. Both insertions happen under one lock.
    pub fn add_network(
        &self,
        path: &str,
        device: NetworkDevice,
    ) -> Result<Arc<BlockDevice>, RegistryError> {
        let alias = format!("/{}", device.target());
        let mut maps = self.maps.write();
        if maps.primary.contains_key(path) || maps.aliases.contains_key(path) {
            return Err(RegistryError::AlreadyExists(path.to_string()));
        }
        let device = Arc::new(BlockDevice::Network(device));
        maps.primary.insert(path.to_string(), device.clone());
        maps.aliases.insert(alias, device.clone());
        Ok(device)
    }

    /// Resolve `path`, probing the primary map first, then the alias map.
    pub fn lookup(&self, path: &str) -> Option<Arc<BlockDevice>> {
        let maps = self.maps.read();
        maps.primary
            .get(path)
            .or_else(|| maps.aliases.get(path))
            .cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        let maps = self.maps.read();
        maps.primary.contains_key(path) || maps.aliases.contains_key(path)
    }

    /// Primary-map keys, sorted for stable directory listings.
    pub fn enumerate(&self) -> Vec<String> {
        let maps = self.maps.read();
        let mut paths: Vec<String> = maps.primary.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Remove the entry at `path` (primary name or alias) from both maps.
    pub fn remove(&self, path: &str) -> Option<Arc<BlockDevice>> {
        let mut maps = self.maps.write();
        let device = match maps.primary.remove(path) {
            Some(device) => device,
            None => {
                // An alias was named; drop the primary entry owning it.
                let device = maps.aliases.get(path).cloned()?;
                let primary_key = maps
                    .primary
                    .iter()
                    .find(|(_, d)| Arc::ptr_eq(d, &device))
                    .map(|(k, _)| k.clone())?;
                maps.primary.remove(&primary_key)?
            }
        };
        if let BlockDevice::Network(net) = device.as_ref() {
            maps.aliases.remove(&format!("/{}", net.target()));
        }
        Some(device)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerInfo;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener};
    use std::thread;
    use zerocopy::IntoBytes;

    fn fake_block_server(size: u32, read_only: bool) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = stream.write_all(ServerInfo::new(size, read_only).as_bytes());
                let mut buf = [0u8; 16];
                let _ = stream.read(&mut buf);
            }
        });
        addr
    }

    #[test]
    fn test_memory_device_lifecycle() {
        let registry = DeviceRegistry::new();
        assert!(!registry.exists("/m"));
        assert!(registry.lookup("/m").is_none());

        registry.add_memory("/m").unwrap();
        assert!(registry.exists("/m"));
        assert!(registry.lookup("/m").is_some());
        assert_eq!(registry.enumerate(), vec!["/m".to_string()]);

        assert!(registry.remove("/m").is_some());
        assert!(!registry.exists("/m"));
        assert!(registry.remove("/m").is_none());
    }

    #[test]
    fn test_duplicate_registration_refused() {
        let registry = DeviceRegistry::new();
        registry.add_memory("/m").unwrap();
        assert_eq!(
            registry.add_memory("/m").unwrap_err(),
            RegistryError::AlreadyExists("/m".to_string())
        );
    }

    #[test]
    fn test_exists_iff_lookup() {
        let registry = DeviceRegistry::new();
        registry.add_memory("/a").unwrap();
        for path in ["/a", "/b"] {
            assert_eq!(registry.exists(path), registry.lookup(path).is_some());
        }
    }

    #[test]
    fn test_network_device_dual_keys() {
        let addr = fake_block_server(10, false);
        let device = NetworkDevice::connect_to(addr, "target").unwrap();

        let registry = DeviceRegistry::new();
        registry.add_network("/n", device).unwrap();

        let by_link = registry.lookup("/n").unwrap();
        let by_alias = registry.lookup("/target").unwrap();
        assert!(Arc::ptr_eq(&by_link, &by_alias));
        assert!(registry.exists("/target"));

        // Directory listings show only the linkpath.
        assert_eq!(registry.enumerate(), vec!["/n".to_string()]);
    }

    #[test]
    fn test_network_removal_clears_both_keys() {
        let addr = fake_block_server(10, false);
        let device = NetworkDevice::connect_to(addr, "target").unwrap();

        let registry = DeviceRegistry::new();
        registry.add_network("/n", device).unwrap();

        assert!(registry.remove("/n").is_some());
        assert!(!registry.exists("/n"));
        assert!(!registry.exists("/target"));
    }

    #[test]
    fn test_removal_by_alias_clears_both_keys() {
        let addr = fake_block_server(10, false);
        let device = NetworkDevice::connect_to(addr, "target").unwrap();

        let registry = DeviceRegistry::new();
        registry.add_network("/n", device).unwrap();

        assert!(registry.remove("/target").is_some());
        assert!(!registry.exists("/n"));
        assert!(!registry.exists("/target"));
    }

    #[test]
    fn test_linkpath_colliding_with_alias_refused() {
        let addr = fake_block_server(10, false);
        let device = NetworkDevice::connect_to(addr, "target").unwrap();

        let registry = DeviceRegistry::new();
        registry.add_network("/n", device).unwrap();
        assert!(registry.add_memory("/target").is_err());
    }
}
