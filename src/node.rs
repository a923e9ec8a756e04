//! Node inventory
//!
//! Best-effort, read-only view of the local Proxmox node. Query failures are
//! logged and degraded to empty results or fallbacks; only the next-VM-id
//! lookup is reported to the caller because no safe fallback id exists.

use anyhow::Result;

use crate::commands::pvesh::{self, Bridge, StoragePool};
use crate::commands::{qm, Runner};

/// Bridge offered when the node's bridge listing cannot be read
pub const FALLBACK_BRIDGE: &str = "vmbr0";

/// Content tag of storages that can hold VM disks
pub const CONTENT_IMAGES: &str = "images";

/// Content tag of storages that can hold installation ISOs
pub const CONTENT_ISO: &str = "iso";

#[derive(Clone)]
pub struct NodeInventory {
    runner: Runner,
    node: String,
}

impl NodeInventory {
    /// Create an inventory for the local node.
    ///
    /// `node` overrides the node name; otherwise it is taken from `hostname`,
    /// falling back to `localhost`.
    pub fn new(runner: Runner, node: Option<&str>) -> Self {
        let node = match node {
            Some(n) => n.to_string(),
            None => runner
                .run("hostname", &[])
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "localhost".to_string()),
        };
        tracing::debug!(%node, "node inventory ready");
        Self { runner, node }
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn is_proxmox_node(&self) -> bool {
        qm::is_available(self.runner.as_ref())
    }

    pub fn next_vmid(&self) -> Result<u32> {
        pvesh::next_vmid(self.runner.as_ref())
    }

    pub fn vmid_exists(&self, vmid: u32) -> bool {
        qm::exists(self.runner.as_ref(), vmid)
    }

    /// Active storages that can hold VM disks
    pub fn vm_storages(&self) -> Vec<StoragePool> {
        self.storages_with(CONTENT_IMAGES)
    }

    /// Active storages that can hold ISO images
    pub fn iso_storages(&self) -> Vec<StoragePool> {
        self.storages_with(CONTENT_ISO)
    }

    fn storages_with(&self, content: &str) -> Vec<StoragePool> {
        match pvesh::storages(self.runner.as_ref(), &self.node) {
            Ok(pools) => pools
                .into_iter()
                .filter(|p| p.active && p.supports(content))
                .collect(),
            Err(e) => {
                tracing::warn!(content, "storage listing failed: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Bridges on the node, or the single default bridge if they cannot be listed
    pub fn bridges(&self) -> Vec<Bridge> {
        match pvesh::bridges(self.runner.as_ref(), &self.node) {
            Ok(bridges) if !bridges.is_empty() => bridges,
            Ok(_) => fallback_bridges(),
            Err(e) => {
                tracing::warn!("bridge listing failed: {:#}", e);
                fallback_bridges()
            }
        }
    }

    /// ISO volumes on one storage as `(volid, size)` pairs; empty on failure
    pub fn iso_volumes(&self, storage: &str) -> Vec<(String, u64)> {
        match pvesh::storage_content(self.runner.as_ref(), &self.node, storage, CONTENT_ISO) {
            Ok(vols) => vols.into_iter().map(|v| (v.volid, v.size)).collect(),
            Err(e) => {
                tracing::warn!(storage, "ISO listing failed: {:#}", e);
                Vec::new()
            }
        }
    }
}

fn fallback_bridges() -> Vec<Bridge> {
    vec![Bridge {
        name: FALLBACK_BRIDGE.to_string(),
        active: true,
    }]
}
