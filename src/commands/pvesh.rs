//! `pvesh` queries
//!
//! Read-only API calls against the local node. Everything is requested with
//! `--output-format json` and deserialized with serde.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::CommandRunner;

/// A storage pool as reported by `/nodes/<node>/storage`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePool {
    pub name: String,
    /// Backend type (dir, lvmthin, rbd, zfspool, ...)
    pub kind: String,
    pub active: bool,
    /// Content-type tags (images, iso, vztmpl, backup, ...)
    pub content: Vec<String>,
}

impl StoragePool {
    pub fn supports(&self, content: &str) -> bool {
        self.content.iter().any(|c| c == content)
    }
}

/// A network bridge on the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub name: String,
    pub active: bool,
}

/// A stored volume as reported by `/nodes/<node>/storage/<storage>/content`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub volid: String,
    pub size: u64,
}

#[derive(Deserialize)]
struct RawStorage {
    storage: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    active: Option<u8>,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct RawInterface {
    iface: String,
    #[serde(default)]
    active: Option<u8>,
}

#[derive(Deserialize)]
struct RawVolume {
    volid: String,
    #[serde(default)]
    size: u64,
}

fn get_json(runner: &dyn CommandRunner, path: &str, extra: &[&str]) -> Result<String> {
    let mut args = vec!["get", path];
    args.extend_from_slice(extra);
    args.extend_from_slice(&["--output-format", "json"]);
    runner
        .run("pvesh", &args)
        .with_context(|| format!("pvesh get {} failed", path))
}

/// Ask the cluster for the next free VM id
pub fn next_vmid(runner: &dyn CommandRunner) -> Result<u32> {
    let stdout = get_json(runner, "/cluster/nextid", &[])?;
    parse_nextid(&stdout)
}

fn parse_nextid(stdout: &str) -> Result<u32> {
    let raw = stdout.trim().trim_matches('"');
    raw.parse::<u32>()
        .with_context(|| format!("Unexpected next VM id output: {:?}", raw))
}

/// List every storage pool configured on `node`
pub fn storages(runner: &dyn CommandRunner, node: &str) -> Result<Vec<StoragePool>> {
    let stdout = get_json(runner, &format!("/nodes/{}/storage", node), &[])?;
    parse_storages(&stdout)
}

fn parse_storages(stdout: &str) -> Result<Vec<StoragePool>> {
    let raw: Vec<RawStorage> =
        serde_json::from_str(stdout).context("Failed to parse storage list")?;

    Ok(raw
        .into_iter()
        .map(|s| StoragePool {
            name: s.storage,
            kind: s.kind,
            active: s.active == Some(1),
            content: s
                .content
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        })
        .collect())
}

/// List the bridges configured on `node`
pub fn bridges(runner: &dyn CommandRunner, node: &str) -> Result<Vec<Bridge>> {
    let stdout = get_json(
        runner,
        &format!("/nodes/{}/network", node),
        &["--type", "bridge"],
    )?;
    let raw: Vec<RawInterface> =
        serde_json::from_str(&stdout).context("Failed to parse network list")?;

    Ok(raw
        .into_iter()
        .map(|i| Bridge {
            name: i.iface,
            active: i.active == Some(1),
        })
        .collect())
}

/// List volumes of one content type on a storage pool
pub fn storage_content(
    runner: &dyn CommandRunner,
    node: &str,
    storage: &str,
    content: &str,
) -> Result<Vec<Volume>> {
    let stdout = get_json(
        runner,
        &format!("/nodes/{}/storage/{}/content", node, storage),
        &["--content", content],
    )?;
    let raw: Vec<RawVolume> =
        serde_json::from_str(&stdout).context("Failed to parse storage content")?;

    Ok(raw
        .into_iter()
        .map(|v| Volume {
            volid: v.volid,
            size: v.size,
        })
        .collect())
}
