//! `pvesm` operations on individual volumes

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use super::CommandRunner;

/// Resolve a volume id to its filesystem path on this node
pub fn path(runner: &dyn CommandRunner, volid: &str) -> Result<PathBuf> {
    let stdout = runner
        .run("pvesm", &["path", volid])
        .with_context(|| format!("Failed to resolve path of {}", volid))?;

    let path = stdout.trim();
    if path.is_empty() {
        bail!("pvesm returned no path for {}", volid);
    }
    Ok(PathBuf::from(path))
}

/// Delete a volume
pub fn free(runner: &dyn CommandRunner, volid: &str) -> Result<()> {
    runner
        .run("pvesm", &["free", volid])
        .with_context(|| format!("Failed to delete {}", volid))?;
    Ok(())
}
