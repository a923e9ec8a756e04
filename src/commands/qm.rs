//! `qm` operations
//!
//! Wrappers around the Proxmox VM manager used for existence checks and
//! the individual provisioning calls.

use super::{CommandError, CommandRunner};

/// Check whether `qm` is on PATH, i.e. we are running on a Proxmox node
pub fn is_available(runner: &dyn CommandRunner) -> bool {
    runner.run("which", &["qm"]).is_ok()
}

/// Check whether a VM with this id exists (`qm status` succeeds only then)
pub fn exists(runner: &dyn CommandRunner, vmid: u32) -> bool {
    runner.run("qm", &["status", &vmid.to_string()]).is_ok()
}

/// Create an empty VM shell with one virtio NIC on `bridge`
pub fn create(
    runner: &dyn CommandRunner,
    vmid: u32,
    name: &str,
    cores: u32,
    memory_mb: u32,
    bridge: &str,
) -> Result<(), CommandError> {
    let net0 = format!("virtio,bridge={}", bridge);
    runner.run(
        "qm",
        &[
            "create",
            &vmid.to_string(),
            "--name",
            name,
            "--cores",
            &cores.to_string(),
            "--memory",
            &memory_mb.to_string(),
            "--net0",
            &net0,
        ],
    )?;
    Ok(())
}

/// Set a single VM option (`qm set <vmid> --<option> <value>`)
pub fn set(
    runner: &dyn CommandRunner,
    vmid: u32,
    option: &str,
    value: &str,
) -> Result<(), CommandError> {
    let flag = format!("--{}", option);
    runner.run("qm", &["set", &vmid.to_string(), &flag, value])?;
    Ok(())
}
