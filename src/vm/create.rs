//! VM provisioning
//!
//! Turns a [`VmSpecification`] into the ordered `qm` calls that create the
//! VM, attach its disk, set the boot order and optionally attach an install
//! ISO. The calls are not atomic: if a later call fails, the VM created by
//! the earlier ones stays on the node. Nothing is rolled back and the final
//! configuration is not verified.

use anyhow::{Context, Result};

use crate::commands::{qm, CommandRunner};
use crate::vm::VmSpecification;

/// Disk slot used for the system disk (plain slot notation works on Ceph too)
pub const DISK_SLOT: &str = "scsi0";
/// Slot used for the install medium
pub const MEDIA_SLOT: &str = "ide2";

/// One provisioning call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionStage {
    Create,
    AttachDisk,
    SetBootOrder,
    AttachIso,
}

impl ProvisionStage {
    pub fn label(&self) -> &'static str {
        match self {
            ProvisionStage::Create => "Creating VM",
            ProvisionStage::AttachDisk => "Attaching disk",
            ProvisionStage::SetBootOrder => "Setting boot order",
            ProvisionStage::AttachIso => "Attaching ISO",
        }
    }
}

/// Stages that will run for this specification, in order
pub fn stages(spec: &VmSpecification) -> Vec<ProvisionStage> {
    let mut stages = vec![
        ProvisionStage::Create,
        ProvisionStage::AttachDisk,
        ProvisionStage::SetBootOrder,
    ];
    if spec.iso_volid.is_some() {
        stages.push(ProvisionStage::AttachIso);
    }
    stages
}

/// Provision a VM, reporting `(stage number, total, label)` before each call.
///
/// Consumes the specification. The first failing call aborts the sequence.
pub fn create_vm<F>(runner: &dyn CommandRunner, spec: VmSpecification, mut progress: F) -> Result<()>
where
    F: FnMut(usize, usize, &str),
{
    let stages = stages(&spec);
    let total = stages.len();

    for (i, stage) in stages.iter().enumerate() {
        progress(i + 1, total, stage.label());
        tracing::info!(vmid = spec.vmid, stage = stage.label(), "provisioning");

        run_stage(runner, &spec, stage).with_context(|| {
            format!(
                "VM creation failed while {} (VM {} may be partially created)",
                stage.label().to_lowercase(),
                spec.vmid
            )
        })?;
    }

    tracing::info!(vmid = spec.vmid, name = %spec.name, "VM created");
    Ok(())
}

fn run_stage(runner: &dyn CommandRunner, spec: &VmSpecification, stage: &ProvisionStage) -> Result<()> {
    match stage {
        ProvisionStage::Create => qm::create(
            runner,
            spec.vmid,
            &spec.name,
            spec.cores,
            spec.memory_mb,
            &spec.bridge,
        )?,
        ProvisionStage::AttachDisk => {
            let disk = format!("{}:{}", spec.storage, spec.disk_gb);
            qm::set(runner, spec.vmid, DISK_SLOT, &disk)?
        }
        ProvisionStage::SetBootOrder => {
            let order = format!("order={}", DISK_SLOT);
            qm::set(runner, spec.vmid, "boot", &order)?
        }
        ProvisionStage::AttachIso => {
            if let Some(ref iso) = spec.iso_volid {
                let media = format!("{},media=cdrom", iso);
                qm::set(runner, spec.vmid, MEDIA_SLOT, &media)?
            }
        }
    }
    Ok(())
}
