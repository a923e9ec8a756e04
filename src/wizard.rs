//! VM creation wizard state machine
//!
//! Steps run in a fixed order:
//! Welcome → Identity → Compute → Storage → Network → ImageSelect → Summary
//! → Executing → Success | Error. Cancel at the Summary step is the only
//! early exit. Each step variant carries exactly the fields collected so far,
//! so a step cannot be reached without the ones before it.
//!
//! The controller never blocks on the node for listings. Steps that need data
//! queue a [`Task`]; the caller runs it and feeds the [`TaskResult`] back
//! through [`WizardController::apply`].

use crate::commands::pvesh::{Bridge, StoragePool};
use crate::config::{ConfigKey, ConfigStore, Preferences};
use crate::iso::IsoImage;
use crate::node::{NodeInventory, FALLBACK_BRIDGE};
use crate::vm::spec::{self, VmSpecification};

pub const DEFAULT_CORES: u32 = 2;
pub const DEFAULT_MEMORY_MB: u32 = 2048;
pub const DEFAULT_DISK_GB: u32 = 20;
/// Storage offered when no storage pools can be listed and none is configured
pub const FALLBACK_VM_STORAGE: &str = "local-lvm";

pub const NOT_A_PVE_NODE: &str = "This tool must be run on a Proxmox VE node";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub vmid: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compute {
    pub cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
}

/// Wizard state; each variant holds the specification fields gathered so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Welcome,
    Identity,
    Compute {
        identity: Identity,
    },
    Storage {
        identity: Identity,
        compute: Compute,
    },
    Network {
        identity: Identity,
        compute: Compute,
        storage: String,
    },
    ImageSelect {
        identity: Identity,
        compute: Compute,
        storage: String,
        bridge: String,
    },
    Summary {
        spec: VmSpecification,
    },
    Executing {
        vmid: u32,
        name: String,
        stage: String,
    },
    Success {
        vmid: u32,
        name: String,
    },
    Error {
        message: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Welcome,
    Identity,
    Compute,
    Storage,
    Network,
    ImageSelect,
    Summary,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Welcome => StepKind::Welcome,
            Step::Identity => StepKind::Identity,
            Step::Compute { .. } => StepKind::Compute,
            Step::Storage { .. } => StepKind::Storage,
            Step::Network { .. } => StepKind::Network,
            Step::ImageSelect { .. } => StepKind::ImageSelect,
            Step::Summary { .. } => StepKind::Summary,
            Step::Executing { .. } => StepKind::Executing,
            Step::Success { .. } => StepKind::Success,
            Step::Error { .. } => StepKind::Error,
            Step::Cancelled => StepKind::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Success { .. } | Step::Error { .. } | Step::Cancelled)
    }
}

impl StepKind {
    /// Position in the interactive sequence (1-7), if this is an interactive step
    pub fn number(&self) -> Option<u8> {
        match self {
            StepKind::Welcome => Some(1),
            StepKind::Identity => Some(2),
            StepKind::Compute => Some(3),
            StepKind::Storage => Some(4),
            StepKind::Network => Some(5),
            StepKind::ImageSelect => Some(6),
            StepKind::Summary => Some(7),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StepKind::Welcome => "Welcome",
            StepKind::Identity => "Identity",
            StepKind::Compute => "Compute",
            StepKind::Storage => "Storage",
            StepKind::Network => "Network",
            StepKind::ImageSelect => "Installation ISO",
            StepKind::Summary => "Summary",
            StepKind::Executing => "Creating VM",
            StepKind::Success => "Done",
            StepKind::Error => "Error",
            StepKind::Cancelled => "Cancelled",
        }
    }

    /// Message shown while the step's listing is loading
    pub fn loading_message(&self) -> &'static str {
        match self {
            StepKind::Welcome => "Checking environment...",
            StepKind::Storage => "Loading storage pools...",
            StepKind::Network => "Loading network bridges...",
            StepKind::ImageSelect => "Loading ISO files...",
            _ => "Loading...",
        }
    }
}

/// The partial update a step submits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepInput {
    Welcome,
    Identity { vmid: String, name: String },
    Compute { cores: String, memory: String, disk: String },
    Storage(String),
    Network(String),
    Image(Option<String>),
    Confirm,
    Cancel,
}

/// Work a step needs done against the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    CheckEnvironment,
    NextVmid,
    ListVmStorages,
    ListBridges,
    ListImages { storage: Option<String> },
    Provision(VmSpecification),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    Environment(bool),
    NextVmid(Result<u32, String>),
    VmStorages(Vec<StoragePool>),
    Bridges(Vec<Bridge>),
    Images(Vec<IsoImage>),
    ProvisionStage(String),
    Provisioned(Result<(), String>),
}

/// One selectable option of a list step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    pub value: Option<String>,
}

impl Choice {
    fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: Some(value.into()),
        }
    }
}

pub struct WizardController {
    step: Step,
    package: Option<String>,
    defaults: Preferences,
    store: ConfigStore,
    /// The current step is waiting for its listing
    loading: bool,
    pending: Option<Task>,
    choices: Vec<Choice>,
    /// The choices are a stand-in for a listing that came back empty
    unverified: bool,
    suggested_vmid: Option<u32>,
    error: Option<String>,
}

impl WizardController {
    pub fn new(store: ConfigStore, package: Option<String>) -> Self {
        let defaults = store.resolve_defaults(package.as_deref());
        let mut wizard = Self {
            step: Step::Welcome,
            package,
            defaults,
            store,
            loading: false,
            pending: None,
            choices: Vec::new(),
            unverified: false,
            suggested_vmid: None,
            error: None,
        };
        wizard.enter(None);
        wizard
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn kind(&self) -> StepKind {
        self.step.kind()
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn suggested_vmid(&self) -> Option<u32> {
        self.suggested_vmid
    }

    /// Inline validation message for the current step
    pub fn validation_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Take the queued task, if any. Each task is handed out once.
    pub fn take_task(&mut self) -> Option<Task> {
        self.pending.take()
    }

    /// Resolved defaults for the compute fields, else the built-in ones
    pub fn compute_defaults(&self) -> Compute {
        Compute {
            cores: self.defaults.cores.unwrap_or(DEFAULT_CORES),
            memory_mb: self.defaults.memory.unwrap_or(DEFAULT_MEMORY_MB),
            disk_gb: self.defaults.disk.unwrap_or(DEFAULT_DISK_GB),
        }
    }

    /// Index of the choice matching the resolved default for this step
    pub fn default_choice_index(&self) -> usize {
        let preferred = match self.kind() {
            StepKind::Storage => self.defaults.vm_storage.as_deref(),
            StepKind::Network => self.defaults.bridge.as_deref(),
            _ => None,
        };
        preferred
            .and_then(|p| {
                self.choices
                    .iter()
                    .position(|c| c.value.as_deref() == Some(p))
            })
            .unwrap_or(0)
    }

    pub fn check_vmid(&self, raw: &str, inventory: &NodeInventory) -> Result<u32, String> {
        let vmid = spec::parse_vmid(raw).ok_or_else(|| "Invalid VM ID".to_string())?;
        if inventory.vmid_exists(vmid) {
            return Err("VM ID already in use".to_string());
        }
        Ok(vmid)
    }

    pub fn check_name(&self, raw: &str) -> Result<String, String> {
        if !spec::is_valid_vm_name(raw) {
            return Err("Invalid VM name".to_string());
        }
        Ok(raw.to_string())
    }

    pub fn check_cores(&self, raw: &str) -> Result<u32, String> {
        spec::parse_cores(raw).ok_or_else(|| "Invalid CPU count".to_string())
    }

    pub fn check_memory(&self, raw: &str) -> Result<u32, String> {
        spec::parse_memory(raw).ok_or_else(|| "Invalid memory size".to_string())
    }

    pub fn check_disk(&self, raw: &str) -> Result<u32, String> {
        spec::parse_disk_size(raw).ok_or_else(|| "Invalid disk size".to_string())
    }

    /// Validate one field of the Identity or Compute form.
    ///
    /// The outcome replaces the inline error, so a corrected field clears it.
    pub fn check_field(&mut self, index: usize, raw: &str, inventory: &NodeInventory) -> Result<(), String> {
        let checked = match (self.kind(), index) {
            (StepKind::Identity, 0) => self.check_vmid(raw, inventory).map(drop),
            (StepKind::Identity, 1) => self.check_name(raw).map(drop),
            (StepKind::Compute, 0) => self.check_cores(raw).map(drop),
            (StepKind::Compute, 1) => self.check_memory(raw).map(drop),
            (StepKind::Compute, 2) => self.check_disk(raw).map(drop),
            (kind, _) => Err(format!("No field {} on step {:?}", index, kind)),
        };
        self.error = checked.as_ref().err().cloned();
        checked
    }

    /// Submit the current step's input.
    ///
    /// On success the wizard moves to the next step. On a validation failure
    /// it stays on the current step with the reason recorded as the inline
    /// error, and the same reason is returned.
    pub fn advance(&mut self, input: StepInput, inventory: &NodeInventory) -> Result<(), String> {
        if self.step.is_terminal() || self.kind() == StepKind::Executing {
            return Err("The wizard has finished".to_string());
        }
        if self.loading {
            return Err("Still loading, please wait".to_string());
        }

        let from = self.kind();
        let current = std::mem::replace(&mut self.step, Step::Welcome);
        match self.transition(current, input, inventory) {
            Ok((next, task)) => {
                tracing::debug!(?from, to = ?next.kind(), "wizard advanced");
                self.step = next;
                self.error = None;
                self.enter(task);
                Ok(())
            }
            Err((current, message)) => {
                self.step = current;
                self.error = Some(message.clone());
                Err(message)
            }
        }
    }

    fn transition(
        &self,
        step: Step,
        input: StepInput,
        inventory: &NodeInventory,
    ) -> Result<(Step, Option<Task>), (Step, String)> {
        match (step, input) {
            (Step::Welcome, StepInput::Welcome) => Ok((Step::Identity, None)),

            (Step::Identity, StepInput::Identity { vmid, name }) => {
                let checked = self
                    .check_vmid(&vmid, inventory)
                    .and_then(|vmid| self.check_name(&name).map(|name| Identity { vmid, name }));
                match checked {
                    Ok(identity) => Ok((Step::Compute { identity }, None)),
                    Err(e) => Err((Step::Identity, e)),
                }
            }

            (Step::Compute { identity }, StepInput::Compute { cores, memory, disk }) => {
                let checked = self.check_cores(&cores).and_then(|cores| {
                    let memory_mb = self.check_memory(&memory)?;
                    let disk_gb = self.check_disk(&disk)?;
                    Ok(Compute {
                        cores,
                        memory_mb,
                        disk_gb,
                    })
                });
                match checked {
                    Ok(compute) => Ok((Step::Storage { identity, compute }, None)),
                    Err(e) => Err((Step::Compute { identity }, e)),
                }
            }

            (Step::Storage { identity, compute }, StepInput::Storage(storage)) => {
                if !self.is_choice(&storage) {
                    return Err((
                        Step::Storage { identity, compute },
                        format!("Unknown storage pool: {}", storage),
                    ));
                }
                self.remember(
                    ConfigKey::VmStorage,
                    self.defaults.vm_storage.is_none() && !self.unverified,
                    &storage,
                );
                Ok((
                    Step::Network {
                        identity,
                        compute,
                        storage,
                    },
                    None,
                ))
            }

            (
                Step::Network {
                    identity,
                    compute,
                    storage,
                },
                StepInput::Network(bridge),
            ) => {
                if !self.is_choice(&bridge) {
                    return Err((
                        Step::Network {
                            identity,
                            compute,
                            storage,
                        },
                        format!("Unknown bridge: {}", bridge),
                    ));
                }
                self.remember(
                    ConfigKey::Bridge,
                    self.defaults.bridge.is_none() && !self.unverified,
                    &bridge,
                );
                Ok((
                    Step::ImageSelect {
                        identity,
                        compute,
                        storage,
                        bridge,
                    },
                    None,
                ))
            }

            (
                Step::ImageSelect {
                    identity,
                    compute,
                    storage,
                    bridge,
                },
                StepInput::Image(iso_volid),
            ) => {
                if let Some(ref volid) = iso_volid {
                    if !self.is_choice(volid) {
                        return Err((
                            Step::ImageSelect {
                                identity,
                                compute,
                                storage,
                                bridge,
                            },
                            format!("Unknown ISO: {}", volid),
                        ));
                    }
                    if let Some((iso_storage, _)) = volid.split_once(':') {
                        self.remember(
                            ConfigKey::IsoStorage,
                            self.defaults.iso_storage.is_none(),
                            iso_storage,
                        );
                    }
                }
                let spec = VmSpecification {
                    vmid: identity.vmid,
                    name: identity.name,
                    cores: compute.cores,
                    memory_mb: compute.memory_mb,
                    disk_gb: compute.disk_gb,
                    storage,
                    bridge,
                    iso_volid,
                };
                Ok((Step::Summary { spec }, None))
            }

            (Step::Summary { spec }, StepInput::Confirm) => {
                let next = Step::Executing {
                    vmid: spec.vmid,
                    name: spec.name.clone(),
                    stage: "Creating VM...".to_string(),
                };
                Ok((next, Some(Task::Provision(spec))))
            }

            (Step::Summary { .. }, StepInput::Cancel) => Ok((Step::Cancelled, None)),

            (step, StepInput::Cancel) => {
                Err((step, "Cancel is only available on the summary".to_string()))
            }

            (step, input) => {
                let message = format!("Unexpected input {:?} for step {:?}", input, step.kind());
                Err((step, message))
            }
        }
    }

    fn is_choice(&self, value: &str) -> bool {
        self.choices
            .iter()
            .any(|c| c.value.as_deref() == Some(value))
    }

    /// Persist a choice as the new default if nothing was configured for it
    fn remember(&self, key: ConfigKey, unset: bool, value: &str) {
        if !unset || !self.store.should_save_preferences() {
            return;
        }
        match self.store.set_default(key, value) {
            Ok(()) => tracing::info!(%key, value, "saved preference"),
            Err(e) => tracing::warn!(%key, "failed to save preference: {:#}", e),
        }
    }

    /// Queue the work the new step needs. `task` overrides the default setup.
    fn enter(&mut self, task: Option<Task>) {
        self.choices.clear();
        self.unverified = false;
        let setup = match self.kind() {
            StepKind::Welcome => Some(Task::CheckEnvironment),
            StepKind::Identity => Some(Task::NextVmid),
            StepKind::Storage => Some(Task::ListVmStorages),
            StepKind::Network => Some(Task::ListBridges),
            StepKind::ImageSelect => Some(Task::ListImages {
                storage: self.defaults.iso_storage.clone(),
            }),
            _ => None,
        };

        // Identity takes input while its suggestion loads
        self.loading = setup.is_some() && self.kind() != StepKind::Identity;
        self.pending = task.or(setup);
    }

    /// Feed back the result of a task. Results for a step the wizard has
    /// already left are ignored.
    pub fn apply(&mut self, result: TaskResult) {
        match (self.kind(), result) {
            (StepKind::Welcome, TaskResult::Environment(true)) => {
                tracing::debug!("environment check passed");
                self.loading = false;
            }
            (StepKind::Welcome, TaskResult::Environment(false)) => {
                self.fail(NOT_A_PVE_NODE.to_string());
            }

            (StepKind::Identity, TaskResult::NextVmid(Ok(vmid))) => {
                self.suggested_vmid = Some(vmid);
            }
            (StepKind::Identity, TaskResult::NextVmid(Err(e))) => {
                tracing::warn!("next VM id lookup failed: {}", e);
                self.error = Some("Failed to get next VM ID".to_string());
            }

            (StepKind::Storage, TaskResult::VmStorages(pools)) => {
                self.choices = pools
                    .into_iter()
                    .map(|p| Choice::new(format!("{} ({})", p.name, p.kind), p.name))
                    .collect();
                if self.choices.is_empty() {
                    let name = self
                        .defaults
                        .vm_storage
                        .clone()
                        .unwrap_or_else(|| FALLBACK_VM_STORAGE.to_string());
                    self.choices
                        .push(Choice::new(format!("{} (not verified)", name), name));
                    self.unverified = true;
                }
                self.loading = false;
            }

            (StepKind::Network, TaskResult::Bridges(bridges)) => {
                self.choices = bridges
                    .into_iter()
                    .map(|b| {
                        let label = if b.active {
                            b.name.clone()
                        } else {
                            format!("{} (inactive)", b.name)
                        };
                        Choice::new(label, b.name)
                    })
                    .collect();
                if self.choices.is_empty() {
                    self.choices.push(Choice::new(
                        format!("{} (not verified)", FALLBACK_BRIDGE),
                        FALLBACK_BRIDGE,
                    ));
                    self.unverified = true;
                }
                self.loading = false;
            }

            (StepKind::ImageSelect, TaskResult::Images(images)) => {
                self.choices = std::iter::once(Choice {
                    label: "(No ISO)".to_string(),
                    value: None,
                })
                .chain(
                    images
                        .into_iter()
                        .map(|i| Choice::new(format!("{}  [{}]", i.filename, i.storage), i.volid)),
                )
                .collect();
                self.loading = false;
            }

            (StepKind::Executing, TaskResult::ProvisionStage(stage)) => {
                if let Step::Executing { stage: ref mut s, .. } = self.step {
                    *s = stage;
                }
            }
            (StepKind::Executing, TaskResult::Provisioned(Ok(()))) => {
                if let Step::Executing { vmid, name, .. } = &self.step {
                    let done = Step::Success {
                        vmid: *vmid,
                        name: name.clone(),
                    };
                    self.step = done;
                }
            }
            (StepKind::Executing, TaskResult::Provisioned(Err(message))) => {
                self.fail(message);
            }

            (kind, result) => {
                tracing::debug!(?kind, ?result, "ignoring stale task result");
            }
        }
    }

    fn fail(&mut self, message: String) {
        tracing::warn!(%message, "wizard failed");
        self.loading = false;
        self.pending = None;
        self.step = Step::Error { message };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::ScriptedRunner;
    use crate::config::Package;
    use std::sync::Arc;

    fn inventory(runner: ScriptedRunner) -> NodeInventory {
        NodeInventory::new(Arc::new(runner), Some("pve1"))
    }

    fn free_ids() -> NodeInventory {
        inventory(ScriptedRunner::new().ok("qm status 100", "status: running"))
    }

    fn pool(name: &str) -> StoragePool {
        StoragePool {
            name: name.to_string(),
            kind: "lvmthin".to_string(),
            active: true,
            content: vec!["images".to_string()],
        }
    }

    fn bridge(name: &str) -> Bridge {
        Bridge {
            name: name.to_string(),
            active: true,
        }
    }

    /// Drive a fresh wizard up to the given step with valid input
    fn wizard_at(kind: StepKind, store: ConfigStore) -> WizardController {
        let inv = free_ids();
        let mut w = WizardController::new(store, None);
        assert_eq!(w.take_task(), Some(Task::CheckEnvironment));
        w.apply(TaskResult::Environment(true));
        w.advance(StepInput::Welcome, &inv).unwrap();
        if kind == StepKind::Identity {
            return w;
        }
        w.advance(
            StepInput::Identity {
                vmid: "101".into(),
                name: "web".into(),
            },
            &inv,
        )
        .unwrap();
        if kind == StepKind::Compute {
            return w;
        }
        w.advance(
            StepInput::Compute {
                cores: "2".into(),
                memory: "2048".into(),
                disk: "20".into(),
            },
            &inv,
        )
        .unwrap();
        if kind == StepKind::Storage {
            return w;
        }
        w.apply(TaskResult::VmStorages(vec![pool("local-lvm")]));
        w.advance(StepInput::Storage("local-lvm".into()), &inv).unwrap();
        if kind == StepKind::Network {
            return w;
        }
        w.apply(TaskResult::Bridges(vec![bridge("vmbr0")]));
        w.advance(StepInput::Network("vmbr0".into()), &inv).unwrap();
        if kind == StepKind::ImageSelect {
            return w;
        }
        w.apply(TaskResult::Images(vec![IsoImage::from_volid(
            "local:iso/debian-12.iso",
            1,
        )]));
        w.advance(StepInput::Image(Some("local:iso/debian-12.iso".into())), &inv)
            .unwrap();
        assert_eq!(w.kind(), StepKind::Summary);
        w
    }

    #[test]
    fn test_full_run_builds_specification() {
        let inv = free_ids();
        let mut w = wizard_at(StepKind::Summary, ConfigStore::in_memory());

        let Step::Summary { spec } = w.step().clone() else {
            panic!("expected summary");
        };
        assert_eq!(
            spec,
            VmSpecification {
                vmid: 101,
                name: "web".into(),
                cores: 2,
                memory_mb: 2048,
                disk_gb: 20,
                storage: "local-lvm".into(),
                bridge: "vmbr0".into(),
                iso_volid: Some("local:iso/debian-12.iso".into()),
            }
        );

        w.advance(StepInput::Confirm, &inv).unwrap();
        assert_eq!(w.kind(), StepKind::Executing);
        assert_eq!(w.take_task(), Some(Task::Provision(spec)));
        assert_eq!(w.take_task(), None);

        w.apply(TaskResult::ProvisionStage("Attaching disk".into()));
        assert!(matches!(w.step(), Step::Executing { stage, .. } if stage == "Attaching disk"));

        w.apply(TaskResult::Provisioned(Ok(())));
        assert_eq!(
            w.step(),
            &Step::Success {
                vmid: 101,
                name: "web".into()
            }
        );
        assert!(w.step().is_terminal());
    }

    #[test]
    fn test_welcome_waits_for_environment_check() {
        let inv = free_ids();
        let mut w = WizardController::new(ConfigStore::in_memory(), None);
        assert!(w.advance(StepInput::Welcome, &inv).is_err());
        assert_eq!(w.kind(), StepKind::Welcome);
        w.apply(TaskResult::Environment(true));
        w.advance(StepInput::Welcome, &inv).unwrap();
        assert_eq!(w.kind(), StepKind::Identity);
    }

    #[test]
    fn test_environment_failure_is_terminal_error() {
        let mut w = WizardController::new(ConfigStore::in_memory(), None);
        assert!(w.is_loading());
        w.apply(TaskResult::Environment(false));
        assert_eq!(
            w.step(),
            &Step::Error {
                message: NOT_A_PVE_NODE.into()
            }
        );
    }

    #[test]
    fn test_identity_validation_keeps_step() {
        let inv = free_ids();
        let mut w = wizard_at(StepKind::Identity, ConfigStore::in_memory());

        let err = w
            .advance(
                StepInput::Identity {
                    vmid: "0".into(),
                    name: "web".into(),
                },
                &inv,
            )
            .unwrap_err();
        assert_eq!(err, "Invalid VM ID");
        assert_eq!(w.kind(), StepKind::Identity);
        assert_eq!(w.validation_error(), Some("Invalid VM ID"));

        let err = w
            .advance(
                StepInput::Identity {
                    vmid: "101".into(),
                    name: "".into(),
                },
                &inv,
            )
            .unwrap_err();
        assert_eq!(err, "Invalid VM name");

        // Resubmitting valid input clears the error and moves on
        w.advance(
            StepInput::Identity {
                vmid: "101".into(),
                name: "web".into(),
            },
            &inv,
        )
        .unwrap();
        assert_eq!(w.kind(), StepKind::Compute);
        assert_eq!(w.validation_error(), None);
    }

    #[test]
    fn test_taken_vmid_is_validation_failure() {
        let inv = free_ids();
        let mut w = wizard_at(StepKind::Identity, ConfigStore::in_memory());
        let err = w
            .advance(
                StepInput::Identity {
                    vmid: "100".into(),
                    name: "web".into(),
                },
                &inv,
            )
            .unwrap_err();
        assert_eq!(err, "VM ID already in use");
        assert_eq!(w.kind(), StepKind::Identity);
    }

    #[test]
    fn test_next_vmid_suggestion_and_failure() {
        let mut w = wizard_at(StepKind::Identity, ConfigStore::in_memory());
        assert_eq!(w.take_task(), Some(Task::NextVmid));
        assert!(!w.is_loading());
        w.apply(TaskResult::NextVmid(Ok(104)));
        assert_eq!(w.suggested_vmid(), Some(104));

        let mut w = wizard_at(StepKind::Identity, ConfigStore::in_memory());
        w.apply(TaskResult::NextVmid(Err("denied".into())));
        assert_eq!(w.kind(), StepKind::Identity);
        assert_eq!(w.validation_error(), Some("Failed to get next VM ID"));
    }

    #[test]
    fn test_compute_boundaries() {
        let inv = free_ids();
        let mut w = wizard_at(StepKind::Compute, ConfigStore::in_memory());

        let submit = |w: &mut WizardController, c: &str, m: &str, d: &str| {
            w.advance(
                StepInput::Compute {
                    cores: c.into(),
                    memory: m.into(),
                    disk: d.into(),
                },
                &inv,
            )
        };

        assert_eq!(submit(&mut w, "129", "2048", "20").unwrap_err(), "Invalid CPU count");
        assert_eq!(submit(&mut w, "4", "63", "20").unwrap_err(), "Invalid memory size");
        assert_eq!(submit(&mut w, "4", "64", "0").unwrap_err(), "Invalid disk size");
        assert_eq!(w.kind(), StepKind::Compute);

        submit(&mut w, "128", "64", "1").unwrap();
        assert_eq!(w.kind(), StepKind::Storage);
    }

    #[test]
    fn test_storage_loading_blocks_input_until_listed() {
        let inv = free_ids();
        let mut w = wizard_at(StepKind::Storage, ConfigStore::in_memory());
        assert!(w.is_loading());
        assert_eq!(w.take_task(), Some(Task::ListVmStorages));
        assert!(w.advance(StepInput::Storage("local-lvm".into()), &inv).is_err());
        assert_eq!(w.kind(), StepKind::Storage);

        w.apply(TaskResult::VmStorages(vec![pool("local-lvm"), pool("ceph")]));
        assert!(!w.is_loading());
        assert_eq!(w.choices().len(), 2);
        assert_eq!(
            w.advance(StepInput::Storage("nfs".into()), &inv).unwrap_err(),
            "Unknown storage pool: nfs"
        );
    }

    #[test]
    fn test_storage_listing_failure_falls_back() {
        let store = ConfigStore::in_memory();
        let mut w = wizard_at(StepKind::Storage, store);
        w.apply(TaskResult::VmStorages(Vec::new()));
        assert_eq!(w.choices().len(), 1);
        assert_eq!(w.choices()[0].value.as_deref(), Some(FALLBACK_VM_STORAGE));
    }

    #[test]
    fn test_unverified_storage_fallback_is_not_saved() {
        let inv = free_ids();
        let store = ConfigStore::in_memory();
        let mut w = wizard_at(StepKind::Storage, store.clone());
        w.apply(TaskResult::VmStorages(Vec::new()));
        w.advance(StepInput::Storage(FALLBACK_VM_STORAGE.into()), &inv).unwrap();
        assert_eq!(w.kind(), StepKind::Network);
        assert_eq!(store.get_default(ConfigKey::VmStorage), None);

        // A real listing on the next step is saved as usual
        w.apply(TaskResult::Bridges(vec![bridge("vmbr3")]));
        w.advance(StepInput::Network("vmbr3".into()), &inv).unwrap();
        assert_eq!(store.get_default(ConfigKey::Bridge).as_deref(), Some("vmbr3"));
    }

    #[test]
    fn test_bridge_listing_failure_falls_back_to_vmbr0() {
        let inv = free_ids();
        let store = ConfigStore::in_memory();
        let mut w = wizard_at(StepKind::Network, store.clone());
        w.apply(TaskResult::Bridges(Vec::new()));
        assert_eq!(w.choices()[0].value.as_deref(), Some("vmbr0"));

        w.advance(StepInput::Network("vmbr0".into()), &inv).unwrap();
        assert_eq!(store.get_default(ConfigKey::Bridge), None);
    }

    #[test]
    fn test_check_field_validates_one_field() {
        let inv = inventory(ScriptedRunner::new().ok("qm status 100", "status: running"));
        let mut w = wizard_at(StepKind::Identity, ConfigStore::in_memory());

        assert_eq!(w.check_field(0, "100", &inv).unwrap_err(), "VM ID already in use");
        assert_eq!(w.validation_error(), Some("VM ID already in use"));
        w.check_field(0, "101", &inv).unwrap();
        assert_eq!(w.validation_error(), None);
        assert_eq!(w.check_field(1, "", &inv).unwrap_err(), "Invalid VM name");
        assert!(w.check_field(2, "x", &inv).is_err());
        // Checking a field never moves the wizard
        assert_eq!(w.kind(), StepKind::Identity);

        let mut w = wizard_at(StepKind::Compute, ConfigStore::in_memory());
        assert_eq!(w.check_field(1, "63", &inv).unwrap_err(), "Invalid memory size");
        w.check_field(2, "20GB", &inv).unwrap();
    }

    #[test]
    fn test_image_step_offers_no_iso_first() {
        let inv = free_ids();
        let mut w = wizard_at(StepKind::ImageSelect, ConfigStore::in_memory());
        assert_eq!(w.take_task(), Some(Task::ListImages { storage: None }));
        w.apply(TaskResult::Images(vec![IsoImage::from_volid("nas:iso/a.iso", 1)]));
        assert_eq!(w.choices()[0].value, None);
        assert_eq!(w.choices()[1].value.as_deref(), Some("nas:iso/a.iso"));

        w.advance(StepInput::Image(None), &inv).unwrap();
        let Step::Summary { spec } = w.step() else {
            panic!("expected summary");
        };
        assert_eq!(spec.iso_volid, None);
    }

    #[test]
    fn test_cancel_only_at_summary() {
        let inv = free_ids();
        let mut w = wizard_at(StepKind::Compute, ConfigStore::in_memory());
        assert!(w.advance(StepInput::Cancel, &inv).is_err());
        assert_eq!(w.kind(), StepKind::Compute);

        let mut w = wizard_at(StepKind::Summary, ConfigStore::in_memory());
        w.advance(StepInput::Cancel, &inv).unwrap();
        assert_eq!(w.step(), &Step::Cancelled);
        assert_eq!(w.take_task(), None);
    }

    #[test]
    fn test_steps_cannot_be_skipped() {
        let inv = free_ids();
        let mut w = wizard_at(StepKind::Identity, ConfigStore::in_memory());
        let err = w
            .advance(StepInput::Storage("local-lvm".into()), &inv)
            .unwrap_err();
        assert!(err.starts_with("Unexpected input"));
        assert_eq!(w.kind(), StepKind::Identity);
    }

    #[test]
    fn test_provision_failure_shows_error() {
        let inv = free_ids();
        let mut w = wizard_at(StepKind::Summary, ConfigStore::in_memory());
        w.advance(StepInput::Confirm, &inv).unwrap();
        w.apply(TaskResult::Provisioned(Err("VM creation failed: boom".into())));
        assert_eq!(
            w.step(),
            &Step::Error {
                message: "VM creation failed: boom".into()
            }
        );
        // Terminal: nothing more is accepted
        assert!(w.advance(StepInput::Confirm, &inv).is_err());
    }

    #[test]
    fn test_stale_results_are_ignored() {
        let mut w = wizard_at(StepKind::Compute, ConfigStore::in_memory());
        w.apply(TaskResult::Bridges(vec![bridge("vmbr7")]));
        assert!(w.choices().is_empty());
        assert_eq!(w.kind(), StepKind::Compute);
    }

    #[test]
    fn test_choices_persisted_when_no_default() {
        let store = ConfigStore::in_memory();
        wizard_at(StepKind::Summary, store.clone());
        assert_eq!(store.get_default(ConfigKey::VmStorage).as_deref(), Some("local-lvm"));
        assert_eq!(store.get_default(ConfigKey::Bridge).as_deref(), Some("vmbr0"));
        assert_eq!(store.get_default(ConfigKey::IsoStorage).as_deref(), Some("local"));
    }

    #[test]
    fn test_choices_not_persisted_when_saving_disabled() {
        let store = ConfigStore::in_memory();
        store.set_default(ConfigKey::SavePreferences, "false").unwrap();
        wizard_at(StepKind::Summary, store.clone());
        assert_eq!(store.get_default(ConfigKey::VmStorage), None);
        assert_eq!(store.get_default(ConfigKey::Bridge), None);
    }

    #[test]
    fn test_existing_default_not_overwritten() {
        let store = ConfigStore::in_memory();
        store.set_default(ConfigKey::Bridge, "vmbr5").unwrap();
        wizard_at(StepKind::Summary, store.clone());
        assert_eq!(store.get_default(ConfigKey::Bridge).as_deref(), Some("vmbr5"));
    }

    #[test]
    fn test_package_defaults_drive_compute_and_preselection() {
        let store = ConfigStore::in_memory();
        store.set_default(ConfigKey::Memory, "1024").unwrap();
        store.set_default(ConfigKey::Cores, "2").unwrap();
        store
            .set_package(
                "big",
                Package {
                    cores: Some(4),
                    vm_storage: Some("ceph".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let w = WizardController::new(store.clone(), Some("big".into()));
        assert_eq!(w.package(), Some("big"));
        assert_eq!(
            w.compute_defaults(),
            Compute {
                cores: 4,
                memory_mb: 1024,
                disk_gb: DEFAULT_DISK_GB
            }
        );

        let mut w = wizard_at(StepKind::Storage, store);
        // wizard_at uses no package, so the plain defaults apply there
        w.apply(TaskResult::VmStorages(vec![pool("local-lvm"), pool("ceph")]));
        assert_eq!(w.default_choice_index(), 0);
    }

    #[test]
    fn test_default_choice_index_prefers_configured_bridge() {
        let store = ConfigStore::in_memory();
        store.set_default(ConfigKey::Bridge, "vmbr1").unwrap();
        let mut w = wizard_at(StepKind::Network, store);
        w.apply(TaskResult::Bridges(vec![bridge("vmbr0"), bridge("vmbr1")]));
        assert_eq!(w.default_choice_index(), 1);
    }
}
