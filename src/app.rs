use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use crate::config::ConfigStore;
use crate::iso::ImageManager;
use crate::node::NodeInventory;
use crate::vm::create_vm;
use crate::wizard::{Step, StepInput, StepKind, Task, TaskResult, WizardController};

/// Message from a background worker
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundResult {
    Task(TaskResult),
    /// The worker's task has run to completion
    Finished,
}

/// Summary step actions, in display order
pub const SUMMARY_ACTIONS: [&str; 2] = ["Create this VM", "Cancel"];

/// How the wizard session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created { vmid: u32, name: String },
    Failed(String),
    Cancelled,
    /// Ctrl-C or the wizard was left before reaching a terminal step
    Interrupted,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Created { .. } | Outcome::Cancelled => 0,
            Outcome::Failed(_) => 1,
            Outcome::Interrupted => 130,
        }
    }
}

/// Editable state of the step currently on screen
#[derive(Debug, Default)]
pub struct FormState {
    /// Text fields of input steps
    pub fields: Vec<String>,
    /// Focused text field
    pub focus: usize,
    /// Highlighted row of list steps
    pub selected: usize,
}

/// Main application state
pub struct App {
    pub wizard: WizardController,
    pub inventory: NodeInventory,
    pub store: ConfigStore,
    pub form: FormState,
    pub should_quit: bool,
    /// Step the form was last prepared for
    prepared: Option<StepKind>,
    /// The list selection has been moved to the configured default
    preselected: bool,
    /// Background tasks not yet finished
    in_flight: usize,
    background_tx: Sender<BackgroundResult>,
    background_rx: Receiver<BackgroundResult>,
}

impl App {
    pub fn new(inventory: NodeInventory, store: ConfigStore, package: Option<String>) -> Self {
        let wizard = WizardController::new(store.clone(), package);
        let (background_tx, background_rx) = mpsc::channel();

        let mut app = Self {
            wizard,
            inventory,
            store,
            form: FormState::default(),
            should_quit: false,
            prepared: None,
            preselected: false,
            in_flight: 0,
            background_tx,
            background_rx,
        };
        app.sync_form();
        app
    }

    /// Start queued wizard work on a background thread; called every tick.
    ///
    /// At most one task runs at a time, so node calls never overlap.
    pub fn dispatch_tasks(&mut self) {
        if self.in_flight > 0 {
            return;
        }
        if let Some(task) = self.wizard.take_task() {
            let inventory = self.inventory.clone();
            let store = self.store.clone();
            let tx = self.background_tx.clone();
            self.in_flight += 1;
            thread::spawn(move || {
                perform(task, &inventory, &store, &tx);
                let _ = tx.send(BackgroundResult::Finished);
            });
        }
    }

    /// A background task is still running
    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    /// Check for background operation results (non-blocking)
    pub fn check_background_results(&mut self) {
        while let Ok(result) = self.background_rx.try_recv() {
            match result {
                BackgroundResult::Task(result) => self.wizard.apply(result),
                BackgroundResult::Finished => self.in_flight = self.in_flight.saturating_sub(1),
            }
        }
        self.sync_form();
        if self.wizard.kind() == StepKind::Cancelled {
            self.should_quit = true;
        }
    }

    /// Bring the form in line with the wizard's current step
    fn sync_form(&mut self) {
        let kind = self.wizard.kind();
        if self.prepared != Some(kind) {
            self.form = FormState::default();
            self.preselected = false;
            self.prepared = Some(kind);

            match kind {
                StepKind::Identity => {
                    self.form.fields = vec![String::new(), String::new()];
                }
                StepKind::Compute => {
                    let c = self.wizard.compute_defaults();
                    self.form.fields = vec![
                        c.cores.to_string(),
                        c.memory_mb.to_string(),
                        c.disk_gb.to_string(),
                    ];
                }
                _ => {}
            }
        }

        if kind == StepKind::Identity && self.form.fields[0].is_empty() {
            if let Some(vmid) = self.wizard.suggested_vmid() {
                self.form.fields[0] = vmid.to_string();
            }
        }

        if is_list_step(kind) && !self.preselected && !self.wizard.is_loading() {
            self.form.selected = self.wizard.default_choice_index();
            self.preselected = true;
        }
    }

    /// Number of rows in the current list step
    pub fn row_count(&self) -> usize {
        match self.wizard.kind() {
            StepKind::Summary => SUMMARY_ACTIONS.len(),
            _ => self.wizard.choices().len(),
        }
    }

    pub fn select_next(&mut self) {
        let count = self.row_count();
        if count > 0 && self.form.selected + 1 < count {
            self.form.selected += 1;
        }
    }

    pub fn select_prev(&mut self) {
        self.form.selected = self.form.selected.saturating_sub(1);
    }

    pub fn next_field(&mut self) {
        if !self.form.fields.is_empty() {
            self.form.focus = (self.form.focus + 1) % self.form.fields.len();
        }
    }

    pub fn prev_field(&mut self) {
        if !self.form.fields.is_empty() {
            let len = self.form.fields.len();
            self.form.focus = (self.form.focus + len - 1) % len;
        }
    }

    pub fn type_char(&mut self, c: char) {
        if let Some(field) = self.form.fields.get_mut(self.form.focus) {
            field.push(c);
        }
    }

    pub fn backspace(&mut self) {
        if let Some(field) = self.form.fields.get_mut(self.form.focus) {
            field.pop();
        }
    }

    /// Submit the current step with what the form holds.
    ///
    /// On a form step, Enter checks the focused field and moves to the next
    /// one; only the last field submits the step. Held back while a
    /// background task runs, since validation may query the node too.
    pub fn submit(&mut self) {
        if self.is_busy() {
            return;
        }
        if self.submit_field() {
            return;
        }
        let Some(input) = self.current_input() else {
            return;
        };
        // A rejected submission is shown inline by the wizard
        if self.wizard.advance(input, &self.inventory).is_ok() {
            self.sync_form();
        }
        if self.wizard.kind() == StepKind::Cancelled {
            self.should_quit = true;
        }
    }

    /// Check the focused field of a form step; false when the step itself
    /// should be submitted
    fn submit_field(&mut self) -> bool {
        if !matches!(self.wizard.kind(), StepKind::Identity | StepKind::Compute) {
            return false;
        }
        let focus = self.form.focus;
        if focus + 1 >= self.form.fields.len() {
            return false;
        }
        let raw = self.form.fields[focus].clone();
        if self.wizard.check_field(focus, &raw, &self.inventory).is_ok() {
            self.form.focus += 1;
        }
        true
    }

    fn current_input(&self) -> Option<StepInput> {
        let field = |i: usize| self.form.fields.get(i).cloned().unwrap_or_default();
        let choice = || {
            self.wizard
                .choices()
                .get(self.form.selected)
                .map(|c| c.value.clone())
        };

        match self.wizard.kind() {
            StepKind::Welcome => Some(StepInput::Welcome),
            StepKind::Identity => Some(StepInput::Identity {
                vmid: field(0),
                name: field(1),
            }),
            StepKind::Compute => Some(StepInput::Compute {
                cores: field(0),
                memory: field(1),
                disk: field(2),
            }),
            StepKind::Storage => choice().flatten().map(StepInput::Storage),
            StepKind::Network => choice().flatten().map(StepInput::Network),
            StepKind::ImageSelect => choice().map(StepInput::Image),
            StepKind::Summary => Some(if self.form.selected == 0 {
                StepInput::Confirm
            } else {
                StepInput::Cancel
            }),
            _ => None,
        }
    }

    /// Ctrl-C: leave immediately, except while the VM is being created.
    ///
    /// Exiting mid-provisioning would stop the remaining `qm` calls and leave
    /// a half-configured VM behind.
    pub fn interrupt(&mut self) {
        let step = self.wizard.kind();
        if step == StepKind::Executing {
            tracing::info!("ignoring interrupt while provisioning");
            return;
        }
        tracing::info!(?step, "interrupted");
        self.should_quit = true;
    }

    pub fn outcome(&self) -> Outcome {
        match self.wizard.step() {
            Step::Success { vmid, name } => Outcome::Created {
                vmid: *vmid,
                name: name.clone(),
            },
            Step::Error { message } => Outcome::Failed(message.clone()),
            Step::Cancelled => Outcome::Cancelled,
            _ => Outcome::Interrupted,
        }
    }
}

pub fn is_list_step(kind: StepKind) -> bool {
    matches!(
        kind,
        StepKind::Storage | StepKind::Network | StepKind::ImageSelect | StepKind::Summary
    )
}

/// Run one wizard task against the node, reporting through `tx`
pub fn perform(task: Task, inventory: &NodeInventory, store: &ConfigStore, tx: &Sender<BackgroundResult>) {
    tracing::debug!(?task, "running wizard task");
    // The receiver is gone once the UI has exited; nothing left to report to
    let send = |result: TaskResult| {
        let _ = tx.send(BackgroundResult::Task(result));
    };

    match task {
        Task::CheckEnvironment => send(TaskResult::Environment(inventory.is_proxmox_node())),
        Task::NextVmid => send(TaskResult::NextVmid(
            inventory.next_vmid().map_err(|e| format!("{:#}", e)),
        )),
        Task::ListVmStorages => send(TaskResult::VmStorages(inventory.vm_storages())),
        Task::ListBridges => send(TaskResult::Bridges(inventory.bridges())),
        Task::ListImages { storage } => {
            let manager = ImageManager::new(inventory.clone(), store.clone());
            let images = match storage {
                Some(ref s) => manager.list_storage(s),
                None => manager.list(),
            };
            send(TaskResult::Images(images));
        }
        Task::Provision(spec) => {
            let result = create_vm(inventory.runner().as_ref(), spec, |_, _, stage| {
                send(TaskResult::ProvisionStage(stage.to_string()))
            });
            if let Err(ref e) = result {
                tracing::error!("{:#}", e);
            }
            send(TaskResult::Provisioned(result.map_err(|e| format!("{:#}", e))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::ScriptedRunner;
    use std::sync::Arc;

    const STORAGE_JSON: &str = r#"[
        {"storage":"local","type":"dir","active":1,"content":"iso,vztmpl,backup"},
        {"storage":"local-lvm","type":"lvmthin","active":1,"content":"images,rootdir"}
    ]"#;

    fn node() -> ScriptedRunner {
        ScriptedRunner::new()
            .ok("which qm", "/usr/sbin/qm")
            .ok("pvesh get /cluster/nextid", "\"105\"")
            .ok("pvesh get /nodes/pve1/network", r#"[{"iface":"vmbr0","active":1}]"#)
            .ok(
                "pvesh get /nodes/pve1/storage/local/content",
                r#"[{"volid":"local:iso/debian-12.iso","size":658505728}]"#,
            )
            .ok("pvesh get /nodes/pve1/storage", STORAGE_JSON)
            .ok("qm create", "")
            .ok("qm set", "")
    }

    fn app_with(runner: ScriptedRunner) -> (App, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let inventory = NodeInventory::new(runner.clone(), Some("pve1"));
        (App::new(inventory, ConfigStore::in_memory(), None), runner)
    }

    /// Run queued tasks on the calling thread and apply their results
    fn settle(app: &mut App) {
        while let Some(task) = app.wizard.take_task() {
            perform(task, &app.inventory, &app.store, &app.background_tx);
        }
        app.check_background_results();
    }

    /// Enter through every field of a form step
    fn submit_form(app: &mut App) {
        for _ in 0..app.form.fields.len() {
            app.submit();
        }
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(
            Outcome::Created {
                vmid: 1,
                name: "a".into()
            }
            .exit_code(),
            0
        );
        assert_eq!(Outcome::Cancelled.exit_code(), 0);
        assert_eq!(Outcome::Failed("x".into()).exit_code(), 1);
        assert_eq!(Outcome::Interrupted.exit_code(), 130);
    }

    #[test]
    fn test_end_to_end_with_defaults() {
        let (mut app, runner) = app_with(node());
        settle(&mut app);
        assert_eq!(app.wizard.kind(), StepKind::Welcome);
        app.submit();

        settle(&mut app);
        assert_eq!(app.wizard.kind(), StepKind::Identity);
        assert_eq!(app.form.fields[0], "105");
        app.form.focus = 1;
        for c in "web01".chars() {
            app.type_char(c);
        }
        app.submit();

        assert_eq!(app.wizard.kind(), StepKind::Compute);
        assert_eq!(app.form.fields, vec!["2", "2048", "20"]);
        submit_form(&mut app);

        settle(&mut app);
        assert_eq!(app.wizard.kind(), StepKind::Storage);
        assert_eq!(app.row_count(), 1);
        app.submit();

        settle(&mut app);
        assert_eq!(app.wizard.kind(), StepKind::Network);
        app.submit();

        settle(&mut app);
        assert_eq!(app.wizard.kind(), StepKind::ImageSelect);
        assert_eq!(app.row_count(), 2);
        app.select_next();
        app.submit();

        assert_eq!(app.wizard.kind(), StepKind::Summary);
        app.submit();
        settle(&mut app);

        assert_eq!(
            app.outcome(),
            Outcome::Created {
                vmid: 105,
                name: "web01".into()
            }
        );
        let calls = runner.calls();
        assert!(calls.contains(&"qm set 105 --ide2 local:iso/debian-12.iso,media=cdrom".to_string()));
        assert!(calls.contains(&"qm set 105 --scsi0 local-lvm:20".to_string()));
    }

    #[test]
    fn test_invalid_input_stays_with_inline_error() {
        let (mut app, _) = app_with(node());
        settle(&mut app);
        app.submit();
        settle(&mut app);

        app.form.fields[0] = "abc".into();
        app.form.fields[1] = "web".into();
        app.submit();
        assert_eq!(app.wizard.kind(), StepKind::Identity);
        assert_eq!(app.wizard.validation_error(), Some("Invalid VM ID"));
        // Typed input survives the rejection
        assert_eq!(app.form.fields[0], "abc");
    }

    #[test]
    fn test_not_a_proxmox_node() {
        let (mut app, _) = app_with(ScriptedRunner::new());
        settle(&mut app);
        assert_eq!(
            app.outcome(),
            Outcome::Failed(crate::wizard::NOT_A_PVE_NODE.into())
        );
        assert_eq!(app.outcome().exit_code(), 1);
    }

    #[test]
    fn test_cancel_at_summary_quits_cleanly() {
        let (mut app, runner) = app_with(node());
        settle(&mut app);
        app.submit();
        settle(&mut app);
        app.form.fields[1] = "web".into();
        submit_form(&mut app);
        submit_form(&mut app);
        settle(&mut app);
        app.submit();
        settle(&mut app);
        app.submit();
        settle(&mut app);
        app.submit();

        assert_eq!(app.wizard.kind(), StepKind::Summary);
        app.select_next();
        app.submit();
        assert!(app.should_quit);
        assert_eq!(app.outcome(), Outcome::Cancelled);
        assert!(!runner.calls().iter().any(|c| c.starts_with("qm create")));
    }

    #[test]
    fn test_provision_failure_reports_stage() {
        let runner = ScriptedRunner::new()
            .fail("qm set 105 --scsi0", "storage 'local-lvm' does not exist")
            .ok("qm create", "");
        let (app, _) = app_with(ScriptedRunner::new());
        let (tx, rx) = mpsc::channel();
        let inventory = NodeInventory::new(Arc::new(runner), Some("pve1"));
        let spec = crate::vm::VmSpecification {
            vmid: 105,
            name: "web".into(),
            cores: 2,
            memory_mb: 2048,
            disk_gb: 20,
            storage: "local-lvm".into(),
            bridge: "vmbr0".into(),
            iso_volid: None,
        };

        perform(Task::Provision(spec), &inventory, &app.store, &tx);
        drop(tx);
        let results: Vec<BackgroundResult> = rx.iter().collect();

        assert_eq!(
            results.first(),
            Some(&BackgroundResult::Task(TaskResult::ProvisionStage("Creating VM".into())))
        );
        match results.last() {
            Some(BackgroundResult::Task(TaskResult::Provisioned(Err(message)))) => {
                assert!(message.contains("does not exist"), "{}", message);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_submit_waits_for_background_work() {
        let (mut app, _) = app_with(node());
        settle(&mut app);
        app.in_flight = 1;
        app.submit();
        assert_eq!(app.wizard.kind(), StepKind::Welcome);

        app.background_tx.send(BackgroundResult::Finished).unwrap();
        app.check_background_results();
        assert!(!app.is_busy());
        app.submit();
        assert_eq!(app.wizard.kind(), StepKind::Identity);
    }

    #[test]
    fn test_interrupt() {
        let (mut app, _) = app_with(node());
        app.interrupt();
        assert!(app.should_quit);
        assert_eq!(app.outcome(), Outcome::Interrupted);
    }

    #[test]
    fn test_interrupt_ignored_while_provisioning() {
        let (mut app, runner) = app_with(node());
        settle(&mut app);
        app.submit();
        settle(&mut app);
        app.form.fields[1] = "web".into();
        submit_form(&mut app);
        submit_form(&mut app);
        for _ in 0..3 {
            settle(&mut app);
            app.submit();
        }
        assert_eq!(app.wizard.kind(), StepKind::Summary);
        app.submit();

        // Provisioning has been queued but not finished
        assert_eq!(app.wizard.kind(), StepKind::Executing);
        app.in_flight = 1;
        app.interrupt();
        assert!(!app.should_quit);

        app.in_flight = 0;
        settle(&mut app);
        assert_eq!(
            app.outcome(),
            Outcome::Created {
                vmid: 105,
                name: "web".into()
            }
        );
        assert!(runner.calls().iter().any(|c| c.starts_with("qm set 105 --boot")));

        // Once the VM exists Ctrl-C leaves as usual
        app.interrupt();
        assert!(app.should_quit);
    }

    #[test]
    fn test_enter_checks_one_field_at_a_time() {
        let (mut app, _) = app_with(node());
        settle(&mut app);
        app.submit();
        settle(&mut app);
        assert_eq!(app.form.focus, 0);

        app.form.fields[0] = "0".into();
        app.submit();
        assert_eq!(app.form.focus, 0);
        assert_eq!(app.wizard.validation_error(), Some("Invalid VM ID"));

        app.form.fields[0] = "105abc".into();
        app.submit();
        assert_eq!(app.form.focus, 1);
        assert_eq!(app.wizard.validation_error(), None);
        assert_eq!(app.wizard.kind(), StepKind::Identity);

        // Empty name on the last field rejects the step
        app.submit();
        assert_eq!(app.wizard.kind(), StepKind::Identity);
        assert_eq!(app.wizard.validation_error(), Some("Invalid VM name"));

        app.type_char('a');
        app.submit();
        assert_eq!(app.wizard.kind(), StepKind::Compute);
        assert_eq!(app.form.focus, 0);
    }

    #[test]
    fn test_field_navigation_wraps() {
        let (mut app, _) = app_with(node());
        app.form.fields = vec![String::new(); 3];
        app.prev_field();
        assert_eq!(app.form.focus, 2);
        app.next_field();
        assert_eq!(app.form.focus, 0);
        app.type_char('4');
        app.type_char('2');
        app.backspace();
        assert_eq!(app.form.fields[0], "4");
    }
}
