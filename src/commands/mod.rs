//! External command execution
//!
//! Every interaction with the Proxmox node goes through a [`CommandRunner`].
//! The thin per-tool wrappers (`qm`, `pvesh`, `pvesm`) build argument lists
//! and parse output; they never spawn processes themselves.

pub mod pvesh;
pub mod pvesm;
pub mod qm;

use std::process::Command;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single external command
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {status}: {stderr}")]
    Failed {
        program: String,
        status: i32,
        stderr: String,
    },
}

/// Runs a program to completion and returns its stdout.
///
/// A non-zero exit status is an error. Implementations must be usable from
/// the background worker threads, hence `Send + Sync`.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError>;
}

/// Shared runner handle passed to every component that talks to the node
pub type Runner = Arc<dyn CommandRunner>;

/// Runner backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
        tracing::debug!(program, ?args, "running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let status = output.status.code().unwrap_or(-1);
            tracing::warn!(program, ?args, status, %stderr, "command failed");
            return Err(CommandError::Failed {
                program: program.to_string(),
                status,
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Convenience constructor for the production runner
pub fn system_runner() -> Runner {
    Arc::new(SystemRunner)
}

#[cfg(test)]
pub mod testing {
    //! Scripted runner used by the unit tests of every node-facing module.

    use super::{CommandError, CommandRunner};
    use std::sync::Mutex;

    /// Matches each invocation (rendered as `program arg arg ...`) against
    /// prefix rules in insertion order and records every call.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Vec<(String, Result<String, String>)>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ok(mut self, prefix: &str, stdout: &str) -> Self {
            self.rules.push((prefix.to_string(), Ok(stdout.to_string())));
            self
        }

        pub fn fail(mut self, prefix: &str, stderr: &str) -> Self {
            self.rules.push((prefix.to_string(), Err(stderr.to_string())));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            let rule = self
                .rules
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()));

            match rule {
                Some((_, Ok(stdout))) => Ok(stdout.clone()),
                Some((_, Err(stderr))) => Err(CommandError::Failed {
                    program: program.to_string(),
                    status: 1,
                    stderr: stderr.clone(),
                }),
                None => Err(CommandError::Failed {
                    program: program.to_string(),
                    status: 127,
                    stderr: format!("no scripted response for `{}`", line),
                }),
            }
        }
    }
}
