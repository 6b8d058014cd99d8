use std::collections::BTreeMap;
use std::path::PathBuf;

use quarry_core::MessageLevel;
use quarry_infra::{ChildProcessSupervisor, ProcessCommand, ProcessState};

use super::pump_process_events;
use crate::step::{LaunchStep, StepHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    PreLaunch,
    PostExit,
}

impl CommandPhase {
    fn step_name(self) -> &'static str {
        match self {
            CommandPhase::PreLaunch => "PreLaunchCommand",
            CommandPhase::PostExit => "PostExitCommand",
        }
    }

    fn label(self) -> &'static str {
        match self {
            CommandPhase::PreLaunch => "Pre-launch command",
            CommandPhase::PostExit => "Post-exit command",
        }
    }
}

/// A user-configured shell command run around the game process.
///
/// Instance variables are substituted into the script and exported to its environment.
pub struct ShellCommand {
    phase: CommandPhase,
    script: String,
    working_dir: PathBuf,
    variables: BTreeMap<String, String>,
    supervisor: ChildProcessSupervisor,
}

impl ShellCommand {
    pub fn new(
        phase: CommandPhase,
        script: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        variables: BTreeMap<String, String>,
    ) -> Self {
        Self {
            phase,
            script: script.into(),
            working_dir: working_dir.into(),
            variables,
            supervisor: ChildProcessSupervisor::new(),
        }
    }
}

impl LaunchStep for ShellCommand {
    fn name(&self) -> &str {
        self.phase.step_name()
    }

    fn start(&mut self, handle: StepHandle) {
        let label = self.phase.label();
        let script =
            quarry_core::substitute_variables(&self.script, &self.variables, quarry_core::process_env());
        handle.log_line(format!("Running {label}: {script}"), MessageLevel::Launcher);

        let command = ProcessCommand::shell(&script, self.working_dir.clone())
            .with_env(self.variables.clone());
        let mut events = match self.supervisor.start(command) {
            Ok(events) => events,
            Err(e) => {
                handle.fail(format!("{label} could not be started: {e}"));
                return;
            }
        };

        tokio::spawn(async move {
            let end = pump_process_events(&handle, &mut events, |_| {}).await;
            match end {
                ProcessState::Finished { exit_code: 0 } => handle.succeed(),
                ProcessState::Finished { exit_code } => {
                    handle.fail(format!("{label} failed with code {exit_code}."))
                }
                ProcessState::FailedToStart(e) => {
                    handle.fail(format!("{label} could not be started: {e}"))
                }
                ProcessState::Aborted => handle.fail(format!("{label} was aborted.")),
                _ => handle.fail(format!("{label} crashed.")),
            }
        });
    }

    fn can_abort(&self) -> bool {
        self.supervisor.can_abort()
    }

    fn abort(&mut self) -> bool {
        self.supervisor.abort()
    }

    fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    fn finalize(&mut self) {
        if self.supervisor.can_abort() {
            self.supervisor.abort();
        }
    }
}
