use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use quarry_core::MessageLevel;
use quarry_infra::{ChildProcessSupervisor, ProcessCommand, ProcessError, ProcessState};

use super::pump_process_events;
use crate::step::{LaunchStep, StepHandle, StepResult};

const PORT_VARIABLE: &str = "$INST_PORT";

/// Spawns the game itself and stays active for as long as it runs.
///
/// Once the child is up the step reports ready-for-launch. If the instance has a
/// launch script it is fed to stdin immediately and `launch` is only released by
/// `proceed`.
pub struct LaunchProcess {
    template: String,
    working_dir: PathBuf,
    variables: BTreeMap<String, String>,
    server_port: Option<u16>,
    launch_script: Option<String>,
    supervisor: ChildProcessSupervisor,
}

impl LaunchProcess {
    pub fn new(
        template: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        variables: BTreeMap<String, String>,
    ) -> Self {
        Self {
            template: template.into(),
            working_dir: working_dir.into(),
            variables,
            server_port: None,
            launch_script: None,
            supervisor: ChildProcessSupervisor::new(),
        }
    }

    pub fn with_server_port(mut self, port: Option<u16>) -> Self {
        self.server_port = port;
        self
    }

    pub fn with_launch_script(mut self, script: Option<String>) -> Self {
        self.launch_script = script.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.supervisor = self.supervisor.with_grace_period(grace_period);
        self
    }

    pub fn resolve_command(&self) -> Result<ProcessCommand, ProcessError> {
        let mut command =
            ProcessCommand::from_template(&self.template, self.working_dir.clone(), |arg| {
                quarry_core::substitute_variables(arg, &self.variables, quarry_core::process_env())
            })?;
        if let Some(port) = self.server_port {
            if !self.template.contains(PORT_VARIABLE) {
                command.args.push("--port".to_string());
                command.args.push(port.to_string());
            }
        }
        Ok(command.with_env(self.variables.clone()))
    }
}

fn classify(end: ProcessState) -> StepResult {
    match end {
        ProcessState::Finished { exit_code: 0 } => StepResult::Succeeded,
        ProcessState::Finished { exit_code } => {
            StepResult::Failed(format!("Game process exited with code {exit_code}."))
        }
        ProcessState::FailedToStart(e) => {
            StepResult::Failed(format!("Could not launch the game process: {e}"))
        }
        ProcessState::Crashed { signal: Some(signal) } => {
            StepResult::Failed(format!("Game process crashed (signal {signal})."))
        }
        ProcessState::Aborted => StepResult::Failed("Game process was killed by user.".into()),
        _ => StepResult::Failed("Game process crashed.".into()),
    }
}

impl LaunchStep for LaunchProcess {
    fn name(&self) -> &str {
        "LaunchProcess"
    }

    fn start(&mut self, handle: StepHandle) {
        let command = match self.resolve_command() {
            Ok(command) => command,
            Err(e) => {
                handle.fail(format!("Could not launch the game process: {e}"));
                return;
            }
        };
        handle.log_line(
            format!("Launching with command: {command}"),
            MessageLevel::Launcher,
        );

        let mut events = match self.supervisor.start(command) {
            Ok(events) => events,
            Err(e) => {
                handle.fail(format!("Could not launch the game process: {e}"));
                return;
            }
        };
        if let Some(script) = &self.launch_script {
            let mut script = script.clone();
            if !script.ends_with('\n') {
                script.push('\n');
            }
            self.supervisor.write(script);
        }

        tokio::spawn(async move {
            let end = pump_process_events(&handle, &mut events, |pid| {
                if let Some(pid) = pid {
                    handle.log_line(format!("Game process started (pid {pid})."), MessageLevel::Launcher);
                }
                handle.ready_for_launch();
            })
            .await;
            handle.finish(classify(end));
        });
    }

    fn can_abort(&self) -> bool {
        self.supervisor.can_abort()
    }

    fn abort(&mut self) -> bool {
        self.supervisor.abort()
    }

    fn proceed(&mut self) {
        if self.launch_script.is_some() {
            self.supervisor.write("launch\n");
        }
    }

    fn write_stdin(&mut self, data: &[u8]) -> bool {
        self.supervisor.write(data.to_vec())
    }

    fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    fn finalize(&mut self) {
        if self.supervisor.can_abort() {
            tracing::debug!("game process still running at finalize, terminating");
            self.supervisor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("INST_DIR".to_string(), "/srv/My Server".to_string()),
            ("INST_PORT".to_string(), "25565".to_string()),
        ])
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn port_is_appended_when_template_does_not_reference_it() {
        let step = LaunchProcess::new("run $INST_DIR/server.jar", ".", vars())
            .with_server_port(Some(25565));
        let cmd = step.resolve_command().unwrap();
        assert_eq!(cmd.args, vec!["/srv/My Server/server.jar", "--port", "25565"]);
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn port_is_not_duplicated_when_template_uses_it() {
        let step =
            LaunchProcess::new("run -p $INST_PORT", ".", vars()).with_server_port(Some(25565));
        let cmd = step.resolve_command().unwrap();
        assert_eq!(cmd.args, vec!["-p", "25565"]);
    }

    #[test]
    fn exit_classification_keeps_categories_apart() {
        assert_eq!(
            classify(ProcessState::Finished { exit_code: 0 }),
            StepResult::Succeeded
        );
        let spawn = classify(ProcessState::FailedToStart("not found".into()));
        let exit = classify(ProcessState::Finished { exit_code: 3 });
        let killed = classify(ProcessState::Aborted);
        assert_eq!(
            spawn,
            StepResult::Failed("Could not launch the game process: not found".into())
        );
        assert_eq!(exit, StepResult::Failed("Game process exited with code 3.".into()));
        assert_eq!(killed, StepResult::Failed("Game process was killed by user.".into()));
    }
}
