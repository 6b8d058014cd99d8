use std::sync::Arc;

use crate::instance::Instance;
use crate::steps::{CommandPhase, LaunchProcess, PrepareInstance, ShellCommand};
use crate::task::LaunchTask;

/// Per-attempt knobs that end up as instance variables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub online: bool,
    pub server_port: Option<u16>,
}

/// Assembles the standard pipeline for `instance`:
/// prepare, optional pre-launch command, the game process, optional post-exit command.
pub fn build_launch_task(instance: Arc<dyn Instance>, options: &LaunchOptions) -> LaunchTask {
    let profile = instance.launch_profile();

    let mut variables = instance.variables();
    variables.insert("INST_ID".to_string(), instance.id().to_string());
    variables.insert("INST_NAME".to_string(), instance.name().to_string());
    variables.insert("INST_ONLINE".to_string(), options.online.to_string());
    if let Some(port) = options.server_port {
        variables.insert("INST_PORT".to_string(), port.to_string());
    }

    let mut task = LaunchTask::new(instance.clone());
    task.set_censor_filter(profile.censor.clone());

    task.append_step(PrepareInstance::new(instance.prepare()));

    if let Some(script) = profile.pre_launch_command.filter(|s| !s.trim().is_empty()) {
        task.append_step(ShellCommand::new(
            CommandPhase::PreLaunch,
            script,
            profile.working_dir.clone(),
            variables.clone(),
        ));
    }

    task.append_step(
        LaunchProcess::new(profile.command, profile.working_dir.clone(), variables.clone())
            .with_server_port(options.server_port)
            .with_launch_script(profile.launch_script),
    );

    if let Some(script) = profile.post_exit_command.filter(|s| !s.trim().is_empty()) {
        task.append_step(ShellCommand::new(
            CommandPhase::PostExit,
            script,
            profile.working_dir,
            variables,
        ));
    }

    task
}
