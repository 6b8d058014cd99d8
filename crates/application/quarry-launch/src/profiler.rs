use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use quarry_infra::{ChildProcessSupervisor, ProcessCommand, ProcessEvent, ProcessState};

use crate::instance::Instance;

/// A profiler attached to one running game process.
#[async_trait]
pub trait Profiler: Send + Sync {
    fn name(&self) -> &str;

    /// Attaches to `pid`. The `Ok` message goes into the console.
    async fn begin_profiling(&self, pid: u32) -> Result<String, String>;
}

#[async_trait]
pub trait ProfilerFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Verifies the tool is usable before a launch is started with it.
    async fn check(&self) -> Result<(), String>;

    fn create_tool(&self, instance: Arc<dyn Instance>) -> Box<dyn Profiler>;
}

/// Profiler backed by an external program, e.g. `jvisualvm --openpid $PID`.
#[derive(Debug, Clone)]
pub struct CommandProfilerFactory {
    name: String,
    template: String,
}

impl CommandProfilerFactory {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }
}

fn find_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[async_trait]
impl ProfilerFactory for CommandProfilerFactory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), String> {
        let command = ProcessCommand::from_template(&self.template, ".", |arg| arg.to_string())
            .map_err(|e| format!("{} is not configured correctly: {e}", self.name))?;
        match find_program(&command.program) {
            Some(_) => Ok(()),
            None => Err(format!(
                "{} was not found ({}).",
                self.name, command.program
            )),
        }
    }

    fn create_tool(&self, instance: Arc<dyn Instance>) -> Box<dyn Profiler> {
        Box::new(CommandProfiler {
            name: self.name.clone(),
            template: self.template.clone(),
            instance,
        })
    }
}

struct CommandProfiler {
    name: String,
    template: String,
    instance: Arc<dyn Instance>,
}

#[async_trait]
impl Profiler for CommandProfiler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin_profiling(&self, pid: u32) -> Result<String, String> {
        let mut variables = self.instance.variables();
        variables.insert("PID".to_string(), pid.to_string());

        let command = ProcessCommand::from_template(&self.template, ".", |arg| {
            quarry_core::substitute_variables(arg, &variables, quarry_core::process_env())
        })
        .map_err(|e| format!("Could not start {}: {e}", self.name))?;

        // The profiler outlives this call; its supervisor keeps watching in the background.
        let mut supervisor = ChildProcessSupervisor::new();
        let mut events = supervisor
            .start(command)
            .map_err(|e| format!("Could not start {}: {e}", self.name))?;
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::State(ProcessState::Running { .. }) => {
                    let name = self.name.clone();
                    tokio::spawn(async move {
                        while let Some(event) = events.recv().await {
                            if let ProcessEvent::Output { line, .. } = event {
                                tracing::debug!(profiler = %name, "{line}");
                            }
                        }
                    });
                    return Ok(format!("{} started.", self.name));
                }
                ProcessEvent::State(ProcessState::FailedToStart(e)) => {
                    return Err(format!("Could not start {}: {e}", self.name));
                }
                ProcessEvent::State(state) if state.is_terminal() => {
                    return Err(format!("{} exited immediately.", self.name));
                }
                _ => {}
            }
        }
        Err(format!("{} exited immediately.", self.name))
    }
}
