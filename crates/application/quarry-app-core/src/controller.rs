use std::sync::Arc;

use quarry_core::InstanceId;
use quarry_launch::steps::TextPrint;
use quarry_launch::{
    build_launch_task, Instance, LaunchOptions, LaunchStep, LaunchTaskHandle, MessageLevel,
    Profiler, ProfilerFactory, StepHandle, TaskNotice, TaskOutcome,
};

use crate::events::{AppEvent, AppEventSender, AttemptId};

/// Where dialogs for an attempt would be anchored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParentWindow {
    #[default]
    Main,
    Instance(InstanceId),
}

/// Binds one launch attempt to its policy (online mode, port, profiler) and reports
/// the attempt's end exactly once as an [`AppEvent`].
pub struct LaunchController {
    attempt: AttemptId,
    instance: Option<Arc<dyn Instance>>,
    online: bool,
    profiler: Option<Arc<dyn ProfilerFactory>>,
    server_port: Option<u16>,
    parent: ParentWindow,
    events: AppEventSender,
    task: Option<LaunchTaskHandle>,
    started: bool,
}

impl LaunchController {
    pub fn new(events: AppEventSender) -> Self {
        Self {
            attempt: uuid::Uuid::new_v4(),
            instance: None,
            online: false,
            profiler: None,
            server_port: None,
            parent: ParentWindow::Main,
            events,
            task: None,
            started: false,
        }
    }

    pub fn set_instance(&mut self, instance: Arc<dyn Instance>) {
        self.instance = Some(instance);
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn set_profiler(&mut self, profiler: Option<Arc<dyn ProfilerFactory>>) {
        self.profiler = profiler;
    }

    pub fn set_server_port(&mut self, port: Option<u16>) {
        self.server_port = port;
    }

    pub fn set_parent_window(&mut self, parent: ParentWindow) {
        self.parent = parent;
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn server_port(&self) -> Option<u16> {
        self.server_port
    }

    pub fn parent_window(&self) -> &ParentWindow {
        &self.parent
    }

    /// Id of the bound instance, empty when none is set.
    pub fn id(&self) -> &str {
        self.instance.as_ref().map(|i| i.id()).unwrap_or_default()
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn task(&self) -> Option<&LaunchTaskHandle> {
        self.task.as_ref()
    }

    fn emit_failed(&self, reason: String) {
        tracing::error!(instance = %self.id(), attempt = %self.attempt, %reason, "launch failed");
        let _ = self.events.send(AppEvent::ControllerFailed {
            instance_id: self.id().to_string(),
            attempt: self.attempt,
            reason,
        });
    }

    /// Must be called from within a tokio runtime. A second call is ignored.
    pub fn start(&mut self) {
        if self.started {
            tracing::warn!(attempt = %self.attempt, "launch controller started twice");
            return;
        }
        self.started = true;

        let Some(instance) = self.instance.clone() else {
            self.emit_failed("No instance specified".to_string());
            return;
        };
        if let Some(current) = instance.launch_task() {
            if !current.state().is_terminal() {
                self.emit_failed("Instance is already being launched".to_string());
                return;
            }
        }

        let options = LaunchOptions {
            online: self.online,
            server_port: self.server_port,
        };
        let mut task = build_launch_task(instance.clone(), &options);

        let mut header = vec![
            format!("Quarry version: {}", quarry_config::LAUNCHER_VERSION),
            format!("Instance: {} ({})", instance.name(), instance.id()),
            format!(
                "Launch started at {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            ),
        ];
        if let Some(port) = self.server_port {
            header.push(format!("Server port: {port}"));
        }
        let profiler = self.profiler.clone();
        if let Some(factory) = &profiler {
            task.prepend_step(ProfilerCheck {
                factory: factory.clone(),
            });
        }
        task.prepend_step(TextPrint::new(header, MessageLevel::Launcher));

        let mut notices = task.subscribe();
        let handle = task.handle();
        instance.set_launch_task(Some(handle.clone()));
        self.task = Some(handle.clone());

        let tool = profiler.map(|factory| factory.create_tool(instance.clone()));
        let events = self.events.clone();
        let attempt = self.attempt;
        let instance_id = instance.id().to_string();

        tracing::info!(instance = %instance_id, %attempt, "starting launch");
        tokio::spawn(async move {
            let tool: Option<Arc<dyn Profiler>> = tool.map(Arc::from);
            let run = task.run();
            tokio::pin!(run);
            let outcome = loop {
                tokio::select! {
                    outcome = &mut run => break outcome,
                    Some(notice) = notices.recv() => {
                        if let TaskNotice::ReadyForLaunch { pid } = notice {
                            release_launch(&handle, tool.clone(), pid);
                        }
                    }
                }
            };

            let event = match outcome {
                TaskOutcome::Succeeded => {
                    tracing::info!(instance = %instance_id, %attempt, "launch finished");
                    AppEvent::ControllerSucceeded {
                        instance_id,
                        attempt,
                    }
                }
                TaskOutcome::Failed(reason) => {
                    tracing::error!(instance = %instance_id, %attempt, %reason, "launch failed");
                    AppEvent::ControllerFailed {
                        instance_id,
                        attempt,
                        reason,
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    /// Returns true when there is nothing left to abort.
    pub async fn abort(&self) -> bool {
        match &self.task {
            Some(task) => task.abort().await,
            None => true,
        }
    }
}

/// Lets the game continue, attaching the profiler first when one is configured.
fn release_launch(handle: &LaunchTaskHandle, tool: Option<Arc<dyn Profiler>>, pid: Option<u32>) {
    let (Some(tool), Some(pid)) = (tool, pid) else {
        handle.proceed();
        return;
    };
    let handle = handle.clone();
    tokio::spawn(async move {
        match tool.begin_profiling(pid).await {
            Ok(message) => handle.log_line(message, MessageLevel::Launcher),
            Err(e) => handle.log_line(
                format!("Profiler {} failed: {e}", tool.name()),
                MessageLevel::Error,
            ),
        }
        handle.proceed();
    });
}

/// Refuses to launch when the selected profiler is not usable.
struct ProfilerCheck {
    factory: Arc<dyn ProfilerFactory>,
}

impl LaunchStep for ProfilerCheck {
    fn name(&self) -> &str {
        "ProfilerCheck"
    }

    fn start(&mut self, handle: StepHandle) {
        let factory = self.factory.clone();
        tokio::spawn(async move {
            match factory.check().await {
                Ok(()) => {
                    handle.log_line(
                        format!("Using profiler {}.", factory.name()),
                        MessageLevel::Launcher,
                    );
                    handle.succeed();
                }
                Err(e) => handle.fail(format!("Couldn't start profiler: {e}")),
            }
        });
    }
}
