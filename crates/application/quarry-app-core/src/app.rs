use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use quarry_core::InstanceId;
use quarry_infra::{ApplicationId, LocalPeer, PeerClient, PeerError, PeerRole, PeerServer};
use quarry_launch::Instance;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{AppEvent, AppEventReceiver, AppEventSender, AttemptId};
use crate::ipc::PeerCommand;
use crate::ports::{InstanceRepo, WindowHost};
use crate::registry::{ExitCode, LaunchRegistry};

const QUALIFIER: &str = "org";
const ORG: &str = "quarry";
const APP: &str = "quarry";

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad command-line combination. Nothing has been set up yet.
    #[error("{0}")]
    Usage(String),
    /// The data directory is unusable; startup cannot continue.
    #[error("{0}")]
    Environment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    StartingUp,
    Failed,
    Succeeded,
    Initialized,
}

/// What this process was asked to do on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupOptions {
    pub data_dir: PathBuf,
    pub launch: Option<InstanceId>,
    pub server_port: Option<u16>,
    /// Already converted to a URL.
    pub import: Option<String>,
}

impl StartupOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.server_port.is_some() && self.launch.is_none() {
            return Err(AppError::Usage(
                "--port can only be used in combination with --launch!".into(),
            ));
        }
        Ok(())
    }

    /// The single line a secondary process forwards to the primary.
    pub fn peer_command(&self) -> PeerCommand {
        match (&self.launch, self.server_port, &self.import) {
            (Some(id), Some(port), _) => PeerCommand::LaunchWithPort(id.clone(), port),
            (Some(id), None, _) => PeerCommand::Launch(id.clone()),
            (None, _, Some(url)) => PeerCommand::Import(url.clone()),
            (None, _, None) => PeerCommand::Activate,
        }
    }
}

/// Platform data directory, or the working directory when there is none.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from(QUALIFIER, ORG, APP)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Creates `path` if needed, checks it is writable and returns its absolute form.
pub fn prepare_data_dir(path: &Path) -> Result<PathBuf, AppError> {
    fs::create_dir_all(path).map_err(|e| {
        AppError::Environment(format!(
            "Quarry data folder could not be created ({}): {e}",
            path.display()
        ))
    })?;
    let path = path.canonicalize().map_err(|e| {
        AppError::Environment(format!(
            "Quarry data folder could not be resolved ({}): {e}",
            path.display()
        ))
    })?;

    let probe = path.join(".quarry-write-test");
    fs::write(&probe, b"quarry").map_err(|e| {
        AppError::Environment(format!(
            "Quarry data folder is not writable ({}): {e}",
            path.display()
        ))
    })?;
    let _ = fs::remove_file(&probe);
    Ok(path)
}

pub enum PeerClaim {
    Primary(PeerServer),
    Secondary(PeerClient),
}

/// Elects this process as the primary for `data_dir`, or finds the one that is.
pub async fn claim_data_dir(data_dir: &Path) -> Result<PeerClaim, AppError> {
    let id = ApplicationId::from_path_and_version(data_dir, quarry_config::LAUNCHER_VERSION);
    match LocalPeer::claim(&id, data_dir).await {
        Ok(PeerRole::Primary(server)) => Ok(PeerClaim::Primary(server)),
        Ok(PeerRole::Secondary(client)) => Ok(PeerClaim::Secondary(client)),
        Err(e) => Err(AppError::Environment(format!(
            "Could not set up single-instance coordination: {e}"
        ))),
    }
}

/// Sends `command` to the primary with the standard delivery timeout.
pub async fn forward_to_primary(
    client: &PeerClient,
    command: &PeerCommand,
) -> Result<(), PeerError> {
    tracing::debug!(%command, "forwarding command to running instance");
    client
        .send_message(&command.to_string(), quarry_config::PEER_MESSAGE_TIMEOUT)
        .await
}

/// The primary process: owns the registry and dispatches launch requests from the
/// command line, windows and secondary processes.
pub struct QuarryApplication {
    status: AppStatus,
    options: StartupOptions,
    repo: Box<dyn InstanceRepo>,
    instances: BTreeMap<InstanceId, Arc<dyn Instance>>,
    windows: Arc<dyn WindowHost>,
    registry: LaunchRegistry,
    events: AppEventReceiver,
    peer: Option<PeerServer>,
    pending_exit: Option<ExitCode>,
    command_line_attempt: Option<AttemptId>,
    command_line_failed: bool,
}

impl QuarryApplication {
    pub fn new(
        options: StartupOptions,
        repo: impl InstanceRepo,
        windows: Arc<dyn WindowHost>,
        events: (AppEventSender, AppEventReceiver),
        peer: Option<PeerServer>,
    ) -> Self {
        let (events_tx, events_rx) = events;
        Self {
            status: AppStatus::StartingUp,
            options,
            repo: Box::new(repo),
            instances: BTreeMap::new(),
            registry: LaunchRegistry::new(windows.clone(), events_tx),
            windows,
            events: events_rx,
            peer,
            pending_exit: None,
            command_line_attempt: None,
            command_line_failed: false,
        }
    }

    pub fn status(&self) -> AppStatus {
        self.status
    }

    pub fn registry(&self) -> &LaunchRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut LaunchRegistry {
        &mut self.registry
    }

    pub fn instance(&self, id: &str) -> Option<Arc<dyn Instance>> {
        self.instances.get(id).cloned()
    }

    /// Loads instances and performs the command-line request. Peer commands are only
    /// honored from here on.
    pub fn initialize(&mut self) -> Result<(), AppError> {
        let instances = match self.repo.load() {
            Ok(instances) => instances,
            Err(e) => {
                self.status = AppStatus::Failed;
                return Err(AppError::Environment(format!(
                    "Failed to load instances: {e:#}"
                )));
            }
        };
        self.instances = instances
            .into_iter()
            .map(|i| (i.id().to_string(), i))
            .collect();
        self.drop_early_peer_messages();
        self.status = AppStatus::Initialized;
        tracing::info!(
            instances = self.instances.len(),
            data_dir = %self.options.data_dir.display(),
            "quarry initialized"
        );

        if let Some(id) = self.options.launch.clone() {
            let port = self.options.server_port;
            if self.launch_by_id(&id, port) {
                self.command_line_attempt = self.registry.controller(&id).map(|c| c.attempt());
            } else {
                tracing::error!(instance = %id, "requested launch could not be started");
                self.command_line_failed = true;
                if self.registry.running_count() == 0 && self.registry.open_window_count() == 0 {
                    self.pending_exit = Some(1);
                }
            }
        } else if let Some(url) = self.options.import.clone() {
            self.import(&url);
        } else {
            self.registry.show_main_window();
        }
        Ok(())
    }

    fn launch_by_id(&mut self, id: &str, port: Option<u16>) -> bool {
        let Some(instance) = self.instance(id) else {
            tracing::warn!(instance = %id, "no instance with this id");
            return false;
        };
        self.registry.launch(instance, true, None, port)
    }

    fn import(&mut self, url: &str) {
        if let Err(e) = self.windows.import(url) {
            tracing::warn!(%url, "import failed: {e:#}");
        }
        self.registry.show_main_window();
    }

    /// Lines that reached the peer server during startup were acknowledged but are
    /// never executed.
    fn drop_early_peer_messages(&mut self) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        for line in peer.drain_pending() {
            tracing::warn!(message = %line, "received peer message before initialization, dropping it");
        }
    }

    pub fn handle_peer_message(&mut self, line: &str) {
        if self.status != AppStatus::Initialized {
            tracing::warn!(message = %line, "received peer message before initialization, dropping it");
            return;
        }
        match PeerCommand::parse(line) {
            Ok(command) => self.handle_command(command),
            Err(e) => tracing::warn!("ignoring peer message: {e}"),
        }
    }

    pub fn handle_command(&mut self, command: PeerCommand) {
        tracing::debug!(%command, "handling peer command");
        match command {
            PeerCommand::Activate => self.registry.show_main_window(),
            PeerCommand::Import(url) => self.import(&url),
            PeerCommand::Launch(id) => {
                self.launch_by_id(&id, None);
            }
            PeerCommand::LaunchWithPort(id, port) => {
                self.launch_by_id(&id, Some(port));
            }
        }
    }

    /// Whether the launch requested on the command line has failed. Every exit from
    /// then on reports status 1.
    pub fn command_line_failed(&self) -> bool {
        self.command_line_failed
    }

    pub fn handle_event(&mut self, event: AppEvent) -> Option<ExitCode> {
        if let AppEvent::ControllerFailed { attempt, .. } = &event {
            if self.command_line_attempt == Some(*attempt) {
                self.command_line_failed = true;
            }
        }
        match event {
            AppEvent::ControllerSucceeded {
                instance_id,
                attempt,
            } => self.registry.on_controller_succeeded(&instance_id, attempt),
            AppEvent::ControllerFailed {
                instance_id,
                attempt,
                reason,
            } => self
                .registry
                .on_controller_failed(&instance_id, attempt, &reason),
            AppEvent::InstanceWindowClosed { instance_id } => {
                self.registry.on_instance_window_closed(&instance_id)
            }
            AppEvent::MainWindowClosed => self.registry.on_main_window_closed(),
        }
    }

    /// Runs until the registry asks to exit or `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) -> ExitCode {
        if self.status == AppStatus::StartingUp {
            if let Err(e) = self.initialize() {
                tracing::error!("{e}");
                return 1;
            }
        }
        if let Some(code) = self.pending_exit.take() {
            return self.finish(code);
        }

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => {
                    if let Some(code) = self.handle_event(event) {
                        return self.finish(code);
                    }
                }
                Some(line) = next_peer_message(self.peer.as_mut()) => {
                    self.handle_peer_message(&line);
                }
                _ = shutdown.cancelled() => {
                    return self.shut_down().await;
                }
            }
        }
    }

    async fn shut_down(mut self) -> ExitCode {
        tracing::info!(running = self.registry.running_count(), "shutting down");
        self.peer = None;
        for controller in self.registry.live_controllers() {
            controller.abort().await;
        }

        let deadline = quarry_config::ABORT_GRACE_PERIOD + Duration::from_secs(2);
        let drained = tokio::time::timeout(deadline, async {
            while self.registry.running_count() > 0 {
                match self.events.recv().await {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => break,
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("launches did not stop in time");
        }
        self.finish(0)
    }

    fn finish(&mut self, code: ExitCode) -> ExitCode {
        let code = if self.command_line_failed { 1 } else { code };
        self.status = if code == 0 {
            AppStatus::Succeeded
        } else {
            AppStatus::Failed
        };
        tracing::info!(code, "quarry exiting");
        code
    }
}

async fn next_peer_message(peer: Option<&mut PeerServer>) -> Option<String> {
    match peer {
        Some(peer) => peer.recv().await,
        None => std::future::pending().await,
    }
}
