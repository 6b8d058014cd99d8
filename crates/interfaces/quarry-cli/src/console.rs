//! Terminal stand-ins for the launcher's windows.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use quarry_app_core::{AppEvent, AppEventSender, InstanceWindow, WindowHost, WindowPage};
use quarry_launch::{Instance, MessageLevel};
use tokio_util::sync::CancellationToken;

const TAIL_INTERVAL: Duration = Duration::from_millis(100);

/// Opens "windows" as stdout printers: a console window tails the instance's launch
/// log until the launch ends, a settings window prints the instance summary.
pub struct ConsoleHost {
    events: AppEventSender,
}

impl ConsoleHost {
    pub fn new(events: AppEventSender) -> Self {
        Self { events }
    }
}

struct ConsoleWindow {
    cancel: CancellationToken,
}

impl InstanceWindow for ConsoleWindow {
    fn save_all(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn raise(&mut self) {}

    fn select_page(&mut self, _page: WindowPage) {}

    fn close(&mut self) {
        self.cancel.cancel();
    }
}

fn level_tag(level: MessageLevel) -> &'static str {
    match level {
        MessageLevel::Launcher => "launcher",
        MessageLevel::Debug => "debug",
        MessageLevel::Warning => "warn",
        MessageLevel::Error => "error",
        MessageLevel::Fatal => "fatal",
        MessageLevel::StdErr => "stderr",
        _ => "info",
    }
}

/// Prints new console lines until the launch task ends or the window is closed.
async fn tail_console(instance: Arc<dyn Instance>, cancel: CancellationToken) -> bool {
    let Some(task) = instance.launch_task() else {
        return true;
    };
    let model = task.log_model();
    let mut next = 0u64;
    let mut ticker = tokio::time::interval(TAIL_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = ticker.tick() => {}
        }

        // Sample the state before reading so lines appended just before the end still print.
        let finished = task.state().is_terminal();
        let entries = {
            let model = model.lock().unwrap_or_else(|p| p.into_inner());
            let entries = model.entries_since(next);
            next = model.next_index();
            entries
        };
        if !entries.is_empty() {
            let mut out = std::io::stdout().lock();
            for entry in entries {
                let _ = writeln!(
                    out,
                    "[{}] [{}] {}",
                    instance.id(),
                    level_tag(entry.level),
                    entry.line
                );
            }
        }
        if finished {
            return true;
        }
    }
}

impl WindowHost for ConsoleHost {
    fn open_instance_window(
        &self,
        instance: Arc<dyn Instance>,
        page: WindowPage,
    ) -> anyhow::Result<Box<dyn InstanceWindow>> {
        let cancel = CancellationToken::new();
        let id = instance.id().to_string();
        let events = self.events.clone();

        match page {
            WindowPage::Console => {
                let token = cancel.clone();
                tokio::spawn(async move {
                    if tail_console(instance, token).await {
                        let _ = events.send(AppEvent::InstanceWindowClosed { instance_id: id });
                    }
                });
            }
            WindowPage::Settings => {
                let profile = instance.launch_profile();
                println!("Instance {} ({id})", instance.name());
                println!("  command:     {}", profile.command);
                println!("  working dir: {}", profile.working_dir.display());
                println!(
                    "  state:       {}",
                    if instance.is_running() { "running" } else { "stopped" }
                );
                let _ = events.send(AppEvent::InstanceWindowClosed { instance_id: id });
            }
        }
        Ok(Box::new(ConsoleWindow { cancel }))
    }

    fn show_main_window(&self) -> anyhow::Result<()> {
        tracing::info!("waiting for commands from other quarry processes (Ctrl-C to quit)");
        Ok(())
    }

    fn import(&self, url: &str) -> anyhow::Result<()> {
        anyhow::bail!("importing {url} is not supported without the graphical interface")
    }
}
