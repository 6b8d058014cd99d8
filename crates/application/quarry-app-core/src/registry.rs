use std::collections::HashMap;
use std::sync::Arc;

use quarry_core::InstanceId;
use quarry_launch::{Instance, ProfilerFactory};

use crate::controller::{LaunchController, ParentWindow};
use crate::events::{AppEventSender, AttemptId};
use crate::ports::{InstanceWindow, WindowHost, WindowPage};

/// Process exit status requested by the registry once nothing is left running or open.
pub type ExitCode = i32;

#[derive(Default)]
struct InstanceExtras {
    instance: Option<Arc<dyn Instance>>,
    controller: Option<LaunchController>,
    window: Option<Box<dyn InstanceWindow>>,
}

impl InstanceExtras {
    fn is_idle(&self) -> bool {
        self.controller.is_none() && self.window.is_none()
    }
}

/// Process-wide bookkeeping of live launch attempts and open windows.
///
/// Owned by the application loop; all mutation happens there.
pub struct LaunchRegistry {
    extras: HashMap<InstanceId, InstanceExtras>,
    running: usize,
    open_windows: usize,
    main_window_open: bool,
    update_running: bool,
    windows: Arc<dyn WindowHost>,
    events: AppEventSender,
}

impl LaunchRegistry {
    pub fn new(windows: Arc<dyn WindowHost>, events: AppEventSender) -> Self {
        Self {
            extras: HashMap::new(),
            running: 0,
            open_windows: 0,
            main_window_open: false,
            update_running: false,
            windows,
            events,
        }
    }

    pub fn running_count(&self) -> usize {
        self.running
    }

    pub fn open_window_count(&self) -> usize {
        self.open_windows + usize::from(self.main_window_open)
    }

    pub fn set_update_running(&mut self, running: bool) {
        self.update_running = running;
    }

    pub fn updates_allowed(&self) -> bool {
        self.running == 0
    }

    pub fn controller(&self, id: &str) -> Option<&LaunchController> {
        self.extras.get(id)?.controller.as_ref()
    }

    pub fn has_window(&self, id: &str) -> bool {
        self.extras.get(id).is_some_and(|e| e.window.is_some())
    }

    /// Number of instances with a live attempt or an open window.
    pub fn tracked_count(&self) -> usize {
        self.extras.len()
    }

    /// Drops the record of `id` once it has neither a controller nor a window.
    fn forget_if_idle(&mut self, id: &str) {
        if self.extras.get(id).is_some_and(InstanceExtras::is_idle) {
            self.extras.remove(id);
        }
    }

    fn should_exit_now(&self) -> bool {
        self.running == 0 && self.open_window_count() == 0
    }

    /// Returns whether the request was handled (launched, or a window surfaced).
    pub fn launch(
        &mut self,
        instance: Arc<dyn Instance>,
        online: bool,
        profiler: Option<Arc<dyn ProfilerFactory>>,
        server_port: Option<u16>,
    ) -> bool {
        let id = instance.id().to_string();
        if self.update_running {
            tracing::warn!(instance = %id, "cannot launch while an update is running");
            return false;
        }

        if instance.can_launch() {
            let extras = self.extras.entry(id.clone()).or_default();
            extras.instance = Some(instance.clone());
            if let Some(window) = extras.window.as_mut() {
                if let Err(e) = window.save_all() {
                    tracing::warn!(instance = %id, "not launching, instance settings could not be saved: {e:#}");
                    return false;
                }
            }

            let mut controller = LaunchController::new(self.events.clone());
            controller.set_instance(instance.clone());
            controller.set_online(online);
            controller.set_profiler(profiler);
            controller.set_server_port(server_port);
            controller.set_parent_window(if extras.window.is_some() {
                ParentWindow::Instance(id.clone())
            } else {
                ParentWindow::Main
            });
            controller.start();
            extras.controller = Some(controller);
            self.running += 1;
            tracing::debug!(instance = %id, running = self.running, "launch dispatched");

            if instance.show_console() {
                self.show_instance_window(instance, WindowPage::Console);
            }
            return true;
        }

        if instance.is_running() {
            self.show_instance_window(instance, WindowPage::Console);
            return true;
        }

        if instance.can_edit() {
            self.show_instance_window(instance, WindowPage::Settings);
            return true;
        }

        tracing::debug!(instance = %id, "instance can be neither launched nor edited");
        false
    }

    /// Aborts the live launch of `instance`. False when it was not running.
    pub async fn kill(&self, instance: &dyn Instance) -> bool {
        if !instance.is_running() {
            tracing::warn!(instance = %instance.id(), "attempted to kill instance that is not running");
            return false;
        }
        match self.controller(instance.id()) {
            Some(controller) => controller.abort().await,
            None => {
                tracing::warn!(instance = %instance.id(), "running instance has no launch controller");
                false
            }
        }
    }

    /// Controllers of every live attempt, for shutdown.
    pub fn live_controllers(&self) -> impl Iterator<Item = &LaunchController> {
        self.extras.values().filter_map(|e| e.controller.as_ref())
    }

    pub fn show_instance_window(&mut self, instance: Arc<dyn Instance>, page: WindowPage) {
        let id = instance.id().to_string();
        let extras = self.extras.entry(id.clone()).or_default();
        extras.instance = Some(instance.clone());

        if let Some(window) = extras.window.as_mut() {
            window.raise();
            window.select_page(page);
            return;
        }

        match self.windows.open_instance_window(instance, page) {
            Ok(window) => {
                extras.window = Some(window);
                self.open_windows += 1;
                if let Some(controller) = extras.controller.as_mut() {
                    controller.set_parent_window(ParentWindow::Instance(id));
                }
            }
            Err(e) => {
                tracing::warn!(instance = %id, "could not open instance window: {e:#}");
                self.forget_if_idle(&id);
            }
        }
    }

    pub fn show_main_window(&mut self) {
        match self.windows.show_main_window() {
            Ok(()) => self.main_window_open = true,
            Err(e) => tracing::warn!("could not show main window: {e:#}"),
        }
    }

    pub fn on_main_window_closed(&mut self) -> Option<ExitCode> {
        self.main_window_open = false;
        self.should_exit_now().then_some(0)
    }

    pub fn on_instance_window_closed(&mut self, id: &str) -> Option<ExitCode> {
        let Some(extras) = self.extras.get_mut(id) else {
            return None;
        };
        if extras.window.take().is_none() {
            return None;
        }
        self.open_windows = self.open_windows.saturating_sub(1);
        if let Some(controller) = extras.controller.as_mut() {
            controller.set_parent_window(ParentWindow::Main);
        }
        self.forget_if_idle(id);
        self.should_exit_now().then_some(0)
    }

    /// Clears the attempt's controller. None when `attempt` is not the live one.
    fn finish_attempt(&mut self, id: &str, attempt: AttemptId) -> Option<&mut InstanceExtras> {
        let extras = self.extras.get_mut(id)?;
        match &extras.controller {
            Some(controller) if controller.attempt() == attempt => {}
            _ => {
                tracing::debug!(instance = %id, %attempt, "ignoring result of a stale launch attempt");
                return None;
            }
        }
        extras.controller = None;
        self.running = self.running.saturating_sub(1);
        Some(extras)
    }

    pub fn on_controller_succeeded(&mut self, id: &str, attempt: AttemptId) -> Option<ExitCode> {
        let extras = self.finish_attempt(id, attempt)?;
        let auto_close = extras
            .instance
            .as_ref()
            .is_some_and(|i| i.auto_close_console());
        let closing = if auto_close { extras.window.take() } else { None };
        if let Some(mut window) = closing {
            window.close();
            self.open_windows = self.open_windows.saturating_sub(1);
        }
        self.forget_if_idle(id);
        self.should_exit_now().then_some(0)
    }

    pub fn on_controller_failed(
        &mut self,
        id: &str,
        attempt: AttemptId,
        reason: &str,
    ) -> Option<ExitCode> {
        tracing::error!(instance = %id, %attempt, %reason, "instance launch failed");
        self.finish_attempt(id, attempt)?;
        self.forget_if_idle(id);
        self.should_exit_now().then_some(1)
    }
}
