use std::sync::Arc;

use quarry_launch::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPage {
    Console,
    Settings,
}

/// A per-instance window (console, editor). Reports its own closing through
/// [`crate::AppEvent::InstanceWindowClosed`].
pub trait InstanceWindow: Send + 'static {
    /// Persists pending edits. A launch is refused when this fails.
    fn save_all(&mut self) -> anyhow::Result<()>;
    fn raise(&mut self);
    fn select_page(&mut self, page: WindowPage);
    fn close(&mut self);
}

pub trait WindowHost: Send + Sync + 'static {
    fn open_instance_window(
        &self,
        instance: Arc<dyn Instance>,
        page: WindowPage,
    ) -> anyhow::Result<Box<dyn InstanceWindow>>;
    fn show_main_window(&self) -> anyhow::Result<()>;
    fn import(&self, url: &str) -> anyhow::Result<()>;
}

pub trait InstanceRepo: Send + Sync + 'static {
    fn load(&self) -> anyhow::Result<Vec<Arc<dyn Instance>>>;
}
