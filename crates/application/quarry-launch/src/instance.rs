use std::collections::BTreeMap;
use std::path::PathBuf;

use futures::future::BoxFuture;
use quarry_core::{CensorFilter, MessageLevel};

use crate::task::LaunchTaskHandle;

/// What a launch pipeline needs to know about how an instance is started.
#[derive(Debug, Clone, Default)]
pub struct LaunchProfile {
    /// Command template; `$NAME` tokens are substituted per argument.
    pub command: String,
    pub working_dir: PathBuf,
    pub pre_launch_command: Option<String>,
    pub post_exit_command: Option<String>,
    /// Written to the child's stdin once it runs; `launch` follows on `proceed`.
    pub launch_script: Option<String>,
    pub censor: CensorFilter,
}

/// One game installation as seen by the launch pipeline.
///
/// Implementations use interior mutability: the same instance is shared between the
/// registry, the controller and the running task.
pub trait Instance: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    fn can_launch(&self) -> bool;
    fn is_running(&self) -> bool;
    fn can_edit(&self) -> bool;
    fn set_running(&self, running: bool);
    fn set_crashed(&self, crashed: bool);
    fn is_crashed(&self) -> bool;

    fn guess_level(&self, line: &str, fallback: MessageLevel) -> MessageLevel {
        MessageLevel::guess(line, fallback)
    }

    /// Instance-specific `$NAME` substitutions (paths, memory settings, ...).
    fn variables(&self) -> BTreeMap<String, String>;

    fn console_max_lines(&self) -> usize {
        quarry_config::DEFAULT_CONSOLE_MAX_LINES
    }

    fn stop_on_console_overflow(&self) -> bool {
        quarry_config::DEFAULT_STOP_ON_OVERFLOW
    }

    /// Open the console window when a launch starts.
    fn show_console(&self) -> bool {
        false
    }

    fn auto_close_console(&self) -> bool {
        false
    }

    fn launch_profile(&self) -> LaunchProfile;

    /// Opaque update/verification work to run before launching, if any.
    fn prepare(&self) -> Option<BoxFuture<'static, Result<(), String>>> {
        None
    }

    fn launch_task(&self) -> Option<LaunchTaskHandle>;
    fn set_launch_task(&self, task: Option<LaunchTaskHandle>);
}
