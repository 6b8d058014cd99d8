use quarry_core::MessageLevel;
use tokio::sync::mpsc;

use crate::task::TaskEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Succeeded,
    Failed(String),
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Succeeded)
    }
}

/// One phase of a launch pipeline.
///
/// `start` must eventually lead to exactly one [`StepHandle::finish`] call; any extra
/// reports are ignored by the task. `finalize` runs for every started step once the
/// task ends, whatever the outcome, and must be idempotent.
pub trait LaunchStep: Send {
    fn name(&self) -> &str;

    fn start(&mut self, handle: StepHandle);

    fn can_abort(&self) -> bool {
        false
    }

    /// Returns whether the abort was honored.
    fn abort(&mut self) -> bool {
        false
    }

    /// Resume after the step reported [`StepHandle::ready_for_launch`].
    fn proceed(&mut self) {}

    fn write_stdin(&mut self, _data: &[u8]) -> bool {
        false
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn finalize(&mut self) {}
}

/// A step's way back into its task. Cheap to clone into spawned work.
#[derive(Debug, Clone)]
pub struct StepHandle {
    index: usize,
    events: mpsc::UnboundedSender<TaskEvent>,
}

impl StepHandle {
    pub(crate) fn new(index: usize, events: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self { index, events }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn finish(&self, result: StepResult) {
        let _ = self.events.send(TaskEvent::StepFinished {
            index: self.index,
            result,
        });
    }

    pub fn succeed(&self) {
        self.finish(StepResult::Succeeded);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.finish(StepResult::Failed(reason.into()));
    }

    pub fn log_line(&self, line: impl Into<String>, level: MessageLevel) {
        self.log_lines(vec![line.into()], level);
    }

    pub fn log_lines(&self, lines: Vec<String>, level: MessageLevel) {
        let _ = self.events.send(TaskEvent::LogLines { lines, level });
    }

    /// Puts the task into `Waiting` until someone calls `proceed`.
    pub fn ready_for_launch(&self) {
        let _ = self.events.send(TaskEvent::ReadyForLaunch { index: self.index });
    }
}
