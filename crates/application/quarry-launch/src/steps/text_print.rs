use quarry_core::MessageLevel;

use crate::step::{LaunchStep, StepHandle};

/// Writes fixed lines into the console and succeeds immediately.
pub struct TextPrint {
    lines: Vec<String>,
    level: MessageLevel,
}

impl TextPrint {
    pub fn new(lines: Vec<String>, level: MessageLevel) -> Self {
        Self { lines, level }
    }

    pub fn line(line: impl Into<String>, level: MessageLevel) -> Self {
        Self::new(vec![line.into()], level)
    }
}

impl LaunchStep for TextPrint {
    fn name(&self) -> &str {
        "TextPrint"
    }

    fn start(&mut self, handle: StepHandle) {
        handle.log_lines(self.lines.clone(), self.level);
        handle.succeed();
    }
}
