//! Concrete launch steps.

mod command;
mod prepare;
mod process;
mod text_print;

pub use command::{CommandPhase, ShellCommand};
pub use prepare::PrepareInstance;
pub use process::LaunchProcess;
pub use text_print::TextPrint;

use quarry_core::MessageLevel;
use quarry_infra::{OutputStream, ProcessEvent, ProcessState};
use tokio::sync::mpsc;

use crate::step::StepHandle;

fn stream_level(stream: OutputStream) -> MessageLevel {
    match stream {
        OutputStream::Stdout => MessageLevel::StdOut,
        OutputStream::Stderr => MessageLevel::StdErr,
    }
}

/// Pumps supervisor events into the task until the process ends, then returns the
/// terminal state.
///
/// `on_running` fires once when the child is up.
async fn pump_process_events(
    handle: &StepHandle,
    events: &mut mpsc::UnboundedReceiver<ProcessEvent>,
    mut on_running: impl FnMut(Option<u32>),
) -> ProcessState {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Output { stream, line } => handle.log_line(line, stream_level(stream)),
            ProcessEvent::State(ProcessState::Running { pid }) => on_running(pid),
            ProcessEvent::State(state) if state.is_terminal() => return state,
            ProcessEvent::State(_) => {}
        }
    }
    ProcessState::Crashed { signal: None }
}
