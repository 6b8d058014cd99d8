pub mod instance;
pub mod pipeline;
pub mod profiler;
pub mod step;
pub mod steps;
pub mod task;

pub use instance::{Instance, LaunchProfile};
pub use pipeline::{build_launch_task, LaunchOptions};
pub use profiler::{CommandProfilerFactory, Profiler, ProfilerFactory};
pub use step::{LaunchStep, StepHandle, StepResult};
pub use task::{LaunchTask, LaunchTaskHandle, TaskNotice, TaskOutcome, TaskState, ABORTED_REASON};

// Re-export core types often needed by consumers
pub use quarry_core::{CensorFilter, LogModel, MessageLevel, SharedLogModel};
