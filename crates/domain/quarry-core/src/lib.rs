pub mod censor;
pub mod level;
pub mod log_model;
pub mod vars;

pub use censor::CensorFilter;
pub use level::MessageLevel;
pub use log_model::{LogEntry, LogModel, SharedLogModel};
pub use vars::{process_env, substitute_variables};

pub type InstanceId = String;
