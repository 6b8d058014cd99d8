pub mod app;
pub mod controller;
pub mod events;
pub mod ipc;
pub mod persistence;
pub mod ports;
pub mod registry;

pub use app::{
    claim_data_dir, default_data_dir, forward_to_primary, prepare_data_dir, AppError, AppStatus,
    PeerClaim, QuarryApplication, StartupOptions,
};
pub use controller::{LaunchController, ParentWindow};
pub use events::{app_events, AppEvent, AppEventReceiver, AppEventSender, AttemptId};
pub use ipc::{import_url, PeerCommand, PeerCommandError};
pub use persistence::{FileInstance, InstanceConfig, InstanceList};
pub use ports::{InstanceRepo, InstanceWindow, WindowHost, WindowPage};
pub use registry::{ExitCode, LaunchRegistry};
