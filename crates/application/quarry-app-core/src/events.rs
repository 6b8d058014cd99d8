use quarry_core::InstanceId;
use tokio::sync::mpsc;

pub type AttemptId = uuid::Uuid;

/// Everything that feeds back into the application loop from launches and windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    ControllerSucceeded {
        instance_id: InstanceId,
        attempt: AttemptId,
    },
    ControllerFailed {
        instance_id: InstanceId,
        attempt: AttemptId,
        reason: String,
    },
    InstanceWindowClosed {
        instance_id: InstanceId,
    },
    MainWindowClosed,
}

pub type AppEventSender = mpsc::UnboundedSender<AppEvent>;
pub type AppEventReceiver = mpsc::UnboundedReceiver<AppEvent>;

pub fn app_events() -> (AppEventSender, AppEventReceiver) {
    mpsc::unbounded_channel()
}
