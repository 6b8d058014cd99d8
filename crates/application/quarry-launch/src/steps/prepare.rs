use futures::future::BoxFuture;
use quarry_core::MessageLevel;
use tokio_util::sync::CancellationToken;

use crate::step::{LaunchStep, StepHandle};

/// Runs the instance's own update/verification work before anything is spawned.
pub struct PrepareInstance {
    work: Option<BoxFuture<'static, Result<(), String>>>,
    cancel: CancellationToken,
    running: bool,
}

impl PrepareInstance {
    pub fn new(work: Option<BoxFuture<'static, Result<(), String>>>) -> Self {
        Self {
            work,
            cancel: CancellationToken::new(),
            running: false,
        }
    }
}

impl LaunchStep for PrepareInstance {
    fn name(&self) -> &str {
        "PrepareInstance"
    }

    fn start(&mut self, handle: StepHandle) {
        let Some(work) = self.work.take() else {
            handle.succeed();
            return;
        };
        self.running = true;
        handle.log_line("Preparing instance files.", MessageLevel::Launcher);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = work => match res {
                    Ok(()) => handle.succeed(),
                    Err(reason) => handle.fail(reason),
                },
                _ = cancel.cancelled() => handle.fail("Instance preparation was cancelled."),
            }
        });
    }

    fn can_abort(&self) -> bool {
        self.running && !self.cancel.is_cancelled()
    }

    fn abort(&mut self) -> bool {
        if !self.can_abort() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    fn finalize(&mut self) {
        self.cancel.cancel();
        self.running = false;
    }
}
