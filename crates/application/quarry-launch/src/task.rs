use std::sync::{Arc, OnceLock};

use quarry_core::{CensorFilter, LogModel, MessageLevel, SharedLogModel};
use tokio::sync::{mpsc, oneshot, watch};

use crate::instance::Instance;
use crate::step::{LaunchStep, StepHandle, StepResult};

pub const ABORTED_REASON: &str = "Aborted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Running,
    Waiting,
    Failed,
    Aborted,
    Finished,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Failed | TaskState::Aborted | TaskState::Finished
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
}

/// Sent to whoever owns the task (normally a launch controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskNotice {
    ReadyForLaunch { pid: Option<u32> },
    Finished(TaskOutcome),
}

#[derive(Debug)]
pub(crate) enum TaskEvent {
    StepFinished { index: usize, result: StepResult },
    LogLines { lines: Vec<String>, level: MessageLevel },
    ReadyForLaunch { index: usize },
    Control(TaskControl),
}

#[derive(Debug)]
pub(crate) enum TaskControl {
    Abort(oneshot::Sender<bool>),
    CanAbort(oneshot::Sender<bool>),
    Proceed,
    WriteStdin(Vec<u8>),
}

struct StepSlot {
    step: Box<dyn LaunchStep>,
    result: Option<StepResult>,
}

impl StepSlot {
    fn was_successful(&self) -> bool {
        matches!(self.result, Some(StepResult::Succeeded))
    }

    fn fail_reason(&self) -> String {
        match &self.result {
            Some(StepResult::Failed(reason)) => reason.clone(),
            _ => format!("Step '{}' failed", self.step.name()),
        }
    }
}

/// Console buffer shared between a task and its handles, created on first use.
struct LogSlot {
    cell: OnceLock<SharedLogModel>,
    max_lines: usize,
    stop_on_overflow: bool,
}

impl LogSlot {
    fn get(&self) -> SharedLogModel {
        self.cell
            .get_or_init(|| LogModel::new(self.max_lines, self.stop_on_overflow).shared())
            .clone()
    }
}

/// Runs the steps of one launch strictly in order.
///
/// Only one step is active at a time. When the task ends, every started step is
/// finalized from the most recent back to the first, and exactly one outcome is
/// reported.
pub struct LaunchTask {
    instance: Arc<dyn Instance>,
    steps: Vec<StepSlot>,
    current_step: Option<usize>,
    state: TaskState,
    censor: CensorFilter,
    log: Arc<LogSlot>,
    outcome: Option<TaskOutcome>,

    events_tx: mpsc::UnboundedSender<TaskEvent>,
    events_rx: mpsc::UnboundedReceiver<TaskEvent>,
    state_tx: watch::Sender<TaskState>,
    notices: Option<mpsc::UnboundedSender<TaskNotice>>,
}

impl LaunchTask {
    /// Marks the instance as running for as long as the task is alive.
    pub fn new(instance: Arc<dyn Instance>) -> Self {
        instance.set_running(true);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(TaskState::NotStarted);
        let log = Arc::new(LogSlot {
            cell: OnceLock::new(),
            max_lines: quarry_config::clamp_console_lines(instance.console_max_lines()),
            stop_on_overflow: instance.stop_on_console_overflow(),
        });
        Self {
            instance,
            steps: Vec::new(),
            current_step: None,
            state: TaskState::NotStarted,
            censor: CensorFilter::new(),
            log,
            outcome: None,
            events_tx,
            events_rx,
            state_tx,
            notices: None,
        }
    }

    pub fn instance(&self) -> &Arc<dyn Instance> {
        &self.instance
    }

    /// Returns false once the task has started; the step list is frozen from then on.
    pub fn append_step(&mut self, step: impl LaunchStep + 'static) -> bool {
        if self.state != TaskState::NotStarted {
            return false;
        }
        self.steps.push(StepSlot {
            step: Box::new(step),
            result: None,
        });
        true
    }

    pub fn prepend_step(&mut self, step: impl LaunchStep + 'static) -> bool {
        if self.state != TaskState::NotStarted {
            return false;
        }
        self.steps.insert(
            0,
            StepSlot {
                step: Box::new(step),
                result: None,
            },
        );
        true
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.step.name().to_string()).collect()
    }

    pub fn set_censor_filter(&mut self, filter: CensorFilter) {
        self.censor = filter;
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    pub fn log_model(&self) -> SharedLogModel {
        self.log.get()
    }

    pub fn handle(&self) -> LaunchTaskHandle {
        LaunchTaskHandle {
            instance_id: self.instance.id().to_string(),
            events: self.events_tx.clone(),
            state: self.state_tx.subscribe(),
            log: self.log.clone(),
        }
    }

    /// Receiver for ready-for-launch and completion notices. Only one subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TaskNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notices = Some(tx);
        rx
    }

    pub fn substitute_variables(&self, cmd: &str) -> String {
        quarry_core::substitute_variables(cmd, &self.instance.variables(), quarry_core::process_env())
    }

    fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn notify(&self, notice: TaskNotice) {
        if let Some(tx) = &self.notices {
            let _ = tx.send(notice);
        }
    }

    pub fn execute(&mut self) {
        if self.state != TaskState::NotStarted {
            return;
        }
        self.instance.set_crashed(false);
        if self.steps.is_empty() {
            self.set_state(TaskState::Finished);
            self.emit_succeeded();
            return;
        }
        self.set_state(TaskState::Running);
        self.on_step_finished();
    }

    fn start_step(&mut self, index: usize) {
        self.current_step = Some(index);
        if self.state == TaskState::Waiting {
            self.set_state(TaskState::Running);
        }
        let handle = StepHandle::new(index, self.events_tx.clone());
        let slot = &mut self.steps[index];
        tracing::debug!(
            instance = %self.instance.id(),
            step = slot.step.name(),
            index,
            "starting launch step"
        );
        slot.step.start(handle);
    }

    fn on_step_finished(&mut self) {
        let Some(current) = self.current_step else {
            self.start_step(0);
            return;
        };

        if self.state == TaskState::Aborted {
            self.finalize_steps(false, ABORTED_REASON.to_string());
            return;
        }

        let slot = &self.steps[current];
        if slot.was_successful() {
            if current + 1 == self.steps.len() {
                self.finalize_steps(true, String::new());
            } else {
                self.start_step(current + 1);
            }
        } else {
            let reason = slot.fail_reason();
            self.finalize_steps(false, reason);
        }
    }

    fn finalize_steps(&mut self, successful: bool, reason: String) {
        if let Some(current) = self.current_step {
            for slot in self.steps[..=current].iter_mut().rev() {
                slot.step.finalize();
            }
        }
        if successful {
            self.set_state(TaskState::Finished);
            self.emit_succeeded();
        } else {
            if self.state != TaskState::Aborted {
                self.set_state(TaskState::Failed);
            }
            self.emit_failed(reason);
        }
    }

    fn emit_succeeded(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        self.instance.set_running(false);
        tracing::info!(instance = %self.instance.id(), "launch task finished");
        self.outcome = Some(TaskOutcome::Succeeded);
        self.notify(TaskNotice::Finished(TaskOutcome::Succeeded));
    }

    fn emit_failed(&mut self, reason: String) {
        if self.outcome.is_some() {
            return;
        }
        self.instance.set_running(false);
        self.instance.set_crashed(true);
        tracing::warn!(instance = %self.instance.id(), %reason, "launch task failed");
        self.outcome = Some(TaskOutcome::Failed(reason.clone()));
        self.notify(TaskNotice::Finished(TaskOutcome::Failed(reason)));
    }

    pub fn proceed(&mut self) {
        if self.state != TaskState::Waiting {
            return;
        }
        let Some(current) = self.current_step else {
            return;
        };
        self.set_state(TaskState::Running);
        self.steps[current].step.proceed();
    }

    pub fn can_abort(&self) -> bool {
        match self.state {
            TaskState::Aborted | TaskState::Failed | TaskState::Finished => false,
            TaskState::NotStarted => true,
            TaskState::Running | TaskState::Waiting => self
                .current_step
                .map(|i| self.steps[i].step.can_abort())
                .unwrap_or(false),
        }
    }

    pub fn abort(&mut self) -> bool {
        match self.state {
            TaskState::Aborted | TaskState::Failed | TaskState::Finished => false,
            TaskState::NotStarted => {
                self.set_state(TaskState::Aborted);
                self.emit_failed(ABORTED_REASON.to_string());
                true
            }
            TaskState::Running | TaskState::Waiting => {
                let Some(current) = self.current_step else {
                    return false;
                };
                let step = &mut self.steps[current].step;
                if !step.can_abort() {
                    return false;
                }
                if step.abort() {
                    self.set_state(TaskState::Aborted);
                    return true;
                }
                false
            }
        }
    }

    pub fn write_to_stdin(&mut self, data: &[u8]) -> bool {
        match self.current_step {
            Some(current) if !self.state.is_terminal() => {
                self.steps[current].step.write_stdin(data)
            }
            _ => false,
        }
    }

    pub fn on_log_lines(&mut self, lines: Vec<String>, level: MessageLevel) {
        for line in lines {
            self.on_log_line(line, level);
        }
    }

    pub fn on_log_line(&mut self, mut line: String, mut level: MessageLevel) {
        let inner = MessageLevel::from_line(&mut line);
        if inner != MessageLevel::Unknown {
            level = inner;
        }
        if level.is_generic() {
            level = self.instance.guess_level(&line, level);
        }
        let line = self.censor.apply(&line);

        let model = self.log.get();
        let mut model = model.lock().unwrap_or_else(|p| p.into_inner());
        model.append(level, line);
    }

    fn handle_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::StepFinished { index, result } => {
                if self.outcome.is_some() || self.current_step != Some(index) {
                    tracing::debug!(index, "ignoring stale step completion");
                    return;
                }
                let slot = &mut self.steps[index];
                if slot.result.is_some() {
                    return;
                }
                slot.result = Some(result);
                self.on_step_finished();
            }
            TaskEvent::LogLines { lines, level } => self.on_log_lines(lines, level),
            TaskEvent::ReadyForLaunch { index } => {
                if self.current_step != Some(index) || self.state != TaskState::Running {
                    return;
                }
                self.set_state(TaskState::Waiting);
                let pid = self.steps[index].step.pid();
                self.notify(TaskNotice::ReadyForLaunch { pid });
            }
            TaskEvent::Control(control) => match control {
                TaskControl::Abort(reply) => {
                    let _ = reply.send(self.abort());
                }
                TaskControl::CanAbort(reply) => {
                    let _ = reply.send(self.can_abort());
                }
                TaskControl::Proceed => self.proceed(),
                TaskControl::WriteStdin(data) => {
                    if !self.write_to_stdin(&data) {
                        tracing::debug!("current step does not accept input");
                    }
                }
            },
        }
    }

    /// Drives the task to completion on the current runtime.
    ///
    /// Control requests queued before the call (an early abort, say) are applied
    /// before the first step starts.
    pub async fn run(mut self) -> TaskOutcome {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
        self.execute();

        while self.outcome.is_none() {
            match self.events_rx.recv().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }

        // Output that raced the final step report still belongs in the console.
        while let Ok(event) = self.events_rx.try_recv() {
            if let TaskEvent::LogLines { lines, level } = event {
                self.on_log_lines(lines, level);
            }
        }

        self.outcome
            .clone()
            .unwrap_or_else(|| TaskOutcome::Failed("Launch task stopped unexpectedly".into()))
    }
}

/// Cloneable remote control for a task that is running elsewhere.
#[derive(Clone)]
pub struct LaunchTaskHandle {
    instance_id: String,
    events: mpsc::UnboundedSender<TaskEvent>,
    state: watch::Receiver<TaskState>,
    log: Arc<LogSlot>,
}

impl std::fmt::Debug for LaunchTaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchTaskHandle")
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .finish()
    }
}

impl LaunchTaskHandle {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn log_model(&self) -> SharedLogModel {
        self.log.get()
    }

    pub async fn abort(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.events.send(TaskEvent::Control(TaskControl::Abort(tx))).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn can_abort(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .events
            .send(TaskEvent::Control(TaskControl::CanAbort(tx)))
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn proceed(&self) {
        let _ = self.events.send(TaskEvent::Control(TaskControl::Proceed));
    }

    /// Adds a line to the console through the task's normal log intake.
    pub fn log_line(&self, line: impl Into<String>, level: MessageLevel) {
        let _ = self.events.send(TaskEvent::LogLines {
            lines: vec![line.into()],
            level,
        });
    }

    pub fn write_to_stdin(&self, data: impl Into<Vec<u8>>) {
        let _ = self
            .events
            .send(TaskEvent::Control(TaskControl::WriteStdin(data.into())));
    }

    /// Resolves once the task reaches a terminal state.
    pub async fn wait(&mut self) -> TaskState {
        let reached = match self.state.wait_for(|s| s.is_terminal()).await {
            Ok(state) => Some(*state),
            Err(_) => None,
        };
        reached.unwrap_or_else(|| *self.state.borrow())
    }
}
