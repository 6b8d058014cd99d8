use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ProcessCommand, ProcessError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotRunning,
    Starting,
    /// The executable could not be spawned at all.
    FailedToStart(String),
    Running {
        pid: Option<u32>,
    },
    /// Exited on its own. A non-zero code is still `Finished`, not `Crashed`.
    Finished {
        exit_code: i32,
    },
    /// Terminated without an exit code (killed by a signal nobody here sent).
    Crashed {
        signal: Option<i32>,
    },
    /// Terminated after `abort()`.
    Aborted,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::FailedToStart(_)
                | ProcessState::Finished { .. }
                | ProcessState::Crashed { .. }
                | ProcessState::Aborted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output { stream: OutputStream, line: String },
    State(ProcessState),
}

/// Owns one child process: spawns it, streams its output line by line, feeds its
/// stdin, and classifies how it ended.
///
/// Every output line is delivered before the terminal [`ProcessState`] event.
pub struct ChildProcessSupervisor {
    state: Arc<Mutex<ProcessState>>,
    pid: Arc<Mutex<Option<u32>>>,
    stdin_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    abort: CancellationToken,
    grace_period: Duration,
}

impl Default for ChildProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildProcessSupervisor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProcessState::NotRunning)),
            pid: Arc::new(Mutex::new(None)),
            stdin_tx: None,
            abort: CancellationToken::new(),
            grace_period: quarry_config::ABORT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn state(&self) -> ProcessState {
        lock(&self.state).clone()
    }

    pub fn pid(&self) -> Option<u32> {
        *lock(&self.pid)
    }

    /// Spawns `command` on the current tokio runtime. Events arrive on the returned
    /// receiver until the process reaches a terminal state.
    pub fn start(
        &mut self,
        command: ProcessCommand,
    ) -> Result<mpsc::UnboundedReceiver<ProcessEvent>, ProcessError> {
        {
            let mut state = lock(&self.state);
            if *state != ProcessState::NotRunning {
                return Err(ProcessError::AlreadyStarted);
            }
            *state = ProcessState::Starting;
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        self.stdin_tx = Some(stdin_tx);

        let _ = event_tx.send(ProcessEvent::State(ProcessState::Starting));

        let watch = ProcessWatch {
            state: self.state.clone(),
            pid: self.pid.clone(),
            events: event_tx,
            abort: self.abort.clone(),
            grace_period: self.grace_period,
        };
        tokio::spawn(watch.run(command, stdin_rx));

        Ok(event_rx)
    }

    /// Queues bytes for the child's stdin. Returns false once nothing can receive them.
    pub fn write(&self, data: impl Into<Vec<u8>>) -> bool {
        if !matches!(self.state(), ProcessState::Starting | ProcessState::Running { .. }) {
            return false;
        }
        match &self.stdin_tx {
            Some(tx) => tx.send(data.into()).is_ok(),
            None => false,
        }
    }

    pub fn can_abort(&self) -> bool {
        matches!(self.state(), ProcessState::Starting | ProcessState::Running { .. })
    }

    /// Requests termination: graceful first, forced after the grace period.
    pub fn abort(&self) -> bool {
        if !self.can_abort() {
            return false;
        }
        self.abort.cancel();
        true
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ProcessWatch {
    state: Arc<Mutex<ProcessState>>,
    pid: Arc<Mutex<Option<u32>>>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    abort: CancellationToken,
    grace_period: Duration,
}

impl ProcessWatch {
    fn set_state(&self, next: ProcessState) {
        *lock(&self.state) = next.clone();
        let _ = self.events.send(ProcessEvent::State(next));
    }

    async fn run(self, command: ProcessCommand, mut stdin_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        tracing::debug!(
            program = %command.program,
            args = ?command.args,
            cwd = ?command.working_dir,
            "spawning child process"
        );

        let mut child = match command.to_tokio().spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(program = %command.program, "failed to start process: {e}");
                self.set_state(ProcessState::FailedToStart(e.to_string()));
                return;
            }
        };

        let pid = child.id();
        *lock(&self.pid) = pid;
        self.set_state(ProcessState::Running { pid });

        let readers = [
            child
                .stdout
                .take()
                .map(|out| spawn_reader(out, OutputStream::Stdout, self.events.clone())),
            child
                .stderr
                .take()
                .map(|err| spawn_reader(err, OutputStream::Stderr, self.events.clone())),
        ];
        let mut stdin = child.stdin.take();

        let mut aborted = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(data) = stdin_rx.recv(), if stdin.is_some() => {
                    if let Some(pipe) = stdin.as_mut() {
                        let res = async {
                            pipe.write_all(&data).await?;
                            pipe.flush().await
                        }
                        .await;
                        if let Err(e) = res {
                            tracing::warn!("failed to write to child stdin: {e}");
                            stdin = None;
                        }
                    }
                }
                _ = self.abort.cancelled(), if !aborted => {
                    aborted = true;
                    break self.terminate(&mut child).await;
                }
            }
        };

        drop(stdin);
        for reader in readers.into_iter().flatten() {
            let _ = reader.await;
        }

        let final_state = match status {
            Ok(status) => classify(status, aborted),
            Err(e) => {
                tracing::warn!("failed to wait for child process: {e}");
                if aborted {
                    ProcessState::Aborted
                } else {
                    ProcessState::Crashed { signal: None }
                }
            }
        };
        tracing::debug!(state = ?final_state, "child process ended");
        self.set_state(final_state);
    }

    async fn terminate(&self, child: &mut Child) -> std::io::Result<ExitStatus> {
        if send_terminate(child) {
            if let Ok(status) = tokio::time::timeout(self.grace_period, child.wait()).await {
                return status;
            }
            tracing::warn!("child ignored terminate request, killing it");
        }
        child.start_kill()?;
        child.wait().await
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok(),
        None => false,
    }
}

#[cfg(not(unix))]
fn send_terminate(_child: &Child) -> bool {
    false
}

fn classify(status: ExitStatus, aborted: bool) -> ProcessState {
    if aborted {
        return ProcessState::Aborted;
    }
    if let Some(code) = status.code() {
        return ProcessState::Finished { exit_code: code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        ProcessState::Crashed {
            signal: status.signal(),
        }
    }
    #[cfg(not(unix))]
    {
        ProcessState::Crashed { signal: None }
    }
}

fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    events: mpsc::UnboundedSender<ProcessEvent>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n' | b'\r')) {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if events.send(ProcessEvent::Output { stream, line }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(?stream, "output stream closed: {e}");
                    break;
                }
            }
        }
    })
}
