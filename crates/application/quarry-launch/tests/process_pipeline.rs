#![cfg(unix)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quarry_launch::{
    build_launch_task, Instance, LaunchOptions, LaunchProfile, LaunchTaskHandle, MessageLevel,
    TaskNotice, TaskOutcome, TaskState,
};

struct ShellInstance {
    profile: LaunchProfile,
    running: AtomicBool,
    crashed: AtomicBool,
    task: Mutex<Option<LaunchTaskHandle>>,
}

impl ShellInstance {
    fn new(profile: LaunchProfile) -> Arc<Self> {
        Arc::new(Self {
            profile,
            running: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }
}

impl Instance for ShellInstance {
    fn id(&self) -> &str {
        "shell"
    }
    fn can_launch(&self) -> bool {
        true
    }
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
    fn can_edit(&self) -> bool {
        true
    }
    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
    fn set_crashed(&self, crashed: bool) {
        self.crashed.store(crashed, Ordering::SeqCst);
    }
    fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }
    fn variables(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("INST_GREETING".to_string(), "hello world".to_string())])
    }
    fn launch_profile(&self) -> LaunchProfile {
        self.profile.clone()
    }
    fn launch_task(&self) -> Option<LaunchTaskHandle> {
        self.task.lock().unwrap().clone()
    }
    fn set_launch_task(&self, task: Option<LaunchTaskHandle>) {
        *self.task.lock().unwrap() = task;
    }
}

fn profile(dir: &tempfile::TempDir, command: &str) -> LaunchProfile {
    LaunchProfile {
        command: command.to_string(),
        working_dir: dir.path().to_path_buf(),
        ..LaunchProfile::default()
    }
}

/// Runs the task, releasing every ready-for-launch gate as it comes.
async fn drive(instance: Arc<ShellInstance>, options: LaunchOptions) -> (TaskOutcome, Vec<String>) {
    let mut task = build_launch_task(instance, &options);
    let mut notices = task.subscribe();
    let handle = task.handle();
    let run = tokio::spawn(task.run());

    let gate = handle.clone();
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            if let TaskNotice::ReadyForLaunch { .. } = notice {
                gate.proceed();
            }
        }
    });

    let outcome = tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .expect("launch stalled")
        .unwrap();
    let model = handle.log_model();
    let lines = model
        .lock()
        .unwrap()
        .entries()
        .map(|e| e.line.clone())
        .collect();
    (outcome, lines)
}

#[tokio::test]
async fn game_output_reaches_the_console_with_variables_substituted() {
    let dir = tempfile::tempdir().unwrap();
    let instance = ShellInstance::new(profile(&dir, "sh -c 'echo $INST_GREETING $INST_ONLINE'"));

    let (outcome, lines) = drive(instance.clone(), LaunchOptions {
        online: true,
        server_port: None,
    })
    .await;

    assert_eq!(outcome, TaskOutcome::Succeeded);
    assert!(lines.contains(&"hello world true".to_string()), "{lines:?}");
    assert!(!instance.is_running());
}

#[tokio::test]
async fn failure_categories_reach_the_task_reason() {
    let dir = tempfile::tempdir().unwrap();

    let (exit, _) = drive(
        ShellInstance::new(profile(&dir, "sh -c 'exit 3'")),
        LaunchOptions::default(),
    )
    .await;
    assert_eq!(exit, TaskOutcome::Failed("Game process exited with code 3.".into()));

    let (spawn, _) = drive(
        ShellInstance::new(profile(&dir, "./definitely-not-a-real-binary")),
        LaunchOptions::default(),
    )
    .await;
    match spawn {
        TaskOutcome::Failed(reason) => {
            assert!(reason.starts_with("Could not launch the game process"), "{reason}")
        }
        other => panic!("expected spawn failure, got {other:?}"),
    }
}

#[tokio::test]
async fn launch_script_is_fed_and_released_by_proceed() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = profile(&dir, "head -n 2");
    p.launch_script = Some("mainClass demo".to_string());

    let (outcome, lines) = drive(ShellInstance::new(p), LaunchOptions::default()).await;

    assert_eq!(outcome, TaskOutcome::Succeeded);
    let pos_script = lines.iter().position(|l| l == "mainClass demo");
    let pos_launch = lines.iter().position(|l| l == "launch");
    assert!(pos_script.is_some() && pos_launch.is_some(), "{lines:?}");
    assert!(pos_script < pos_launch);
}

#[tokio::test]
async fn port_is_passed_through_to_the_game() {
    let dir = tempfile::tempdir().unwrap();
    let instance = ShellInstance::new(profile(&dir, "sh -c 'echo \"$@\"' game"));

    let (outcome, lines) = drive(instance, LaunchOptions {
        online: false,
        server_port: Some(25565),
    })
    .await;

    assert_eq!(outcome, TaskOutcome::Succeeded);
    assert!(lines.contains(&"--port 25565".to_string()), "{lines:?}");
}

#[tokio::test]
async fn pre_and_post_commands_wrap_the_game() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = profile(&dir, "sh -c 'echo game'");
    p.pre_launch_command = Some("echo before".to_string());
    p.post_exit_command = Some("echo after".to_string());

    let (outcome, lines) = drive(ShellInstance::new(p), LaunchOptions::default()).await;
    assert_eq!(outcome, TaskOutcome::Succeeded);

    let order: Vec<_> = lines
        .iter()
        .filter(|l| ["before", "game", "after"].contains(&l.as_str()))
        .cloned()
        .collect();
    assert_eq!(order, vec!["before", "game", "after"]);
}

#[tokio::test]
async fn failing_pre_launch_command_blocks_the_game() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = profile(&dir, "sh -c 'echo game'");
    p.pre_launch_command = Some("exit 7".to_string());

    let (outcome, lines) = drive(ShellInstance::new(p), LaunchOptions::default()).await;
    assert_eq!(
        outcome,
        TaskOutcome::Failed("Pre-launch command failed with code 7.".into())
    );
    assert!(!lines.contains(&"game".to_string()));
}

#[tokio::test]
async fn long_running_game_can_be_aborted() {
    let dir = tempfile::tempdir().unwrap();
    let instance = ShellInstance::new(profile(&dir, "sleep 30"));
    let mut task = build_launch_task(instance, &LaunchOptions::default());
    let mut notices = task.subscribe();
    let mut handle = task.handle();
    let run = tokio::spawn(task.run());

    match notices.recv().await {
        Some(TaskNotice::ReadyForLaunch { pid }) => assert!(pid.is_some()),
        other => panic!("expected ready notice, got {other:?}"),
    }
    handle.proceed();
    assert!(handle.abort().await);

    let outcome = tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .expect("abort stalled")
        .unwrap();
    assert_eq!(outcome, TaskOutcome::Failed("Aborted".into()));
    assert_eq!(handle.wait().await, TaskState::Aborted);

    let model = handle.log_model();
    let model = model.lock().unwrap();
    assert!(model
        .entries()
        .any(|e| e.level == MessageLevel::Launcher && e.line.starts_with("Launching with command")));
}
