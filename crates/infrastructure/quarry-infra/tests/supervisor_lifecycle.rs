#![cfg(unix)]

use std::time::Duration;

use quarry_infra::{ChildProcessSupervisor, OutputStream, ProcessCommand, ProcessEvent, ProcessState};
use tokio::sync::mpsc::UnboundedReceiver;

async fn collect(mut rx: UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    while let Some(ev) = tokio::time::timeout(Duration::from_secs(20), rx.recv())
        .await
        .expect("supervisor stalled")
    {
        let done = matches!(&ev, ProcessEvent::State(s) if s.is_terminal());
        events.push(ev);
        if done {
            break;
        }
    }
    events
}

fn lines(events: &[ProcessEvent], which: OutputStream) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ProcessEvent::Output { stream, line } if *stream == which => Some(line.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn output_lines_arrive_before_the_exit_state() {
    let mut sup = ChildProcessSupervisor::new();
    let rx = sup
        .start(ProcessCommand::shell("echo one; echo two 1>&2; echo three", "."))
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(lines(&events, OutputStream::Stdout), vec!["one", "three"]);
    assert_eq!(lines(&events, OutputStream::Stderr), vec!["two"]);
    assert_eq!(
        events.last(),
        Some(&ProcessEvent::State(ProcessState::Finished { exit_code: 0 }))
    );
    assert_eq!(sup.state(), ProcessState::Finished { exit_code: 0 });
}

#[tokio::test]
async fn non_zero_exit_is_finished_with_code() {
    let mut sup = ChildProcessSupervisor::new();
    let rx = sup.start(ProcessCommand::shell("exit 3", ".")).unwrap();
    let events = collect(rx).await;
    assert_eq!(
        events.last(),
        Some(&ProcessEvent::State(ProcessState::Finished { exit_code: 3 }))
    );
}

#[tokio::test]
async fn missing_executable_fails_to_start() {
    let mut sup = ChildProcessSupervisor::new();
    let cmd = ProcessCommand::from_template("/definitely/not/here --flag", ".", |p| p.to_string())
        .unwrap();
    let events = collect(sup.start(cmd).unwrap()).await;
    assert!(matches!(
        events.last(),
        Some(ProcessEvent::State(ProcessState::FailedToStart(_)))
    ));
    assert!(!sup.can_abort());
    assert!(!sup.abort());
}

#[tokio::test]
async fn stdin_is_forwarded_to_the_child() {
    let mut sup = ChildProcessSupervisor::new();
    let rx = sup
        .start(ProcessCommand::shell("read cmd; echo got:$cmd", "."))
        .unwrap();
    assert!(sup.write("launch\n"));
    let events = collect(rx).await;
    assert_eq!(lines(&events, OutputStream::Stdout), vec!["got:launch"]);
}

#[tokio::test]
async fn abort_terminates_a_running_child() {
    let mut sup = ChildProcessSupervisor::new().with_grace_period(Duration::from_millis(500));
    let mut rx = sup.start(ProcessCommand::shell("sleep 30", ".")).unwrap();

    loop {
        match rx.recv().await {
            Some(ProcessEvent::State(ProcessState::Running { .. })) => break,
            Some(_) => continue,
            None => panic!("channel closed before running"),
        }
    }

    assert!(sup.can_abort());
    assert!(sup.abort());
    let events = collect(rx).await;
    assert_eq!(events.last(), Some(&ProcessEvent::State(ProcessState::Aborted)));
    assert!(!sup.abort());
}

#[tokio::test]
async fn a_supervisor_only_starts_once() {
    let mut sup = ChildProcessSupervisor::new();
    let rx = sup.start(ProcessCommand::shell("true", ".")).unwrap();
    assert!(sup.start(ProcessCommand::shell("true", ".")).is_err());
    collect(rx).await;
}
