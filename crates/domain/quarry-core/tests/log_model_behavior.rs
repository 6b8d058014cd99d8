use quarry_core::{LogModel, MessageLevel};

#[test]
fn stop_on_overflow_keeps_exactly_max_lines() {
    let mut model = LogModel::new(3, true);
    for i in 0..5 {
        model.append(MessageLevel::Info, format!("line {i}"));
    }

    assert_eq!(model.len(), 3);
    assert!(model.overflowed());
    assert_eq!(model.get(0).unwrap().line, "line 0");
    assert_eq!(model.get(1).unwrap().line, "line 1");
    assert_eq!(model.get(2).unwrap().level, MessageLevel::Fatal);

    let before = model.to_plain_text();
    assert!(!model.append(MessageLevel::Error, "late"));
    assert_eq!(model.len(), 3);
    assert_eq!(model.to_plain_text(), before);
}

#[test]
fn eviction_drops_oldest_when_not_stopping() {
    let mut model = LogModel::new(3, false);
    for i in 0..5 {
        assert!(model.append(MessageLevel::Info, format!("line {i}")));
    }

    assert_eq!(model.len(), 3);
    assert!(!model.overflowed());
    let lines: Vec<_> = model.entries().map(|e| e.line.clone()).collect();
    assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
    assert_eq!(model.get(0).unwrap().index, 2);
}

#[test]
fn suspended_model_ignores_appends() {
    let mut model = LogModel::new(10, false);
    model.append(MessageLevel::Info, "kept");
    model.suspend(true);
    assert!(!model.append(MessageLevel::Info, "dropped"));
    model.suspend(false);
    model.append(MessageLevel::Info, "kept again");

    assert_eq!(model.to_plain_text(), "kept\nkept again\n");
}

#[test]
fn entries_since_survives_clear() {
    let mut model = LogModel::new(10, false);
    model.append(MessageLevel::Info, "a");
    model.append(MessageLevel::Info, "b");
    let mark = model.next_index();
    model.clear();
    model.append(MessageLevel::Warning, "c");

    let fresh = model.entries_since(mark);
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].line, "c");
    assert_eq!(fresh[0].index, 2);
}

#[test]
fn find_wraps_around_and_skips_start() {
    let mut model = LogModel::new(10, false);
    for line in ["Starting", "ERROR one", "ok", "error two", "done"] {
        model.append(MessageLevel::Info, line);
    }

    assert_eq!(model.find(1, "error", false), Some(3));
    assert_eq!(model.find(3, "error", false), Some(1));
    assert_eq!(model.find(3, "error", true), Some(1));
    assert_eq!(model.find(1, "error", true), Some(3));
    assert_eq!(model.find(0, "missing", false), None);
}

#[test]
fn shrinking_keeps_newest_lines() {
    let mut model = LogModel::new(5, false);
    for i in 0..5 {
        model.append(MessageLevel::Info, format!("{i}"));
    }
    model.set_max_lines(2);
    assert_eq!(model.to_plain_text(), "3\n4\n");
}
