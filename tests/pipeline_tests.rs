//! Integration tests for procpipe
//!
//! These drive the public API with ordinary POSIX utilities (sh, echo,
//! printf, sort, true, false) and run serially because every test forks.

use procpipe::{
    capture, Command, ExecConfig, ExecContext, PendingInvocation, PipeError, Pipeline, StdSlot,
};
use std::io::Write;
use std::sync::Mutex;

static PIPELINE_TEST_LOCK: Mutex<()> = Mutex::new(());

fn sh(script: &str) -> Command {
    Command::new("sh").arg("-c").arg(script)
}

fn untrimmed() -> ExecContext {
    ExecContext::new(ExecConfig::default().trim_trailing_newline(false)).unwrap()
}

/// Exit codes are reported exactly for normal termination
#[test]
fn test_exit_code_is_reported() {
    let _lock = PIPELINE_TEST_LOCK.lock();

    for code in [0u8, 3, 42, 255] {
        let done = sh(&format!("exit {}", code)).run().unwrap();
        assert!(done.normal_exit());
        assert_eq!(done.exit_code(), Some(code));
    }
}

/// Truthy iff normal exit with code zero
#[test]
fn test_truthiness() {
    let _lock = PIPELINE_TEST_LOCK.lock();

    assert!(Command::new("true").run().unwrap().success());
    assert!(!Command::new("false").run().unwrap().success());

    let killed = sh("kill -TERM $$").run().unwrap();
    assert!(!killed.normal_exit());
    assert_eq!(killed.exit_code(), None);
    assert!(!killed.success());
}

/// `A ; B` runs B after A even when A is slower
#[test]
fn test_sequence_preserves_order() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("order.log");
    let log = log.to_str().unwrap();

    let pipeline = Pipeline::from(sh(&format!("sleep 0.2; echo A >> {}", log)))
        .then(sh(&format!("echo B >> {}", log)));
    ExecContext::default().run(&pipeline).unwrap();

    assert_eq!(std::fs::read_to_string(log).unwrap(), "A\nB\n");
}

/// Capturing `A | B` equals capturing B fed with A's output from a file
#[test]
fn test_pipe_round_trip() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let mut ctx = untrimmed();
    let producer = Command::new("printf").arg("b\\na\\n");

    let piped = ctx
        .capture(&Pipeline::from(producer.clone()).pipe(Command::new("sort")))
        .unwrap();

    let produced = ctx.capture(&Pipeline::from(producer)).unwrap();
    let mut input = tempfile::NamedTempFile::new().unwrap();
    input.write_all(produced.as_bytes()).unwrap();
    let fed = ctx
        .capture(&Pipeline::from(Command::new("sort")).redirect_stdin(input.path()))
        .unwrap();

    assert_eq!(piped, "a\nb\n");
    assert_eq!(piped, fed);
    ctx.reap_all().unwrap();
}

/// A second redirect of the same slot fails and nothing launches
#[test]
fn test_double_redirect_rejected() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("launched");
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");

    let result = sh(&format!("touch {}", marker.display()))
        .stage()
        .redirect_stdout(first.as_path())
        .and_then(|inv| inv.redirect_stdout(second.as_path()));
    assert!(matches!(result, Err(PipeError::AlreadyRedirected(StdSlot::Stdout))));

    let pipeline = Pipeline::from(sh(&format!("touch {}", marker.display())))
        .redirect_stdout(first.as_path())
        .redirect_stdout(second.as_path());
    let result = ExecContext::default().run(&pipeline);
    assert!(result.is_err());

    assert!(!marker.exists());
    assert!(!second.exists());
}

#[test]
fn test_capture_echo_hello() {
    let _lock = PIPELINE_TEST_LOCK.lock();

    let text = capture(Command::new("echo").arg("hello").stage()).unwrap();
    assert_eq!(text, "hello");
}

/// `false && echo` never launches echo
#[test]
fn test_and_short_circuits() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("echo.txt");

    let pipeline = Pipeline::from(Command::new("false"))
        .and(Command::new("echo").arg("ran"))
        .redirect_stdout(out.as_path());
    let status = ExecContext::default().run(&pipeline).unwrap();

    assert!(!status.success());
    assert!(!out.exists());
}

/// `true || echo` never launches echo
#[test]
fn test_or_short_circuits() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("echo.txt");

    let pipeline = Pipeline::from(Command::new("true"))
        .or(Command::new("echo").arg("ran"))
        .redirect_stdout(out.as_path());
    let status = ExecContext::default().run(&pipeline).unwrap();

    assert!(status.success());
    assert!(!out.exists());
}

#[test]
fn test_sort_from_input_file() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let mut input = tempfile::NamedTempFile::new().unwrap();
    input.write_all(b"b\na\n").unwrap();

    let config = ExecConfig::default().trim_trailing_newline(false);
    let invocation = PendingInvocation::with_config(Command::new("sort"), config)
        .redirect_stdin(input.path())
        .unwrap();

    assert_eq!(capture(invocation).unwrap(), "a\nb\n");
}

/// stderr sent to descriptor 1 lands in the same file as stdout
#[test]
fn test_stderr_merged_into_stdout_file() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("build.log");

    let pipeline = Pipeline::from(sh("echo out; echo err >&2"))
        .redirect_stdout(log.as_path())
        .redirect_stderr(1);
    assert!(ExecContext::default().run(&pipeline).unwrap().success());

    assert_eq!(std::fs::read_to_string(&log).unwrap(), "out\nerr\n");
}

#[test]
fn test_append_keeps_contents() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("append.log");
    std::fs::write(&log, "first\n").unwrap();

    Command::new("echo")
        .arg("second")
        .stage()
        .append_stdout(log.as_path())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(std::fs::read_to_string(&log).unwrap(), "first\nsecond\n");
}

#[test]
fn test_truncate_replaces_contents() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("truncate.log");
    std::fs::write(&log, "a much longer previous line\n").unwrap();

    Command::new("echo")
        .arg("new")
        .stage()
        .redirect_stdout(log.as_path())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(std::fs::read_to_string(&log).unwrap(), "new\n");
}

/// A program that cannot be executed exits normally with status 1
#[test]
fn test_missing_program_exits_with_one() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let err = dir.path().join("err.txt");

    let done = Command::new("procpipe-no-such-program")
        .stage()
        .redirect_stderr(err.as_path())
        .unwrap()
        .run()
        .unwrap();

    assert!(done.normal_exit());
    assert_eq!(done.exit_code(), Some(1));
    let diagnostic = std::fs::read_to_string(&err).unwrap();
    assert!(diagnostic.contains("procpipe-no-such-program"));
}

/// Dropping a staged invocation runs it; cancelling suppresses it
#[test]
fn test_drop_runs_and_cancel_suppresses() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let dropped = dir.path().join("dropped");
    let cancelled = dir.path().join("cancelled");

    {
        let _staged = Command::new("touch").arg(dropped.to_str().unwrap()).stage();
    }
    Command::new("touch")
        .arg(cancelled.to_str().unwrap())
        .stage()
        .cancel();

    assert!(dropped.exists());
    assert!(!cancelled.exists());
}

/// Invalid trees are rejected before anything runs
#[test]
fn test_invalid_pipeline_launches_nothing() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("launched");

    let pipeline = Pipeline::from(Command::new("touch").arg(marker.to_str().unwrap()))
        .then(Command::new("cat"));
    let result = ExecContext::default().capture(&pipeline);

    assert!(matches!(result, Err(PipeError::InvalidPipeline(_))));
    assert!(!marker.exists());
}

/// Background children stay in the jobs table until reaped
#[test]
fn test_background_requires_reaping() {
    let _lock = PIPELINE_TEST_LOCK.lock();
    let mut ctx = ExecContext::default();

    let pipeline = Pipeline::from(Command::new("sleep").arg("0.2"))
        .background(Command::new("echo").arg("foreground"))
        .redirect_stdout("/dev/null");
    assert!(ctx.run(&pipeline).unwrap().success());
    assert_eq!(ctx.jobs().len(), 1);

    let reaped = ctx.reap_all().unwrap();
    assert_eq!(reaped.len(), 1);
    assert!(reaped[0].success());
}

#[test]
fn test_config_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"{"file_mode": 384, "trim_trailing_newline": false}"#)
        .unwrap();

    let config = ExecConfig::from_file(file.path()).unwrap();
    assert_eq!(config.file_mode, 0o600);
    assert!(!config.trim_trailing_newline);
    assert_eq!(config.read_chunk, ExecConfig::default().read_chunk);
}
