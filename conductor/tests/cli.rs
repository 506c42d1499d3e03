//! CLI tests: spawn the conductor binary and check exit codes and output.

use std::path::Path;
use std::process::{Command, Output};

use conductor::exit_codes;
use conductor::io::init::{InitOptions, init_workspace};
use conductor::io::paths::ConductorPaths;
use conductor::io::task_store::{FsTaskStore, TaskStore};
use conductor::task::TaskStatus;
use conductor::test_support::{task, task_for, task_with_deps};

fn conductor(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_conductor"))
        .current_dir(root)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("spawn conductor")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn workspace() -> (tempfile::TempDir, FsTaskStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
    let store = FsTaskStore::new(&paths.tasks_dir).expect("store");
    (temp, store)
}

#[test]
fn next_exit_codes_distinguish_done_open_and_stuck() {
    let (temp, store) = workspace();
    let out = conductor(temp.path(), &["next"]);
    assert_eq!(out.status.code(), Some(exit_codes::NO_ELIGIBLE));

    store.insert(&mut task("b", 2)).expect("b");
    store.insert(&mut task("a", 2)).expect("a");
    let out = conductor(temp.path(), &["next"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&out), "a");

    let out = conductor(temp.path(), &["next", "--all"]);
    assert_eq!(stdout(&out), "a\nb");

    let (temp, store) = workspace();
    store.insert(&mut task_with_deps("x", 1, &["y"])).expect("x");
    store.insert(&mut task_with_deps("y", 1, &["x"])).expect("y");
    let out = conductor(temp.path(), &["next"]);
    assert_eq!(out.status.code(), Some(exit_codes::STUCK));
    assert!(String::from_utf8_lossy(&out.stderr).contains("dependency cycle: x -> y -> x"));
}

#[test]
fn init_twice_needs_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(conductor(temp.path(), &["init"]).status.code(), Some(exit_codes::OK));
    assert!(ConductorPaths::new(temp.path()).config_path.is_file());

    let again = conductor(temp.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));
    assert_eq!(
        conductor(temp.path(), &["init", "--force"]).status.code(),
        Some(exit_codes::OK)
    );
}

#[test]
fn commands_outside_a_workspace_fail() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = conductor(temp.path(), &["status", "--root", &temp.path().display().to_string()]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not initialized"));
}

#[test]
fn add_then_status_lists_task() {
    let (temp, _store) = workspace();
    let out = conductor(
        temp.path(),
        &[
            "add",
            "--id",
            "task_001",
            "--assignee",
            "grok-fast",
            "--description",
            "core engine",
            "--file",
            "grok/engine.py",
            "--priority",
            "3",
        ],
    );
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&out), "task_001");

    let status = stdout(&conductor(temp.path(), &["status"]));
    assert!(status.contains("task_001\tpending\tpriority=3\tretries=0\tassignee=grok-fast"));
    assert!(status.ends_with("pending=1 blocked=0 awaiting_external_input=0 completed=0 failed=0"));
}

#[test]
fn validate_flags_ownership_and_unknown_agents() {
    let (temp, store) = workspace();
    store
        .insert(&mut task_for("ok", "gemini", &["gemini/ui.py"]))
        .expect("ok");
    let out = conductor(temp.path(), &["validate"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&out), "ok: 1 tasks");

    store
        .insert(&mut task_for("bad", "gemini", &["shared/app/main.py"]))
        .expect("bad");
    store.insert(&mut task("ghost", 1)).expect("ghost");
    let out = conductor(temp.path(), &["validate"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("may not modify 'shared/app/main.py'"));
    assert!(stderr.contains("ghost: no agent registered for assignee 'agent'"));
}

#[test]
fn run_defers_on_handoff_and_resolve_finishes_it() {
    let (temp, store) = workspace();
    store
        .insert(&mut task_for("ui", "gemini", &["gemini/ui.py"]))
        .expect("ui");

    let out = conductor(temp.path(), &["run"]);
    assert_eq!(out.status.code(), Some(exit_codes::DEFERRED));
    assert!(temp.path().join(".conductor/prompts/gemini_prompt_ui.md").is_file());
    assert_eq!(
        store.load("ui").expect("load").expect("present").status,
        TaskStatus::AwaitingExternalInput
    );

    let out = conductor(temp.path(), &["resolve", "ui", "--completed"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&out), "ui completed");

    let out = conductor(temp.path(), &["run"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
}

#[test]
fn help_request_blocks_task() {
    let (temp, store) = workspace();
    store
        .insert(&mut task_for("orig", "grok-fast", &[]))
        .expect("orig");
    let out = conductor(
        temp.path(),
        &["help-request", "orig", "--helper", "grok-4.1", "--question", "why?"],
    );
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let helper_id = stdout(&out);

    let orig = store.load("orig").expect("load").expect("present");
    assert_eq!(orig.status, TaskStatus::Blocked);
    assert_eq!(orig.blocked_by.as_deref(), Some(helper_id.as_str()));
    let helper = store.load(&helper_id).expect("load").expect("present");
    assert_eq!(helper.assignee, "grok-4.1");
}

#[cfg(unix)]
#[test]
fn run_executes_command_agents_to_completion() {
    let (temp, store) = workspace();
    std::fs::write(
        temp.path().join(".conductor/config.toml"),
        r#"
[[agents]]
name = "sh"
kind = "command"
command = ["sh", "-c", "echo \"$CONDUCTOR_TASK_ID\" >> ran.txt", "agent"]
"#,
    )
    .expect("config");
    store.insert(&mut task_for("one", "sh", &[])).expect("one");
    let mut two = task_for("two", "sh", &[]);
    two.depends_on.insert("one".to_string());
    store.insert(&mut two).expect("two");

    let out = conductor(temp.path(), &["run"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK), "{}", stdout(&out));
    assert_eq!(
        std::fs::read_to_string(temp.path().join("ran.txt")).expect("ran"),
        "one\ntwo\n"
    );
    assert!(stdout(&out).ends_with("complete after 2 steps"));
}
