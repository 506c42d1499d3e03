//! Builders and fakes shared by unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};

use crate::agents::{ExecResult, Handoff, TaskExecutor};
use crate::io::init::{InitOptions, init_workspace};
use crate::io::paths::ConductorPaths;
use crate::io::task_store::{FsTaskStore, TaskStore};
use crate::task::Task;

/// Timestamp used for every fixture so serialized output is stable.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Pending task assigned to `agent`.
pub fn task(id: &str, priority: i64) -> Task {
    let mut task = Task::with_id(id, format!("task {id}"), "agent");
    task.priority = priority;
    task.updated_at = fixed_now();
    task
}

pub fn task_with_deps(id: &str, priority: i64, deps: &[&str]) -> Task {
    let mut task = task(id, priority);
    task.depends_on = deps.iter().map(|d| (*d).to_string()).collect();
    task
}

/// Pending task with an explicit assignee and declared files.
pub fn task_for(id: &str, assignee: &str, files: &[&str]) -> Task {
    let mut task = task(id, 10);
    task.assignee = assignee.to_string();
    task.files = files.iter().map(|f| (*f).to_string()).collect();
    task
}

/// Shared log of task ids an agent fake was asked to handle.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<String>>>);

impl CallLog {
    pub fn record(&self, id: &str) {
        self.0.borrow_mut().push(id.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Executor that replays a script of results, then succeeds.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: RefCell<VecDeque<Result<ExecResult, String>>>,
    log: CallLog,
}

impl ScriptedExecutor {
    pub fn new(log: CallLog) -> Self {
        Self {
            script: RefCell::default(),
            log,
        }
    }

    pub fn then_fail(self, detail: &str) -> Self {
        self.script.borrow_mut().push_back(Ok(ExecResult::failure(detail)));
        self
    }

    pub fn then_error(self, message: &str) -> Self {
        self.script.borrow_mut().push_back(Err(message.to_string()));
        self
    }
}

impl TaskExecutor for ScriptedExecutor {
    fn execute(&self, task: &Task) -> Result<ExecResult> {
        self.log.record(&task.id);
        match self.script.borrow_mut().pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(ExecResult::success("scripted success")),
        }
    }
}

/// Executor that reports failure on every call.
#[derive(Debug, Default)]
pub struct AlwaysFail {
    pub log: CallLog,
}

impl TaskExecutor for AlwaysFail {
    fn execute(&self, task: &Task) -> Result<ExecResult> {
        self.log.record(&task.id);
        Ok(ExecResult::failure("always fails"))
    }
}

/// Executor that runs a hook against the task before succeeding.
pub struct HookExecutor<F: Fn(&Task)> {
    hook: F,
    log: CallLog,
}

impl<F: Fn(&Task)> HookExecutor<F> {
    pub fn new(log: CallLog, hook: F) -> Self {
        Self { hook, log }
    }
}

impl<F: Fn(&Task)> TaskExecutor for HookExecutor<F> {
    fn execute(&self, task: &Task) -> Result<ExecResult> {
        self.log.record(&task.id);
        (self.hook)(task);
        Ok(ExecResult::success("hooked"))
    }
}

/// Handoff that records the task and writes nothing.
#[derive(Debug, Default)]
pub struct RecordingHandoff {
    pub log: CallLog,
}

impl Handoff for RecordingHandoff {
    fn hand_off(&self, task: &Task) -> Result<()> {
        self.log.record(&task.id);
        Ok(())
    }
}

/// Initialized workspace in a temp directory.
pub struct TestWorkspace {
    _temp: tempfile::TempDir,
    pub paths: ConductorPaths,
    pub store: FsTaskStore,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_workspace(temp.path(), &InitOptions { force: false })?;
        let store = FsTaskStore::new(&paths.tasks_dir)?;
        Ok(Self {
            _temp: temp,
            paths,
            store,
        })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Insert fixtures as fresh records.
    pub fn add(&self, tasks: impl IntoIterator<Item = Task>) -> Result<()> {
        for mut task in tasks {
            self.store.insert(&mut task)?;
        }
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Task> {
        self.store
            .load(id)?
            .ok_or_else(|| anyhow!("task {id} not found"))
    }

    /// Write a proposal file into the staging directory.
    pub fn stage_proposal(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.paths.root.join("shared/proposals").join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}
