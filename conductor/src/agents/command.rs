//! Executor that runs a configured subprocess per task.
//!
//! The task travels as arguments (`--task-id`, `--description`, `--files`),
//! as `CONDUCTOR_*` environment variables, and as JSON on stdin. Exit status
//! zero is success. Both streams are kept in `.conductor/logs/`.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use super::{ExecResult, TaskExecutor};
use crate::io::config::AgentConfig;
use crate::io::paths::ConductorPaths;
use crate::io::process::run_command_with_timeout;
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    root: PathBuf,
    logs_dir: PathBuf,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandExecutor {
    pub fn new(paths: &ConductorPaths, agent: &AgentConfig) -> Self {
        let (program, args) = match agent.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            root: paths.root.clone(),
            logs_dir: paths.logs_dir.clone(),
            program,
            args,
            timeout: Duration::from_secs(agent.timeout_secs),
            output_limit_bytes: agent.output_limit_bytes,
        }
    }

    fn build_command(&self, task: &Task) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--task-id")
            .arg(&task.id)
            .arg("--description")
            .arg(&task.description);
        if !task.files.is_empty() {
            cmd.arg("--files").args(&task.files);
        }
        cmd.current_dir(&self.root)
            .env("CONDUCTOR_TASK_ID", &task.id)
            .env("CONDUCTOR_TASK_ASSIGNEE", &task.assignee)
            .env("CONDUCTOR_TASK_DESCRIPTION", &task.description)
            .env("CONDUCTOR_TASK_FILES", task.files.join("\n"))
            .env("CONDUCTOR_ROOT", &self.root);
        cmd
    }

    /// Create parent directories of declared files so the agent can write them.
    fn prepare_files(&self, task: &Task) -> Result<()> {
        for file in &task.files {
            if let Some(parent) = self.root.join(file).parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
        }
        Ok(())
    }

    fn log_path(&self, task: &Task) -> PathBuf {
        self.logs_dir
            .join(format!("{}.attempt-{}.log", task.id, task.retry_count + 1))
    }
}

impl TaskExecutor for CommandExecutor {
    #[instrument(skip_all, fields(task_id = %task.id, program = %self.program))]
    fn execute(&self, task: &Task) -> Result<ExecResult> {
        if self.program.trim().is_empty() {
            return Err(anyhow!("agent '{}' has no command", task.assignee));
        }
        self.prepare_files(task)?;

        let stdin = serde_json::to_vec(task).context("serialize task for stdin")?;
        info!("running agent command");
        let output = run_command_with_timeout(
            self.build_command(task),
            Some(&stdin),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run agent command '{}'", self.program))?;

        let log_path = self.log_path(task);
        fs::create_dir_all(&self.logs_dir)
            .with_context(|| format!("create directory {}", self.logs_dir.display()))?;
        fs::write(&log_path, output.render_log())
            .with_context(|| format!("write agent log {}", log_path.display()))?;
        debug!(log = %log_path.display(), "wrote agent log");

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent command timed out");
            return Ok(ExecResult::failure(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            let last = output.last_line().unwrap_or_default();
            return Ok(ExecResult::failure(format!(
                "exit status {:?}: {last}",
                output.status.code()
            )));
        }
        Ok(ExecResult::success(output.last_line().unwrap_or_default()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::task_for;

    fn executor(root: &std::path::Path, script: &str, timeout_secs: u64) -> CommandExecutor {
        let paths = ConductorPaths::new(root);
        let mut agent = AgentConfig::command("sh-agent", &["sh", "-c", script, "agent"]);
        agent.timeout_secs = timeout_secs;
        CommandExecutor::new(&paths, &agent)
    }

    #[test]
    fn exit_zero_is_success_and_receives_task() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = executor(
            temp.path(),
            r#"test "$2" = "t1" && test "$CONDUCTOR_TASK_ID" = "t1" && echo "done $4""#,
            10,
        );
        let mut t = task_for("t1", "sh-agent", &["grok/out/x.py"]);
        t.description = "build it".to_string();

        let result = exec.execute(&t).expect("execute");
        assert_eq!(result, ExecResult::success("done build it"));
        assert!(temp.path().join("grok/out").is_dir());
        let log = fs::read_to_string(temp.path().join(".conductor/logs/t1.attempt-1.log"))
            .expect("log");
        assert!(log.contains("done build it"));
    }

    #[test]
    fn non_zero_exit_is_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = executor(temp.path(), "echo nope >&2; exit 2", 10);
        let result = exec.execute(&task_for("t1", "sh-agent", &[])).expect("execute");
        assert!(!result.success);
        assert!(result.detail.contains("nope"));
    }

    #[test]
    fn hang_becomes_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = executor(temp.path(), "sleep 5", 1);
        let result = exec.execute(&task_for("t1", "sh-agent", &[])).expect("execute");
        assert_eq!(result, ExecResult::failure("timed out after 1s"));
    }
}
