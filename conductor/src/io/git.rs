//! Git adapter for per-task commits.
//!
//! Commits are attributed to the agent that did the work. A small wrapper
//! around `git` subprocess calls keeps this explicit and easy to fake.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Records completed work in version control.
pub trait Committer {
    /// Commit all changes on behalf of `agent`.
    ///
    /// Returns `Ok(false)` when there was nothing to commit.
    fn commit(&self, message: &str, agent: &str) -> Result<bool>;
}

/// Committer that never commits (commits disabled or no repository).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCommit;

impl Committer for NoCommit {
    fn commit(&self, _message: &str, _agent: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    email_domain: String,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, email_domain: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            email_domain: email_domain.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if the workdir is inside a git work tree.
    pub fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// `Name <name@domain>` author string for an agent.
    pub fn author_for(&self, agent: &str) -> String {
        format!("{agent} <{agent}@{}>", self.email_domain)
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_checked(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message and author.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all, fields(author))]
    pub fn commit_staged(&self, message: &str, author: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        let author_arg = format!("--author={author}");
        self.run_checked(&["commit", "-m", message, &author_arg])?;
        debug!("committed staged changes");
        Ok(true)
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl Committer for Git {
    fn commit(&self, message: &str, agent: &str) -> Result<bool> {
        self.add_all()?;
        self.commit_staged(message, &self.author_for(agent))
    }
}

/// One-line commit subject for a completed task.
pub fn commit_message(task_id: &str, description: &str) -> String {
    let summary: String = description
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(60)
        .collect();
    format!("Task {task_id}: {summary}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("spawn git");
        assert!(out.status.success(), "git {args:?} failed");
        String::from_utf8_lossy(&out.stdout).to_string()
    }

    #[test]
    fn author_uses_agent_name_and_domain() {
        let g = Git::new("/tmp", "agents.local");
        assert_eq!(g.author_for("gemini"), "gemini <gemini@agents.local>");
    }

    #[test]
    fn commit_message_truncates_description() {
        let long = "x".repeat(100);
        let msg = commit_message("t1", &long);
        assert_eq!(msg, format!("Task t1: {}", "x".repeat(60)));
        assert_eq!(commit_message("t2", "first\nsecond"), "Task t2: first");
    }

    #[test]
    fn commits_as_agent_and_skips_clean_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        git(root, &["init", "-q"]);
        git(root, &["config", "user.name", "Test"]);
        git(root, &["config", "user.email", "test@example.com"]);

        let g = Git::new(root, "agents.local");
        assert!(g.is_repo());
        fs::write(root.join("a.txt"), "a").expect("write");
        assert!(g.commit("Task a: write a", "grok-fast").expect("commit"));

        let author = git(root, &["log", "-1", "--format=%an <%ae>"]);
        assert_eq!(author.trim(), "grok-fast <grok-fast@agents.local>");
        assert!(!g.commit("Task b: nothing", "grok-fast").expect("commit"));
    }

    #[test]
    fn plain_directory_is_not_a_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(!Git::new(temp.path(), "agents.local").is_repo());
    }
}
