//! Conductor configuration stored under `.conductor/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::protocol::OwnershipPolicy;
use crate::core::retry::RetryPolicy;

/// Conductor configuration (TOML).
///
/// Edited by humans. Missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Dispatches allowed in one `run` before it stops with a step limit.
    pub max_steps: u32,

    /// Consecutive stale saves tolerated before `run` gives up.
    pub max_conflicts: u32,

    pub retry: RetryPolicy,
    pub merge: MergeConfig,
    pub commit: CommitConfig,
    pub protocol: OwnershipPolicy,
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MergeConfig {
    /// Staging directory for proposals, relative to the root.
    pub staging_dir: String,
    /// File proposals are appended to, relative to the root.
    pub target: String,
    /// Line-comment prefix for markers in the target file.
    pub comment_prefix: String,
    /// Only merge proposals with these extensions (no dot). Empty merges all.
    pub extensions: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            staging_dir: "shared/proposals".to_string(),
            target: "shared/app/main.py".to_string(),
            comment_prefix: "#".to_string(),
            extensions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommitConfig {
    /// Commit the working tree after each completed task.
    pub enabled: bool,
    /// Domain used for per-agent author emails (`<agent>@<domain>`).
    pub email_domain: String,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            email_domain: "agents.local".to_string(),
        }
    }
}

/// How an agent is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Run a subprocess and use its exit status.
    Command,
    /// Write a prompt artifact for a human or external tool.
    Handoff,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    pub name: String,
    pub kind: AgentKind,
    /// Program and arguments for `command` agents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
}

fn default_timeout_secs() -> u64 {
    10 * 60
}

fn default_output_limit_bytes() -> usize {
    100_000
}

impl AgentConfig {
    pub fn command(name: &str, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: AgentKind::Command,
            command: command.iter().map(|s| (*s).to_string()).collect(),
            timeout_secs: default_timeout_secs(),
            output_limit_bytes: default_output_limit_bytes(),
        }
    }

    pub fn handoff(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AgentKind::Handoff,
            command: Vec::new(),
            timeout_secs: default_timeout_secs(),
            output_limit_bytes: default_output_limit_bytes(),
        }
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            max_conflicts: 3,
            retry: RetryPolicy::default(),
            merge: MergeConfig::default(),
            commit: CommitConfig::default(),
            protocol: OwnershipPolicy::default(),
            agents: vec![
                AgentConfig::command("grok-fast", &["python", "clients/grok_fast_client.py"]),
                AgentConfig::handoff("gemini"),
                AgentConfig::handoff("grok-4.1"),
            ],
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.max_conflicts == 0 {
            return Err(anyhow!("max_conflicts must be > 0"));
        }
        self.retry.validate().map_err(|err| anyhow!(err))?;
        self.protocol.validate().map_err(|err| anyhow!(err))?;
        for (key, value) in [
            ("merge.staging_dir", &self.merge.staging_dir),
            ("merge.target", &self.merge.target),
        ] {
            if value.trim().is_empty() || Path::new(value).is_absolute() {
                return Err(anyhow!("{key} must be a non-empty relative path"));
            }
        }
        if self.merge.comment_prefix.trim().is_empty() {
            return Err(anyhow!("merge.comment_prefix must not be empty"));
        }

        let mut names = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(anyhow!("agents: name must not be empty"));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(anyhow!("agents: duplicate name '{}'", agent.name));
            }
            if agent.kind == AgentKind::Command
                && agent.command.first().is_none_or(|p| p.trim().is_empty())
            {
                return Err(anyhow!(
                    "agents: '{}' is a command agent but has no command",
                    agent.name
                ));
            }
            if agent.timeout_secs == 0 {
                return Err(anyhow!("agents: '{}' timeout_secs must be > 0", agent.name));
            }
            if agent.output_limit_bytes == 0 {
                return Err(anyhow!(
                    "agents: '{}' output_limit_bytes must be > 0",
                    agent.name
                ));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    super::write_atomic(path, buf.as_bytes())
}
