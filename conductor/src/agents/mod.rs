//! Agent capabilities and the name → capability registry.
//!
//! An agent either executes a task and reports success or failure, or hands
//! it off to someone outside the loop. The registry is the only place the run
//! loop learns which one it is dealing with.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Outcome;
use crate::error::ConfigurationError;
use crate::io::config::{AgentConfig, AgentKind};
use crate::io::paths::ConductorPaths;
use crate::task::Task;

pub mod command;
pub mod handoff;

pub use command::CommandExecutor;
pub use handoff::PromptHandoff;

/// What an executor reported for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub success: bool,
    /// Short human-readable summary for logs.
    pub detail: String,
}

impl ExecResult {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Performs a task synchronously.
///
/// An `Err` is treated like a reported failure: it consumes a retry.
pub trait TaskExecutor {
    fn execute(&self, task: &Task) -> Result<ExecResult>;
}

/// Passes a task to an external actor. Never changes task status itself.
pub trait Handoff {
    fn hand_off(&self, task: &Task) -> Result<()>;
}

pub enum AgentCapability {
    Executor(Box<dyn TaskExecutor>),
    Handoff(Box<dyn Handoff>),
}

impl AgentCapability {
    pub fn kind(&self) -> AgentKind {
        match self {
            AgentCapability::Executor(_) => AgentKind::Command,
            AgentCapability::Handoff(_) => AgentKind::Handoff,
        }
    }
}

/// Maps assignee names to capabilities.
#[derive(Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentCapability>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one capability per configured agent.
    pub fn from_config(paths: &ConductorPaths, agents: &[AgentConfig]) -> Self {
        let mut registry = Self::new();
        for agent in agents {
            match agent.kind {
                AgentKind::Command => {
                    registry.register_executor(&agent.name, CommandExecutor::new(paths, agent));
                }
                AgentKind::Handoff => {
                    registry.register_handoff(&agent.name, PromptHandoff::new(paths, &agent.name));
                }
            }
        }
        registry
    }

    /// Register an executor; it replaces anything registered under `name`.
    pub fn register_executor(&mut self, name: &str, executor: impl TaskExecutor + 'static) {
        self.agents.insert(
            name.to_string(),
            AgentCapability::Executor(Box::new(executor)),
        );
    }

    /// Register a handoff. An executor already registered under `name` wins.
    pub fn register_handoff(&mut self, name: &str, handoff: impl Handoff + 'static) {
        if matches!(self.agents.get(name), Some(AgentCapability::Executor(_))) {
            warn!(agent = name, "executor already registered, ignoring handoff");
            return;
        }
        self.agents
            .insert(name.to_string(), AgentCapability::Handoff(Box::new(handoff)));
    }

    pub fn get(&self, name: &str) -> Option<&AgentCapability> {
        self.agents.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Route `task` to its assignee's capability.
    ///
    /// An unknown assignee is a configuration error, never a retryable failure.
    #[instrument(skip_all, fields(task_id = %task.id, assignee = %task.assignee))]
    pub fn dispatch(&self, task: &Task) -> Result<Outcome, ConfigurationError> {
        let Some(capability) = self.agents.get(&task.assignee) else {
            return Err(ConfigurationError::UnregisteredAgent {
                task_id: task.id.clone(),
                assignee: task.assignee.clone(),
            });
        };

        let outcome = match capability {
            AgentCapability::Executor(executor) => match executor.execute(task) {
                Ok(result) if result.success => {
                    debug!(detail = %result.detail, "executor succeeded");
                    Outcome::Success
                }
                Ok(result) => {
                    warn!(detail = %result.detail, "executor reported failure");
                    Outcome::Failure {
                        reason: Some(result.detail),
                    }
                }
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "executor errored");
                    Outcome::Failure {
                        reason: Some(format!("{err:#}")),
                    }
                }
            },
            AgentCapability::Handoff(handoff) => match handoff.hand_off(task) {
                Ok(()) => {
                    info!("handed off, awaiting external input");
                    Outcome::Deferred
                }
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "handoff failed");
                    Outcome::Failure {
                        reason: Some(format!("handoff: {err:#}")),
                    }
                }
            },
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{AlwaysFail, CallLog, RecordingHandoff, ScriptedExecutor, task_for};

    #[test]
    fn executor_results_map_to_outcomes() {
        let log = CallLog::default();
        let mut registry = AgentRegistry::new();
        registry.register_executor(
            "worker",
            ScriptedExecutor::new(log.clone())
                .then_fail("tests red")
                .then_error("spawn failed"),
        );
        let t = task_for("t1", "worker", &[]);

        assert_eq!(
            registry.dispatch(&t),
            Ok(Outcome::Failure {
                reason: Some("tests red".to_string())
            })
        );
        assert!(matches!(
            registry.dispatch(&t),
            Ok(Outcome::Failure { reason: Some(r) }) if r.contains("spawn failed")
        ));
        assert_eq!(registry.dispatch(&t), Ok(Outcome::Success));
        assert_eq!(log.calls().len(), 3);
    }

    #[test]
    fn handoff_defers() {
        let handoff = RecordingHandoff::default();
        let log = handoff.log.clone();
        let mut registry = AgentRegistry::new();
        registry.register_handoff("reviewer", handoff);

        let t = task_for("t1", "reviewer", &[]);
        assert_eq!(registry.dispatch(&t), Ok(Outcome::Deferred));
        assert_eq!(log.calls(), vec!["t1".to_string()]);
    }

    #[test]
    fn unknown_assignee_is_configuration_error() {
        let registry = AgentRegistry::new();
        let err = registry.dispatch(&task_for("t1", "ghost", &[])).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnregisteredAgent {
                task_id: "t1".to_string(),
                assignee: "ghost".to_string()
            }
        );
    }

    #[test]
    fn executor_takes_precedence_over_handoff() {
        let mut registry = AgentRegistry::new();
        registry.register_executor("dual", AlwaysFail::default());
        registry.register_handoff("dual", RecordingHandoff::default());
        assert_eq!(registry.get("dual").map(AgentCapability::kind), Some(AgentKind::Command));
    }

    #[test]
    fn from_config_registers_every_agent() {
        let paths = ConductorPaths::new("/work");
        let registry = AgentRegistry::from_config(
            &paths,
            &crate::io::config::ConductorConfig::default().agents,
        );
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["gemini", "grok-4.1", "grok-fast"]
        );
        assert_eq!(registry.get("gemini").map(AgentCapability::kind), Some(AgentKind::Handoff));
    }
}
