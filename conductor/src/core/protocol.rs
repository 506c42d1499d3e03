//! File ownership protocol: which assignee may write where.
//!
//! The table is data, not code. Adding an agent means adding a rule.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolViolation;
use crate::task::Task;

/// Who may write under a rule's prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Any assignee.
    Any,
    /// No assignee (e.g. shared code that must go through proposals).
    None,
    /// Only the listed assignees.
    Agents(Vec<String>),
}

impl Access {
    fn allows(&self, assignee: &str) -> bool {
        match self {
            Access::Any => true,
            Access::None => false,
            Access::Agents(agents) => agents.iter().any(|a| a == assignee),
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Any => f.write_str("any assignee"),
            Access::None => f.write_str("no assignee"),
            Access::Agents(agents) => write!(f, "one of [{}]", agents.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRule {
    /// `/`-separated leading path segments, e.g. `shared/proposals`.
    pub prefix: String,
    pub access: Access,
}

impl OwnershipRule {
    pub fn new(prefix: impl Into<String>, access: Access) -> Self {
        Self {
            prefix: prefix.into(),
            access,
        }
    }

    fn segments(&self) -> Vec<&str> {
        split_segments(&self.prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnershipPolicy {
    /// Applies to paths no rule matches.
    pub default_access: Access,
    pub rules: Vec<OwnershipRule>,
}

impl Default for OwnershipPolicy {
    fn default() -> Self {
        Self {
            default_access: Access::Any,
            rules: vec![
                OwnershipRule::new("grok", Access::Agents(vec!["grok-fast".to_string()])),
                OwnershipRule::new("gemini", Access::Agents(vec!["gemini".to_string()])),
                OwnershipRule::new("shared/proposals", Access::Any),
                OwnershipRule::new("shared", Access::None),
                OwnershipRule::new("docs", Access::Any),
            ],
        }
    }
}

impl OwnershipPolicy {
    pub fn validate(&self) -> Result<(), String> {
        for rule in &self.rules {
            if rule.segments().is_empty() {
                return Err(format!("ownership rule prefix '{}' is empty", rule.prefix));
            }
        }
        let mut prefixes: Vec<Vec<&str>> = self.rules.iter().map(|r| r.segments()).collect();
        prefixes.sort();
        if let Some(dup) = prefixes.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(format!("duplicate ownership rule '{}'", dup[0].join("/")));
        }
        Ok(())
    }

    /// Check every declared path of `task`; the first unauthorized path wins.
    pub fn check(&self, task: &Task) -> Result<(), ProtocolViolation> {
        for path in &task.files {
            self.check_path(task, path)?;
        }
        Ok(())
    }

    pub fn is_authorized(&self, task: &Task) -> bool {
        self.check(task).is_ok()
    }

    fn check_path(&self, task: &Task, path: &str) -> Result<(), ProtocolViolation> {
        let violation = |rule: &str, required: String| ProtocolViolation {
            task_id: task.id.clone(),
            assignee: task.assignee.clone(),
            path: path.to_string(),
            rule: rule.to_string(),
            required,
        };

        if !is_relative_path(path) {
            return Err(violation(
                "<path>",
                "a relative path without '..' segments".to_string(),
            ));
        }

        let (rule, access) = match self.owner_of(path) {
            Some(rule) => (rule.prefix.as_str(), &rule.access),
            None => ("<default>", &self.default_access),
        };
        if access.allows(&task.assignee) {
            return Ok(());
        }
        Err(violation(rule, access.to_string()))
    }

    /// The rule matching the most leading segments of `path`.
    pub fn owner_of(&self, path: &str) -> Option<&OwnershipRule> {
        let segments = split_segments(path);
        self.rules
            .iter()
            .filter(|rule| segments.starts_with(&rule.segments()))
            .max_by_key(|rule| rule.segments().len())
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect()
}

fn is_relative_path(path: &str) -> bool {
    let trimmed = path.trim();
    !trimmed.is_empty()
        && !trimmed.starts_with('/')
        && !trimmed.contains('\\')
        && !split_segments(trimmed).is_empty()
        && !trimmed.split('/').any(|segment| segment == "..")
}
