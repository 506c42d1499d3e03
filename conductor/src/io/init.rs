//! Initialization helpers for `.conductor/` scaffolding.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use super::config::{ConductorConfig, write_config};
use super::paths::ConductorPaths;

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing conductor-owned files.
    pub force: bool,
}

/// Create `.conductor/` scaffolding plus the protocol directories in `root`.
///
/// Fails if `.conductor/` already exists unless `options.force` is set.
/// Task records are never touched by a forced re-init.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<ConductorPaths> {
    let paths = ConductorPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "conductor init: {} exists but is not a directory",
            paths.state_dir.display()
        ));
    }
    if paths.state_dir.exists() && !options.force {
        return Err(anyhow!(
            "conductor init: .conductor already exists (use --force to overwrite)"
        ));
    }

    let cfg = ConductorConfig::default();
    for dir in [
        &paths.state_dir,
        &paths.tasks_dir,
        &paths.prompts_dir,
        &paths.logs_dir,
    ] {
        create_dir(dir)?;
    }
    for rule in &cfg.protocol.rules {
        create_dir(&paths.resolve(&rule.prefix))?;
    }
    create_dir(&paths.resolve(&cfg.merge.staging_dir))?;
    if let Some(parent) = paths.resolve(&cfg.merge.target).parent() {
        create_dir(parent)?;
    }

    fs::write(&paths.gitignore_path, STATE_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &cfg)?;

    info!(root = %root.display(), "initialized conductor workspace");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    debug!(path = %path.display(), "create directory");
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const STATE_GITIGNORE: &str = "logs/\n*.tmp\n*.lock\n";
