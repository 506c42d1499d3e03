//! Canonical locations under a conductor workspace root.

use std::path::{Path, PathBuf};

/// Name of the state directory created by `conductor init`.
pub const STATE_DIR: &str = ".conductor";

/// All conductor-owned paths for a project root.
#[derive(Debug, Clone)]
pub struct ConductorPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl ConductorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        Self {
            root: root.clone(),
            tasks_dir: state_dir.join("tasks"),
            prompts_dir: state_dir.join("prompts"),
            logs_dir: state_dir.join("logs"),
            config_path: state_dir.join("config.toml"),
            gitignore_path: state_dir.join(".gitignore"),
            state_dir,
        }
    }

    /// Resolve a workspace-relative path from config.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn task_path(&self, id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{id}.json"))
    }

    pub fn is_initialized(&self) -> bool {
        self.state_dir.is_dir()
    }
}

/// Walk upward from `start` to the first directory containing `.conductor/`.
pub fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(STATE_DIR).is_dir())
        .map(Path::to_path_buf)
}
