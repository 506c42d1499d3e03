//! Handoff that writes a prompt file for a human or external tool.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{info, instrument};

use super::Handoff;
use crate::io::paths::ConductorPaths;
use crate::task::Task;

const HANDOFF_TEMPLATE: &str = include_str!("prompts/handoff.md");

#[derive(Debug, Serialize)]
struct FileContext {
    path: String,
    contents: Option<String>,
}

/// Renders `prompts/<agent>_prompt_<task id>.md` and leaves the rest to whoever reads it.
#[derive(Debug, Clone)]
pub struct PromptHandoff {
    root: PathBuf,
    prompts_dir: PathBuf,
    agent: String,
}

impl PromptHandoff {
    pub fn new(paths: &ConductorPaths, agent: &str) -> Self {
        Self {
            root: paths.root.clone(),
            prompts_dir: paths.prompts_dir.clone(),
            agent: agent.to_string(),
        }
    }

    pub fn prompt_path(&self, task_id: &str) -> PathBuf {
        self.prompts_dir
            .join(format!("{}_prompt_{task_id}.md", self.agent))
    }

    pub fn render(&self, task: &Task) -> Result<String> {
        let files = task
            .files
            .iter()
            .map(|path| {
                let full = self.root.join(path);
                let contents = match fs::read_to_string(&full) {
                    Ok(contents) => Some(contents.trim_end().to_string()),
                    Err(err) if err.kind() == ErrorKind::NotFound => None,
                    Err(err) => {
                        return Err(err).with_context(|| format!("read {}", full.display()));
                    }
                };
                Ok(FileContext {
                    path: path.clone(),
                    contents,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut env = Environment::new();
        env.add_template("handoff", HANDOFF_TEMPLATE)?;
        let rendered = env.get_template("handoff")?.render(context! {
            agent => self.agent.as_str(),
            task => task,
            files => files,
        })?;
        Ok(rendered)
    }
}

impl Handoff for PromptHandoff {
    #[instrument(skip_all, fields(task_id = %task.id, agent = %self.agent))]
    fn hand_off(&self, task: &Task) -> Result<()> {
        let prompt = self.render(task)?;
        let path = self.prompt_path(&task.id);
        fs::create_dir_all(&self.prompts_dir)
            .with_context(|| format!("create directory {}", self.prompts_dir.display()))?;
        fs::write(&path, prompt).with_context(|| format!("write prompt {}", path.display()))?;
        info!(prompt = %path.display(), "prompt ready for external agent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task_for, task_with_deps};

    #[test]
    fn writes_prompt_with_task_and_file_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ConductorPaths::new(temp.path());
        fs::create_dir_all(temp.path().join("gemini")).expect("dir");
        fs::write(temp.path().join("gemini/ui.py"), "render()\n").expect("seed");

        let mut t = task_for("task_007", "gemini", &["gemini/ui.py", "gemini/new.py"]);
        t.description = "Polish the UI".to_string();
        t.depends_on = task_with_deps("x", 1, &["task_001"]).depends_on;

        let handoff = PromptHandoff::new(&paths, "gemini");
        handoff.hand_off(&t).expect("hand off");

        let prompt = fs::read_to_string(paths.prompts_dir.join("gemini_prompt_task_007.md"))
            .expect("prompt");
        assert!(prompt.starts_with("# Task task_007 for gemini"));
        assert!(prompt.contains("Polish the UI"));
        assert!(prompt.contains("Depends on: task_001"));
        assert!(prompt.contains("render()"));
        assert!(prompt.contains("(does not exist yet)"));
        assert!(prompt.contains("conductor resolve task_007 --completed"));
    }

    #[test]
    fn handoff_leaves_status_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ConductorPaths::new(temp.path());
        let t = task_for("t1", "gemini", &[]);
        let before = t.clone();
        PromptHandoff::new(&paths, "gemini").hand_off(&t).expect("hand off");
        assert_eq!(t, before);
        let prompt = fs::read_to_string(paths.prompts_dir.join("gemini_prompt_t1.md"))
            .expect("prompt");
        assert!(prompt.contains("No files declared."));
    }
}
