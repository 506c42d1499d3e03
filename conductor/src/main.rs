//! `conductor` command-line interface.
//!
//! Operates on the workspace containing `.conductor/` (found by walking up
//! from the current directory, or given with `--root`).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{ArgGroup, Parser, Subcommand};

use conductor::agents::AgentRegistry;
use conductor::core::diagnosis::diagnose_stuck;
use conductor::core::resolver::{eligible_tasks, has_pending, next_task};
use conductor::exit_codes;
use conductor::external::{HelpRequest, NewTask, add_task, request_help, resolve_task};
use conductor::io::config::{ConductorConfig, load_config};
use conductor::io::git::{Committer, Git, NoCommit};
use conductor::io::init::{InitOptions, init_workspace};
use conductor::io::merge::{MergeSettings, merge_proposals};
use conductor::io::paths::{ConductorPaths, find_root};
use conductor::io::task_store::{FsTaskStore, TaskStore};
use conductor::logging;
use conductor::run::{RunOptions, RunStop, StepRecord, run_loop};
use conductor::task::{DEFAULT_PRIORITY, TaskStatus, status_counts};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Deterministic task orchestrator for a team of AI agents"
)]
struct Cli {
    /// Workspace root (defaults to the nearest directory containing `.conductor/`).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.conductor/`, the default config and the protocol directories.
    Init {
        /// Overwrite existing config files. Task records are kept.
        #[arg(short, long)]
        force: bool,
    },
    /// Merge proposals, then dispatch tasks until done, stuck or halted.
    Run,
    /// Print the id of the next eligible task.
    Next {
        /// Print every eligible task in dispatch order.
        #[arg(long)]
        all: bool,
    },
    /// Check config and task records (schema, invariants, cycles, ownership, agents).
    Validate,
    /// Merge staged proposals into the shared target file.
    Merge,
    /// List tasks with status, priority and retry count.
    Status,
    /// Add a pending task.
    Add {
        #[arg(long)]
        assignee: String,
        #[arg(long)]
        description: String,
        /// Explicit id (default: generated).
        #[arg(long)]
        id: Option<String>,
        /// File the task will modify (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,
        /// Task that must complete first (repeatable).
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_PRIORITY, allow_hyphen_values = true)]
        priority: i64,
    },
    /// Spawn a helper task and block the given task on it.
    HelpRequest {
        task_id: String,
        /// Agent that should help.
        #[arg(long)]
        helper: String,
        #[arg(long)]
        question: String,
        #[arg(long = "file")]
        files: Vec<String>,
    },
    /// Record the outcome of a task awaiting external input.
    #[command(group(ArgGroup::new("verdict").required(true).args(["completed", "failed"])))]
    Resolve {
        task_id: String,
        #[arg(long)]
        completed: bool,
        #[arg(long)]
        failed: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    if let Command::Init { force } = cli.command {
        let root = match cli.root {
            Some(root) => root,
            None => std::env::current_dir().context("current directory")?,
        };
        let paths = init_workspace(&root, &InitOptions { force })?;
        println!("initialized {}", paths.state_dir.display());
        return Ok(exit_codes::OK);
    }

    let workspace = Workspace::open(cli.root.as_deref())?;
    match cli.command {
        Command::Init { .. } => Ok(exit_codes::OK),
        Command::Run => cmd_run(&workspace),
        Command::Next { all } => cmd_next(&workspace, all),
        Command::Validate => cmd_validate(&workspace),
        Command::Merge => cmd_merge(&workspace),
        Command::Status => cmd_status(&workspace),
        Command::Add {
            assignee,
            description,
            id,
            files,
            depends_on,
            priority,
        } => {
            let task = add_task(
                &workspace.store,
                NewTask {
                    id,
                    description,
                    assignee,
                    files,
                    depends_on: depends_on.into_iter().collect::<BTreeSet<_>>(),
                    priority,
                },
            )?;
            println!("{}", task.id);
            Ok(exit_codes::OK)
        }
        Command::HelpRequest {
            task_id,
            helper,
            question,
            files,
        } => {
            let helper = request_help(
                &workspace.store,
                &task_id,
                HelpRequest {
                    helper,
                    question,
                    files,
                },
            )?;
            println!("{}", helper.id);
            Ok(exit_codes::OK)
        }
        Command::Resolve {
            task_id, completed, ..
        } => {
            let task = resolve_task(&workspace.store, &task_id, completed)?;
            println!("{} {}", task.id, task.status);
            Ok(exit_codes::OK)
        }
    }
}

struct Workspace {
    paths: ConductorPaths,
    config: ConductorConfig,
    store: FsTaskStore,
}

impl Workspace {
    fn open(root: Option<&Path>) -> Result<Self> {
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => {
                let cwd = std::env::current_dir().context("current directory")?;
                find_root(&cwd).ok_or_else(|| {
                    anyhow!("no .conductor directory here or above (run `conductor init`)")
                })?
            }
        };
        let paths = ConductorPaths::new(root);
        if !paths.is_initialized() {
            return Err(anyhow!(
                "{} is not initialized (run `conductor init`)",
                paths.root.display()
            ));
        }
        let config = load_config(&paths.config_path)?;
        let store = FsTaskStore::new(&paths.tasks_dir)?;
        Ok(Self {
            paths,
            config,
            store,
        })
    }
}

fn cmd_run(ws: &Workspace) -> Result<i32> {
    let registry = AgentRegistry::from_config(&ws.paths, &ws.config.agents);
    let options = RunOptions::from_config(&ws.paths, &ws.config);
    let git = Git::new(&ws.paths.root, ws.config.commit.email_domain.as_str());
    if ws.config.commit.enabled && git.is_repo() {
        run_with(ws, &registry, &git, &options)
    } else {
        run_with(ws, &registry, &NoCommit, &options)
    }
}

fn run_with<C: Committer>(
    ws: &Workspace,
    registry: &AgentRegistry,
    committer: &C,
    options: &RunOptions,
) -> Result<i32> {
    let report = run_loop(&ws.store, registry, committer, options, print_step)?;
    for name in &report.merge.merged {
        println!("merged {name}");
    }
    match &report.stop {
        RunStop::Complete => println!("complete after {} steps", report.steps),
        RunStop::Stuck(diagnosis) => {
            println!("stuck after {} steps", report.steps);
            for line in diagnosis.render() {
                println!("  {line}");
            }
        }
        RunStop::Deferred { task_id } => {
            println!("{task_id} awaits external input (conductor resolve {task_id} --completed|--failed)");
        }
        RunStop::Failed { task_id, cause } => {
            println!("{task_id} failed: {cause}");
        }
        RunStop::StepLimit { max_steps } => println!("stopped at step limit {max_steps}"),
    }
    Ok(report.stop.exit_code())
}

fn print_step(step: &StepRecord) {
    println!(
        "[{}] {} ({}) -> {} [{}]",
        step.step,
        step.task_id,
        step.assignee,
        step.status,
        step.transition.label()
    );
}

fn cmd_next(ws: &Workspace, all: bool) -> Result<i32> {
    let tasks = ws.store.load_all()?;
    if all {
        let eligible = eligible_tasks(&tasks);
        for task in &eligible {
            println!("{}", task.id);
        }
        if !eligible.is_empty() {
            return Ok(exit_codes::OK);
        }
    } else if let Some(task) = next_task(&tasks) {
        println!("{}", task.id);
        return Ok(exit_codes::OK);
    }

    if has_pending(&tasks) {
        for line in diagnose_stuck(&tasks).render() {
            eprintln!("{line}");
        }
        return Ok(exit_codes::STUCK);
    }
    eprintln!("no pending tasks");
    Ok(exit_codes::NO_ELIGIBLE)
}

fn cmd_validate(ws: &Workspace) -> Result<i32> {
    let tasks = ws.store.load_all()?;
    let registry = AgentRegistry::from_config(&ws.paths, &ws.config.agents);
    let mut problems = Vec::new();

    let diagnosis = diagnose_stuck(&tasks);
    for cycle in &diagnosis.cycles {
        problems.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }
    for (task, dep) in &diagnosis.missing {
        eprintln!("warning: {task} depends on unknown task {dep}");
    }
    for task in tasks.iter().filter(|t| t.status == TaskStatus::Pending) {
        if let Err(violation) = ws.config.protocol.check(task) {
            problems.push(violation.to_string());
        }
        if registry.get(&task.assignee).is_none() {
            problems.push(format!(
                "{}: no agent registered for assignee '{}'",
                task.id, task.assignee
            ));
        }
    }

    if problems.is_empty() {
        println!("ok: {} tasks", tasks.len());
        return Ok(exit_codes::OK);
    }
    for problem in &problems {
        eprintln!("{problem}");
    }
    Ok(exit_codes::INVALID)
}

fn cmd_merge(ws: &Workspace) -> Result<i32> {
    let settings = MergeSettings::from_config(&ws.paths, &ws.config.merge);
    let report = merge_proposals(&settings)?;
    for name in &report.merged {
        println!("merged {name}");
    }
    for name in &report.deduplicated {
        println!("already merged {name}");
    }
    for name in &report.skipped {
        eprintln!("skipped {name}: not UTF-8 text");
    }
    Ok(exit_codes::OK)
}

fn cmd_status(ws: &Workspace) -> Result<i32> {
    let tasks = ws.store.load_all()?;
    for task in &tasks {
        let deps = task.depends_on.iter().cloned().collect::<Vec<_>>().join(",");
        println!(
            "{}\t{}\tpriority={}\tretries={}\tassignee={}\tdepends_on=[{}]",
            task.id, task.status, task.priority, task.retry_count, task.assignee, deps
        );
    }
    let counts = status_counts(&tasks)
        .into_iter()
        .map(|(status, count)| format!("{status}={count}"))
        .collect::<Vec<_>>();
    println!("{}", counts.join(" "));
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["conductor", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_add_with_repeated_flags() {
        let cli = Cli::parse_from([
            "conductor",
            "add",
            "--assignee",
            "gemini",
            "--description",
            "build ui",
            "--file",
            "gemini/a.py",
            "--file",
            "gemini/b.py",
            "--depends-on",
            "task_001",
            "--priority",
            "-1",
        ]);
        match cli.command {
            Command::Add {
                files,
                depends_on,
                priority,
                id,
                ..
            } => {
                assert_eq!(files, vec!["gemini/a.py", "gemini/b.py"]);
                assert_eq!(depends_on, vec!["task_001"]);
                assert_eq!(priority, -1);
                assert!(id.is_none());
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn resolve_needs_exactly_one_verdict() {
        assert!(Cli::try_parse_from(["conductor", "resolve", "t1"]).is_err());
        assert!(Cli::try_parse_from(["conductor", "resolve", "t1", "--completed", "--failed"]).is_err());
        let cli = Cli::parse_from(["conductor", "resolve", "t1", "--failed"]);
        assert!(matches!(
            cli.command,
            Command::Resolve { completed: false, failed: true, .. }
        ));
    }

    #[test]
    fn global_root_flag_after_subcommand() {
        let cli = Cli::parse_from(["conductor", "status", "--root", "/work"]);
        assert_eq!(cli.root.as_deref(), Some(Path::new("/work")));
    }
}
