//! The scheduling loop behind `conductor run`.
//!
//! One tick: unblock, select, enforce protocol, dispatch, apply the state
//! machine, persist. The loop is the only writer of task status during a run;
//! anything else that writes concurrently shows up as a stale save and the
//! loop re-reads the world.

use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::agents::AgentRegistry;
use crate::core::diagnosis::{StuckDiagnosis, diagnose_stuck};
use crate::core::protocol::OwnershipPolicy;
use crate::core::resolver::{has_pending, next_task};
use crate::core::retry::RetryPolicy;
use crate::core::state_machine::{
    apply_outcome, reject_configuration, reject_protocol, unblock_ready,
};
use crate::core::types::{FailureCause, Transition};
use crate::error::StaleTask;
use crate::exit_codes;
use crate::io::config::ConductorConfig;
use crate::io::git::{Committer, commit_message};
use crate::io::merge::{MergeReport, MergeSettings, merge_proposals};
use crate::io::paths::ConductorPaths;
use crate::io::task_store::TaskStore;
use crate::task::{Task, TaskStatus};

/// Knobs for one `run_loop` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub retry: RetryPolicy,
    pub protocol: OwnershipPolicy,
    /// Merge staged proposals before the first tick. `None` skips merging.
    pub merge: Option<MergeSettings>,
    pub max_steps: u32,
    pub max_conflicts: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        let cfg = ConductorConfig::default();
        Self {
            retry: cfg.retry,
            protocol: cfg.protocol,
            merge: None,
            max_steps: cfg.max_steps,
            max_conflicts: cfg.max_conflicts,
        }
    }
}

impl RunOptions {
    pub fn from_config(paths: &ConductorPaths, cfg: &ConductorConfig) -> Self {
        Self {
            retry: cfg.retry.clone(),
            protocol: cfg.protocol.clone(),
            merge: Some(MergeSettings::from_config(paths, &cfg.merge)),
            max_steps: cfg.max_steps,
            max_conflicts: cfg.max_conflicts,
        }
    }
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// No pending tasks remain.
    Complete,
    /// Pending tasks remain but none is eligible.
    Stuck(StuckDiagnosis),
    /// A task was handed off and now awaits external input.
    Deferred { task_id: String },
    /// A task failed for good.
    Failed { task_id: String, cause: FailureCause },
    /// `max_steps` dispatches happened without finishing.
    StepLimit { max_steps: u32 },
}

impl RunStop {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStop::Complete => exit_codes::OK,
            RunStop::Stuck(_) => exit_codes::STUCK,
            RunStop::Deferred { .. } => exit_codes::DEFERRED,
            RunStop::Failed { .. } => exit_codes::HALTED,
            RunStop::StepLimit { .. } => exit_codes::STEP_LIMIT,
        }
    }
}

/// One applied dispatch, reported to the `on_step` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: u32,
    pub task_id: String,
    pub assignee: String,
    pub status: TaskStatus,
    pub transition: Transition,
}

/// Summary of a `run_loop` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Dispatches performed, including ones discarded as stale.
    pub steps: u32,
    pub merge: MergeReport,
    pub stop: RunStop,
}

/// Run ticks until the schedule completes, gets stuck, halts or hits the step limit.
///
/// Returns `Err` for I/O failures, malformed records and when more than
/// `max_conflicts` consecutive saves were stale.
#[instrument(skip_all, fields(max_steps = options.max_steps))]
pub fn run_loop<S: TaskStore, C: Committer, F: FnMut(&StepRecord)>(
    store: &S,
    registry: &AgentRegistry,
    committer: &C,
    options: &RunOptions,
    mut on_step: F,
) -> Result<RunReport> {
    let merge = match &options.merge {
        Some(settings) => merge_proposals(settings).context("merge proposals")?,
        None => MergeReport::default(),
    };
    if !merge.is_empty() {
        info!(
            merged = merge.merged.len(),
            deduplicated = merge.deduplicated.len(),
            skipped = merge.skipped.len(),
            "merged proposals"
        );
    }

    let mut steps = 0u32;
    let mut conflicts = 0u32;
    'tick: loop {
        let mut tasks = store.load_all().context("load tasks")?;

        let unblocked = unblock_ready(&mut tasks, Utc::now());
        for task in tasks.iter_mut().filter(|t| unblocked.contains(&t.id)) {
            if !persist(store, task, &mut conflicts, options.max_conflicts)? {
                continue 'tick;
            }
            info!(task_id = %task.id, blocked_by = ?task.blocked_by, "unblocked task");
        }

        let Some(next) = next_task(&tasks) else {
            let stop = if has_pending(&tasks) {
                let diagnosis = diagnose_stuck(&tasks);
                for line in diagnosis.render() {
                    warn!("stuck: {line}");
                }
                RunStop::Stuck(diagnosis)
            } else {
                let waiting = tasks.iter().filter(|t| !t.status.is_final()).count();
                info!(waiting, "no pending tasks left");
                RunStop::Complete
            };
            return Ok(RunReport { steps, merge, stop });
        };

        if steps >= options.max_steps {
            warn!(max_steps = options.max_steps, "step limit reached");
            return Ok(RunReport {
                steps,
                merge,
                stop: RunStop::StepLimit {
                    max_steps: options.max_steps,
                },
            });
        }
        let mut task = next.clone();
        steps += 1;

        let delay = options.retry.delay_for(task.retry_count);
        if !delay.is_zero() {
            debug!(task_id = %task.id, delay_ms = delay.as_millis() as u64, "retry backoff");
            thread::sleep(delay);
        }

        let started = Instant::now();
        let transition = dispatch_one(&mut task, registry, options)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !persist(store, &mut task, &mut conflicts, options.max_conflicts)? {
            warn!(task_id = %task.id, "task changed during dispatch, discarding outcome");
            continue;
        }
        info!(
            step = steps,
            task_id = %task.id,
            assignee = %task.assignee,
            status = %task.status,
            transition = transition.label(),
            elapsed_ms,
            "applied transition"
        );
        on_step(&StepRecord {
            step: steps,
            task_id: task.id.clone(),
            assignee: task.assignee.clone(),
            status: task.status,
            transition: transition.clone(),
        });

        match transition {
            Transition::Completed => commit_completed(committer, &task),
            Transition::Retry { .. } => {}
            Transition::Deferred => {
                return Ok(RunReport {
                    steps,
                    merge,
                    stop: RunStop::Deferred { task_id: task.id },
                });
            }
            Transition::Failed(cause) => {
                return Ok(RunReport {
                    steps,
                    merge,
                    stop: RunStop::Failed {
                        task_id: task.id,
                        cause,
                    },
                });
            }
        }
    }
}

/// Protocol check, then dispatch, then the state machine.
fn dispatch_one(task: &mut Task, registry: &AgentRegistry, options: &RunOptions) -> Result<Transition> {
    if let Err(violation) = options.protocol.check(task) {
        error!(task_id = %task.id, %violation, "protocol violation");
        return Ok(reject_protocol(task, violation, Utc::now())?);
    }
    match registry.dispatch(task) {
        Ok(outcome) => Ok(apply_outcome(task, &outcome, &options.retry, Utc::now())?),
        Err(err) => {
            error!(task_id = %task.id, %err, "cannot dispatch");
            Ok(reject_configuration(task, err, Utc::now())?)
        }
    }
}

/// Save `task`. `Ok(false)` means the record was stale and the caller should reload.
fn persist<S: TaskStore>(
    store: &S,
    task: &mut Task,
    conflicts: &mut u32,
    max_conflicts: u32,
) -> Result<bool> {
    let err = match store.save(task) {
        Ok(()) => {
            *conflicts = 0;
            return Ok(true);
        }
        Err(err) => err,
    };
    if err.downcast_ref::<StaleTask>().is_none() {
        return Err(err);
    }
    *conflicts += 1;
    warn!(task_id = %task.id, conflicts = *conflicts, err = %err, "stale save, reloading");
    if *conflicts > max_conflicts {
        return Err(err.context(format!(
            "giving up after {} consecutive conflicting saves",
            *conflicts
        )));
    }
    Ok(false)
}

fn commit_completed<C: Committer>(committer: &C, task: &Task) {
    let message = commit_message(&task.id, &task.description);
    match committer.commit(&message, &task.assignee) {
        Ok(true) => info!(task_id = %task.id, "committed"),
        Ok(false) => debug!(task_id = %task.id, "nothing to commit"),
        Err(err) => warn!(task_id = %task.id, err = %format!("{err:#}"), "commit failed"),
    }
}
