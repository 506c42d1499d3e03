//! Explain why pending tasks cannot run.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::resolver::status_index;
use crate::task::{Task, TaskStatus};

/// Why a schedule with pending tasks has nothing eligible.
///
/// Every list is sorted so reports are stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StuckDiagnosis {
    /// Pending task ids still waiting on something.
    pub pending: Vec<String>,
    /// Dependency cycles among pending tasks, each rotated to start at its smallest id.
    /// Membership in any of these makes a task permanently ineligible.
    pub cycles: Vec<Vec<String>>,
    /// `(task, dependency)` pairs whose dependency does not exist.
    pub missing: Vec<(String, String)>,
    /// `(task, dependency, status)` where the dependency exists but will not complete on its own.
    pub waiting: Vec<(String, String, TaskStatus)>,
}

impl StuckDiagnosis {
    /// One-line-per-finding rendering for logs and CLI output.
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for cycle in &self.cycles {
            let mut ring = cycle.clone();
            if let Some(first) = cycle.first() {
                ring.push(first.clone());
            }
            lines.push(format!("dependency cycle: {}", ring.join(" -> ")));
        }
        for (task, dep) in &self.missing {
            lines.push(format!("{task}: depends on unknown task {dep}"));
        }
        for (task, dep, status) in &self.waiting {
            lines.push(format!("{task}: depends on {dep} which is {status}"));
        }
        if lines.is_empty() && !self.pending.is_empty() {
            lines.push(format!(
                "pending tasks with no eligible candidate: {}",
                self.pending.join(", ")
            ));
        }
        lines
    }
}

/// Diagnose a task set where [`crate::core::resolver::next_task`] returned `None`
/// but pending tasks remain.
pub fn diagnose_stuck(tasks: &[Task]) -> StuckDiagnosis {
    let statuses = status_index(tasks);
    let mut diagnosis = StuckDiagnosis::default();

    let mut pending: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .collect();
    pending.sort_by(|a, b| a.id.cmp(&b.id));

    for task in &pending {
        diagnosis.pending.push(task.id.clone());
        for dep in &task.depends_on {
            match statuses.get(dep.as_str()) {
                None => diagnosis.missing.push((task.id.clone(), dep.clone())),
                Some(TaskStatus::Completed | TaskStatus::Pending) => {}
                Some(status) => {
                    diagnosis
                        .waiting
                        .push((task.id.clone(), dep.clone(), *status));
                }
            }
        }
    }

    diagnosis.cycles = find_cycles(&pending);
    diagnosis
}

/// Cycles among pending tasks, one per strongly connected group.
///
/// Each cycle starts at the group's smallest id and follows the shortest
/// dependency path back to it. A task naming itself is a cycle of length one.
fn find_cycles(pending: &[&Task]) -> Vec<Vec<String>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let index: HashMap<&str, NodeIndex> = pending
        .iter()
        .map(|task| (task.id.as_str(), graph.add_node(task.id.as_str())))
        .collect();
    for task in pending {
        let Some(&from) = index.get(task.id.as_str()) else {
            continue;
        };
        for dep in &task.depends_on {
            if let Some(&to) = index.get(dep.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let mut cycles: Vec<Vec<String>> = kosaraju_scc(&graph)
        .into_iter()
        .filter(|scc| match scc.as_slice() {
            [] => false,
            [node] => graph.contains_edge(*node, *node),
            _ => true,
        })
        .map(|scc| cycle_through_smallest(&graph, &scc))
        .filter(|cycle| !cycle.is_empty())
        .collect();
    cycles.sort();
    cycles
}

/// Breadth-first search inside one component from its smallest id back to itself.
fn cycle_through_smallest(graph: &DiGraph<&str, ()>, scc: &[NodeIndex]) -> Vec<String> {
    let members: HashSet<NodeIndex> = scc.iter().copied().collect();
    let Some(&start) = scc.iter().min_by_key(|node| graph[**node]) else {
        return Vec::new();
    };

    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        let mut next: Vec<NodeIndex> = graph
            .neighbors(node)
            .filter(|succ| members.contains(succ))
            .collect();
        next.sort_by_key(|succ| graph[*succ]);
        for succ in next {
            if succ == start {
                let mut ring = vec![node];
                let mut current = node;
                while let Some(&prev) = parent.get(&current) {
                    ring.push(prev);
                    current = prev;
                }
                ring.reverse();
                return ring.into_iter().map(|n| graph[n].to_string()).collect();
            }
            if !parent.contains_key(&succ) {
                parent.insert(succ, node);
                queue.push_back(succ);
            }
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_with_deps};

    #[test]
    fn reports_two_task_cycle_once() {
        let tasks = vec![task_with_deps("b", 1, &["a"]), task_with_deps("a", 1, &["b"])];
        let diagnosis = diagnose_stuck(&tasks);
        assert_eq!(
            diagnosis.cycles,
            vec![vec!["a".to_string(), "b".to_string()]]
        );
        assert_eq!(diagnosis.pending, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn reports_self_dependency_as_cycle() {
        let tasks = vec![task_with_deps("a", 1, &["a"])];
        let diagnosis = diagnose_stuck(&tasks);
        assert_eq!(diagnosis.cycles, vec![vec!["a".to_string()]]);
    }

    #[test]
    fn reports_missing_and_waiting_dependencies() {
        let mut failed = task("f", 1);
        failed.status = TaskStatus::Failed;
        let tasks = vec![
            failed,
            task_with_deps("x", 1, &["ghost"]),
            task_with_deps("y", 1, &["f"]),
        ];
        let diagnosis = diagnose_stuck(&tasks);
        assert!(diagnosis.cycles.is_empty());
        assert_eq!(
            diagnosis.missing,
            vec![("x".to_string(), "ghost".to_string())]
        );
        assert_eq!(
            diagnosis.waiting,
            vec![("y".to_string(), "f".to_string(), TaskStatus::Failed)]
        );
    }

    #[test]
    fn downstream_of_cycle_is_not_itself_a_cycle() {
        let tasks = vec![
            task_with_deps("a", 1, &["c"]),
            task_with_deps("b", 1, &["a"]),
            task_with_deps("c", 1, &["b"]),
            task_with_deps("d", 1, &["a"]),
        ];
        let diagnosis = diagnose_stuck(&tasks);
        assert_eq!(
            diagnosis.cycles,
            vec![vec!["a".to_string(), "c".to_string(), "b".to_string()]]
        );
    }

    #[test]
    fn separate_cycles_are_reported_separately() {
        let tasks = vec![
            task_with_deps("a", 1, &["b"]),
            task_with_deps("b", 1, &["a"]),
            task_with_deps("m", 1, &["n"]),
            task_with_deps("n", 1, &["o"]),
            task_with_deps("o", 1, &["m", "n"]),
        ];
        let diagnosis = diagnose_stuck(&tasks);
        assert_eq!(
            diagnosis.cycles,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["m".to_string(), "n".to_string(), "o".to_string()],
            ]
        );
    }

    #[test]
    fn long_stuck_chain_is_diagnosed() {
        let mut tasks: Vec<Task> = (0..5_000)
            .map(|i| task_with_deps(&format!("t{i:05}"), 1, &[format!("t{:05}", i + 1).as_str()]))
            .collect();
        tasks.push(task_with_deps("t05000", 1, &["t00000"]));
        let diagnosis = diagnose_stuck(&tasks);
        assert_eq!(diagnosis.pending.len(), 5_001);
        assert_eq!(diagnosis.cycles.len(), 1);
        assert_eq!(diagnosis.cycles[0].len(), 5_001);
        assert_eq!(diagnosis.cycles[0][0], "t00000");
    }

    #[test]
    fn render_closes_the_cycle() {
        let tasks = vec![task_with_deps("b", 1, &["a"]), task_with_deps("a", 1, &["b"])];
        let lines = diagnose_stuck(&tasks).render();
        assert_eq!(lines, vec!["dependency cycle: a -> b -> a".to_string()]);
    }
}
