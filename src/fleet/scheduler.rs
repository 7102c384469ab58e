//! Conflict-aware wave scheduling
//!
//! Tasks that touch the same scope or the same file must not run at the same
//! time. `build_waves` colours the conflict graph greedily (most-contested
//! task first) and returns the colour classes in creation order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::presence::PeerRecord;
use crate::models::Task;

/// Task ids that may execute in parallel
pub type Wave = Vec<String>;

/// A task placed on a workstation for a given wave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchAssignment {
    pub task_id: String,
    pub wave: usize,
    pub assigned_to: String,
}

/// Case-insensitive, forward-slash form of a file path
pub fn normalize_file_path(path: &str) -> String {
    path.trim().replace('\\', "/").to_lowercase()
}

/// Undirected conflict graph over task indices
#[derive(Debug, Default)]
pub struct ConflictGraph {
    ids: Vec<String>,
    edges: Vec<BTreeSet<usize>>,
}

impl ConflictGraph {
    pub fn build(tasks: &[Task]) -> Self {
        let mut ids: Vec<String> = Vec::with_capacity(tasks.len());
        let mut index_of: HashMap<String, usize> = HashMap::new();
        let mut by_scope: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_path: HashMap<String, Vec<usize>> = HashMap::new();

        for task in tasks {
            let id = task.id.trim().to_string();
            if index_of.contains_key(&id) {
                continue;
            }
            let idx = ids.len();
            index_of.insert(id.clone(), idx);
            ids.push(id);

            if let Some(scope) = task.effective_scope() {
                by_scope.entry(scope).or_default().push(idx);
            }
            let mut seen_paths = BTreeSet::new();
            for path in &task.file_paths {
                let normalized = normalize_file_path(path);
                if !normalized.is_empty() && seen_paths.insert(normalized.clone()) {
                    by_path.entry(normalized).or_default().push(idx);
                }
            }
        }

        let mut edges = vec![BTreeSet::new(); ids.len()];
        for group in by_scope.values().chain(by_path.values()) {
            if group.len() < 2 {
                continue;
            }
            for (i, &a) in group.iter().enumerate() {
                for &b in &group[i + 1..] {
                    if a != b {
                        edges[a].insert(b);
                        edges[b].insert(a);
                    }
                }
            }
        }

        Self { ids, edges }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn degree(&self, idx: usize) -> usize {
        self.edges[idx].len()
    }

    pub fn conflicts(&self, a: usize, b: usize) -> bool {
        self.edges[a].contains(&b)
    }

    /// Whether the tasks with these ids share a conflict edge
    pub fn conflicts_by_id(&self, a: &str, b: &str) -> bool {
        let find = |id: &str| self.ids.iter().position(|x| x == id);
        match (find(a), find(b)) {
            (Some(a), Some(b)) => self.conflicts(a, b),
            _ => false,
        }
    }
}

/// Partition tasks into ordered waves with no conflicts inside a wave
pub fn build_waves(tasks: &[Task]) -> Vec<Wave> {
    let graph = ConflictGraph::build(tasks);
    if graph.is_empty() {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..graph.len()).collect();
    // sort_by is stable, so equal degrees keep input order
    order.sort_by(|&a, &b| graph.degree(b).cmp(&graph.degree(a)));

    let mut waves: Vec<Vec<usize>> = Vec::new();
    for idx in order {
        let slot = waves
            .iter()
            .position(|wave| wave.iter().all(|&member| !graph.conflicts(idx, member)));
        match slot {
            Some(w) => waves[w].push(idx),
            None => waves.push(vec![idx]),
        }
    }

    waves
        .into_iter()
        .map(|wave| wave.into_iter().map(|idx| graph.ids[idx].clone()).collect())
        .collect()
}

/// Assign each wave's tasks to workstations.
///
/// Round-robin over `peers` within a wave, except that a task whose scope
/// appears in a peer's advertised capabilities goes to that peer.
pub fn assign_to_workstations(
    waves: &[Wave],
    peers: &[PeerRecord],
    task_lookup: &HashMap<String, Task>,
) -> Vec<DispatchAssignment> {
    if peers.is_empty() {
        return Vec::new();
    }

    let mut assignments = Vec::new();
    for (wave_idx, wave) in waves.iter().enumerate() {
        for (i, task_id) in wave.iter().enumerate() {
            let default_peer = &peers[i % peers.len()];

            let preferred = task_lookup
                .get(task_id)
                .and_then(|task| task.effective_scope())
                .and_then(|scope| {
                    peers.iter().find(|peer| {
                        peer.capabilities
                            .iter()
                            .any(|cap| cap.to_lowercase().contains(&scope))
                    })
                });

            assignments.push(DispatchAssignment {
                task_id: task_id.clone(),
                wave: wave_idx,
                assigned_to: preferred.unwrap_or(default_peer).instance_id.clone(),
            });
        }
    }

    assignments
}
