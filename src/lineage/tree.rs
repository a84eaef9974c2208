use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{AppError, Result};

use super::branch::{Branch, BranchId, BranchMutations};

pub const DEFAULT_STRATEGIES: [&str; 2] = ["conservative", "aggressive"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalOrder {
    DepthFirst,
    BreadthFirst,
    /// Cheapest, most confident branches first. Ties keep breadth-first order.
    #[default]
    EntropyAscending,
}

/// Arena of branches. Parent and child links are identities into `nodes`,
/// so removing a branch never leaves a dangling reference.
#[derive(Debug, Clone)]
pub struct ExecutionTree {
    root: BranchId,
    nodes: HashMap<BranchId, Branch>,
}

impl Default for ExecutionTree {
    fn default() -> Self {
        Self::new(Branch::root())
    }
}

impl ExecutionTree {
    pub fn new(mut root: Branch) -> Self {
        root.parent = None;
        root.children.clear();
        let id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(id, root);
        Self { root: id, nodes }
    }

    pub fn root_id(&self) -> BranchId {
        self.root
    }

    pub fn root(&self) -> &Branch {
        &self.nodes[&self.root]
    }

    pub fn get(&self, id: BranchId) -> Option<&Branch> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: BranchId) -> Option<&mut Branch> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: BranchId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn branch(&self, id: BranchId) -> Result<&Branch> {
        self.nodes
            .get(&id)
            .ok_or_else(|| AppError::Lineage(format!("Unknown branch: {id}")))
    }

    /// Fork `parent` into a new child with `mutations` applied on top of the
    /// inherited assumptions, strategy and role.
    pub fn fork(&mut self, parent: BranchId, mutations: BranchMutations) -> Result<BranchId> {
        let child = self.branch(parent)?.spawn_child(mutations);
        let id = child.id;
        self.nodes.insert(id, child);
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.push(id);
        }
        tracing::debug!(parent = %parent, child = %id, "Forked branch");
        Ok(id)
    }

    /// Move a branch to `step` without touching its lineage.
    pub fn reposition(&mut self, id: BranchId, step: &str) -> Result<()> {
        let moved = self.branch(id)?.with_step(step);
        self.nodes.insert(id, moved);
        Ok(())
    }

    /// Fork one child per strategy. Each child is a fresh attempt, so its
    /// execution history and entropy start from zero.
    pub fn diverge(&mut self, id: BranchId, strategies: &[String]) -> Result<Vec<BranchId>> {
        let names: Vec<&str> = if strategies.is_empty() {
            DEFAULT_STRATEGIES.to_vec()
        } else {
            strategies.iter().map(String::as_str).collect()
        };

        let mut children = Vec::with_capacity(names.len());
        for name in names {
            let child = self.fork(id, BranchMutations::strategy(name))?;
            if let Some(branch) = self.nodes.get_mut(&child) {
                branch.reset_execution();
            }
            children.push(child);
        }

        tracing::info!(branch = %id, children = children.len(), "Diverged branch");
        Ok(children)
    }

    /// Keep the lowest-entropy leaf and discard its leaf siblings.
    ///
    /// Ties go to the leaf discovered first in breadth-first order. Returns
    /// the surviving leaf.
    pub fn converge(&mut self) -> Option<BranchId> {
        let mut winner: Option<&Branch> = None;
        for leaf in self.traverse(TraversalOrder::BreadthFirst) {
            if !leaf.is_leaf() {
                continue;
            }
            if winner.map_or(true, |w| leaf.entropy < w.entropy) {
                winner = Some(leaf);
            }
        }
        let winner = winner?;
        let winner_id = winner.id;

        let losers: Vec<BranchId> = winner
            .parent
            .and_then(|p| self.nodes.get(&p))
            .map(|parent| {
                parent
                    .children
                    .iter()
                    .filter(|c| **c != winner_id)
                    .filter(|c| self.nodes.get(*c).is_some_and(Branch::is_leaf))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        for loser in &losers {
            self.remove_subtree(*loser);
        }

        tracing::info!(winner = %winner_id, discarded = losers.len(), "Converged siblings");
        Some(winner_id)
    }

    /// Remove every non-root branch whose entropy exceeds `threshold`,
    /// together with its descendants. Returns the removed identities.
    pub fn prune(&mut self, threshold: f64) -> Vec<BranchId> {
        self.prune_except(threshold, &HashSet::new())
    }

    /// Prune, but never remove `keep` or any of its ancestors.
    pub fn prune_outside(&mut self, threshold: f64, keep: BranchId) -> Vec<BranchId> {
        let lineage: HashSet<BranchId> = self.lineage(keep).into_iter().collect();
        self.prune_except(threshold, &lineage)
    }

    /// `id` followed by its ancestors up to the root.
    pub fn lineage(&self, id: BranchId) -> Vec<BranchId> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(&id);
        while let Some(branch) = current {
            out.push(branch.id);
            current = branch.parent.and_then(|p| self.nodes.get(&p));
        }
        out
    }

    fn prune_except(&mut self, threshold: f64, protected: &HashSet<BranchId>) -> Vec<BranchId> {
        let over: Vec<BranchId> = self
            .traverse(TraversalOrder::BreadthFirst)
            .into_iter()
            .filter(|b| !b.is_root() && b.entropy > threshold && !protected.contains(&b.id))
            .map(|b| b.id)
            .collect();

        let mut removed = Vec::new();
        for id in over {
            if self.contains(id) {
                removed.extend(self.remove_subtree(id));
            }
        }

        if !removed.is_empty() {
            tracing::info!(threshold, removed = removed.len(), "Pruned branches");
        }
        removed
    }

    fn remove_subtree(&mut self, id: BranchId) -> Vec<BranchId> {
        if id == self.root {
            return Vec::new();
        }

        let parent = self.nodes.get(&id).and_then(|b| b.parent);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(branch) = self.nodes.remove(&current) {
                stack.extend(branch.children);
                removed.push(current);
            }
        }
        removed
    }

    pub fn traverse(&self, order: TraversalOrder) -> Vec<&Branch> {
        match order {
            TraversalOrder::DepthFirst => {
                let mut out = Vec::with_capacity(self.nodes.len());
                let mut stack = vec![self.root];
                while let Some(id) = stack.pop() {
                    if let Some(branch) = self.nodes.get(&id) {
                        out.push(branch);
                        stack.extend(branch.children.iter().rev());
                    }
                }
                out
            }
            TraversalOrder::BreadthFirst => {
                let mut out = Vec::with_capacity(self.nodes.len());
                let mut queue = VecDeque::from([self.root]);
                while let Some(id) = queue.pop_front() {
                    if let Some(branch) = self.nodes.get(&id) {
                        out.push(branch);
                        queue.extend(branch.children.iter());
                    }
                }
                out
            }
            TraversalOrder::EntropyAscending => {
                let mut out = self.traverse(TraversalOrder::BreadthFirst);
                out.sort_by(|a, b| a.entropy.total_cmp(&b.entropy));
                out
            }
        }
    }

    pub fn leaves(&self) -> Vec<&Branch> {
        self.traverse(TraversalOrder::BreadthFirst)
            .into_iter()
            .filter(|b| b.is_leaf())
            .collect()
    }

    /// Every non-root branch points at a parent that is still in the arena,
    /// and every child link resolves.
    pub fn is_consistent(&self) -> bool {
        let ids: HashSet<_> = self.nodes.keys().collect();
        self.nodes.values().all(|b| {
            let parent_ok = match b.parent {
                None => b.id == self.root,
                Some(p) => ids.contains(&p),
            };
            parent_ok && b.children.iter().all(|c| ids.contains(c))
        })
    }
}
