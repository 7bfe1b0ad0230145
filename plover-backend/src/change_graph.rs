use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
    sync::Arc,
};

use fxhash::FxBuildHasher;
use plover_protocol as protocol;
use protocol::{ActorId, ChangeHash};

use crate::{change::Change, error::BackendError};

/// The causal change graph: every applied change keyed by hash, the
/// dependency and dependent indices over those hashes, the per-actor
/// sequence of contributions, and the current heads.
///
/// `history` is in application order, which is a topological order of the
/// graph because a change is only ever applied after its dependencies.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeGraph {
    history: Vec<Arc<Change>>,
    history_index: HashMap<ChangeHash, usize>,
    states: HashMap<ActorId, Vec<usize>, FxBuildHasher>,
    dependents: HashMap<ChangeHash, Vec<ChangeHash>>,
    heads: HashSet<ChangeHash>,
}

impl ChangeGraph {
    pub fn new() -> ChangeGraph {
        ChangeGraph::default()
    }

    pub fn contains(&self, hash: &ChangeHash) -> bool {
        self.history_index.contains_key(hash)
    }

    pub fn get_change_by_hash(&self, hash: &ChangeHash) -> Option<&Change> {
        self.history_index
            .get(hash)
            .and_then(|index| self.history.get(*index))
            .map(|c| c.as_ref())
    }

    pub fn history(&self) -> impl Iterator<Item = &Change> {
        self.history.iter().map(|c| c.as_ref())
    }

    /// The number of changes this actor has contributed; also its maximum
    /// seq value.
    pub fn seq_for(&self, actor: &ActorId) -> u64 {
        self.states.get(actor).map_or(0, |v| v.len() as u64)
    }

    pub fn clock(&self) -> HashMap<ActorId, u64> {
        self.states
            .iter()
            .map(|(k, v)| (k.clone(), v.len() as u64))
            .collect()
    }

    pub fn get_hash(&self, actor: &ActorId, seq: u64) -> Result<ChangeHash, BackendError> {
        self.states
            .get(actor)
            .and_then(|v| v.get(seq as usize - 1))
            .and_then(|&i| self.history.get(i))
            .map(|c| c.hash)
            .ok_or(BackendError::BadSequence {
                actor: actor.clone(),
                expected: self.seq_for(actor),
                got: seq,
            })
    }

    pub fn get_changes_for_actor_id(&self, actor: &ActorId) -> Vec<&Change> {
        self.states
            .get(actor)
            .map(|vec| {
                vec.iter()
                    .filter_map(|&i| self.history.get(i))
                    .map(|c| c.as_ref())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The current tips of the graph, in sorted order.
    pub fn get_heads(&self) -> Vec<ChangeHash> {
        let mut heads: Vec<_> = self.heads.iter().copied().collect();
        heads.sort_unstable();
        heads
    }

    pub fn add_change(&mut self, change: Change) {
        let hash = change.hash;
        if self.history_index.contains_key(&hash) {
            return;
        }
        let history_index = self.history.len();
        self.states
            .entry(change.actor_id().clone())
            .or_default()
            .push(history_index);
        for dep in &change.deps {
            self.dependents.entry(*dep).or_default().push(hash);
            self.heads.remove(dep);
        }
        self.heads.insert(hash);
        self.history_index.insert(hash, history_index);
        self.history.push(Arc::new(change));
    }

    /// Every applied change in a canonical topological order: dependencies
    /// first, ties broken by ascending hash. Replicas that have applied
    /// the same set of changes produce the same order regardless of how
    /// the changes arrived, which keeps the saved document byte-identical
    /// across them.
    pub fn canonical_history(&self) -> Vec<&Change> {
        let mut in_deg: HashMap<ChangeHash, usize> = self
            .history
            .iter()
            .map(|c| (c.hash, c.deps.len()))
            .collect();
        let mut ready: BinaryHeap<Reverse<ChangeHash>> = in_deg
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(hash, _)| Reverse(*hash))
            .collect();
        let mut out = Vec::with_capacity(self.history.len());
        while let Some(Reverse(hash)) = ready.pop() {
            if let Some(change) = self.get_change_by_hash(&hash) {
                out.push(change);
            }
            for dependent in self.dependents.get(&hash).into_iter().flatten() {
                if let Some(deg) = in_deg.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse(*dependent));
                    }
                }
            }
        }
        out
    }

    /// Get the list of changes that are not transitive dependencies of
    /// `have_deps`, in a topologically consistent order.
    pub fn get_changes(&self, have_deps: &[ChangeHash]) -> Vec<&Change> {
        if let Some(changes) = self.get_changes_fast(have_deps) {
            changes
        } else {
            self.get_changes_slow(have_deps)
        }
    }

    /// The fast path walks forward through the dependents of `have_deps`
    /// in application order. It succeeds when every change it encounters
    /// has all of its dependencies inside the walked set and the walk
    /// reaches every head; concurrent history to the left of `have_deps`
    /// defeats it.
    fn get_changes_fast(&self, have_deps: &[ChangeHash]) -> Option<Vec<&Change>> {
        if have_deps.is_empty() {
            return Some(self.history().collect());
        }

        let lowest_idx = have_deps
            .iter()
            .filter_map(|h| self.history_index.get(h))
            .min()?
            + 1;

        let mut missing_changes = vec![];
        let mut has_seen: HashSet<_> = have_deps.iter().collect();
        for change in &self.history[lowest_idx..] {
            let deps_seen = change.deps.iter().filter(|h| has_seen.contains(h)).count();
            if deps_seen > 0 {
                if deps_seen != change.deps.len() {
                    // a change depends on something we haven't seen, so
                    // this linear scan cannot answer the question
                    return None;
                }
                missing_changes.push(change.as_ref());
                has_seen.insert(&change.hash);
            }
        }

        // if we get to the end and there is a head we haven't seen then
        // the fast path cant work
        if self.get_heads().iter().all(|h| has_seen.contains(h)) {
            Some(missing_changes)
        } else {
            None
        }
    }

    /// The slow path computes the full ancestor set of `have_deps` by
    /// walking the dependency graph, then returns everything outside it.
    fn get_changes_slow(&self, have_deps: &[ChangeHash]) -> Vec<&Change> {
        let mut stack: Vec<_> = have_deps.to_vec();
        let mut ancestors = HashSet::new();
        while let Some(hash) = stack.pop() {
            if ancestors.contains(&hash) {
                continue;
            }
            if let Some(change) = self.get_change_by_hash(&hash) {
                ancestors.insert(hash);
                stack.extend(change.deps.iter().copied());
            }
        }
        self.history()
            .filter(|change| !ancestors.contains(&change.hash))
            .collect()
    }

    /// Returns all changes present in `self` but not in `other`, by a
    /// depth-first descent from our heads that stops at anything the
    /// other side already has.
    pub fn get_changes_added<'a>(&'a self, other: &ChangeGraph) -> Vec<&'a Change> {
        let mut stack: Vec<_> = self.get_heads();
        let mut seen_hashes = HashSet::new();
        let mut added_change_hashes = Vec::new();
        while let Some(hash) = stack.pop() {
            if !seen_hashes.contains(&hash) && other.get_change_by_hash(&hash).is_none() {
                seen_hashes.insert(hash);
                added_change_hashes.push(hash);
                if let Some(change) = self.get_change_by_hash(&hash) {
                    stack.extend(&change.deps);
                }
            }
        }
        // Return those changes in the reverse of the order in which the
        // depth-first search found them. This is not necessarily a
        // topological sort, but should usually be close.
        added_change_hashes.reverse();
        added_change_hashes
            .into_iter()
            .filter_map(|h| self.get_change_by_hash(&h))
            .collect()
    }
}
