use core::cmp::max;

use plover_protocol as protocol;
use protocol::{ActorId, ChangeHash, Patch, RootDiff};
use tracing::instrument;

use crate::{
    actor_map::ActorMap,
    change,
    change::Change,
    change_graph::ChangeGraph,
    decoding,
    error::BackendError,
    op_set::OpSet,
    patches::{generate_from_scratch_diff, IncrementalPatch},
};

/// A document backend: the columnar op store, the actor table, the causal
/// change graph and the high-water op counter. Cloning produces an
/// independent document; the column buffers and stored change bytes are
/// shared, everything a mutation touches is replaced rather than written
/// through.
#[derive(Debug, Clone)]
pub struct Backend {
    op_set: OpSet,
    actors: ActorMap,
    graph: ChangeGraph,
    max_op: u64,
}

impl Backend {
    /// An empty document, holding only the root map.
    pub fn init() -> Backend {
        Backend {
            op_set: OpSet::init(),
            actors: ActorMap::new(),
            graph: ChangeGraph::new(),
            max_op: 0,
        }
    }

    pub fn new() -> Backend {
        Self::init()
    }

    pub fn apply_changes(&mut self, changes: Vec<Change>) -> Result<Patch, BackendError> {
        self.apply(changes, None)
    }

    #[instrument(level = "debug", skip(self, changes))]
    fn apply(
        &mut self,
        changes: Vec<Change>,
        actor_seq: Option<(ActorId, u64)>,
    ) -> Result<Patch, BackendError> {
        // the merge works against scratch copies; the backend's own state
        // is replaced only once the whole batch has succeeded
        let mut op_set = self.op_set.clone();
        let mut actors = self.actors.clone();
        let mut patch = IncrementalPatch::new();
        let mut applied: Vec<Change> = Vec::new();

        for change in changes {
            if self.graph.contains(&change.hash) || applied.iter().any(|c| c.hash == change.hash)
            {
                // an already known change is a no-op, not an error
                continue;
            }
            let actor = change.actor_id().clone();
            let expected = self.graph.seq_for(&actor)
                + applied.iter().filter(|c| *c.actor_id() == actor).count() as u64
                + 1;
            if change.seq != expected {
                return Err(BackendError::BadSequence {
                    actor,
                    expected,
                    got: change.seq,
                });
            }
            for dep in &change.deps {
                if !self.graph.contains(dep) && !applied.iter().any(|c| c.hash == *dep) {
                    return Err(BackendError::MissingDependency(*dep));
                }
            }
            patch.begin_change();
            op_set.apply_change(&change, &mut actors, &mut patch)?;
            applied.push(change);
        }

        let diffs = patch.finalize(&op_set, &actors)?;

        let mut max_op = self.max_op;
        for c in &applied {
            max_op = max(max_op, c.max_op());
        }
        for c in applied {
            self.graph.add_change(c);
        }
        self.op_set = op_set;
        self.actors = actors;
        self.max_op = max_op;

        self.make_patch(diffs, actor_seq)
    }

    fn make_patch(
        &self,
        diffs: RootDiff,
        actor_seq: Option<(ActorId, u64)>,
    ) -> Result<Patch, BackendError> {
        let mut deps: Vec<_> = if let Some((ref actor, ref seq)) = actor_seq {
            let last_hash = self.graph.get_hash(actor, *seq)?;
            self.graph
                .get_heads()
                .into_iter()
                .filter(|dep| dep != &last_hash)
                .collect()
        } else {
            self.graph.get_heads()
        };
        deps.sort_unstable();
        Ok(Patch {
            diffs,
            deps,
            max_op: self.max_op,
            clock: self.graph.clock(),
            actor: actor_seq.clone().map(|(actor, _)| actor),
            seq: actor_seq.map(|(_, seq)| seq),
            pending_changes: 0,
        })
    }

    /// Encode and apply a change produced by the local frontend. The patch
    /// carries the (actor, seq) of the request so the frontend can match
    /// it up, and the change's deps are completed with the actor's own
    /// previous change.
    pub fn apply_local_change(
        &mut self,
        mut change: protocol::Change,
    ) -> Result<(Patch, Change), BackendError> {
        self.check_for_duplicate(&change)?; // Change has already been applied

        let actor_seq = (change.actor_id.clone(), change.seq);

        if change.seq > 1 {
            let last_hash = self.graph.get_hash(&change.actor_id, change.seq - 1)?;
            if !change.deps.contains(&last_hash) {
                change.deps.push(last_hash);
            }
        }

        let bin_change: Change = change.into();
        let patch = self.apply(vec![bin_change.clone()], Some(actor_seq))?;

        Ok((patch, bin_change))
    }

    fn check_for_duplicate(&self, change: &protocol::Change) -> Result<(), BackendError> {
        if self.graph.seq_for(&change.actor_id) >= change.seq {
            return Err(BackendError::DuplicateChange(format!(
                "Change request has already been applied {}:{}",
                change.actor_id.to_hex_string(),
                change.seq
            )));
        }
        Ok(())
    }

    /// Synthesize a patch as if the entire document were being sent to a
    /// fresh frontend.
    pub fn get_patch(&self) -> Result<Patch, BackendError> {
        let diffs = generate_from_scratch_diff(&self.op_set, &self.actors)?;
        self.make_patch(diffs, None)
    }

    pub fn get_heads(&self) -> Vec<ChangeHash> {
        self.graph.get_heads()
    }

    /// Get the list of changes that are not transitive dependencies of
    /// `have_deps`.
    ///
    /// `have_deps` represents the heads of a graph and this function
    /// computes the changes that exist in our graph but not in one with
    /// heads `have_deps`.
    pub fn get_changes(&self, have_deps: &[ChangeHash]) -> Vec<&Change> {
        self.graph.get_changes(have_deps)
    }

    /// Returns all changes that are present in `self` but not present in
    /// `other`.
    pub fn get_changes_added<'a>(&'a self, other: &Backend) -> Vec<&'a Change> {
        self.graph.get_changes_added(&other.graph)
    }

    pub fn get_change_by_hash(&self, hash: &ChangeHash) -> Option<&Change> {
        self.graph.get_change_by_hash(hash)
    }

    pub fn get_changes_for_actor_id(&self, actor_id: &ActorId) -> Vec<&Change> {
        self.graph.get_changes_for_actor_id(actor_id)
    }

    /// Always empty: a change whose dependencies are not yet present is
    /// rejected with `MissingDependency` rather than queued.
    pub fn get_missing_deps(&self) -> Vec<ChangeHash> {
        Vec::new()
    }

    pub fn save(&self) -> Result<Vec<u8>, BackendError> {
        let heads = self.graph.get_heads();
        let (data, ranges) = self.op_set.columns();
        let changes: Vec<&Change> = self.graph.canonical_history();
        Ok(change::encode_document(
            self.actors.actors(),
            &heads,
            data,
            ranges,
            &changes,
        )?)
    }

    // allow this for API reasons
    #[allow(clippy::needless_pass_by_value)]
    #[instrument(level = "debug", skip(data))]
    pub fn load(data: Vec<u8>) -> Result<Backend, BackendError> {
        let contents = change::decode_document(&data)?;

        let mut actors = ActorMap::new();
        for a in &contents.actors {
            actors.import(a);
        }
        if actors.actors() != &contents.actors[..] {
            return Err(BackendError::DecodingError(
                decoding::Error::ActorsNotInAscendingOrder,
            ));
        }

        let op_set = OpSet::from_document(contents.ops_data, contents.ops_ranges, actors.actors())?;

        let mut graph = ChangeGraph::new();
        let mut max_op = 0;
        for change in contents.changes {
            let actor = change.actor_id().clone();
            let expected = graph.seq_for(&actor) + 1;
            if change.seq != expected {
                return Err(BackendError::BadSequence {
                    actor,
                    expected,
                    got: change.seq,
                });
            }
            for dep in &change.deps {
                if !graph.contains(dep) {
                    return Err(BackendError::MissingDependency(*dep));
                }
            }
            max_op = max(max_op, change.max_op());
            graph.add_change(change);
        }

        Ok(Backend {
            op_set,
            actors,
            graph,
            max_op,
        })
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::init()
    }
}
