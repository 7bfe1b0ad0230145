use plover_protocol::ActorId;

/// The document-local actor table. It is kept sorted lexicographically at
/// all times so that the actor indices stored in the columns are the same
/// on every replica that has seen the same set of changes. Introducing an
/// actor in the middle of the order therefore requires the stored columns
/// to be rewritten, which `OpSet::rebuild_columns` takes care of.
#[derive(PartialEq, Debug, Clone, Default)]
pub(crate) struct ActorMap(Vec<ActorId>);

impl ActorMap {
    pub fn new() -> ActorMap {
        ActorMap(Vec::new())
    }

    pub fn actors(&self) -> &[ActorId] {
        &self.0
    }

    /// Add an actor to the table if it is not already present. Returns true
    /// if the actor landed anywhere other than the end of the table, which
    /// invalidates indices already stored in the columns.
    pub fn import(&mut self, actor: &ActorId) -> bool {
        match self.0.binary_search(actor) {
            Ok(_) => false,
            Err(idx) => {
                let shifted = idx != self.0.len();
                self.0.insert(idx, actor.clone());
                shifted
            }
        }
    }

    pub fn to_vec(&self) -> Vec<ActorId> {
        self.0.clone()
    }
}
