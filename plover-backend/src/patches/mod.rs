mod edits;
mod from_scratch_diff;
mod incremental_diff;

pub(crate) use edits::Edits;
pub(crate) use from_scratch_diff::generate_from_scratch_diff;
pub(crate) use incremental_diff::IncrementalPatch;
