use plover_protocol as protocol;
use thiserror::Error;

use crate::{decoding, encoding};

/// The error taxonomy of the engine. Every variant aborts the current
/// `apply_changes` call without mutating the document: merge output is
/// written to fresh buffers and only swapped in on success, so a failed
/// call may simply be retried once the cause is addressed.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Missing object: {0}")]
    MissingObject(protocol::ObjectId),
    #[error("Missing dependency: {0}")]
    MissingDependency(protocol::ChangeHash),
    #[error("Bad sequence number for actor {actor}: expected {expected}, got {got}")]
    BadSequence {
        actor: protocol::ActorId,
        expected: u64,
        got: u64,
    },
    #[error("Duplicate change {0}")]
    DuplicateChange(String),
    #[error("Reference element {elem} not found in {object}")]
    ReferenceNotFound {
        object: protocol::ObjectId,
        elem: protocol::ElementId,
    },
    #[error("Out of order list access in {object}")]
    OutOfOrderListAccess { object: protocol::ObjectId },
    #[error("Duplicate operation id: {0}")]
    DuplicateOperationId(protocol::OpId),
    #[error("Operation has a pred {0} which matches no operation")]
    UnmatchedPred(protocol::OpId),
    #[error("Leftover rows in a column after merging")]
    ExcessOps,
    #[error("Encoding error {0}")]
    EncodingError(#[from] encoding::Error),
    #[error("Decoding error {0}")]
    DecodingError(#[from] decoding::Error),
}
