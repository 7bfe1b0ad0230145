#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

mod actor_map;
mod backend;
mod change;
mod change_graph;
mod columnar;
mod decoding;
mod encoding;
mod error;
mod object_store;
mod op_sequence;
mod op_set;
mod patches;

pub use backend::Backend;
pub use change::Change;
pub use decoding::Error as DecodingError;
pub use encoding::Error as EncodingError;
pub use error::BackendError;
