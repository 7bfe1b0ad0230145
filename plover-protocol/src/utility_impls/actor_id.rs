use core::fmt;
use std::{convert::TryFrom, str::FromStr};

use crate::{error::InvalidActorId, ActorId};

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActorId").field(&self.to_hex_string()).finish()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_string())
    }
}

impl FromStr for ActorId {
    type Err = InvalidActorId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s)
            .map(ActorId)
            .map_err(|_| InvalidActorId(s.into()))
    }
}

impl TryFrom<&str> for ActorId {
    type Error = InvalidActorId;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        ActorId::from_str(s)
    }
}

impl From<&[u8]> for ActorId {
    fn from(b: &[u8]) -> Self {
        ActorId(b.to_vec())
    }
}

impl From<Vec<u8>> for ActorId {
    fn from(b: Vec<u8>) -> Self {
        ActorId(b)
    }
}

impl From<uuid::Uuid> for ActorId {
    fn from(u: uuid::Uuid) -> Self {
        ActorId(u.as_bytes().to_vec())
    }
}
