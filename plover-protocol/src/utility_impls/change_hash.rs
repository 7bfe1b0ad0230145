use core::fmt;
use std::{convert::TryFrom, str::FromStr};

use crate::{
    error::{InvalidChangeHash, InvalidChangeHashSlice},
    ChangeHash,
};

impl fmt::Debug for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChangeHash").field(&hex::encode(&self.0)).finish()
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl FromStr for ChangeHash {
    type Err = InvalidChangeHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InvalidChangeHash(s.into()))?;
        ChangeHash::try_from(&bytes[..]).map_err(|_| InvalidChangeHash(s.into()))
    }
}

impl TryFrom<&[u8]> for ChangeHash {
    type Error = InvalidChangeHashSlice;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != 32 {
            Err(InvalidChangeHashSlice(bytes.to_vec()))
        } else {
            let mut array = [0; 32];
            array.copy_from_slice(bytes);
            Ok(ChangeHash(array))
        }
    }
}
