//! Fixed-width git object ids.

use std::fmt;
use std::str::FromStr;

use crate::error::BrancherError;

/// Width of a SHA-1 object id in bytes.
pub const HASH_LEN: usize = 20;

/// A git object id in its internal fixed-width representation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitHash([u8; HASH_LEN]);

impl CommitHash {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex form, as git prints it.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for CommitHash {
    type Err = BrancherError;

    /// Decodes a hex sha. Non-hex input decodes to zero bytes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s.trim()).unwrap_or_default();
        let bytes: [u8; HASH_LEN] =
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| BrancherError::MalformedHash {
                    value: s.to_string(),
                    decoded_len: decoded.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitHash({})", self.to_hex())
    }
}
