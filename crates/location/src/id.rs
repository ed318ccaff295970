//! The `Id` type naming files stored in a backend.

use std::{
    fmt::{self, Display},
    ops::Deref,
    path::Path,
    str::FromStr,
};

use rand::{RngCore, rng};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RusticError, RusticResult};

pub(super) mod constants {
    /// The length of the hash in bytes
    pub(super) const LEN: usize = 32;
    /// The length of the hash in hexadecimal characters
    pub(super) const HEX_LEN: usize = LEN * 2;
}

/// `Id` is the hash id of a file saved in a backend.
#[derive(Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(
    /// The actual hash
    #[serde(serialize_with = "hex::serde::serialize")]
    #[serde(deserialize_with = "hex::serde::deserialize")]
    [u8; constants::LEN],
);

impl FromStr for Id {
    type Err = Box<RusticError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Display for Id {
    /// Format the `Id` as a shortened hexadecimal string
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.to_hex()[0..8];

        write!(f, "{id}")
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &*self.to_hex())
    }
}

impl Id {
    /// Create an `Id` from its raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; constants::LEN]) -> Self {
        Self(bytes)
    }

    /// Parse an `Id` from a hexadecimal string
    ///
    /// # Arguments
    ///
    /// * `s` - The hexadecimal string to parse
    ///
    /// # Errors
    ///
    /// * If the string is empty, not ascii or no valid hexadecimal string of the right length.
    ///
    /// # Examples
    ///
    /// ```
    /// use rustic_location::Id;
    ///
    /// let id = Id::from_hex("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef").unwrap();
    ///
    /// assert_eq!(id.to_hex().as_str(),
    /// "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef");
    /// ```
    pub fn from_hex(s: &str) -> RusticResult<Self> {
        if s.is_empty() || !s.is_ascii() {
            return Err(RusticError::new(
                ErrorKind::InvalidInput,
                "`{id}` is not a valid id: expected {len} ascii hex characters.",
            )
            .attach_context("id", s)
            .attach_context("len", constants::HEX_LEN.to_string()));
        }

        let mut id = Self::default();

        hex::decode_to_slice(s, &mut id.0).map_err(|err| {
            RusticError::with_source(
                ErrorKind::InvalidInput,
                "`{id}` is not a valid hex id.",
                err,
            )
            .attach_context("id", s)
        })?;

        Ok(id)
    }

    /// Generate a random `Id`.
    #[must_use]
    pub fn random() -> Self {
        let mut id = Self::default();
        rng().fill_bytes(&mut id.0);
        id
    }

    /// Convert to [`HexId`].
    #[must_use]
    pub fn to_hex(self) -> HexId {
        let mut hex_id = HexId::EMPTY;

        // `HexId` always has twice the length of `Id`, so encoding cannot fail.
        _ = hex::encode_to_slice(self.0, &mut hex_id.0);

        hex_id
    }

    /// Checks if the [`Id`] is zero
    #[must_use]
    pub fn is_null(&self) -> bool {
        self == &Self::default()
    }
}

/// An `Id` in hexadecimal format
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HexId([u8; constants::HEX_LEN]);

impl From<Id> for HexId {
    fn from(id: Id) -> Self {
        id.to_hex()
    }
}

impl PartialEq<str> for HexId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl HexId {
    /// An empty [`HexId`]
    const EMPTY: Self = Self([b'0'; constants::HEX_LEN]);

    /// Get the string representation of a [`HexId`]
    #[must_use]
    pub fn as_str(&self) -> &str {
        // only ever filled with ascii hex chars
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl Deref for HexId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<Path> for HexId {
    fn as_ref(&self) -> &Path {
        self.as_str().as_ref()
    }
}
