//! Protocol identifiers and binary signatures.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from [`Signature`] construction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignatureError {
    #[error("signature must not be empty")]
    Empty,

    #[error("signature too long: {len} bytes (max {max})", max = Signature::MAX_LEN)]
    TooLong { len: usize },

    #[error("invalid hex signature: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// The leading byte sequence of a frame that identifies its protocol.
///
/// Signatures are short (1 to [`Signature::MAX_LEN`] bytes), never mutated
/// after creation, and compared as raw byte sequences. Two distinct
/// signatures may share a prefix but never be byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Maximum signature length in bytes.
    pub const MAX_LEN: usize = 8;

    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, SignatureError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(SignatureError::Empty);
        }
        if bytes.len() > Self::MAX_LEN {
            return Err(SignatureError::TooLong { len: bytes.len() });
        }
        Ok(Self(bytes))
    }

    /// Parse an uppercase-or-lowercase hex signature.
    ///
    /// Odd-length input is padded with a leading zero, so `"1AA"` decodes as
    /// `[0x01, 0xAA]`. This matches how signatures written by hand in parser
    /// comments tend to drop the leading nibble.
    pub fn from_hex(s: &str) -> Result<Self, SignatureError> {
        let s = s.trim();
        let padded;
        let s = if s.len() % 2 != 0 {
            padded = format!("0{s}");
            &padded
        } else {
            s
        };
        Self::new(hex::decode(s)?)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Uppercase hex rendering, the canonical form used in the manifest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors from [`ProtocolId`] construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("protocol id must not be empty")]
    Empty,

    #[error("protocol id contains illegal character {0:?}")]
    IllegalChar(char),
}

/// The stable, human-readable identifier of a parser.
///
/// Protocol ids double as file stems in the storage directory, so the
/// alphabet is restricted to `[A-Za-z0-9._-]`. Cloning is cheap (shared
/// allocation); ids are compared and hashed as plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolId(Arc<str>);

impl ProtocolId {
    pub fn new(id: impl AsRef<str>) -> Result<Self, IdError> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        for ch in id.chars() {
            if !ch.is_ascii_alphanumeric() && !matches!(ch, '.' | '_' | '-') {
                return Err(IdError::IllegalChar(ch));
            }
        }
        Ok(Self(Arc::from(id)))
    }

    /// Derive the automatic id for a freshly discovered signature:
    /// `auto_proto_0x<HEX>`.
    #[must_use]
    pub fn auto(sig: &Signature) -> Self {
        Self(Arc::from(format!("auto_proto_0x{}", sig.to_hex()).as_str()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProtocolId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, IdError> {
        Self::new(&s)
    }
}

impl From<ProtocolId> for String {
    fn from(id: ProtocolId) -> String {
        id.0.to_string()
    }
}
