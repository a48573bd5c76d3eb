//! 块访问令牌标识符
//!
//! The identifier is the signed payload of a block token. Its binary form is
//! produced in exactly one place, [`BlockTokenIdentifier::encode`], and that
//! same byte string is what gets signed and verified.

use crate::error::Error;
use bincode::config::{BigEndian, Configuration, Fixint, Limit};
use bincode::{Decode, Encode};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on any encoded identifier or token; longer length prefixes
/// are rejected before allocation.
pub(crate) const MAX_ENCODED_LEN: usize = 64 * 1024;

pub(crate) type WireConfig = Configuration<BigEndian, Fixint, Limit<MAX_ENCODED_LEN>>;

/// Fixed-width big-endian integers and `u64` length-prefixed strings.
pub(crate) fn wire_config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
        .with_limit::<MAX_ENCODED_LEN>()
}

/// Encodes with [`wire_config`]. bincode applies the limit only when
/// decoding, so an oversized value is refused here instead of producing
/// bytes that can never be decoded again.
///
/// 编码结果超过上限时直接拒绝
pub(crate) fn encode_bounded<T: Encode>(value: &T, what: &str) -> Result<Vec<u8>, Error> {
    let bytes = bincode::encode_to_vec(value, wire_config())?;
    if bytes.len() > MAX_ENCODED_LEN {
        return Err(Error::MalformedToken(format!(
            "encoded {} is {} bytes, over the {} byte limit",
            what,
            bytes.len(),
            MAX_ENCODED_LEN
        )));
    }
    Ok(bytes)
}

/// Decodes a complete value, treating leftover bytes as malformed input.
pub(crate) fn decode_exact<T: Decode<()>>(bytes: &[u8], what: &str) -> Result<T, Error> {
    let (value, read) = bincode::decode_from_slice(bytes, wire_config())?;
    if read != bytes.len() {
        return Err(Error::MalformedToken(format!(
            "{} bytes of trailing data after {}",
            bytes.len() - read,
            what
        )));
    }
    Ok(value)
}

/// The class of operation a token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    Read,
    Write,
    Copy,
    Replace,
}

impl AccessMode {
    pub const ALL: [AccessMode; 4] = [
        AccessMode::Read,
        AccessMode::Write,
        AccessMode::Copy,
        AccessMode::Replace,
    ];

    const fn bit(self) -> u8 {
        match self {
            AccessMode::Read => 1,
            AccessMode::Write => 1 << 1,
            AccessMode::Copy => 1 << 2,
            AccessMode::Replace => 1 << 3,
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessMode::Read => "READ",
            AccessMode::Write => "WRITE",
            AccessMode::Copy => "COPY",
            AccessMode::Replace => "REPLACE",
        };
        f.write_str(name)
    }
}

/// A set of [`AccessMode`]s, encoded as a single bit-set byte.
///
/// 访问模式集合，编码为单字节位集。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub struct AccessModes(u8);

impl AccessModes {
    const VALID_BITS: u8 = 0b1111;

    pub const fn empty() -> Self {
        AccessModes(0)
    }

    pub const fn all() -> Self {
        AccessModes(Self::VALID_BITS)
    }

    pub fn only(mode: AccessMode) -> Self {
        AccessModes(mode.bit())
    }

    /// Builds a set from raw bits, rejecting bits outside the four defined modes.
    pub fn from_bits(bits: u8) -> Result<Self, Error> {
        if bits & !Self::VALID_BITS != 0 {
            return Err(Error::MalformedToken(format!("unknown access mode bits {bits:#010b}")));
        }
        Ok(AccessModes(bits))
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn insert(&mut self, mode: AccessMode) {
        self.0 |= mode.bit();
    }

    pub fn contains(self, mode: AccessMode) -> bool {
        self.0 & mode.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = AccessMode> {
        AccessMode::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl From<AccessMode> for AccessModes {
    fn from(mode: AccessMode) -> Self {
        AccessModes::only(mode)
    }
}

impl FromIterator<AccessMode> for AccessModes {
    fn from_iter<I: IntoIterator<Item = AccessMode>>(iter: I) -> Self {
        let mut modes = AccessModes::empty();
        for mode in iter {
            modes.insert(mode);
        }
        modes
    }
}

impl fmt::Display for AccessModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, mode) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{mode}")?;
        }
        f.write_str("]")
    }
}

/// A block qualified by the pool it lives in. The pool id is empty in
/// single-pool deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExtendedBlock {
    pub pool_id: String,
    pub block_id: i64,
}

impl ExtendedBlock {
    pub fn new(pool_id: impl Into<String>, block_id: i64) -> Self {
        Self {
            pool_id: pool_id.into(),
            block_id,
        }
    }
}

impl fmt::Display for ExtendedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pool_id.is_empty() {
            write!(f, "blk_{}", self.block_id)
        } else {
            write!(f, "{}:blk_{}", self.pool_id, self.block_id)
        }
    }
}

/// The signed payload of a block access token.
///
/// Field order is the wire order: expiry, key id, owner, pool id, block id,
/// access modes.
///
/// 块访问令牌中被签名的内容，字段顺序即编码顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub struct BlockTokenIdentifier {
    expiry_date: i64,
    key_id: u32,
    owner: String,
    block_pool_id: String,
    block_id: i64,
    modes: AccessModes,
}

impl BlockTokenIdentifier {
    pub fn new(
        owner: impl Into<String>,
        block: &ExtendedBlock,
        modes: AccessModes,
        expiry_date: i64,
        key_id: u32,
    ) -> Self {
        Self {
            expiry_date,
            key_id,
            owner: owner.into(),
            block_pool_id: block.pool_id.clone(),
            block_id: block.block_id,
            modes,
        }
    }

    pub fn expiry_date(&self) -> i64 {
        self.expiry_date
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// The principal the token was issued to; empty when issued anonymously.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn block_pool_id(&self) -> &str {
        &self.block_pool_id
    }

    pub fn block_id(&self) -> i64 {
        self.block_id
    }

    pub fn access_modes(&self) -> AccessModes {
        self.modes
    }

    pub fn block(&self) -> ExtendedBlock {
        ExtendedBlock::new(self.block_pool_id.clone(), self.block_id)
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis > self.expiry_date
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        encode_bounded(self, "block token identifier")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let identifier: Self = decode_exact(bytes, "block token identifier")?;
        AccessModes::from_bits(identifier.modes.bits())?;
        Ok(identifier)
    }

    /// Replaces `self` with the identifier decoded from `bytes`, the
    /// counterpart of filling an identifier obtained from
    /// `create_identifier`.
    pub fn read_from(&mut self, bytes: &[u8]) -> Result<(), Error> {
        *self = Self::decode(bytes)?;
        Ok(())
    }
}

impl fmt::Display for BlockTokenIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expiry = DateTime::from_timestamp_millis(self.expiry_date)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| self.expiry_date.to_string());
        write!(
            f,
            "block_token_identifier (expiry={}, key_id={}, owner={}, block_pool_id={}, block_id={}, access_modes={})",
            expiry, self.key_id, self.owner, self.block_pool_id, self.block_id, self.modes
        )
    }
}
