//! Versioned block keys and the key export exchanged between master and slaves.

use crate::error::Error;
use crate::identifier::{decode_exact, wire_config};
use bincode::{Decode, Encode};
use rand_core::{OsRng, TryRngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a generated block key secret (the HMAC-SHA256 block size).
pub const SECRET_LEN: usize = 64;

/// Symmetric key bytes, wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Encode, Decode, Serialize, Deserialize)]
pub struct SecretBytes(#[serde(with = "serde_bytes")] Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        SecretBytes(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

/// One versioned signing key with an absolute expiry (epoch millis).
///
/// 带编号和绝对过期时间（毫秒）的签名密钥。
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct BlockKey {
    key_id: u32,
    expiry_date: i64,
    secret: SecretBytes,
}

impl BlockKey {
    pub fn new(key_id: u32, expiry_date: i64, secret: SecretBytes) -> Self {
        Self {
            key_id,
            expiry_date,
            secret,
        }
    }

    /// Generates a key with fresh secret bytes from the OS RNG.
    pub fn generate(key_id: u32, expiry_date: i64) -> Result<Self, Error> {
        let mut bytes = vec![0u8; SECRET_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| Error::Rotation(format!("OS random number generator failed: {e}")))?;
        Ok(Self::new(key_id, expiry_date, SecretBytes(bytes)))
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn expiry_date(&self) -> i64 {
        self.expiry_date
    }

    pub fn secret(&self) -> &SecretBytes {
        &self.secret
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis > self.expiry_date
    }

    /// The same key with its expiry moved to `expiry_date`.
    pub(crate) fn with_expiry(&self, expiry_date: i64) -> Self {
        Self {
            expiry_date,
            ..self.clone()
        }
    }
}

/// A complete snapshot of a manager's key window, as shipped from a master
/// to its slaves.
///
/// 主节点导出、从节点导入的完整密钥窗口快照。
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct ExportedBlockKeys {
    pub key_update_interval_ms: u64,
    pub token_lifetime_ms: u64,
    pub current_key: BlockKey,
    /// Retired keys still accepted for verification, newest first.
    pub all_keys: Vec<BlockKey>,
}

impl ExportedBlockKeys {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(bincode::encode_to_vec(self, wire_config())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        decode_exact(bytes, "exported block keys").map_err(|e| match e {
            Error::MalformedToken(reason) => Error::MalformedKeys(reason),
            other => other,
        })
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// 快照中的密钥编号，当前密钥在前
    pub fn key_ids(&self) -> Vec<u32> {
        std::iter::once(self.current_key.key_id())
            .chain(self.all_keys.iter().map(BlockKey::key_id))
            .collect()
    }
}
