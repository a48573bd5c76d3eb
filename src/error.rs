//! Defines the custom error type for the `block-seal` crate.
//!
//! Rejection variants never carry key material or the contents of other
//! tokens; they name only the values the caller already supplied.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BincodeError {
    #[error("Encode error: {0}")]
    Enc(#[source] Box<bincode::error::EncodeError>),
}

impl From<bincode::error::EncodeError> for BincodeError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BincodeError::Enc(Box::from(err))
    }
}

/// The main error type for the `block-seal` crate.
///
/// `block-seal` 的统一错误类型。
#[derive(Debug, Error)]
pub enum Error {
    #[error("block token expired at {expiry_date} (now {now})")]
    ExpiredToken { expiry_date: i64, now: i64 },

    #[error("block token signature does not match any known key")]
    InvalidSignature,

    #[error("block token is for block {token_block}, not {requested_block}")]
    BlockMismatch {
        token_block: String,
        requested_block: String,
    },

    #[error("block token owner does not match the expected owner {expected}")]
    OwnerMismatch { expected: String },

    #[error("block token does not grant {0} access")]
    AccessDenied(crate::identifier::AccessMode),

    #[error("operation not permitted for a {role} secret manager: {operation}")]
    Role {
        role: crate::manager::Role,
        operation: &'static str,
    },

    #[error("block pool {0} is already registered")]
    DuplicatePool(String),

    #[error("block pool {0} is not registered")]
    UnknownPool(String),

    #[error("malformed block token: {0}")]
    MalformedToken(String),

    #[error("malformed block key export: {0}")]
    MalformedKeys(String),

    #[error("no current block key is available")]
    NoCurrentKey,

    #[error("unsupported credential kind: {0}")]
    UnsupportedCredential(String),

    #[error("key rotation failed: {0}")]
    Rotation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration source error")]
    ConfigSource(#[source] Box<config::ConfigError>),

    #[error("Serialization error (Bincode)")]
    Bincode(#[from] BincodeError),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decoding from Base64 failed: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::ConfigSource(Box::from(err))
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Bincode(err.into())
    }
}

// 解码失败一律视为格式错误的令牌
impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::MalformedToken(err.to_string())
    }
}

impl Error {
    /// Whether this error rejects a presented token (as opposed to a
    /// configuration or lifecycle failure).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::ExpiredToken { .. }
                | Error::InvalidSignature
                | Error::BlockMismatch { .. }
                | Error::OwnerMismatch { .. }
                | Error::AccessDenied(_)
                | Error::MalformedToken(_)
                | Error::UnsupportedCredential(_)
                | Error::UnknownPool(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
