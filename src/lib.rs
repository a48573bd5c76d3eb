//! # Block-Seal: Block Access Tokens
//!
//! `block-seal` issues and verifies short-lived capability tokens that grant
//! a principal a set of access modes on one storage block.
//!
//! A **master** [`BlockTokenSecretManager`] generates and periodically rotates
//! HMAC keys and mints tokens. Its key window is exported and imported by
//! **slave** managers on every node that verifies tokens, so verification
//! never needs to contact the master.
//!
//! ## Core Concepts
//!
//! - **`BlockTokenSecretManager`**: the key window plus issuance and verification.
//! - **`BlockPoolTokenSecretManager`**: one independently keyed manager per block pool.
//! - **`AuthBridge`**: the credential check an RPC server runs before an operation.
//! - **`KeyRotationTask`**: a tokio task that rotates a master's keys and pushes
//!   the export to slaves (feature `async`).
//!
//! ## Quick Start
//!
//! ```rust
//! use block_seal::prelude::*;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Error> {
//!     let config = TokenConfig::new(Duration::from_secs(600), Duration::from_secs(120));
//!     let master = BlockTokenSecretManager::master(&config)?;
//!     let slave = BlockTokenSecretManager::slave(&config)?;
//!     slave.set_keys(&master.export_keys()?)?;
//!
//!     let block = ExtendedBlock::new("", 10);
//!     let token = master.generate_token(&block, AccessModes::only(AccessMode::Write), Some("u1"))?;
//!
//!     slave.check_access(&token, Some("u1"), &block, AccessMode::Write)?;
//!     assert!(slave.check_access(&token, None, &block, AccessMode::Read).is_err());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod identifier;
pub mod key;
pub mod manager;
pub mod pool;
pub mod rotation;
pub mod token;

pub use auth::{AuthBridge, AuthorizedCall, Credential, InboundCall, TokenSelector, TokenVerifier};
pub use error::Error;
pub use manager::{BlockTokenSecretManager, Role};
pub use pool::BlockPoolTokenSecretManager;

// --- Prelude ---
// A collection of the most commonly used traits, structs, and enums.
pub mod prelude {
    pub use crate::auth::{AuthBridge, Credential, InboundCall, TokenVerifier};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::TokenConfig;
    pub use crate::error::Error;
    pub use crate::identifier::{AccessMode, AccessModes, BlockTokenIdentifier, ExtendedBlock};
    pub use crate::key::{BlockKey, ExportedBlockKeys};
    pub use crate::manager::{BlockTokenSecretManager, Role};
    pub use crate::pool::BlockPoolTokenSecretManager;
    pub use crate::token::Token;
}

/// The version of the `block-seal` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
