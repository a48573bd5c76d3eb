//!
//! # 令牌配置
//!
//! Durations that govern key rotation and token lifetime, plus the slave
//! issuance policy. Values are layered defaults → optional file →
//! `BLOCK_TOKEN_*` environment variables.
//!
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix used by [`TokenConfig::load`].
pub const ENV_PREFIX: &str = "BLOCK_TOKEN";

/// Configuration for a block token secret manager.
///
/// 块令牌密钥管理器的配置。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenConfig {
    /// How often the master generates a new current key.
    pub key_update_interval_ms: u64,
    /// How long an issued token stays valid.
    pub token_lifetime_ms: u64,
    /// Whether a slave may mint tokens with its imported current key.
    pub allow_slave_issuance: bool,
    /// Upper bound on retired keys kept for verification.
    pub max_retained_keys: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            key_update_interval_ms: 10 * 60 * 1000,
            token_lifetime_ms: 10 * 60 * 1000,
            allow_slave_issuance: true,
            max_retained_keys: 16,
        }
    }
}

impl TokenConfig {
    pub fn new(key_update_interval: Duration, token_lifetime: Duration) -> Self {
        Self {
            key_update_interval_ms: u64::try_from(key_update_interval.as_millis()).unwrap_or(u64::MAX),
            token_lifetime_ms: u64::try_from(token_lifetime.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    pub fn with_slave_issuance(mut self, allow: bool) -> Self {
        self.allow_slave_issuance = allow;
        self
    }

    pub fn with_max_retained_keys(mut self, max: usize) -> Self {
        self.max_retained_keys = max;
        self
    }

    pub fn key_update_interval(&self) -> Duration {
        Duration::from_millis(self.key_update_interval_ms)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_millis(self.token_lifetime_ms)
    }

    /// Loads defaults, then `path` if given, then `BLOCK_TOKEN_*` variables.
    ///
    /// 依次加载默认值、配置文件和 `BLOCK_TOKEN_*` 环境变量。
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_env_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, Error> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix(env_prefix).try_parsing(true));

        let loaded: TokenConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Rejects values the engine cannot run with. A token lifetime that is
    /// not shorter than the key update interval is allowed but logged.
    ///
    /// 校验配置；令牌有效期不短于密钥更新间隔时仅记录警告。
    pub fn validate(&self) -> Result<(), Error> {
        if self.key_update_interval_ms == 0 {
            return Err(Error::Configuration(
                "key_update_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.token_lifetime_ms == 0 {
            return Err(Error::Configuration(
                "token_lifetime_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_retained_keys == 0 {
            return Err(Error::Configuration(
                "max_retained_keys must be greater than zero".to_string(),
            ));
        }
        if i64::try_from(self.key_update_interval_ms).is_err()
            || i64::try_from(self.token_lifetime_ms).is_err()
        {
            return Err(Error::Configuration(
                "durations must fit in a signed 64-bit millisecond count".to_string(),
            ));
        }
        if self.token_lifetime_ms >= self.key_update_interval_ms {
            tracing::warn!(
                token_lifetime_ms = self.token_lifetime_ms,
                key_update_interval_ms = self.key_update_interval_ms,
                "token lifetime is not shorter than the key update interval"
            );
        }
        Ok(())
    }
}
