//! 块令牌密钥管理器
//!
//! `BlockTokenSecretManager` owns a rolling window of [`BlockKey`]s and uses it
//! to mint and verify block tokens. A master generates and rotates keys; a
//! slave only imports the master's export. Both roles verify.
//!
//! A master also holds the key that will become current at its next rotation
//! and exports it with the rest of the window. Slaves therefore already know
//! the new current key when the master starts signing with it.
//!
//! The window is published as an immutable snapshot through `ArcSwap`:
//! verification loads one snapshot and never observes a half-rotated window.
//! Writers (`rotate`, `set_keys`) are serialized by a mutex and replace the
//! snapshot with a single store.

use crate::clock::{Clock, SystemClock};
use crate::codec;
use crate::config::TokenConfig;
use crate::error::Error;
use crate::identifier::{AccessMode, AccessModes, BlockTokenIdentifier, ExtendedBlock};
use crate::key::{BlockKey, ExportedBlockKeys};
use crate::token::Token;
use arc_swap::ArcSwap;
use rand_core::{OsRng, TryRngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Which side of the key exchange a manager is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Generates and rotates keys.
    Master,
    /// Imports keys exported by a master.
    Slave,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => f.write_str("master"),
            Role::Slave => f.write_str("slave"),
        }
    }
}

/// One consistent view of the keys and the durations they were made for.
#[derive(Debug, Clone)]
struct KeyWindow {
    current: Option<BlockKey>,
    /// Master only: promoted to `current` by the next rotation.
    next: Option<BlockKey>,
    /// Retired keys, newest first.
    retained: Vec<BlockKey>,
    /// When `current` became current; drives `rotate_if_due`.
    current_since: i64,
    key_update_interval_ms: u64,
    token_lifetime_ms: u64,
}

impl KeyWindow {
    /// Current key first, then the pending next key, then retained keys
    /// newest first, skipping any key that has itself expired.
    fn candidates(&self, now: i64) -> impl Iterator<Item = &BlockKey> {
        self.current
            .iter()
            .chain(self.next.iter())
            .chain(self.retained.iter())
            .filter(move |k| !k.is_expired(now))
    }

    fn find(&self, key_id: u32, now: i64) -> Option<&BlockKey> {
        self.candidates(now).find(|k| k.key_id() == key_id)
    }
}

struct WriterState {
    next_key_id: u32,
}

impl WriterState {
    fn allocate(&mut self) -> Result<u32, Error> {
        let key_id = self.next_key_id;
        self.next_key_id = key_id
            .checked_add(1)
            .ok_or_else(|| Error::Rotation("block key id space exhausted".to_string()))?;
        Ok(key_id)
    }
}

fn after(now: i64, millis: u64) -> i64 {
    now.saturating_add(i64::try_from(millis).unwrap_or(i64::MAX))
}

/// Issues and verifies block access tokens from a rotating key window.
///
/// 基于轮换密钥窗口签发和校验块访问令牌。
pub struct BlockTokenSecretManager {
    role: Role,
    allow_slave_issuance: bool,
    max_retained_keys: usize,
    clock: Arc<dyn Clock>,
    window: ArcSwap<KeyWindow>,
    writer: Mutex<WriterState>,
}

impl BlockTokenSecretManager {
    /// 使用系统时钟的主节点
    pub fn master(config: &TokenConfig) -> Result<Self, Error> {
        Self::new_master(config, Arc::new(SystemClock))
    }

    /// 使用系统时钟的从节点
    pub fn slave(config: &TokenConfig) -> Result<Self, Error> {
        Self::new_slave(config, Arc::new(SystemClock))
    }

    /// Creates a master with freshly generated current and next keys.
    pub fn new_master(config: &TokenConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.validate()?;
        // 起始编号随机，避免与此前运行的主节点重复
        let first_key_id = OsRng
            .try_next_u32()
            .map_err(|e| Error::Rotation(format!("OS random number generator failed: {e}")))?
            % (i32::MAX as u32)
            + 1;
        let now = clock.now_millis();
        let interval = config.key_update_interval_ms;
        let current = BlockKey::generate(
            first_key_id,
            after(after(now, interval), config.token_lifetime_ms),
        )?;
        let next = BlockKey::generate(first_key_id + 1, after(current.expiry_date(), interval))?;
        tracing::debug!(key_id = first_key_id, "generated initial block keys");

        Ok(Self::with_window(
            Role::Master,
            config,
            clock,
            KeyWindow {
                current: Some(current),
                next: Some(next),
                retained: Vec::new(),
                current_since: now,
                key_update_interval_ms: config.key_update_interval_ms,
                token_lifetime_ms: config.token_lifetime_ms,
            },
            first_key_id + 2,
        ))
    }

    /// Creates a slave with an empty key window; it can verify nothing until
    /// the first `set_keys`.
    pub fn new_slave(config: &TokenConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.validate()?;
        let now = clock.now_millis();
        Ok(Self::with_window(
            Role::Slave,
            config,
            clock,
            KeyWindow {
                current: None,
                next: None,
                retained: Vec::new(),
                current_since: now,
                key_update_interval_ms: config.key_update_interval_ms,
                token_lifetime_ms: config.token_lifetime_ms,
            },
            0,
        ))
    }

    fn with_window(
        role: Role,
        config: &TokenConfig,
        clock: Arc<dyn Clock>,
        window: KeyWindow,
        next_key_id: u32,
    ) -> Self {
        Self {
            role,
            allow_slave_issuance: config.allow_slave_issuance,
            max_retained_keys: config.max_retained_keys,
            clock,
            window: ArcSwap::from_pointee(window),
            writer: Mutex::new(WriterState { next_key_id }),
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, WriterState> {
        // 写者状态只有一个计数器，中毒后仍可安全使用
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_master(&self, operation: &'static str) -> Result<(), Error> {
        match self.role {
            Role::Master => Ok(()),
            Role::Slave => Err(Error::Role {
                role: self.role,
                operation,
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn key_update_interval(&self) -> Duration {
        Duration::from_millis(self.window.load().key_update_interval_ms)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_millis(self.window.load().token_lifetime_ms)
    }

    pub fn current_key_id(&self) -> Option<u32> {
        self.window.load().current.as_ref().map(BlockKey::key_id)
    }

    /// An empty identifier to decode a presented token into.
    pub fn create_identifier(&self) -> BlockTokenIdentifier {
        BlockTokenIdentifier::default()
    }

    /// Rotates the key window: the next key becomes current, a fresh next key
    /// is generated, the old current key is retained for verification and
    /// expired retained keys are evicted. Master only.
    ///
    /// 轮换密钥窗口，仅主节点可用。
    pub fn rotate(&self) -> Result<(), Error> {
        self.require_master("rotate")?;
        let mut writer = self.lock_writer();
        self.rotate_locked(&mut writer, self.clock.now_millis())
    }

    /// Rotates only when the key update interval has elapsed since the
    /// current key became current. Returns whether a rotation happened.
    ///
    /// 到期才轮换，返回是否发生了轮换。
    pub fn rotate_if_due(&self) -> Result<bool, Error> {
        self.require_master("rotate")?;
        let mut writer = self.lock_writer();
        let now = self.clock.now_millis();
        let window = self.window.load();
        let due = window.current.is_none()
            || now >= after(window.current_since, window.key_update_interval_ms);
        if !due {
            return Ok(false);
        }
        self.rotate_locked(&mut writer, now)?;
        Ok(true)
    }

    fn rotate_locked(&self, writer: &mut WriterState, now: i64) -> Result<(), Error> {
        let old = self.window.load_full();
        let interval = old.key_update_interval_ms;
        let lifetime = old.token_lifetime_ms;

        let newest = old.next.as_ref().or(old.current.as_ref()).map(BlockKey::key_id);
        if let Some(newest) = newest {
            if writer.next_key_id <= newest {
                return Err(Error::Rotation(format!(
                    "next key id {} does not follow key id {newest}",
                    writer.next_key_id
                )));
            }
        }

        let promoted_expiry = after(after(now, interval), lifetime);
        let promoted = match &old.next {
            Some(next) => next.with_expiry(next.expiry_date().max(promoted_expiry)),
            None => BlockKey::generate(writer.allocate()?, promoted_expiry)?,
        };
        let next = BlockKey::generate(writer.allocate()?, after(promoted_expiry, interval))?;

        let mut retained = Vec::with_capacity(old.retained.len() + 1);
        if let Some(current) = &old.current {
            // 旧主密钥签发的令牌最晚在 now + lifetime 过期
            let expiry = current.expiry_date().max(after(now, lifetime));
            retained.push(current.with_expiry(expiry));
        }
        retained.extend(old.retained.iter().filter(|k| !k.is_expired(now)).cloned());
        let evicted = old.retained.len() + usize::from(old.current.is_some()) - retained.len();
        self.cap_retained(&mut retained);

        let current_key_id = promoted.key_id();
        let next_key_id = next.key_id();
        self.window.store(Arc::new(KeyWindow {
            current: Some(promoted),
            next: Some(next),
            retained,
            current_since: now,
            key_update_interval_ms: interval,
            token_lifetime_ms: lifetime,
        }));

        tracing::debug!(current_key_id, next_key_id, evicted, "rotated block keys");
        Ok(())
    }

    fn cap_retained(&self, retained: &mut Vec<BlockKey>) {
        if retained.len() > self.max_retained_keys {
            tracing::warn!(
                retained = retained.len(),
                max_retained_keys = self.max_retained_keys,
                "dropping unexpired block keys beyond the retained window"
            );
            retained.truncate(self.max_retained_keys);
        }
    }

    /// A complete snapshot of the key window for shipping to slaves.
    pub fn export_keys(&self) -> Result<ExportedBlockKeys, Error> {
        let window = self.window.load();
        let current_key = window.current.clone().ok_or(Error::NoCurrentKey)?;
        Ok(ExportedBlockKeys {
            key_update_interval_ms: window.key_update_interval_ms,
            token_lifetime_ms: window.token_lifetime_ms,
            current_key,
            all_keys: window.next.iter().chain(window.retained.iter()).cloned().collect(),
        })
    }

    /// Replaces the whole key window with `exported`. Slave only; the last
    /// import wins.
    ///
    /// 整体替换密钥窗口，仅从节点可用。
    pub fn set_keys(&self, exported: &ExportedBlockKeys) -> Result<(), Error> {
        if self.role == Role::Master {
            return Err(Error::Role {
                role: self.role,
                operation: "set_keys",
            });
        }
        if exported.key_update_interval_ms == 0 || exported.token_lifetime_ms == 0 {
            return Err(Error::MalformedKeys("zero duration in exported keys".to_string()));
        }

        let _writer = self.lock_writer();
        let now = self.clock.now_millis();
        let current_id = exported.current_key.key_id();
        let mut retained: Vec<BlockKey> = exported
            .all_keys
            .iter()
            .filter(|k| k.key_id() != current_id && !k.is_expired(now))
            .cloned()
            .collect();
        retained.sort_by(|a, b| b.key_id().cmp(&a.key_id()));
        self.cap_retained(&mut retained);

        let imported = retained.len() + 1;
        self.window.store(Arc::new(KeyWindow {
            current: Some(exported.current_key.clone()),
            next: None,
            retained,
            current_since: now,
            key_update_interval_ms: exported.key_update_interval_ms,
            token_lifetime_ms: exported.token_lifetime_ms,
        }));

        tracing::debug!(current_key_id = current_id, imported, "imported block keys");
        Ok(())
    }

    /// Mints a token for `block` granting `modes`, signed with the current key.
    pub fn generate_token(
        &self,
        block: &ExtendedBlock,
        modes: AccessModes,
        owner: Option<&str>,
    ) -> Result<Token, Error> {
        if self.role == Role::Slave && !self.allow_slave_issuance {
            return Err(Error::Role {
                role: self.role,
                operation: "generate_token",
            });
        }
        let window = self.window.load();
        let key = window.current.as_ref().ok_or(Error::NoCurrentKey)?;
        let now = self.clock.now_millis();

        let identifier = BlockTokenIdentifier::new(
            owner.unwrap_or_default(),
            block,
            modes,
            after(now, window.token_lifetime_ms),
            key.key_id(),
        );
        let bytes = identifier.encode()?;
        let password = codec::sign(&bytes, key);

        tracing::debug!(block = %block, modes = %modes, key_id = key.key_id(), "generated block token");
        Ok(Token::new(bytes, password))
    }

    /// Verifies a presented token and returns its identifier.
    ///
    /// Cheap checks run first: expiry, block, owner (when `expected_owner`
    /// is given) and access mode. The signature is checked last against every
    /// unexpired key in the window.
    ///
    /// 校验令牌并返回其标识符；签名检查放在最后。
    pub fn check_access(
        &self,
        token: &Token,
        expected_owner: Option<&str>,
        block: &ExtendedBlock,
        mode: AccessMode,
    ) -> Result<BlockTokenIdentifier, Error> {
        let identifier = token.decode_identifier()?;
        let now = self.clock.now_millis();
        check_claims(&identifier, expected_owner, block, mode, now)?;

        let window = self.window.load();
        codec::verify_signature(token.identifier_bytes(), token.password(), window.candidates(now))
            .ok_or(Error::InvalidSignature)?;
        Ok(identifier)
    }

    /// Checks an identifier whose credential was already authenticated by the
    /// RPC layer. The signing key must still be in the window.
    pub fn check_identifier_access(
        &self,
        identifier: &BlockTokenIdentifier,
        expected_owner: Option<&str>,
        block: &ExtendedBlock,
        mode: AccessMode,
    ) -> Result<(), Error> {
        let now = self.clock.now_millis();
        check_claims(identifier, expected_owner, block, mode, now)?;
        if self.window.load().find(identifier.key_id(), now).is_none() {
            return Err(Error::InvalidSignature);
        }
        Ok(())
    }

    /// Recomputes the password for `identifier` from the key it names.
    pub fn retrieve_password(&self, identifier: &BlockTokenIdentifier) -> Result<Vec<u8>, Error> {
        let now = self.clock.now_millis();
        if identifier.is_expired(now) {
            return Err(Error::ExpiredToken {
                expiry_date: identifier.expiry_date(),
                now,
            });
        }
        let window = self.window.load();
        let key = window
            .find(identifier.key_id(), now)
            .ok_or(Error::InvalidSignature)?;
        Ok(codec::sign(&identifier.encode()?, key))
    }
}

impl fmt::Debug for BlockTokenSecretManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let window = self.window.load();
        f.debug_struct("BlockTokenSecretManager")
            .field("role", &self.role)
            .field("current_key_id", &window.current.as_ref().map(BlockKey::key_id))
            .field("next_key_id", &window.next.as_ref().map(BlockKey::key_id))
            .field("retained_keys", &window.retained.len())
            .finish_non_exhaustive()
    }
}

fn check_claims(
    identifier: &BlockTokenIdentifier,
    expected_owner: Option<&str>,
    block: &ExtendedBlock,
    mode: AccessMode,
    now: i64,
) -> Result<(), Error> {
    if identifier.is_expired(now) {
        return Err(Error::ExpiredToken {
            expiry_date: identifier.expiry_date(),
            now,
        });
    }
    if identifier.block_id() != block.block_id || identifier.block_pool_id() != block.pool_id {
        return Err(Error::BlockMismatch {
            token_block: identifier.block().to_string(),
            requested_block: block.to_string(),
        });
    }
    if let Some(expected) = expected_owner {
        if identifier.owner() != expected {
            return Err(Error::OwnerMismatch {
                expected: expected.to_string(),
            });
        }
    }
    if !identifier.access_modes().contains(mode) {
        return Err(Error::AccessDenied(mode));
    }
    Ok(())
}
