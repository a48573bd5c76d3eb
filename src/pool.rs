//! Per-pool multiplexing of block token secret managers.
//!
//! Each block pool has its own independently keyed manager, so a token is
//! only ever verifiable inside the pool that issued it.

use crate::error::Error;
use crate::identifier::{AccessMode, AccessModes, BlockTokenIdentifier, ExtendedBlock};
use crate::key::ExportedBlockKeys;
use crate::manager::BlockTokenSecretManager;
use crate::token::Token;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Routes token operations to the manager of the block's pool.
///
/// 按块所在的池把令牌操作分派给对应的管理器。
#[derive(Debug, Default)]
pub struct BlockPoolTokenSecretManager {
    managers: DashMap<String, Arc<BlockTokenSecretManager>>,
}

impl BlockPoolTokenSecretManager {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_pool(&self, pool_id: &str, manager: BlockTokenSecretManager) -> Result<(), Error> {
        match self.managers.entry(pool_id.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicatePool(pool_id.to_string())),
            Entry::Vacant(slot) => {
                tracing::debug!(pool_id, role = %manager.role(), "registered block pool");
                slot.insert(Arc::new(manager));
                Ok(())
            }
        }
    }

    pub fn remove_pool(&self, pool_id: &str) -> Result<Arc<BlockTokenSecretManager>, Error> {
        let (_, manager) = self
            .managers
            .remove(pool_id)
            .ok_or_else(|| Error::UnknownPool(pool_id.to_string()))?;
        tracing::debug!(pool_id, "removed block pool");
        Ok(manager)
    }

    pub fn get(&self, pool_id: &str) -> Result<Arc<BlockTokenSecretManager>, Error> {
        self.managers
            .get(pool_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::UnknownPool(pool_id.to_string()))
    }

    pub fn contains(&self, pool_id: &str) -> bool {
        self.managers.contains_key(pool_id)
    }

    pub fn pool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.managers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// 将主节点导出的密钥导入该池的管理器
    pub fn set_keys(&self, pool_id: &str, exported: &ExportedBlockKeys) -> Result<(), Error> {
        self.get(pool_id)?.set_keys(exported)
    }

    pub fn generate_token(
        &self,
        block: &ExtendedBlock,
        modes: AccessModes,
        owner: Option<&str>,
    ) -> Result<Token, Error> {
        self.get(&block.pool_id)?.generate_token(block, modes, owner)
    }

    /// Verifies `token` with the manager of the requested block's pool.
    ///
    /// 按请求块所在的池选择管理器，令牌中的池编号由该管理器校验
    pub fn check_access(
        &self,
        token: &Token,
        expected_owner: Option<&str>,
        block: &ExtendedBlock,
        mode: AccessMode,
    ) -> Result<BlockTokenIdentifier, Error> {
        self.get(&block.pool_id)?
            .check_access(token, expected_owner, block, mode)
    }

    pub fn check_identifier_access(
        &self,
        identifier: &BlockTokenIdentifier,
        expected_owner: Option<&str>,
        block: &ExtendedBlock,
        mode: AccessMode,
    ) -> Result<(), Error> {
        self.get(&block.pool_id)?
            .check_identifier_access(identifier, expected_owner, block, mode)
    }

    pub fn retrieve_password(&self, identifier: &BlockTokenIdentifier) -> Result<Vec<u8>, Error> {
        self.get(identifier.block_pool_id())?.retrieve_password(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;

    fn slave() -> BlockTokenSecretManager {
        BlockTokenSecretManager::slave(&TokenConfig::default()).unwrap()
    }

    #[test]
    fn test_add_get_remove() {
        let registry = BlockPoolTokenSecretManager::new();
        assert!(registry.is_empty());
        registry.add_pool("bp-1", slave()).unwrap();
        registry.add_pool("bp-0", slave()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.pool_ids(), vec!["bp-0".to_string(), "bp-1".to_string()]);
        assert!(registry.get("bp-1").is_ok());

        registry.remove_pool("bp-1").unwrap();
        assert!(!registry.contains("bp-1"));
        assert!(matches!(registry.get("bp-1"), Err(Error::UnknownPool(_))));
        assert!(matches!(registry.remove_pool("bp-1"), Err(Error::UnknownPool(_))));
    }

    #[test]
    fn test_duplicate_pool_is_rejected() {
        let registry = BlockPoolTokenSecretManager::new();
        registry.add_pool("bp", slave()).unwrap();
        assert!(matches!(
            registry.add_pool("bp", slave()),
            Err(Error::DuplicatePool(id)) if id == "bp"
        ));
    }

    #[test]
    fn test_set_keys_unknown_pool() {
        let registry = BlockPoolTokenSecretManager::new();
        let master = BlockTokenSecretManager::master(&TokenConfig::default()).unwrap();
        assert!(matches!(
            registry.set_keys("missing", &master.export_keys().unwrap()),
            Err(Error::UnknownPool(_))
        ));
    }

    #[test]
    fn test_routes_by_pool_id() {
        let registry = BlockPoolTokenSecretManager::new();
        let master = BlockTokenSecretManager::master(&TokenConfig::default()).unwrap();
        registry.add_pool("bp-a", slave()).unwrap();
        registry.set_keys("bp-a", &master.export_keys().unwrap()).unwrap();

        let block = ExtendedBlock::new("bp-a", 77);
        let token = master.generate_token(&block, AccessModes::all(), Some("u")).unwrap();
        let id = registry.check_access(&token, Some("u"), &block, AccessMode::Read).unwrap();
        assert_eq!(registry.retrieve_password(&id).unwrap(), token.password());

        let issued = registry
            .generate_token(&block, AccessModes::only(AccessMode::Copy), None)
            .unwrap();
        assert!(master.check_access(&issued, None, &block, AccessMode::Copy).is_ok());

        let elsewhere = ExtendedBlock::new("bp-b", 77);
        let foreign = master.generate_token(&elsewhere, AccessModes::all(), None).unwrap();
        assert!(matches!(
            registry.check_access(&foreign, None, &elsewhere, AccessMode::Read),
            Err(Error::UnknownPool(_))
        ));
    }

    #[test]
    fn test_routes_by_requested_block_pool() {
        let registry = BlockPoolTokenSecretManager::new();
        let master = BlockTokenSecretManager::master(&TokenConfig::default()).unwrap();
        registry.add_pool("bp-a", slave()).unwrap();
        registry.set_keys("bp-a", &master.export_keys().unwrap()).unwrap();

        // 令牌声称属于未注册的池，请求的块在 bp-a
        let claimed = ExtendedBlock::new("bp-z", 5);
        let token = master.generate_token(&claimed, AccessModes::all(), None).unwrap();
        let requested = ExtendedBlock::new("bp-a", 5);
        assert!(matches!(
            registry.check_access(&token, None, &requested, AccessMode::Read),
            Err(Error::BlockMismatch { .. })
        ));

        let id = token.decode_identifier().unwrap();
        assert!(matches!(
            registry.check_identifier_access(&id, None, &requested, AccessMode::Read),
            Err(Error::BlockMismatch { .. })
        ));
        assert!(matches!(
            registry.check_access(&token, None, &claimed, AccessMode::Read),
            Err(Error::UnknownPool(_))
        ));
    }
}
