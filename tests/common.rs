//!
//! 集成测试的通用辅助函数
//!
#![allow(dead_code)]

use block_seal::prelude::*;
use std::sync::Arc;
use std::time::Duration;

pub const MINUTE: i64 = 60 * 1000;

/// Key update interval 10 minutes, token lifetime 2 minutes.
pub fn test_config() -> TokenConfig {
    TokenConfig::new(Duration::from_secs(10 * 60), Duration::from_secs(2 * 60))
}

pub fn block1() -> ExtendedBlock {
    ExtendedBlock::new("0", 0)
}

pub fn block2() -> ExtendedBlock {
    ExtendedBlock::new("10", 10)
}

pub fn block3() -> ExtendedBlock {
    ExtendedBlock::new("-10", -108)
}

/// A master and a slave that has imported the master's keys.
pub fn master_and_slave() -> (BlockTokenSecretManager, BlockTokenSecretManager) {
    let master = BlockTokenSecretManager::master(&test_config()).unwrap();
    let slave = BlockTokenSecretManager::slave(&test_config()).unwrap();
    slave.set_keys(&master.export_keys().unwrap()).unwrap();
    (master, slave)
}

pub fn master_on(clock: &Arc<ManualClock>) -> BlockTokenSecretManager {
    BlockTokenSecretManager::new_master(&test_config(), clock.clone()).unwrap()
}

pub fn slave_on(clock: &Arc<ManualClock>) -> BlockTokenSecretManager {
    BlockTokenSecretManager::new_slave(&test_config(), clock.clone()).unwrap()
}

/// Tokens minted by either side verify on both sides, for single-mode and
/// all-mode tokens.
pub fn token_generation_and_verification(
    master: &BlockTokenSecretManager,
    slave: &BlockTokenSecretManager,
) {
    for mode in AccessMode::ALL {
        let token1 = master.generate_token(&block1(), mode.into(), None).unwrap();
        master.check_access(&token1, None, &block1(), mode).unwrap();
        slave.check_access(&token1, None, &block1(), mode).unwrap();

        let token2 = slave.generate_token(&block2(), mode.into(), None).unwrap();
        master.check_access(&token2, None, &block2(), mode).unwrap();
        slave.check_access(&token2, None, &block2(), mode).unwrap();
    }

    let mtoken = master.generate_token(&block3(), AccessModes::all(), None).unwrap();
    for mode in AccessMode::ALL {
        master.check_access(&mtoken, None, &block3(), mode).unwrap();
        slave.check_access(&mtoken, None, &block3(), mode).unwrap();
    }
}
