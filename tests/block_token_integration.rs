mod common;

use block_seal::prelude::*;
use common::*;
use std::sync::Arc;

fn decoded_identifier(manager: &BlockTokenSecretManager, token: &Token) -> BlockTokenIdentifier {
    let mut id = manager.create_identifier();
    id.read_from(token.identifier_bytes()).unwrap();
    id
}

#[test]
fn test_identifier_roundtrip_through_generated_tokens() {
    let master = BlockTokenSecretManager::master(&test_config()).unwrap();

    let empty = BlockTokenIdentifier::default();
    assert_eq!(BlockTokenIdentifier::decode(&empty.encode().unwrap()).unwrap(), empty);

    for (block, modes) in [
        (block1(), AccessModes::all()),
        (block2(), AccessModes::only(AccessMode::Write)),
        (block3(), AccessModes::empty()),
    ] {
        let token = master.generate_token(&block, modes, Some("writer")).unwrap();
        let id = decoded_identifier(&master, &token);
        assert_eq!(id.block(), block);
        assert_eq!(id.access_modes(), modes);
        assert_eq!(id.key_id(), master.current_key_id().unwrap());
        assert_eq!(id.encode().unwrap(), token.identifier_bytes());
    }
}

#[test]
fn test_block_token_secret_manager() {
    let master = BlockTokenSecretManager::master(&test_config()).unwrap();
    let slave = BlockTokenSecretManager::slave(&test_config()).unwrap();
    slave.set_keys(&master.export_keys().unwrap()).unwrap();
    token_generation_and_verification(&master, &slave);

    // 主节点轮换后，从节点尚未同步
    master.rotate().unwrap();
    token_generation_and_verification(&master, &slave);

    slave.set_keys(&master.export_keys().unwrap()).unwrap();
    token_generation_and_verification(&master, &slave);
}

#[test]
fn test_every_mode_subset_is_enforced() {
    let (master, slave) = master_and_slave();
    let block = block2();
    for bits in 0u8..16 {
        let modes = AccessModes::from_bits(bits).unwrap();
        let token = master.generate_token(&block, modes, Some("u")).unwrap();
        for mode in AccessMode::ALL {
            let result = slave.check_access(&token, Some("u"), &block, mode);
            if modes.contains(mode) {
                assert!(result.is_ok(), "{modes} should grant {mode}");
            } else {
                assert!(matches!(result, Err(Error::AccessDenied(m)) if m == mode));
            }
        }
    }
}

#[test]
fn test_write_token_for_block_10() {
    let master = BlockTokenSecretManager::master(&test_config()).unwrap();
    let block10 = ExtendedBlock::new("", 10);
    let token = master
        .generate_token(&block10, AccessModes::only(AccessMode::Write), Some("u1"))
        .unwrap();

    assert!(matches!(
        master.check_access(&token, None, &block10, AccessMode::Read),
        Err(Error::AccessDenied(AccessMode::Read))
    ));
    assert!(matches!(
        master.check_access(&token, None, &ExtendedBlock::new("", 11), AccessMode::Write),
        Err(Error::BlockMismatch { .. })
    ));
    master.check_access(&token, None, &block10, AccessMode::Write).unwrap();
}

#[test]
fn test_token_survives_rotation_until_it_expires() {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let master = master_on(&clock);
    let slave = slave_on(&clock);
    slave.set_keys(&master.export_keys().unwrap()).unwrap();

    let token = master.generate_token(&block1(), AccessModes::all(), None).unwrap();
    clock.advance(MINUTE);
    master.rotate().unwrap();
    slave.set_keys(&master.export_keys().unwrap()).unwrap();

    master.check_access(&token, None, &block1(), AccessMode::Read).unwrap();
    slave.check_access(&token, None, &block1(), AccessMode::Read).unwrap();

    clock.advance(MINUTE + 1);
    for manager in [&master, &slave] {
        assert!(matches!(
            manager.check_access(&token, None, &block1(), AccessMode::Read),
            Err(Error::ExpiredToken { .. })
        ));
    }
}

#[test]
fn test_exported_keys_travel_as_bytes_and_json() {
    let master = BlockTokenSecretManager::master(&test_config()).unwrap();
    master.rotate().unwrap();
    let export = master.export_keys().unwrap();

    let over_binary = ExportedBlockKeys::decode(&export.encode().unwrap()).unwrap();
    let over_json = ExportedBlockKeys::from_json(&export.to_json().unwrap()).unwrap();
    assert_eq!(over_binary, export);
    assert_eq!(over_json, export);

    let slave = BlockTokenSecretManager::slave(&test_config()).unwrap();
    slave.set_keys(&over_binary).unwrap();
    token_generation_and_verification(&master, &slave);
}

#[test]
fn test_token_wire_forms() {
    let (master, slave) = master_and_slave();
    let mut token = master.generate_token(&block3(), AccessModes::all(), Some("u")).unwrap();
    token.set_service("127.0.0.1:50010");

    let from_bytes = Token::decode(&token.encode().unwrap()).unwrap();
    let from_url = Token::decode_from_url_string(&token.encode_to_url_string().unwrap()).unwrap();
    assert_eq!(from_bytes, token);
    assert_eq!(from_url, token);
    slave.check_access(&from_url, Some("u"), &block3(), AccessMode::Replace).unwrap();
}

#[test]
fn test_truncated_token_is_malformed() {
    let master = BlockTokenSecretManager::master(&test_config()).unwrap();
    let bytes = master
        .generate_token(&block1(), AccessModes::all(), None)
        .unwrap()
        .encode()
        .unwrap();
    for len in [0, 1, bytes.len() / 2, bytes.len() - 1] {
        assert!(matches!(Token::decode(&bytes[..len]), Err(Error::MalformedToken(_))));
    }
}

#[test]
fn test_block_pool_token_secret_manager() {
    let registry = BlockPoolTokenSecretManager::new();
    let mut masters = Vec::new();

    for i in 0..10 {
        let pool_id = i.to_string();
        let master = BlockTokenSecretManager::master(&test_config()).unwrap();
        registry
            .add_pool(&pool_id, BlockTokenSecretManager::slave(&test_config()).unwrap())
            .unwrap();

        registry.set_keys(&pool_id, &master.export_keys().unwrap()).unwrap();
        token_generation_and_verification(&master, &registry.get(&pool_id).unwrap());

        master.rotate().unwrap();
        token_generation_and_verification(&master, &registry.get(&pool_id).unwrap());
        registry.set_keys(&pool_id, &master.export_keys().unwrap()).unwrap();
        token_generation_and_verification(&master, &registry.get(&pool_id).unwrap());

        masters.push(master);
    }
    assert_eq!(registry.len(), 10);

    // 每个池的令牌只能在本池验证
    let block = ExtendedBlock::new("", 5);
    for (i, master) in masters.iter().enumerate() {
        let token = master.generate_token(&block, AccessModes::all(), None).unwrap();
        for j in 0..10 {
            let result = registry
                .get(&j.to_string())
                .unwrap()
                .check_access(&token, None, &block, AccessMode::Read);
            if i == j {
                assert!(result.is_ok());
            } else {
                assert!(matches!(result, Err(Error::InvalidSignature)));
            }
        }
    }
}

#[test]
fn test_pool_tokens_survive_two_rotations() {
    let registry = BlockPoolTokenSecretManager::new();
    let mut issued = Vec::new();
    let mut masters = Vec::new();

    for i in 0..10 {
        let pool_id = format!("bp-{i}");
        let block = ExtendedBlock::new(pool_id.clone(), i);
        let master = BlockTokenSecretManager::master(&test_config()).unwrap();
        registry
            .add_pool(&pool_id, BlockTokenSecretManager::slave(&test_config()).unwrap())
            .unwrap();
        registry.set_keys(&pool_id, &master.export_keys().unwrap()).unwrap();

        issued.push((block.clone(), master.generate_token(&block, AccessModes::all(), None).unwrap()));
        for _ in 0..2 {
            master.rotate().unwrap();
            registry.set_keys(&pool_id, &master.export_keys().unwrap()).unwrap();
            issued.push((block.clone(), master.generate_token(&block, AccessModes::all(), None).unwrap()));
        }
        masters.push(master);
    }

    for (block, token) in &issued {
        registry.check_access(token, None, block, AccessMode::Write).unwrap();
        for other in registry.pool_ids() {
            if other == block.pool_id {
                continue;
            }
            let result = registry.get(&other).unwrap().check_access(token, None, block, AccessMode::Write);
            assert!(matches!(result, Err(Error::InvalidSignature)));
        }
    }

    // 已移除的池不再接受任何令牌
    let (block, token) = &issued[0];
    registry.remove_pool(&block.pool_id).unwrap();
    assert!(matches!(
        registry.check_access(token, None, block, AccessMode::Write),
        Err(Error::UnknownPool(_))
    ));
}

#[test]
fn test_concurrent_verification_during_rotation() {
    let master = Arc::new(BlockTokenSecretManager::master(&test_config()).unwrap());
    let token = master.generate_token(&block1(), AccessModes::all(), None).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let master = &master;
            let token = &token;
            scope.spawn(move || {
                for _ in 0..200 {
                    master.check_access(token, None, &block1(), AccessMode::Read).unwrap();
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..5 {
                master.rotate().unwrap();
            }
        });
    });
}
