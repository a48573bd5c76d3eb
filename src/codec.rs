//! HMAC-SHA256 signing and verification of encoded identifiers.

use crate::key::BlockKey;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(key: &BlockKey) -> HmacSha256 {
    // HMAC 接受任意长度的密钥
    <HmacSha256 as Mac>::new_from_slice(key.secret().expose())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"))
}

/// Computes the token password for `identifier` under `key`.
pub fn sign(identifier: &[u8], key: &BlockKey) -> Vec<u8> {
    let mut mac = mac_for(key);
    mac.update(identifier);
    mac.finalize().into_bytes().to_vec()
}

/// Checks `signature` against each candidate in order and returns the id of
/// the first key that produced it. Comparison is constant-time.
///
/// 依次尝试候选密钥，返回第一个匹配的密钥编号（常量时间比较）。
pub fn verify_signature<'a, I>(identifier: &[u8], signature: &[u8], candidates: I) -> Option<u32>
where
    I: IntoIterator<Item = &'a BlockKey>,
{
    candidates.into_iter().find_map(|key| {
        let mut mac = mac_for(key);
        mac.update(identifier);
        mac.verify_slice(signature).ok().map(|_| key.key_id())
    })
}
