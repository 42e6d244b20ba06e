//! Provably fair outcome derivation
//!
//! Every outcome is a pure function of an HMAC-SHA256 digest keyed by the
//! server seed. The server seed hash is published before play and the seed
//! itself after settlement, so anyone can recompute the result with the
//! functions below and compare it bit-for-bit with what the engine paid.

use crate::common::types::{round_significant, round_to, sha256_hex};
use crate::errors::ValidationError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Number of cells on the mine board
pub const MINE_BOARD_SIZE: usize = 25;

/// Crash odds keep 1% for the house
const CRASH_EDGE_FACTOR: f64 = 0.99;

const TWO_POW_32: f64 = 4_294_967_296.0;

/// HMAC-SHA256 keyed by the server seed
pub fn hmac_sha256(server_seed: &str, message: &str) -> [u8; 32] {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(server_seed.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC key length is unrestricted"),
    };
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().into()
}

fn word_at(digest: &[u8; 32], index: usize) -> u32 {
    let start = index * 4;
    u32::from_be_bytes([digest[start], digest[start + 1], digest[start + 2], digest[start + 3]])
}

/// Hex HMAC of the block hash under the server seed
pub fn crash_hash(server_seed: &str, block_hash: &str) -> String {
    hex::encode(hmac_sha256(server_seed, block_hash))
}

/// Public pre-commitment for a crash round
pub fn crash_commitment(server_seed: &str, block_hash: &str) -> String {
    sha256_hex(&[server_seed.as_bytes(), block_hash.as_bytes()])
}

/// Crash multiplier from the first digest word
pub fn crash_point_from_k(k: u32) -> f64 {
    let raw = (TWO_POW_32 / (k as f64 + 1.0) * CRASH_EDGE_FACTOR).max(1.0);
    (raw * 100.0).floor() / 100.0
}

/// Crash multiplier for a seed pair, always >= 1.00
pub fn crash_multiplier(server_seed: &str, block_hash: &str) -> f64 {
    let digest = hmac_sha256(server_seed, block_hash);
    crash_point_from_k(word_at(&digest, 0))
}

/// Dice/Limbo roll in [0, 100.00] from a digest word
pub fn roll_from_k(k: u32) -> f64 {
    (k as f64 / TWO_POW_32 * 10_001.0).floor() / 100.0
}

/// Dice/Limbo roll for a seed pair
pub fn dice_result(client_seed: &str, server_seed: &str) -> f64 {
    let digest = hmac_sha256(server_seed, &format!("{}:0:0", client_seed));
    roll_from_k(word_at(&digest, 0))
}

/// Mine layout: the first `mine_count` cells of a seeded board permutation
///
/// Three digests give 24 floats. Each step takes the cell at
/// `floor(f * remaining)`, moves the last remaining cell into the hole and
/// appends the taken cell. A smaller mine count is always a prefix of a larger one.
pub fn mine_positions(client_seed: &str, server_seed: &str, mine_count: u8) -> Result<Vec<u8>, ValidationError> {
    if !(1..=24).contains(&mine_count) {
        return Err(ValidationError::InvalidMineCount(mine_count));
    }

    let floats: Vec<f64> = (0..3)
        .flat_map(|cursor| {
            let digest = hmac_sha256(server_seed, &format!("{}:0:{}", client_seed, cursor));
            (0..8).map(move |i| word_at(&digest, i) as f64 / TWO_POW_32)
        })
        .collect();

    let mut cells: Vec<u8> = (0..MINE_BOARD_SIZE as u8).collect();
    let mut picked = Vec::with_capacity(mine_count as usize);
    for (step, f) in floats.iter().take(mine_count as usize).enumerate() {
        let remaining = MINE_BOARD_SIZE - step;
        let idx = ((f * remaining as f64).floor() as usize).min(remaining - 1);
        let cell = cells.swap_remove(idx);
        picked.push(cell);
    }

    Ok(picked)
}

/// Mine payout multiplier after `open_count` safe cells
///
/// `rate` is the rake in per mille, applied multiplicatively to the product
/// of survival odds.
pub fn calc_multiple(mine_count: u8, open_count: usize, rate: u32) -> f64 {
    if open_count == 0 {
        return 1.0;
    }
    let mines = mine_count as usize;
    let mut product = 1.0;
    for i in 0..open_count {
        let safe = MINE_BOARD_SIZE.saturating_sub(mines + i);
        if safe == 0 {
            break;
        }
        product *= (MINE_BOARD_SIZE - i) as f64 / safe as f64;
    }
    let with_rake = product * (1000.0 - rate as f64) / 1000.0;
    round_to(round_significant(with_rake, 14), 2)
}

/// Recomputed crash outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashProof {
    pub hash: String,
    pub commitment: String,
    pub crash_multiplier: f64,
}

/// Recomputed dice/limbo outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollProof {
    pub server_seed_hash: String,
    pub result: f64,
}

/// Recomputed mine layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MineProof {
    pub server_seed_hash: String,
    pub positions: Vec<u8>,
}

/// Stateless third-party verification
pub struct FairnessVerifier;

impl FairnessVerifier {
    pub fn verify_crash(server_seed: &str, block_hash: &str) -> CrashProof {
        CrashProof {
            hash: crash_hash(server_seed, block_hash),
            commitment: crash_commitment(server_seed, block_hash),
            crash_multiplier: crash_multiplier(server_seed, block_hash),
        }
    }

    pub fn verify_dice(client_seed: &str, server_seed: &str) -> RollProof {
        RollProof {
            server_seed_hash: sha256_hex(&[server_seed.as_bytes()]),
            result: dice_result(client_seed, server_seed),
        }
    }

    /// Limbo shares the dice roll; only the win condition differs
    pub fn verify_limbo(client_seed: &str, server_seed: &str) -> RollProof {
        Self::verify_dice(client_seed, server_seed)
    }

    pub fn verify_mine(client_seed: &str, server_seed: &str, mine_count: u8) -> Result<MineProof, ValidationError> {
        Ok(MineProof {
            server_seed_hash: sha256_hex(&[server_seed.as_bytes()]),
            positions: mine_positions(client_seed, server_seed, mine_count)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const SERVER: &str = "a7f71d0c5b3e9a2f8d6c4b1e0f9a8d7c6b5a4f3e2d1c0b9a8f7e6d5c4becf6";
    const CLIENT: &str = "00000000000000000000000000075c4";

    #[test]
    fn test_crash_point_mapping() {
        assert_eq!(crash_point_from_k(u32::MAX), 1.0);
        assert_eq!(crash_point_from_k(2_147_483_647), 1.98);
        assert!(crash_point_from_k(0) > 4_000_000_000.0);
    }

    #[test]
    fn test_crash_multiplier_deterministic_and_bounded() {
        for i in 0..200 {
            let block = format!("block-{}", i);
            let m = crash_multiplier(SERVER, &block);
            assert!(m >= 1.0);
            assert_eq!(m, crash_multiplier(SERVER, &block));
            assert_eq!(FairnessVerifier::verify_crash(SERVER, &block).crash_multiplier, m);
        }
    }

    #[test]
    fn test_roll_mapping() {
        assert_eq!(roll_from_k(0), 0.0);
        assert_eq!(roll_from_k(u32::MAX), 100.0);
        assert_eq!(roll_from_k(2_147_483_648), 50.0);
    }

    #[test]
    fn test_digest_words_map_to_roll_and_crash() {
        // HMAC-SHA256(key = SERVER, msg = CLIENT + ":0:0") = c2612b56...
        let digest = hmac_sha256(SERVER, &format!("{}:0:0", CLIENT));
        assert_eq!(
            hex::encode(digest),
            "c2612b5686ad2a807e04c2e88b0cfc9fa45a324ab06a46b14591a40a630006df"
        );
        assert_eq!(word_at(&digest, 0), 0xc261_2b56);
        assert_eq!(roll_from_k(3_261_147_990), 75.93);
        assert_eq!(dice_result(CLIENT, SERVER), 75.93);
        assert_eq!(dice_result("client-seed", "server-seed"), 45.54);

        assert_eq!(
            crash_hash("seed", "block"),
            "b1388910c1fad65dad5a82cade0aebf321a00b66bcf02dff86a2fe6898c1970b"
        );
        assert_eq!(crash_point_from_k(0xb138_8910), 1.43);
        assert_eq!(crash_multiplier("seed", "block"), 1.43);
        assert_eq!(crash_multiplier(SERVER, "block-0"), 2.09);
    }

    #[test]
    fn test_mine_layout_golden() {
        assert_eq!(
            mine_positions(CLIENT, SERVER, 24).unwrap(),
            vec![18, 12, 11, 22, 13, 20, 5, 6, 23, 0, 14, 4, 7, 17, 15, 2, 24, 9, 10, 8, 3, 1, 21, 19]
        );
        assert_eq!(
            mine_positions("client-seed", "server-seed", 24).unwrap(),
            vec![11, 16, 0, 18, 22, 21, 6, 7, 12, 20, 8, 24, 13, 9, 5, 23, 19, 17, 2, 3, 15, 4, 10, 14]
        );
        assert_eq!(mine_positions("client-seed", "server-seed", 3).unwrap(), vec![11, 16, 0]);
    }

    #[test]
    fn test_dice_result_range() {
        for i in 0..200 {
            let r = dice_result(&format!("{}{}", CLIENT, i), SERVER);
            assert!((0.0..=100.0).contains(&r));
            assert_eq!(r, round_to(r, 2));
        }
    }

    #[test]
    fn test_mine_positions_are_distinct_cells() {
        let full = mine_positions(CLIENT, SERVER, 24).unwrap();
        assert_eq!(full.len(), 24);
        let unique: HashSet<u8> = full.iter().copied().collect();
        assert_eq!(unique.len(), 24);
        assert!(full.iter().all(|&c| (c as usize) < MINE_BOARD_SIZE));
    }

    #[test]
    fn test_mine_positions_prefix_property() {
        let full = mine_positions(CLIENT, SERVER, 24).unwrap();
        for k in [1u8, 3, 15] {
            let partial = mine_positions(CLIENT, SERVER, k).unwrap();
            assert_eq!(partial.as_slice(), &full[..k as usize]);
        }
    }

    #[test]
    fn test_mine_count_bounds() {
        assert_eq!(mine_positions(CLIENT, SERVER, 0), Err(ValidationError::InvalidMineCount(0)));
        assert_eq!(mine_positions(CLIENT, SERVER, 25), Err(ValidationError::InvalidMineCount(25)));
    }

    #[test]
    fn test_calc_multiple_table() {
        assert_eq!(calc_multiple(1, 1, 10), 1.03);
        assert_eq!(calc_multiple(24, 1, 10), 24.75);
        assert_eq!(calc_multiple(1, 24, 10), 24.75);
        assert_eq!(calc_multiple(2, 1, 0), 1.09);
        assert_eq!(calc_multiple(5, 2, 10), 1.56);
        assert_eq!(calc_multiple(3, 0, 10), 1.0);
    }

    #[test]
    fn test_commitment_is_sha256_of_concatenation() {
        assert_eq!(
            crash_commitment("seed", "block"),
            sha256_hex(&[b"seedblock"])
        );
        assert_ne!(crash_hash("seed", "block"), crash_commitment("seed", "block"));
    }
}
