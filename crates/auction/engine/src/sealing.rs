//! Bid sealing
//!
//! A sealed payload binds (round, item, amount) under keys derived from one
//! master passphrase:
//! - a keyed blake3 XOF, seeded with a random nonce, is the keystream
//! - a keyed blake3 MAC covers nonce and ciphertext
//! - a third key produces the blind item tag used for uniqueness checks
//!
//! Nothing about the amount can be read back without the engine's keys.

use auction_types::{Amount, ItemId, RoundId, SealedPayload};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const ENCRYPTION_CONTEXT: &str = "auction-engine sealed bid v1 encryption";
const MAC_CONTEXT: &str = "auction-engine sealed bid v1 authentication";
const TAG_CONTEXT: &str = "auction-engine sealed bid v1 item tag";

#[derive(Debug, Error)]
pub enum SealingError {
    #[error("sealed payload failed authentication")]
    Authentication,

    #[error("sealed payload belongs to {found}, expected {expected}")]
    RoundMismatch { expected: RoundId, found: RoundId },

    #[error("malformed sealed payload: {0}")]
    Malformed(String),
}

#[derive(Serialize, Deserialize)]
struct Plaintext {
    round_id: RoundId,
    item_id: ItemId,
    amount: Amount,
}

/// Seals and opens bid payloads
pub struct Sealer {
    encryption_key: [u8; 32],
    mac_key: [u8; 32],
    tag_key: [u8; 32],
}

impl Sealer {
    /// Derive all per-purpose keys from one passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let material = passphrase.as_bytes();
        Self {
            encryption_key: blake3::derive_key(ENCRYPTION_CONTEXT, material),
            mac_key: blake3::derive_key(MAC_CONTEXT, material),
            tag_key: blake3::derive_key(TAG_CONTEXT, material),
        }
    }

    /// Blind index of an item within a round.
    pub fn item_tag(&self, round_id: &RoundId, item_id: &ItemId) -> String {
        let mut hasher = blake3::Hasher::new_keyed(&self.tag_key);
        hasher.update(round_id.as_uuid().as_bytes());
        hasher.update(item_id.as_str().as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub fn seal(
        &self,
        round_id: &RoundId,
        item_id: &ItemId,
        amount: Amount,
    ) -> Result<SealedPayload, SealingError> {
        let plaintext = serde_json::to_vec(&Plaintext {
            round_id: round_id.clone(),
            item_id: item_id.clone(),
            amount,
        })
        .map_err(|e| SealingError::Malformed(e.to_string()))?;

        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self.apply_keystream(&nonce, &plaintext);
        let mac = self.authenticate(&nonce, &ciphertext);
        Ok(SealedPayload {
            nonce,
            ciphertext,
            mac: *mac.as_bytes(),
        })
    }

    /// Authenticate and decrypt a payload sealed for `round_id`.
    pub fn open(
        &self,
        round_id: &RoundId,
        payload: &SealedPayload,
    ) -> Result<(ItemId, Amount), SealingError> {
        // blake3::Hash equality is constant-time.
        let expected = self.authenticate(&payload.nonce, &payload.ciphertext);
        if expected != blake3::Hash::from(payload.mac) {
            return Err(SealingError::Authentication);
        }

        let plaintext = self.apply_keystream(&payload.nonce, &payload.ciphertext);
        let decoded: Plaintext = serde_json::from_slice(&plaintext)
            .map_err(|e| SealingError::Malformed(e.to_string()))?;
        if &decoded.round_id != round_id {
            return Err(SealingError::RoundMismatch {
                expected: round_id.clone(),
                found: decoded.round_id,
            });
        }
        Ok((decoded.item_id, decoded.amount))
    }

    fn apply_keystream(&self, nonce: &[u8; 16], data: &[u8]) -> Vec<u8> {
        let mut reader = blake3::Hasher::new_keyed(&self.encryption_key)
            .update(nonce)
            .finalize_xof();
        let mut keystream = vec![0u8; data.len()];
        reader.fill(&mut keystream);
        data.iter().zip(keystream).map(|(byte, key)| byte ^ key).collect()
    }

    fn authenticate(&self, nonce: &[u8; 16], ciphertext: &[u8]) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(&self.mac_key);
        hasher.update(nonce);
        hasher.update(ciphertext);
        hasher.finalize()
    }
}

impl fmt::Debug for Sealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sealer").finish_non_exhaustive()
    }
}
