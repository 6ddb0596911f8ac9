//! Serde helpers for digests.
//!
//! Human-readable formats (JSON, TOML) get lowercase hex strings so receipts
//! and proofs can be checked by hand. Binary formats (bincode) keep the raw
//! 32 bytes.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct Record {
//!     #[serde(with = "vault_cas::serde_hex")]
//!     digest: Blake3Hash,
//!     #[serde(with = "vault_cas::serde_hex::vec")]
//!     digests: Vec<Blake3Hash>,
//! }
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

use crate::{hash_to_hex, hex_to_hash, Blake3Hash};

pub fn serialize<S: Serializer>(hash: &Blake3Hash, serializer: S) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.serialize_str(&hash_to_hex(hash))
    } else {
        serde::Serialize::serialize(hash, serializer)
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Blake3Hash, D::Error> {
    if deserializer.is_human_readable() {
        let s = String::deserialize(deserializer)?;
        hex_to_hash(&s).ok_or_else(|| D::Error::custom(format!("invalid digest hex: {s}")))
    } else {
        <Blake3Hash>::deserialize(deserializer)
    }
}

/// Same encoding for an ordered list of digests.
pub mod vec {
    use super::*;
    use serde::de::Error as _;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(
        hashes: &[Blake3Hash],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let human = serializer.is_human_readable();
        let mut seq = serializer.serialize_seq(Some(hashes.len()))?;
        for hash in hashes {
            if human {
                seq.serialize_element(&hash_to_hex(hash))?;
            } else {
                seq.serialize_element(hash)?;
            }
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Blake3Hash>, D::Error> {
        if deserializer.is_human_readable() {
            let raw = Vec::<String>::deserialize(deserializer)?;
            raw.iter()
                .map(|s| {
                    hex_to_hash(s)
                        .ok_or_else(|| D::Error::custom(format!("invalid digest hex: {s}")))
                })
                .collect()
        } else {
            Vec::<Blake3Hash>::deserialize(deserializer)
        }
    }
}
