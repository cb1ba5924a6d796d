//! Field-element encoding helpers.

use starknet_crypto::FieldElement;
use thiserror::Error;

/// Field element used for labels, commitments, nullifiers, and tree nodes.
pub type Felt = FieldElement;

/// Error parsing a hex-encoded field element.
#[derive(Debug, Error)]
#[error("invalid field element {0:?}")]
pub struct FeltParseError(pub String);

/// Encode a field element as a `0x`-prefixed hex string.
pub fn felt_to_hex(value: &Felt) -> String {
    format!("0x{:x}", value)
}

/// Parse a `0x`-prefixed (or bare) hex string into a field element.
pub fn felt_from_hex(value: &str) -> Result<Felt, FeltParseError> {
    FieldElement::from_hex_be(value).map_err(|_| FeltParseError(value.to_string()))
}

/// Serde adapter for a single hex-encoded field element.
///
/// Usage: `#[serde(with = "felt_hex")]`.
pub mod felt_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{felt_from_hex, felt_to_hex, Felt};

    pub fn serialize<S: Serializer>(value: &Felt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&felt_to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Felt, D::Error> {
        let raw = String::deserialize(deserializer)?;
        felt_from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for a sequence of hex-encoded field elements.
///
/// Usage: `#[serde(with = "felt_hex_seq")]`.
pub mod felt_hex_seq {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{felt_from_hex, felt_to_hex, Felt};

    pub fn serialize<S: Serializer>(values: &[Felt], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| felt_to_hex(v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Felt>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| felt_from_hex(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
