//! Monetary amounts cross the wire as decimal strings so clients never
//! lose precision round-tripping a `u128` through JSON numbers. Internally
//! every amount stays a native `u128`; this module is only ever named in a
//! `#[serde(with = "...")]` attribute at the boundary.

use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<u128>().map_err(D::Error::custom)
}

/// Same encoding for `Option<u128>` fields (absent when the field is omitted
/// entirely, present as a decimal string otherwise — never `null`).
pub mod option {
    use super::*;

    pub fn serialize<S>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(amount) => serializer.serialize_some(&amount.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u128>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| s.parse::<u128>().map_err(D::Error::custom)).transpose()
    }
}
