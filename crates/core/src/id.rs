//! Strongly-typed identifiers used across the pipeline.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a forecasting target (usually a store).
///
/// Exactly one model artifact exists per target, and the id doubles as the
/// artifact key, so it is restricted to path-safe characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(String);

/// Identifier of a sellable product.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

/// Identifier of an append-only monitoring record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

const MAX_KEY_LEN: usize = 128;

fn validate_key(raw: &str, name: &str) -> Result<(), DomainError> {
    if raw.is_empty() {
        return Err(DomainError::invalid_id(format!("{name}: must not be empty")));
    }
    if raw.len() > MAX_KEY_LEN {
        return Err(DomainError::invalid_id(format!(
            "{name}: longer than {MAX_KEY_LEN} characters"
        )));
    }
    if raw.starts_with('.') {
        return Err(DomainError::invalid_id(format!("{name}: must not start with '.'")));
    }
    if let Some(c) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(DomainError::invalid_id(format!(
            "{name}: unsupported character {c:?}"
        )));
    }
    Ok(())
}

macro_rules! impl_key_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Validate and wrap a raw key.
            pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
                let raw = raw.into();
                validate_key(&raw, $name)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_key_newtype!(TargetId, "TargetId");
impl_key_newtype!(ProductId, "ProductId");

impl RecordId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered) so records sort by creation time.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_path_safe_keys() {
        let id = TargetId::new("store_1").unwrap();
        assert_eq!(id.as_str(), "store_1");
        assert_eq!(id.to_string(), "store_1");
        assert!(ProductId::new("sku-42.large").is_ok());
    }

    #[test]
    fn rejects_unsafe_keys() {
        for bad in ["", "../etc", ".hidden", "a/b", "with space", "é"] {
            assert!(TargetId::new(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(TargetId::new("x".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: TargetId = serde_json::from_str("\"main_store\"").unwrap();
        assert_eq!(ok.as_str(), "main_store");
        assert!(serde_json::from_str::<TargetId>("\"a/b\"").is_err());
    }

    #[test]
    fn record_ids_are_unique_v7() {
        let a = RecordId::new();
        let b = RecordId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 7);
    }
}
