//! Attribution triplets and their stable identity

use crate::error::{MappingError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest accepted field, in characters
pub const MAX_FIELD_LENGTH: usize = 255;

/// Attribution tuple identifying one traffic flow
///
/// Identity is case-insensitive: two triplets differing only in case share one
/// [`triplet_id`](Triplet::triplet_id). The stored payload keeps the caller's casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triplet {
    pub keyword: String,
    pub src: String,
    pub creative: String,
}

impl Triplet {
    pub fn new(
        keyword: impl Into<String>,
        src: impl Into<String>,
        creative: impl Into<String>,
    ) -> Self {
        Self {
            keyword: keyword.into(),
            src: src.into(),
            creative: creative.into(),
        }
    }

    fn fields(&self) -> [(&'static str, &str); 3] {
        [
            ("keyword", self.keyword.as_str()),
            ("src", self.src.as_str()),
            ("creative", self.creative.as_str()),
        ]
    }

    /// Check that every field is present and within [`MAX_FIELD_LENGTH`]
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .fields()
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(MappingError::validation(format!(
                "Missing required parameters: {}.",
                missing.join(", ")
            )));
        }

        if let Some((name, _)) = self
            .fields()
            .iter()
            .find(|(_, value)| value.chars().count() > MAX_FIELD_LENGTH)
        {
            return Err(MappingError::validation(format!(
                "Parameter {} exceeds maximum length of {} characters.",
                name, MAX_FIELD_LENGTH
            )));
        }

        Ok(())
    }

    /// Lowercased canonical form the identity is hashed from
    pub fn canonical(&self) -> String {
        format!(
            "keyword:{}|src:{}|creative:{}",
            self.keyword.to_lowercase(),
            self.src.to_lowercase(),
            self.creative.to_lowercase()
        )
    }

    /// SHA-256 hex digest of [`canonical`](Triplet::canonical)
    pub fn triplet_id(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }
}

impl std::fmt::Display for Triplet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.keyword, self.src, self.creative)
    }
}
