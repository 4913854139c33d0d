//! Content identifiers (ETag-style MD5 tags).
//!
//! A single-part object is tagged with the hex MD5 of its bytes. An object
//! assembled from a multipart upload is tagged with the *composite* form:
//! the MD5 of the concatenated raw part digests, hex-encoded and suffixed
//! with `-<part count>`. The finalizer recomputes the composite tag from the
//! uploaded parts and compares it with the tag captured from the source.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strong identifier of an object's bytes.
///
/// Surrounding double quotes (as returned by most S3-compatible services)
/// are stripped and hex digits are lowercased on construction, so two
/// identifiers compare equal whenever they denote the same content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Normalize a raw identifier.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim().trim_matches('"');
        Self(trimmed.to_ascii_lowercase())
    }

    /// Identifier of a single-part object holding `data`.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(format!("{:x}", md5::compute(data)))
    }

    /// Identifier a multipart uploader assigns to `data` when it splits the
    /// upload into `part_size` chunks.
    ///
    /// Objects that fit in one part get the plain digest.
    pub fn of_object(data: &[u8], part_size: u64) -> Self {
        let part_size = usize::try_from(part_size.max(1)).unwrap_or(usize::MAX);
        if data.len() <= part_size {
            return Self::of_bytes(data);
        }
        let mut digests = Vec::with_capacity(data.len().div_ceil(part_size) * 16);
        let mut count = 0u32;
        for chunk in data.chunks(part_size) {
            digests.extend_from_slice(&md5::compute(chunk).0);
            count += 1;
        }
        Self(format!("{:x}-{count}", md5::compute(&digests)))
    }

    /// Composite identifier of an object assembled from `parts`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentId`] if a part identifier is not a
    /// plain hex digest (for example, already composite).
    pub fn composite<'a, I>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a ContentId>,
    {
        let mut digests = Vec::new();
        let mut count = 0usize;
        for part in parts {
            digests.extend_from_slice(&part.digest()?);
            count += 1;
        }
        Ok(Self(format!("{:x}-{count}", md5::compute(&digests))))
    }

    /// Raw digest bytes of a plain (non-composite) identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentId`] if the identifier is composite or
    /// not valid hex.
    pub fn digest(&self) -> Result<Vec<u8>> {
        if self.is_composite() {
            return Err(Error::InvalidContentId {
                content_id: self.0.clone(),
                reason: "composite identifiers have no single digest".into(),
            });
        }
        hex::decode(&self.0).map_err(|e| Error::InvalidContentId {
            content_id: self.0.clone(),
            reason: e.to_string(),
        })
    }

    /// Whether this is a composite (multipart) identifier.
    pub fn is_composite(&self) -> bool {
        self.part_count().is_some()
    }

    /// Part count carried by a composite identifier.
    pub fn part_count(&self) -> Option<u32> {
        let (_, suffix) = self.0.rsplit_once('-')?;
        suffix.parse().ok()
    }

    /// The normalized identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for ContentId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}
