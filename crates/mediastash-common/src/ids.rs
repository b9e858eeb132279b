//! Typed identifiers for mediastash.
//!
//! Resource ids and qualities end up as file-name components in the cache
//! directory, so both are validated on construction. A [`CacheKey`] is the
//! pair of them and is the unit of deduplication for fetches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Maximum length of a resource identifier.
const MAX_RESOURCE_ID_LEN: usize = 64;

const MIB: u64 = 1024 * 1024;

/// Externally assigned identifier of a media resource.
///
/// Restricted to `[A-Za-z0-9_-]{1,64}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > MAX_RESOURCE_ID_LEN {
            return Err(Error::validation(format!(
                "resource id must be 1-{MAX_RESOURCE_ID_LEN} characters"
            )));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(Error::validation(format!("invalid resource id: {s:?}")));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rendition selector. Each quality of a resource is cached separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Quality {
    P360,
    P480,
    #[default]
    P720,
    P1080,
    P1440,
    P2160,
    P4320,
    /// Let the fetcher pick the best available rendition.
    Best,
    /// Audio only.
    Audio,
}

impl Quality {
    /// All known qualities, lowest first.
    pub const ALL: [Quality; 9] = [
        Quality::P360,
        Quality::P480,
        Quality::P720,
        Quality::P1080,
        Quality::P1440,
        Quality::P2160,
        Quality::P4320,
        Quality::Best,
        Quality::Audio,
    ];

    /// Canonical string form, as used in cache keys and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P360 => "360",
            Self::P480 => "480",
            Self::P720 => "720",
            Self::P1080 => "1080",
            Self::P1440 => "1440",
            Self::P2160 => "2160",
            Self::P4320 => "4320",
            Self::Best => "best",
            Self::Audio => "audio",
        }
    }

    /// Vertical resolution cap, if this quality has one.
    pub fn height(&self) -> Option<u32> {
        match self {
            Self::P360 => Some(360),
            Self::P480 => Some(480),
            Self::P720 => Some(720),
            Self::P1080 => Some(1080),
            Self::P1440 => Some(1440),
            Self::P2160 => Some(2160),
            Self::P4320 => Some(4320),
            Self::Best | Self::Audio => None,
        }
    }

    /// Bytes that must be buffered (roughly ten seconds of playback) before
    /// playback of this quality is allowed to start.
    pub fn buffer_threshold(&self) -> u64 {
        match self {
            Self::P360 | Self::Audio => MIB,
            Self::P480 => 2 * MIB,
            Self::P720 => 4 * MIB,
            Self::P1080 => 8 * MIB,
            Self::P1440 => 12 * MIB,
            Self::P2160 | Self::P4320 | Self::Best => 20 * MIB,
        }
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let normalized = lower.strip_suffix('p').unwrap_or(&lower);
        match normalized {
            "360" => Ok(Self::P360),
            "480" => Ok(Self::P480),
            "720" => Ok(Self::P720),
            "1080" => Ok(Self::P1080),
            "1440" => Ok(Self::P1440),
            "2160" | "4k" => Ok(Self::P2160),
            "4320" | "8k" => Ok(Self::P4320),
            "best" => Ok(Self::Best),
            "audio" => Ok(Self::Audio),
            _ => Err(Error::validation(format!("unknown quality: {s:?}"))),
        }
    }
}

impl TryFrom<String> for Quality {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Quality> for String {
    fn from(q: Quality) -> Self {
        q.as_str().to_string()
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic cache identifier for a (resource, quality) pair.
///
/// Displays as `{resource_id}_{quality}`, which is also the stem of the
/// cached file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    resource_id: ResourceId,
    quality: Quality,
}

impl CacheKey {
    pub fn new(resource_id: ResourceId, quality: Quality) -> Self {
        Self {
            resource_id,
            quality,
        }
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Recover a key from a file stem such as `abc_720`.
    ///
    /// Resource ids may themselves contain underscores, so the quality is
    /// whatever follows the last one.
    pub fn from_stem(stem: &str) -> Option<Self> {
        let (resource, quality) = stem.rsplit_once('_')?;
        Some(Self::new(resource.parse().ok()?, quality.parse().ok()?))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.resource_id, self.quality)
    }
}
