//! Site identity and the count pair shared by every layer.

use std::borrow::Borrow;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest accepted site identifier, in bytes.
pub const MAX_SITE_ID_LEN: usize = 64;

/// Opaque short token naming a tracked site.
///
/// Cheap to clone. Accepts ASCII alphanumerics, `-` and `_`.
///
/// ```rust
/// use hitcount::SiteId;
///
/// let id = SiteId::new("abc123").unwrap();
/// assert_eq!(id.as_str(), "abc123");
/// assert!(SiteId::new("").is_err());
/// assert!(SiteId::new("has space").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteId(Arc<str>);

impl SiteId {
    /// Validates and wraps `id`.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref();
        let reason = if id.is_empty() {
            Some("empty")
        } else if id.len() > MAX_SITE_ID_LEN {
            Some("longer than 64 bytes")
        } else if !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            Some("only ASCII letters, digits, '-' and '_' are allowed")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::InvalidSiteId {
                id: id.to_string(),
                reason,
            }),
            None => Ok(SiteId(Arc::from(id))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SiteId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        SiteId::new(value)
    }
}

impl From<SiteId> for String {
    fn from(id: SiteId) -> Self {
        id.0.to_string()
    }
}

impl Borrow<str> for SiteId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteId({})", self.0)
    }
}

/// A registered site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

impl Site {
    /// Builds a site stamped with the current time.
    pub fn new(id: SiteId, name: impl Into<String>) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            id,
            name: name.into(),
            created_at,
        }
    }
}

/// A `(total, unique)` visit pair.
///
/// Used for durable counters, buffered deltas, and merged live counts alike.
/// Addition saturates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counts {
    pub total: u64,
    pub unique: u64,
}

impl Counts {
    pub const ZERO: Counts = Counts {
        total: 0,
        unique: 0,
    };

    pub const fn new(total: u64, unique: u64) -> Self {
        Self { total, unique }
    }

    pub const fn is_zero(&self) -> bool {
        self.total == 0 && self.unique == 0
    }
}

impl Add for Counts {
    type Output = Counts;

    fn add(self, rhs: Counts) -> Counts {
        Counts {
            total: self.total.saturating_add(rhs.total),
            unique: self.unique.saturating_add(rhs.unique),
        }
    }
}

impl AddAssign for Counts {
    fn add_assign(&mut self, rhs: Counts) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Counts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "total={} unique={}", self.total, self.unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_id_accepts_tokens() {
        for id in ["abc123", "A-b_c", "x", &"z".repeat(MAX_SITE_ID_LEN)] {
            assert!(SiteId::new(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn test_site_id_rejects_invalid() {
        for id in ["", "a b", "a/b", "ü", &"z".repeat(MAX_SITE_ID_LEN + 1)] {
            assert!(
                matches!(SiteId::new(id), Err(Error::InvalidSiteId { .. })),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_site_id_serde() {
        let id = SiteId::new("abc123").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123\"");
        let back: SiteId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<SiteId>("\"not valid\"").is_err());
    }

    #[test]
    fn test_counts_add() {
        let mut c = Counts::new(5, 3);
        c += Counts::new(2, 1);
        assert_eq!(c, Counts::new(7, 4));
        assert_eq!(Counts::new(u64::MAX, 0) + Counts::new(1, 1), Counts::new(u64::MAX, 1));
    }

    #[test]
    fn test_counts_is_zero() {
        assert!(Counts::ZERO.is_zero());
        assert!(Counts::default().is_zero());
        assert!(!Counts::new(0, 1).is_zero());
    }

    #[test]
    fn test_site_new_stamps_time() {
        let site = Site::new(SiteId::new("abc").unwrap(), "Example");
        assert_eq!(site.name, "Example");
        assert!(site.created_at > 1_600_000_000);
    }
}
