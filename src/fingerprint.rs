//! Visitor fingerprints.
//!
//! A fingerprint is a 16-byte blake3 digest of `client_address ":" user_agent`.
//! It is an identity heuristic, not a security boundary. Visitors behind one
//! NAT with the same browser share a fingerprint, and that is accepted.

use std::fmt;

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 16;

/// Deterministic digest identifying an approximate visitor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Digests `client_address ":" user_agent`.
    ///
    /// ```rust
    /// use hitcount::Fingerprint;
    ///
    /// let a = Fingerprint::new("203.0.113.7", "Mozilla/5.0");
    /// let b = Fingerprint::new("203.0.113.7", "Mozilla/5.0");
    /// assert_eq!(a, b);
    /// assert_ne!(a, Fingerprint::new("203.0.113.8", "Mozilla/5.0"));
    /// ```
    pub fn new(client_address: &str, user_agent: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(client_address.as_bytes());
        hasher.update(b":");
        hasher.update(user_agent.as_bytes());
        let hash = hasher.finalize();

        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&hash.as_bytes()[..FINGERPRINT_LEN]);
        Fingerprint(bytes)
    }

    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Fingerprint(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// The first eight bytes as a little-endian `u64`.
    ///
    /// The digest is already uniformly distributed, so sketches use this
    /// directly instead of hashing again.
    pub fn hash64(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(word)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(")?;
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "…)")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
