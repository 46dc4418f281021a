//! 20-byte content identifiers and node ids (spec §3, §6 "Content hash").
//!
//! The actual hash function is an external collaborator (spec §1): this
//! module defines the `Digest` shape every identifier shares and a
//! `ContentHasher` trait hosts can plug their own hash into. A
//! [`Sha256ContentHasher`] is provided as a usable default for tests and
//! small embedders; it is not a claim that this crate does identity
//! hashing "for real" — production hosts bring their own implementation,
//! exactly as spec §1 requires.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};

/// A 20-byte content-addressed identifier shared by file content hashes,
/// manifest ids, and revision ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; 20]);

impl Digest {
    /// The all-zero digest, used as the "null content" sentinel (spec §4.6
    /// `try_get_content`).
    pub const NULL: Self = Self([0u8; 20]);

    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Return the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse 40 lowercase hex characters into a digest.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 40 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return None;
        }
        let mut out = [0u8; 20];
        for i in 0..20 {
            out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }

    /// Render as 40 lowercase hex characters.
    #[must_use]
    pub fn to_hex(self) -> String {
        let mut s = String::with_capacity(40);
        for byte in self.0 {
            s.push_str(&format!("{byte:02x}"));
        }
        s
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or_else(|| DigestParseError { raw: s.to_owned() })
    }
}

/// Error returned when a string does not parse as a [`Digest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestParseError {
    /// The raw string that failed to parse.
    pub raw: String,
}

impl fmt::Display for DigestParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected 40 lowercase hex characters, got {:?}", self.raw)
    }
}

impl std::error::Error for DigestParseError {}

macro_rules! digest_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub Digest);

        impl $name {
            /// Wrap a digest.
            #[must_use]
            pub const fn new(digest: Digest) -> Self {
                Self(digest)
            }

            /// The null/sentinel value of this identifier kind.
            pub const NULL: Self = Self(Digest::NULL);

            /// Parse 40 lowercase hex characters into an identifier.
            #[must_use]
            pub fn from_hex(s: &str) -> Option<Self> {
                Digest::from_hex(s).map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = DigestParseError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Digest::from_str(s).map(Self)
            }
        }
    };
}

digest_newtype!(ContentHash, "Identity of a file's bytes.");
digest_newtype!(ManifestId, "Identity of a canonical roster manifest serialization.");
digest_newtype!(RevisionId, "Identity of a revision (content hash of its serialization).");

/// Hashes bytes into a 20-byte [`Digest`]. Out of scope per spec §1 as a
/// "real" cryptographic primitive — this crate only needs *an* injectable
/// function with the right shape; [`Sha256ContentHasher`] is a usable
/// default, not a security claim.
pub trait ContentHasher {
    /// Hash `bytes` into a content identifier.
    fn hash(&self, bytes: &[u8]) -> Digest;
}

/// Default [`ContentHasher`] built on `sha2`, truncated to 20 bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256ContentHasher;

impl ContentHasher for Sha256ContentHasher {
    fn hash(&self, bytes: &[u8]) -> Digest {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[..20]);
        Digest(out)
    }
}

/// A node identity within one roster.
///
/// The high bit distinguishes temporary ids (set, used while building a
/// not-yet-committed roster) from permanent ids (clear, monotonically
/// increasing, drawn from a persistent counter) — spec §3 "Node id source".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

const TEMP_BIT: u64 = 1 << 63;

impl NodeId {
    /// The id of the root directory in a freshly created roster.
    pub const ROOT: Self = Self(1);

    /// Wrap a raw permanent id. Panics if the high bit is already set;
    /// callers that need a temporary id must go through
    /// [`NodeId::from_temp`].
    #[must_use]
    pub const fn from_permanent(raw: u64) -> Self {
        assert!(raw & TEMP_BIT == 0, "permanent node id must not have the high bit set");
        Self(raw)
    }

    /// Wrap a raw temporary id, setting the high bit.
    #[must_use]
    pub const fn from_temp(raw: u64) -> Self {
        Self(raw | TEMP_BIT)
    }

    /// Wrap a raw id verbatim, high bit included, for round-tripping a
    /// previously-serialized decimal id whose temp/permanent status is
    /// already baked into the bit pattern.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw integer value, high bit included.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// True if this id was drawn from a temporary id source.
    #[must_use]
    pub const fn is_temp(self) -> bool {
        self.0 & TEMP_BIT != 0
    }

    /// True if this id was drawn from a permanent id source.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        !self.is_temp()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_temp() {
            write!(f, "NodeId(temp:{})", self.0 & !TEMP_BIT)
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A producer of fresh node ids, injected into roster-building code so
/// that temporary-id and permanent-id construction share one interface
/// (spec §3 "Node id source", §9 "Temporary vs permanent node ids").
pub trait NodeIdSource {
    /// Draw the next fresh id.
    fn next(&mut self) -> NodeId;
}

/// Draws permanent ids from a monotonically increasing counter.
#[derive(Debug, Clone)]
pub struct PermanentIdSource {
    next: u64,
}

impl PermanentIdSource {
    /// Create a source that will hand out ids starting at `start`.
    #[must_use]
    pub const fn starting_at(start: u64) -> Self {
        Self { next: start }
    }
}

impl NodeIdSource for PermanentIdSource {
    fn next(&mut self) -> NodeId {
        let id = NodeId::from_permanent(self.next);
        self.next += 1;
        id
    }
}

/// Draws temporary ids from a monotonically increasing counter, each
/// tagged with the high bit.
#[derive(Debug, Clone, Default)]
pub struct TempIdSource {
    next: u64,
}

impl TempIdSource {
    /// Create a fresh temporary id source.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }
}

impl NodeIdSource for TempIdSource {
    fn next(&mut self) -> NodeId {
        let id = NodeId::from_temp(self.next);
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_hex_roundtrip() {
        let hex = "aabbccddeeff00112233445566778899aabbccdd";
        let d = Digest::from_hex(hex).expect("valid hex");
        assert_eq!(d.to_hex(), hex);
    }

    #[test]
    fn digest_rejects_bad_length_and_case() {
        assert!(Digest::from_hex("aa").is_none());
        assert!(Digest::from_hex(&"AA".repeat(20)).is_none());
    }

    #[test]
    fn node_id_temp_permanent_distinction() {
        let mut temps = TempIdSource::new();
        let mut perms = PermanentIdSource::starting_at(1);
        let t = temps.next();
        let p = perms.next();
        assert!(t.is_temp());
        assert!(p.is_permanent());
        assert_ne!(t.raw(), p.raw());
    }

    #[test]
    fn sha256_hasher_is_deterministic() {
        let hasher = Sha256ContentHasher;
        assert_eq!(hasher.hash(b"hello"), hasher.hash(b"hello"));
        assert_ne!(hasher.hash(b"hello"), hasher.hash(b"world"));
    }
}
