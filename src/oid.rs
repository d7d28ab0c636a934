use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// length of a raw object id in bytes
pub const OID_RAWSZ: usize = 20;

/// length of a hex-encoded object id
pub const OID_HEXSZ: usize = 40;

/// shortest hex prefix accepted for prefix lookups
pub const OID_MINPREFIXLEN: usize = 4;

/// SHA-1 object id used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; OID_RAWSZ]);

impl Oid {
    /// zero id (used as "no object" on the wire)
    pub const ZERO: Oid = Oid([0u8; OID_RAWSZ]);

    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; OID_RAWSZ]) -> Self {
        Self(bytes)
    }

    /// create from a raw slice, which must be exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        let arr: [u8; OID_RAWSZ] = bytes
            .try_into()
            .map_err(|_| Error::InvalidOidHex(hex::encode(bytes)))?;
        Ok(Self(arr))
    }

    /// parse from a full 40 digit hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != OID_HEXSZ {
            return Err(Error::InvalidOidHex(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| Error::InvalidOidHex(s.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; OID_RAWSZ] {
        &self.0
    }

    /// convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// abbreviated hex form
    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }

    /// is this the all-zero id
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// split into loose object path components
    /// returns (first 2 hex chars, remaining 38 hex chars)
    pub fn to_path_components(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[..2].to_string(), hex[2..].to_string())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", &self.to_hex()[..12])
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Oid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// the four git object kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// name used in object headers
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    /// parse an object header name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "commit" => Some(ObjectKind::Commit),
            "tree" => Some(ObjectKind::Tree),
            "blob" => Some(ObjectKind::Blob),
            "tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }

    /// type number used in pack files
    pub fn pack_type(&self) -> u8 {
        match self {
            ObjectKind::Commit => 1,
            ObjectKind::Tree => 2,
            ObjectKind::Blob => 3,
            ObjectKind::Tag => 4,
        }
    }

    /// inverse of `pack_type`
    pub fn from_pack_type(ty: u8) -> Option<Self> {
        match ty {
            1 => Some(ObjectKind::Commit),
            2 => Some(ObjectKind::Tree),
            3 => Some(ObjectKind::Blob),
            4 => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// compute the id of an object: SHA-1 over `"<kind> <len>\0" + content`
pub fn hash_object(kind: ObjectKind, content: &[u8]) -> Oid {
    let mut hasher = ObjectHasher::new(kind, content.len() as u64);
    hasher.update(content);
    hasher.finalize()
}

/// streaming object hasher for large workdir files
pub struct ObjectHasher {
    hasher: Sha1,
}

impl ObjectHasher {
    /// create new hasher, writing the object header immediately
    pub fn new(kind: ObjectKind, len: u64) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("{} {}\0", kind.as_str(), len).as_bytes());
        Self { hasher }
    }

    /// feed content bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// finalize and return id
    pub fn finalize(self) -> Oid {
        Oid(self.hasher.finalize().into())
    }
}

/// plain SHA-1 of a byte slice (pack trailers)
pub(crate) fn sha1_digest(data: &[u8]) -> [u8; OID_RAWSZ] {
    Sha1::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_hex_roundtrip() {
        let original = Oid::from_hex("abcdef0123456789abcdef0123456789abcdef01").unwrap();
        let parsed: Oid = original.to_hex().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_oid_invalid_hex() {
        assert!(Oid::from_hex("not valid hex").is_err());
        assert!(Oid::from_hex("abcd").is_err());
        assert!(Oid::from_hex("abcdef0123456789abcdef0123456789abcdef0123").is_err());
        assert!(Oid::from_hex("zzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn test_oid_path_components() {
        let oid = Oid::from_hex("abcdef0123456789abcdef0123456789abcdef01").unwrap();
        let (dir, file) = oid.to_path_components();
        assert_eq!(dir, "ab");
        assert_eq!(file, "cdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_oid_ordering() {
        let a = Oid::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = Oid::from_hex("0000000000000000000000000000000000000002").unwrap();
        assert!(a < b);
        assert!(Oid::ZERO.is_zero());
        assert!(!a.is_zero());
    }

    #[test]
    fn test_hash_matches_git() {
        // `git hash-object -t blob --stdin <<< ""` on an empty input
        assert_eq!(
            hash_object(ObjectKind::Blob, b"").to_hex(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
        // the empty tree
        assert_eq!(
            hash_object(ObjectKind::Tree, b"").to_hex(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
        assert_eq!(
            hash_object(ObjectKind::Blob, b"hello\n").to_hex(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
    }

    #[test]
    fn test_streaming_hasher() {
        let direct = hash_object(ObjectKind::Blob, b"helloworld");
        let mut streaming = ObjectHasher::new(ObjectKind::Blob, 10);
        streaming.update(b"hello");
        streaming.update(b"world");
        assert_eq!(direct, streaming.finalize());
    }

    #[test]
    fn test_object_kind_names() {
        for kind in [
            ObjectKind::Commit,
            ObjectKind::Tree,
            ObjectKind::Blob,
            ObjectKind::Tag,
        ] {
            assert_eq!(ObjectKind::parse(kind.as_str()), Some(kind));
            assert_eq!(ObjectKind::from_pack_type(kind.pack_type()), Some(kind));
        }
        assert_eq!(ObjectKind::parse("ofs-delta"), None);
    }
}
