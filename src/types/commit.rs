use std::fmt;

use crate::error::{Error, Result};
use crate::oid::Oid;

/// an author or committer identity with a timestamp
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// unix timestamp (seconds since epoch)
    pub time: i64,
    /// offset from UTC in minutes
    pub offset_minutes: i32,
}

impl Signature {
    /// create a signature stamped with the current time (UTC)
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        let time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::with_time(name, email, time, 0)
    }

    /// create a signature with an explicit timestamp
    pub fn with_time(
        name: impl Into<String>,
        email: impl Into<String>,
        time: i64,
        offset_minutes: i32,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            time,
            offset_minutes,
        }
    }

    /// parse `Name <email> 1234567890 +0100`
    pub fn parse(text: &str) -> Option<Self> {
        let open = text.find('<')?;
        let close = open + text[open..].find('>')?;
        let name = text[..open].trim_end().to_string();
        let email = text[open + 1..close].to_string();

        let mut rest = text[close + 1..].split_whitespace();
        let time = rest.next()?.parse().ok()?;
        let tz = rest.next().unwrap_or("+0000");
        let (sign, digits) = match tz.as_bytes().first() {
            Some(b'-') => (-1, &tz[1..]),
            Some(b'+') => (1, &tz[1..]),
            _ => (1, tz),
        };
        let hhmm: i32 = digits.parse().ok()?;
        let offset_minutes = sign * ((hhmm / 100) * 60 + hhmm % 100);

        Some(Self {
            name,
            email,
            time,
            offset_minutes,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let offset = self.offset_minutes.abs();
        write!(
            f,
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.time,
            sign,
            offset / 60,
            offset % 60
        )
    }
}

/// a commit object pointing to a tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    /// root tree id
    pub tree: Oid,
    /// parent commit ids (empty for initial, 2+ for merge)
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    pub fn new(
        tree: Oid,
        parents: Vec<Oid>,
        author: Signature,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            parents,
            committer: author.clone(),
            author,
            message: message.into(),
        }
    }

    /// is this an initial commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// first line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// serialize into the raw commit object body
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("tree {}\n", self.tree));
        for parent in &self.parents {
            out.push_str(&format!("parent {}\n", parent));
        }
        out.push_str(&format!("author {}\n", self.author));
        out.push_str(&format!("committer {}\n", self.committer));
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    /// parse a raw commit object body
    pub fn parse(id: Oid, data: &[u8]) -> Result<Self> {
        let corrupt = |message: &str| Error::CorruptObject {
            oid: id,
            message: message.to_string(),
        };
        let text = String::from_utf8_lossy(data);
        let (headers, message) = match text.find("\n\n") {
            Some(pos) => (&text[..pos], &text[pos + 2..]),
            None => (text.as_ref(), ""),
        };

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            // continuation lines (gpgsig, mergetag) start with a space
            if line.starts_with(' ') {
                continue;
            }
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "tree" => tree = Some(Oid::from_hex(value)?),
                "parent" => parents.push(Oid::from_hex(value)?),
                "author" => author = Signature::parse(value),
                "committer" => committer = Signature::parse(value),
                _ => {}
            }
        }

        let author = author.ok_or_else(|| corrupt("missing author"))?;
        Ok(Self {
            tree: tree.ok_or_else(|| corrupt("missing tree"))?,
            parents,
            committer: committer.unwrap_or_else(|| author.clone()),
            author,
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> Signature {
        Signature::with_time("A U Thor", "author@example.com", 1234567890, 60)
    }

    #[test]
    fn test_signature_display_parse() {
        let s = sig();
        let text = s.to_string();
        assert_eq!(text, "A U Thor <author@example.com> 1234567890 +0100");
        assert_eq!(Signature::parse(&text).unwrap(), s);

        let west = Signature::parse("X <x@y> 10 -0230").unwrap();
        assert_eq!(west.offset_minutes, -150);
        assert!(Signature::parse("no email here").is_none());
    }

    #[test]
    fn test_commit_roundtrip() {
        let parent = Oid::from_bytes([1; 20]);
        let c = Commit::new(Oid::from_bytes([2; 20]), vec![parent], sig(), "subject\n\nbody\n");
        let raw = c.serialize();
        let parsed = Commit::parse(Oid::ZERO, &raw).unwrap();
        assert_eq!(parsed, c);
        assert_eq!(parsed.summary(), "subject");
        assert!(!parsed.is_root());
    }

    #[test]
    fn test_commit_parse_skips_signature_block() {
        let raw = format!(
            "tree {}\nauthor {}\ncommitter {}\ngpgsig -----BEGIN PGP SIGNATURE-----\n abc\n -----END PGP SIGNATURE-----\n\nmsg\n",
            Oid::from_bytes([3; 20]),
            sig(),
            sig()
        );
        let c = Commit::parse(Oid::ZERO, raw.as_bytes()).unwrap();
        assert_eq!(c.tree, Oid::from_bytes([3; 20]));
        assert_eq!(c.message, "msg\n");
        assert!(c.is_root());
    }

    #[test]
    fn test_commit_parse_missing_tree() {
        let raw = format!("author {}\n\nmsg", sig());
        assert!(matches!(
            Commit::parse(Oid::ZERO, raw.as_bytes()),
            Err(Error::CorruptObject { .. })
        ));
    }
}
