use crate::error::{Error, Result};
use crate::oid::{ObjectKind, Oid};
use crate::types::Signature;

/// an annotated tag object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// object the tag points at
    pub target: Oid,
    pub target_kind: ObjectKind,
    pub name: String,
    pub tagger: Option<Signature>,
    pub message: String,
}

impl Tag {
    /// serialize into the raw tag object body
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("object {}\n", self.target));
        out.push_str(&format!("type {}\n", self.target_kind));
        out.push_str(&format!("tag {}\n", self.name));
        if let Some(tagger) = &self.tagger {
            out.push_str(&format!("tagger {}\n", tagger));
        }
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    /// parse a raw tag object body
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

        let mut target = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;
        for line in headers.lines() {
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "object" => target = Some(Oid::from_hex(value)?),
                "type" => target_kind = ObjectKind::parse(value),
                "tag" => name = Some(value.to_string()),
                "tagger" => tagger = Signature::parse(value),
                _ => {}
            }
        }

        Ok(Self {
            target: target.ok_or_else(|| corrupt("missing object"))?,
            target_kind: target_kind.ok_or_else(|| corrupt("missing or unknown type"))?,
            name: name.ok_or_else(|| corrupt("missing tag name"))?,
            tagger,
            message: message.to_string(),
        })
    }
}
