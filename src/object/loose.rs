//! loose object storage: `objects/xx/yyyy...`, zlib-compressed
//! `"<kind> <len>\0<content>"`, exactly as git lays them out.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::write_atomic;
use crate::oid::{hash_object, ObjectKind, Oid, OID_HEXSZ, OID_MINPREFIXLEN};
use crate::repo::Repo;

/// write an object to the store, returning its id
///
/// existing objects are not rewritten.
pub fn write_object(repo: &Repo, kind: ObjectKind, content: &[u8]) -> Result<Oid> {
    let oid = hash_object(kind, content);
    let path = object_path(repo, &oid);

    // dedup: if object already exists, we're done
    if path.exists() {
        return Ok(oid);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let header = format!("{} {}\0", kind.as_str(), content.len());
    encoder
        .write_all(header.as_bytes())
        .and_then(|_| encoder.write_all(content))
        .with_path("<zlib>")?;
    let compressed = encoder.finish().with_path("<zlib>")?;

    write_atomic(&repo.tmp_path(), &path, &compressed)?;

    tracing::trace!(oid = %oid, kind = %kind, size = content.len(), "wrote object");
    Ok(oid)
}

/// read and verify an object, returning its kind and content
pub fn read_object(repo: &Repo, oid: &Oid) -> Result<(ObjectKind, Vec<u8>)> {
    let compressed = read_compressed(repo, oid)?;

    let mut inflated = Vec::new();
    ZlibDecoder::new(&compressed[..])
        .read_to_end(&mut inflated)
        .map_err(|e| Error::CorruptObject {
            oid: *oid,
            message: format!("inflate failed: {}", e),
        })?;

    let (kind, len, header_len) = parse_header(oid, &inflated)?;
    let content = inflated.split_off(header_len);
    if content.len() != len {
        return Err(Error::CorruptObject {
            oid: *oid,
            message: format!("size mismatch: header {} actual {}", len, content.len()),
        });
    }

    // verify hash
    if hash_object(kind, &content) != *oid {
        return Err(Error::CorruptObject {
            oid: *oid,
            message: "hash mismatch".to_string(),
        });
    }

    Ok((kind, content))
}

/// read an object and check it has the expected kind
pub fn read_object_of_kind(repo: &Repo, oid: &Oid, expected: ObjectKind) -> Result<Vec<u8>> {
    let (kind, content) = read_object(repo, oid)?;
    if kind != expected {
        return Err(Error::InvalidObjectType {
            oid: *oid,
            expected: expected.as_str(),
            actual: kind.as_str(),
        });
    }
    Ok(content)
}

/// read only the kind and size of an object, inflating just its header
pub fn read_header(repo: &Repo, oid: &Oid) -> Result<(ObjectKind, usize)> {
    let compressed = read_compressed(repo, oid)?;
    let mut decoder = ZlibDecoder::new(&compressed[..]);
    let mut head = [0u8; 32];
    let mut filled = 0;
    while filled < head.len() {
        let n = decoder.read(&mut head[filled..]).map_err(|e| Error::CorruptObject {
            oid: *oid,
            message: format!("inflate failed: {}", e),
        })?;
        if n == 0 || head[..filled + n].contains(&0) {
            filled += n;
            break;
        }
        filled += n;
    }
    let (kind, len, _) = parse_header(oid, &head[..filled])?;
    Ok((kind, len))
}

/// check if an object exists in the store
pub fn object_exists(repo: &Repo, oid: &Oid) -> bool {
    object_path(repo, oid).is_file()
}

/// get the filesystem path to a loose object
pub fn object_path(repo: &Repo, oid: &Oid) -> PathBuf {
    let (dir, file) = oid.to_path_components();
    repo.objects_path().join(dir).join(file)
}

/// every loose object whose hex id starts with `prefix`
pub fn find_by_prefix(repo: &Repo, prefix: &str) -> Result<Vec<Oid>> {
    let prefix = prefix.to_ascii_lowercase();
    if prefix.len() < OID_MINPREFIXLEN
        || prefix.len() > OID_HEXSZ
        || !prefix.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(Error::InvalidOidHex(prefix));
    }

    let dir = repo.objects_path().join(&prefix[..2]);
    let rest = &prefix[2..];
    let mut matches = Vec::new();

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(matches),
        Err(e) => return Err(Error::Io { path: dir, source: e }),
    };

    for entry in entries {
        let entry = entry.with_path(&dir)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(rest) {
            if let Ok(oid) = Oid::from_hex(&format!("{}{}", &prefix[..2], name)) {
                matches.push(oid);
            }
        }
    }

    matches.sort();
    Ok(matches)
}

/// list every loose object in the store
pub fn list_objects(repo: &Repo) -> Result<Vec<Oid>> {
    let objects = repo.objects_path();
    let mut oids = Vec::new();

    for entry in walkdir::WalkDir::new(&objects).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|e| Error::Io {
            path: objects.clone(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let parent_name = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("");

        if let Ok(oid) = Oid::from_hex(&format!("{}{}", parent_name, file_name)) {
            oids.push(oid);
        }
    }

    Ok(oids)
}

fn read_compressed(repo: &Repo, oid: &Oid) -> Result<Vec<u8>> {
    let path = object_path(repo, oid);
    fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ObjectNotFound(*oid)
        } else {
            Error::Io { path, source: e }
        }
    })
}

/// parse `"<kind> <len>\0"`, returning (kind, len, header length)
fn parse_header(oid: &Oid, data: &[u8]) -> Result<(ObjectKind, usize, usize)> {
    let corrupt = |message: &str| Error::CorruptObject {
        oid: *oid,
        message: message.to_string(),
    };
    let nul = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| corrupt("missing header terminator"))?;
    let header = std::str::from_utf8(&data[..nul]).map_err(|_| corrupt("bad header"))?;
    let (kind, len) = header.split_once(' ').ok_or_else(|| corrupt("bad header"))?;
    let kind = ObjectKind::parse(kind).ok_or_else(|| corrupt("unknown object kind"))?;
    let len = len.parse().map_err(|_| corrupt("bad object size"))?;
    Ok((kind, len, nul + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("work")).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_write_and_read_object() {
        let (_dir, repo) = test_repo();

        let oid = write_object(&repo, ObjectKind::Blob, b"hello\n").unwrap();
        assert_eq!(oid.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
        assert!(object_exists(&repo, &oid));

        let (kind, content) = read_object(&repo, &oid).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(content, b"hello\n");

        assert_eq!(read_header(&repo, &oid).unwrap(), (ObjectKind::Blob, 6));
    }

    #[test]
    fn test_object_deduplication() {
        let (_dir, repo) = test_repo();
        let a = write_object(&repo, ObjectKind::Blob, b"same").unwrap();
        let b = write_object(&repo, ObjectKind::Blob, b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(list_objects(&repo).unwrap(), vec![a]);
    }

    #[test]
    fn test_read_missing_object() {
        let (_dir, repo) = test_repo();
        let result = read_object(&repo, &Oid::from_bytes([0x11; 20]));
        assert!(matches!(result, Err(Error::ObjectNotFound(_))));
    }

    #[test]
    fn test_read_corrupt_object() {
        let (_dir, repo) = test_repo();
        let oid = write_object(&repo, ObjectKind::Blob, b"data").unwrap();
        fs::write(object_path(&repo, &oid), b"garbage").unwrap();
        assert!(matches!(
            read_object(&repo, &oid),
            Err(Error::CorruptObject { .. })
        ));
    }

    #[test]
    fn test_wrong_kind() {
        let (_dir, repo) = test_repo();
        let oid = write_object(&repo, ObjectKind::Blob, b"data").unwrap();
        assert!(matches!(
            read_object_of_kind(&repo, &oid, ObjectKind::Tree),
            Err(Error::InvalidObjectType { .. })
        ));
    }

    #[test]
    fn test_find_by_prefix() {
        let (_dir, repo) = test_repo();
        let oid = write_object(&repo, ObjectKind::Blob, b"hello\n").unwrap();

        assert_eq!(find_by_prefix(&repo, "ce01").unwrap(), vec![oid]);
        assert_eq!(find_by_prefix(&repo, "CE0136").unwrap(), vec![oid]);
        assert!(find_by_prefix(&repo, "ce02").unwrap().is_empty());
        assert!(find_by_prefix(&repo, "ce0").is_err());
        assert!(find_by_prefix(&repo, "zzzz").is_err());
    }
}
