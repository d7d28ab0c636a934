//! pack files: `PACK`, version, object count, then each object as a type and
//! size header followed by zlib data (or a delta against a base), closed by
//! a SHA-1 of everything before it
//!
//! received packs are exploded into loose objects; nothing keeps the pack.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::ops::ControlFlow;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::object::{object_exists, read_object, write_object};
use crate::oid::{sha1_digest, ObjectKind, Oid, OID_RAWSZ};
use crate::repo::Repo;
use crate::transport::{CancelHandle, ProgressCallback, TransferProgress};

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const PACK_HEADER_LEN: usize = 12;
const OBJ_OFS_DELTA: u8 = 6;
const OBJ_REF_DELTA: u8 = 7;

/// encode `oids` as a pack without deltas
pub fn build_pack(repo: &Repo, oids: &[Oid]) -> Result<Vec<u8>> {
    let count = u32::try_from(oids.len())
        .map_err(|_| Error::Protocol(format!("{} objects do not fit one pack", oids.len())))?;

    let mut out = Vec::new();
    out.extend_from_slice(PACK_SIGNATURE);
    out.extend_from_slice(&2u32.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());

    for oid in oids {
        let (kind, data) = read_object(repo, oid)?;
        out.extend_from_slice(&object_header(kind.pack_type(), data.len()));
        out.extend_from_slice(&deflate(&data)?);
    }

    let trailer = sha1_digest(&out);
    out.extend_from_slice(&trailer);
    tracing::debug!(objects = oids.len(), bytes = out.len(), "built pack");
    Ok(out)
}

pub fn write_pack(repo: &Repo, oids: &[Oid], out: &mut impl Write) -> Result<()> {
    let pack = build_pack(repo, oids)?;
    out.write_all(&pack)
        .map_err(|e| Error::transport(format!("failed to send pack: {}", e)))
}

fn object_header(type_num: u8, size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    let mut byte = (type_num << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    while rest > 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);
    out
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::transport(format!("deflate failed: {}", e)))
}

enum Entry {
    Whole(ObjectKind, Vec<u8>),
    OfsDelta { base_offset: usize, delta: Vec<u8> },
    RefDelta { base: Oid, delta: Vec<u8> },
}

/// verify a pack and store every object in it as a loose object
///
/// deltas may refer to bases earlier in the pack, later in the pack (by id),
/// or already in the repository. `progress` sees every parsed and every
/// stored object and can stop the run.
pub fn unpack(
    repo: &Repo,
    pack: &[u8],
    cancel: &CancelHandle,
    progress: &mut ProgressCallback<'_>,
) -> Result<TransferProgress> {
    if pack.len() < PACK_HEADER_LEN + OID_RAWSZ || &pack[..4] != PACK_SIGNATURE {
        return Err(Error::Protocol("not a pack file".to_string()));
    }
    let version = u32::from_be_bytes([pack[4], pack[5], pack[6], pack[7]]);
    if version != 2 && version != 3 {
        return Err(Error::Protocol(format!("unsupported pack version {}", version)));
    }
    let count = u32::from_be_bytes([pack[8], pack[9], pack[10], pack[11]]) as usize;

    let (body, trailer) = pack.split_at(pack.len() - OID_RAWSZ);
    if sha1_digest(body)[..] != trailer[..] {
        return Err(Error::Protocol("pack checksum mismatch".to_string()));
    }

    let mut stats = TransferProgress {
        total_objects: count,
        received_bytes: pack.len() as u64,
        ..Default::default()
    };

    // every object takes at least two bytes, whatever the header claims
    let hint = count.min(body.len() / 2);
    let mut entries = Vec::with_capacity(hint);
    let mut index_by_offset = HashMap::with_capacity(hint);
    let mut pos = PACK_HEADER_LEN;
    for _ in 0..count {
        cancel.check()?;
        let offset = pos;
        let (type_num, size) = read_object_header(body, &mut pos)?;
        let entry = match type_num {
            OBJ_OFS_DELTA => {
                let distance = read_ofs_distance(body, &mut pos)?;
                let base_offset = offset
                    .checked_sub(distance)
                    .ok_or_else(|| corrupt(offset, "delta base before start of pack"))?;
                Entry::OfsDelta {
                    base_offset,
                    delta: inflate(body, &mut pos, size)?,
                }
            }
            OBJ_REF_DELTA => {
                let raw = body
                    .get(pos..pos + OID_RAWSZ)
                    .ok_or_else(|| corrupt(offset, "truncated delta base id"))?;
                let base = Oid::from_slice(raw)?;
                pos += OID_RAWSZ;
                Entry::RefDelta {
                    base,
                    delta: inflate(body, &mut pos, size)?,
                }
            }
            n => {
                let kind = ObjectKind::from_pack_type(n)
                    .ok_or_else(|| corrupt(offset, &format!("unknown object type {}", n)))?;
                Entry::Whole(kind, inflate(body, &mut pos, size)?)
            }
        };
        index_by_offset.insert(offset, entries.len());
        entries.push(entry);

        stats.received_objects += 1;
        report(progress, &stats)?;
    }
    if pos != body.len() {
        return Err(Error::Protocol(format!(
            "{} bytes of garbage after the last object",
            body.len() - pos
        )));
    }

    // (kind, content) of every object resolved so far
    let mut resolved: Vec<Option<(ObjectKind, Vec<u8>)>> = Vec::with_capacity(entries.len());
    let mut index_by_oid = HashMap::with_capacity(entries.len());
    let mut pending = Vec::new();
    for (i, entry) in entries.iter_mut().enumerate() {
        match entry {
            Entry::Whole(kind, data) => {
                let data = std::mem::take(data);
                let oid = write_object(repo, *kind, &data)?;
                index_by_oid.insert(oid, i);
                resolved.push(Some((*kind, data)));
                stats.indexed_objects += 1;
                report(progress, &stats)?;
            }
            Entry::OfsDelta { .. } | Entry::RefDelta { .. } => {
                resolved.push(None);
                pending.push(i);
            }
        }
    }

    while !pending.is_empty() {
        cancel.check()?;
        let before = pending.len();
        let mut still_pending = Vec::new();

        for i in pending {
            let (base, delta) = match &entries[i] {
                Entry::OfsDelta { base_offset, delta } => {
                    let base = index_by_offset
                        .get(base_offset)
                        .and_then(|&j| resolved[j].as_ref())
                        .map(|(kind, data)| (*kind, data.clone()));
                    (base, delta)
                }
                Entry::RefDelta { base, delta } => {
                    let in_pack = index_by_oid
                        .get(base)
                        .and_then(|&j| resolved[j].as_ref())
                        .map(|(kind, data)| (*kind, data.clone()));
                    let base = match in_pack {
                        Some(found) => Some(found),
                        None if object_exists(repo, base) => {
                            stats.local_objects += 1;
                            Some(read_object(repo, base)?)
                        }
                        None => None,
                    };
                    (base, delta)
                }
                Entry::Whole(..) => continue,
            };

            let Some((kind, base_data)) = base else {
                still_pending.push(i);
                continue;
            };
            let data = apply_delta(&base_data, delta)?;
            let oid = write_object(repo, kind, &data)?;
            index_by_oid.insert(oid, i);
            resolved[i] = Some((kind, data));
            stats.indexed_objects += 1;
            report(progress, &stats)?;
        }

        if still_pending.len() == before {
            return Err(Error::Protocol(format!(
                "{} deltas have no base in the pack or repository",
                before
            )));
        }
        pending = still_pending;
    }

    tracing::debug!(
        objects = stats.indexed_objects,
        local = stats.local_objects,
        "unpacked"
    );
    Ok(stats)
}

fn report(progress: &mut ProgressCallback<'_>, stats: &TransferProgress) -> Result<()> {
    match progress(stats) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => Err(Error::UserCancelled),
    }
}

fn corrupt(offset: usize, message: &str) -> Error {
    Error::Protocol(format!("corrupt pack object at offset {}: {}", offset, message))
}

fn next_byte(data: &[u8], pos: &mut usize) -> Result<u8> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| Error::Protocol("truncated pack".to_string()))?;
    *pos += 1;
    Ok(byte)
}

fn read_object_header(data: &[u8], pos: &mut usize) -> Result<(u8, usize)> {
    let mut byte = next_byte(data, pos)?;
    let type_num = (byte >> 4) & 0x07;
    let mut size = (byte & 0x0f) as usize;
    let mut shift = 4;
    while byte & 0x80 != 0 {
        byte = next_byte(data, pos)?;
        if shift > 57 {
            return Err(Error::Protocol("object size overflows".to_string()));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
    }
    Ok((type_num, size))
}

/// offset encoding where each continuation adds one before shifting
fn read_ofs_distance(data: &[u8], pos: &mut usize) -> Result<usize> {
    let mut byte = next_byte(data, pos)?;
    let mut value = (byte & 0x7f) as usize;
    while byte & 0x80 != 0 {
        byte = next_byte(data, pos)?;
        value = value
            .checked_add(1)
            .and_then(|v| v.checked_mul(128))
            .ok_or_else(|| Error::Protocol("delta offset overflows".to_string()))?
            | (byte & 0x7f) as usize;
    }
    Ok(value)
}

fn inflate(data: &[u8], pos: &mut usize, size: usize) -> Result<Vec<u8>> {
    let mut decoder = flate2::bufread::ZlibDecoder::new(&data[*pos..]);
    // the size is the remote's claim; read one byte past it to catch liars
    let mut out = Vec::with_capacity(size.min(data.len() - *pos));
    (&mut decoder)
        .take((size as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| Error::Protocol(format!("inflate failed at offset {}: {}", *pos, e)))?;
    if out.len() != size {
        return Err(corrupt(
            *pos,
            &format!("inflated to {} bytes, header says {}", out.len(), size),
        ));
    }
    *pos += decoder.total_in() as usize;
    Ok(out)
}

fn read_size(delta: &[u8], pos: &mut usize) -> Result<usize> {
    let mut size = 0usize;
    let mut shift = 0;
    loop {
        let byte = next_byte(delta, pos)?;
        if shift > 57 {
            return Err(Error::Protocol("delta size overflows".to_string()));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}

/// rebuild an object from its base and a copy/insert instruction stream
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let bad = |message: &str| Error::Protocol(format!("bad delta: {}", message));

    let mut pos = 0;
    let base_size = read_size(delta, &mut pos)?;
    let result_size = read_size(delta, &mut pos)?;
    if base_size != base.len() {
        return Err(bad("base size mismatch"));
    }

    let mut out = Vec::with_capacity(result_size.min(base.len() + delta.len()));
    while pos < delta.len() {
        let op = next_byte(delta, &mut pos)?;
        if op & 0x80 != 0 {
            let mut offset = 0usize;
            for i in 0..4 {
                if op & (1 << i) != 0 {
                    offset |= (next_byte(delta, &mut pos)? as usize) << (8 * i);
                }
            }
            let mut len = 0usize;
            for i in 0..3 {
                if op & (0x10 << i) != 0 {
                    len |= (next_byte(delta, &mut pos)? as usize) << (8 * i);
                }
            }
            if len == 0 {
                len = 0x10000;
            }
            let end = offset
                .checked_add(len)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| bad("copy outside base"))?;
            out.extend_from_slice(&base[offset..end]);
        } else if op != 0 {
            let end = pos + op as usize;
            let literal = delta.get(pos..end).ok_or_else(|| bad("truncated insert"))?;
            out.extend_from_slice(literal);
            pos = end;
        } else {
            return Err(bad("reserved opcode 0"));
        }
    }

    if out.len() != result_size {
        return Err(bad("result size mismatch"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{read_blob, write_blob};
    use crate::oid::hash_object;
    use tempfile::tempdir;

    fn repo(dir: &tempfile::TempDir, name: &str) -> Repo {
        Repo::init(&dir.path().join(name)).unwrap()
    }

    fn no_progress() -> impl FnMut(&TransferProgress) -> ControlFlow<()> {
        |_| ControlFlow::Continue(())
    }

    /// delta that copies all of `base` then inserts `suffix`
    fn append_delta(base: &[u8], suffix: &[u8]) -> Vec<u8> {
        assert!(base.len() < 128 && base.len() + suffix.len() < 128 && suffix.len() < 128);
        let mut delta = vec![base.len() as u8, (base.len() + suffix.len()) as u8];
        // copy: offset omitted (0), one size byte
        delta.push(0x80 | 0x10);
        delta.push(base.len() as u8);
        delta.push(suffix.len() as u8);
        delta.extend_from_slice(suffix);
        delta
    }

    fn finish(mut pack: Vec<u8>) -> Vec<u8> {
        let trailer = sha1_digest(&pack);
        pack.extend_from_slice(&trailer);
        pack
    }

    fn header(count: u32) -> Vec<u8> {
        let mut pack = PACK_SIGNATURE.to_vec();
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&count.to_be_bytes());
        pack
    }

    #[test]
    fn test_build_then_unpack_into_other_repo() {
        let dir = tempdir().unwrap();
        let src = repo(&dir, "src");
        let dst = repo(&dir, "dst");
        let big = vec![7u8; 5000];
        let oids = vec![
            write_blob(&src, b"hello").unwrap(),
            write_blob(&src, &big).unwrap(),
        ];

        let pack = build_pack(&src, &oids).unwrap();
        let mut calls = 0;
        let stats = unpack(&dst, &pack, &CancelHandle::default(), &mut |_| {
            calls += 1;
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(stats.total_objects, 2);
        assert_eq!(stats.indexed_objects, 2);
        assert_eq!(calls, 4);
        assert_eq!(read_blob(&dst, &oids[1]).unwrap(), big);
    }

    #[test]
    fn test_ofs_and_ref_deltas() {
        let dir = tempdir().unwrap();
        let dst = repo(&dir, "dst");
        let base = b"base content".to_vec();
        let ofs_target = b"base content, extended".to_vec();
        let ref_target = b"base content!".to_vec();

        let mut pack = header(3);
        pack.extend_from_slice(&object_header(3, base.len()));
        pack.extend_from_slice(&deflate(&base).unwrap());

        let ofs_at = pack.len();
        let delta = append_delta(&base, b", extended");
        pack.extend_from_slice(&object_header(OBJ_OFS_DELTA, delta.len()));
        // single byte distance back to the base at offset 12
        pack.push((ofs_at - PACK_HEADER_LEN) as u8);
        pack.extend_from_slice(&deflate(&delta).unwrap());

        let delta = append_delta(&base, b"!");
        pack.extend_from_slice(&object_header(OBJ_REF_DELTA, delta.len()));
        pack.extend_from_slice(hash_object(ObjectKind::Blob, &base).as_bytes());
        pack.extend_from_slice(&deflate(&delta).unwrap());

        let stats =
            unpack(&dst, &finish(pack), &CancelHandle::default(), &mut no_progress()).unwrap();
        assert_eq!(stats.indexed_objects, 3);
        let ofs_oid = hash_object(ObjectKind::Blob, &ofs_target);
        let ref_oid = hash_object(ObjectKind::Blob, &ref_target);
        assert_eq!(read_blob(&dst, &ofs_oid).unwrap(), ofs_target);
        assert_eq!(read_blob(&dst, &ref_oid).unwrap(), ref_target);
    }

    #[test]
    fn test_ref_delta_against_local_object() {
        let dir = tempdir().unwrap();
        let dst = repo(&dir, "dst");
        let base_oid = write_blob(&dst, b"already here").unwrap();

        let delta = append_delta(b"already here", b" and more");
        let mut pack = header(1);
        pack.extend_from_slice(&object_header(OBJ_REF_DELTA, delta.len()));
        pack.extend_from_slice(base_oid.as_bytes());
        pack.extend_from_slice(&deflate(&delta).unwrap());

        let stats =
            unpack(&dst, &finish(pack), &CancelHandle::default(), &mut no_progress()).unwrap();
        assert_eq!(stats.local_objects, 1);
        let oid = hash_object(ObjectKind::Blob, b"already here and more");
        assert!(object_exists(&dst, &oid));
    }

    #[test]
    fn test_missing_base_and_bad_checksum() {
        let dir = tempdir().unwrap();
        let dst = repo(&dir, "dst");

        let delta = append_delta(b"nowhere", b"!");
        let mut pack = header(1);
        pack.extend_from_slice(&object_header(OBJ_REF_DELTA, delta.len()));
        pack.extend_from_slice(&[9u8; OID_RAWSZ]);
        pack.extend_from_slice(&deflate(&delta).unwrap());
        let mut pack = finish(pack);
        assert!(matches!(
            unpack(&dst, &pack, &CancelHandle::default(), &mut no_progress()),
            Err(Error::Protocol(_))
        ));

        let last = pack.len() - 1;
        pack[last] ^= 0xff;
        let err = unpack(&dst, &pack, &CancelHandle::default(), &mut no_progress()).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_progress_break_and_cancel() {
        let dir = tempdir().unwrap();
        let src = repo(&dir, "src");
        let oids = vec![write_blob(&src, b"a").unwrap(), write_blob(&src, b"b").unwrap()];
        let pack = build_pack(&src, &oids).unwrap();

        let err = unpack(&src, &pack, &CancelHandle::default(), &mut |_| ControlFlow::Break(()))
            .unwrap_err();
        assert!(matches!(err, Error::UserCancelled));

        let cancel = CancelHandle::default();
        cancel.cancel();
        let err = unpack(&src, &pack, &cancel, &mut no_progress()).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_apply_delta_rejects_bad_input() {
        assert!(apply_delta(b"abc", &[4, 1, 1, b'x']).is_err());
        assert!(apply_delta(b"abc", &[3, 1, 0]).is_err());
        assert!(apply_delta(b"abc", &[3, 9, 0x91, 0, 9]).is_err());
        assert_eq!(apply_delta(b"abc", &[3, 2, 0x91, 1, 2]).unwrap(), b"bc");
    }

    #[test]
    fn test_oversized_header_claims_are_protocol_errors() {
        let dir = tempdir().unwrap();
        let dst = repo(&dir, "dst");

        // a blob claiming roughly 2^53 bytes of content
        let mut pack = header(1);
        pack.extend_from_slice(&[0xb0, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7f]);
        pack.extend_from_slice(&deflate(b"tiny").unwrap());
        let err = unpack(&dst, &finish(pack), &CancelHandle::default(), &mut no_progress())
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        // an object count no body could hold
        let mut pack = header(u32::MAX);
        pack.extend_from_slice(&object_header(3, 4));
        pack.extend_from_slice(&deflate(b"tiny").unwrap());
        let err = unpack(&dst, &finish(pack), &CancelHandle::default(), &mut no_progress())
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        // content longer than its header says
        let mut pack = header(1);
        pack.extend_from_slice(&object_header(3, 2));
        pack.extend_from_slice(&deflate(b"much longer").unwrap());
        let err = unpack(&dst, &finish(pack), &CancelHandle::default(), &mut no_progress())
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_delta_result_size_is_not_trusted() {
        // result size varint claims about 2^56 bytes
        let delta = [3, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01, 0x91, 0, 3];
        assert!(apply_delta(b"abc", &delta).is_err());
    }

    #[test]
    fn test_object_header_roundtrip_sizes() {
        for size in [0usize, 15, 16, 127, 128, 5000, 1 << 20] {
            let encoded = object_header(3, size);
            let mut pos = 0;
            assert_eq!(read_object_header(&encoded, &mut pos).unwrap(), (3, size));
            assert_eq!(pos, encoded.len());
        }
    }
}
