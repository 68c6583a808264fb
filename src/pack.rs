//! Codec for the git smart-protocol wire format.
//!
//! A receive-pack request body is a command section of pkt-lines (ref
//! updates), a flush packet, then a raw packfile. This module scans the
//! framing, walks the pack's object entries without trusting any of them,
//! and extracts the commit objects the policy chain inspects. It also
//! builds the sideband error frame git clients render when a push is
//! refused.
//!
//! Nothing here touches the filesystem or spawns a process; the codec is
//! pure and total over untrusted bytes, returning [`PackError`] for every
//! malformed input.

use flate2::{Decompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::action::{CommitData, ZERO_SHA};
use crate::error::PackError;

/// Signature the pack payload must begin with.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// Upper bound on an inflated commit object kept in memory.
const MAX_COMMIT_BYTES: u64 = 10 * 1024 * 1024;

// ============================================================================
// pkt-line framing
// ============================================================================

/// One pkt-line from the command section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PktLine<'a> {
    /// Sideband channel byte, when one prefixes the payload.
    pub channel: Option<u8>,
    /// Payload with the length header (and channel byte) stripped.
    pub payload: &'a [u8],
}

fn parse_pkt_len(header: &[u8]) -> Result<usize, PackError> {
    let text = std::str::from_utf8(header).map_err(|_| PackError::BadLengthHeader {
        header: String::from_utf8_lossy(header).into_owned(),
    })?;
    usize::from_str_radix(text, 16).map_err(|_| PackError::BadLengthHeader {
        header: text.to_string(),
    })
}

/// Split a body into the pkt-lines before the first flush packet and the
/// raw bytes after it.
pub fn split_pkt_section(body: &[u8]) -> Result<(Vec<PktLine<'_>>, &[u8]), PackError> {
    let mut lines = Vec::new();
    let mut cursor = 0usize;
    loop {
        let remaining = body.len() - cursor;
        if remaining < 4 {
            return Err(PackError::TruncatedLine {
                declared: 4,
                remaining,
            });
        }
        let header = &body[cursor..cursor + 4];
        let len = parse_pkt_len(header)?;
        if len == 0 {
            cursor += 4;
            break;
        }
        if len < 4 {
            return Err(PackError::BadLengthHeader {
                header: String::from_utf8_lossy(header).into_owned(),
            });
        }
        if len > remaining {
            return Err(PackError::TruncatedLine {
                declared: len,
                remaining,
            });
        }
        let mut payload = &body[cursor + 4..cursor + len];
        let channel = match payload.first() {
            Some(byte @ 1..=3) => {
                payload = &payload[1..];
                Some(*byte)
            }
            _ => None,
        };
        lines.push(PktLine { channel, payload });
        cursor += len;
    }
    Ok((lines, &body[cursor..]))
}

// ============================================================================
// Ref updates
// ============================================================================

/// A single `old new ref` command from the request's command section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    /// Object id the client believes the ref currently points at.
    pub old_id: String,
    /// Object id the ref should point at after the push.
    pub new_id: String,
    /// Fully qualified ref name, capabilities excluded.
    pub ref_name: String,
    /// Capability list from after the NUL of the first command, if present.
    pub capabilities: Option<String>,
}

fn is_object_id(text: &str) -> bool {
    text.len() == 40 && text.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_ref_update(payload: &[u8]) -> Result<RefUpdate, PackError> {
    let bad = || PackError::BadRefUpdate {
        line: String::from_utf8_lossy(payload).into_owned(),
    };
    let text = std::str::from_utf8(payload).map_err(|_| bad())?;
    let text = text.strip_suffix('\n').unwrap_or(text);
    let (line, capabilities) = match text.split_once('\0') {
        Some((line, caps)) => (line, Some(caps.to_string())),
        None => (text, None),
    };
    let mut parts = line.splitn(3, ' ');
    let old_id = parts.next().ok_or_else(bad)?;
    let new_id = parts.next().ok_or_else(bad)?;
    let ref_name = parts.next().ok_or_else(bad)?;
    if !is_object_id(old_id) || !is_object_id(new_id) || ref_name.is_empty() {
        return Err(bad());
    }
    Ok(RefUpdate {
        old_id: old_id.to_string(),
        new_id: new_id.to_string(),
        ref_name: ref_name.to_string(),
        capabilities,
    })
}

/// Parse a receive-pack request body into its ref updates and the raw pack
/// bytes that follow the flush packet.
///
/// A body with no ref update, or with nothing after the flush, is refused:
/// every push this gateway accepts carries both.
pub fn split_receive_body(body: &[u8]) -> Result<(Vec<RefUpdate>, &[u8]), PackError> {
    let (lines, rest) = split_pkt_section(body)?;
    let updates = lines
        .iter()
        .map(|line| parse_ref_update(line.payload))
        .collect::<Result<Vec<_>, _>>()?;
    if updates.is_empty() {
        return Err(PackError::BadRefUpdate {
            line: String::new(),
        });
    }
    if rest.is_empty() {
        return Err(PackError::MissingPack);
    }
    Ok((updates, rest))
}

// ============================================================================
// Pack walk
// ============================================================================

/// The pack header, kept for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackMeta {
    /// Always `PACK` on accepted payloads.
    pub sig: String,
    /// Pack format version, 2 or 3.
    pub version: u32,
    /// Declared object count.
    pub entries: u32,
}

/// Pack entry object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
    OfsDelta,
    RefDelta,
}

impl ObjectKind {
    fn from_code(code: u8, offset: usize) -> Result<ObjectKind, PackError> {
        match code {
            1 => Ok(ObjectKind::Commit),
            2 => Ok(ObjectKind::Tree),
            3 => Ok(ObjectKind::Blob),
            4 => Ok(ObjectKind::Tag),
            6 => Ok(ObjectKind::OfsDelta),
            7 => Ok(ObjectKind::RefDelta),
            kind => Err(PackError::UnknownObjectType { kind, offset }),
        }
    }

    /// The loose-object type name, as used in object id hashing.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
            ObjectKind::OfsDelta => "ofs-delta",
            ObjectKind::RefDelta => "ref-delta",
        }
    }
}

/// One walked pack entry.
///
/// Delta entries are advanced over but not resolved, so they carry neither
/// payload nor id; full entries other than commits are inflated and
/// discarded to keep memory flat.
#[derive(Debug, Clone)]
pub struct PackObject {
    pub kind: ObjectKind,
    /// Declared inflated size.
    pub size: u64,
    /// Byte offset of the entry header within the pack.
    pub offset: usize,
    /// Object id, computed for kept (commit) payloads.
    pub id: Option<String>,
    /// Inflated bytes, kept for commits.
    pub payload: Option<Vec<u8>>,
}

/// The object id git would assign: `sha1("<kind> <len>\0" + payload)`.
pub fn object_id(kind: &str, payload: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_bytes());
    hasher.update(b" ");
    hasher.update(payload.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

fn parse_object_header(data: &[u8], offset: usize) -> Result<(ObjectKind, u64, usize), PackError> {
    let truncated = |idx: usize| PackError::TruncatedPack {
        offset,
        details: format!("object header ended after {idx} bytes"),
    };
    let first = *data.first().ok_or_else(|| truncated(0))?;
    let kind = ObjectKind::from_code((first >> 4) & 0x07, offset)?;
    let mut size = u64::from(first & 0x0F);
    let mut shift = 4u32;
    let mut idx = 1usize;
    let mut more = first & 0x80 != 0;
    while more {
        let byte = *data.get(idx).ok_or_else(|| truncated(idx))?;
        if shift > 57 {
            return Err(PackError::TruncatedPack {
                offset,
                details: "object size varint overflows".to_string(),
            });
        }
        size |= u64::from(byte & 0x7F) << shift;
        shift += 7;
        idx += 1;
        more = byte & 0x80 != 0;
    }
    Ok((kind, size, idx))
}

fn delta_base_len(kind: ObjectKind, data: &[u8], offset: usize) -> Result<usize, PackError> {
    match kind {
        ObjectKind::OfsDelta => {
            // Base offset varint: continuation is in the high bit.
            let mut idx = 0usize;
            loop {
                let byte = *data.get(idx).ok_or(PackError::TruncatedPack {
                    offset,
                    details: "delta base offset truncated".to_string(),
                })?;
                idx += 1;
                if byte & 0x80 == 0 {
                    return Ok(idx);
                }
                if idx > 12 {
                    return Err(PackError::TruncatedPack {
                        offset,
                        details: "delta base offset varint overflows".to_string(),
                    });
                }
            }
        }
        ObjectKind::RefDelta => {
            if data.len() < 20 {
                return Err(PackError::TruncatedPack {
                    offset,
                    details: "delta base id truncated".to_string(),
                });
            }
            Ok(20)
        }
        _ => Ok(0),
    }
}

fn inflate_object(
    data: &[u8],
    offset: usize,
    declared: u64,
    keep: bool,
) -> Result<(Option<Vec<u8>>, usize), PackError> {
    if keep && declared > MAX_COMMIT_BYTES {
        return Err(PackError::Inflate {
            offset,
            details: format!("commit object declares {declared} bytes"),
        });
    }
    let mut inflater = Decompress::new(true);
    let mut kept = if keep {
        Vec::with_capacity(declared as usize + 1)
    } else {
        Vec::new()
    };
    let mut scratch = [0u8; 8192];
    loop {
        let consumed = inflater.total_in() as usize;
        let input = &data[consumed..];
        let status = if keep {
            inflater.decompress_vec(input, &mut kept, FlushDecompress::None)
        } else {
            inflater.decompress(input, &mut scratch, FlushDecompress::None)
        }
        .map_err(|e| PackError::Inflate {
            offset,
            details: e.to_string(),
        })?;
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if kept.len() as u64 > declared {
                    return Err(PackError::Inflate {
                        offset,
                        details: format!("object exceeds its declared size of {declared} bytes"),
                    });
                }
                if input.is_empty() {
                    return Err(PackError::TruncatedPack {
                        offset,
                        details: "zlib stream ended before its end marker".to_string(),
                    });
                }
            }
        }
    }
    if inflater.total_out() != declared {
        return Err(PackError::Inflate {
            offset,
            details: format!(
                "declared size {declared}, inflated {}",
                inflater.total_out()
            ),
        });
    }
    let consumed = inflater.total_in() as usize;
    Ok((keep.then_some(kept), consumed))
}

/// Walk every entry of a pack payload.
///
/// Commit objects come back inflated with their computed object ids; all
/// other entries are advanced over. The trailing pack checksum is not
/// verified, delivery to a real `git receive-pack` does that.
pub fn parse_pack(pack: &[u8]) -> Result<(PackMeta, Vec<PackObject>), PackError> {
    if pack.len() < 12 {
        return Err(PackError::TruncatedPack {
            offset: 0,
            details: format!("pack header needs 12 bytes, got {}", pack.len()),
        });
    }
    if &pack[0..4] != PACK_SIGNATURE {
        return Err(PackError::MissingPack);
    }
    let version = u32::from_be_bytes([pack[4], pack[5], pack[6], pack[7]]);
    if !(2..=3).contains(&version) {
        return Err(PackError::UnsupportedVersion { version });
    }
    let entries = u32::from_be_bytes([pack[8], pack[9], pack[10], pack[11]]);
    let meta = PackMeta {
        sig: "PACK".to_string(),
        version,
        entries,
    };

    let mut objects = Vec::with_capacity(entries.min(4096) as usize);
    let mut cursor = 12usize;
    for _ in 0..entries {
        let (kind, size, header_len) = parse_object_header(&pack[cursor..], cursor)?;
        let mut stream_start = cursor + header_len;
        stream_start += delta_base_len(kind, &pack[stream_start..], cursor)?;
        let keep = kind == ObjectKind::Commit;
        let (payload, stream_len) = inflate_object(&pack[stream_start..], stream_start, size, keep)?;
        let id = payload.as_deref().map(|p| object_id(kind.as_str(), p));
        objects.push(PackObject {
            kind,
            size,
            offset: cursor,
            id,
            payload,
        });
        cursor = stream_start + stream_len;
    }
    Ok((meta, objects))
}

// ============================================================================
// Commit extraction
// ============================================================================

fn parse_person(line: &str) -> Option<(String, String, i64)> {
    let open = line.find('<')?;
    let close = open + line[open..].find('>')?;
    let name = line[..open].trim();
    let email = &line[open + 1..close];
    let epoch: i64 = line[close + 1..].split_whitespace().next()?.parse().ok()?;
    if name.is_empty() || email.is_empty() {
        return None;
    }
    Some((name.to_string(), email.to_string(), epoch))
}

/// Parse an inflated commit object into the fields the policy chain reads.
pub fn parse_commit(payload: &[u8]) -> Result<CommitData, PackError> {
    let text = std::str::from_utf8(payload).map_err(|_| PackError::InvalidCommitData)?;
    let mut lines = text.split('\n');

    let mut tree = None;
    let mut parent = None;
    let mut author_line = None;
    let mut committer_line = None;
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        match line.split_once(' ') {
            Some(("tree", value)) if tree.is_none() => tree = Some(value.trim().to_string()),
            Some(("parent", value)) if parent.is_none() => parent = Some(value.trim().to_string()),
            Some(("author", value)) if author_line.is_none() => author_line = Some(value),
            Some(("committer", value)) if committer_line.is_none() => committer_line = Some(value),
            _ => {}
        }
    }

    let mut message_lines: Vec<&str> = lines.collect();
    while message_lines.last() == Some(&"") {
        message_lines.pop();
    }
    let message = message_lines.join(" ");

    let tree = tree.ok_or(PackError::InvalidCommitData)?;
    let (author, author_email, _) =
        parse_person(author_line.ok_or(PackError::InvalidCommitData)?)
            .ok_or(PackError::InvalidCommitData)?;
    let (committer, committer_email, commit_timestamp) =
        parse_person(committer_line.ok_or(PackError::InvalidCommitData)?)
            .ok_or(PackError::InvalidCommitData)?;
    if message.is_empty() {
        return Err(PackError::InvalidCommitData);
    }

    Ok(CommitData {
        tree,
        parent: parent.unwrap_or_else(|| ZERO_SHA.to_string()),
        author,
        committer,
        author_email,
        committer_email,
        commit_timestamp,
        message,
    })
}

/// The commit entries of a walked pack, in pack order.
pub fn commit_data(objects: &[PackObject]) -> Result<Vec<CommitData>, PackError> {
    objects
        .iter()
        .filter(|object| object.kind == ObjectKind::Commit)
        .map(|object| {
            let payload = object.payload.as_deref().ok_or(PackError::InvalidCommitData)?;
            parse_commit(payload)
        })
        .collect()
}

// ============================================================================
// Error frame
// ============================================================================

/// The sideband error frame a git client renders as `remote: <message>`.
///
/// The message rides channel 2 prefixed with a tab, followed by a flush
/// packet, inside an HTTP 200 so clients do not retry.
pub fn error_packet(message: &str) -> String {
    let error_message = format!("\t{message}");
    let len = 6 + error_message.len();
    format!("{len:04x}\u{0002}{error_message}\n0000")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use proptest::prelude::*;

    use super::*;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn object_header(kind: u8, mut size: u64) -> Vec<u8> {
        let mut out = Vec::new();
        let mut byte = (kind << 4) | (size & 0x0F) as u8;
        size >>= 4;
        while size > 0 {
            out.push(byte | 0x80);
            byte = (size & 0x7F) as u8;
            size >>= 7;
        }
        out.push(byte);
        out
    }

    fn pack_of(entries: &[(u8, &[u8])]) -> Vec<u8> {
        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for (kind, payload) in entries {
            pack.extend_from_slice(&object_header(*kind, payload.len() as u64));
            pack.extend_from_slice(&deflate(payload));
        }
        pack
    }

    fn pkt(payload: &str) -> String {
        format!("{:04x}{payload}", payload.len() + 4)
    }

    const COMMIT: &str = "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
        parent 1111111111111111111111111111111111111111\n\
        author Alice Smith <alice@example.com> 1700000000 +0000\n\
        committer Alice Smith <alice@example.com> 1700000001 +0000\n\
        \n\
        Add feature\n";

    #[test]
    fn test_split_pkt_section() {
        let body = format!("{}{}0000rest", pkt("first"), pkt("second"));
        let (lines, rest) = split_pkt_section(body.as_bytes()).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].payload, b"first");
        assert_eq!(lines[1].payload, b"second");
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn test_pkt_sideband_byte_is_stripped() {
        let body = format!("{}0000", pkt("\u{0002}\tnope\n"));
        let (lines, _) = split_pkt_section(body.as_bytes()).unwrap();
        assert_eq!(lines[0].channel, Some(2));
        assert_eq!(lines[0].payload, b"\tnope\n");
    }

    #[test]
    fn test_pkt_bad_length_header() {
        let err = split_pkt_section(b"zzzzoops").unwrap_err();
        assert!(matches!(err, PackError::BadLengthHeader { .. }));
    }

    #[test]
    fn test_pkt_truncated_line() {
        let err = split_pkt_section(b"0064short").unwrap_err();
        assert!(matches!(
            err,
            PackError::TruncatedLine { declared: 0x64, .. }
        ));
    }

    #[test]
    fn test_ref_update_with_capabilities() {
        let old = "a".repeat(40);
        let new = "b".repeat(40);
        let line = format!("{old} {new} refs/heads/main\0report-status side-band-64k\n");
        let update = parse_ref_update(line.as_bytes()).unwrap();
        assert_eq!(update.old_id, old);
        assert_eq!(update.new_id, new);
        assert_eq!(update.ref_name, "refs/heads/main");
        assert_eq!(
            update.capabilities.as_deref(),
            Some("report-status side-band-64k")
        );
    }

    #[test]
    fn test_ref_update_rejects_short_ids() {
        let err = parse_ref_update(b"abc def refs/heads/main").unwrap_err();
        assert!(matches!(err, PackError::BadRefUpdate { .. }));
    }

    #[test]
    fn test_receive_body_without_pack_is_refused() {
        let old = "a".repeat(40);
        let new = "b".repeat(40);
        let body = format!("{}0000", pkt(&format!("{old} {new} refs/heads/main")));
        assert_eq!(
            split_receive_body(body.as_bytes()).unwrap_err(),
            PackError::MissingPack
        );
    }

    #[test]
    fn test_parse_pack_extracts_commits() {
        let pack = pack_of(&[
            (1, COMMIT.as_bytes()),
            (3, b"payload bytes"),
            (2, b"tree bytes"),
        ]);
        let (meta, objects) = parse_pack(&pack).unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!(meta.entries, 3);
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0].kind, ObjectKind::Commit);
        assert!(objects[0].payload.is_some());
        assert!(objects[1].payload.is_none());

        let commits = commit_data(&objects).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].author, "Alice Smith");
        assert_eq!(commits[0].author_email, "alice@example.com");
        assert_eq!(commits[0].commit_timestamp, 1700000001);
        assert_eq!(commits[0].message, "Add feature");
        assert_eq!(
            commits[0].parent,
            "1111111111111111111111111111111111111111"
        );
    }

    #[test]
    fn test_parse_pack_skips_delta_entries() {
        let delta = b"\x00\x01\x02\x03delta";
        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&2u32.to_be_bytes());
        // ofs-delta: one-byte negative offset, then the compressed delta
        pack.extend_from_slice(&object_header(6, delta.len() as u64));
        pack.push(0x05);
        pack.extend_from_slice(&deflate(delta));
        pack.extend_from_slice(&object_header(3, 4));
        pack.extend_from_slice(&deflate(b"blob"));
        let (_, objects) = parse_pack(&pack).unwrap();
        assert_eq!(objects[0].kind, ObjectKind::OfsDelta);
        assert!(objects[0].payload.is_none());
        assert_eq!(objects[1].kind, ObjectKind::Blob);
    }

    #[test]
    fn test_parse_pack_rejects_bad_signature() {
        let err = parse_pack(b"JUNKxxxxxxxxxxxx").unwrap_err();
        assert_eq!(err, PackError::MissingPack);
    }

    #[test]
    fn test_parse_pack_rejects_bad_version() {
        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&9u32.to_be_bytes());
        pack.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(
            parse_pack(&pack).unwrap_err(),
            PackError::UnsupportedVersion { version: 9 }
        );
    }

    #[test]
    fn test_parse_pack_truncated_stream() {
        let mut pack = pack_of(&[(1, COMMIT.as_bytes())]);
        pack.truncate(pack.len() - 6);
        assert!(matches!(
            parse_pack(&pack).unwrap_err(),
            PackError::TruncatedPack { .. }
        ));
    }

    #[test]
    fn test_parse_pack_rejects_size_mismatch() {
        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&1u32.to_be_bytes());
        // declared size 3, actual inflated size 9
        pack.extend_from_slice(&object_header(3, 3));
        pack.extend_from_slice(&deflate(b"nine byte"));
        assert!(matches!(
            parse_pack(&pack).unwrap_err(),
            PackError::Inflate { .. }
        ));
    }

    #[test]
    fn test_object_id_matches_git() {
        // `echo 'test content' | git hash-object --stdin`
        assert_eq!(
            object_id("blob", b"test content\n"),
            "d670460b4b4aece5915caf5c68d12f560a9fe3e4"
        );
    }

    #[test]
    fn test_parse_commit_without_parent_defaults_to_zero() {
        let payload = "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
            author A <a@b.co> 1 +0000\n\
            committer A <a@b.co> 2 +0000\n\
            \n\
            root commit\n";
        let commit = parse_commit(payload.as_bytes()).unwrap();
        assert_eq!(commit.parent, ZERO_SHA);
        assert_eq!(commit.commit_timestamp, 2);
    }

    #[test]
    fn test_parse_commit_multiline_message() {
        let payload = "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
            author A <a@b.co> 1 +0000\n\
            committer A <a@b.co> 2 +0000\n\
            \n\
            Line one\n\
            Line two\n";
        let commit = parse_commit(payload.as_bytes()).unwrap();
        assert_eq!(commit.message, "Line one Line two");
    }

    #[test]
    fn test_parse_commit_missing_author_is_invalid() {
        let payload = "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
            committer A <a@b.co> 2 +0000\n\
            \n\
            message\n";
        assert_eq!(
            parse_commit(payload.as_bytes()).unwrap_err(),
            PackError::InvalidCommitData
        );
    }

    #[test]
    fn test_error_packet_layout() {
        let packet = error_packet("you shall not push");
        assert!(packet.starts_with("0019\u{0002}\tyou shall not push\n"));
        assert!(packet.ends_with("0000"));
    }

    proptest! {
        #[test]
        fn test_error_packet_always_framed(message in "\\PC{1,200}") {
            let packet = error_packet(&message);
            // the length header is valid hex and the frame ends with a flush
            let declared = usize::from_str_radix(&packet[0..4], 16).unwrap();
            prop_assert_eq!(declared, packet.len() - 4);
            prop_assert!(packet.contains(message.as_str()));
            prop_assert!(packet.ends_with("0000"));
        }
    }
}
