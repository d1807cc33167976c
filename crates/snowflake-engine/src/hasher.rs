//! Canonical serialization and digest of sources, builds, and outputs.
//!
//! All three identities are SHA-256 digests over framed byte streams:
//! every variable-length field is length-prefixed, every tree entry carries
//! a kind tag, and directory walks are in sorted name order. Framing makes
//! the serialization injective, so two distinct inputs cannot collide
//! short of a digest collision.

use std::collections::BTreeMap;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use sha2::{Digest, Sha256};

use snowflake_util::error::UtilError;
use snowflake_util::fs::sorted_entries;

use crate::error::EngineError;
use crate::rule::Source;

// Kind tags for tree entries. `x` only appears in executable-sensitive
// walks (output hashing); source hashing folds it into `f`.
const KIND_FILE: u8 = b'f';
const KIND_EXECUTABLE: u8 = b'x';
const KIND_DIR: u8 = b'd';
const KIND_SYMLINK: u8 = b'l';

/// A SHA-256 digest in lowercase hex.
///
/// Three semantic flavors share this type: sources hashes, build hashes,
/// and output hashes. They are distinguishable only by context.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Hash(String);

impl Hash {
    /// Parse a hash from its hex representation.
    ///
    /// Accepts exactly 64 hex digits; uppercase input is normalized.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(s.to_ascii_lowercase()))
    }

    /// Return the hex string representation of this hash.
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

/// Finish a digest as lowercase hex.
fn finish_hex(hasher: Sha256) -> String {
    format!("{:x}", hasher.finalize())
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<Path> for Hash {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

/// Compute the identity of a rule's sources mapping.
///
/// Source names are visited in sorted lexicographic order (the map is a
/// `BTreeMap`, so iteration order is the canonical order). Each entry
/// contributes its length-prefixed name, the kind of entry it materializes
/// to, and the digest of the bytes that would appear in the scratch
/// directory. The fetch mechanism is deliberately absent: `Inline`,
/// `OnDiskCopy`, and `OnDiskLink` of identical content hash identically.
///
/// # Errors
/// Returns an error if an on-disk source cannot be read.
pub fn sources_hash(sources: &BTreeMap<String, Source>) -> Result<Hash, EngineError> {
    let mut hasher = Sha256::new();
    for (name, source) in sources {
        let (kind, digest) = source_digest(source).map_err(source_error)?;
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update([kind]);
        hasher.update(digest.as_bytes());
    }
    Ok(Hash(finish_hex(hasher)))
}

/// Compose a rule's build hash from its sources hash and the output hashes
/// of its dependencies, in declaration order.
///
/// Reordering dependencies yields a different build hash.
pub fn build_hash(sources: &Hash, dep_outputs: &[Hash]) -> Hash {
    let mut parts: Vec<&str> = Vec::with_capacity(dep_outputs.len().saturating_add(1));
    parts.push(sources.as_hex());
    parts.extend(dep_outputs.iter().map(Hash::as_hex));
    let composite = snowflake_util::hash::sha256_multi(&parts);
    Hash(composite)
}

/// Compute the content identity of a build artifact.
///
/// Regular files digest as a tagged prefix plus their bytes; the
/// executable bit is part of the identity. Directories digest as a framed
/// record of `(name, kind, digest-of-child)` per entry in sorted name
/// order. Symbolic links digest as their target path. Timestamps,
/// ownership, and non-executable mode bits are ignored.
///
/// # Errors
/// Returns an error if the artifact cannot be walked or read.
pub fn output_hash(path: &Path) -> Result<Hash, EngineError> {
    let (_kind, digest) = tree_digest(path, true).map_err(output_error)?;
    Ok(Hash(digest))
}

/// Digest the content a source materializes to, with its kind tag.
fn source_digest(source: &Source) -> Result<(u8, String), UtilError> {
    match source {
        Source::Inline(bytes) => {
            let mut hasher = Sha256::new();
            hasher.update(b"file:");
            hasher.update(bytes);
            Ok((KIND_FILE, finish_hex(hasher)))
        }
        Source::OnDiskCopy(path) | Source::OnDiskLink(path) => tree_digest(path, false),
    }
}

/// Recursively digest a file tree, returning the root's kind tag and digest.
///
/// When `exec_sensitive` is false the executable bit is folded away, which
/// is what keeps inline sources and on-disk sources of equal content
/// hash-equal.
fn tree_digest(path: &Path, exec_sensitive: bool) -> Result<(u8, String), UtilError> {
    let meta = std::fs::symlink_metadata(path).map_err(|source| UtilError::io(path, source))?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = std::fs::read_link(path).map_err(|source| UtilError::io(path, source))?;
        let mut hasher = Sha256::new();
        hasher.update(b"symlink:");
        hasher.update(target.as_os_str().as_bytes());
        return Ok((KIND_SYMLINK, finish_hex(hasher)));
    }

    if file_type.is_dir() {
        let mut hasher = Sha256::new();
        hasher.update(b"dir:");
        for (name, child_path) in sorted_entries(path)? {
            let (kind, digest) = tree_digest(&child_path, exec_sensitive)?;
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update([kind]);
            hasher.update(digest.as_bytes());
        }
        return Ok((KIND_DIR, finish_hex(hasher)));
    }

    // Regular file.
    let executable = exec_sensitive && is_executable(&meta);
    let digest = file_digest(path, executable)?;
    let kind = if executable { KIND_EXECUTABLE } else { KIND_FILE };
    Ok((kind, digest))
}

/// Digest a regular file's bytes with its kind prefix, streaming.
fn file_digest(path: &Path, executable: bool) -> Result<String, UtilError> {
    let file = std::fs::File::open(path).map_err(|source| UtilError::io(path, source))?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    hasher.update(if executable {
        b"xfile:".as_slice()
    } else {
        b"file:".as_slice()
    });
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = std::io::Read::read(&mut reader, &mut buf)
            .map_err(|source| UtilError::io(path, source))?;
        if n == 0 {
            break;
        }
        let Some(chunk) = buf.get(..n) else {
            break; // unreachable: n is bounded by buf.len()
        };
        hasher.update(chunk);
    }
    Ok(finish_hex(hasher))
}

fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

fn source_error(err: UtilError) -> EngineError {
    match err {
        UtilError::Io { path, source } => EngineError::SourceUnreadable { path, source },
        other => EngineError::Util(other),
    }
}

fn output_error(err: UtilError) -> EngineError {
    match err {
        UtilError::Io { path, source } => EngineError::OutputUnreadable { path, source },
        other => EngineError::Util(other),
    }
}
