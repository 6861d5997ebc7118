//! Validator cache: an ordered map from path hash to file fingerprint.
//!
//! The tree is built by a recursive walk of the webroot and replaced
//! wholesale on refresh; readers hold an `Arc` snapshot for the lifetime of
//! their work item, so a tree is never mutated once published.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::time::{Duration, SystemTime};

use crate::IO_BLOCK_SIZE;

const HASH_SEED: u32 = 5381;

/// Additive fold over content bytes, seeded at 5381.
pub fn content_hash<R: Read>(mut reader: R) -> io::Result<u32> {
    let mut buf = [0u8; IO_BLOCK_SIZE];
    let mut hash = HASH_SEED;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for &b in &buf[..n] {
            hash = hash.wrapping_add(u32::from(b));
        }
    }
    Ok(hash)
}

/// djb2 multiplicative fold over path bytes: `h = h*33 + c`, seeded at 5381.
pub fn path_hash(path: &str) -> u32 {
    let mut hash = HASH_SEED;
    for &b in path.as_bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(b));
    }
    hash
}

/// Fingerprint of one cacheable file. Immutable after construction;
/// identity is the path hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintEntry {
    pub path: String,
    pub content_hash: u32,
    pub path_hash: u32,
    /// HTTP-date string, canonical GMT form.
    pub last_modified: String,
}

impl FingerprintEntry {
    fn from_file(path: String) -> io::Result<FingerprintEntry> {
        let file = fs::File::open(&path)?;
        let modified = file.metadata()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        // Truncate to whole seconds so the formatted value round-trips.
        let secs = modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_secs();
        let last_modified =
            httpdate::fmt_http_date(SystemTime::UNIX_EPOCH + Duration::from_secs(secs));
        let content_hash = content_hash(file)?;
        let path_hash = path_hash(&path);
        Ok(FingerprintEntry {
            path,
            content_hash,
            path_hash,
            last_modified,
        })
    }
}

/// Ordered container keyed by path hash. Keys are unique; on a duplicate
/// path hash the first entry wins and the collision is logged, so a
/// colliding path is served without cache metadata.
#[derive(Debug, Default)]
pub struct FingerprintTree {
    entries: BTreeMap<u32, FingerprintEntry>,
}

impl FingerprintTree {
    /// Walks `root` recursively and fingerprints every regular file.
    /// Paths containing `/videos/` are never indexed.
    pub fn build(root: &str) -> io::Result<FingerprintTree> {
        let mut tree = FingerprintTree::default();
        tree.walk(root)?;
        Ok(tree)
    }

    fn walk(&mut self, dir: &str) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = format!("{}/{}", dir, name);
            if meta.is_dir() {
                if format!("{}/", path).contains("/videos/") {
                    continue;
                }
                self.walk(&path)?;
            } else if meta.is_file() {
                if path.contains("/videos/") {
                    continue;
                }
                match FingerprintEntry::from_file(path) {
                    Ok(fp) => self.insert(fp),
                    Err(e) => tracing::warn!(error = %e, "skipping unreadable file"),
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, entry: FingerprintEntry) {
        match self.entries.entry(entry.path_hash) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            std::collections::btree_map::Entry::Occupied(prior) => {
                tracing::warn!(
                    path = %entry.path,
                    prior = %prior.get().path,
                    hash = entry.path_hash,
                    "path hash collision, first entry wins"
                );
            }
        }
    }

    /// Point query by the path hash of an absolute path.
    pub fn lookup(&self, path: &str) -> Option<&FingerprintEntry> {
        self.entries.get(&path_hash(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
