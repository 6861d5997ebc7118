//! Extension to media-type resolution.
//!
//! The table is value-owning: either parsed from a system `mime.types`
//! mappings file or seeded from the built-in set below. Lookups take the
//! lowercased extension of the request path and fall back to
//! `application/octet-stream`.

use std::fs;
use std::io;
use std::path::Path;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

pub const DEFAULT_MIME: &str = "application/octet-stream";

const SYSTEM_MAPPINGS: &str = "/etc/mime.types";

static BUILTIN: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("html", "text/html; charset=utf-8"),
        ("htm", "text/html; charset=utf-8"),
        ("css", "text/css; charset=utf-8"),
        ("js", "text/javascript; charset=utf-8"),
        ("json", "application/json; charset=utf-8"),
        ("xml", "application/xml; charset=utf-8"),
        ("txt", "text/plain; charset=utf-8"),
        ("ico", "image/x-icon"),
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("svg", "image/svg+xml"),
        ("webp", "image/webp"),
        ("pdf", "application/pdf"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
        ("ttf", "font/ttf"),
        ("eot", "application/vnd.ms-fontobject"),
        ("mp4", "video/mp4"),
        ("webm", "video/webm"),
        ("mp3", "audio/mpeg"),
        ("wasm", "application/wasm"),
    ]
});

#[derive(Debug, Clone)]
pub struct MimeMap {
    by_ext: FxHashMap<String, String>,
}

impl MimeMap {
    /// Built-in table only.
    pub fn builtin() -> MimeMap {
        let mut by_ext = FxHashMap::default();
        for (ext, media) in BUILTIN.iter() {
            by_ext.insert((*ext).to_string(), (*media).to_string());
        }
        MimeMap { by_ext }
    }

    /// Loads the system mappings file when readable, otherwise the
    /// built-in table.
    pub fn from_system() -> MimeMap {
        match MimeMap::load(Path::new(SYSTEM_MAPPINGS)) {
            Ok(map) if !map.by_ext.is_empty() => map,
            _ => MimeMap::builtin(),
        }
    }

    /// Parses a `mime.types`-format mappings file: one media type per line
    /// followed by whitespace-separated extensions, `#` starts a comment.
    pub fn load(path: &Path) -> io::Result<MimeMap> {
        let text = fs::read_to_string(path)?;
        let mut by_ext = FxHashMap::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let media = match fields.next() {
                Some(m) => m,
                None => continue,
            };
            for ext in fields {
                by_ext
                    .entry(ext.to_ascii_lowercase())
                    .or_insert_with(|| media.to_string());
            }
        }
        Ok(MimeMap { by_ext })
    }

    /// Media type for a lowercased extension.
    pub fn lookup(&self, ext: &str) -> &str {
        self.by_ext.get(ext).map(String::as_str).unwrap_or(DEFAULT_MIME)
    }

    /// Media type for a file path, keyed by its lowercased extension.
    pub fn resolve(&self, path: &str) -> &str {
        match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some(ext) => self.lookup(&ext.to_ascii_lowercase()),
            None => DEFAULT_MIME,
        }
    }

    pub fn len(&self) -> usize {
        self.by_ext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ext.is_empty()
    }
}
