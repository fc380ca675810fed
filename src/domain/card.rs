//! RFID card value and card content parsing.
//!
//! Card content is a semicolon-separated list of entries. Each entry is
//! either an absolute HTTP(S) URL or an `offline://` percent-encoded
//! relative path resolved against the configured offline content root.
//! Entries matching neither grammar are discarded with a warning.

use percent_encoding::percent_decode_str;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Application-relevant, read-only contents of an RFID card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    uid: Vec<u8>,
    content: String,
}

impl Card {
    pub fn new(uid: Vec<u8>, content: String) -> Self {
        Self { uid, content }
    }

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    pub fn uid_hex(&self) -> String {
        hex::encode_upper(&self.uid)
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

fn online_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^https?://(?:[a-z0-9_\-]+)+(?:\.[a-z0-9_\-]+)+(?:/(?:[a-z0-9_\-.]|%[0-9a-f]{2})+)+/?(?:\?.*|#.*)?$",
        )
        .expect("online url regex")
    })
}

fn offline_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^offline://(?:(?:[a-z0-9_\-.]|%[0-9a-f]{2})+/?)+$")
            .expect("offline url regex")
    })
}

/// A single validated card content entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEntry {
    /// Absolute HTTP(S) URL.
    Online(String),
    /// `offline://` URL, still percent-encoded.
    Offline(String),
}

/// Split card content and keep only entries matching one of the grammars.
pub fn parse_entries(content: &str) -> Vec<ContentEntry> {
    let mut entries = Vec::new();
    for raw in content.split(';') {
        if online_url_re().is_match(raw) {
            entries.push(ContentEntry::Online(raw.to_string()));
        } else if offline_url_re().is_match(raw) {
            entries.push(ContentEntry::Offline(raw.to_string()));
        } else {
            warn!(entry = %raw, "invalid_card_entry");
        }
    }
    entries
}

/// Resolve an `offline://` URL to a filesystem path under `root`.
///
/// Returns `None` when the decoded path would escape the root.
pub fn resolve_offline(url: &str, root: &Path) -> Option<PathBuf> {
    let rel = url.strip_prefix("offline://")?;
    let decoded = percent_decode_str(rel).decode_utf8().ok()?;
    let mut path = PathBuf::new();
    for comp in Path::new(decoded.as_ref()).components() {
        match comp {
            Component::Normal(c) => path.push(c),
            Component::CurDir => {}
            // Anything that walks upward or restarts at the filesystem
            // root must not leave the offline directory.
            _ => {
                warn!(url = %url, "offline_url_escapes_root");
                return None;
            }
        }
    }
    Some(root.join(path))
}

/// Pick the URL to load from card content.
///
/// An offline entry whose file is present wins over online entries;
/// otherwise the first online URL is used. Returns `None` when the card
/// holds no usable URL at all.
pub fn select_url(content: &str, offline_root: Option<&Path>) -> Option<String> {
    let entries = parse_entries(content);
    let mut first_online = None;
    let mut offline = None;
    for entry in entries {
        match entry {
            ContentEntry::Online(url) => {
                if first_online.is_none() {
                    first_online = Some(url);
                }
            }
            ContentEntry::Offline(url) => offline = Some(url),
        }
    }

    if let (Some(url), Some(root)) = (offline.as_ref(), offline_root) {
        if let Some(path) = resolve_offline(url, root) {
            if path.exists() {
                debug!(url = %url, "offline_url_selected");
                return offline;
            }
            debug!(path = %path.display(), "offline_file_missing");
        }
    }

    first_online
}
