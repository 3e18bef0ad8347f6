//! Storage key derivation for uploaded attachments

use std::fmt;
use uuid::Uuid;

/// Longest sanitized stem kept from the original filename
const MAX_STEM_LEN: usize = 64;

/// Unique name of a blob inside a store.
///
/// Shape: `<uuid-hex>[-<stem>][.<ext>]`. The random token comes first so two
/// uploads with the same original name never share a prefix, and the original
/// extension is kept for content-type inference. Only `[A-Za-z0-9_.-]` ever
/// appears, so a key is a valid path segment and URL segment as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Derive a fresh key from the filename supplied by the client.
    pub fn derive(original_filename: &str) -> Self {
        Self::derive_with_token(Uuid::new_v4(), original_filename)
    }

    fn derive_with_token(token: Uuid, original_filename: &str) -> Self {
        let base = base_name(original_filename);
        let (stem, extension) = split_extension(base);

        let mut key = token.simple().to_string();

        let stem = sanitize_stem(stem);
        if !stem.is_empty() {
            key.push('-');
            key.push_str(&stem);
        }

        let extension = sanitize_extension(extension.unwrap_or_default());
        if !extension.is_empty() {
            key.push('.');
            key.push_str(&extension);
        }

        Self(key)
    }

    /// Parse a key previously produced by [`StorageKey::derive`].
    ///
    /// Returns `None` for anything that could escape the store's namespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && !raw.starts_with('.')
            && raw.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extension carried over from the original filename, if any
    pub fn extension(&self) -> Option<&str> {
        self.0.rsplit_once('.').map(|(_, ext)| ext)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip any client-side directory components (both separator styles).
fn base_name(filename: &str) -> &str {
    filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename)
}

/// Extension is whatever follows the last dot.
fn split_extension(base: &str) -> (&str, Option<&str>) {
    match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (base, None),
    }
}

fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_STEM_LEN)
        .collect()
}

fn sanitize_extension(ext: &str) -> String {
    ext.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}
