//! Helpers for keeping host details out of logs, spans and stored files.
//!
//! Uploaded media lives on the server's filesystem. Spans and user-facing
//! messages reference it only by file name or by a stable hash.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Longest file name kept from a client-supplied upload name.
const MAX_UPLOAD_NAME_LEN: usize = 96;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns a short deterministic hash of a path for correlation without
/// exposing the actual path.
pub fn hash_path(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    let hash = hasher.finish();
    format!("{:016x}", hash)
}

/// Reduces a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped and every character outside
/// `[A-Za-z0-9._-]` becomes `_`. Empty or dot-only names become `upload`.
pub fn sanitize_upload_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return "upload".to_string();
    }

    // Keep the extension when truncating so the content type can still be guessed.
    if cleaned.len() > MAX_UPLOAD_NAME_LEN {
        let ext = Path::new(cleaned)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.len() < 16)
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let keep = MAX_UPLOAD_NAME_LEN - ext.len();
        return format!("{}{}", &cleaned[..keep], ext);
    }

    cleaned.to_string()
}
