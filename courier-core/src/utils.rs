//! Small shared helpers

use std::path::{Path, PathBuf};

/// Create `path` (with parents) if it does not exist and hand it back.
/// Creation failures are ignored; callers surface them on first write.
pub fn ensure_dir(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::create_dir_all(&path);
    path
}

/// Shorten `s` to at most `max_len` bytes for log output, marking the
/// cut with "...". Cuts always land on a char boundary.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
