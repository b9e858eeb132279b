//! Cache file naming.
//!
//! Completed entries live at `{key}.{ext}`; a fetch in progress writes to
//! `{key}.{ext}.tmp` and renames on success.

use std::path::Path;

use crate::ids::CacheKey;

/// Suffix appended to the file name of an in-flight fetch.
pub const TEMP_SUFFIX: &str = "tmp";

/// File name of the completed entry for `key`.
pub fn final_file_name(key: &CacheKey, ext: &str) -> String {
    format!("{key}.{ext}")
}

/// File name of the in-flight temp file for `key`.
pub fn temp_file_name(key: &CacheKey, ext: &str) -> String {
    format!("{key}.{ext}.{TEMP_SUFFIX}")
}

/// Check if a path looks like an in-flight temp file.
pub fn is_temp_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == TEMP_SUFFIX)
}

/// Recover the cache key from a completed or temp file name.
///
/// Returns `None` for files that do not belong to the cache.
pub fn key_from_file_name(file_name: &str, ext: &str) -> Option<CacheKey> {
    let name = file_name
        .strip_suffix(TEMP_SUFFIX)
        .and_then(|n| n.strip_suffix('.'))
        .unwrap_or(file_name);
    let stem = name.strip_suffix(ext)?.strip_suffix('.')?;
    CacheKey::from_stem(stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Quality;

    fn key() -> CacheKey {
        CacheKey::new("abc".parse().unwrap(), Quality::P720)
    }

    #[test]
    fn test_file_names() {
        assert_eq!(final_file_name(&key(), "mp4"), "abc_720.mp4");
        assert_eq!(temp_file_name(&key(), "mp4"), "abc_720.mp4.tmp");
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(Path::new("/cache/abc_720.mp4.tmp")));
        assert!(!is_temp_file(Path::new("/cache/abc_720.mp4")));
        assert!(!is_temp_file(Path::new("/cache/tmp")));
    }

    #[test]
    fn test_key_from_file_name() {
        assert_eq!(key_from_file_name("abc_720.mp4", "mp4"), Some(key()));
        assert_eq!(key_from_file_name("abc_720.mp4.tmp", "mp4"), Some(key()));
        assert_eq!(key_from_file_name("abc_720.webm", "mp4"), None);
        assert_eq!(key_from_file_name("notes.txt", "mp4"), None);
    }
}
