//! File fingerprints feeding node hashes.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::core::types::HashMethod;

/// Fingerprint a file, or every file below a directory in sorted order.
pub fn fingerprint(path: &Path, method: HashMethod) -> Result<String> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if !meta.is_dir() {
        return fingerprint_file(path, method);
    }

    let mut hasher = Sha256::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(fingerprint_file(entry.path(), method)?.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

fn fingerprint_file(path: &Path, method: HashMethod) -> Result<String> {
    match method {
        HashMethod::Timestamp => {
            let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|since| since.as_nanos())
                .unwrap_or_default();
            Ok(format!("{}:{}", meta.len(), mtime))
        }
        HashMethod::Content => {
            let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
            let mut hasher = Sha256::new();
            let mut chunk = [0u8; 64 * 1024];
            loop {
                let n = file
                    .read(&mut chunk)
                    .with_context(|| format!("read {}", path.display()))?;
                if n == 0 {
                    break;
                }
                hasher.update(&chunk[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Fingerprint every path, keyed by the path string.
pub fn fingerprint_all(paths: &[String], method: HashMethod) -> Result<BTreeMap<String, String>> {
    paths
        .iter()
        .map(|path| Ok((path.clone(), fingerprint(Path::new(path), method)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_fingerprint_follows_bytes_not_mtime() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = temp.path().join("a.txt");
        let b = temp.path().join("b.txt");
        fs::write(&a, "same").expect("write a");
        fs::write(&b, "same").expect("write b");
        assert_eq!(
            fingerprint(&a, HashMethod::Content).expect("a"),
            fingerprint(&b, HashMethod::Content).expect("b")
        );
        fs::write(&b, "different").expect("rewrite b");
        assert_ne!(
            fingerprint(&a, HashMethod::Content).expect("a"),
            fingerprint(&b, HashMethod::Content).expect("b")
        );
    }

    #[test]
    fn timestamp_fingerprint_includes_size() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("img.nii");
        fs::write(&path, "1234").expect("write");
        let print = fingerprint(&path, HashMethod::Timestamp).expect("fingerprint");
        assert!(print.starts_with("4:"));
    }

    #[test]
    fn directory_fingerprint_covers_nested_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("subject");
        fs::create_dir_all(dir.join("anat")).expect("mkdir");
        fs::write(dir.join("anat/t1.nii"), "t1").expect("write");
        let before = fingerprint(&dir, HashMethod::Content).expect("before");
        fs::write(dir.join("anat/t2.nii"), "t2").expect("write");
        let after = fingerprint(&dir, HashMethod::Content).expect("after");
        assert_ne!(before, after);
    }

    #[test]
    fn missing_paths_are_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = vec![temp.path().join("nope").to_string_lossy().into_owned()];
        assert!(fingerprint_all(&missing, HashMethod::Timestamp).is_err());
    }
}
