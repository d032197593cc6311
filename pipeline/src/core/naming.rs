//! Filename helpers for derived output names.

use std::path::{Path, PathBuf};

/// Multi-part extensions that must stay together (`t1.nii.gz` -> `t1`, `.nii.gz`).
const SPECIAL_EXTENSIONS: &[&str] = &[
    ".nii.gz",
    ".tar.gz",
    ".BRIK.gz",
    ".HEAD.gz",
    ".mgz.gz",
    ".surf.gii",
    ".func.gii",
    ".shape.gii",
    ".label.gii",
    ".dscalar.nii",
    ".dtseries.nii",
];

/// Split a path into `(directory, stem, extension)`.
///
/// The extension keeps its leading dot and is empty when the name has none.
pub fn split_filename(path: &str) -> (PathBuf, String, String) {
    let path = Path::new(path);
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    for ext in SPECIAL_EXTENSIONS {
        if name.len() > ext.len() && name.ends_with(ext) {
            let stem = name[..name.len() - ext.len()].to_string();
            return (dir, stem, (*ext).to_string());
        }
    }

    match name.rfind('.') {
        Some(idx) if idx > 0 => (dir, name[..idx].to_string(), name[idx..].to_string()),
        _ => (dir, name, String::new()),
    }
}

pub fn stem(path: &str) -> String {
    split_filename(path).1
}

pub fn extension(path: &str) -> String {
    split_filename(path).2
}

/// Path with its extension removed, directory preserved.
pub fn strip_extension(path: &str) -> String {
    let (dir, stem, _) = split_filename(path);
    dir.join(stem).to_string_lossy().into_owned()
}

/// Build a generated output name from `template` (one `%s`) and a source path.
///
/// The result lives in `cwd`; `keep_extension` appends the source extension.
pub fn generate_name(template: &str, source: &str, keep_extension: bool, cwd: &Path) -> PathBuf {
    let (_, stem, ext) = split_filename(source);
    let mut name = template.replacen("%s", &stem, 1);
    if keep_extension {
        name.push_str(&ext);
    }
    cwd.join(name)
}
