use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use client_core::DatasetFile;
use tracing::debug;

/// Reads every file below `root`. Each file is addressed as
/// `<root name>/<path inside root>` with `/` separators, the way a browser
/// folder upload names them.
pub fn collect_dataset(root: &Path) -> Result<Vec<DatasetFile>> {
    if !root.is_dir() {
        bail!("dataset path {} is not a directory", root.display());
    }
    let root_name = root
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", root.display()))?
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());

    let mut paths = Vec::new();
    walk(root, &mut paths)?;
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let inner = path
            .strip_prefix(root)
            .with_context(|| format!("{} escaped the dataset root", path.display()))?;
        let mut relative_path = root_name.clone();
        for component in inner.components() {
            relative_path.push('/');
            relative_path.push_str(&component.as_os_str().to_string_lossy());
        }
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        debug!(path = %relative_path, size = bytes.len(), "packed dataset file");
        files.push(DatasetFile {
            relative_path,
            bytes,
        });
    }
    Ok(files)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

/// Best-effort content type for an image picked from disk.
pub fn image_mime_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/dataset_tests.rs"]
mod tests;
