//! Local filesystem resolution for dataset URIs.

use std::path::{Path, PathBuf};

use url::Url;
use walkdir::{DirEntry, WalkDir};

use crate::error::{EngineError, Result};

/// Turn a `file:` URI or plain path into a local path.
///
/// Accepts `file:///abs`, `file://localhost/abs` and the single-slash
/// `file:/abs` form. Percent escapes are decoded to raw path bytes.
///
/// # Errors
///
/// Returns [`EngineError::Invalid`] for empty input, a non-`file` scheme, or
/// a `file` URI naming a remote host.
pub fn path_from_uri(uri: &str) -> Result<PathBuf> {
    if uri.is_empty() {
        return Err(EngineError::invalid("dataset uri must not be empty"));
    }
    let url = match Url::parse(uri) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => return Ok(PathBuf::from(uri)),
        Err(e) => {
            return Err(EngineError::invalid(format!(
                "unsupported filesystem uri: {uri} ({e})"
            )))
        }
    };
    if url.scheme() != "file" {
        return Err(EngineError::invalid(format!(
            "unsupported filesystem uri: {uri} (scheme '{}')",
            url.scheme()
        )));
    }
    url.to_file_path()
        .map_err(|()| EngineError::invalid(format!("unsupported filesystem uri: {uri}")))
}

/// Files making up the dataset rooted at `path`, sorted by path.
///
/// A file path yields itself. Directories are walked recursively; entries
/// whose name starts with `.` or `_` are skipped.
///
/// # Errors
///
/// Returns an I/O error if `path` does not exist or cannot be listed.
pub fn discover_files(path: &Path) -> Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(path)?;
    if meta.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    let walker = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name.starts_with('_')
}

/// True when `path` is missing or an empty directory.
///
/// # Errors
///
/// Returns an I/O error if `path` exists but cannot be listed.
pub fn is_empty_or_missing(path: &Path) -> Result<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}
