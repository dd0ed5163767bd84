use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

pub const DOCUMENT_EXTENSION: &str = "xml";

/// Recursively collects regular files with the document extension under
/// `root`, in path order. Symlinked directories are not descended into and
/// unreadable entries below the root are skipped; only a root error fails.
pub async fn collect_documents(root: &Path) -> io::Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_documents(&root))
        .await
        .map_err(io::Error::other)?
}

fn walk_documents(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => return Err(err.into()),
            Err(err) => {
                warn!(
                    path = ?err.path(),
                    error = %err,
                    "skipping unreadable entry"
                );
                continue;
            }
        };
        if has_document_extension(entry.path()) && is_regular_file(&entry) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

pub fn has_document_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
}

fn is_regular_file(entry: &DirEntry) -> bool {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return true;
    }
    // A symlink counts when it points at a regular file.
    file_type.is_symlink()
        && std::fs::metadata(entry.path()).is_ok_and(|metadata| metadata.is_file())
}
