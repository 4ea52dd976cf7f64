// 📂 Directory Scanner - builds the code → file table
// A file's code is its stem, trimmed. Only the top level of the directory is read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions recognized as recipient files (compared case-insensitively)
pub const RECOGNIZED_EXTENSIONS: &[&str] = &["pdf"];

/// code → path, ordered by code for stable diagnostics
pub type FileTable = BTreeMap<String, PathBuf>;

/// Scan a directory and map each recognized file's code to its path.
///
/// Never fails: a missing path, a non-directory, or unreadable entries all
/// degrade to whatever could be collected. On duplicate codes (`7.pdf` and
/// `7.PDF`), the last file in name order wins.
pub fn scan_directory(dir: &Path) -> FileTable {
    let mut files = FileTable::new();

    if !dir.exists() {
        warn!("PDF directory does not exist: {}", dir.display());
        return files;
    }

    if !dir.is_dir() {
        warn!("PDF path is not a directory: {}", dir.display());
        return files;
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || !has_recognized_extension(path) {
            continue;
        }

        if let Some(code) = file_code(path) {
            debug!("Found {} -> code '{}'", path.display(), code);
            if let Some(previous) = files.insert(code.clone(), path.to_path_buf()) {
                debug!(
                    "Code '{}' seen twice, replacing {} with {}",
                    code,
                    previous.display(),
                    path.display()
                );
            }
        }
    }

    debug!("Scanned {}: {} files", dir.display(), files.len());
    files
}

/// Case-insensitive extension check
pub fn has_recognized_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            RECOGNIZED_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// File stem, trimmed. None for stems that are empty after trimming.
pub fn file_code(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy();
    let code = stem.trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_missing_directory_returns_empty_table() {
        let files = scan_directory(Path::new("/definitely/not/here/fast-distrib"));
        assert!(files.is_empty());
    }

    #[test]
    fn test_file_path_instead_of_directory_returns_empty_table() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "001.pdf");

        let files = scan_directory(&tmp.path().join("001.pdf"));
        assert!(files.is_empty());
    }

    #[test]
    fn test_scan_picks_pdfs_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "001.pdf");
        touch(tmp.path(), "002.PDF");
        touch(tmp.path(), "notes.txt");
        touch(tmp.path(), " 003 .pdf");
        fs::create_dir(tmp.path().join("nested.pdf")).unwrap();

        let files = scan_directory(tmp.path());

        let codes: Vec<&str> = files.keys().map(|k| k.as_str()).collect();
        assert_eq!(codes, vec!["001", "002", "003"]);
        assert_eq!(files["002"], tmp.path().join("002.PDF"));
    }

    #[test]
    fn test_scan_is_not_recursive() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        touch(&tmp.path().join("sub"), "010.pdf");

        assert!(scan_directory(tmp.path()).is_empty());
    }

    #[test]
    fn test_has_recognized_extension() {
        assert!(has_recognized_extension(Path::new("a.pdf")));
        assert!(has_recognized_extension(Path::new("a.Pdf")));
        assert!(!has_recognized_extension(Path::new("a.pdf.txt")));
        assert!(!has_recognized_extension(Path::new("pdf")));
    }
}
