use crate::model::{ChunkResult, DirEntry, ScanMode};
use crate::scan::sizer;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Files at or above this size become large-file candidates.
pub const LARGE_FILE_MIN_BYTES: u64 = 100 * 1024 * 1024;

/// Source-code and structured-text extensions are excluded from large-file
/// tracking; they are rarely cleanup targets.
const LARGE_FILE_SKIP_EXTENSIONS: &[&str] = &[
    "swift", "rs", "c", "h", "cpp", "hpp", "m", "mm", "java", "kt", "py", "rb", "go", "js", "jsx",
    "ts", "tsx", "json", "xml", "yml", "yaml", "toml", "md", "txt", "csv", "plist", "sql",
];

/// Directory names skipped entirely: version-control metadata, dependency
/// caches, build output. These never enter the index.
const SKIP_DIR_NAMES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "target",
    "build",
    ".gradle",
    "__pycache__",
    ".venv",
    "Pods",
    "DerivedData",
];

pub fn is_skipped_dir_name(name: &str) -> bool {
    SKIP_DIR_NAMES.contains(&name)
}

pub fn is_large_file_candidate(path: &Path, size: u64) -> bool {
    if size < LARGE_FILE_MIN_BYTES {
        return false;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(ext) => !LARGE_FILE_SKIP_EXTENSIONS.contains(&ext.as_str()),
        None => true,
    }
}

/// Inspects one filesystem entry and produces a self-contained result chunk.
/// Touches no shared state; safe to run on arbitrarily many permits at once.
pub async fn scan_chunk(path: &Path, mode: ScanMode) -> ChunkResult {
    let mut result = ChunkResult::default();

    // Symlinks are never followed and never sized: avoids cycles and
    // double counting through link targets.
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return result,
    };
    if meta.file_type().is_symlink() {
        return result;
    }

    if meta.is_file() {
        let size = meta.len();
        let entry = DirEntry::new(path, false, size).with_identity(meta.dev(), meta.ino());
        if is_large_file_candidate(path, size) {
            result.large_files.push(entry.clone());
        }
        result.files = 1;
        result.bytes = size;
        result.entry = Some(entry);
        return result;
    }

    // Directory chunk.
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if is_skipped_dir_name(name) {
        return result;
    }

    let entry = if mode.defers_directory_sizes() {
        // True size arrives later from the recursive indexing rollup;
        // sizing eagerly here would traverse the tree twice.
        result.dirs = 1;
        DirEntry::new(path, true, 0)
            .with_identity(meta.dev(), meta.ino())
            .estimated()
    } else {
        let (size, estimated) = sizer::quick_directory_size(path).await;
        result.dirs = 1;
        result.bytes = size;
        let mut e = DirEntry::new(path, true, size).with_identity(meta.dev(), meta.ino());
        if estimated {
            e = e.estimated();
        }
        e
    };

    result.entry = Some(entry);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn large_file_threshold_and_extension_skip_list() {
        let big = 200 * 1024 * 1024;
        assert!(is_large_file_candidate(Path::new("/x/movie.mkv"), big));
        assert!(is_large_file_candidate(Path::new("/x/blob"), big));
        assert!(!is_large_file_candidate(Path::new("/x/dump.json"), big));
        assert!(!is_large_file_candidate(Path::new("/x/main.RS"), big));
        assert!(!is_large_file_candidate(Path::new("/x/movie.mkv"), 1024));
    }

    #[test]
    fn skip_set_covers_vcs_and_build_output() {
        assert!(is_skipped_dir_name(".git"));
        assert!(is_skipped_dir_name("node_modules"));
        assert!(is_skipped_dir_name("DerivedData"));
        assert!(!is_skipped_dir_name("Documents"));
    }

    #[tokio::test]
    async fn symlink_chunk_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("real.bin");
        fs::write(&file, b"data").unwrap();
        let link = dir.path().join("alias");
        std::os::unix::fs::symlink(&file, &link).unwrap();

        let result = scan_chunk(&link, ScanMode::Quick).await;
        assert!(result.entry.is_none());
        assert_eq!(result.bytes, 0);
    }

    #[tokio::test]
    async fn file_chunk_carries_identity_and_counters() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        fs::write(&file, vec![1u8; 2048]).unwrap();

        let result = scan_chunk(&file, ScanMode::Quick).await;
        let entry = result.entry.expect("file entry");
        assert_eq!(entry.size, 2048);
        assert!(entry.identity.is_some());
        assert_eq!(result.files, 1);
        assert_eq!(result.bytes, 2048);
    }

    #[tokio::test]
    async fn full_mode_directory_is_estimated_zero() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("stuff");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("f"), vec![0u8; 1024]).unwrap();

        let result = scan_chunk(&sub, ScanMode::Full).await;
        let entry = result.entry.expect("dir entry");
        assert_eq!(entry.size, 0);
        assert!(entry.size_estimated);
        assert_eq!(result.dirs, 1);
    }
}
