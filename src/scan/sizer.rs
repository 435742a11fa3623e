use crate::model::DirEntry;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use walkdir::WalkDir;

const DU_TIMEOUT: Duration = Duration::from_secs(60);
const MDFIND_TIMEOUT: Duration = Duration::from_secs(30);

/// Depth bound for the in-process fallback walk.
pub const FALLBACK_WALK_DEPTH: usize = 5;

/// Recursive directory size via the external fast-accounting tool (`du -sk`).
/// Any failure (spawn, non-zero exit, unparseable output, timeout) returns
/// `None` so the caller can fall back to the manual walk.
pub async fn du_directory_size(path: &Path) -> Option<u64> {
    let child = Command::new("du")
        .arg("-sk")
        .arg(path)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(DU_TIMEOUT, child).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => {
            tracing::warn!(path = %path.display(), error = %e, "du spawn failed");
            return None;
        }
        Err(_) => {
            tracing::warn!(path = %path.display(), "du timed out");
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_du_output(&stdout)
}

fn parse_du_output(stdout: &str) -> Option<u64> {
    stdout
        .split_whitespace()
        .next()
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Manual recursive size: sums regular files, never follows symlinks,
/// depth-bounded to keep the fallback cheap.
pub fn walk_size(path: &Path, max_depth: usize) -> u64 {
    WalkDir::new(path)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !e.path_is_symlink())
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// Fallback sizing: the directory's immediate children are summed in
/// parallel, each subtree walked with the remaining depth budget. Symlinks
/// contribute nothing.
pub fn parallel_fallback_size(path: &Path) -> u64 {
    let Ok(read) = std::fs::read_dir(path) else {
        return 0;
    };
    let children: Vec<PathBuf> = read.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    children
        .par_iter()
        .map(|child| {
            let Ok(meta) = std::fs::symlink_metadata(child) else {
                return 0;
            };
            if meta.file_type().is_symlink() {
                0
            } else if meta.is_file() {
                meta.len()
            } else {
                walk_size(child, FALLBACK_WALK_DEPTH.saturating_sub(1))
            }
        })
        .sum()
}

/// Quick-mode directory sizing: `du` first, parallel manual walk on any
/// failure. The walk result is flagged estimated since the depth bound can
/// under-count deep trees.
pub async fn quick_directory_size(path: &Path) -> (u64, bool) {
    if let Some(bytes) = du_directory_size(path).await {
        return (bytes, false);
    }
    let path = path.to_path_buf();
    let bytes = tokio::task::spawn_blocking(move || parallel_fallback_size(&path))
        .await
        .unwrap_or(0);
    (bytes, true)
}

/// Content-index query (`mdfind`) for large files under `root`. Used only as
/// a fallback when a scan surfaced no large files of its own. Best-effort:
/// failures and timeouts yield an empty list.
pub async fn spotlight_large_files(root: &Path, min_size: u64) -> Vec<DirEntry> {
    let query = format!("kMDItemFSSize >= {}", min_size);
    let child = Command::new("mdfind")
        .arg("-onlyin")
        .arg(root)
        .arg(&query)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(MDFIND_TIMEOUT, child).await {
        Ok(Ok(out)) if out.status.success() => out,
        Ok(Ok(_)) | Ok(Err(_)) => return Vec::new(),
        Err(_) => {
            tracing::warn!(root = %root.display(), "mdfind timed out");
            return Vec::new();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut entries: Vec<DirEntry> = stdout
        .lines()
        .map(PathBuf::from)
        .filter_map(|p| {
            let meta = std::fs::symlink_metadata(&p).ok()?;
            if !meta.is_file() || meta.len() < min_size {
                return None;
            }
            Some(DirEntry::new(p, false, meta.len()))
        })
        .collect();
    entries.sort_by(|a, b| b.size.cmp(&a.size));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_du_kilobyte_output() {
        assert_eq!(parse_du_output("1024\t/Users/x/Library\n"), Some(1024 * 1024));
        assert_eq!(parse_du_output("garbage"), None);
        assert_eq!(parse_du_output(""), None);
    }

    #[test]
    fn parallel_fallback_matches_the_sequential_walk() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("top.bin"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("a/mid.bin"), vec![0u8; 200]).unwrap();
        fs::write(dir.path().join("a/b/deep.bin"), vec![0u8; 300]).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(dir.path().join("top.bin"), dir.path().join("link")).unwrap();

        assert_eq!(parallel_fallback_size(dir.path()), 600);
        assert_eq!(
            parallel_fallback_size(dir.path()),
            walk_size(dir.path(), FALLBACK_WALK_DEPTH)
        );
    }

    #[test]
    fn walk_size_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        fs::write(&file, vec![0u8; 4096]).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(&file, dir.path().join("link")).unwrap();

        assert_eq!(walk_size(dir.path(), FALLBACK_WALK_DEPTH), 4096);
    }
}
