//! Source file discovery for a package directory.
//!
//! Walks the package with early pruning of build output, VCS metadata and
//! installed dependencies (`node_modules` holds other packages, which are
//! expanded in their own context, never as part of this one). The result is
//! sorted so every run visits files in the same order.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::error::{MacroError, MacroResult};

/// Directories never descended into.
const EXCLUDED_DIRS: &[&str] = &["target", ".git", "node_modules"];

#[inline]
fn is_excluded_dir(entry: &DirEntry, excludes: &HashSet<&str>) -> bool {
    // The walk root itself is never pruned
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| excludes.contains(name))
}

fn rs_file(root: &Path, entry: walkdir::Result<DirEntry>) -> Option<MacroResult<PathBuf>> {
    match entry {
        Ok(e) => {
            let path = e.path();
            if e.file_type().is_file() && path.extension().is_some_and(|ext| ext == "rs") {
                Some(Ok(path.to_path_buf()))
            } else {
                None
            }
        }
        Err(e) => {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            Some(Err(MacroError::io(path, e.into())))
        }
    }
}

/// All `.rs` files under `root`, sorted.
pub fn gather_rs_files(root: &Path) -> MacroResult<Vec<PathBuf>> {
    gather_rs_files_with_excludes(root, &[])
}

/// Like [`gather_rs_files`], also pruning directories named in `excludes`.
pub fn gather_rs_files_with_excludes(root: &Path, excludes: &[&str]) -> MacroResult<Vec<PathBuf>> {
    let all_excludes: HashSet<&str> = EXCLUDED_DIRS
        .iter()
        .copied()
        .chain(excludes.iter().copied())
        .collect();

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_excluded_dir(e, &all_excludes));

    #[cfg(feature = "parallel")]
    let files = walker
        .par_bridge()
        .filter_map(|entry| rs_file(root, entry))
        .collect::<MacroResult<Vec<_>>>();
    #[cfg(not(feature = "parallel"))]
    let files = walker
        .filter_map(|entry| rs_file(root, entry))
        .collect::<MacroResult<Vec<_>>>();

    let mut files = files?;
    files.sort();
    Ok(files)
}
