use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

/// Pseudo filesystems that never hold on-disk permissions worth auditing.
const VIRTUAL_DIRS: [&str; 4] = ["proc", "sys", "dev", "run"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkHit {
    pub path: PathBuf,
    pub mode: u32,
    pub uid: u32,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WalkResult {
    pub hits: Vec<WalkHit>,
    pub visited: u64,
    pub error_count: u64,
    pub truncated: bool,
}

impl WalkResult {
    pub fn stat_line(&self) -> String {
        format!(
            "visited={} errors={} truncated={}",
            self.visited, self.error_count, self.truncated
        )
    }
}

/// Walks every root without following symlinks and keeps the entries
/// accepted by `select`. Stops at `end` and marks the result truncated.
pub fn walk_matching<F>(
    roots: &[PathBuf],
    excludes: &GlobSet,
    end: Instant,
    select: F,
) -> WalkResult
where
    F: Fn(&WalkHit) -> bool,
{
    let mut result = WalkResult::default();

    'roots: for root in roots {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !excludes.is_match(e.path()));

        for entry in walker {
            if Instant::now() >= end {
                result.truncated = true;
                break 'roots;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => {
                    result.error_count = result.error_count.saturating_add(1);
                    continue;
                }
            };

            let ft = entry.file_type();
            if ft.is_symlink() || !(ft.is_file() || ft.is_dir()) {
                continue;
            }

            let Ok(meta) = entry.metadata() else {
                result.error_count = result.error_count.saturating_add(1);
                continue;
            };

            result.visited = result.visited.saturating_add(1);
            let hit = WalkHit {
                path: entry.into_path(),
                mode: meta.mode() & 0o7777,
                uid: meta.uid(),
                is_dir: ft.is_dir(),
            };
            if select(&hit) {
                result.hits.push(hit);
            }
        }
    }

    result.hits.sort_by(|a, b| a.path.cmp(&b.path));
    result
}

/// Exclude set for the walks: `proc`, `sys`, `dev` and `run` under the
/// sysroot and under every walk root, plus the user's globs.
pub fn build_exclude_set(
    sysroot: &Path,
    roots: &[PathBuf],
    excludes: &[String],
) -> Result<GlobSet> {
    let mut anchors: Vec<&Path> = vec![sysroot];
    anchors.extend(roots.iter().map(PathBuf::as_path));
    anchors.sort();
    anchors.dedup();

    let mut builder = GlobSetBuilder::new();
    for anchor in anchors {
        for dir in VIRTUAL_DIRS {
            let base = globset::escape(&anchor.join(dir).display().to_string());
            for pat in [base.clone(), format!("{base}/**")] {
                builder.add(
                    Glob::new(&pat).with_context(|| format!("invalid exclude glob: {pat}"))?,
                );
            }
        }
    }
    for pat in excludes {
        builder.add(Glob::new(pat).with_context(|| format!("invalid exclude glob: {pat}"))?);
    }
    Ok(builder.build()?)
}
