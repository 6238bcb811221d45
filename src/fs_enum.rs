use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
// Filesystem enumeration for archiving, plus tree helpers used after extraction

/// Source path paired with its name inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_directory: bool,
}

/// Expand inputs into (absolute path, is_directory) pairs.
/// Directories are walked fully; only empty subdirectories are kept as
/// directory entries since non-empty ones are implied by their files.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<(PathBuf, bool)>> {
    let mut out = Vec::new();
    for input in inputs {
        let abs = absolute(input)?;
        if abs.is_dir() {
            for entry in WalkDir::new(&abs)
                .follow_links(false)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let ft = entry.file_type();
                if ft.is_file() {
                    out.push((entry.path().to_path_buf(), false));
                } else if ft.is_dir() && is_empty_dir(entry.path()) {
                    out.push((entry.path().to_path_buf(), true));
                }
            }
        } else if abs.is_file() {
            out.push((abs, false));
        } else {
            anyhow::bail!("no such file or directory: {}", input.display());
        }
    }
    Ok(out)
}

fn absolute(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    let cwd = std::env::current_dir().context("resolve current directory")?;
    Ok(cwd.join(p))
}

fn is_empty_dir(p: &Path) -> bool {
    fs::read_dir(p)
        .map(|mut rd| rd.next().is_none())
        .unwrap_or(false)
}

fn normal_parts<'a>(comps: impl Iterator<Item = Component<'a>>) -> Vec<String> {
    comps
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Archive-relative name: everything after the first `anchor` component.
/// Without an anchor a lone file keeps only its base name, otherwise the
/// path is kept minus its root.
pub fn archive_name(path: &Path, anchor: &str, total_files: usize) -> String {
    let comps: Vec<Component> = path.components().collect();
    let anchor_at = comps
        .iter()
        .position(|c| matches!(c, Component::Normal(s) if s.to_str() == Some(anchor)));
    if let Some(idx) = anchor_at {
        let rel = normal_parts(comps[idx + 1..].iter().copied());
        if !rel.is_empty() {
            return rel.join("/");
        }
    }
    if total_files == 1 {
        if let Some(name) = path.file_name() {
            return name.to_string_lossy().into_owned();
        }
    }
    normal_parts(comps.into_iter()).join("/")
}

/// Expand and name every input in one pass
pub fn collect_entries(inputs: &[PathBuf], anchor: &str) -> Result<Vec<FileEntry>> {
    let expanded = expand_inputs(inputs)?;
    let total_files = expanded.iter().filter(|(_, dir)| !dir).count();
    Ok(expanded
        .into_iter()
        .map(|(path, is_directory)| FileEntry {
            name: archive_name(&path, anchor, total_files),
            path,
            is_directory,
        })
        .collect())
}

/// Remove empty directories bottom-up. A directory goes only once its
/// pruned subdirectories leave it with no entries. `remove_root` controls
/// whether `path` itself may be removed.
pub fn prune_empty_dirs(path: &Path, remove_root: bool) -> io::Result<()> {
    if !path.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            prune_empty_dirs(&entry.path(), true)?;
        }
    }
    if remove_root && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
    }
    Ok(())
}

/// Rename into place, falling back to copy+delete across filesystems
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}
