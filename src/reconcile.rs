//! Merge an extracted tree back into the documents root it came from

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::collab::{Choice, Collaborators};
use crate::fs_enum::{move_file, prune_empty_dirs};
use crate::logger::Logger;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// The staging tree did not exist
    pub missing: bool,
    pub created_dirs: Vec<PathBuf>,
    /// Destination paths that received a file, replacements included
    pub moved: Vec<PathBuf>,
    pub replaced: Vec<PathBuf>,
    /// Conflicting destinations left untouched because the batch was declined
    pub kept: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, String)>,
}

fn display_rel(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Move everything under `staging` to the same relative place under `root`.
/// Files that would overwrite an existing file are collected and confirmed
/// as one batch; on decline the originals stay and the incoming copies are
/// dropped. Empty staging directories are pruned at the end.
pub fn reconcile(
    staging: &Path,
    root: &Path,
    ui: &dyn Collaborators,
    logger: &dyn Logger,
    verbose: bool,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    if !staging.is_dir() {
        ui.notify(&format!("{} is not found", staging.display()));
        report.missing = true;
        return Ok(report);
    }
    if verbose {
        println!("-----Detailed Log-----\n");
    }

    let mut conflicts: Vec<(PathBuf, PathBuf)> = Vec::new();
    for entry in WalkDir::new(staging)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let src = entry.path().to_path_buf();
        let rel = match src.strip_prefix(staging) {
            Ok(r) => r.to_path_buf(),
            Err(_) => continue,
        };
        let dst = root.join(&rel);

        if entry.file_type().is_dir() {
            if !dst.is_dir() {
                match fs::create_dir_all(&dst) {
                    Ok(()) => {
                        if verbose {
                            println!("dir {} was created", display_rel(&dst, root));
                        }
                        report.created_dirs.push(dst);
                    }
                    Err(e) => {
                        logger.error("reconcile", &dst, &e.to_string());
                        report.errors.push((dst, e.to_string()));
                    }
                }
            }
            continue;
        }

        if dst.is_file() {
            conflicts.push((dst, src));
        } else if dst.exists() {
            let msg = "a directory occupies this path".to_string();
            logger.error("reconcile", &dst, &msg);
            report.errors.push((dst, msg));
        } else {
            match move_file(&src, &dst) {
                Ok(()) => {
                    if verbose {
                        println!("moved {} to {}", display_rel(&src, staging), display_rel(&dst, root));
                    }
                    logger.moved(&src, &dst, false);
                    report.moved.push(dst);
                }
                Err(e) => {
                    logger.error("reconcile", &dst, &e.to_string());
                    report.errors.push((dst, e.to_string()));
                }
            }
        }
    }

    if !conflicts.is_empty() {
        let listing: Vec<String> = conflicts.iter().map(|(d, _)| display_rel(d, root)).collect();
        let msg = format!("Following files will be replaced.\n{}", listing.join("\n"));
        if ui.confirm(&msg) == Choice::Yes {
            for (dst, src) in conflicts {
                let res = fs::remove_file(&dst).and_then(|_| move_file(&src, &dst));
                match res {
                    Ok(()) => {
                        if verbose {
                            println!("{} was replaced", display_rel(&dst, root));
                        }
                        logger.moved(&src, &dst, true);
                        report.replaced.push(dst.clone());
                        report.moved.push(dst);
                    }
                    Err(e) => {
                        logger.error("reconcile", &dst, &e.to_string());
                        report.errors.push((dst, e.to_string()));
                    }
                }
            }
        } else {
            for (dst, src) in conflicts {
                let _ = fs::remove_file(&src);
                report.kept.push(dst);
            }
        }
    }

    if let Err(e) = prune_empty_dirs(staging, true) {
        logger.error("prune", staging, &e.to_string());
    }

    if let [only] = report.moved.as_slice() {
        let msg = format!("Do you want to open {}?", display_rel(only, root));
        if ui.confirm(&msg) == Choice::Yes && !ui.open_file(only) {
            ui.notify(&format!("Saved to {}", only.display()));
        }
    }
    Ok(report)
}
