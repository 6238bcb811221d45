//! Transfer archive: deflate zip with the metadata record in the comment

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::fs_enum::{collect_entries, FileEntry};
use crate::logger::{Logger, NoopLogger};
use crate::metadata::ArchiveMetadata;

/// A written archive and what went into it
#[derive(Debug, Clone)]
pub struct TransferArchive {
    pub path: PathBuf,
    pub entries: Vec<FileEntry>,
    pub metadata: ArchiveMetadata,
}

pub struct ArchiveBuilder {
    anchor: String,
    quiet: bool,
    logger: Arc<dyn Logger>,
}

impl ArchiveBuilder {
    pub fn new(anchor: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            quiet: false,
            logger: Arc::new(NoopLogger),
        }
    }

    /// Suppress the per-entry "adding" lines
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Write `paths` (directories expanded) into a new archive at
    /// `destination`, replacing anything already there.
    pub fn build(
        &self,
        paths: &[PathBuf],
        destination: &Path,
        metadata: &ArchiveMetadata,
    ) -> Result<TransferArchive> {
        let entries = collect_entries(paths, &self.anchor)?;
        let comment = metadata.encode()?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let file = File::create(destination)
            .with_context(|| format!("create archive {}", destination.display()))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        writer.set_comment(comment);
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);

        for entry in &entries {
            if !self.quiet {
                println!("adding {}", entry.name);
            }
            self.logger.archive_entry(&entry.path, &entry.name);
            if entry.is_directory {
                writer
                    .add_directory(entry.name.as_str(), options)
                    .with_context(|| format!("add directory {}", entry.name))?;
                continue;
            }
            let mut src = File::open(&entry.path)
                .with_context(|| format!("open {}", entry.path.display()))?;
            writer
                .start_file(entry.name.as_str(), options)
                .with_context(|| format!("start entry {}", entry.name))?;
            io::copy(&mut src, &mut writer)
                .with_context(|| format!("add {} to archive", entry.path.display()))?;
        }

        let mut inner = writer.finish().context("finalize archive")?;
        io::Write::flush(&mut inner).context("flush archive")?;

        Ok(TransferArchive {
            path: destination.to_path_buf(),
            entries,
            metadata: metadata.clone(),
        })
    }
}

/// Read back just the metadata record of an archive on disk
pub fn read_metadata(path: &Path) -> Result<ArchiveMetadata> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let archive = ZipArchive::new(file).context("read archive directory")?;
    ArchiveMetadata::decode(archive.comment())
}
