//! Archive extraction with sender-aware name decoding and filename repair

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::ZipArchive;

use crate::logger::{Logger, NoopLogger};
use crate::metadata::ArchiveMetadata;
use crate::platform::SenderPlatform;

/// Characters replaced by `-` when a name is rejected by the filesystem
const UNSAFE_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub dest: PathBuf,
    /// `/`-joined names as they landed on disk
    pub extracted: Vec<String>,
    /// (decoded name, sanitized name) for entries that needed the retry
    pub renamed: Vec<(String, String)>,
    /// (name, error) for entries that could not be written at all
    pub failed: Vec<(String, String)>,
}

pub struct Extractor {
    quiet: bool,
    logger: Arc<dyn Logger>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            quiet: false,
            logger: Arc::new(NoopLogger),
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Decode the metadata and unpack every entry under `dest`. Only an
    /// unreadable archive or metadata record fails the call; bad entries
    /// are recorded in the report.
    pub fn extract(&self, archive_path: &Path, dest: &Path) -> Result<(ArchiveMetadata, ExtractionReport)> {
        let file = File::open(archive_path)
            .with_context(|| format!("open {}", archive_path.display()))?;
        let mut archive = ZipArchive::new(file).context("read archive directory")?;
        let metadata = ArchiveMetadata::decode(archive.comment())?;
        fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;

        if !self.quiet {
            println!("\nExtracting.....");
        }
        let mut report = ExtractionReport {
            dest: dest.to_path_buf(),
            ..Default::default()
        };
        for index in 0..archive.len() {
            self.extract_one(&mut archive, index, &metadata.sender, dest, &mut report);
        }
        Ok((metadata, report))
    }

    fn extract_one<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        index: usize,
        sender: &SenderPlatform,
        dest: &Path,
        report: &mut ExtractionReport,
    ) {
        let name = match archive.by_index(index) {
            Ok(entry) => sender.decode_name(entry.name_raw()),
            Err(e) => {
                self.record_failure(report, dest, format!("#{}", index), e.to_string());
                return;
            }
        };
        let segments = entry_segments(&name);
        if segments.is_empty() {
            self.record_failure(report, dest, name, "entry has no usable name".into());
            return;
        }

        let first = write_entry(archive, index, &join_under(dest, &segments));
        if first.is_ok() {
            self.logger.extracted(&name);
            report.extracted.push(segments.join("/"));
            return;
        }

        let repaired: Vec<String> = segments.iter().map(|s| sanitize_segment(s)).collect();
        let repaired_name = repaired.join("/");
        match write_entry(archive, index, &join_under(dest, &repaired)) {
            Ok(()) => {
                if !self.quiet {
                    println!("Renamed {}", repaired_name);
                }
                self.logger.renamed(&name, &repaired_name);
                report.extracted.push(repaired_name.clone());
                report.renamed.push((name, repaired_name));
            }
            Err(e) => self.record_failure(report, dest, repaired_name, e.to_string()),
        }
    }

    fn record_failure(&self, report: &mut ExtractionReport, dest: &Path, name: String, error: String) {
        if !self.quiet {
            println!("Error {}", name);
            println!("{}", error);
        }
        self.logger.error("extract", &dest.join(&name), &error);
        report.failed.push((name, error));
    }
}

/// Split a stored name into path segments that stay inside the destination
pub fn entry_segments(name: &str) -> Vec<String> {
    name.split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(str::to_string)
        .collect()
}

/// Deterministic replacement for a segment the filesystem refused
pub fn sanitize_segment(segment: &str) -> String {
    let replaced: String = segment
        .chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '-'
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim();
    match trimmed {
        "" | "." | ".." => "-".to_string(),
        t => t.to_string(),
    }
}

fn join_under(dest: &Path, segments: &[String]) -> PathBuf {
    let mut p = dest.to_path_buf();
    for s in segments {
        p.push(s);
    }
    p
}

fn write_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, index: usize, target: &Path) -> Result<()> {
    let mut entry = archive.by_index(index)?;
    if entry.is_dir() {
        fs::create_dir_all(target)?;
        return Ok(());
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    io::copy(&mut entry, &mut out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, comment: &str, entries: &[(&str, &[u8])]) {
        let mut w = ZipWriter::new(File::create(path).unwrap());
        w.set_comment(comment);
        for (name, body) in entries {
            if name.ends_with('/') {
                w.add_directory(*name, FileOptions::default()).unwrap();
            } else {
                w.start_file(*name, FileOptions::default()).unwrap();
                w.write_all(body).unwrap();
            }
        }
        w.finish().unwrap();
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_segment("a:b?.txt"), "a-b-.txt");
        assert_eq!(sanitize_segment(" <x|y> "), "-x-y-");
        assert_eq!(sanitize_segment("bad\0name"), "bad-name");
        assert_eq!(sanitize_segment(".."), "-");
        assert_eq!(sanitize_segment("fine.txt"), "fine.txt");
    }

    #[test]
    fn segments_cannot_climb_out() {
        assert_eq!(entry_segments("../../etc/passwd"), vec!["etc", "passwd"]);
        assert_eq!(entry_segments("/abs/./x"), vec!["abs", "x"]);
        assert!(entry_segments("./").is_empty());
    }

    #[test]
    fn extracts_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = tmp.path().join("r.zip");
        write_zip(
            &zip,
            r#"{"sender":"Linux"}"#,
            &[("a.txt", b"alpha"), ("sub/b.txt", b"bravo"), ("empty/", b"")],
        );
        let dest = tmp.path().join("out");
        let (meta, report) = Extractor::new().quiet(true).extract(&zip, &dest).unwrap();
        assert_eq!(meta.sender, SenderPlatform::Linux);
        assert!(report.failed.is_empty());
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("sub/b.txt")).unwrap(), b"bravo");
        assert!(dest.join("empty").is_dir());
    }

    #[test]
    fn illegal_name_is_repaired_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = tmp.path().join("r.zip");
        write_zip(
            &zip,
            r#"{"sender":"Linux"}"#,
            &[("dir/bad\0name.txt", b"payload"), ("ok.txt", b"fine")],
        );
        let dest = tmp.path().join("out");
        let (_, report) = Extractor::new().quiet(true).extract(&zip, &dest).unwrap();
        assert!(report.failed.is_empty());
        assert_eq!(
            report.renamed,
            vec![("dir/bad\0name.txt".to_string(), "dir/bad-name.txt".to_string())]
        );
        assert_eq!(fs::read(dest.join("dir/bad-name.txt")).unwrap(), b"payload");
        assert_eq!(fs::read(dest.join("ok.txt")).unwrap(), b"fine");
    }

    #[test]
    fn unrecoverable_entry_is_recorded_and_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = tmp.path().join("r.zip");
        write_zip(
            &zip,
            r#"{"sender":"Linux"}"#,
            &[("blocker", b"file"), ("blocker/inner.txt", b"x"), ("after.txt", b"y")],
        );
        let dest = tmp.path().join("out");
        let (_, report) = Extractor::new().quiet(true).extract(&zip, &dest).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "blocker/inner.txt");
        assert_eq!(fs::read(dest.join("after.txt")).unwrap(), b"y");
    }

    #[test]
    fn missing_metadata_fails_the_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = tmp.path().join("r.zip");
        write_zip(&zip, "", &[("a.txt", b"a")]);
        assert!(Extractor::new().quiet(true).extract(&zip, &tmp.path().join("out")).is_err());
    }
}
