use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

pub trait Logger: Send + Sync {
    fn serve_start(&self, _archive: &Path, _port: u16) {}
    fn archive_entry(&self, _src: &Path, _name: &str) {}
    fn sent(&self, _peer: &str, _bytes: u64) {}
    fn download(&self, _url: &str, _bytes: u64, _seconds: f64) {}
    fn extracted(&self, _name: &str) {}
    fn renamed(&self, _from: &str, _to: &str) {}
    fn moved(&self, _src: &Path, _dst: &Path, _replaced: bool) {}
    fn error(&self, _context: &str, _path: &Path, _msg: &str) {}
    fn done(&self, _files: u64, _failed: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn serve_start(&self, archive: &Path, port: u16) {
        self.line(&format!("SERVE archive={} port={}", archive.display(), port));
    }
    fn archive_entry(&self, src: &Path, name: &str) {
        self.line(&format!("ENTRY src={} name={}", src.display(), name));
    }
    fn sent(&self, peer: &str, bytes: u64) {
        self.line(&format!("SENT peer={peer} bytes={bytes}"));
    }
    fn download(&self, url: &str, bytes: u64, seconds: f64) {
        self.line(&format!("DOWNLOAD url={url} bytes={bytes} seconds={seconds:.3}"));
    }
    fn extracted(&self, name: &str) {
        self.line(&format!("EXTRACT name={name}"));
    }
    fn renamed(&self, from: &str, to: &str) {
        self.line(&format!("RENAME from={from} to={to}"));
    }
    fn moved(&self, src: &Path, dst: &Path, replaced: bool) {
        let tag = if replaced { "REPLACE" } else { "MOVE" };
        self.line(&format!("{tag} src={} dst={}", src.display(), dst.display()));
    }
    fn error(&self, context: &str, path: &Path, msg: &str) {
        self.line(&format!("ERROR ctx={} path={} msg={}", context, path.display(), msg));
    }
    fn done(&self, files: u64, failed: u64, seconds: f64) {
        self.line(&format!("DONE files={files} failed={failed} seconds={seconds:.3}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_logger_appends_timestamped_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/ferry.log");
        let logger = TextLogger::new(&path).unwrap();
        logger.extracted("a.txt");
        logger.renamed("a:b.txt", "a-b.txt");
        drop(logger);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("EXTRACT name=a.txt"));
        assert!(lines[1].ends_with("RENAME from=a:b.txt to=a-b.txt"));
    }
}
