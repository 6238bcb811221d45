//! Explicit session context tying discovery, packaging, serving and
//! receiving together. One `Session` is built per process from the merged
//! configuration and handed the host's logger and collaborators.

use anyhow::{Context, Result};
use chrono::Local;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::archive::ArchiveBuilder;
use crate::collab::{Choice, Collaborators};
use crate::config::SessionConfig;
use crate::download::{download, DownloadReport};
use crate::extract::{ExtractionReport, Extractor};
use crate::fs_enum::prune_empty_dirs;
use crate::logger::Logger;
use crate::metadata::ArchiveMetadata;
use crate::platform::{PostExtract, SenderPlatform};
use crate::progress::ProgressDisplay;
use crate::reconcile::{reconcile, ReconcileReport};
use crate::scan::{local_ipv4, PeerScanner, ScanOptions};
use crate::server::{bind, Listening, ServeOutcome, TransferServer};
use crate::url::archive_url;

/// What happened after a bundle was extracted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Text share; `copied` is false when no clipboard was available
    SharedText { copied: bool },
    Reconciled(ReconcileReport),
    /// Same-application sender, but the user kept the extracted tree
    ReconcileDeclined,
    ReportedSender(SenderPlatform),
}

#[derive(Debug, Clone)]
pub struct ReceiveReport {
    pub peer: Ipv4Addr,
    pub download: DownloadReport,
    pub metadata: ArchiveMetadata,
    pub extraction: ExtractionReport,
    pub action: PostAction,
}

#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    Completed(Box<ReceiveReport>),
    /// The download finished but nothing was left at the receive path
    ArchiveMissing(PathBuf),
    Cancelled,
}

pub struct Session {
    cfg: SessionConfig,
    platform: SenderPlatform,
    logger: Arc<dyn Logger>,
    ui: Arc<dyn Collaborators>,
    quiet: bool,
}

impl Session {
    pub fn new(cfg: SessionConfig, logger: Arc<dyn Logger>, ui: Arc<dyn Collaborators>) -> Result<Self> {
        cfg.validate()?;
        let platform = SenderPlatform::local(cfg.managed_documents);
        Ok(Self {
            cfg,
            platform,
            logger,
            ui,
            quiet: false,
        })
    }

    /// Suppress per-entry and discovery chatter
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn platform(&self) -> &SenderPlatform {
        &self.platform
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            port: self.cfg.port,
            probe_timeout: self.cfg.probe_timeout(),
            max_in_flight: self.cfg.max_in_flight,
        }
    }

    fn prepare_work_dir(&self) -> Result<PathBuf> {
        let dir = self.cfg.work_dir();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(dir)
    }

    fn banner(&self, addr: Option<Ipv4Addr>) {
        if self.quiet {
            return;
        }
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        println!("Device: {}", host);
        match addr {
            Some(a) => println!("IP: {}", a),
            None => println!("IP: unknown"),
        }
    }

    fn outgoing_metadata(&self) -> ArchiveMetadata {
        ArchiveMetadata::new(self.platform.clone())
            .with_paths(self.cfg.send_path(), self.cfg.receive_path())
    }

    /// Package `paths` and serve them to the first peer that asks
    pub async fn send(&self, paths: &[PathBuf]) -> Result<ServeOutcome> {
        if paths.is_empty() {
            anyhow::bail!("nothing to send");
        }
        self.serve_bundle(paths, self.outgoing_metadata()).await
    }

    /// Serve an archive with no entries whose metadata carries `text`
    pub async fn send_text(&self, text: &str) -> Result<ServeOutcome> {
        let metadata = self.outgoing_metadata().with_share_text(text);
        self.serve_bundle(&[], metadata).await
    }

    async fn serve_bundle(&self, paths: &[PathBuf], metadata: ArchiveMetadata) -> Result<ServeOutcome> {
        self.banner(local_ipv4().ok());
        let listener = match bind(self.cfg.port).await? {
            Listening::Bound(l) => l,
            Listening::InUse(msg) => return Ok(ServeOutcome::AlreadyRunning(msg)),
        };

        self.prepare_work_dir()?;
        let archive = self.cfg.send_path();
        remove_stale(&archive)?;
        ArchiveBuilder::new(self.cfg.anchor.as_str())
            .quiet(self.quiet)
            .logger(self.logger.clone())
            .build(paths, &archive, &metadata)?;

        TransferServer::new(self.cfg.documents_root(), archive)
            .logger(self.logger.clone())
            .serve_on(listener)
            .await
    }

    /// One scan of the local /24, own address excluded
    pub async fn scan_once(&self) -> Result<(Ipv4Addr, BTreeSet<Ipv4Addr>)> {
        let scanner = PeerScanner::new(self.scan_options())?;
        let found = scanner.scan().await;
        Ok((scanner.self_addr(), found))
    }

    /// Wait for a peer, then download, extract and post-process its bundle
    pub async fn receive(&self, cancel: watch::Receiver<bool>) -> Result<ReceiveOutcome> {
        let scanner = PeerScanner::new(self.scan_options())?;
        self.banner(Some(scanner.self_addr()));
        match self.discover(&scanner, cancel).await {
            Some(peer) => self.receive_from(peer).await,
            None => Ok(ReceiveOutcome::Cancelled),
        }
    }

    /// Receive bundles back to back until cancelled. A failed attempt is
    /// reported and the cycle restarts after the poll interval.
    pub async fn receive_forever(&self, mut cancel: watch::Receiver<bool>) -> Result<()> {
        let scanner = PeerScanner::new(self.scan_options())?;
        self.banner(Some(scanner.self_addr()));
        loop {
            let peer = match self.discover(&scanner, cancel.clone()).await {
                Some(p) => p,
                None => return Ok(()),
            };
            match self.receive_from(peer).await {
                Ok(ReceiveOutcome::Completed(report)) => {
                    println!(
                        "Received {} file(s) from {}",
                        report.extraction.extracted.len(),
                        report.peer
                    );
                }
                Ok(ReceiveOutcome::ArchiveMissing(path)) => {
                    eprintln!("{} is not found", path.display());
                }
                Ok(ReceiveOutcome::Cancelled) => return Ok(()),
                Err(e) => eprintln!("Receive from {} failed: {:#}", peer, e),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.poll_interval()) => {}
                _ = cancelled(&mut cancel) => return Ok(()),
            }
        }
    }

    /// Scan until someone answers. Several answers resolve to the lowest address.
    async fn discover(&self, scanner: &PeerScanner, mut cancel: watch::Receiver<bool>) -> Option<Ipv4Addr> {
        if !self.quiet {
            println!("Detecting Server.....");
        }
        loop {
            if *cancel.borrow() {
                return None;
            }
            let found = tokio::select! {
                found = scanner.scan() => found,
                _ = cancelled(&mut cancel) => return None,
            };
            if let Some(&peer) = found.iter().next() {
                if found.len() > 1 {
                    let others: Vec<String> = found.iter().skip(1).map(|a| a.to_string()).collect();
                    println!("{} peers answered; using {} (ignoring {})", found.len(), peer, others.join(", "));
                }
                return Some(peer);
            }
            if !self.quiet {
                println!("waiting for {}s", self.cfg.poll_interval_secs);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.poll_interval()) => {}
                _ = cancelled(&mut cancel) => return None,
            }
        }
    }

    /// Download from a known peer and finish the receive
    pub async fn receive_from(&self, peer: Ipv4Addr) -> Result<ReceiveOutcome> {
        let started = Instant::now();
        let work_dir = self.prepare_work_dir()?;
        let target = self.cfg.receive_path();
        remove_stale(&target)?;

        let url = archive_url(peer, self.cfg.port, &self.cfg.archive_request_path())?;
        let display = ProgressDisplay::new(self.cfg.compact_progress, !self.quiet);
        let fetched = match download(&url, &target, &display).await {
            Ok(r) => r,
            Err(e) => {
                display.abandon(&format!("{:#}", e));
                self.logger.error("download", &target, &format!("{:#}", e));
                let _ = fs::remove_file(&target);
                return Err(e);
            }
        };
        self.logger
            .download(url.as_str(), fetched.bytes, fetched.elapsed.as_secs_f64());

        if !target.is_file() {
            self.ui.notify(&format!("{} is not found", target.display()));
            return Ok(ReceiveOutcome::ArchiveMissing(target));
        }

        let dest = work_dir.join(Local::now().format("%Y-%m-%d %H-%M-%S").to_string());
        let extracted = Extractor::new()
            .quiet(self.quiet)
            .logger(self.logger.clone())
            .extract(&target, &dest);
        if let Err(e) = fs::remove_file(&target) {
            self.logger.error("cleanup", &target, &e.to_string());
        }
        let (metadata, extraction) = extracted?;

        let action = self.post_process(&metadata, &extraction)?;
        if !self.quiet {
            println!("Done!!");
        }
        self.logger.done(
            extraction.extracted.len() as u64,
            extraction.failed.len() as u64,
            started.elapsed().as_secs_f64(),
        );
        Ok(ReceiveOutcome::Completed(Box::new(ReceiveReport {
            peer,
            download: fetched,
            metadata,
            extraction,
            action,
        })))
    }

    fn post_process(&self, metadata: &ArchiveMetadata, extraction: &ExtractionReport) -> Result<PostAction> {
        let dest = &extraction.dest;
        if let Some(text) = &metadata.share_text {
            let copied = self.ui.clipboard_set(text);
            if copied {
                self.ui.notify("Text was copied to the clipboard");
            } else {
                self.ui.notify(&format!("Received text:\n{}", text));
            }
            if let Err(e) = prune_empty_dirs(dest, true) {
                self.logger.error("prune", dest, &e.to_string());
            }
            return Ok(PostAction::SharedText { copied });
        }

        let same_app = metadata.sender.policy().post_extract == PostExtract::Reconcile
            && self.platform.policy().post_extract == PostExtract::Reconcile;
        let action = if same_app {
            if self.ui.confirm("Move to original path?") == Choice::Yes {
                let report = reconcile(
                    dest,
                    &self.cfg.documents_root(),
                    self.ui.as_ref(),
                    self.logger.as_ref(),
                    !self.quiet,
                )?;
                PostAction::Reconciled(report)
            } else {
                PostAction::ReconcileDeclined
            }
        } else {
            self.ui.notify(&format!("Sender is {}", metadata.sender));
            PostAction::ReportedSender(metadata.sender.clone())
        };

        if dest.is_dir() {
            self.ui.reveal(dest);
        }
        Ok(action)
    }
}

/// Resolves once `true` is published; never resolves if the sender is gone
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove stale {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::Headless;
    use crate::logger::NoopLogger;
    use std::time::Duration;

    fn session(root: &Path) -> Session {
        let cfg = SessionConfig {
            documents_root: Some(root.to_path_buf()),
            ..Default::default()
        };
        Session::new(cfg, Arc::new(NoopLogger), Arc::new(Headless))
            .unwrap()
            .quiet(true)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = SessionConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert!(Session::new(cfg, Arc::new(NoopLogger), Arc::new(Headless)).is_err());
    }

    #[test]
    fn outgoing_metadata_carries_bookkeeping_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let s = session(tmp.path());
        let m = s.outgoing_metadata();
        assert_eq!(m.sender, SenderPlatform::local(false));
        assert_eq!(m.send_path.as_deref(), Some(tmp.path().join("Transfer/SendFile.zip").as_path()));
        assert!(m.share_text.is_none());
    }

    #[test]
    fn stale_removal_tolerates_absence() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("gone.zip");
        remove_stale(&p).unwrap();
        fs::write(&p, b"x").unwrap();
        remove_stale(&p).unwrap();
        assert!(!p.exists());
    }

    #[tokio::test]
    async fn cancelled_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { cancelled(&mut rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_never_cancels() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let res = tokio::time::timeout(Duration::from_millis(50), cancelled(&mut rx)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn discovery_stops_when_cancelled() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = SessionConfig {
            documents_root: Some(tmp.path().to_path_buf()),
            poll_interval_secs: 30.0,
            probe_timeout_ms: 50,
            ..Default::default()
        };
        // a port nobody listens on
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        cfg.port = probe.local_addr().unwrap().port();
        drop(probe);
        let s = Session::new(cfg, Arc::new(NoopLogger), Arc::new(Headless))
            .unwrap()
            .quiet(true);
        let scanner = PeerScanner::with_address(Ipv4Addr::new(127, 0, 0, 1), s.scan_options());

        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tx.send_replace(true);
        });
        let found = tokio::time::timeout(Duration::from_secs(10), s.discover(&scanner, rx))
            .await
            .unwrap();
        assert_eq!(found, None);
        stopper.await.unwrap();
    }

    // 127.0.0.0/8 beyond .1 is only routable out of the box on Linux
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn several_answers_resolve_to_the_lowest_address() {
        let high = tokio::net::TcpListener::bind("127.0.0.3:0").await.unwrap();
        let port = high.local_addr().unwrap().port();
        let _low = tokio::net::TcpListener::bind(("127.0.0.2", port)).await.unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let cfg = SessionConfig {
            documents_root: Some(tmp.path().to_path_buf()),
            port,
            probe_timeout_ms: 500,
            ..Default::default()
        };
        let s = Session::new(cfg, Arc::new(NoopLogger), Arc::new(Headless))
            .unwrap()
            .quiet(true);
        let scanner = PeerScanner::with_address(Ipv4Addr::new(127, 0, 0, 250), s.scan_options());
        let (_tx, rx) = watch::channel(false);

        let picked = tokio::time::timeout(Duration::from_secs(10), s.discover(&scanner, rx))
            .await
            .unwrap();
        assert_eq!(picked, Some(Ipv4Addr::new(127, 0, 0, 2)));
    }

    #[tokio::test]
    async fn unreachable_peer_is_an_error_and_leaves_no_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = SessionConfig {
            documents_root: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        cfg.port = probe.local_addr().unwrap().port();
        drop(probe);
        let s = Session::new(cfg, Arc::new(NoopLogger), Arc::new(Headless))
            .unwrap()
            .quiet(true);
        assert!(s.receive_from(Ipv4Addr::LOCALHOST).await.is_err());
        assert!(!s.config().receive_path().exists());
    }
}
