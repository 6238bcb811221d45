//! Download progress accounting and terminal display
//!
//! `DownloadProgress` is pure bookkeeping driven by the caller's clock so the
//! percent/ETA rules can be checked without a network. `ProgressDisplay`
//! renders snapshots with indicatif.

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

const SAMPLE_WINDOW: Duration = Duration::from_secs(1);
const MIN_CHUNK: usize = 4 * 1024;
const MAX_CHUNK: usize = 16 * 1024 * 1024;

/// Human-readable size: whole bytes/KB, one decimal for MB, two above
pub fn human_size(bytes: u64, no_suffix: bool) -> String {
    if bytes == 1 && !no_suffix {
        return "1 byte".to_string();
    }
    const TABLE: [(&str, usize); 6] = [
        ("bytes", 0),
        ("KB", 0),
        ("MB", 1),
        ("GB", 2),
        ("TB", 2),
        ("PB", 2),
    ];
    let mut num = bytes as f64;
    let mut pick = TABLE[0];
    for (i, entry) in TABLE.iter().enumerate() {
        pick = *entry;
        if num < 1024.0 || i == TABLE.len() - 1 {
            break;
        }
        num /= 1024.0;
    }
    let (suffix, precision) = pick;
    let formatted = if precision == 0 {
        format!("{}", num as u64)
    } else {
        format!("{:.*}", precision, num)
    };
    if no_suffix {
        formatted
    } else {
        format!("{} {}", formatted, suffix)
    }
}

/// Read size for a body of `total` bytes: about 1% of it
pub fn chunk_size_for(total: u64) -> usize {
    ((total / 100) as usize).clamp(MIN_CHUNK, MAX_CHUNK)
}

pub fn percent(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let p = (received as u128 * 100) / total as u128;
    p.min(100) as u8
}

/// `mm:ss`, `00:00` only once complete. `∞` while no rate is known or the
/// estimate rounds down to zero before the end.
pub fn format_eta(eta: Option<Duration>, percent: u8) -> String {
    if percent >= 100 {
        return "00:00".to_string();
    }
    match eta.map(|d| d.as_secs()) {
        Some(secs) if secs > 0 => format!("{:02}:{:02}", secs / 60, secs % 60),
        _ => "∞".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub received: u64,
    pub total: u64,
    pub percent: u8,
    /// Bytes per second over the last full window, or the partial count before one
    pub rate: u64,
    pub eta: String,
}

#[derive(Debug)]
pub struct DownloadProgress {
    total: u64,
    received: u64,
    window_start: Instant,
    window_bytes: u64,
    rate: Option<f64>,
    eta: Option<Duration>,
}

impl DownloadProgress {
    pub fn new(total: u64, now: Instant) -> Self {
        Self {
            total,
            received: 0,
            window_start: now,
            window_bytes: 0,
            rate: None,
            eta: None,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Account for `n` more bytes; the rate and ETA are re-sampled once a
    /// full window has elapsed.
    pub fn record(&mut self, n: u64, now: Instant) -> ProgressSnapshot {
        self.received += n;
        self.window_bytes += n;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= SAMPLE_WINDOW {
            let rate = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.rate = Some(rate);
            let remaining = self.total.saturating_sub(self.received);
            self.eta = (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate));
            self.window_start = now;
            self.window_bytes = 0;
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let percent = percent(self.received, self.total);
        ProgressSnapshot {
            received: self.received,
            total: self.total,
            percent,
            rate: self.rate.map(|r| r as u64).unwrap_or(self.window_bytes),
            eta: format_eta(self.eta, percent),
        }
    }
}

pub struct ProgressDisplay {
    bar: ProgressBar,
    compact: bool,
}

impl ProgressDisplay {
    pub fn new(compact: bool, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(100)
        } else {
            ProgressBar::hidden()
        };
        let template = if compact { "{msg}" } else { "[{bar:50}] {msg}" };
        bar.set_style(
            ProgressStyle::default_bar()
                .template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("= "),
        );
        Self { bar, compact }
    }

    pub fn update(&self, s: &ProgressSnapshot) {
        self.bar.set_position(s.percent as u64);
        let msg = if self.compact {
            format!(
                "{}/{} {}% {}/s {}",
                human_size(s.received, true),
                human_size(s.total, false),
                s.percent,
                human_size(s.rate, false),
                s.eta
            )
        } else {
            format!(
                "{} {}% {}/s {}",
                human_size(s.total, false),
                s.percent,
                human_size(s.rate, false),
                s.eta
            )
        };
        self.bar.set_message(msg);
    }

    pub fn finish(&self, bytes: u64, elapsed: Duration) {
        self.bar.finish_with_message(format!(
            "{} {} in {:.1}s",
            "Downloaded".with(Color::Green).bold(),
            human_size(bytes, false),
            elapsed.as_secs_f64()
        ));
    }

    pub fn abandon(&self, msg: &str) {
        self.bar
            .abandon_with_message(format!("{} {}", "Failed".with(Color::Red).bold(), msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_size_follows_precision_table() {
        assert_eq!(human_size(1, false), "1 byte");
        assert_eq!(human_size(512, false), "512 bytes");
        assert_eq!(human_size(2048, false), "2 KB");
        assert_eq!(human_size(5 * 1024 * 1024 + 512 * 1024, false), "5.5 MB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024, true), "3.00");
    }

    #[test]
    fn percent_is_floored_and_capped() {
        assert_eq!(percent(0, 300), 0);
        assert_eq!(percent(299, 300), 99);
        assert_eq!(percent(300, 300), 100);
        assert_eq!(percent(400, 300), 100);
    }

    #[test]
    fn eta_is_infinite_until_first_window() {
        let t0 = Instant::now();
        let mut p = DownloadProgress::new(1000, t0);
        let s = p.record(100, t0 + Duration::from_millis(500));
        assert_eq!(s.eta, "∞");
        assert_eq!(s.rate, 100);

        let s = p.record(100, t0 + Duration::from_secs(1));
        // 200 bytes over one second, 800 remaining
        assert_eq!(s.rate, 200);
        assert_eq!(s.eta, "00:04");
    }

    #[test]
    fn percent_is_monotonic_and_ends_at_100() {
        let t0 = Instant::now();
        let total = 10_007u64;
        let mut p = DownloadProgress::new(total, t0);
        let chunk = chunk_size_for(total) as u64;
        let mut last = 0u8;
        let mut step = 0u64;
        while p.received() < total {
            step += 1;
            let n = chunk.min(total - p.received());
            let s = p.record(n, t0 + Duration::from_millis(step * 300));
            assert!(s.percent >= last);
            assert_eq!(s.percent as u64, s.received * 100 / total);
            last = s.percent;
        }
        let done = p.snapshot();
        assert_eq!(done.percent, 100);
        assert_eq!(done.eta, "00:00");
    }

    #[test]
    fn sub_second_eta_never_reads_as_done() {
        assert_eq!(format_eta(Some(Duration::from_millis(400)), 99), "∞");
        assert_eq!(format_eta(Some(Duration::from_secs(61)), 50), "01:01");
        assert_eq!(format_eta(Some(Duration::ZERO), 100), "00:00");

        let t0 = Instant::now();
        let mut p = DownloadProgress::new(1000, t0);
        // 990 bytes in one second leaves 10 bytes, about 10ms to go
        let s = p.record(990, t0 + Duration::from_secs(1));
        assert_eq!(s.percent, 99);
        assert_eq!(s.eta, "∞");
    }

    #[test]
    fn zero_rate_window_keeps_eta_infinite() {
        let t0 = Instant::now();
        let mut p = DownloadProgress::new(1000, t0);
        let s = p.record(0, t0 + Duration::from_secs(2));
        assert_eq!(s.eta, "∞");
    }

    #[test]
    fn chunk_size_tracks_one_percent() {
        assert_eq!(chunk_size_for(100 * 1024 * 1024), 1024 * 1024);
        assert_eq!(chunk_size_for(10), MIN_CHUNK);
        assert_eq!(chunk_size_for(u64::MAX / 2), MAX_CHUNK);
    }
}
