//! URL handling for the archive resource: client-side construction and
//! server-side request-target normalization

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use reqwest::Url;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// `http://<peer>:<port>/<request_path>` with each segment percent-encoded
pub fn archive_url(peer: Ipv4Addr, port: u16, request_path: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("http://{}:{}/", peer, port))
        .with_context(|| format!("build URL for {}:{}", peer, port))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("http URL cannot be a base"))?
        .pop_if_empty()
        .extend(request_path.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

/// Reduce a request target to plain name segments: query and fragment are
/// dropped, percent escapes decoded, `.`/`..` resolved without climbing
/// above the root, and segments carrying separators or drive markers ignored.
pub fn request_segments(target: &str) -> Vec<String> {
    let path = target.split('?').next().unwrap_or("");
    let path = path.split('#').next().unwrap_or("");
    let decoded = percent_decode_str(path).decode_utf8_lossy();

    let mut stack: Vec<String> = Vec::new();
    for word in decoded.split('/') {
        match word {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            w if w.contains(&['\\', ':', '\0'][..]) => {}
            w => stack.push(w.to_string()),
        }
    }
    stack
}

/// Map a request target onto the filesystem under `root`
pub fn translate_path(root: &Path, target: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for seg in request_segments(target) {
        path.push(seg);
    }
    path
}
