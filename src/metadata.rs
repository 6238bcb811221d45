//! Sender-description record carried in the archive comment field

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::platform::SenderPlatform;

/// Zip comments are length-prefixed with a u16
pub const MAX_COMMENT_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    #[serde(with = "platform_tag")]
    pub sender: SenderPlatform,
    #[serde(rename = "sendPath", alias = "send_path", default, skip_serializing_if = "Option::is_none")]
    pub send_path: Option<PathBuf>,
    #[serde(rename = "receivePath", alias = "receive_path", default, skip_serializing_if = "Option::is_none")]
    pub receive_path: Option<PathBuf>,
    #[serde(rename = "share_text", default, skip_serializing_if = "Option::is_none")]
    pub share_text: Option<String>,
}

mod platform_tag {
    use super::SenderPlatform;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(p: &SenderPlatform, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(p.tag())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SenderPlatform, D::Error> {
        let tag = String::deserialize(d)?;
        Ok(SenderPlatform::from_tag(&tag))
    }
}

impl ArchiveMetadata {
    pub fn new(sender: SenderPlatform) -> Self {
        Self {
            sender,
            send_path: None,
            receive_path: None,
            share_text: None,
        }
    }

    pub fn with_paths(mut self, send_path: PathBuf, receive_path: PathBuf) -> Self {
        self.send_path = Some(send_path);
        self.receive_path = Some(receive_path);
        self
    }

    pub fn with_share_text(mut self, text: impl Into<String>) -> Self {
        self.share_text = Some(text.into());
        self
    }

    pub fn is_text_share(&self) -> bool {
        self.share_text.is_some()
    }

    /// UTF-8 JSON bytes for the archive comment slot
    pub fn encode(&self) -> Result<String> {
        let text = serde_json::to_string(self).context("serialize archive metadata")?;
        if text.len() > MAX_COMMENT_LEN {
            anyhow::bail!(
                "archive metadata is {} bytes; the comment field holds at most {}",
                text.len(),
                MAX_COMMENT_LEN
            );
        }
        Ok(text)
    }

    pub fn decode(comment: &[u8]) -> Result<Self> {
        if comment.is_empty() {
            anyhow::bail!("archive carries no metadata comment");
        }
        let text = std::str::from_utf8(comment).context("archive metadata is not UTF-8")?;
        serde_json::from_str(text).context("parse archive metadata")
    }
}
