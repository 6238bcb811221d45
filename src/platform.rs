//! Sender platform tags and the per-platform receive policy table

use encoding_rs::{Encoding, SHIFT_JIS, UTF_8};
use std::fmt;

/// Platform tag carried in the archive metadata `sender` key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SenderPlatform {
    /// Another ferry peer running against a managed documents tree
    Ferry,
    Windows,
    Linux,
    MacOs,
    Other(String),
}

/// What the receiver does once extraction has finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostExtract {
    /// Offer to merge the extracted tree into the local documents root
    Reconcile,
    /// Only report which platform sent the bundle
    ReportSender,
}

#[derive(Debug, Clone, Copy)]
pub struct PlatformPolicy {
    /// Encoding used to read stored entry names
    pub name_encoding: &'static Encoding,
    pub post_extract: PostExtract,
}

impl SenderPlatform {
    pub const FERRY_TAG: &'static str = "Ferry";

    /// Tag describing the local host
    pub fn local(managed_documents: bool) -> Self {
        if managed_documents {
            return SenderPlatform::Ferry;
        }
        match std::env::consts::OS {
            "windows" => SenderPlatform::Windows,
            "linux" => SenderPlatform::Linux,
            "macos" => SenderPlatform::MacOs,
            other => SenderPlatform::Other(other.to_string()),
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            Self::FERRY_TAG => SenderPlatform::Ferry,
            "Windows" => SenderPlatform::Windows,
            "Linux" => SenderPlatform::Linux,
            // Darwin is what older senders report for macOS
            "macOS" | "Darwin" => SenderPlatform::MacOs,
            other => SenderPlatform::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            SenderPlatform::Ferry => Self::FERRY_TAG,
            SenderPlatform::Windows => "Windows",
            SenderPlatform::Linux => "Linux",
            SenderPlatform::MacOs => "macOS",
            SenderPlatform::Other(tag) => tag,
        }
    }

    pub fn policy(&self) -> PlatformPolicy {
        match self {
            SenderPlatform::Ferry => PlatformPolicy {
                name_encoding: UTF_8,
                post_extract: PostExtract::Reconcile,
            },
            // Native console code page of the Windows hosts this interoperates with
            SenderPlatform::Windows => PlatformPolicy {
                name_encoding: SHIFT_JIS,
                post_extract: PostExtract::ReportSender,
            },
            SenderPlatform::Linux | SenderPlatform::MacOs | SenderPlatform::Other(_) => {
                PlatformPolicy {
                    name_encoding: UTF_8,
                    post_extract: PostExtract::ReportSender,
                }
            }
        }
    }

    /// Decode a stored entry name, substituting U+FFFD for undecodable bytes
    pub fn decode_name(&self, raw: &[u8]) -> String {
        let (text, _had_errors) = self.policy().name_encoding.decode_without_bom_handling(raw);
        text.into_owned()
    }
}

impl fmt::Display for SenderPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_the_table() {
        for p in [
            SenderPlatform::Ferry,
            SenderPlatform::Windows,
            SenderPlatform::Linux,
            SenderPlatform::MacOs,
            SenderPlatform::Other("Plan9".into()),
        ] {
            assert_eq!(SenderPlatform::from_tag(p.tag()), p);
        }
        assert_eq!(SenderPlatform::from_tag("Darwin"), SenderPlatform::MacOs);
    }

    #[test]
    fn only_ferry_peers_reconcile() {
        assert_eq!(SenderPlatform::Ferry.policy().post_extract, PostExtract::Reconcile);
        assert_eq!(SenderPlatform::Linux.policy().post_extract, PostExtract::ReportSender);
        assert_eq!(SenderPlatform::Windows.policy().post_extract, PostExtract::ReportSender);
    }

    #[test]
    fn windows_names_decode_as_shift_jis() {
        // "日本" in Shift_JIS
        let raw = [0x93, 0xfa, 0x96, 0x7b, b'.', b't', b'x', b't'];
        assert_eq!(SenderPlatform::Windows.decode_name(&raw), "日本.txt");
    }

    #[test]
    fn invalid_utf8_gets_replacement_chars() {
        let raw = [b'a', 0xff, b'b'];
        assert_eq!(SenderPlatform::Linux.decode_name(&raw), "a\u{fffd}b");
    }

    #[test]
    fn managed_host_identifies_as_ferry() {
        assert_eq!(SenderPlatform::local(true), SenderPlatform::Ferry);
        assert_ne!(SenderPlatform::local(false), SenderPlatform::Ferry);
    }
}
