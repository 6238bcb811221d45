//! Ferry library
//!
//! LAN hand-off of file bundles and text snippets: peer discovery, archive
//! packaging, a one-shot HTTP server and the receive pipeline.

pub mod archive;
pub mod cli;
pub mod collab;
pub mod config;
pub mod download;
pub mod extract;
pub mod fs_enum;
pub mod logger;
pub mod metadata;
pub mod platform;
pub mod progress;
pub mod reconcile;
pub mod scan;
pub mod server;
pub mod session;
pub mod url;
