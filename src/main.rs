//! Ferry - serverless LAN hand-off of file bundles and text snippets
//!
//! One side packages and serves a single archive; the other scans its /24
//! for the transfer port, downloads the archive and unpacks it.

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::style::{Color, Stylize};
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use ferry::cli::{Args, Command};
use ferry::collab::{Collaborators, ConsoleUi};
use ferry::config::SessionConfig;
use ferry::logger::{Logger, NoopLogger, TextLogger};
use ferry::progress::human_size;
use ferry::server::ServeOutcome;
use ferry::session::{ReceiveOutcome, Session};

fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = SessionConfig::load(args.common.config.as_deref())?;
    args.common.apply(&mut cfg);
    cfg.validate()?;

    // Choose logger once; NoopLogger when no log file is configured
    let logger: Arc<dyn Logger> = match cfg.log_file {
        Some(ref p) => match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("Logging disabled: {:#}", e);
                Arc::new(NoopLogger)
            }
        },
        None => Arc::new(NoopLogger),
    };
    let ui = Arc::new(ConsoleUi::new(io::stdin().is_terminal()));

    let command = match args.command {
        Some(c) => c,
        None => match menu(ui.as_ref())? {
            Some(c) => c,
            None => return Ok(()),
        },
    };

    // The first Ctrl-C during receive stops discovery; anything else exits
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancellable = matches!(command, Command::Receive { .. });
    ctrlc::set_handler(move || {
        if cancellable && !*cancel_tx.borrow() {
            eprintln!("\nInterrupted. Stopping receive (Ctrl-C again to quit)...");
            cancel_tx.send_replace(true);
            return;
        }
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    let session = Session::new(cfg, logger, ui.clone())?.quiet(args.common.quiet);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(run(command, &session, ui.as_ref(), cancel_rx))
}

async fn run(
    command: Command,
    session: &Session,
    ui: &dyn Collaborators,
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    match command {
        Command::Send { paths } => report_serve(session.send(&paths).await?),
        Command::Text { text } => {
            let text = match text {
                Some(t) => t,
                None => read_text(ui)?,
            };
            report_serve(session.send_text(&text).await?)
        }
        Command::Receive { forever: true } => session.receive_forever(cancel).await,
        Command::Receive { forever: false } => match session.receive(cancel).await? {
            ReceiveOutcome::Completed(report) => {
                let failed = report.extraction.failed.len();
                if failed > 0 {
                    eprintln!(
                        "{} {} entr{} could not be extracted",
                        "Warning:".with(Color::Yellow).bold(),
                        failed,
                        if failed == 1 { "y" } else { "ies" }
                    );
                }
                Ok(())
            }
            ReceiveOutcome::ArchiveMissing(path) => {
                anyhow::bail!("{} is not found", path.display())
            }
            ReceiveOutcome::Cancelled => {
                println!("Receive cancelled");
                Ok(())
            }
        },
        Command::Scan => {
            let (me, peers) = session.scan_once().await?;
            println!("Scanned from {}", me);
            if peers.is_empty() {
                println!("No peers found");
            }
            for peer in peers {
                println!("{}", peer);
            }
            Ok(())
        }
    }
}

fn report_serve(outcome: ServeOutcome) -> Result<()> {
    match outcome {
        ServeOutcome::Completed { peer, bytes } => {
            println!(
                "{} {} to {}",
                "Sent".with(Color::Green).bold(),
                human_size(bytes, false),
                peer.ip()
            );
            Ok(())
        }
        ServeOutcome::Failed(msg) => anyhow::bail!("Transfer failed: {}", msg),
        // already reported when the bind failed
        ServeOutcome::AlreadyRunning(_) => Ok(()),
    }
}

/// Clipboard first, then whatever arrives on stdin
fn read_text(ui: &dyn Collaborators) -> Result<String> {
    if let Some(text) = ui.clipboard_get().filter(|t| !t.is_empty()) {
        return Ok(text);
    }
    if io::stdin().is_terminal() {
        println!("Enter the text to share, then end input (Ctrl-D, or Ctrl-Z on Windows):");
    }
    let mut text = String::new();
    io::stdin()
        .read_to_string(&mut text)
        .context("read text from stdin")?;
    let text = text.trim_end_matches(&['\r', '\n'][..]).to_string();
    if text.is_empty() {
        anyhow::bail!("no text to share");
    }
    Ok(text)
}

fn prompt_line(prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    let mut line = String::new();
    let n = io::stdin().lock().read_line(&mut line).context("read stdin")?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn menu(ui: &dyn Collaborators) -> Result<Option<Command>> {
    println!("1: Send files");
    println!("2: Receive");
    println!("3: Send text");
    let choice = match prompt_line("> ")? {
        Some(c) => c,
        None => return Ok(None),
    };
    let command = match choice.as_str() {
        "1" => {
            let paths = match ui.pick_files() {
                Some(p) => p,
                None => {
                    println!("Paths to send, one per line; empty line to finish:");
                    let mut paths = Vec::new();
                    while let Some(line) = prompt_line("  ")? {
                        if line.is_empty() {
                            break;
                        }
                        paths.push(PathBuf::from(line));
                    }
                    paths
                }
            };
            if paths.is_empty() {
                println!("Nothing selected");
                return Ok(None);
            }
            Command::Send { paths }
        }
        "2" => Command::Receive { forever: false },
        "3" => Command::Text { text: None },
        other => {
            println!("Unknown choice: {}", other);
            return Ok(None);
        }
    };
    Ok(Some(command))
}
