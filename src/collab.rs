//! Capabilities the transfer flow borrows from its host: file picking,
//! clipboard, confirmations, and opening things in the desktop shell.
//! Every method has a text-only fallback so a bare terminal still works.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Yes,
    No,
    Cancel,
}

pub trait Collaborators: Send + Sync {
    fn pick_files(&self) -> Option<Vec<PathBuf>> {
        None
    }
    fn clipboard_get(&self) -> Option<String> {
        None
    }
    /// Returns false when no clipboard is available
    fn clipboard_set(&self, _text: &str) -> bool {
        false
    }
    fn confirm(&self, _message: &str) -> Choice {
        Choice::Cancel
    }
    fn reveal(&self, _path: &Path) -> bool {
        false
    }
    fn open_file(&self, _path: &Path) -> bool {
        false
    }
    fn notify(&self, message: &str) {
        println!("{}", message);
    }
}

/// No prompts, no desktop integration; confirmations resolve to Cancel
pub struct Headless;
impl Collaborators for Headless {}

/// Terminal prompts on stdin plus the platform's opener and clipboard commands
pub struct ConsoleUi {
    interactive: bool,
}

impl ConsoleUi {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    fn launch(&self, path: &Path) -> bool {
        #[cfg(windows)]
        let mut cmd = {
            let mut c = Command::new("explorer.exe");
            c.arg(path);
            c
        };
        #[cfg(target_os = "macos")]
        let mut cmd = {
            let mut c = Command::new("open");
            c.arg(path);
            c
        };
        #[cfg(all(unix, not(target_os = "macos")))]
        let mut cmd = {
            let mut c = Command::new("xdg-open");
            c.arg(path);
            c
        };
        cmd.stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .is_ok()
    }
}

#[cfg(windows)]
const CLIPBOARD_COPY: (&str, &[&str]) = ("clip", &[]);
#[cfg(windows)]
const CLIPBOARD_PASTE: (&str, &[&str]) = ("powershell", &["-NoProfile", "-Command", "Get-Clipboard"]);
#[cfg(target_os = "macos")]
const CLIPBOARD_COPY: (&str, &[&str]) = ("pbcopy", &[]);
#[cfg(target_os = "macos")]
const CLIPBOARD_PASTE: (&str, &[&str]) = ("pbpaste", &[]);
#[cfg(all(unix, not(target_os = "macos")))]
const CLIPBOARD_COPY: (&str, &[&str]) = ("xclip", &["-selection", "clipboard"]);
#[cfg(all(unix, not(target_os = "macos")))]
const CLIPBOARD_PASTE: (&str, &[&str]) = ("xclip", &["-selection", "clipboard", "-o"]);

/// Feed `text` to a command's stdin; true only if it ran and exited cleanly
fn pipe_to(program: &str, args: &[&str], text: &str) -> bool {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match child {
        Ok(c) => c,
        Err(_) => return false,
    };
    let written = match child.stdin.take() {
        // stdin is dropped at the end of the arm so the command sees EOF
        Some(mut stdin) => stdin.write_all(text.as_bytes()).is_ok(),
        None => false,
    };
    matches!(child.wait(), Ok(status) if status.success()) && written
}

/// Stdout of a command that exited cleanly
fn read_from(program: &str, args: &[&str]) -> Option<String> {
    let out = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).into_owned())
}

impl Collaborators for ConsoleUi {
    fn clipboard_get(&self) -> Option<String> {
        let (program, args) = CLIPBOARD_PASTE;
        let text = read_from(program, args)?;
        let text = text.trim_end_matches(&['\r', '\n'][..]);
        (!text.is_empty()).then(|| text.to_string())
    }

    fn clipboard_set(&self, text: &str) -> bool {
        let (program, args) = CLIPBOARD_COPY;
        pipe_to(program, args, text)
    }

    fn confirm(&self, message: &str) -> Choice {
        if !self.interactive {
            return Choice::Cancel;
        }
        print!("{} [y/N] ", message);
        let _ = io::stdout().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => Choice::Cancel,
            Ok(_) => parse_choice(&line),
        }
    }

    fn reveal(&self, path: &Path) -> bool {
        if !self.interactive {
            return false;
        }
        self.launch(path)
    }

    fn open_file(&self, path: &Path) -> bool {
        self.launch(path)
    }
}

pub fn parse_choice(answer: &str) -> Choice {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Choice::Yes,
        "n" | "no" | "" => Choice::No,
        _ => Choice::Cancel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_answers() {
        assert_eq!(parse_choice("Y\n"), Choice::Yes);
        assert_eq!(parse_choice(" yes "), Choice::Yes);
        assert_eq!(parse_choice("\n"), Choice::No);
        assert_eq!(parse_choice("maybe"), Choice::Cancel);
    }

    #[test]
    fn headless_declines_everything() {
        let ui = Headless;
        assert_eq!(ui.confirm("replace?"), Choice::Cancel);
        assert!(!ui.clipboard_set("x"));
        assert!(ui.clipboard_get().is_none());
        assert!(ui.pick_files().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn clipboard_commands_report_their_exit() {
        assert!(pipe_to("sh", &["-c", "cat > /dev/null"], "shared text"));
        assert!(!pipe_to("sh", &["-c", "cat > /dev/null; exit 3"], "shared text"));
        assert!(!pipe_to("ferry-no-such-clipboard-tool", &[], "x"));

        assert_eq!(read_from("sh", &["-c", "printf hi"]).as_deref(), Some("hi"));
        assert_eq!(read_from("sh", &["-c", "printf hi; exit 1"]), None);
        assert_eq!(read_from("ferry-no-such-clipboard-tool", &[]), None);
    }

    #[cfg(unix)]
    #[test]
    fn piped_text_reaches_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clip.txt");
        let script = format!("cat > '{}'", out.display());
        assert!(pipe_to("sh", &["-c", &script], "line one\nline two"));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "line one\nline two");
    }
}
