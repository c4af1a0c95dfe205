use std::env;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("no clipboard helper found")]
    NotAvailable,
    #[error("clipboard write via {command} failed: {reason}")]
    WriteFailed { command: String, reason: String },
}

pub trait Clipboard {
    fn copy(&self, text: &str) -> Result<(), ClipboardError>;
}

/// A clipboard helper: program name plus fixed arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Helper {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

/// Helpers in the order they are tried.
pub const HELPERS: &[Helper] = &[
    Helper {
        program: "wl-copy",
        args: &[],
    },
    Helper {
        program: "xclip",
        args: &["-selection", "clipboard"],
    },
    Helper {
        program: "pbcopy",
        args: &[],
    },
    Helper {
        program: "clip",
        args: &[],
    },
];

/// Pipes text into the first helper found on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> Result<(), ClipboardError> {
        let helper = HELPERS
            .iter()
            .find(|h| command_exists(h.program))
            .ok_or(ClipboardError::NotAvailable)?;
        debug!(program = helper.program, bytes = text.len(), "copying to clipboard");
        run_with_input(helper, text)
    }
}

/// A clipboard that is never available; forces the manual fallback.
#[derive(Debug, Clone, Default)]
pub struct NoClipboard;

impl Clipboard for NoClipboard {
    fn copy(&self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::NotAvailable)
    }
}

fn command_exists(command: &str) -> bool {
    let Some(path_var) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path_var).any(|dir| {
        dir.join(command).is_file()
            || (cfg!(target_os = "windows") && dir.join(format!("{command}.exe")).is_file())
    })
}

fn run_with_input(helper: &Helper, content: &str) -> Result<(), ClipboardError> {
    let failed = |reason: String| ClipboardError::WriteFailed {
        command: helper.program.to_string(),
        reason,
    };
    let mut child = Command::new(Path::new(helper.program))
        .args(helper.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| failed(e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(content.as_bytes())
            .map_err(|e| failed(e.to_string()))?;
    }

    let status = child.wait().map_err(|e| failed(e.to_string()))?;
    if status.success() {
        Ok(())
    } else {
        Err(failed(format!("exited with {status}")))
    }
}

/// Text framed for manual selection when no clipboard is reachable.
pub fn manual_copy_text(text: &str) -> String {
    let mut out = String::from("----- BEGIN PATCH TEXT -----\n");
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("----- END PATCH TEXT -----\n");
    out
}
