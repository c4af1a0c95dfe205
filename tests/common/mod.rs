#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const PATCH: &str = "*** Begin Patch\n*** Update File: src/lib.rs\n@@\n-old\n+new\n*** End Patch";

/// Run the binary inside `dir` with a clean environment: no user config,
/// preferences under `dir/prefs`, and no clipboard helpers on `PATH`.
pub fn run_cli(dir: &Path, args: &[&str], stdin: &str) -> (i32, String, String) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_codex-log-view"))
        .args(args)
        .current_dir(dir)
        .env_clear()
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env("CODEX_LOG_VIEW_PREFS_DIR", dir.join("prefs"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn binary");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();

    let output = child.wait_with_output().unwrap();
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

pub fn run(dir: &Path, args: &[&str]) -> (i32, String, String) {
    run_cli(dir, args, "")
}

pub fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// Render `args` as JSON and parse the result.
pub fn render_json(dir: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = vec!["render", "--format", "json"];
    full.extend_from_slice(args);
    let (code, stdout, stderr) = run(dir, &full);
    assert_eq!(code, 0, "stderr: {stderr}");
    serde_json::from_str(&stdout).unwrap()
}

fn row(timestamp: &str, outer: &str, payload: serde_json::Value) -> String {
    serde_json::json!({ "timestamp": timestamp, "type": outer, "payload": payload }).to_string()
}

/// A small rollout: nine non-blank lines, one session header, one
/// malformed line. Blocks, in order:
/// 0 user, 1 reasoning, 2 apply_patch, 3 function_output, 4 usage,
/// 5 usage, 6 other (malformed), 7 assistant.
pub fn rollout() -> String {
    use serde_json::json;
    let args = json!({ "command": ["apply_patch", PATCH] }).to_string();
    let output = json!({ "output": "Success. Updated src/lib.rs", "metadata": { "exit_code": 0 } }).to_string();
    [
        row(
            "2025-10-01T10:00:00Z",
            "session_meta",
            json!({ "id": "0199-abcd", "cwd": "/work/repo", "originator": "codex_cli_rs", "cli_version": "0.44.0" }),
        ),
        row(
            "2025-10-01T10:00:01Z",
            "response_item",
            json!({ "type": "message", "role": "user", "content": [{ "type": "input_text", "text": "Please fix the bug" }] }),
        ),
        row(
            "2025-10-01T10:00:02Z",
            "response_item",
            json!({ "type": "reasoning", "summary": [{ "type": "summary_text", "text": "Looking at lib.rs" }] }),
        ),
        row(
            "2025-10-01T10:00:03Z",
            "response_item",
            json!({ "type": "function_call", "name": "shell", "call_id": "call_1", "arguments": args }),
        ),
        row(
            "2025-10-01T10:00:04Z",
            "response_item",
            json!({ "type": "function_call_output", "call_id": "call_1", "output": output }),
        ),
        row(
            "2025-10-01T10:00:05Z",
            "event_msg",
            json!({ "type": "token_count", "info": {
                "last_token_usage": { "input_tokens": 1000000, "output_tokens": 0 },
                "total_token_usage": { "input_tokens": 1000000, "output_tokens": 0 },
                "model_context_window": 272000
            } }),
        ),
        row(
            "2025-10-01T10:00:06Z",
            "event_msg",
            json!({ "type": "token_count", "info": {
                "last_token_usage": { "input_tokens": 0, "output_tokens": 1000000 },
                "total_token_usage": { "input_tokens": 1000000, "output_tokens": 1000000 }
            } }),
        ),
        "{this line is broken".to_string(),
        "".to_string(),
        row(
            "2025-10-01T10:00:07Z",
            "response_item",
            json!({ "type": "message", "role": "assistant", "content": [{ "type": "output_text", "text": "Fixed." }] }),
        ),
    ]
    .join("\n")
}
