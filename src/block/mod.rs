pub mod patch;

use crate::analytics::finite_number;
use crate::format::{self, RichText, escape_html};
use crate::metadata::SessionHeader;
use crate::record::{EventSource, NormalizedEvent};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::fmt;
use tracing::debug;

// ===================================================================
// Categories
// ===================================================================

/// Semantic category of a block. Filters are offered per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    User,
    Assistant,
    Reasoning,
    Plan,
    ApplyPatch,
    FunctionCall,
    FunctionOutput,
    Usage,
    /// Unrecognized record kinds and lines that failed to parse.
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::User,
        Category::Assistant,
        Category::Reasoning,
        Category::Plan,
        Category::ApplyPatch,
        Category::FunctionCall,
        Category::FunctionOutput,
        Category::Usage,
        Category::Other,
    ];

    /// Stable identifier used in markup and persisted preferences.
    pub fn key(self) -> &'static str {
        match self {
            Category::User => "user",
            Category::Assistant => "assistant",
            Category::Reasoning => "reasoning",
            Category::Plan => "plan",
            Category::ApplyPatch => "apply_patch",
            Category::FunctionCall => "function_call",
            Category::FunctionOutput => "function_output",
            Category::Usage => "usage",
            Category::Other => "other",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::User => "User",
            Category::Assistant => "Assistant",
            Category::Reasoning => "Reasoning",
            Category::Plan => "Plan",
            Category::ApplyPatch => "Apply patch",
            Category::FunctionCall => "Function call",
            Category::FunctionOutput => "Function output",
            Category::Usage => "Token usage",
            Category::Other => "Other",
        }
    }

    /// Parse a key; `-` is accepted in place of `_`.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase().replace('-', "_");
        Category::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Compiled-in visibility. Usage is hidden unless explicitly requested.
    pub fn default_visible(self) -> bool {
        self != Category::Usage
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ===================================================================
// Block content
// ===================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    InProgress,
    Todo,
}

impl StepStatus {
    fn parse(status: Option<&str>) -> Self {
        match status {
            Some("completed") => StepStatus::Done,
            Some("in_progress") => StepStatus::InProgress,
            _ => StepStatus::Todo,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            StepStatus::Done => "done",
            StepStatus::InProgress => "in-progress",
            StepStatus::Todo => "todo",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            StepStatus::Done => "\u{2705}",
            StepStatus::InProgress => "\u{23f3}",
            StepStatus::Todo => "\u{2b1c}",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub step: String,
    pub status: StepStatus,
}

/// Token counters from one usage breakdown. Non-numeric counters are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenBreakdown {
    pub input: Option<f64>,
    pub cached_input: Option<f64>,
    pub output: Option<f64>,
    pub reasoning_output: Option<f64>,
    pub total: Option<f64>,
}

impl TokenBreakdown {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let num = |key: &str| obj.get(key).and_then(finite_number);
        Some(Self {
            input: num("input_tokens"),
            cached_input: num("cached_input_tokens"),
            output: num("output_tokens"),
            reasoning_output: num("reasoning_output_tokens"),
            total: num("total_tokens"),
        })
    }

    fn rows(&self) -> Vec<(&'static str, f64)> {
        [
            ("input", self.input),
            ("cached input", self.cached_input),
            ("output", self.output),
            ("reasoning", self.reasoning_output),
            ("total", self.total),
        ]
        .into_iter()
        .filter_map(|(label, v)| v.map(|v| (label, v)))
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub total: Option<TokenBreakdown>,
    pub last: Option<TokenBreakdown>,
    pub context_window: Option<f64>,
}

impl UsageSummary {
    /// Read a `token_count` payload. Counters live under `info` when
    /// present, otherwise directly on the payload.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let info = fields.get("info").and_then(Value::as_object).unwrap_or(fields);
        Self {
            total: info.get("total_token_usage").and_then(TokenBreakdown::from_value),
            last: info.get("last_token_usage").and_then(TokenBreakdown::from_value),
            context_window: info.get("model_context_window").and_then(finite_number),
        }
    }
}

/// What a block shows. Closed set: every record kind maps to exactly one
/// variant, with [`BlockContent::Other`] as the default arm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockContent {
    Reasoning {
        text: String,
    },
    User {
        text: String,
    },
    Assistant {
        text: String,
    },
    Plan {
        explanation: Option<String>,
        steps: Vec<PlanStep>,
    },
    ApplyPatch {
        name: String,
        patch: String,
        /// Base64 of `patch`, for the copy action.
        encoded: String,
    },
    ShellCall {
        name: String,
        command: String,
        workdir: Option<String>,
    },
    FunctionCall {
        name: String,
        arguments: String,
    },
    FunctionOutput {
        body: String,
        call_id: Option<String>,
        exit_code: Option<i64>,
    },
    Usage(UsageSummary),
    Other {
        label: String,
        body: String,
    },
}

impl BlockContent {
    pub fn category(&self) -> Category {
        match self {
            BlockContent::Reasoning { .. } => Category::Reasoning,
            BlockContent::User { .. } => Category::User,
            BlockContent::Assistant { .. } => Category::Assistant,
            BlockContent::Plan { .. } => Category::Plan,
            BlockContent::ApplyPatch { .. } => Category::ApplyPatch,
            BlockContent::ShellCall { .. } | BlockContent::FunctionCall { .. } => {
                Category::FunctionCall
            }
            BlockContent::FunctionOutput { .. } => Category::FunctionOutput,
            BlockContent::Usage(_) => Category::Usage,
            BlockContent::Other { .. } => Category::Other,
        }
    }

    /// Heading shown above the block body.
    pub fn title(&self) -> String {
        match self {
            BlockContent::ApplyPatch { name, .. }
            | BlockContent::ShellCall { name, .. }
            | BlockContent::FunctionCall { name, .. } => {
                format!("{} \u{00b7} {name}", self.category().label())
            }
            BlockContent::Other { label, .. } => label.clone(),
            _ => self.category().label().to_string(),
        }
    }
}

// ===================================================================
// Block
// ===================================================================

/// One rendered unit, in document order.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    /// Position in the block list.
    pub index: usize,
    pub progress_index: usize,
    pub line: usize,
    pub timestamp: Option<String>,
    pub category: Category,
    pub title: String,
    pub collapsible: bool,
    pub initially_collapsed: bool,
    pub content: BlockContent,
    /// Rendered body markup.
    pub html: String,
}

/// Viewer settings the builder depends on.
pub struct BuildOptions<'a> {
    /// Function output longer than this many characters starts collapsed.
    pub collapse_chars: usize,
    /// Function output with more lines than this starts collapsed.
    pub collapse_lines: usize,
    pub rich_text: &'a dyn RichText,
}

/// Result of a build pass: the optional session header and the blocks.
#[derive(Debug, Default)]
pub struct Built {
    pub header: Option<SessionHeader>,
    pub blocks: Vec<Block>,
}

/// Build one block per event, in order. The first `session_meta` record
/// becomes the session header instead of a block.
pub fn build(events: &[NormalizedEvent], opts: &BuildOptions<'_>) -> Built {
    let mut built = Built {
        header: None,
        blocks: Vec::with_capacity(events.len()),
    };
    for event in events {
        if built.header.is_none() && !event.is_unparsed() && event.discriminant() == "session_meta"
        {
            built.header = Some(SessionHeader::from_fields(
                &event.fields,
                event.timestamp.as_deref(),
            ));
            continue;
        }
        let content = classify(event);
        let block = Block::new(built.blocks.len(), event, content, opts);
        built.blocks.push(block);
    }
    built
}

impl Block {
    fn new(index: usize, event: &NormalizedEvent, content: BlockContent, opts: &BuildOptions<'_>) -> Self {
        let (collapsible, initially_collapsed) = match &content {
            BlockContent::Reasoning { .. } | BlockContent::ApplyPatch { .. } => (true, false),
            BlockContent::FunctionOutput { body, .. } => (
                true,
                body.chars().count() > opts.collapse_chars
                    || body.lines().count() > opts.collapse_lines,
            ),
            _ => (false, false),
        };
        Self {
            index,
            progress_index: event.progress_index,
            line: event.line,
            timestamp: event.timestamp.clone(),
            category: content.category(),
            title: content.title(),
            collapsible,
            initially_collapsed,
            html: render_body(&content, opts.rich_text),
            content,
        }
    }
}

// ===================================================================
// Classification
// ===================================================================

/// Map one normalized event to its block content.
pub fn classify(event: &NormalizedEvent) -> BlockContent {
    let record = match &event.source {
        EventSource::Unparsed(text) => {
            return BlockContent::Other {
                label: "unparsed".to_string(),
                body: text.clone(),
            };
        }
        EventSource::Record(record) => record,
    };
    let fields = &event.fields;

    match event.discriminant() {
        "reasoning" => BlockContent::Reasoning {
            text: reasoning_text(fields, record),
        },
        "message" => {
            let text = content_text(fields.get("content"));
            if event.str_field("role") == Some("user") {
                BlockContent::User { text }
            } else {
                BlockContent::Assistant { text }
            }
        }
        "function_call" => function_call(fields),
        "function_call_output" => function_output(fields),
        "user_message" => BlockContent::User {
            text: content_text(Some(&mirrored_segment(fields, "message", "input_text"))),
        },
        "agent_message" => BlockContent::Assistant {
            text: content_text(Some(&mirrored_segment(fields, "message", "output_text"))),
        },
        "agent_reasoning" => {
            let mut wrapped = Map::new();
            wrapped.insert("summary".into(), mirrored_segment(fields, "text", "summary_text"));
            BlockContent::Reasoning {
                text: reasoning_text(&wrapped, record),
            }
        }
        "token_count" => BlockContent::Usage(UsageSummary::from_fields(fields)),
        other => BlockContent::Other {
            label: other.to_string(),
            body: pretty(record),
        },
    }
}

/// Wrap a mirrored event's literal text as a one-element segment list.
fn mirrored_segment(fields: &Map<String, Value>, key: &str, segment_type: &str) -> Value {
    let text = fields.get(key).and_then(Value::as_str).unwrap_or_default();
    json!([{ "type": segment_type, "text": text }])
}

/// Join the `text` of every content part. A bare string is one part.
fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => String::new(),
    }
}

fn reasoning_text(fields: &Map<String, Value>, record: &Value) -> String {
    let segments: Vec<&str> = fields
        .get("summary")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| {
                    p.get("type")
                        .and_then(Value::as_str)
                        .is_none_or(|t| t == "summary_text")
                })
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    let summary = segments.join("\n\n");
    if !summary.trim().is_empty() {
        return summary;
    }

    let raw = match fields.get("text") {
        Some(Value::String(s)) => s.clone(),
        _ => content_text(fields.get("content")),
    };
    if !raw.trim().is_empty() {
        return raw;
    }
    pretty(record)
}

fn function_call(fields: &Map<String, Value>) -> BlockContent {
    let name = fields
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("function")
        .to_string();
    let raw_args = fields.get("arguments");
    let decoded = raw_args.and_then(decode_object);
    if decoded.is_none() && raw_args.is_some() {
        debug!(%name, "function arguments are not an object; rendering raw");
    }

    if let Some(args) = &decoded {
        if name == "update_plan" {
            return plan(args);
        }
        if let Some(command) = args.get("command") {
            if let Some(patch) = patch::extract(command) {
                return BlockContent::ApplyPatch {
                    name,
                    encoded: patch::encode(&patch),
                    patch,
                };
            }
            if let Some(tokens) = command.as_array() {
                return BlockContent::ShellCall {
                    name,
                    command: shell_line(tokens),
                    workdir: args.get("workdir").and_then(Value::as_str).map(String::from),
                };
            }
        }
    }

    let arguments = match decoded {
        Some(obj) => pretty(&Value::Object(obj)),
        None => stringify(raw_args.unwrap_or(&Value::Null)),
    };
    BlockContent::FunctionCall { name, arguments }
}

fn plan(args: &Map<String, Value>) -> BlockContent {
    let explanation = args
        .get("explanation")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(String::from);
    let steps = args
        .get("plan")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| PlanStep {
                    step: match item.get("step") {
                        Some(v) => stringify(v),
                        None => stringify(item),
                    },
                    status: StepStatus::parse(item.get("status").and_then(Value::as_str)),
                })
                .collect()
        })
        .unwrap_or_default();
    BlockContent::Plan { explanation, steps }
}

fn shell_line(tokens: &[Value]) -> String {
    let words: Vec<String> = tokens.iter().map(stringify).collect();
    format!("$ {}", words.join(" "))
}

fn function_output(fields: &Map<String, Value>) -> BlockContent {
    let call_id = fields.get("call_id").and_then(Value::as_str).map(String::from);
    let output = fields.get("output").unwrap_or(&Value::Null);
    let decoded = decode_object(output);
    let exit_code = decoded
        .as_ref()
        .and_then(|obj| obj.get("metadata"))
        .and_then(|m| m.get("exit_code"))
        .and_then(Value::as_i64);
    let body = match decoded.as_ref().and_then(|obj| obj.get("output")) {
        Some(nested) => stringify(nested),
        None => stringify(output),
    };
    BlockContent::FunctionOutput {
        body,
        call_id,
        exit_code,
    }
}

/// Decode a value that should hold an object: objects are taken as-is,
/// strings are tried as JSON, anything else is "not an object".
pub fn decode_object(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(obj) => Some(obj.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(obj)) => Some(obj),
            _ => None,
        },
        _ => None,
    }
}

/// Strings verbatim, null as empty, everything else pretty-printed.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => pretty(other),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

// ===================================================================
// Body markup
// ===================================================================

fn render_body(content: &BlockContent, rich: &dyn RichText) -> String {
    match content {
        BlockContent::Reasoning { text }
        | BlockContent::User { text }
        | BlockContent::Assistant { text } => format::format_text(text, rich),
        BlockContent::Plan { explanation, steps } => {
            let mut out = String::new();
            if let Some(explanation) = explanation {
                out.push_str(&format::format_text(explanation, rich));
            }
            out.push_str("<ul class=\"plan\">");
            for step in steps {
                out.push_str(&format!(
                    "<li class=\"plan-{status}\"><span class=\"plan-mark\">{mark}</span> {text}</li>",
                    status = step.status.key(),
                    mark = step.status.symbol(),
                    text = escape_html(&step.step),
                ));
            }
            out.push_str("</ul>");
            out
        }
        BlockContent::ApplyPatch { patch, .. } => format::code_block(patch, "diff"),
        BlockContent::ShellCall { command, workdir, .. } => {
            let mut out = format::code_block(command, "bash");
            if let Some(dir) = workdir {
                out.push_str(&format!("<div class=\"workdir\">in {}</div>", escape_html(dir)));
            }
            out
        }
        BlockContent::FunctionCall { arguments, .. } => format::code_block(arguments, "json"),
        BlockContent::FunctionOutput { body, exit_code, .. } => {
            let mut out = String::new();
            if let Some(code) = exit_code {
                out.push_str(&format!("<div class=\"exit-code\">exit code {code}</div>"));
            }
            out.push_str(&format::code_block(body, ""));
            out
        }
        BlockContent::Usage(usage) => usage_table(usage),
        BlockContent::Other { label, body } => {
            let lang = if label == "unparsed" { "" } else { "json" };
            format::code_block(body, lang)
        }
    }
}

fn usage_table(usage: &UsageSummary) -> String {
    let mut out = String::from("<table class=\"usage\">");
    for (heading, breakdown) in [("Total", &usage.total), ("Last call", &usage.last)] {
        let Some(breakdown) = breakdown else { continue };
        let cells: Vec<String> = breakdown
            .rows()
            .into_iter()
            .map(|(label, v)| format!("{label}: {v}"))
            .collect();
        out.push_str(&format!(
            "<tr><th>{heading}</th><td>{}</td></tr>",
            escape_html(&cells.join(", "))
        ));
    }
    if let Some(window) = usage.context_window {
        out.push_str(&format!("<tr><th>Context window</th><td>{window}</td></tr>"));
    }
    out.push_str("</table>");
    out
}
