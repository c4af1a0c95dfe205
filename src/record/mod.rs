use serde_json::{Map, Value};
use tracing::{debug, warn};

// ===================================================================
// Wire shape
// ===================================================================

/// Which of the two admissible record layouts a document uses.
///
/// The shape is decided from the first line that parses as JSON and then
/// applied to every later line. Documents that switch shape mid-stream are
/// not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `{ "timestamp": ..., "type": ..., "payload": { ... } }` envelopes.
    Wrapped,
    /// Inner record fields directly at the top level.
    Legacy,
}

impl Shape {
    /// Detect the shape from one parsed record: both `timestamp` and
    /// `payload` present at top level means wrapped.
    pub fn detect(record: &Value) -> Self {
        match record.as_object() {
            Some(obj) if obj.contains_key("timestamp") && obj.contains_key("payload") => {
                Shape::Wrapped
            }
            _ => Shape::Legacy,
        }
    }
}

// ===================================================================
// Decoded line
// ===================================================================

/// One non-blank line of the source document.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// The line parsed as strict JSON.
    Parsed(Value),
    /// The line did not parse; carries the trimmed text verbatim.
    Unparsed(String),
}

/// Split a document into trimmed, non-blank lines on any line-ending style
/// and decode each one independently. Yields `(line_number, record)` with
/// 1-based line numbers counted over the raw document.
pub fn decode_lines(contents: &str) -> Vec<(usize, LogRecord)> {
    let mut out = Vec::new();
    let mut line_no = 0;
    let mut rest = contents;
    while !rest.is_empty() {
        let (line, tail) = match rest.find(['\n', '\r']) {
            Some(pos) => {
                let skip = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
                (&rest[..pos], &rest[pos + skip..])
            }
            None => (rest, ""),
        };
        rest = tail;
        line_no += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = match serde_json::from_str::<Value>(line) {
            Ok(val) => LogRecord::Parsed(val),
            Err(e) => {
                warn!(line = line_no, error = %e, "unparsed log line");
                LogRecord::Unparsed(line.to_string())
            }
        };
        out.push((line_no, record));
    }
    out
}

// ===================================================================
// Normalized event
// ===================================================================

/// Where a normalized event came from.
#[derive(Debug, Clone, PartialEq)]
pub enum EventSource {
    /// The full parsed record (envelope included, for wrapped documents).
    Record(Value),
    /// Raw text of a line that failed to parse.
    Unparsed(String),
}

/// A record reduced to a shape-independent form.
///
/// `kind` is the inner discriminant (`fields.type`) and drives
/// classification; `fields` holds the semantic payload regardless of
/// which wire shape the document used.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    /// 0-based ordinal of this record among the document's non-blank lines.
    pub progress_index: usize,
    /// 1-based line number in the raw document.
    pub line: usize,
    pub kind: Option<String>,
    pub timestamp: Option<String>,
    pub outer_kind: Option<String>,
    pub fields: Map<String, Value>,
    pub source: EventSource,
}

impl NormalizedEvent {
    fn from_record(progress_index: usize, line: usize, shape: Shape, record: Value) -> Self {
        let (fields, timestamp, outer_kind) = match shape {
            Shape::Wrapped => {
                let fields = record
                    .get("payload")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let timestamp = record.get("timestamp").and_then(string_of);
                let outer_kind = record.get("type").and_then(string_of);
                (fields, timestamp, outer_kind)
            }
            Shape::Legacy => {
                let fields = record.as_object().cloned().unwrap_or_default();
                let timestamp = fields.get("timestamp").and_then(string_of);
                (fields, timestamp, None)
            }
        };
        let kind = fields.get("type").and_then(string_of);
        Self {
            progress_index,
            line,
            kind,
            timestamp,
            outer_kind,
            fields,
            source: EventSource::Record(record),
        }
    }

    fn unparsed(progress_index: usize, line: usize, text: String) -> Self {
        Self {
            progress_index,
            line,
            kind: None,
            timestamp: None,
            outer_kind: None,
            fields: Map::new(),
            source: EventSource::Unparsed(text),
        }
    }

    /// The discriminant used for classification: the inner kind, falling
    /// back to the outer row type, then a record-level `record_type`, then
    /// the literal `"unknown"`.
    pub fn discriminant(&self) -> &str {
        if let Some(kind) = self.kind.as_deref().filter(|k| !k.is_empty()) {
            return kind;
        }
        if let Some(outer) = self.outer_kind.as_deref().filter(|k| !k.is_empty()) {
            return outer;
        }
        if let EventSource::Record(record) = &self.source {
            if let Some(rt) = record.get("record_type").and_then(Value::as_str) {
                if !rt.is_empty() {
                    return rt;
                }
            }
        }
        "unknown"
    }

    /// Look up a string field of the payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn is_unparsed(&self) -> bool {
        matches!(self.source, EventSource::Unparsed(_))
    }
}

/// Strings are taken as-is; numbers are stringified; anything else is absent.
fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ===================================================================
// Transcript
// ===================================================================

/// A JSONL document decoded line by line and normalized into events.
///
/// Every non-blank line yields exactly one event, in input order.
#[derive(Debug, Default)]
pub struct Transcript {
    shape: Option<Shape>,
    events: Vec<NormalizedEvent>,
}

impl Transcript {
    /// Decode and normalize a document. Returns the transcript and the
    /// 1-based numbers of lines that failed to parse. Failed lines still
    /// appear in the transcript as unparsed events.
    pub fn parse(contents: &str) -> (Self, Vec<usize>) {
        let mut shape = None;
        let mut events = Vec::new();
        let mut unparsed = Vec::new();

        for (progress_index, (line, record)) in decode_lines(contents).into_iter().enumerate() {
            let event = match record {
                LogRecord::Parsed(val) => {
                    let detected = *shape.get_or_insert_with(|| {
                        let detected = Shape::detect(&val);
                        debug!(?detected, line, "detected document shape");
                        detected
                    });
                    NormalizedEvent::from_record(progress_index, line, detected, val)
                }
                LogRecord::Unparsed(text) => {
                    unparsed.push(line);
                    NormalizedEvent::unparsed(progress_index, line, text)
                }
            };
            events.push(event);
        }

        (Self { shape, events }, unparsed)
    }

    /// The detected shape, or `None` if no line parsed.
    pub fn shape(&self) -> Option<Shape> {
        self.shape
    }

    /// All events in document order.
    pub fn events(&self) -> &[NormalizedEvent] {
        &self.events
    }
}
