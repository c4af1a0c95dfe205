use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// `id` of the script element holding the embedded log.
pub const EMBEDDED_SCRIPT_ID: &str = "codex-log-data";
/// `type` of the script element holding the embedded log.
pub const EMBEDDED_SCRIPT_TYPE: &str = "application/x-codex-log;base64";
const META_PREFIX: &str = "codex-log-";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no log source given")]
    Missing,
    #[error("cannot load {reference}: {reason}")]
    Unavailable { reference: String, reason: String },
    #[error("embedded log payload is not valid base64-encoded UTF-8")]
    EmbeddedDecode,
    #[error("unsupported source {0} (http(s) needs the `remote` feature)")]
    UnsupportedScheme(String),
}

impl SourceError {
    fn unavailable(reference: &str, reason: impl ToString) -> Self {
        SourceError::Unavailable {
            reference: reference.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub trait DocumentSource {
    fn fetch(&self, reference: &str) -> Result<String, SourceError>;
}

// ===================================================================
// Sources
// ===================================================================

fn scheme(reference: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)://").ok())
        .as_ref()?;
    re.captures(reference)
        .map(|c| c[1].to_ascii_lowercase())
}

/// Files on disk, `file://` URLs, and `-` for stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSource;

impl DocumentSource for LocalSource {
    fn fetch(&self, reference: &str) -> Result<String, SourceError> {
        if reference == "-" {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| SourceError::unavailable("stdin", e))?;
            return Ok(buffer);
        }
        let path = match scheme(reference).as_deref() {
            None => PathBuf::from(reference),
            Some("file") => Url::parse(reference)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| SourceError::unavailable(reference, "not a local file URL"))?,
            Some(_) => return Err(SourceError::UnsupportedScheme(reference.to_string())),
        };
        debug!(path = %path.display(), "reading log file");
        fs::read_to_string(&path).map_err(|e| SourceError::unavailable(reference, e))
    }
}

/// Fetches http(s) references with a blocking client.
#[cfg(feature = "remote")]
#[derive(Debug, Clone, Default)]
pub struct RemoteSource;

#[cfg(feature = "remote")]
impl DocumentSource for RemoteSource {
    fn fetch(&self, reference: &str) -> Result<String, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::unavailable(reference, e))?;
        debug!(url = reference, "fetching remote log");
        client
            .get(reference)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| SourceError::unavailable(reference, e))
    }
}

/// Dispatches on the reference's scheme.
#[derive(Debug, Clone, Default)]
pub struct AnySource;

impl AnySource {
    #[cfg(feature = "remote")]
    fn fetch_remote(&self, reference: &str) -> Result<String, SourceError> {
        RemoteSource.fetch(reference)
    }

    #[cfg(not(feature = "remote"))]
    fn fetch_remote(&self, reference: &str) -> Result<String, SourceError> {
        Err(SourceError::UnsupportedScheme(reference.to_string()))
    }
}

impl DocumentSource for AnySource {
    fn fetch(&self, reference: &str) -> Result<String, SourceError> {
        match scheme(reference).as_deref() {
            Some("http" | "https") => self.fetch_remote(reference),
            _ => LocalSource.fetch(reference),
        }
    }
}

/// Resolve `target` against the location of `shell` when it is relative.
pub fn sibling_reference(shell: &str, target: &str) -> String {
    if scheme(target).is_some() || Path::new(target).is_absolute() || target == "-" {
        return target.to_string();
    }
    if scheme(shell).is_some() {
        return match Url::parse(shell).and_then(|base| base.join(target)) {
            Ok(url) => url.to_string(),
            Err(_) => target.to_string(),
        };
    }
    match Path::new(shell).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(target).to_string_lossy().into_owned(),
        _ => target.to_string(),
    }
}

// ===================================================================
// HTML viewer shell
// ===================================================================

/// Settings and payload found in an HTML viewer shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedShell {
    /// `(key, value)` pairs from `codex-log-*` meta tags, prefix removed,
    /// in document order.
    pub settings: Vec<(String, String)>,
    /// Base64 text of the embedded log, if the shell carries one.
    pub payload: Option<String>,
}

fn meta_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<meta\b([^>]*)>").ok()).as_ref()
}

fn script_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").ok())
        .as_ref()
}

fn attr_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).ok()
    })
    .as_ref()
}

fn attributes(tag: &str) -> Vec<(String, String)> {
    let Some(re) = attr_re() else {
        return Vec::new();
    };
    re.captures_iter(tag)
        .map(|c| {
            let value = c.get(2).or_else(|| c.get(3)).map_or("", |m| m.as_str());
            (c[1].to_ascii_lowercase(), unescape_html(value))
        })
        .collect()
}

fn attribute<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

impl EmbeddedShell {
    /// True when the text is an HTML document rather than JSON lines.
    pub fn looks_like_html(text: &str) -> bool {
        let head = text.trim_start().get(..64).unwrap_or(text.trim_start());
        let head = head.to_ascii_lowercase();
        head.starts_with("<!doctype html") || head.starts_with("<html")
    }

    pub fn from_html(html: &str) -> Self {
        let mut shell = EmbeddedShell::default();
        if let Some(re) = meta_re() {
            for tag in re.captures_iter(html) {
                let attrs = attributes(&tag[1]);
                let (Some(name), Some(content)) =
                    (attribute(&attrs, "name"), attribute(&attrs, "content"))
                else {
                    continue;
                };
                if let Some(key) = name.to_ascii_lowercase().strip_prefix(META_PREFIX) {
                    shell.settings.push((key.to_string(), content.to_string()));
                }
            }
        }
        if let Some(re) = script_re() {
            shell.payload = re.captures_iter(html).find_map(|c| {
                let attrs = attributes(&c[1]);
                let is_payload = attribute(&attrs, "id") == Some(EMBEDDED_SCRIPT_ID)
                    && attribute(&attrs, "type")
                        .is_none_or(|t| t.eq_ignore_ascii_case(EMBEDDED_SCRIPT_TYPE));
                is_payload.then(|| c[2].trim().to_string())
            });
        }
        debug!(
            settings = shell.settings.len(),
            embedded = shell.payload.is_some(),
            "parsed viewer shell"
        );
        shell
    }

    /// The `source` meta setting, if present.
    pub fn source(&self) -> Option<&str> {
        self.settings
            .iter()
            .rev()
            .find(|(k, _)| k == "source")
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    /// Decode the embedded payload. `None` when the shell carries none.
    pub fn decode_payload(&self) -> Option<Result<String, SourceError>> {
        let payload = self.payload.as_ref()?;
        let compact: String = payload.split_whitespace().collect();
        Some(
            STANDARD
                .decode(compact)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or(SourceError::EmbeddedDecode),
        )
    }
}

/// Build a viewer shell around an embedded copy of `log`.
pub fn shell_html(title: &str, log: &str, source: Option<&str>) -> String {
    let mut html = String::from("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n  <meta charset=\"utf-8\" />\n");
    if let Some(source) = source {
        html.push_str(&format!(
            "  <meta name=\"codex-log-source\" content=\"{}\" />\n",
            crate::format::escape_html(source)
        ));
    }
    html.push_str(&format!(
        "  <meta name=\"codex-log-title\" content=\"{title}\" />\n  <title>{title}</title>\n",
        title = crate::format::escape_html(title)
    ));
    html.push_str(&format!(
        "  <script id=\"{EMBEDDED_SCRIPT_ID}\" type=\"{EMBEDDED_SCRIPT_TYPE}\">{}</script>\n</head>\n<body></body>\n</html>\n",
        STANDARD.encode(log.as_bytes())
    ));
    html
}

fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

// ===================================================================
// Loading
// ===================================================================

/// Rewrite a document that is one JSON array or one pretty-printed JSON
/// object into one compact value per line. A document already on a single
/// line, and anything that is not one JSON value, is returned unchanged.
pub fn normalize_document(text: &str) -> String {
    let trimmed = text.trim();
    if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
        return text.to_string();
    }
    if trimmed.starts_with('{') && !trimmed.contains(['\n', '\r']) {
        return text.to_string();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => {
            debug!(records = items.len(), "normalized JSON array document");
            items
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        }
        Ok(value @ Value::Object(_)) => value.to_string(),
        _ => text.to_string(),
    }
}

/// Fetch `primary`; on failure fall back to the shell's embedded payload.
/// The result is normalized for the record decoder.
pub fn load_with_fallback(
    primary: Option<&str>,
    shell: Option<&EmbeddedShell>,
    source: &dyn DocumentSource,
) -> Result<String, SourceError> {
    let fetched = match primary {
        Some(reference) => source.fetch(reference),
        None => Err(SourceError::Missing),
    };
    let err = match fetched {
        Ok(text) => return Ok(normalize_document(&text)),
        Err(err) => err,
    };
    match shell.and_then(EmbeddedShell::decode_payload) {
        Some(Ok(text)) => {
            if primary.is_some() {
                warn!("{err}; using the embedded copy of the log");
            } else {
                info!("using the embedded copy of the log");
            }
            Ok(normalize_document(&text))
        }
        Some(Err(decode_err)) => {
            warn!("{err}");
            Err(decode_err)
        }
        None => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Serves fixed documents; every other reference is unavailable.
    #[derive(Default)]
    struct FixedSource(HashMap<String, String>);

    impl DocumentSource for FixedSource {
        fn fetch(&self, reference: &str) -> Result<String, SourceError> {
            self.0
                .get(reference)
                .cloned()
                .ok_or_else(|| SourceError::unavailable(reference, "not found"))
        }
    }

    const LOG: &str = "{\"type\":\"message\",\"role\":\"user\",\"content\":[{\"text\":\"hi\"}]}";

    #[test]
    fn local_source_reads_files_and_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        fs::write(&path, LOG).unwrap();
        let path = path.to_string_lossy().into_owned();
        assert_eq!(LocalSource.fetch(&path).unwrap(), LOG);
        assert_eq!(LocalSource.fetch(&format!("file://{path}")).unwrap(), LOG);
    }

    #[test]
    fn local_source_reports_missing_files() {
        let err = LocalSource.fetch("/nonexistent/log.jsonl").unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
        assert!(err.to_string().contains("/nonexistent/log.jsonl"));
    }

    #[test]
    fn other_schemes_are_unsupported() {
        assert!(matches!(
            LocalSource.fetch("ftp://host/log.jsonl"),
            Err(SourceError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            AnySource.fetch("gopher://host/log"),
            Err(SourceError::UnsupportedScheme(_))
        ));
    }

    #[cfg(not(feature = "remote"))]
    #[test]
    fn http_needs_remote_feature() {
        assert!(matches!(
            AnySource.fetch("https://example.com/log.jsonl"),
            Err(SourceError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn sibling_references() {
        assert_eq!(sibling_reference("logs/view.html", "run.jsonl"), "logs/run.jsonl");
        assert_eq!(sibling_reference("view.html", "run.jsonl"), "run.jsonl");
        assert_eq!(sibling_reference("logs/view.html", "/abs/run.jsonl"), "/abs/run.jsonl");
        assert_eq!(
            sibling_reference("https://host/a/view.html", "run.jsonl"),
            "https://host/a/run.jsonl"
        );
        assert_eq!(
            sibling_reference("logs/view.html", "https://host/run.jsonl"),
            "https://host/run.jsonl"
        );
        assert_eq!(
            sibling_reference("https://host/a/view.html?from=x/y#top", "run.jsonl"),
            "https://host/a/run.jsonl"
        );
        assert_eq!(
            sibling_reference("https://host/a/b/view.html", "../logs/run.jsonl"),
            "https://host/a/logs/run.jsonl"
        );
    }

    #[test]
    fn shell_meta_tags_and_payload() {
        let html = r#"<!DOCTYPE html>
<html><head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width" />
  <meta content="run.jsonl" name="codex-log-source" />
  <meta name='codex-log-title' content='Fix &amp; ship' />
  <meta name="codex-log-show-usage" content="1">
  <script src="viewer.js"></script>
  <script id="codex-log-data" type="application/x-codex-log;base64">
    aGVs
    bG8=
  </script>
</head></html>"#;
        assert!(EmbeddedShell::looks_like_html(html));
        let shell = EmbeddedShell::from_html(html);
        assert_eq!(
            shell.settings,
            vec![
                ("source".to_string(), "run.jsonl".to_string()),
                ("title".to_string(), "Fix & ship".to_string()),
                ("show-usage".to_string(), "1".to_string()),
            ]
        );
        assert_eq!(shell.source(), Some("run.jsonl"));
        assert_eq!(shell.decode_payload().unwrap().unwrap(), "hello");
    }

    #[test]
    fn jsonl_is_not_html() {
        assert!(!EmbeddedShell::looks_like_html(LOG));
        assert!(!EmbeddedShell::looks_like_html(""));
    }

    #[test]
    fn generated_shell_round_trips() {
        let html = shell_html("A <b> title", LOG, Some("run.jsonl"));
        let shell = EmbeddedShell::from_html(&html);
        assert_eq!(shell.source(), Some("run.jsonl"));
        assert!(shell.settings.contains(&("title".to_string(), "A <b> title".to_string())));
        assert_eq!(shell.decode_payload().unwrap().unwrap(), LOG);
    }

    #[test]
    fn bad_payload_is_a_decode_error() {
        let shell = EmbeddedShell {
            settings: vec![],
            payload: Some("!!not base64!!".into()),
        };
        assert!(matches!(
            shell.decode_payload(),
            Some(Err(SourceError::EmbeddedDecode))
        ));
    }

    #[test]
    fn array_and_object_documents_become_lines() {
        assert_eq!(normalize_document("[{\"a\":1}, {\"b\":2}]"), "{\"a\":1}\n{\"b\":2}");
        assert_eq!(normalize_document("{\n  \"a\": 1\n}\n"), "{\"a\":1}");
        let jsonl = "{\"a\":1}\n{\"b\":2}\n";
        assert_eq!(normalize_document(jsonl), jsonl);
        assert_eq!(normalize_document("[broken"), "[broken");
        assert_eq!(normalize_document("[{\"b\":1,\"a\":2}]"), "{\"b\":1,\"a\":2}");
    }

    #[test]
    fn single_line_object_is_left_verbatim() {
        let line = "{\"type\":\"message\",\"n\":100000000000000000000000,\"role\":\"user\"}";
        assert_eq!(normalize_document(line), line);
        assert_eq!(normalize_document(&format!("{line}\n")), format!("{line}\n"));
    }

    #[test]
    fn primary_fetch_wins() {
        let mut docs = HashMap::new();
        docs.insert("run.jsonl".to_string(), LOG.to_string());
        let shell = EmbeddedShell::from_html(&shell_html("t", "{\"other\":1}", None));
        let text = load_with_fallback(Some("run.jsonl"), Some(&shell), &FixedSource(docs)).unwrap();
        assert_eq!(text, LOG);
    }

    #[test]
    fn embedded_payload_is_the_fallback() {
        let shell = EmbeddedShell::from_html(&shell_html("t", LOG, Some("gone.jsonl")));
        let source = FixedSource::default();
        assert_eq!(load_with_fallback(Some("gone.jsonl"), Some(&shell), &source).unwrap(), LOG);
        assert_eq!(load_with_fallback(None, Some(&shell), &source).unwrap(), LOG);
    }

    #[test]
    fn failure_without_payload_surfaces_the_fetch_error() {
        let source = FixedSource::default();
        assert!(matches!(
            load_with_fallback(Some("gone.jsonl"), None, &source),
            Err(SourceError::Unavailable { .. })
        ));
        assert!(matches!(
            load_with_fallback(None, Some(&EmbeddedShell::default()), &source),
            Err(SourceError::Missing)
        ));
    }
}
