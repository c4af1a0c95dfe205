use serde::Serialize;
use serde_json::{Map, Value};

/// Session-level metadata taken from the first `session_meta` record.
/// Rendered above the blocks rather than as a block of its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    /// Git context recorded when the session started, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
}

impl SessionHeader {
    /// Build a header from a `session_meta` payload. The record timestamp
    /// is used when the payload carries none.
    pub fn from_fields(fields: &Map<String, Value>, record_timestamp: Option<&str>) -> Self {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(String::from);
        let git = fields.get("git").and_then(Value::as_object).map(|g| GitInfo {
            branch: g.get("branch").and_then(Value::as_str).map(String::from),
            commit_hash: g.get("commit_hash").and_then(Value::as_str).map(String::from),
            repository_url: g.get("repository_url").and_then(Value::as_str).map(String::from),
        });
        Self {
            id: text("id"),
            timestamp: text("timestamp").or_else(|| record_timestamp.map(String::from)),
            cwd: text("cwd"),
            originator: text("originator"),
            cli_version: text("cli_version"),
            model_provider: text("model_provider"),
            git,
        }
    }

    /// Non-empty `(label, value)` rows for display, in a fixed order.
    pub fn rows(&self) -> Vec<(&'static str, &str)> {
        let git = self.git.as_ref();
        [
            ("Session", self.id.as_deref()),
            ("Started", self.timestamp.as_deref()),
            ("Directory", self.cwd.as_deref()),
            ("Originator", self.originator.as_deref()),
            ("CLI version", self.cli_version.as_deref()),
            ("Provider", self.model_provider.as_deref()),
            ("Branch", git.and_then(|g| g.branch.as_deref())),
            ("Commit", git.and_then(|g| g.commit_hash.as_deref())),
            ("Repository", git.and_then(|g| g.repository_url.as_deref())),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.filter(|v| !v.is_empty()).map(|v| (label, v)))
        .collect()
    }
}
