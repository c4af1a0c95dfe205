use crate::analytics::{DEFAULT_INPUT_PRICE_PER_MILLION, DEFAULT_OUTPUT_PRICE_PER_MILLION, Rates};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::form_urlencoded;

const FILENAME: &str = "codex-log-view.toml";
const ENV_PREFIX: &str = "CODEX_LOG_VIEW_";

pub const DEFAULT_TITLE: &str = "Codex Conversation Log";

/// Layered settings, later layers winning: defaults, a TOML file,
/// `CODEX_LOG_VIEW_*` variables, viewer shell meta tags, a query string,
/// then flags. Every layer after the file goes through [`ViewerConfig::apply`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Where to read the JSONL document from (path, `-`, or URL).
    pub source: Option<String>,
    pub title: String,
    /// Whether token-usage blocks are visible on load.
    pub show_usage: bool,
    /// Whether the cumulative-cost overlay is drawn on the chart.
    pub show_cumulative: bool,
    /// Function output above this many characters starts collapsed.
    pub collapse_chars: usize,
    /// Function output above this many lines starts collapsed.
    pub collapse_lines: usize,
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            source: None,
            title: DEFAULT_TITLE.to_string(),
            show_usage: false,
            show_cumulative: false,
            collapse_chars: 15_000,
            collapse_lines: 200,
            input_price_per_million: DEFAULT_INPUT_PRICE_PER_MILLION,
            output_price_per_million: DEFAULT_OUTPUT_PRICE_PER_MILLION,
        }
    }
}

impl ViewerConfig {
    /// Defaults, overlaid with the first config file found (or `explicit`),
    /// then with the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::candidate_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => {
                    info!(config_file = %path.display(), "loading configuration from file");
                    Self::load_from_file(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply_env(std::env::vars());
        Ok(config)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(FILENAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("codex-log-view").join("config.toml"));
        }
        paths
    }

    /// Parse a TOML config file. Missing keys take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Apply `CODEX_LOG_VIEW_<KEY>` variables from an iterator of pairs.
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                let key = key.to_ascii_lowercase();
                if key == "prefs_dir" {
                    continue;
                }
                self.apply(&key, &value);
            }
        }
    }

    /// Apply a query string such as `?src=log.jsonl&usage=1`. A bare
    /// boolean key (`?usage`) means true.
    pub fn apply_query(&mut self, query: &str) {
        let query = query.trim_start_matches('?');
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let value = if value.is_empty() && is_flag(&key) { "1".into() } else { value };
            self.apply(&key, &value);
        }
    }

    /// Set one setting by key. Unknown keys and unparseable values are
    /// logged and ignored; returns whether the value was applied.
    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        let applied = match key.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "src" | "source" | "log" => {
                self.source = Some(value.trim().to_string()).filter(|s| !s.is_empty());
                true
            }
            "title" => {
                self.title = value.to_string();
                true
            }
            "usage" | "show_usage" => set(&mut self.show_usage, parse_bool(value)),
            "cumulative" | "show_cumulative" => set(&mut self.show_cumulative, parse_bool(value)),
            "collapse_chars" | "chars" => set(&mut self.collapse_chars, value.trim().parse().ok()),
            "collapse_lines" | "lines" => set(&mut self.collapse_lines, value.trim().parse().ok()),
            "input_price" | "input_price_per_million" => set(
                &mut self.input_price_per_million,
                value.trim().parse().ok().filter(|p: &f64| p.is_finite()),
            ),
            "output_price" | "output_price_per_million" => set(
                &mut self.output_price_per_million,
                value.trim().parse().ok().filter(|p: &f64| p.is_finite()),
            ),
            _ => {
                warn!(%key, "ignoring unknown configuration key");
                return false;
            }
        };
        if !applied {
            warn!(%key, %value, "ignoring unparseable configuration value");
        }
        applied
    }

    pub fn rates(&self) -> Rates {
        Rates {
            input_per_million: self.input_price_per_million,
            output_per_million: self.output_price_per_million,
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}

/// `1/0`, `true/false`, `yes/no`, `on/off`; anything else is `None`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn is_flag(key: &str) -> bool {
    matches!(
        key.trim().to_ascii_lowercase().replace('-', "_").as_str(),
        "usage" | "show_usage" | "cumulative" | "show_cumulative"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ViewerConfig::default();
        assert_eq!(config.title, DEFAULT_TITLE);
        assert!(!config.show_usage);
        assert!(!config.show_cumulative);
        assert_eq!(config.collapse_chars, 15_000);
        assert_eq!(config.rates(), Rates::default());
    }

    #[test]
    fn file_fills_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILENAME);
        fs::write(&path, "title = \"My run\"\ncollapse_lines = 12\n").unwrap();
        let config = ViewerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.title, "My run");
        assert_eq!(config.collapse_lines, 12);
        assert_eq!(config.collapse_chars, 15_000);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILENAME);
        fs::write(&path, "collapse_lines = \"many\"").unwrap();
        let err = ViewerConfig::load_from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config file"));
    }

    #[test]
    fn env_overrides() {
        let mut config = ViewerConfig::default();
        config.apply_env(vec![
            ("CODEX_LOG_VIEW_SHOW_USAGE".to_string(), "yes".to_string()),
            ("CODEX_LOG_VIEW_COLLAPSE_CHARS".to_string(), "99".to_string()),
            ("CODEX_LOG_VIEW_PREFS_DIR".to_string(), "/tmp".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ]);
        assert!(config.show_usage);
        assert_eq!(config.collapse_chars, 99);
    }

    #[test]
    fn query_string_overrides() {
        let mut config = ViewerConfig::default();
        config.apply_query("?src=logs%2Frun.jsonl&title=Fix+the+bug&usage=1&cumulative=true&collapse_lines=5");
        assert_eq!(config.source.as_deref(), Some("logs/run.jsonl"));
        assert_eq!(config.title, "Fix the bug");
        assert!(config.show_usage);
        assert!(config.show_cumulative);
        assert_eq!(config.collapse_lines, 5);
    }

    #[test]
    fn bad_values_are_ignored() {
        let mut config = ViewerConfig::default();
        assert!(!config.apply("collapse_chars", "lots"));
        assert!(!config.apply("usage", "maybe"));
        assert!(!config.apply("bogus", "1"));
        assert!(!config.apply("input_price", "inf"));
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn bare_query_flag_means_true() {
        let mut config = ViewerConfig::default();
        config.apply_query("usage");
        assert!(config.show_usage);
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let mut config = ViewerConfig::default();
        config.apply_query("title=100%25+done%21&src=a%20b.jsonl&lines=");
        assert_eq!(config.title, "100% done!");
        assert_eq!(config.source.as_deref(), Some("a b.jsonl"));
        assert_eq!(config.collapse_lines, 200);
    }

    #[test]
    fn empty_title_in_query_is_kept_empty() {
        let mut config = ViewerConfig::default();
        config.apply_query("title=&usage");
        assert_eq!(config.title, "");
        assert!(config.show_usage);
    }
}
