use crate::config::ViewerConfig;
use crate::source::{
    DocumentSource, EmbeddedShell, SourceError, load_with_fallback, normalize_document,
    sibling_reference,
};
use tracing::{debug, info};

/// Configuration layers that sit above the file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// A URL-style query string (`?src=...&usage=1`).
    pub query: Option<String>,
    /// Explicit `(key, value)` settings, applied last.
    pub settings: Vec<(String, String)>,
}

impl Overrides {
    fn layer(&self, base: &ViewerConfig, shell: Option<&EmbeddedShell>) -> ViewerConfig {
        let mut config = base.clone();
        if let Some(shell) = shell {
            for (key, value) in &shell.settings {
                config.apply(key, value);
            }
        }
        if let Some(query) = &self.query {
            config.apply_query(query);
        }
        for (key, value) in &self.settings {
            config.apply(key, value);
        }
        config
    }
}

#[derive(Debug)]
pub struct Opened {
    pub config: ViewerConfig,
    /// The normalized JSONL text, or why none could be loaded.
    pub document: Result<String, SourceError>,
}

/// Fetch `reference` (or the configured source) and settle the final
/// configuration.
///
/// When the reference turns out to be an HTML viewer shell, its meta
/// settings are layered in below the query string and explicit settings,
/// the log it names is fetched relative to the shell, and its embedded
/// payload serves as the fallback.
pub fn open(
    base: &ViewerConfig,
    reference: Option<&str>,
    overrides: &Overrides,
    source: &dyn DocumentSource,
) -> Opened {
    let config = overrides.layer(base, None);
    let Some(reference) = reference.map(str::to_string).or_else(|| config.source.clone()) else {
        return Opened {
            config,
            document: Err(SourceError::Missing),
        };
    };

    let text = match source.fetch(&reference) {
        Ok(text) => text,
        Err(err) => {
            return Opened {
                config,
                document: Err(err),
            };
        }
    };
    if !EmbeddedShell::looks_like_html(&text) {
        debug!(%reference, "loaded log directly");
        return Opened {
            config,
            document: Ok(normalize_document(&text)),
        };
    }

    let shell = EmbeddedShell::from_html(&text);
    let config = overrides.layer(base, Some(&shell));
    let primary = config
        .source
        .as_deref()
        .filter(|s| *s != reference)
        .map(|s| {
            if Some(s) == shell.source() {
                sibling_reference(&reference, s)
            } else {
                s.to_string()
            }
        });
    info!(shell = %reference, primary = primary.as_deref().unwrap_or("<embedded>"), "opened viewer shell");
    let document = load_with_fallback(primary.as_deref(), Some(&shell), source);
    Opened { config, document }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::shell_html;
    use std::collections::HashMap;

    struct MapSource(HashMap<&'static str, String>);

    impl DocumentSource for MapSource {
        fn fetch(&self, reference: &str) -> Result<String, SourceError> {
            self.0
                .get(reference)
                .cloned()
                .ok_or_else(|| SourceError::Unavailable {
                    reference: reference.to_string(),
                    reason: "not found".into(),
                })
        }
    }

    const LOG: &str = "{\"type\":\"message\",\"role\":\"user\",\"content\":[{\"text\":\"hi\"}]}";

    fn shell(meta: &str, embedded: Option<&str>) -> String {
        let mut html = String::from("<!DOCTYPE html><html><head>");
        html.push_str(meta);
        if let Some(log) = embedded {
            let full = shell_html("t", log, None);
            let start = full.find("<script").unwrap();
            let end = full.find("</script>").unwrap() + "</script>".len();
            html.push_str(&full[start..end]);
        }
        html.push_str("</head></html>");
        html
    }

    #[test]
    fn plain_log_is_loaded_directly() {
        let source = MapSource(HashMap::from([("run.jsonl", LOG.to_string())]));
        let opened = open(&ViewerConfig::default(), Some("run.jsonl"), &Overrides::default(), &source);
        assert_eq!(opened.document.unwrap(), LOG);
    }

    #[test]
    fn configured_source_is_used_without_a_reference() {
        let source = MapSource(HashMap::from([("run.jsonl", LOG.to_string())]));
        let overrides = Overrides {
            query: Some("src=run.jsonl".into()),
            settings: vec![],
        };
        let opened = open(&ViewerConfig::default(), None, &overrides, &source);
        assert_eq!(opened.document.unwrap(), LOG);
    }

    #[test]
    fn no_reference_is_missing() {
        let source = MapSource(HashMap::new());
        let opened = open(&ViewerConfig::default(), None, &Overrides::default(), &source);
        assert!(matches!(opened.document, Err(SourceError::Missing)));
    }

    #[test]
    fn shell_points_at_a_sibling_log() {
        let html = shell(
            r#"<meta name="codex-log-source" content="run.jsonl"><meta name="codex-log-show-usage" content="yes">"#,
            None,
        );
        let source = MapSource(HashMap::from([
            ("logs/view.html", html),
            ("logs/run.jsonl", LOG.to_string()),
        ]));
        let opened = open(&ViewerConfig::default(), Some("logs/view.html"), &Overrides::default(), &source);
        assert_eq!(opened.document.unwrap(), LOG);
        assert!(opened.config.show_usage);
        assert_eq!(opened.config.source.as_deref(), Some("run.jsonl"));
    }

    #[test]
    fn shell_settings_sit_below_query_and_explicit_settings() {
        let html = shell(
            r#"<meta name="codex-log-title" content="From shell"><meta name="codex-log-collapse-lines" content="7"><meta name="codex-log-show-usage" content="1">"#,
            Some(LOG),
        );
        let source = MapSource(HashMap::from([("view.html", html)]));
        let base = ViewerConfig {
            title: "From file".into(),
            ..ViewerConfig::default()
        };
        let overrides = Overrides {
            query: Some("?usage=0".into()),
            settings: vec![("title".into(), "From flag".into())],
        };
        let opened = open(&base, Some("view.html"), &overrides, &source);
        assert_eq!(opened.config.title, "From flag");
        assert_eq!(opened.config.collapse_lines, 7);
        assert!(!opened.config.show_usage);
        assert_eq!(opened.document.unwrap(), LOG);
    }

    #[test]
    fn unreachable_log_falls_back_to_embedded_copy() {
        let html = shell(r#"<meta name="codex-log-source" content="gone.jsonl">"#, Some(LOG));
        let source = MapSource(HashMap::from([("view.html", html)]));
        let opened = open(&ViewerConfig::default(), Some("view.html"), &Overrides::default(), &source);
        assert_eq!(opened.document.unwrap(), LOG);
    }

    #[test]
    fn unreachable_log_without_embedded_copy_fails() {
        let html = shell(r#"<meta name="codex-log-source" content="gone.jsonl">"#, None);
        let source = MapSource(HashMap::from([("view.html", html)]));
        let opened = open(&ViewerConfig::default(), Some("view.html"), &Overrides::default(), &source);
        match opened.document {
            Err(SourceError::Unavailable { reference, .. }) => assert_eq!(reference, "gone.jsonl"),
            other => panic!("expected unavailable, got {other:?}"),
        }
    }
}
