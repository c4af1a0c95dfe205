use super::escape_html;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lang {
    Rust,
    Python,
    JavaScript,
    Shell,
    Json,
    Diff,
}

impl Lang {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "rust" | "rs" => Some(Lang::Rust),
            "python" | "py" => Some(Lang::Python),
            "javascript" | "js" | "typescript" | "ts" | "jsx" | "tsx" => Some(Lang::JavaScript),
            "bash" | "sh" | "shell" | "zsh" | "console" => Some(Lang::Shell),
            "json" | "jsonl" => Some(Lang::Json),
            "diff" | "patch" => Some(Lang::Diff),
            _ => None,
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Lang::Rust => &[
                "as", "async", "await", "const", "crate", "dyn", "else", "enum", "false", "fn",
                "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub",
                "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true",
                "type", "unsafe", "use", "where", "while",
            ],
            Lang::Python => &[
                "and", "as", "async", "await", "break", "class", "continue", "def", "elif",
                "else", "except", "False", "finally", "for", "from", "if", "import", "in", "is",
                "lambda", "None", "not", "or", "pass", "raise", "return", "True", "try", "while",
                "with", "yield",
            ],
            Lang::JavaScript => &[
                "async", "await", "catch", "class", "const", "else", "export", "false",
                "finally", "for", "from", "function", "if", "import", "in", "let", "new", "null",
                "of", "return", "this", "throw", "true", "try", "typeof", "undefined", "var",
                "while",
            ],
            Lang::Shell => &[
                "case", "cd", "do", "done", "echo", "elif", "else", "esac", "exit", "export",
                "fi", "for", "function", "if", "in", "local", "return", "set", "then", "while",
            ],
            Lang::Json => &["true", "false", "null"],
            Lang::Diff => &[],
        }
    }

    fn comment(self) -> Option<&'static str> {
        match self {
            Lang::Rust | Lang::JavaScript => Some(r"//[^\n]*|/\*(?s:.*?)\*/"),
            Lang::Python | Lang::Shell => Some(r"#[^\n]*"),
            Lang::Json | Lang::Diff => None,
        }
    }

    fn strings(self) -> &'static str {
        match self {
            // single quotes are lifetimes and chars in Rust
            Lang::Rust | Lang::Json => r#""(?:[^"\\\n]|\\.)*""#,
            _ => r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|`(?:[^`\\]|\\.)*`"#,
        }
    }

    fn pattern(self) -> String {
        let mut alts = vec![format!("(?P<str>{})", self.strings())];
        if let Some(comment) = self.comment() {
            alts.push(format!("(?P<com>{comment})"));
        }
        let kws = self.keywords();
        if !kws.is_empty() {
            alts.push(format!(r"(?P<kw>\b(?:{})\b)", kws.join("|")));
        }
        alts.join("|")
    }

    fn regex(self) -> Option<&'static Regex> {
        static RUST: OnceLock<Option<Regex>> = OnceLock::new();
        static PYTHON: OnceLock<Option<Regex>> = OnceLock::new();
        static JAVASCRIPT: OnceLock<Option<Regex>> = OnceLock::new();
        static SHELL: OnceLock<Option<Regex>> = OnceLock::new();
        static JSON: OnceLock<Option<Regex>> = OnceLock::new();
        let cell = match self {
            Lang::Rust => &RUST,
            Lang::Python => &PYTHON,
            Lang::JavaScript => &JAVASCRIPT,
            Lang::Shell => &SHELL,
            Lang::Json => &JSON,
            Lang::Diff => return None,
        };
        cell.get_or_init(|| Regex::new(&self.pattern()).ok()).as_ref()
    }
}

/// Color `code` for the language named by a fence tag. Output is escaped
/// HTML; unknown languages are escaped without markup.
pub fn highlight(code: &str, lang: &str) -> String {
    match Lang::from_tag(lang) {
        Some(Lang::Diff) => highlight_diff(code),
        Some(lang) => match lang.regex() {
            Some(re) => highlight_tokens(code, re),
            None => escape_html(code),
        },
        None if looks_like_patch(code) => highlight_diff(code),
        None => escape_html(code),
    }
}

fn highlight_tokens(code: &str, re: &Regex) -> String {
    let mut out = String::with_capacity(code.len() + code.len() / 4);
    let mut last = 0;
    for caps in re.captures_iter(code) {
        let (class, m) = if let Some(m) = caps.name("str") {
            ("tok-str", m)
        } else if let Some(m) = caps.name("com") {
            ("tok-com", m)
        } else if let Some(m) = caps.name("kw") {
            ("tok-kw", m)
        } else {
            continue;
        };
        out.push_str(&escape_html(&code[last..m.start()]));
        out.push_str(&format!(
            "<span class=\"{class}\">{}</span>",
            escape_html(m.as_str())
        ));
        last = m.end();
    }
    out.push_str(&escape_html(&code[last..]));
    out
}

fn highlight_diff(code: &str) -> String {
    code.split('\n')
        .map(|line| {
            let class = if line.starts_with("+++") || line.starts_with("---") {
                Some("diff-file")
            } else if line.starts_with('+') {
                Some("diff-add")
            } else if line.starts_with('-') {
                Some("diff-del")
            } else if line.starts_with('@') {
                Some("diff-hunk")
            } else {
                None
            };
            match class {
                Some(class) => format!("<span class=\"{class}\">{}</span>", escape_html(line)),
                None => escape_html(line),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn looks_like_patch(code: &str) -> bool {
    code.trim_start().starts_with("*** Begin Patch")
}
