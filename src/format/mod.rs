mod highlight;

pub use highlight::highlight;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};

/// Capability: render a string as inline rich-text markup.
///
/// Returning `None` means "not handled" and makes callers fall back to
/// [`plain`].
pub trait RichText {
    fn render(&self, text: &str) -> Option<String>;
}

/// Markdown rendering with fenced code routed through [`highlight`].
/// Raw HTML in the source is escaped rather than passed through.
#[derive(Debug, Default, Clone, Copy)]
pub struct Markdown;

/// No rich-text capability; everything renders through [`plain`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainText;

impl RichText for PlainText {
    fn render(&self, _text: &str) -> Option<String> {
        None
    }
}

impl RichText for Markdown {
    fn render(&self, text: &str) -> Option<String> {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        let mut events = Vec::new();
        // (language, buffered code) while inside a code block
        let mut code: Option<(String, String)> = None;

        for event in Parser::new_ext(text, options) {
            if let Some((lang, buf)) = code.as_mut() {
                match event {
                    Event::Text(t) => buf.push_str(&t),
                    Event::End(TagEnd::CodeBlock) => {
                        let rendered = code_block(buf, lang);
                        events.push(Event::Html(rendered.into()));
                        code = None;
                    }
                    _ => {}
                }
                continue;
            }
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().unwrap_or("").to_string()
                        }
                        CodeBlockKind::Indented => String::new(),
                    };
                    code = Some((lang, String::new()));
                }
                Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
                other => events.push(other),
            }
        }

        let mut out = String::new();
        html::push_html(&mut out, events.into_iter());
        Some(out)
    }
}

/// Render `text` with the given capability, falling back to [`plain`].
pub fn format_text(text: &str, rich: &dyn RichText) -> String {
    rich.render(text).unwrap_or_else(|| plain(text))
}

/// Literal rendering: HTML-escaped, line breaks preserved.
pub fn plain(text: &str) -> String {
    let body = text
        .split('\n')
        .map(|line| escape_html(line.strip_suffix('\r').unwrap_or(line)))
        .collect::<Vec<_>>()
        .join("<br>\n");
    format!("<div class=\"plain\">{body}</div>")
}

/// A `<pre>` code block with language-aware coloring.
pub fn code_block(code: &str, lang: &str) -> String {
    let class = if lang.is_empty() {
        String::new()
    } else {
        format!(" class=\"language-{}\"", escape_html(lang))
    };
    format!(
        "<pre><code{class}>{}</code></pre>",
        highlight(code.trim_end_matches('\n'), lang)
    )
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
