mod analytics;
mod block;
mod clipboard;
mod config;
mod format;
mod logging;
mod metadata;
mod preferences;
mod record;
mod render;
mod source;
mod state;
mod viewer;

use anyhow::{Context, Result, bail};
use block::Category;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clipboard::{Clipboard, NoClipboard, SystemClipboard, manual_copy_text};
use config::ViewerConfig;
use format::{Markdown, PlainText, RichText};
use logging::LogFormat;
use preferences::{MemoryStore, PreferenceStore, TomlFileStore};
use render::{Document, Rendered};
use source::AnySource;
use state::{CopyOutcome, ViewState};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, warn};
use viewer::{Opened, Overrides};

#[derive(Parser)]
#[command(name = "codex-log-view", version, about = "Render Codex JSONL conversation logs")]
struct Cli {
    /// Log level for diagnostics on stderr (RUST_LOG overrides).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Configuration file (default: ./codex-log-view.toml, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding preferences.toml.
    #[arg(long, global = true)]
    prefs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a log as an HTML page or as JSON.
    Render(RenderArgs),
    /// Show or change persisted category filters.
    Filter {
        #[command(subcommand)]
        action: FilterAction,
    },
    /// Copy the patch of an apply-patch block to the clipboard.
    CopyPatch(CopyPatchArgs),
    /// Write an HTML viewer shell that embeds a copy of a log.
    Embed(EmbedArgs),
}

#[derive(Subcommand)]
enum FilterAction {
    /// List every category with its visibility.
    List,
    Show { category: String },
    Hide { category: String },
    Toggle { category: String },
}

/// Viewer settings shared by the commands that load a log.
#[derive(Args)]
struct SettingsArgs {
    /// Settings as a URL query string, e.g. `src=run.jsonl&usage=1`.
    #[arg(long)]
    query: Option<String>,

    #[arg(long)]
    title: Option<String>,

    /// Show token-usage blocks (1/0, true/false, yes/no, on/off).
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    show_usage: Option<String>,

    /// Draw the cumulative-cost overlay.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    show_cumulative: Option<String>,

    #[arg(long)]
    collapse_chars: Option<usize>,

    #[arg(long)]
    collapse_lines: Option<usize>,

    /// Any setting as KEY=VALUE; may be repeated.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    settings: Vec<String>,
}

impl SettingsArgs {
    fn overrides(&self) -> Result<Overrides> {
        let mut settings = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                settings.push((key.to_string(), value));
            }
        };
        push("title", self.title.clone());
        push("show_usage", self.show_usage.clone());
        push("show_cumulative", self.show_cumulative.clone());
        push("collapse_chars", self.collapse_chars.map(|n| n.to_string()));
        push("collapse_lines", self.collapse_lines.map(|n| n.to_string()));
        for pair in &self.settings {
            let Some((key, value)) = pair.split_once('=') else {
                bail!("--set expects KEY=VALUE, got {pair:?}");
            };
            settings.push((key.to_string(), value.to_string()));
        }
        Ok(Overrides {
            query: self.query.clone(),
            settings,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Html,
    Json,
}

#[derive(Args)]
struct RenderArgs {
    /// Log file, viewer shell, `-` for stdin, or URL (needs the `remote` feature).
    source: Option<String>,

    #[command(flatten)]
    settings: SettingsArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Html)]
    format: OutputFormat,

    /// Write to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start with every collapsible block collapsed.
    #[arg(long, conflicts_with = "expand_all")]
    collapse_all: bool,

    /// Start with every collapsible block expanded.
    #[arg(long)]
    expand_all: bool,

    /// Flip the collapse state of one block; may be repeated.
    #[arg(long = "toggle", value_name = "INDEX")]
    toggle: Vec<usize>,

    /// Render text literally instead of as Markdown.
    #[arg(long)]
    plain: bool,
}

#[derive(Args)]
struct CopyPatchArgs {
    /// Log file, viewer shell, `-` for stdin, or URL.
    source: String,

    /// Index of the block, as shown in the rendered output.
    block: usize,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Print the patch for manual copying instead of using the clipboard.
    #[arg(long)]
    print: bool,
}

#[derive(Args)]
struct EmbedArgs {
    /// The JSONL log to embed.
    log: PathBuf,

    /// Where to write the shell (default: the log path with `.html`).
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    title: Option<String>,
}

// ===================================================================
// Commands
// ===================================================================

fn preference_store(dir: Option<&Path>) -> Box<dyn PreferenceStore> {
    match dir {
        Some(dir) => Box::new(TomlFileStore::new(dir)),
        None => match TomlFileStore::default_location() {
            Some(store) => Box::new(store),
            None => Box::new(MemoryStore::default()),
        },
    }
}

fn write_output(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
        }
        None => io::stdout()
            .write_all(contents.as_bytes())
            .context("writing to stdout"),
    }
}

fn open(cli: &Cli, reference: Option<&str>, settings: &SettingsArgs) -> Result<Opened> {
    let base = ViewerConfig::load(cli.config.as_deref())?;
    let overrides = settings.overrides()?;
    Ok(viewer::open(&base, reference, &overrides, &AnySource))
}

/// Returns the process exit status.
fn render(cli: &Cli, args: &RenderArgs) -> Result<i32> {
    let opened = open(cli, args.source.as_deref(), &args.settings)?;
    let config = opened.config;
    let text = match opened.document {
        Ok(text) => text,
        Err(err) => {
            error!("{err}");
            let page = match args.format {
                OutputFormat::Html => render::error_html(&config.title, &err.to_string())?,
                OutputFormat::Json => render::error_json(&err.to_string())?,
            };
            write_output(args.output.as_deref(), &page)?;
            return Ok(2);
        }
    };

    let rich_text: &dyn RichText = if args.plain { &PlainText } else { &Markdown };
    let doc = Document::parse(&text, &config, rich_text);
    let mut state = ViewState::load(
        preference_store(cli.prefs_dir.as_deref()),
        config.show_usage,
        &doc.blocks,
    );
    if args.collapse_all {
        state.collapse_all();
    } else if args.expand_all {
        state.expand_all();
    }
    for &index in &args.toggle {
        if state.toggle_collapse(index).is_none() {
            warn!(index, "block is not collapsible");
        }
    }

    let rendered = Rendered::assemble(doc, &config, &state);
    let out = match args.format {
        OutputFormat::Html => rendered.to_html()?,
        OutputFormat::Json => rendered.to_json()?,
    };
    write_output(args.output.as_deref(), &out)?;
    Ok(0)
}

fn filter(cli: &Cli, action: &FilterAction) -> Result<()> {
    let config = ViewerConfig::load(cli.config.as_deref())?;
    let mut state = ViewState::load(
        preference_store(cli.prefs_dir.as_deref()),
        config.show_usage,
        &[],
    );
    let parse = |key: &str| {
        Category::from_key(key).with_context(|| {
            let known: Vec<&str> = Category::ALL.iter().map(|c| c.key()).collect();
            format!("unknown category {key:?} (expected one of {})", known.join(", "))
        })
    };
    let changed = match action {
        FilterAction::List => None,
        FilterAction::Show { category } => {
            let category = parse(category)?;
            state.set_filter(category, true);
            Some(category)
        }
        FilterAction::Hide { category } => {
            let category = parse(category)?;
            state.set_filter(category, false);
            Some(category)
        }
        FilterAction::Toggle { category } => {
            let category = parse(category)?;
            state.toggle_filter(category);
            Some(category)
        }
    };

    let mut out = String::new();
    for (category, visible) in state.filters().iter() {
        if changed.is_some_and(|c| c != category) {
            continue;
        }
        let shown = if visible { "shown" } else { "hidden" };
        out.push_str(&format!("{:<16} {shown:<7} {}\n", category.key(), category.label()));
    }
    write_output(None, &out)
}

fn copy_patch(cli: &Cli, args: &CopyPatchArgs) -> Result<()> {
    let opened = open(cli, Some(&args.source), &args.settings)?;
    let text = opened.document?;
    let doc = Document::parse(&text, &opened.config, &PlainText);
    let state = ViewState::load(Box::new(MemoryStore::default()), true, &doc.blocks);
    let clipboard: &dyn Clipboard = if args.print { &NoClipboard } else { &SystemClipboard };
    match state.copy_patch(&doc.blocks, args.block, clipboard)? {
        CopyOutcome::Copied => eprintln!("Copied patch from block {} to the clipboard.", args.block),
        CopyOutcome::Manual(patch) => write_output(None, &manual_copy_text(&patch))?,
    }
    Ok(())
}

fn embed(args: &EmbedArgs) -> Result<()> {
    let log = fs::read_to_string(&args.log)
        .with_context(|| format!("reading {}", args.log.display()))?;
    let name = args.log.file_name().map(|n| n.to_string_lossy().into_owned());
    let title = args.title.as_deref().unwrap_or(config::DEFAULT_TITLE);
    let html = source::shell_html(title, &source::normalize_document(&log), name.as_deref());
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.log.with_extension("html"));
    write_output(Some(&output), &html)?;
    eprintln!("Wrote {}", output.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format);

    let result = match &cli.command {
        Command::Render(args) => render(&cli, args),
        Command::Filter { action } => filter(&cli, action).map(|()| 0),
        Command::CopyPatch(args) => copy_patch(&cli, args).map(|()| 0),
        Command::Embed(args) => embed(args).map(|()| 0),
    };

    match result {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("codex-log-view: {err:#}");
            process::exit(2);
        }
    }
}
