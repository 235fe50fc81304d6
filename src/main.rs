use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dynaform::engine::editor::DEFAULT_AUTOSAVE;
use dynaform::engine::migration::migrate;
use dynaform::services::datasource::Datasources;
use dynaform::services::request::HttpTransport;
use dynaform::services::store::read_document;
use dynaform::theme::{Theme, ThemeMode};
use dynaform::ui::{self, RunOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "dynaform",
    version,
    about = "Preview and edit a scriptable dashboard form panel in the terminal"
)]
struct Cli {
    /// Panel document (YAML or JSON)
    document: PathBuf,

    /// Query result frames exposed to scripts as `context.panel.data`
    #[arg(long)]
    data: Option<PathBuf>,

    /// Datasource registry (YAML or JSON list of {name, uid, command})
    #[arg(long)]
    datasources: Option<PathBuf>,

    /// Dashboard variable, repeatable: --var name=value
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Auto-save debounce window (default 1500, or DYNAFORM_AUTOSAVE_MS)
    #[arg(long)]
    autosave_ms: Option<u64>,

    /// Render to an off-screen buffer instead of the terminal
    #[arg(long)]
    headless: bool,

    /// Ticks to run in headless mode
    #[arg(long, default_value_t = 10)]
    ticks: u64,

    /// Print a JSON summary after a headless run
    #[arg(long)]
    summary: bool,

    #[arg(long)]
    light: bool,

    #[arg(long, default_value = "dynaform.log")]
    log_file: PathBuf,

    /// Print the migrated document as JSON and exit
    #[arg(long)]
    migrate_only: bool,
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{s}'"))
}

/// Relative paths are anchored at DYNAFORM_CONFIG_DIR when it is set.
fn anchor(path: PathBuf) -> PathBuf {
    match std::env::var("DYNAFORM_CONFIG_DIR") {
        Ok(dir) if path.is_relative() && !dir.is_empty() => Path::new(&dir).join(path),
        _ => path,
    }
}

fn init_logging(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    let filter = EnvFilter::try_from_env("DYNAFORM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

fn autosave_window(flag: Option<u64>) -> Duration {
    flag.or_else(|| {
        std::env::var("DYNAFORM_AUTOSAVE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
    })
    .map(Duration::from_millis)
    .unwrap_or(DEFAULT_AUTOSAVE)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let document = anchor(cli.document);
    let datasources = cli.datasources.map(anchor);

    if cli.migrate_only {
        let registry = match &datasources {
            Some(p) => Datasources::load(p)?,
            None => Datasources::default(),
        };
        let raw = read_document(&document)?;
        let migrated = migrate(raw, None, &registry);
        for t in &migrated.applied {
            eprintln!("applied: {}", t.describe());
        }
        println!("{}", serde_json::to_string_pretty(&migrated.document)?);
        return Ok(());
    }

    init_logging(&anchor(cli.log_file))?;
    let mode = if cli.light {
        ThemeMode::Light
    } else {
        ThemeMode::Dark
    };
    let opts = RunOptions {
        document,
        data: cli.data.map(anchor),
        datasources,
        variables: cli.vars,
        autosave: autosave_window(cli.autosave_ms),
        headless: ui::headless_requested(cli.headless),
        ticks: cli.ticks,
        summary: cli.summary,
        theme: Theme::from_mode(mode),
    };
    ui::run(opts, Arc::new(HttpTransport::new()?))
}
