//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use buildlens_core::coordinator::ttl_map;
use buildlens_core::pipeline::{
    AnalyzeConfig, AnalyzeResult, ProgressReporter, analyze_build,
};
use buildlens_reasoning::{OpenRouterClient, ReasoningClient};
use buildlens_shared::config::{
    AppConfig, FetchConfig, expand_path, init_config, load_config, validate_api_key,
};
use buildlens_shared::error::BuildLensError;
use buildlens_sources::SourceRegistry;
use buildlens_storage::CacheStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// BuildLens — analyze Path of Exile 2 builds with community data.
#[derive(Parser)]
#[command(
    name = "buildlens",
    version,
    about = "Analyze Path of Building exports with enriched community data and an LLM report.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Analyze a Path of Building XML export.
    Analyze {
        /// Path to the build XML file.
        build: PathBuf,

        /// Output directory for the report (defaults to the configured one).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// OpenRouter model ID (defaults to the configured one).
        #[arg(short, long)]
        model: Option<String>,

        /// Coordination deadline in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Skip the LLM analysis step and only produce the context snapshot.
        #[arg(long)]
        skip_reasoning: bool,

        /// Produce a partial report when the deadline fires instead of failing.
        #[arg(long)]
        allow_partial: bool,
    },

    /// Enrichment cache management.
    Cache {
        /// Cache subcommand.
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Show cache entry counts and freshness.
    Stats,
    /// Delete every cached record.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "buildlens=info",
        1 => "buildlens=debug",
        _ => "buildlens=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Analyze {
            build,
            out,
            model,
            timeout,
            skip_reasoning,
            allow_partial,
        } => {
            cmd_analyze(build, out, model, timeout, skip_reasoning, allow_partial).await
        }
        Command::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats().await,
            CacheAction::Clear => cmd_cache_clear().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

async fn cmd_analyze(
    build: PathBuf,
    out: Option<PathBuf>,
    model: Option<String>,
    timeout: Option<u64>,
    skip_reasoning: bool,
    allow_partial: bool,
) -> Result<()> {
    let config = load_config()?;

    if !build.exists() {
        return Err(eyre!("build file '{}' does not exist", build.display()));
    }

    let model = model.unwrap_or_else(|| config.openrouter.default_model.clone());
    let output_dir = match out {
        Some(p) => p,
        None => expand_path(&config.defaults.output_dir)?,
    };
    let cache_path = expand_path(&config.defaults.cache_path)?;

    let mut fetch = FetchConfig::from(&config);
    if let Some(secs) = timeout {
        fetch.coordination_timeout_secs = secs;
    }

    // The reasoning client needs a key; a data-only run does not.
    let reasoning: Option<OpenRouterClient> = if skip_reasoning {
        None
    } else {
        validate_api_key(&config)?;
        let api_key = std::env::var(&config.openrouter.api_key_env).unwrap_or_default();
        Some(OpenRouterClient::new(api_key)?)
    };

    let analyze_config = AnalyzeConfig {
        build_path: build.clone(),
        output_dir,
        cache_path,
        model: model.clone(),
        fetch,
        ttls: ttl_map(&config.sources),
        allow_partial,
    };

    let registry = Arc::new(SourceRegistry::from_config(&config));
    info!(build = %build.display(), model, "analyzing build");

    let reporter = CliProgress::new();
    let outcome = analyze_build(
        &analyze_config,
        registry,
        reasoning.as_ref().map(|c| c as &dyn ReasoningClient),
        &reporter,
    )
    .await;

    let result = match outcome {
        Ok(result) => result,
        Err(BuildLensError::CoordinationTimeout { elapsed_ms, .. }) => {
            return Err(eyre!(
                "enrichment hit the {elapsed_ms}ms coordination deadline before every \
                 entity resolved. Rerun with --allow-partial to report on what resolved, \
                 or raise --timeout."
            ));
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    println!("  Build analyzed!");
    println!("  Entities: {} ({} enriched)", result.entity_count, result.enriched_count);
    if result.partial {
        println!("  Note:     partial data (deadline fired)");
    }
    if !result.model.is_empty() {
        println!("  Model:    {}", result.model);
    }
    println!("  Report:   {}", result.paths.report.display());
    println!("  Context:  {}", result.paths.context.display());
    println!("  Time:     {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn entities_resolved(&self, enriched: usize, total: usize) {
        self.spinner
            .set_message(format!("Enriched {enriched}/{total} entities"));
    }

    fn done(&self, _result: &AnalyzeResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

async fn open_store() -> Result<CacheStore> {
    let config = load_config()?;
    let cache_path = expand_path(&config.defaults.cache_path)?;
    Ok(CacheStore::open(&cache_path).await?)
}

async fn cmd_cache_stats() -> Result<()> {
    let store = open_store().await?;
    let stats = store.stats().await?;
    println!("  Cached records: {}", stats.total_entries);
    println!("  Fresh:          {}", stats.fresh_entries);
    println!("  Expired:        {}", stats.expired_entries);
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let store = open_store().await?;
    let deleted = store.invalidate_all().await?;
    println!("  Deleted {deleted} cached records");
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
