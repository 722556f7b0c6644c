//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use digestkit_core::{CacheManager, DigestRun, Pipeline, ProgressReporter, write_digest};
use digestkit_discovery::{DiscoveryOptions, extract_urls, fetch_reading_list};
use digestkit_fetcher::Fetcher;
use digestkit_llm::{OpenRouterClient, OpenRouterOptions};
use digestkit_shared::{
    AppConfig, ArticleFailure, CacheConfig, FetchConfig, PipelineConfig, expand_home,
    init_config, load_config, validate_api_key,
};
use digestkit_storage::{CacheStore, MemoryStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// DigestKit: turn a reading list into a topical digest.
#[derive(Parser)]
#[command(
    name = "digestkit",
    version,
    about = "Fetch, summarize and cluster the articles in a reading list into one digest.",
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
    /// Build a digest from the URLs in a file, stdin, or a remote list.
    Run {
        /// Text or Markdown file with links, `-` for stdin, or the URL of a
        /// reading list.
        #[arg(short, long)]
        input: String,

        /// Where to write the digest JSON.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Digest title.
        #[arg(short, long)]
        title: Option<String>,

        /// Articles fetched and summarized at the same time.
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Use a throwaway in-memory cache.
        #[arg(long)]
        no_cache: bool,

        /// Abort the run after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Inspect or maintain the article cache.
    Cache {
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
    /// Show entry counts.
    Stats,
    /// Remove every entry.
    Clear,
    /// Remove entries older than their TTL.
    Purge,
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
        0 => "digestkit=info",
        1 => "digestkit=debug",
        _ => "digestkit=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
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
        Command::Run {
            input,
            out,
            title,
            concurrency,
            no_cache,
            deadline_secs,
        } => {
            let opts = RunOptions {
                input,
                out,
                title,
                concurrency,
                no_cache,
                deadline_secs,
            };
            cmd_run(opts).await
        }
        Command::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats().await,
            CacheAction::Clear => cmd_cache_clear().await,
            CacheAction::Purge => cmd_cache_purge().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunOptions {
    input: String,
    out: Option<PathBuf>,
    title: Option<String>,
    concurrency: Option<usize>,
    no_cache: bool,
    deadline_secs: Option<u64>,
}

async fn cmd_run(opts: RunOptions) -> Result<()> {
    // Validate API key before doing anything
    let config = load_config()?;
    let api_key = validate_api_key(&config)?;

    let urls = read_input_urls(&opts.input).await?;
    info!(input = %opts.input, urls = urls.len(), "input parsed");

    let generator = OpenRouterClient::new(api_key, OpenRouterOptions::from(&config))?;
    let fetcher = Fetcher::new(FetchConfig::from(&config))?;
    let store: Arc<dyn CacheStore> = if opts.no_cache {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(Storage::open(&cache_path(&config)?).await?)
    };
    let cache = Arc::new(CacheManager::new(store, CacheConfig::from(&config)));

    let mut pipeline_config = PipelineConfig::from(&config);
    if let Some(title) = opts.title {
        pipeline_config.digest_title = title;
    }
    if let Some(n) = opts.concurrency {
        pipeline_config.max_concurrency = n.max(1);
    }
    if let Some(secs) = opts.deadline_secs {
        pipeline_config.deadline = Some(std::time::Duration::from_secs(secs));
    }

    let pipeline = Pipeline::from_config(&config, Arc::new(generator), Arc::new(fetcher), cache)
        .with_config(pipeline_config);

    // Ctrl-C cancels the run; in-flight requests are dropped.
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let reporter = CliProgress::new();
    let result = pipeline.run(&urls, &token, &reporter).await;
    reporter.spinner.finish_and_clear();
    let run = result?;

    let out = match opts.out {
        Some(path) => path,
        None => expand_home(&config.defaults.output_dir)?.join(format!(
            "digest-{}.json",
            Utc::now().format("%Y%m%d-%H%M%S")
        )),
    };
    let written = write_digest(&run.digest, &out)?;

    print_run(&run, &written);
    Ok(())
}

/// Collect URLs from a file, stdin, or a remote reading list.
async fn read_input_urls(input: &str) -> Result<Vec<Url>> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| eyre!("failed to read stdin: {e}"))?;
        return Ok(extract_urls(&text));
    }

    if let Ok(url) = Url::parse(input) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(fetch_reading_list(&url, &DiscoveryOptions::default()).await?);
        }
    }

    let text = std::fs::read_to_string(input)
        .map_err(|e| eyre!("cannot read input '{input}': {e}"))?;
    Ok(extract_urls(&text))
}

fn print_run(run: &DigestRun, path: &Path) {
    let stats = &run.stats;
    let meta = &run.digest.metadata;

    println!();
    println!("  Digest written!");
    println!("  Title:     {}", run.digest.title);
    println!("  Sections:  {}", meta.section_count);
    println!("  Articles:  {} of {} requested", meta.article_count, stats.requested);
    println!("  Fetched:   {}", stats.fetched);
    println!("  Cached:    {}", stats.cached);
    println!("  Failed:    {}", stats.failed);
    println!(
        "  Summaries: {} generated, {} cached, {} fallback",
        stats.summarized, stats.summary_cache_hits, stats.fallback_summaries
    );
    println!(
        "  Cache:     {:.0}% hit ratio ({} hits, {} misses)",
        run.cache.hit_ratio() * 100.0,
        run.cache.hits,
        run.cache.misses
    );
    if run.digest.narrative_degraded {
        println!("  Narrative: fallback (text-generation service failed)");
    }
    println!("  Words:     {}", meta.total_word_count);
    println!("  Path:      {}", path.display());
    println!("  Time:      {:.1}s", run.elapsed.as_secs_f64());

    if !run.failures.is_empty() {
        println!();
        println!("  Skipped articles:");
        for f in &run.failures {
            println!("    [{}] {}", f.kind, f.message);
        }
    }
    println!();
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
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn article_done(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Summarized [{current}/{total}] {url}"));
    }

    fn article_failed(&self, failure: &ArticleFailure) {
        self.spinner
            .println(format!("  skipped [{}] {}", failure.kind, failure.url));
    }

    fn done(&self, _run: &DigestRun) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

fn cache_path(config: &AppConfig) -> Result<PathBuf> {
    Ok(expand_home(&config.cache.path)?)
}

async fn open_cache(config: &AppConfig) -> Result<CacheManager> {
    let storage = Storage::open(&cache_path(config)?).await?;
    Ok(CacheManager::new(Arc::new(storage), CacheConfig::from(config)))
}

async fn cmd_cache_stats() -> Result<()> {
    let config = load_config()?;
    let path = cache_path(&config)?;
    if !path.exists() {
        println!("No cache database at {}", path.display());
        return Ok(());
    }

    let storage = Storage::open_readonly(&path).await?;
    let cache = CacheManager::new(Arc::new(storage), CacheConfig::from(&config));
    let stats = cache.stats().await;

    println!();
    println!("  Cache:     {}", path.display());
    println!("  Content:   {} entries", stats.content_entries);
    println!("  Summaries: {} entries", stats.summary_entries);
    println!(
        "  TTL:       content {}h, summaries {}h",
        config.cache.content_ttl_secs / 3600,
        config.cache.summary_ttl_secs / 3600
    );
    println!();
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let config = load_config()?;
    let removed = open_cache(&config).await?.clear().await?;
    println!("Removed {removed} cache entries");
    Ok(())
}

async fn cmd_cache_purge() -> Result<()> {
    let config = load_config()?;
    let removed = open_cache(&config).await?.purge_expired().await?;
    println!("Purged {removed} expired cache entries");
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
