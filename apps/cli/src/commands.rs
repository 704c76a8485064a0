//! CLI command definitions, routing, and tracing setup.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use docforge_ai::OpenAiClient;
use docforge_core::events::ProgressReporter;
use docforge_core::{GenerationRequest, OutputResult, Pipeline, execution, ingestion};
use docforge_retrieval::{RetrievalFilters, RetrievalOptions, retrieve_context};
use docforge_shared::{
    AppConfig, AssetRole, SetId, init_config, load_config, validate_api_key,
};
use docforge_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docforge — generate customer document sets from standard packages.
#[derive(Parser)]
#[command(
    name = "docforge",
    version,
    about = "Ingest standard package vaults and generate customer document sets.",
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
    /// Create a document set bound to a registered package version.
    InitSet {
        /// Human-readable name for the set.
        name: String,

        /// Package code (e.g. ISO9001).
        #[arg(short, long)]
        package: String,

        /// Package version.
        #[arg(long, default_value = "v1")]
        package_version: String,
    },

    /// Ingest the set's package vault: copy assets, index chunks, embed.
    Ingest {
        /// Document set ID.
        set_id: String,

        /// Re-index assets even when their content is unchanged.
        #[arg(long)]
        force: bool,
    },

    /// Add a customer-uploaded reference file to a set.
    Upload {
        /// Document set ID.
        set_id: String,

        /// File to ingest.
        file: PathBuf,
    },

    /// Generate outputs from the set's templates.
    Generate {
        /// Document set ID.
        set_id: String,

        /// Customer profile value (KEY=VALUE, repeatable).
        #[arg(long = "profile", value_name = "KEY=VALUE")]
        profile: Vec<String>,

        /// Operator override (KEY=VALUE, repeatable).
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Generate only this template (package-relative path, repeatable).
        #[arg(long = "only", value_name = "TEMPLATE")]
        only: Vec<String>,

        /// Refine the generation plan with the chat model.
        #[arg(long)]
        ai_plan: bool,
    },

    /// Hybrid search over a set's indexed chunks.
    Search {
        /// Document set ID.
        set_id: String,

        /// Query text.
        query: String,

        /// Restrict to one asset role (template, reference, customer_reference).
        #[arg(long)]
        role: Option<String>,

        /// Number of fused results.
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Show resolved variables for a set.
    Vars {
        /// Document set ID.
        set_id: String,
    },

    /// List all document sets.
    Sets,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
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
        0 => "docforge=info",
        1 => "docforge=debug",
        _ => "docforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::InitSet {
            name,
            package,
            package_version,
        } => cmd_init_set(&name, &package, &package_version).await,
        Command::Ingest { set_id, force } => cmd_ingest(&set_id, force).await,
        Command::Upload { set_id, file } => cmd_upload(&set_id, &file).await,
        Command::Generate {
            set_id,
            profile,
            overrides,
            only,
            ai_plan,
        } => cmd_generate(&set_id, &profile, &overrides, &only, ai_plan).await,
        Command::Search {
            set_id,
            query,
            role,
            top,
        } => cmd_search(&set_id, &query, role.as_deref(), top).await,
        Command::Vars { set_id } => cmd_vars(&set_id).await,
        Command::Sets => cmd_sets().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Pipeline wiring
// ---------------------------------------------------------------------------

/// Build the full pipeline handle: config, storage, AI clients, progress.
async fn open_pipeline() -> Result<Pipeline> {
    let config = load_config()?;
    validate_api_key(&config)?;

    let api_key = std::env::var(&config.openai.api_key_env)
        .map_err(|_| eyre!("env var {} is not set", config.openai.api_key_env))?;
    let client = OpenAiClient::new(config.openai.base_url.clone(), api_key)?;

    let storage = Storage::open(&db_path(&config)?).await?;
    Ok(Pipeline::new(
        storage,
        config,
        Arc::new(client.clone()),
        Arc::new(client),
        Arc::new(CliProgress::new()),
    ))
}

fn db_path(config: &AppConfig) -> Result<PathBuf> {
    Ok(config.data_root()?.join("docforge.db"))
}

fn parse_set_id(raw: &str) -> Result<SetId> {
    raw.parse()
        .map_err(|e| eyre!("invalid set ID '{raw}': {e}"))
}

/// Parse repeated `KEY=VALUE` flags into a map.
fn parse_kv(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| eyre!("expected KEY=VALUE, got '{pair}'"))?;
        if key.is_empty() {
            return Err(eyre!("empty key in '{pair}'"));
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_init_set(name: &str, package: &str, package_version: &str) -> Result<()> {
    let pipeline = open_pipeline().await?;
    let set = pipeline
        .create_document_set(name, package, package_version)
        .await?;

    println!();
    println!("  Document set created!");
    println!("  ID:      {}", set.id);
    println!("  Name:    {}", set.name);
    println!("  Package: {}/{}", set.package_code, set.package_version);
    println!();
    Ok(())
}

async fn cmd_ingest(set_id: &str, force: bool) -> Result<()> {
    let pipeline = open_pipeline().await?;
    let set_id = parse_set_id(set_id)?;

    info!(%set_id, force, "ingesting package vault");
    let started = std::time::Instant::now();
    let outcome = ingestion::ingest_package_for_set(&pipeline, &set_id, force).await?;

    println!();
    println!("  Ingestion {}", outcome.status.as_str());
    println!("  Run:        {}", outcome.run_id);
    println!("  Files:      {}", outcome.stats.files_seen);
    println!("  Templates:  {}", outcome.stats.templates_indexed);
    println!("  References: {}", outcome.stats.references_indexed);
    println!("  Chunks:     {}", outcome.stats.chunks_written);
    println!("  Embedded:   {}", outcome.stats.chunks_embedded);
    if outcome.stats.extraction_failures > 0 {
        println!("  Failures:   {}", outcome.stats.extraction_failures);
    }
    println!("  Time:       {:.1}s", started.elapsed().as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_upload(set_id: &str, file: &PathBuf) -> Result<()> {
    let pipeline = open_pipeline().await?;
    let set_id = parse_set_id(set_id)?;

    if !file.is_file() {
        return Err(eyre!("'{}' is not a file", file.display()));
    }

    info!(%set_id, file = %file.display(), "ingesting upload");
    let stats = ingestion::ingest_uploaded_reference(&pipeline, &set_id, file).await?;

    println!();
    println!("  Upload indexed!");
    println!("  Chunks:   {}", stats.chunks_written);
    println!("  Embedded: {}", stats.chunks_embedded);
    println!();
    Ok(())
}

async fn cmd_generate(
    set_id: &str,
    profile: &[String],
    overrides: &[String],
    only: &[String],
    ai_plan: bool,
) -> Result<()> {
    let pipeline = open_pipeline().await?;
    let set_id = parse_set_id(set_id)?;

    // Map --only template paths to their asset ids.
    let mut selected_asset_ids = BTreeSet::new();
    if !only.is_empty() {
        let templates = pipeline
            .storage
            .list_assets_by_role(&set_id.to_string(), AssetRole::Template)
            .await?;
        for rel_path in only {
            let template = templates
                .iter()
                .find(|t| &t.rel_path == rel_path)
                .ok_or_else(|| eyre!("no ingested template at '{rel_path}'"))?;
            selected_asset_ids.insert(template.id.clone());
        }
    }

    let request = GenerationRequest {
        profile: parse_kv(profile)?,
        overrides: parse_kv(overrides)?,
        file_overrides: BTreeMap::new(),
        selected_asset_ids,
        use_ai_plan: ai_plan,
    };

    info!(%set_id, ai_plan, "starting generation run");
    let started = std::time::Instant::now();
    let report = execution::execute_generation(&pipeline, &set_id, &request).await?;

    println!();
    println!("  Generation {}", report.status.as_str());
    println!("  Run:       {}", report.run_id);
    println!("  Generated: {}", report.generated);
    println!("  Failed:    {}", report.failed);
    println!("  Skipped:   {}", report.skipped);
    println!("  Time:      {:.1}s", started.elapsed().as_secs_f64());
    for outcome in &report.outputs {
        match &outcome.result {
            OutputResult::Generated { unresolved, .. } => {
                if unresolved.is_empty() {
                    println!("    ok      {}", outcome.output_rel_path);
                } else {
                    println!(
                        "    ok      {} (unresolved: {})",
                        outcome.output_rel_path,
                        unresolved.join(", ")
                    );
                }
            }
            OutputResult::Skipped { reason } => {
                println!("    skip    {} ({reason})", outcome.output_rel_path);
            }
            OutputResult::Failed { reason } => {
                println!("    failed  {} ({reason})", outcome.output_rel_path);
            }
        }
    }
    if !report.resolution.unresolved.is_empty() {
        println!(
            "  Unresolved variables: {}",
            report.resolution.unresolved.join(", ")
        );
    }
    if !report.unknown_tokens.is_empty() {
        let unknown: Vec<&str> = report.unknown_tokens.iter().map(String::as_str).collect();
        println!("  Unknown tokens: {}", unknown.join(", "));
    }
    println!();
    Ok(())
}

async fn cmd_search(set_id: &str, query: &str, role: Option<&str>, top: usize) -> Result<()> {
    let pipeline = open_pipeline().await?;
    let set_id = parse_set_id(set_id)?;

    let role = match role {
        Some(raw) => Some(
            AssetRole::parse(raw).ok_or_else(|| eyre!("unknown asset role '{raw}'"))?,
        ),
        None => None,
    };
    let filters = RetrievalFilters {
        role,
        asset_ids: None,
    };
    let options = RetrievalOptions {
        top_n: top,
        ..Default::default()
    };

    let results = retrieve_context(
        &pipeline.storage,
        pipeline.embeddings.as_ref(),
        &pipeline.config.openai.embed_model,
        &set_id.to_string(),
        query,
        &filters,
        &options,
    )
    .await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (index, candidate) in results.iter().enumerate() {
        let preview: String = candidate.text.chars().take(160).collect();
        println!(
            "{:2}. [{}] {}",
            index + 1,
            candidate.role.as_str(),
            candidate.asset_path
        );
        println!("    {preview}");
    }
    Ok(())
}

async fn cmd_vars(set_id: &str) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&db_path(&config)?).await?;
    let set_id = parse_set_id(set_id)?;

    let values = storage.list_variable_values(&set_id.to_string()).await?;
    if values.is_empty() {
        println!("No resolved variables.");
        return Ok(());
    }
    for value in values {
        let confidence = value
            .confidence
            .map(|c| format!(" ({c:.2})"))
            .unwrap_or_default();
        println!(
            "  {:<30} {:<15}{} {}",
            value.token,
            value.source.as_str(),
            confidence,
            value.value
        );
    }
    Ok(())
}

async fn cmd_sets() -> Result<()> {
    let config = load_config()?;
    let path = db_path(&config)?;
    if !path.exists() {
        println!("No document sets.");
        return Ok(());
    }
    let storage = Storage::open_readonly(&path).await?;

    let sets = storage.list_document_sets().await?;
    if sets.is_empty() {
        println!("No document sets.");
        return Ok(());
    }
    for set in sets {
        println!(
            "  {}  {:<24} {}/{}",
            set.id, set.name, set.package_code, set.package_version
        );
    }
    Ok(())
}

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

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Progress reporter mapping pipeline progress onto an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn begin(&self, label: &str, total: u64) {
        self.bar.reset();
        self.bar.set_length(total);
        self.bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix} [{pos}/{len}] {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        self.bar.set_prefix(label.to_string());
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.enable_steady_tick(std::time::Duration::from_millis(80));
    }

    fn advance(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    fn finish(&self, message: &str) {
        self.bar.finish_and_clear();
        self.bar.set_message(message.to_string());
    }
}
