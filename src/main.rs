//! parabench CLI - Resumable paraphrase benchmarking.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use parabench::models::FailurePolicy;
use parabench::report::write_reports;
use parabench::{BenchRunner, Config, EndpointRegistry, MethodRegistry, RunOptions, Workspace};
use std::path::{Path, PathBuf};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "parabench")]
#[command(version)]
#[command(about = "Resumable batch evaluation of paraphrase prediction methods")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "bench.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every method on every dataset, resuming an existing bench
    Run {
        /// Bench identifier (overrides bench.id; generated when neither is set)
        #[arg(short, long)]
        bench_id: Option<String>,

        /// Pairs per method invocation
        #[arg(long)]
        batch_size: Option<usize>,

        /// Strip existing verdicts of the configured methods first
        #[arg(long)]
        purge: bool,

        /// Plan records from abandoned batches again
        #[arg(long)]
        retry_failed: bool,

        /// Only these datasets (base names, repeatable)
        #[arg(short, long = "dataset")]
        datasets: Vec<String>,

        /// Do not draw progress bars
        #[arg(long)]
        no_progress: bool,
    },

    /// Write rates.json and results.json for a bench
    Report {
        /// Bench identifier (overrides bench.id)
        #[arg(short, long)]
        bench_id: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Also ping every referenced endpoint
        #[arg(long)]
        check_endpoints: bool,
    },

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

const EXAMPLE_CONFIG: &str = r#"# parabench configuration file

[bench]
# id = "paper"                  # omitted: r_<day>_<month>_<minute>
source_dir = "datasets_no_results"
benches_dir = "benches"
batch_size = 64
max_attempts = 3
purge = false
failed_batches = "skip"         # or "retry"
datasets = []                   # empty: every *.json in source_dir

[endpoints.local]
base_url = "http://localhost:1234/v1"
api_key = "lm-studio"           # or api_key_env = "MY_KEY"
timeout_secs = 180
max_retries = 3

[[methods]]
name = "llama3_p1"
kind = "chat"
endpoint = "local"
model = "meta-llama-3-8b-instruct"
# prompt = "prompts/p1.md"      # {sentence1} / {sentence2} placeholders

[[methods]]
name = "dsr1_llama3_p1"
kind = "chat"
endpoint = "local"
model = "deepseek-r1-distill-llama-8b"
strip_thinking = true
max_tokens = 2048

[[methods]]
name = "always_false"
kind = "constant"
value = false

[[report.groups]]
name = "SNLI"
category = "Minimize!"
datasets = ["stanfordnlp_snli_pre_hyp", "stanfordnlp_snli_hyp_pre"]
expected = false

[[report.groups]]
name = "STS"
category = "Minimize!"
datasets = ["stsbenchmark"]
expected = false
score = { field = "score", min = 0.0, max = 3.0 }

[[report.groups]]
name = "MRPC"
category = "Classify!"
datasets = ["ms_mrpc"]
expected = "label"
"#;

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            println!("{EXAMPLE_CONFIG}");
        }

        Commands::Validate { check_endpoints } => {
            let config = load_config(&cli.config)?;
            config.validate().context("Invalid configuration")?;
            let endpoints =
                EndpointRegistry::from_config(&config).context("Failed to build endpoints")?;
            let methods = MethodRegistry::from_config_with(&config, &endpoints)
                .context("Failed to build method registry")?;

            info!("Configuration is valid");
            info!("  Methods: {}", methods.names().join(", "));
            info!("  Endpoints: {}", endpoints.endpoint_names().join(", "));
            info!(
                "  Batch size: {}, attempts per batch: {}",
                config.bench.batch_size, config.bench.max_attempts
            );
            info!("  Report groups: {}", config.report.groups.len());

            if check_endpoints {
                let results = endpoints.health_check_all().await;
                let failing: Vec<&str> = results
                    .iter()
                    .filter(|r| r.status != parabench::client::HealthStatus::Healthy)
                    .map(|r| r.endpoint.as_str())
                    .collect();
                if !failing.is_empty() {
                    bail!("Endpoints not healthy: {}", failing.join(", "));
                }
            }
        }

        Commands::Run {
            bench_id,
            batch_size,
            purge,
            retry_failed,
            datasets,
            no_progress,
        } => {
            let mut config = load_config(&cli.config)?;

            // CLI overrides
            if bench_id.is_some() {
                config.bench.id = bench_id;
            }
            if let Some(size) = batch_size {
                config.bench.batch_size = size;
            }
            if purge {
                config.bench.purge = true;
            }
            if retry_failed {
                config.bench.failed_batches = FailurePolicy::Retry;
            }
            if !datasets.is_empty() {
                config.bench.datasets = datasets;
            }
            config.validate().context("Invalid configuration")?;

            let endpoints =
                EndpointRegistry::from_config(&config).context("Failed to build endpoints")?;
            let methods = MethodRegistry::from_config_with(&config, &endpoints)
                .context("Failed to build method registry")?;

            let workspace = Workspace::open(
                &config.bench.benches_dir,
                config.bench.id.as_deref(),
                &config.bench.source_dir,
            )
            .context("Failed to open bench directory")?;
            let only: Vec<String> = config
                .bench
                .datasets
                .iter()
                .map(|name| format!("{name}.json"))
                .collect();
            let seeded = workspace
                .seed((!only.is_empty()).then_some(only.as_slice()))
                .context("Failed to seed bench directory")?;
            info!(
                bench_id = %workspace.bench_id(),
                copied = seeded.copied.len(),
                kept = seeded.skipped.len(),
                "Bench ready"
            );

            let mut options = RunOptions::from(&config.bench);
            options.show_progress = !no_progress;

            let stats = BenchRunner::new(&workspace, &methods, options)
                .run()
                .await
                .context("Bench aborted")?;
            let (input_tokens, output_tokens) = endpoints.total_tokens();

            println!("\n=== Bench {} Complete ===", workspace.bench_id());
            println!("Datasets:    {}", stats.datasets_processed);
            println!("Skipped:     {}", stats.datasets_skipped);
            println!("Methods:     {}", stats.methods);
            println!("Merged:      {} batches", stats.batches_merged);
            println!("Abandoned:   {} batches", stats.batches_abandoned);
            println!("Failed:      {} attempts", stats.failed_attempts);
            println!("Predictions: {}", stats.predictions_written);
            println!("Throughput:  {:.2}/s", stats.throughput_per_sec);
            if input_tokens + output_tokens > 0 {
                println!("Tokens:      {input_tokens} in / {output_tokens} out");
            }
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Output:      {:?}", workspace.dir());

            if stats.batches_abandoned > 0 {
                warn!(
                    abandoned = stats.batches_abandoned,
                    "Some batches were abandoned; rerun with --retry-failed after fixing the method"
                );
            }
        }

        Commands::Report { bench_id } => {
            let config = load_config(&cli.config)?;
            let Some(bench_id) = bench_id.or(config.bench.id.clone()) else {
                bail!("No bench id: pass --bench-id or set bench.id");
            };

            let bench_dir = config.bench.benches_dir.join(&bench_id);
            let methods: Vec<&str> = config.methods.iter().map(|m| m.name.as_str()).collect();
            let (rates, errors, paths) = write_reports(&bench_dir, &config.report.groups, &methods)
                .with_context(|| format!("Failed to report on bench {bench_id}"))?;

            println!("\n=== Bench {bench_id} ===");
            for (method, averages) in &rates.averages {
                println!("{method}:\tsucc: {}\tfail: {}", averages.succ, averages.fail);
            }
            for (method, averages) in &errors.averages {
                let line: Vec<String> = averages.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                println!("{method}:\t{}", line.join("\t"));
            }
            println!("Rates:       {:?}", paths.rates);
            println!("Results:     {:?}", paths.results);
        }
    }

    Ok(())
}
