use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use watchframe::config::{self, WatchframeConfig};
use watchframe::fetch::HttpFetcher;
use watchframe::imaging::RustCodec;
use watchframe::prepare::{self, BatchSettings};
use watchframe::preprocess::{ImagePreprocessor, PreprocessOptions};
use watchframe::saliency::{JsonFileStore, SaliencyEstimator, fingerprint_bytes};
use watchframe::output;

#[derive(Parser)]
#[command(name = "watchframe")]
#[command(about = "Subject-aware framing and upload preparation for watch photos")]
#[command(long_about = "\
Subject-aware framing and upload preparation for watch photos

watchframe locates the watch in a photo by comparing every region against the
color of the frame edges, crops a square around it, bounds the size, and lays
the result over a blurred copy of itself so odd backgrounds fade out. It also
samples the dial color.

Results of the analysis are cached by content in <cache>/saliency-cache.json,
so re-running on the same photos is cheap.

Run 'watchframe gen-config' to generate a documented watchframe.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file = defaults)
    #[arg(long, default_value = config::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Saliency cache directory (overrides cache.path)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print subject offset and dial color for photos or URLs
    Analyze {
        /// Image files, file:// URLs or http(s) URLs
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Write framed, upload-ready images
    Prepare {
        /// Image files or directories (walked recursively)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for the prepared images
        #[arg(long, short)]
        output: PathBuf,

        /// Bound on the longer edge (overrides output.max_dimension)
        #[arg(long)]
        max_dimension: Option<u32>,

        /// Skip the blurred-background composite
        #[arg(long)]
        no_blur: bool,

        /// Keep outputs that already exist (overrides output.skip_existing)
        #[arg(long)]
        skip_existing: bool,
    },
    /// Remove every cached descriptor
    ClearCache,
    /// Print a stock watchframe.toml with all options documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("watchframe=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Analyze { sources } => {
            let (_, estimator, _) = setup(&cli)?;
            for (i, source) in sources.iter().enumerate() {
                let descriptor = if is_remote(source) {
                    let key = fingerprint_bytes(source.as_bytes());
                    estimator.analyze_from_source(source, &key).await
                } else {
                    let path = source.strip_prefix("file://").unwrap_or(source.as_str());
                    match tokio::fs::read(path).await {
                        Ok(bytes) => estimator.analyze_bytes(&bytes, None).await,
                        Err(e) => {
                            output::print_source_error(i + 1, source, &e.to_string());
                            continue;
                        }
                    }
                };
                output::print_descriptor(i + 1, source, &descriptor);
            }
            estimator.flush();
            println!("Cache: {}", estimator.stats());
        }
        Command::Prepare {
            inputs,
            output: output_dir,
            max_dimension,
            no_blur,
            skip_existing,
        } => {
            let (config, estimator, _) = setup(&cli)?;
            init_thread_pool(&config.processing);
            let photos = prepare::collect_inputs(inputs)?;
            let jobs = prepare::plan_jobs(&photos, output_dir, config.output.format);
            let settings = BatchSettings {
                output_dir: output_dir.clone(),
                max_dimension: max_dimension.unwrap_or(config.output.max_dimension),
                blur_background: config.output.blur_background && !no_blur,
                concurrency: config::effective_threads(&config.processing),
                skip_existing: config.output.skip_existing || *skip_existing,
            };
            let preprocessor = Arc::new(ImagePreprocessor::new(
                estimator.clone(),
                Arc::new(RustCodec::new()),
                PreprocessOptions::from_config(&config.output),
            ));

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                let mut failures = Vec::new();
                for event in rx {
                    for line in output::format_prepare_event(&event) {
                        println!("{}", line);
                    }
                    failures.extend(event.failure());
                }
                failures
            });
            let summary = prepare::prepare_all(preprocessor, jobs, &settings, Some(tx)).await?;
            let failures = printer.join().map_err(|_| "output printer panicked")?;

            estimator.flush();
            println!();
            output::print_batch_summary(&summary);
            if let Some(report) = prepare::write_failure_report(output_dir, &failures)? {
                println!("Failures listed in {}", report.display());
            }
            println!("Cache: {}", estimator.stats());
        }
        Command::ClearCache => {
            let (_, estimator, cache_dir) = setup(&cli)?;
            estimator.clear();
            estimator.flush();
            println!("Cleared saliency cache in {}", cache_dir.display());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

type Setup = (WatchframeConfig, Arc<SaliencyEstimator>, PathBuf);

/// Load config and open the estimator on the configured cache directory.
fn setup(cli: &Cli) -> Result<Setup, Box<dyn std::error::Error>> {
    let config = config::load_config(&cli.config)?;
    let cache_dir = cli
        .cache
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.cache.path));
    let estimator = SaliencyEstimator::new(
        JsonFileStore::in_dir(&cache_dir),
        HttpFetcher::from_config(&config.fetch)?,
        config.cache.limits(),
    );
    Ok((config, Arc::new(estimator), cache_dir))
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; users can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
