use anyhow::Result;
use clap::{Parser, Subcommand};
use nodesift::node::{
    sorted_by_delay, valid_candidates, ClassificationPipeline, ClassifyConfig, CountryRule,
    EngineConfig, GeoConfig, GeoResolver, Harvester, HarvesterConfig, ValidationEngine,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A node config harvester, deduplicator, reachability checker and classifier
#[derive(Parser)]
#[command(name = "nodesift")]
#[command(about = "Harvest, dedupe, probe and classify proxy node configs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe candidates from a file and report reachability
    Probe {
        /// Input file with one candidate per line
        input: PathBuf,
        /// Output file for reachable candidates
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Connect timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
        /// Maximum concurrent probes
        #[arg(short = 'n', long, default_value = "20")]
        concurrency: usize,
        /// Total connect attempts per candidate
        #[arg(long, default_value = "1")]
        retries: u32,
        /// Minimum plausible connect delay in milliseconds
        #[arg(long, default_value = "5")]
        min_delay: f64,
    },
    /// Harvest raw candidates from source URLs
    Harvest {
        /// URLs to harvest from (can specify multiple)
        #[arg(short, long)]
        url: Vec<String>,
        /// File containing source URLs, one per line
        #[arg(short = 'f', long)]
        url_file: Option<PathBuf>,
        /// Output file for harvested candidates
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// HTTP timeout in seconds
        #[arg(long, default_value = "15")]
        timeout: u64,
    },
    /// Full pipeline: load or harvest, dedupe, probe, classify, write buckets
    Run {
        /// Input file with candidates (alternative to harvesting)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// File containing source URLs to harvest
        #[arg(short = 'f', long)]
        url_file: Option<PathBuf>,
        /// Output directory for category files
        #[arg(short, long, default_value = "configs")]
        output: PathBuf,
        /// JSON file with ordered country rules
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Connect timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
        /// Maximum concurrent probes
        #[arg(short = 'n', long, default_value = "20")]
        concurrency: usize,
        /// Total connect attempts per candidate
        #[arg(long, default_value = "1")]
        retries: u32,
        /// Minimum plausible connect delay in milliseconds
        #[arg(long, default_value = "5")]
        min_delay: f64,
        /// Per-category cap on probed candidates
        #[arg(long, default_value = "200")]
        sampling_threshold: usize,
        /// Probe every candidate, no sampling
        #[arg(long)]
        no_sampling: bool,
        /// Enable geolocation enrichment of reachable nodes
        #[arg(long)]
        geo: bool,
        /// Geo lookup timeout in seconds
        #[arg(long, default_value = "5")]
        geo_timeout: u64,
        /// Geo cache capacity
        #[arg(long, default_value = "256")]
        geo_cache: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Probe {
            input,
            output,
            timeout,
            concurrency,
            retries,
            min_delay,
        } => {
            let candidates = load_candidates(&input)?;
            println!("Loaded {} candidates from {:?}", candidates.len(), input);

            let config = EngineConfig::new()
                .with_timeout(Duration::from_secs(timeout))
                .with_concurrency(concurrency)
                .with_attempts(retries)
                .with_min_valid_delay_ms(min_delay);
            let engine = ValidationEngine::with_config(config);

            let results = engine.process(&candidates).await;
            let valid = valid_candidates(&results);
            println!(
                "Results: {} reachable, {} unreachable",
                valid.len(),
                results.len() - valid.len()
            );

            for (candidate, delay) in sorted_by_delay(&results) {
                println!("  {candidate} ({delay:.1}ms)");
            }

            if let Some(path) = output {
                let mut lines: Vec<&str> = valid.iter().map(String::as_str).collect();
                lines.sort_unstable();
                std::fs::write(&path, lines.join("\n"))?;
                println!("Saved {} reachable candidates to {:?}", valid.len(), path);
            }
        }
        Commands::Harvest {
            url,
            url_file,
            output,
            timeout,
        } => {
            let urls = collect_urls(url, url_file)?;
            let harvester = Harvester::with_config(
                HarvesterConfig::new().with_timeout(Duration::from_secs(timeout)),
            )?;

            let candidates = harvester.harvest(&urls).await;
            println!(
                "Harvested {} candidates from {} sources",
                candidates.len(),
                urls.len()
            );

            if let Some(path) = output {
                let mut lines: Vec<&str> = candidates.iter().map(String::as_str).collect();
                lines.sort_unstable();
                std::fs::write(&path, lines.join("\n"))?;
                println!("Saved candidates to {:?}", path);
            } else {
                for candidate in &candidates {
                    println!("{candidate}");
                }
            }
        }
        Commands::Run {
            input,
            url_file,
            output,
            rules,
            timeout,
            concurrency,
            retries,
            min_delay,
            sampling_threshold,
            no_sampling,
            geo,
            geo_timeout,
            geo_cache,
        } => {
            let candidates = match (input, url_file) {
                (Some(path), _) => load_candidates(&path)?,
                (None, Some(file)) => {
                    let urls = collect_urls(Vec::new(), Some(file))?;
                    let harvester = Harvester::new()?;
                    harvester.harvest(&urls).await
                }
                (None, None) => {
                    anyhow::bail!("either --input or --url-file is required")
                }
            };
            println!("Processing {} raw candidates", candidates.len());

            let engine_config = EngineConfig::new()
                .with_timeout(Duration::from_secs(timeout))
                .with_concurrency(concurrency)
                .with_attempts(retries)
                .with_min_valid_delay_ms(min_delay);
            let mut engine = ValidationEngine::with_config(engine_config);

            if geo {
                let geo_config = GeoConfig::new()
                    .with_lookup_timeout(Duration::from_secs(geo_timeout))
                    .with_cache_capacity(geo_cache);
                engine = engine.with_geo(Arc::new(GeoResolver::new(geo_config)?));
            }

            let classify_config = ClassifyConfig::new()
                .with_sampling_threshold(sampling_threshold)
                .with_sampling_enabled(!no_sampling);
            let pipeline = ClassificationPipeline::new(engine, classify_config);

            let country_rules = match rules {
                Some(path) => CountryRule::load_from_file(path)?,
                None => CountryRule::builtin(),
            };

            let result = pipeline.classify(&candidates, &country_rules).await;

            for (label, items) in result.protocols.iter().chain(result.countries.iter()) {
                println!("{label}: {} nodes", items.len());
            }
            if !result.unprobed.is_empty() {
                println!(
                    "{} nodes included on format validity alone (sampling cap)",
                    result.unprobed.len()
                );
            }

            result.save_to_dir(&output)?;
            println!("Saved category files to {:?}", output);
        }
    }

    Ok(())
}

/// Read candidates from a file, one per line, skipping blanks
fn load_candidates(path: &Path) -> Result<HashSet<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

fn collect_urls(mut urls: Vec<String>, url_file: Option<PathBuf>) -> Result<Vec<String>> {
    if let Some(path) = url_file {
        urls.extend(nodesift::node::load_urls_file(path)?);
    }
    if urls.is_empty() {
        anyhow::bail!("no source URLs given");
    }
    Ok(urls)
}
