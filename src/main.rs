// ==============================================================================
// main.rs - Fine-mapping Results Entry Point
// ==============================================================================
// Description: Command-line driver for result aggregation and GCTA-COJO
//              conditional analysis
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finemap_results::aggregator::ResultAggregator;
use finemap_results::config::AnalysisConfig;
use finemap_results::executor::ProcessExecutor;
use finemap_results::models::{group_by_locus, Locus, SummaryStatisticRow};
use finemap_results::sumstats::read_sumstats;
use finemap_results::FinemapError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Analysis configuration (YAML)
    #[arg(short, long, env = "FINEMAP_CONFIG", default_value = "configs/analysis.config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compact per-locus shards into genome-wide top-loci and credible-set tables
    Combine,

    /// Select independent signals for every locus in a summary statistics table
    Select {
        /// Tab-separated summary statistics (optionally .gz)
        #[arg(long)]
        sumstats: PathBuf,

        /// Output file for selected rows as JSON lines (stdout if omitted)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Maximum number of loci analysed at once
        #[arg(long)]
        jobs: Option<usize>,
    },

    /// Re-estimate effects of one locus conditional on a list of variants
    Condition {
        #[arg(long)]
        sumstats: PathBuf,

        /// Index variant of the analysis (internal id, e.g. 1_100_A_G)
        #[arg(long)]
        index_variant: String,

        #[arg(long)]
        chrom: String,

        /// Variants to condition on (repeatable)
        #[arg(long = "condition-on", num_args = 1..)]
        condition_on: Vec<String>,

        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finemap_results=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = AnalysisConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;

    match args.command {
        Command::Combine => combine(&config),
        Command::Select { sumstats, out, jobs } => select(&config, &sumstats, out.as_deref(), jobs).await,
        Command::Condition {
            sumstats,
            index_variant,
            chrom,
            condition_on,
            out,
        } => condition(&config, &sumstats, &index_variant, &chrom, &condition_on, out.as_deref()).await,
    }
}

fn combine(config: &AnalysisConfig) -> Result<()> {
    info!("Combining results under {:?}", config.finemapping_output_dir);

    let aggregator = ResultAggregator::new(config.table_engine());
    let (top_loci, credsets) = aggregator
        .combine_results(&config.finemapping_output_dir)
        .context("Result aggregation failed")?;

    println!("{}", serde_json::to_string_pretty(&top_loci)?);
    println!("{}", serde_json::to_string_pretty(&credsets)?);
    Ok(())
}

async fn select(
    config: &AnalysisConfig,
    sumstats: &Path,
    out: Option<&Path>,
    jobs: Option<usize>,
) -> Result<()> {
    let rows = read_sumstats(sumstats)
        .with_context(|| format!("Failed to read summary statistics {:?}", sumstats))?;
    let loci = group_by_locus(rows);
    if loci.is_empty() {
        anyhow::bail!("No summary statistics in {:?}", sumstats);
    }

    let jobs = jobs
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
        .max(1);
    info!("Selecting independent signals for {} loci ({} at a time)", loci.len(), jobs);

    let permits = Arc::new(Semaphore::new(jobs));
    let params = config.cojo.clone();
    let base_context = config.execution_context();
    let mut tasks = JoinSet::new();

    for (index, (locus, locus_rows)) in loci.into_iter().enumerate() {
        // Loci differing only in phenotype or bio_feature share a scratch key
        let context = base_context
            .clone()
            .with_temp_dir(base_context.temp_dir.join(format!("locus-{:05}", index)));
        let cojo = config.gcta_cojo(ProcessExecutor)?.with_context(context);
        let params = params.clone();
        let permits = Arc::clone(&permits);

        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = cojo.select_independent_signals(&locus_rows, &params).await;
            (index, locus, result)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.context("Locus task panicked")?);
    }
    outcomes.sort_by_key(|(index, _, _)| *index);

    let mut selected: Vec<SummaryStatisticRow> = Vec::new();
    let mut failed: Vec<(Locus, FinemapError)> = Vec::new();
    for (_, locus, result) in outcomes {
        match result {
            Ok(rows) => {
                info!("{}: {} independent signal(s)", locus, rows.len());
                selected.extend(rows);
            }
            Err(e) if e.is_locus_scoped() => {
                warn!("{}: selection failed: {}", locus, e);
                failed.push((locus, e));
            }
            Err(e) => return Err(e).with_context(|| format!("Selection aborted at {}", locus)),
        }
    }

    write_json_lines(out, &selected)?;

    if !failed.is_empty() {
        for (locus, e) in &failed {
            error!("Failed locus {}: {}", locus, e);
        }
        anyhow::bail!("{} locus/loci failed selection", failed.len());
    }
    Ok(())
}

async fn condition(
    config: &AnalysisConfig,
    sumstats: &Path,
    index_variant: &str,
    chrom: &str,
    condition_on: &[String],
    out: Option<&Path>,
) -> Result<()> {
    let rows = read_sumstats(sumstats)
        .with_context(|| format!("Failed to read summary statistics {:?}", sumstats))?;

    let cojo = config.gcta_cojo(ProcessExecutor)?;
    let adjusted = cojo
        .adjust_for_conditioning(&rows, index_variant, chrom, condition_on)
        .await
        .with_context(|| format!("Conditional analysis failed for {}", index_variant))?;

    info!(
        "{}: {} of {} variants adjusted (conditioned on {})",
        index_variant,
        adjusted.len(),
        rows.len(),
        condition_on.len()
    );

    write_json_lines(out, &adjusted)
}

fn write_json_lines<T: serde::Serialize>(out: Option<&Path>, rows: &[T]) -> Result<()> {
    let mut writer: Box<dyn Write> = match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
            let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}
