// ==============================================================================
// aggregator.rs - Genome-wide Result Aggregation
// ==============================================================================
// Description: Compacts per-locus fine-mapping shards into genome-wide
//              top-loci and credible-set tables
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Strategies (do not conflate):
//   Top loci       -> global total order, single compacted file
//   Credible sets  -> range partition on (lead_chrom, lead_pos), sort within
//                     each partition only; multi-part directory
//
// Input layout:
//   <root>/output/study_id=*/phenotype_id=*/bio_feature=*/chrom=*/top_loci.json.gz
//   <root>/output/study_id=*/phenotype_id=*/bio_feature=*/chrom=*/credible_set.json.gz
//
// Output layout:
//   <root>/results/top_loci.json.gz
//   <root>/results/credset/part-NNNNN.json.gz
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::table::{TableEngine, WriteOptions};

/// Global sort order of the top-loci table
pub const TOP_LOCI_SORT_KEYS: [&str; 5] = ["study_id", "phenotype_id", "bio_feature", "chrom", "pos"];

/// Range-partition and intra-partition sort key of the credible-set table
pub const CREDSET_SORT_KEYS: [&str; 2] = ["lead_chrom", "lead_pos"];

pub const TOP_LOCI_SHARD: &str = "top_loci.json.gz";
pub const CREDSET_SHARD: &str = "credible_set.json.gz";

/// Summary of one compaction run
#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    pub pattern: String,
    pub output: PathBuf,
    pub shards_matched: usize,
    pub shards_read: usize,
    pub shards_skipped: usize,
    pub rows_written: usize,
    pub files_written: usize,
    pub completed_at: DateTime<Utc>,
}

/// Glob pattern for shards of `file_name` under a fine-mapping output root
pub fn shard_pattern(root: &Path, file_name: &str) -> String {
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    format!(
        "{}/output/study_id=*/phenotype_id=*/bio_feature=*/chrom=*/{}",
        escaped_root.trim_end_matches('/'),
        file_name
    )
}

/// Merges shard files through a [`TableEngine`]
pub struct ResultAggregator<T: TableEngine> {
    engine: T,
    options: WriteOptions,
}

impl<T: TableEngine> ResultAggregator<T> {
    pub fn new(engine: T) -> Self {
        Self {
            engine,
            options: WriteOptions::default(),
        }
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Union all top-loci shards, order globally and write a single file
    ///
    /// # Returns
    /// * `Err(NotFound)` - Pattern matched no shard files; nothing is written
    pub fn compact_top_loci(&self, pattern: &str, output_path: &Path) -> Result<AggregationReport> {
        info!("Compacting top loci from {}", pattern);

        let table = self.engine.read(pattern)?;
        let (matched, read, skipped) = (table.shards_matched, table.shards_read, table.shards_skipped);

        let ordered = self.engine.order_by(table, &TOP_LOCI_SORT_KEYS);
        let rows_written = self.engine.write(&ordered, output_path, self.options)?;

        let report = AggregationReport {
            pattern: pattern.to_string(),
            output: output_path.to_path_buf(),
            shards_matched: matched,
            shards_read: read,
            shards_skipped: skipped,
            rows_written,
            files_written: 1,
            completed_at: Utc::now(),
        };
        log_report("Top loci", &report);
        Ok(report)
    }

    /// Union all credible-set shards, range-partition on
    /// (lead_chrom, lead_pos) and sort within partitions
    pub fn compact_credible_sets(&self, pattern: &str, output_dir: &Path) -> Result<AggregationReport> {
        info!("Compacting credible sets from {}", pattern);

        let table = self.engine.read(pattern)?;
        let (matched, read, skipped) = (table.shards_matched, table.shards_read, table.shards_skipped);

        let partitions = self.engine.partitioned_sort(table, &CREDSET_SORT_KEYS);
        let rows_written: usize = partitions.iter().map(|p| p.len()).sum();
        let files_written = self.engine.write_partitions(&partitions, output_dir, self.options)?;

        let report = AggregationReport {
            pattern: pattern.to_string(),
            output: output_dir.to_path_buf(),
            shards_matched: matched,
            shards_read: read,
            shards_skipped: skipped,
            rows_written,
            files_written,
            completed_at: Utc::now(),
        };
        log_report("Credible sets", &report);
        Ok(report)
    }

    /// Run both compactions for a fine-mapping output root
    pub fn combine_results(&self, root: &Path) -> Result<(AggregationReport, AggregationReport)> {
        let results_dir = root.join("results");

        let top_loci = self.compact_top_loci(
            &shard_pattern(root, TOP_LOCI_SHARD),
            &results_dir.join("top_loci.json.gz"),
        )?;
        let credsets = self.compact_credible_sets(
            &shard_pattern(root, CREDSET_SHARD),
            &results_dir.join("credset"),
        )?;

        Ok((top_loci, credsets))
    }
}

fn log_report(label: &str, report: &AggregationReport) {
    info!(
        "{} compacted: {} rows into {} file(s) at {:?} ({} shards matched, {} read, {} skipped)",
        label,
        report.rows_written,
        report.files_written,
        report.output,
        report.shards_matched,
        report.shards_read,
        report.shards_skipped
    );
}
