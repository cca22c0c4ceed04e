// ==============================================================================
// conditional.rs - GCTA-COJO Conditional Analysis
// ==============================================================================
// Description: Stepwise selection of independent signals and conditional
//              adjustment of effect estimates for a single locus
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Scratch files (under the execution context temp dir):
//   Selection:   <key>.gcta_format.tsv  <key>.gcta_out.jma.cojo
//   Adjustment:  <key>_<index>.gcta_format.tsv  <key>_<index>.cond_list.txt
//                <key>_<index>.gcta_out.cma.cojo
//
// Concurrent loci are safe only with distinct keys (see locus_key.rs).
// Scratch files are left in place for inspection.
// ==============================================================================

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{FinemapError, Result};
use crate::executor::{absolute_path, CommandExecutor, CommandSpec, ExecutionContext};
use crate::locus_key::LocusKey;
use crate::models::{ConditionalResult, ConditionalRow, SummaryStatisticRow};
use crate::sumstats::{require_columns, write_gcta_file};
use crate::variant_id;

/// Placeholder substituted with the chromosome in reference panel templates
pub const CHROM_PLACEHOLDER: &str = "{chrom}";

/// Stepwise selection parameters (`--maf`, `--cojo-p`, `--cojo-wind`,
/// `--cojo-collinear`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CojoParams {
    /// Minor allele frequency filter
    pub maf: f64,
    /// Genome-wide significance threshold for selection
    pub p_threshold: f64,
    /// Window (kb) beyond which SNPs are assumed independent
    pub window_kb: u32,
    /// Maximum R² with already-selected SNPs
    pub collinear: f64,
}

impl Default for CojoParams {
    fn default() -> Self {
        Self {
            maf: 0.01,
            p_threshold: 5e-8,
            window_kb: 500,
            collinear: 0.9,
        }
    }
}

/// GCTA-COJO driver for one tool installation and reference panel
pub struct GctaCojo<E: CommandExecutor> {
    executor: E,
    binary: String,
    /// Leading arguments placed before the GCTA options (container wrappers)
    binary_args: Vec<String>,
    /// PLINK bfile prefix; `{chrom}` is replaced with the chromosome
    reference_panel: String,
    context: ExecutionContext,
}

impl<E: CommandExecutor> GctaCojo<E> {
    pub fn new(
        executor: E,
        binary: impl Into<String>,
        reference_panel: impl Into<String>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            executor,
            binary: binary.into(),
            binary_args: Vec::new(),
            reference_panel: reference_panel.into(),
            context,
        }
    }

    pub fn with_binary_args(mut self, args: Vec<String>) -> Self {
        self.binary_args = args;
        self
    }

    /// Replace the execution context (e.g. a per-locus scratch directory)
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Reference panel prefix for a chromosome
    pub fn reference_panel_for(&self, chrom: &str) -> String {
        self.reference_panel.replace(CHROM_PLACEHOLDER, chrom)
    }

    /// Absolute `--bfile` prefix; relative templates resolve against the
    /// caller's working directory, not the tool's
    fn bfile_for(&self, chrom: &str) -> Result<String> {
        let panel = self.reference_panel_for(chrom);
        Ok(absolute_path(Path::new(&panel))?.display().to_string())
    }

    fn scratch_path(&self, key: &LocusKey, suffix: &str) -> Result<PathBuf> {
        Ok(absolute_path(&self.context.temp_dir)?.join(format!("{}.{}", key, suffix)))
    }

    fn command(&self) -> Result<CommandSpec> {
        // Bare names are looked up on PATH; explicit relative paths are not
        let program = if Path::new(&self.binary).components().count() > 1 {
            absolute_path(Path::new(&self.binary))?.display().to_string()
        } else {
            self.binary.clone()
        };
        Ok(self
            .binary_args
            .iter()
            .fold(CommandSpec::new(program), |cmd, arg| cmd.arg(arg)))
    }

    /// Select statistically independent signals within one locus
    ///
    /// The locus (and its chromosome) is taken from the first row. Rows are
    /// filtered to `pval <= params.p_threshold` before being handed to GCTA.
    ///
    /// # Returns
    /// * `Ok(rows)` - Input rows whose variant was selected (input order kept);
    ///   empty when GCTA produced no selection file
    /// * `Err(ExternalToolFailure)` - Non-zero exit or malformed selection file
    pub async fn select_independent_signals(
        &self,
        sumstats: &[SummaryStatisticRow],
        params: &CojoParams,
    ) -> Result<Vec<SummaryStatisticRow>> {
        let first = sumstats
            .first()
            .ok_or_else(|| FinemapError::invalid_input("cannot select signals from an empty locus"))?;
        let chrom = first.chrom.clone();
        let key = LocusKey::from_row(first);

        let gcta_in = self.scratch_path(&key, "gcta_format.tsv")?;
        let gcta_out = self.scratch_path(&key, "gcta_out")?;
        let jma_path = with_suffix(&gcta_out, ".jma.cojo");
        remove_stale(&jma_path)?;

        let n_written = write_gcta_file(&gcta_in, sumstats, Some(params.p_threshold))?;
        info!(
            "COJO selection for {} (chr{}): {} of {} variants pass p <= {}",
            key,
            chrom,
            n_written,
            sumstats.len(),
            params.p_threshold
        );

        let cmd = self
            .command()?
            .opt("--bfile", self.bfile_for(&chrom)?)
            .opt("--chr", &chrom)
            .opt("--maf", params.maf)
            .opt("--cojo-p", params.p_threshold)
            .opt("--cojo-wind", params.window_kb)
            .opt("--cojo-collinear", params.collinear)
            .opt("--cojo-file", gcta_in.display())
            .arg("--cojo-slct")
            .opt("--out", gcta_out.display());

        self.executor.execute(&cmd, &self.context).await?;

        if !jma_path.exists() {
            info!("No independent signals selected for {}", key);
            return Ok(Vec::new());
        }

        let selected = parse_selected_snps(&jma_path, &self.binary)?;
        let top_loci: Vec<SummaryStatisticRow> = sumstats
            .iter()
            .filter(|row| selected.contains(&row.variant_id))
            .cloned()
            .collect();

        info!(
            "Selected {} independent signals for {} ({} reported by GCTA)",
            top_loci.len(),
            key,
            selected.len()
        );
        Ok(top_loci)
    }

    /// Re-estimate effects conditional on a list of variants
    ///
    /// All rows are passed to GCTA (no p-value filter). Rows GCTA does not
    /// report, e.g. dropped for collinearity, are absent from the result.
    pub async fn adjust_for_conditioning(
        &self,
        sumstats: &[SummaryStatisticRow],
        index_variant: &str,
        chrom: &str,
        condition_on: &[String],
    ) -> Result<Vec<ConditionalRow>> {
        let first = sumstats
            .first()
            .ok_or_else(|| FinemapError::invalid_input("cannot condition an empty locus"))?;
        let key = LocusKey::from_row(first).with_discriminator(index_variant);

        let gcta_in = self.scratch_path(&key, "gcta_format.tsv")?;
        let gcta_cond = self.scratch_path(&key, "cond_list.txt")?;
        let gcta_out = self.scratch_path(&key, "gcta_out")?;
        let cma_path = with_suffix(&gcta_out, ".cma.cojo");
        remove_stale(&cma_path)?;

        write_gcta_file(&gcta_in, sumstats, None)?;
        write_condition_list(&gcta_cond, condition_on)?;

        debug!(
            "COJO conditional analysis for index {} on chr{}: conditioning on {} variants",
            index_variant,
            chrom,
            condition_on.len()
        );

        let cmd = self
            .command()?
            .opt("--bfile", self.bfile_for(chrom)?)
            .opt("--chr", chrom)
            .opt("--cojo-file", gcta_in.display())
            .opt("--cojo-cond", gcta_cond.display())
            .opt("--out", gcta_out.display());

        self.executor.execute(&cmd, &self.context).await?;

        if !cma_path.exists() {
            return Err(FinemapError::tool_failure(
                &self.binary,
                format!("conditional analysis produced no output at {}", cma_path.display()),
            ));
        }

        let results = parse_conditional_results(&cma_path, &self.binary)?;
        Ok(merge_conditional(sumstats, &results))
    }
}

/// Inner-join conditional estimates onto summary statistics by variant_id
///
/// Output follows sumstats order. For duplicated ids in `results`, the first
/// reported estimate is used.
pub fn merge_conditional(
    sumstats: &[SummaryStatisticRow],
    results: &[ConditionalResult],
) -> Vec<ConditionalRow> {
    let mut by_id: HashMap<&str, &ConditionalResult> = HashMap::with_capacity(results.len());
    for result in results {
        by_id.entry(result.variant_id.as_str()).or_insert(result);
    }

    let merged: Vec<ConditionalRow> = sumstats
        .iter()
        .filter_map(|row| {
            by_id.get(row.variant_id.as_str()).map(|cond| ConditionalRow {
                sumstats: row.clone(),
                beta_cond: cond.beta_cond,
                se_cond: cond.se_cond,
                pval_cond: cond.pval_cond,
            })
        })
        .collect();

    let dropped = sumstats.len() - merged.len();
    if dropped > 0 {
        info!(
            "Conditional join kept {} of {} variants ({} not reported by GCTA)",
            merged.len(),
            sumstats.len(),
            dropped
        );
    }

    merged
}

/// Write one external-convention variant id per line
pub fn write_condition_list(path: &Path, variant_ids: &[String]) -> Result<()> {
    let file = File::create(path).map_err(|e| FinemapError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for id in variant_ids {
        writeln!(writer, "{}", variant_id::to_external(id)).map_err(|e| FinemapError::io(path, e))?;
    }
    let file = writer
        .into_inner()
        .map_err(|e| FinemapError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| FinemapError::io(path, e))?;
    Ok(())
}

/// Parse the `SNP` column of a `.jma.cojo` file into internal variant ids
pub fn parse_selected_snps(path: &Path, tool: &str) -> Result<HashSet<String>> {
    let ([snp_idx], records) = read_tool_table(path, tool, ["SNP"])?;

    records
        .iter()
        .map(|record| {
            record
                .get(snp_idx)
                .map(variant_id::to_internal)
                .ok_or_else(|| malformed(tool, path, "row without SNP field"))
        })
        .collect()
}

/// Parse per-variant conditional estimates from a `.cma.cojo` file
pub fn parse_conditional_results(path: &Path, tool: &str) -> Result<Vec<ConditionalResult>> {
    let ([snp_idx, b_idx, se_idx, p_idx], records) =
        read_tool_table(path, tool, ["SNP", "bC", "bC_se", "pC"])?;

    let field = |record: &StringRecord, idx: usize, name: &str| -> Result<Option<f64>> {
        let raw = record
            .get(idx)
            .ok_or_else(|| malformed(tool, path, &format!("row without {} field", name)))?;
        parse_optional_float(raw)
            .ok_or_else(|| malformed(tool, path, &format!("invalid {} value '{}'", name, raw)))
    };

    let mut results = Vec::with_capacity(records.len());
    for record in &records {
        let snp = record
            .get(snp_idx)
            .ok_or_else(|| malformed(tool, path, "row without SNP field"))?;
        results.push(ConditionalResult {
            variant_id: variant_id::to_internal(snp),
            beta_cond: field(record, b_idx, "bC")?,
            se_cond: field(record, se_idx, "bC_se")?,
            pval_cond: field(record, p_idx, "pC")?,
        });
    }

    debug!("Parsed {} conditional estimates from {:?}", results.len(), path);
    Ok(results)
}

/// Read a tab-separated GCTA output table, returning the position of each
/// required column; any read or schema problem is reported as a tool failure
fn read_tool_table<const N: usize>(
    path: &Path,
    tool: &str,
    required: [&str; N],
) -> Result<([usize; N], Vec<StringRecord>)> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| malformed(tool, path, &e.to_string()))?;

    let headers = rdr
        .headers()
        .map_err(|e| malformed(tool, path, &e.to_string()))?
        .clone();

    require_columns(&headers, &required, &path.display().to_string())
        .map_err(|e| malformed(tool, path, &e.to_string()))?;

    let mut indices = [0usize; N];
    for (slot, name) in indices.iter_mut().zip(required) {
        *slot = headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| malformed(tool, path, &format!("missing column {}", name)))?;
    }

    let records = rdr
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| malformed(tool, path, &e.to_string()))?;

    Ok((indices, records))
}

/// "NA" and empty cells are missing; anything else must parse as a float
fn parse_optional_float(raw: &str) -> Option<Option<f64>> {
    match raw {
        "" | "NA" | "nan" | "NaN" => Some(None),
        other => other.parse::<f64>().ok().map(Some),
    }
}

fn malformed(tool: &str, path: &Path, detail: &str) -> FinemapError {
    FinemapError::tool_failure(tool, format!("malformed output {}: {}", path.display(), detail))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale tool output {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FinemapError::io(path, e)),
    }
}
