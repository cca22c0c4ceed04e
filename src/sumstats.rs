// ==============================================================================
// sumstats.rs - GCTA-COJO Summary Statistics Formatter
// ==============================================================================
// Description: Reads summary statistic tables and writes GCTA-COJO input files
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Column mapping (internal -> GCTA-COJO):
//   variant_id -> SNP   alt_al -> A1   ref_al -> A2   eaf -> freq
//   beta -> b           se -> se       pval -> p      n_samples -> N
//
// Output: tab-separated, header included, rows sorted by SNP
// ==============================================================================

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

use crate::error::{FinemapError, Result};
use crate::models::{SummaryStatisticRow, REQUIRED_SUMSTAT_COLUMNS};
use crate::variant_id;

/// GCTA-COJO `--cojo-file` columns, in required order
pub const GCTA_COLUMNS: [&str; 8] = ["SNP", "A1", "A2", "freq", "b", "se", "p", "N"];

/// One row of a GCTA-COJO summary statistics file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GctaSumstat {
    #[serde(rename = "SNP")]
    pub snp: String,
    #[serde(rename = "A1")]
    pub a1: String,
    #[serde(rename = "A2")]
    pub a2: String,
    pub freq: f64,
    pub b: f64,
    pub se: f64,
    pub p: f64,
    #[serde(rename = "N")]
    pub n: f64,
}

impl From<&SummaryStatisticRow> for GctaSumstat {
    fn from(row: &SummaryStatisticRow) -> Self {
        Self {
            snp: variant_id::to_external(&row.variant_id),
            a1: row.alt_al.clone(),
            a2: row.ref_al.clone(),
            freq: row.eaf,
            b: row.beta,
            se: row.se,
            p: row.pval,
            n: row.n_samples,
        }
    }
}

/// Convert summary statistics to GCTA-COJO rows
///
/// Rows with `pval > p_threshold` are dropped when a threshold is given.
/// The result is sorted by SNP, then by the remaining columns, so that output
/// does not depend on input order even when a SNP id repeats.
pub fn format_sumstats(rows: &[SummaryStatisticRow], p_threshold: Option<f64>) -> Vec<GctaSumstat> {
    let mut formatted: Vec<GctaSumstat> = rows
        .iter()
        .filter(|row| p_threshold.map_or(true, |t| row.pval <= t))
        .map(GctaSumstat::from)
        .collect();

    formatted.sort_by(compare_gcta_rows);
    formatted
}

fn compare_gcta_rows(a: &GctaSumstat, b: &GctaSumstat) -> Ordering {
    a.snp
        .cmp(&b.snp)
        .then_with(|| a.a1.cmp(&b.a1))
        .then_with(|| a.a2.cmp(&b.a2))
        .then_with(|| a.freq.total_cmp(&b.freq))
        .then_with(|| a.b.total_cmp(&b.b))
        .then_with(|| a.se.total_cmp(&b.se))
        .then_with(|| a.p.total_cmp(&b.p))
        .then_with(|| a.n.total_cmp(&b.n))
}

/// Write GCTA-COJO rows as a tab-separated stream with header
pub fn write_gcta_sumstats<W: Write>(writer: W, rows: &[GctaSumstat]) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);

    wtr.write_record(GCTA_COLUMNS)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush().map_err(|e| FinemapError::io("<gcta sumstats>", e))?;
    Ok(())
}

/// Format and write a GCTA-COJO input file, returning the number of rows written
///
/// The file is flushed and synced before returning so an external process
/// can read it immediately.
pub fn write_gcta_file(
    path: &Path,
    rows: &[SummaryStatisticRow],
    p_threshold: Option<f64>,
) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FinemapError::io(parent, e))?;
    }

    let formatted = format_sumstats(rows, p_threshold);

    let file = File::create(path).map_err(|e| FinemapError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    write_gcta_sumstats(&mut writer, &formatted)?;

    let file = writer
        .into_inner()
        .map_err(|e| FinemapError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| FinemapError::io(path, e))?;

    debug!(
        "Wrote {} of {} rows to GCTA input {:?} (p threshold: {:?})",
        formatted.len(),
        rows.len(),
        path,
        p_threshold
    );

    Ok(formatted.len())
}

/// Fail with SchemaMismatch unless every required column is in the header
pub fn require_columns(headers: &StringRecord, required: &[&str], source_name: &str) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(FinemapError::schema_mismatch(source_name, missing))
    }
}

/// Read a tab-separated summary statistics table (optionally gzip-compressed)
pub fn read_sumstats(path: impl AsRef<Path>) -> Result<Vec<SummaryStatisticRow>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| FinemapError::io(path, e))?;

    let reader: Box<dyn Read> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    require_columns(&headers, &REQUIRED_SUMSTAT_COLUMNS, &path.display().to_string())?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: SummaryStatisticRow = result?;
        rows.push(row);
    }

    debug!("Read {} summary statistic rows from {:?}", rows.len(), path);
    Ok(rows)
}
