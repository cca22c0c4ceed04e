// ==============================================================================
// models.rs - Summary Statistic and Conditional Analysis Data Models
// ==============================================================================
// Description: Row types for per-locus summary statistics and COJO results
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column names every summary statistics table must provide
pub const REQUIRED_SUMSTAT_COLUMNS: [&str; 11] = [
    "variant_id",
    "chrom",
    "pos",
    "alt_al",
    "ref_al",
    "eaf",
    "beta",
    "se",
    "pval",
    "n_samples",
    "study_id",
];

/// One variant's association statistics within a locus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatisticRow {
    /// Internal variant id (e.g., "1_55505647_G_T")
    pub variant_id: String,

    /// Chromosome ("1"-"22", "X")
    pub chrom: String,

    /// Base pair position
    pub pos: u64,

    /// Effect (alternate) allele
    pub alt_al: String,

    /// Other (reference) allele
    pub ref_al: String,

    /// Effect allele frequency
    pub eaf: f64,

    /// Effect size
    pub beta: f64,

    /// Standard error of beta
    pub se: f64,

    /// Association p-value
    pub pval: f64,

    /// Sample size
    pub n_samples: f64,

    pub study_id: String,

    #[serde(default)]
    pub phenotype_id: Option<String>,

    /// Tissue / cell type for molecular QTL studies
    #[serde(default)]
    pub bio_feature: Option<String>,

    #[serde(default)]
    pub cell_id: Option<String>,

    #[serde(default)]
    pub group_id: Option<String>,

    #[serde(default)]
    pub trait_id: Option<String>,
}

/// Grouping key: all rows sharing a Locus form one analysis unit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locus {
    pub study_id: String,
    pub phenotype_id: Option<String>,
    pub bio_feature: Option<String>,
    pub chrom: String,
    pub cell_id: Option<String>,
    pub group_id: Option<String>,
    pub trait_id: Option<String>,
}

impl Locus {
    pub fn of(row: &SummaryStatisticRow) -> Self {
        Self {
            study_id: row.study_id.clone(),
            phenotype_id: row.phenotype_id.clone(),
            bio_feature: row.bio_feature.clone(),
            chrom: row.chrom.clone(),
            cell_id: row.cell_id.clone(),
            group_id: row.group_id.clone(),
            trait_id: row.trait_id.clone(),
        }
    }
}

impl std::fmt::Display for Locus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{}/{}/{}/chr{}",
            self.study_id,
            opt(&self.phenotype_id),
            opt(&self.bio_feature),
            self.chrom
        )
    }
}

/// Per-variant conditional estimates reported by GCTA-COJO (`.cma.cojo`)
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalResult {
    /// Internal variant id (already translated from the tool's convention)
    pub variant_id: String,
    pub beta_cond: Option<f64>,
    pub se_cond: Option<f64>,
    pub pval_cond: Option<f64>,
}

/// Summary statistic row with conditionally adjusted estimates joined on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalRow {
    #[serde(flatten)]
    pub sumstats: SummaryStatisticRow,
    pub beta_cond: Option<f64>,
    pub se_cond: Option<f64>,
    pub pval_cond: Option<f64>,
}

/// Group a statistics table into loci, preserving row order within each locus
pub fn group_by_locus(rows: Vec<SummaryStatisticRow>) -> BTreeMap<Locus, Vec<SummaryStatisticRow>> {
    let mut loci: BTreeMap<Locus, Vec<SummaryStatisticRow>> = BTreeMap::new();
    for row in rows {
        loci.entry(Locus::of(&row)).or_default().push(row);
    }
    loci
}

#[cfg(test)]
pub(crate) fn test_row(variant_id: &str, chrom: &str, pos: u64, pval: f64) -> SummaryStatisticRow {
    SummaryStatisticRow {
        variant_id: variant_id.to_string(),
        chrom: chrom.to_string(),
        pos,
        alt_al: "G".to_string(),
        ref_al: "A".to_string(),
        eaf: 0.25,
        beta: 0.12,
        se: 0.02,
        pval,
        n_samples: 10000.0,
        study_id: "GCST004131".to_string(),
        phenotype_id: None,
        bio_feature: None,
        cell_id: None,
        group_id: None,
        trait_id: None,
    }
}
