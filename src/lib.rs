// ==============================================================================
// lib.rs - Fine-mapping Results Library
// ==============================================================================
// Description: Result aggregation and GCTA-COJO conditional analysis for
//              per-locus fine-mapping outputs
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================

pub mod aggregator;
pub mod conditional;
pub mod config;
pub mod error;
pub mod executor;
pub mod locus_key;
pub mod models;
pub mod sumstats;
pub mod table;
pub mod variant_id;

pub use error::{FinemapError, Result};
