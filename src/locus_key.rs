// ==============================================================================
// locus_key.rs - Per-Locus Scratch File Keys
// ==============================================================================
// Description: Deterministic, collision-free filename prefixes for loci
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Key layout:
//   <study_id>_<cell_id>_<group_id>_<trait_id>_<chrom>[_<discriminator>]
//
// Field encoding:
//   - Bytes in [A-Za-z0-9.-] are kept as-is
//   - Every other byte (including the '_' delimiter) becomes %XX (uppercase hex)
//   - A missing value becomes "%NA", which the encoding never produces
//
// Concurrent loci write scratch files under these prefixes. Two tuples that
// differ in any field must never share a key: do not drop or reorder fields.
// ==============================================================================

use std::fmt;

use crate::models::SummaryStatisticRow;

/// Delimiter between encoded key fields
pub const KEY_DELIMITER: char = '_';

/// Placeholder written for a missing field value
pub const MISSING_PLACEHOLDER: &str = "%NA";

/// Filesystem-safe identifier for one locus (optionally one index variant)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocusKey(String);

impl LocusKey {
    /// Build a key from the (study_id, cell_id, group_id, trait_id, chrom) tuple
    pub fn new(
        study_id: Option<&str>,
        cell_id: Option<&str>,
        group_id: Option<&str>,
        trait_id: Option<&str>,
        chrom: Option<&str>,
    ) -> Self {
        let fields = [study_id, cell_id, group_id, trait_id, chrom];
        let encoded: Vec<String> = fields.iter().map(|f| encode_field(*f)).collect();
        Self(encoded.join(&KEY_DELIMITER.to_string()))
    }

    /// Key for the locus a summary statistic row belongs to
    pub fn from_row(row: &SummaryStatisticRow) -> Self {
        Self::new(
            Some(&row.study_id),
            row.cell_id.as_deref(),
            row.group_id.as_deref(),
            row.trait_id.as_deref(),
            Some(&row.chrom),
        )
    }

    /// Extend the key with a discriminator (e.g. the index variant of an
    /// adjustment run) as an additional encoded field
    pub fn with_discriminator(&self, discriminator: &str) -> Self {
        Self(format!(
            "{}{}{}",
            self.0,
            KEY_DELIMITER,
            encode_field(Some(discriminator))
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn encode_field(value: Option<&str>) -> String {
    let Some(value) = value else {
        return MISSING_PLACEHOLDER.to_string();
    };

    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_row;

    #[test]
    fn test_plain_fields_are_readable() {
        let key = LocusKey::new(Some("GCST004131"), Some("c1"), Some("g1"), Some("t1"), Some("22"));
        assert_eq!(key.as_str(), "GCST004131_c1_g1_t1_22");
    }

    #[test]
    fn test_missing_fields_use_placeholder() {
        let key = LocusKey::from_row(&test_row("1_100_A_G", "1", 100, 0.1));
        assert_eq!(key.as_str(), "GCST004131_%NA_%NA_%NA_1");
    }

    #[test]
    fn test_identical_tuples_identical_keys() {
        let a = LocusKey::from_row(&test_row("1_100_A_G", "1", 100, 0.1));
        let b = LocusKey::from_row(&test_row("1_999_C_T", "1", 999, 0.5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_field_difference_changes_key() {
        let base = [Some("s"), Some("c"), Some("g"), Some("t"), Some("1")];
        let key = |f: [Option<&str>; 5]| LocusKey::new(f[0], f[1], f[2], f[3], f[4]);
        let reference = key(base);

        for idx in 0..5 {
            let mut changed = base;
            changed[idx] = Some("other");
            assert_ne!(key(changed), reference, "field {idx} ignored");

            let mut missing = base;
            missing[idx] = None;
            assert_ne!(key(missing), reference, "missing field {idx} collides");
        }
    }

    #[test]
    fn test_delimiter_inside_field_does_not_collide() {
        // Naive '_' joining maps both tuples to "a_b_c_d_e_f"
        let a = LocusKey::new(Some("a_b"), Some("c"), Some("d"), Some("e"), Some("f"));
        let b = LocusKey::new(Some("a"), Some("b_c"), Some("d"), Some("e"), Some("f"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_literal_placeholder_text_does_not_collide() {
        let missing = LocusKey::new(Some("s"), None, Some("g"), Some("t"), Some("1"));
        let literal = LocusKey::new(Some("s"), Some("%NA"), Some("g"), Some("t"), Some("1"));
        let na = LocusKey::new(Some("s"), Some("NA"), Some("g"), Some("t"), Some("1"));
        assert_ne!(missing, literal);
        assert_ne!(missing, na);
    }

    #[test]
    fn test_key_is_filesystem_safe() {
        let key = LocusKey::new(Some("../etc/passwd"), Some("a b"), None, Some("x\\y"), Some("1"));
        assert!(!key.as_str().contains('/'));
        assert!(!key.as_str().contains('\\'));
        assert!(!key.as_str().contains(' '));
    }

    #[test]
    fn test_discriminator_extends_key() {
        let key = LocusKey::new(Some("s"), Some("c"), Some("g"), Some("t"), Some("1"));
        let a = key.with_discriminator("1_100_A_G");
        let b = key.with_discriminator("1_200_A_G");

        assert!(a.as_str().starts_with(key.as_str()));
        assert_ne!(a, b);
        assert_ne!(a, key);
        assert_eq!(a.as_str(), "s_c_g_t_1_1%5F100%5FA%5FG");
    }
}
