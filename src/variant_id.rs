// ==============================================================================
// variant_id.rs - Variant Identifier Separator Translation
// ==============================================================================
// Description: Converts between internal and GCTA variant id conventions
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Conventions:
//   Internal (summary statistics):  1_55505647_G_T
//   External (PLINK / GCTA-COJO):   1:55505647:G:T
// ==============================================================================

/// Separator used by internal variant ids
pub const INTERNAL_SEPARATOR: char = '_';

/// Separator used by the reference panel and GCTA-COJO
pub const EXTERNAL_SEPARATOR: char = ':';

/// Convert an internal variant id to the external tool's convention
///
/// # Examples
/// ```
/// use finemap_results::variant_id::to_external;
///
/// assert_eq!(to_external("1_55505647_G_T"), "1:55505647:G:T");
/// ```
pub fn to_external(variant_id: &str) -> String {
    variant_id.replace(INTERNAL_SEPARATOR, &EXTERNAL_SEPARATOR.to_string())
}

/// Convert an external (GCTA) variant id back to the internal convention
///
/// Round-trips with [`to_external`] for every id without a `:`.
pub fn to_internal(snp: &str) -> String {
    snp.replace(EXTERNAL_SEPARATOR, &INTERNAL_SEPARATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_external() {
        assert_eq!(to_external("1_1000_A_G"), "1:1000:A:G");
        assert_eq!(to_external("rs12345"), "rs12345");
    }

    #[test]
    fn test_to_internal() {
        assert_eq!(to_internal("22:17000000:AT:A"), "22_17000000_AT_A");
    }

    #[test]
    fn test_round_trip_identity() {
        let ids = [
            "1_1000_A_G",
            "X_2781479_C_CTT",
            "rs987654",
            "",
            "__",
            "6_31000000_<DEL>_A",
        ];

        for id in ids {
            assert_eq!(to_internal(&to_external(id)), id, "round trip failed for {id}");
        }
    }

    #[test]
    fn test_external_separator_is_not_preserved() {
        // Ids already carrying ':' collapse onto '_' after the round trip
        assert_eq!(to_internal(&to_external("1:1000")), "1_1000");
    }
}
