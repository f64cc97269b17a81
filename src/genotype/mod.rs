//! Packed genotype storage: variable-width 2-bit planes per variant.

pub mod codec;
pub mod read;

pub use codec::{bit_width, dosage, encode_planes, num_planes, GenoCell};
pub use read::GenotypeRequest;

/// Number of comma-separated alleles in an allele record
pub fn allele_count(record: &str) -> usize {
    if record.is_empty() {
        0
    } else {
        record.split(',').count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allele_count() {
        assert_eq!(allele_count("A,G,T"), 3);
        assert_eq!(allele_count("A"), 1);
        assert_eq!(allele_count(""), 0);
    }
}
