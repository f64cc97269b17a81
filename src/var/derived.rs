//! Per-variant strings computed from `chromosome`, `position` and `allele`.

/// First allele of a record
pub fn ref_allele(record: &str) -> &str {
    record.split(',').next().unwrap_or("")
}

/// Everything after the first allele, still comma-joined
pub fn alt_allele(record: &str) -> &str {
    record.split_once(',').map(|(_, alt)| alt).unwrap_or("")
}

/// `chr:pos` keys; a key equal to the previous one gets `_1`, `_2`, ...
/// appended until the next distinct key.
pub fn chrom_pos_keys(chroms: &[String], positions: &[i32]) -> Vec<String> {
    let mut out = Vec::with_capacity(chroms.len());
    let mut last: Option<String> = None;
    let mut dup = 0;
    for (chrom, pos) in chroms.iter().zip(positions) {
        let key = format!("{}:{}", chrom, pos);
        if last.as_deref() == Some(key.as_str()) {
            dup += 1;
            out.push(format!("{}_{}", key, dup));
        } else {
            dup = 0;
            out.push(key.clone());
            last = Some(key);
        }
    }
    out
}

/// `chr:pos_ref_alt...`
pub fn chrom_pos_allele_key(chrom: &str, pos: i32, allele: &str) -> String {
    format!("{}:{}_{}", chrom, pos, allele.replace(',', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_alt() {
        assert_eq!(ref_allele("A,G,T"), "A");
        assert_eq!(alt_allele("A,G,T"), "G,T");
        assert_eq!(ref_allele("A"), "A");
        assert_eq!(alt_allele("A"), "");
        assert_eq!(ref_allele(""), "");
    }

    #[test]
    fn test_chrom_pos_dedup() {
        let chroms: Vec<String> = ["chr1", "chr1", "chr1", "chr1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let keys = chrom_pos_keys(&chroms, &[100, 100, 100, 101]);
        assert_eq!(keys, vec!["chr1:100", "chr1:100_1", "chr1:100_2", "chr1:101"]);
    }

    #[test]
    fn test_dedup_resets_on_distinct_key() {
        let chroms: Vec<String> = ["1", "1", "1", "1", "2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let keys = chrom_pos_keys(&chroms, &[5, 5, 6, 6, 6]);
        assert_eq!(keys, vec!["1:5", "1:5_1", "1:6", "1:6_1", "2:6"]);
    }

    #[test]
    fn test_chrom_pos_allele() {
        assert_eq!(chrom_pos_allele_key("chr1", 100, "A,G,T"), "chr1:100_A_G_T");
    }
}
