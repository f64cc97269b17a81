use crate::core::container::MISSING_I32;
use crate::core::error::SeqError;
use color_eyre::Result;
use indexmap::IndexSet;
use log::warn;
use ndarray::{Array2, ArrayView2};

/// Union of comma-joined allele lists, each allele kept where it is first
/// seen
pub fn merge_alleles<S: AsRef<str>>(lists: &[S]) -> IndexSet<String> {
    let mut merged = IndexSet::new();
    for list in lists {
        for allele in list.as_ref().split(',') {
            if !merged.contains(allele) {
                merged.insert(allele.to_string());
            }
        }
    }
    merged
}

/// Merged index of each local allele
pub fn allele_map(local: &str, merged: &IndexSet<String>) -> Result<Vec<i32>> {
    local
        .split(',')
        .map(|allele| {
            merged
                .get_index_of(allele)
                .map(|i| i as i32)
                .ok_or_else(|| {
                    SeqError::integrity(format!(
                        "Allele '{}' is missing from the merged list {:?}",
                        allele, merged
                    ))
                    .into()
                })
        })
        .collect()
}

/// Rewrite local allele indices through `map`.
///
/// Missing calls stay missing. A value outside the local allele range is
/// left as it is, with a warning naming the 1-based `file`.
pub fn remap_calls(calls: ArrayView2<i32>, map: &[i32], file: usize, variant: usize) -> Array2<i32> {
    let mut stray = 0usize;
    let out = calls.mapv(|call| {
        if call < 0 {
            MISSING_I32
        } else if let Some(&to) = map.get(call as usize) {
            to
        } else {
            stray += 1;
            call
        }
    });
    if stray > 0 {
        warn!(
            "Genotype in file {} out of range at merged variant {} ({} calls kept as stored)",
            file, variant, stray
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_allele_union() {
        let merged = merge_alleles(&["A,G", "A,T"]);
        assert_eq!(merged.iter().collect::<Vec<_>>(), vec!["A", "G", "T"]);
        assert_eq!(allele_map("A,G", &merged).unwrap(), vec![0, 1]);
        assert_eq!(allele_map("A,T", &merged).unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_unknown_allele_is_integrity_error() {
        let merged = merge_alleles(&["A,G"]);
        let err = allele_map("A,C", &merged).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeqError>(),
            Some(SeqError::Integrity(_))
        ));
    }

    #[test]
    fn test_remap_keeps_missing_and_stray_values() {
        let calls = arr2(&[[0, 1], [MISSING_I32, 1], [3, 0]]);
        let out = remap_calls(calls.view(), &[0, 2], 2, 1);
        assert_eq!(out, arr2(&[[0, 2], [MISSING_I32, 2], [3, 0]]));
    }
}
