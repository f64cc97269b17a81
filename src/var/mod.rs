//! Symbolic variable names mapped onto nodes and decoders.
//!
//! Bindings are built on first use and cached on the file handle; decoding
//! always honours the handle's current selection scope.

pub mod decode;
pub mod derived;
pub mod resolve;

use crate::core::container::NodeData;
use crate::core::file::SeqFile;
use color_eyre::Result;
use indexmap::IndexMap;
use std::sync::Arc;

pub use resolve::{VarBinding, VarKind};

/// Decoded values of one variable
#[derive(Debug, Clone, PartialEq)]
pub enum VarData {
    /// One record per selected variant (or sample), or a fixed-shape block
    Array(NodeData),
    /// Variable number of records per selected variant
    Ragged { lengths: Vec<i32>, data: NodeData },
}

impl VarData {
    pub fn data(&self) -> &NodeData {
        match self {
            VarData::Array(d) => d,
            VarData::Ragged { data, .. } => data,
        }
    }

    pub fn lengths(&self) -> Option<&[i32]> {
        match self {
            VarData::Array(_) => None,
            VarData::Ragged { lengths, .. } => Some(lengths),
        }
    }

    pub fn into_data(self) -> NodeData {
        match self {
            VarData::Array(d) => d,
            VarData::Ragged { data, .. } => data,
        }
    }

    /// One text line per record, or per variant for ragged values.
    ///
    /// Elements within a record are tab separated; the records of one
    /// ragged variant are joined with commas.
    pub fn to_lines(&self) -> Vec<String> {
        let records = record_text(self.data());
        match self {
            VarData::Array(_) => records,
            VarData::Ragged { lengths, .. } => {
                let mut iter = records.into_iter();
                lengths
                    .iter()
                    .map(|&n| {
                        iter.by_ref()
                            .take(n as usize)
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .collect()
            }
        }
    }
}

fn record_text(data: &NodeData) -> Vec<String> {
    let text = data.to_text();
    let per_record = data.shape()[1..].iter().product::<usize>();
    if per_record == 0 {
        return vec![String::new(); data.len()];
    }
    text.chunks(per_record).map(|c| c.join("\t")).collect()
}

/// Decoding switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Byte output for genotypes and dosages (missing = 0xFF)
    pub use_raw: bool,
    /// Read an INFO field with at most one value per variant as one slot per
    /// variant, filling absent values with the missing marker
    pub pad_na: bool,
}

/// Several variables decoded against the same selection
pub type VarBundle = IndexMap<String, VarData>;

impl SeqFile {
    /// Binding for `name`, building and caching it on first use
    pub fn resolve_var(&mut self, name: &str) -> Result<Arc<VarBinding>> {
        if let Some(binding) = self.cache.get(name) {
            return Ok(binding.clone());
        }
        let binding = Arc::new(resolve::resolve(self, name)?);
        self.cache.insert(name.to_string(), binding.clone());
        Ok(binding)
    }

    pub fn read_var(&mut self, name: &str, opts: &ReadOptions) -> Result<VarData> {
        let binding = self.resolve_var(name)?;
        binding.check_options(opts)?;
        decode::decode(self, &binding, opts)
    }

    /// Resolve every name first, then decode them in order
    pub fn read_vars<S: AsRef<str>>(&mut self, names: &[S], opts: &ReadOptions) -> Result<VarBundle> {
        let mut bindings = Vec::with_capacity(names.len());
        for name in names {
            let binding = self.resolve_var(name.as_ref())?;
            binding.check_options(opts)?;
            bindings.push(binding);
        }
        let mut bundle = VarBundle::with_capacity(names.len());
        for binding in bindings {
            let data = decode::decode(self, &binding, opts)?;
            bundle.insert(binding.name.clone(), data);
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::{MISSING_I32, MISSING_U8};
    use crate::core::error::SeqError;
    use crate::core::writer::tests::small_file;
    use bitvec::prelude::*;

    const M: i32 = MISSING_I32;

    fn read(file: &mut SeqFile, name: &str) -> VarData {
        file.read_var(name, &ReadOptions::default()).unwrap()
    }

    #[test]
    fn test_genotype_full() {
        let mut file = small_file();
        let geno = read(&mut file, "genotype");
        let data = geno.data();
        assert_eq!(data.shape(), &[4, 3, 2]);
        assert_eq!(
            data.to_vec::<i32>().unwrap(),
            vec![0, 1, 1, 1, 0, 0, 2, 0, M, 1, 0, 0, 0, 0, 0, 1, 1, 1, 1, 0, 0, 0, M, M]
        );
    }

    #[test]
    fn test_genotype_raw_and_selection() {
        let mut file = small_file();
        file.set_variant_mask(bitvec![0, 1, 0, 1]).unwrap();
        file.set_sample_mask(bitvec![0, 1, 1]).unwrap();
        let opts = ReadOptions {
            use_raw: true,
            ..Default::default()
        };
        let geno = file.read_var("genotype", &opts).unwrap();
        assert_eq!(geno.data().shape(), &[2, 2, 2]);
        assert_eq!(
            geno.data().to_vec::<u8>().unwrap(),
            vec![MISSING_U8, 1, 0, 0, 0, 0, MISSING_U8, MISSING_U8]
        );
    }

    #[test]
    fn test_empty_selection_gives_empty_results() {
        let mut file = small_file();
        file.set_variant_mask(bitvec![0; 4]).unwrap();
        assert_eq!(read(&mut file, "genotype").data().shape(), &[0, 3, 2]);
        assert!(read(&mut file, "position").data().is_empty());
        assert!(read(&mut file, "$chrom_pos").data().is_empty());
        let ac = read(&mut file, "annotation/info/AC");
        assert_eq!(ac.lengths(), Some(&[][..]));
    }

    #[test]
    fn test_dosage() {
        let mut file = small_file();
        file.set_variant_range(0..2).unwrap();
        let reference = read(&mut file, "$dosage");
        assert_eq!(reference.data().shape(), &[2, 3]);
        assert_eq!(reference.data().to_vec::<i32>().unwrap(), vec![1, 0, 2, 1, M, 2]);
        let alt = read(&mut file, "$dosage_alt");
        assert_eq!(alt.data().to_vec::<i32>().unwrap(), vec![1, 2, 0, 1, M, 0]);
    }

    #[test]
    fn test_allele_views() {
        let mut file = small_file();
        assert_eq!(
            read(&mut file, "$num_allele").data().to_vec::<i32>().unwrap(),
            vec![2, 3, 2, 2]
        );
        assert_eq!(
            read(&mut file, "$ref").data().to_text(),
            vec!["A", "C", "G", "T"]
        );
        assert_eq!(
            read(&mut file, "$alt").data().to_text(),
            vec!["G", "T,G", "A", "C"]
        );
        assert_eq!(
            read(&mut file, "$chrom_pos").data().to_text(),
            vec!["chr1:100", "chr1:200", "chr2:100", "chr2:100_1"]
        );
        assert_eq!(
            read(&mut file, "$chrom_pos_allele").data().to_text()[1],
            "chr1:200_C_T_G"
        );
    }

    #[test]
    fn test_chrom_pos_dedup_follows_selection() {
        let mut file = small_file();
        file.set_variant_mask(bitvec![0, 0, 0, 1]).unwrap();
        assert_eq!(read(&mut file, "$chrom_pos").data().to_text(), vec!["chr2:100"]);
    }

    #[test]
    fn test_chromosome_and_indices() {
        let mut file = small_file();
        file.set_variant_mask(bitvec![0, 1, 1, 0]).unwrap();
        file.set_sample_mask(bitvec![1, 0, 1]).unwrap();
        assert_eq!(read(&mut file, "chromosome").data().to_text(), vec!["chr1", "chr2"]);
        assert_eq!(
            read(&mut file, "$variant_index").data().to_vec::<i32>().unwrap(),
            vec![2, 3]
        );
        assert_eq!(
            read(&mut file, "$sample_index").data().to_vec::<i32>().unwrap(),
            vec![1, 3]
        );
        assert_eq!(read(&mut file, "sample.id").data().to_text(), vec!["s1", "s3"]);
    }

    #[test]
    fn test_ragged_info() {
        let mut file = small_file();
        file.set_variant_mask(bitvec![0, 1, 1, 1]).unwrap();
        let ac = read(&mut file, "annotation/info/AC");
        assert_eq!(ac.lengths(), Some(&[2, 0, 1][..]));
        assert_eq!(ac.data().to_vec::<i32>().unwrap(), vec![1, 1, 3]);
        assert_eq!(ac.to_lines(), vec!["1,1", "", "3"]);

        let raw_index = read(&mut file, "annotation/info/@AC");
        assert_eq!(raw_index.data().to_vec::<i32>().unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_fixed_info_and_pad_na() {
        let mut file = small_file();
        let pad = ReadOptions {
            pad_na: true,
            ..Default::default()
        };
        let dp = file.read_var("annotation/info/DP", &pad).unwrap();
        assert_eq!(dp, VarData::Array(NodeData::from_vec(vec![10, 20, 30, 40])));
        let err = file.read_var("annotation/info/AC", &pad).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeqError>(),
            Some(SeqError::Validation(_))
        ));
    }

    #[test]
    fn test_format_sliced_by_samples() {
        let mut file = small_file();
        file.set_variant_mask(bitvec![1, 0, 0, 1]).unwrap();
        file.set_sample_mask(bitvec![1, 0, 1]).unwrap();
        let gq = read(&mut file, "annotation/format/GQ");
        assert_eq!(gq.lengths(), Some(&[1, 1][..]));
        assert_eq!(gq.data().shape(), &[2, 2]);
        assert_eq!(gq.data().to_vec::<i32>().unwrap(), vec![0, 2, 9, 11]);
        assert_eq!(gq.to_lines(), vec!["0\t2", "9\t11"]);
    }

    #[test]
    fn test_phase() {
        let mut file = small_file();
        file.set_variant_range(0..3).unwrap();
        let phase = read(&mut file, "phase");
        assert_eq!(phase.data().shape(), &[3, 3]);
        assert_eq!(
            phase.data().to_vec::<u8>().unwrap(),
            vec![1, 0, 1, 0, 0, 0, 1, 0, 1]
        );
    }

    #[test]
    fn test_external_vector_sliced() {
        let mut file = small_file();
        file.set_external("score", NodeData::from_vec(vec![0.5f64, 1.5, 2.5, 3.5]));
        file.set_variant_mask(bitvec![1, 0, 0, 1]).unwrap();
        assert_eq!(
            read(&mut file, "$:score").data().to_vec::<f64>().unwrap(),
            vec![0.5, 3.5]
        );
    }

    #[test]
    fn test_bundle_validates_before_decoding() {
        let mut file = small_file();
        let err = file
            .read_vars(&["genotype", "no/such"], &ReadOptions::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeqError>(),
            Some(SeqError::Validation(_))
        ));
        let bundle = file
            .read_vars(&["position", "allele"], &ReadOptions::default())
            .unwrap();
        assert_eq!(bundle.keys().collect::<Vec<_>>(), vec!["position", "allele"]);
    }

    #[test]
    fn test_cache_reused_until_cleared() {
        let mut file = small_file();
        let a = file.resolve_var("genotype").unwrap();
        let b = file.resolve_var("genotype").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        file.clear_var_cache();
        let c = file.resolve_var("genotype").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
