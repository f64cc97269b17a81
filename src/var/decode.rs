use crate::core::container::{Container, NodeData};
use crate::core::file::*;
use crate::core::index::CardinalityIndex;
use crate::core::selection::Selection;
use crate::genotype::{allele_count, dosage, GenoCell, GenotypeRequest};
use crate::var::derived::{alt_allele, chrom_pos_allele_key, chrom_pos_keys, ref_allele};
use crate::var::resolve::{VarBinding, VarKind};
use crate::var::{ReadOptions, VarData};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use ndarray::{Array2, Array3};

/// Decode a bound variable under the file's current selection
pub fn decode(file: &SeqFile, binding: &VarBinding, opts: &ReadOptions) -> Result<VarData> {
    let c = file.container();
    let sel = file.selection();
    let path = || {
        binding
            .path
            .as_deref()
            .ok_or_else(|| eyre!("Variable '{}' has no node", binding.name))
    };

    let data = match &binding.kind {
        VarKind::SampleField => read_samples(c, path()?, sel)?,
        VarKind::VariantField => read_variants(c, path()?, sel)?,
        VarKind::Chromosome => NodeData::from_vec(file.chrom_index().decode_masked(sel.variant())),
        VarKind::Genotype { planes } => {
            if opts.use_raw {
                NodeData::from(genotypes::<u8>(file, planes)?.into_dyn())
            } else {
                NodeData::from(genotypes::<i32>(file, planes)?.into_dyn())
            }
        }
        VarKind::Dosage { planes, alternate } => {
            if opts.use_raw {
                NodeData::from(dosage(&genotypes::<u8>(file, planes)?, !alternate).into_dyn())
            } else {
                NodeData::from(dosage(&genotypes::<i32>(file, planes)?, !alternate).into_dyn())
            }
        }
        VarKind::Phase => c.read_masked(
            path()?,
            sel.var_start(),
            sel.variant_window(),
            Some(sel.sample()),
        )?,
        VarKind::ImplicitPhase => NodeData::from(
            Array2::<u8>::ones((sel.selected_variant_count(), sel.selected_sample_count()))
                .into_dyn(),
        ),
        VarKind::NumAllele => {
            let counts = alleles(c, sel)?
                .iter()
                .map(|a| allele_count(a) as i32)
                .collect();
            NodeData::from_vec::<i32>(counts)
        }
        VarKind::RefAllele => {
            let refs = alleles(c, sel)?
                .iter()
                .map(|a| ref_allele(a).to_string())
                .collect();
            NodeData::from_vec::<String>(refs)
        }
        VarKind::AltAllele => {
            let alts = alleles(c, sel)?
                .iter()
                .map(|a| alt_allele(a).to_string())
                .collect();
            NodeData::from_vec::<String>(alts)
        }
        VarKind::ChromPos => {
            let chroms = file.chrom_index().decode_masked(sel.variant());
            let positions = positions(c, sel)?;
            NodeData::from_vec(chrom_pos_keys(&chroms, &positions))
        }
        VarKind::ChromPosAllele => {
            let chroms = file.chrom_index().decode_masked(sel.variant());
            let positions = positions(c, sel)?;
            let keys = chroms
                .iter()
                .zip(&positions)
                .zip(alleles(c, sel)?)
                .map(|((chrom, &pos), allele)| chrom_pos_allele_key(chrom, pos, &allele))
                .collect();
            NodeData::from_vec::<String>(keys)
        }
        VarKind::SampleIndex => {
            NodeData::from_vec(sel.selected_samples().map(|i| i as i32 + 1).collect::<Vec<_>>())
        }
        VarKind::VariantIndex => {
            NodeData::from_vec(sel.selected_variants().map(|i| i as i32 + 1).collect::<Vec<_>>())
        }
        VarKind::Info { index } => return info(c, path()?, index, sel, binding, opts),
        VarKind::Format { index } => return format(c, path()?, index, sel, binding),
        VarKind::External { key } => {
            let values = file
                .externals
                .get(key)
                .ok_or_else(|| eyre!("External vector '{}' was removed", key))?;
            let rows: Vec<usize> = sel.selected_variants().collect();
            values.select_axis(0, &rows)
        }
    };
    Ok(VarData::Array(data))
}

fn read_variants(c: &dyn Container, path: &str, sel: &Selection) -> Result<NodeData> {
    c.read_masked(path, sel.var_start(), sel.variant_window(), None)
}

fn read_samples(c: &dyn Container, path: &str, sel: &Selection) -> Result<NodeData> {
    c.read_masked(path, 0, sel.sample(), None)
}

fn alleles(c: &dyn Container, sel: &Selection) -> Result<Vec<String>> {
    read_variants(c, ALLELE, sel)?
        .into_array::<String>()
        .map(|a| a.into_iter().collect())
        .ok_or_else(|| eyre!("'{}' must hold strings", ALLELE))
}

fn positions(c: &dyn Container, sel: &Selection) -> Result<Vec<i32>> {
    read_variants(c, POSITION, sel)?
        .to_vec::<i32>()
        .ok_or_else(|| eyre!("'{}' must hold int32 values", POSITION))
}

fn genotypes<T: GenoCell>(file: &SeqFile, planes: &CardinalityIndex) -> Result<Array3<T>> {
    let sel = file.selection();
    let num_alleles: Vec<usize> = alleles(file.container(), sel)?
        .iter()
        .map(|a| allele_count(a))
        .collect();
    GenotypeRequest {
        path: GENOTYPE_DATA,
        planes,
        num_alleles: &num_alleles,
        variants: sel.variant(),
        samples: sel.sample(),
        ploidy: file.ploidy(),
    }
    .decode(file.container())
}

fn info(
    c: &dyn Container,
    path: &str,
    index: &CardinalityIndex,
    sel: &Selection,
    binding: &VarBinding,
    opts: &ReadOptions,
) -> Result<VarData> {
    if !index.has_index() || (opts.pad_na && index.is_fixed_one()) {
        return Ok(VarData::Array(read_variants(c, path, sel)?));
    }
    let flat = index.length_and_selection(sel.variant())?;
    let data = if flat.count == 0 {
        NodeData::empty(element_kind(binding)?, &binding.dims[1..])
    } else {
        c.read_masked(path, flat.start, &flat.mask, None)?
    };
    if opts.pad_na {
        // at most one value per variant, checked at resolution
        let present: Vec<bool> = flat.counts.iter().map(|&n| n > 0).collect();
        return Ok(VarData::Array(data.pad_missing(&present)?));
    }
    Ok(VarData::Ragged {
        lengths: flat.counts,
        data,
    })
}

fn format(
    c: &dyn Container,
    path: &str,
    index: &CardinalityIndex,
    sel: &Selection,
    binding: &VarBinding,
) -> Result<VarData> {
    if !index.has_index() {
        let data = c.read_masked(path, sel.var_start(), sel.variant_window(), Some(sel.sample()))?;
        return Ok(VarData::Array(data));
    }
    let flat = index.length_and_selection(sel.variant())?;
    let data = if flat.count == 0 {
        NodeData::empty(element_kind(binding)?, &[sel.selected_sample_count()])
    } else {
        c.read_masked(path, flat.start, &flat.mask, Some(sel.sample()))?
    };
    Ok(VarData::Ragged {
        lengths: flat.counts,
        data,
    })
}

fn element_kind(binding: &VarBinding) -> Result<crate::core::container::ElementKind> {
    binding
        .elem
        .ok_or_else(|| eyre!("Variable '{}' has no element type", binding.name))
}
