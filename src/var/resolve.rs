use crate::core::container::{ElementKind, NodeInfo};
use crate::core::error::SeqError;
use crate::core::file::*;
use crate::core::index::CardinalityIndex;
use crate::var::ReadOptions;
use color_eyre::Result;
use log::debug;

/// How a variable is decoded
#[derive(Debug, Clone, PartialEq)]
pub enum VarKind {
    /// One-dimensional node indexed by sample (`sample.id`,
    /// `sample.annotation/*`)
    SampleField,
    /// One-dimensional node indexed by variant
    VariantField,
    /// Labels rebuilt from the chromosome run index
    Chromosome,
    Genotype { planes: CardinalityIndex },
    Dosage { planes: CardinalityIndex, alternate: bool },
    Phase,
    /// Haploid file without phase node: every call phased
    ImplicitPhase,
    NumAllele,
    RefAllele,
    AltAllele,
    ChromPos,
    ChromPosAllele,
    SampleIndex,
    VariantIndex,
    /// `annotation/info/<name>`, ragged when the index has counts
    Info { index: CardinalityIndex },
    /// `annotation/format/<name>`; ragged in the variant axis only
    Format { index: CardinalityIndex },
    /// Caller-supplied vector bound under `$:<name>`
    External { key: String },
}

/// A resolved variable: where it lives and how to decode it.
///
/// Shapes are checked against the file's sample and variant counts when
/// the binding is built.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBinding {
    pub name: String,
    /// Physical node, when the variable has one
    pub path: Option<String>,
    pub kind: VarKind,
    pub elem: Option<ElementKind>,
    pub dims: Vec<usize>,
}

impl VarBinding {
    fn new(name: &str, kind: VarKind) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            kind,
            elem: None,
            dims: Vec::new(),
        }
    }

    fn with_node(mut self, info: NodeInfo) -> Self {
        self.path = Some(info.path);
        self.elem = Some(info.kind);
        self.dims = info.dims;
        self
    }

    /// Reject read options that do not apply to this variable
    pub fn check_options(&self, opts: &ReadOptions) -> Result<()> {
        if !opts.pad_na {
            return Ok(());
        }
        if let VarKind::Info { index } = &self.kind {
            if !index.has_index() {
                return Ok(());
            }
            if self.dims.len() != 1 {
                return Err(SeqError::validation(format!(
                    "'{}' is {}-dimensional; padding with missing values needs a one-dimensional field",
                    self.name,
                    self.dims.len()
                ))
                .into());
            }
            if index.max_len() > 1 {
                return Err(SeqError::validation(format!(
                    "'{}' has up to {} values per variant; padding with missing values needs at most one",
                    self.name,
                    index.max_len()
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Build the binding for `name`
pub fn resolve(file: &SeqFile, name: &str) -> Result<VarBinding> {
    let c = file.container();
    let nv = file.num_variants();
    let ns = file.num_samples();

    let node = |path: &str| -> Result<NodeInfo> {
        c.resolve_child(path, false)?.ok_or_else(|| {
            SeqError::validation(format!("No node '{}' for variable '{}'", path, name)).into()
        })
    };
    let variant_1d = |path: &str| -> Result<NodeInfo> {
        let info = node(path)?;
        check_dims(name, &info, &[Some(nv)])?;
        Ok(info)
    };

    let binding = match name {
        SAMPLE_ID => {
            let info = node(SAMPLE_ID)?;
            check_dims(name, &info, &[Some(ns)])?;
            VarBinding::new(name, VarKind::SampleField).with_node(info)
        }
        VARIANT_ID | POSITION | ALLELE | ANNOT_ID | ANNOT_QUAL | ANNOT_FILTER => {
            VarBinding::new(name, VarKind::VariantField).with_node(variant_1d(name)?)
        }
        CHROMOSOME => VarBinding::new(name, VarKind::Chromosome).with_node(variant_1d(name)?),
        "genotype" => {
            let (info, planes) = genotype_node(file)?;
            VarBinding::new(name, VarKind::Genotype { planes }).with_node(info)
        }
        "@genotype" => VarBinding::new(name, VarKind::VariantField).with_node(variant_1d(GENOTYPE_INDEX)?),
        "$dosage" | "$dosage_alt" => {
            let (info, planes) = genotype_node(file)?;
            let alternate = name == "$dosage_alt";
            VarBinding::new(name, VarKind::Dosage { planes, alternate }).with_node(info)
        }
        "phase" => match c.resolve_child(PHASE_DATA, false)? {
            Some(info) => {
                if !(2..=3).contains(&info.ndim()) {
                    return Err(dim_error(name, &info));
                }
                check_dims(name, &info, &[Some(nv), Some(ns), None])?;
                VarBinding::new(name, VarKind::Phase).with_node(info)
            }
            None if file.ploidy() == 1 => VarBinding::new(name, VarKind::ImplicitPhase),
            None => return Err(SeqError::validation(format!("No node '{}'", PHASE_DATA)).into()),
        },
        "$num_allele" => VarBinding::new(name, VarKind::NumAllele).with_node(variant_1d(ALLELE)?),
        "$ref" => VarBinding::new(name, VarKind::RefAllele).with_node(variant_1d(ALLELE)?),
        "$alt" => VarBinding::new(name, VarKind::AltAllele).with_node(variant_1d(ALLELE)?),
        "$chrom_pos" => VarBinding::new(name, VarKind::ChromPos).with_node(variant_1d(POSITION)?),
        "$chrom_pos_allele" => {
            VarBinding::new(name, VarKind::ChromPosAllele).with_node(variant_1d(ALLELE)?)
        }
        "$sample_index" => VarBinding::new(name, VarKind::SampleIndex),
        "$variant_index" => VarBinding::new(name, VarKind::VariantIndex),
        _ if name.starts_with(INFO_PREFIX) => {
            let field = &name[INFO_PREFIX.len()..];
            if field.starts_with('@') {
                VarBinding::new(name, VarKind::VariantField).with_node(variant_1d(name)?)
            } else {
                let info = node(name)?;
                if !(1..=2).contains(&info.ndim()) {
                    return Err(dim_error(name, &info));
                }
                let index = ragged_index(file, name, &format!("{}@{}", INFO_PREFIX, field), &info)?;
                VarBinding::new(name, VarKind::Info { index }).with_node(info)
            }
        }
        _ if name.starts_with(FORMAT_PREFIX) => {
            let field = &name[FORMAT_PREFIX.len()..];
            if field.starts_with('@') {
                VarBinding::new(name, VarKind::VariantField).with_node(variant_1d(name)?)
            } else {
                let info = node(&format!("{}/data", name))?;
                if info.ndim() != 2 {
                    return Err(dim_error(name, &info));
                }
                check_dims(name, &info, &[None, Some(ns)])?;
                let index = ragged_index(file, name, &format!("{}@{}", FORMAT_PREFIX, field), &info)?;
                VarBinding::new(name, VarKind::Format { index }).with_node(info)
            }
        }
        _ if name.starts_with(SAMPLE_ANNOT_PREFIX) => {
            let info = node(name)?;
            if !(1..=2).contains(&info.ndim()) {
                return Err(dim_error(name, &info));
            }
            check_dims(name, &info, &[Some(ns), None])?;
            VarBinding::new(name, VarKind::SampleField).with_node(info)
        }
        _ if name.starts_with("$:") => {
            let key = &name[2..];
            let data = file.externals.get(key).ok_or_else(|| {
                SeqError::validation(format!("No external vector named '{}'", key))
            })?;
            if data.shape().len() != 1 || data.len() != nv {
                return Err(SeqError::validation(format!(
                    "External vector '{}' has shape {:?}; it must hold one value per variant ({})",
                    key,
                    data.shape(),
                    nv
                ))
                .into());
            }
            let mut binding = VarBinding::new(name, VarKind::External { key: key.to_string() });
            binding.elem = Some(data.kind());
            binding.dims = data.shape().to_vec();
            binding
        }
        _ => {
            return Err(SeqError::validation(format!(
                "'{}' is not a known variable. Known names: sample.id, variant.id, position, \
                 chromosome, allele, genotype, phase, annotation/id, annotation/qual, \
                 annotation/filter, annotation/info/<name>, annotation/format/<name>, \
                 sample.annotation/<name>, $dosage, $dosage_alt, $num_allele, $ref, $alt, \
                 $chrom_pos, $chrom_pos_allele, $sample_index, $variant_index, $:<name>",
                name
            ))
            .into())
        }
    };
    debug!("Resolved '{}' to {:?}", name, binding.path);
    Ok(binding)
}

fn genotype_node(file: &SeqFile) -> Result<(NodeInfo, CardinalityIndex)> {
    let c = file.container();
    let info = c
        .resolve_child(GENOTYPE_DATA, false)?
        .ok_or_else(|| SeqError::validation(format!("No node '{}'", GENOTYPE_DATA)))?;
    check_dims("genotype", &info, &[None, Some(file.num_samples()), Some(file.ploidy())])?;
    let planes = read_index(file, GENOTYPE_INDEX)?
        .ok_or_else(|| SeqError::validation(format!("No node '{}'", GENOTYPE_INDEX)))?;
    planes.check_total(info.dims[0], "genotype")?;
    Ok((info, planes))
}

/// Index of a ragged field, or a fixed one-per-variant index when the
/// field has no `@` node
fn ragged_index(file: &SeqFile, name: &str, index_path: &str, info: &NodeInfo) -> Result<CardinalityIndex> {
    match read_index(file, index_path)? {
        Some(index) => {
            index.check_total(info.dims[0], name)?;
            Ok(index)
        }
        None => {
            check_dims(name, info, &[Some(file.num_variants()), None])?;
            Ok(CardinalityIndex::fixed(file.num_variants()))
        }
    }
}

fn read_index(file: &SeqFile, path: &str) -> Result<Option<CardinalityIndex>> {
    let c = file.container();
    let info = match c.resolve_child(path, false)? {
        Some(info) => info,
        None => return Ok(None),
    };
    check_dims(path, &info, &[Some(file.num_variants())])?;
    let counts = c
        .read_range(path, 0, file.num_variants())?
        .to_vec::<i32>()
        .ok_or_else(|| SeqError::validation(format!("Index '{}' must hold int32 counts", path)))?;
    CardinalityIndex::from_counts(&counts).map(Some)
}

/// `expected` gives the required extent of each leading axis (`None` for
/// any); the node may not have more axes than `expected` lists.
fn check_dims(name: &str, info: &NodeInfo, expected: &[Option<usize>]) -> Result<()> {
    if info.ndim() == 0 || info.ndim() > expected.len() {
        return Err(dim_error(name, info));
    }
    for (axis, (&have, want)) in info.dims.iter().zip(expected).enumerate() {
        if let Some(want) = *want {
            if have != want {
                return Err(SeqError::validation(format!(
                    "'{}' has extent {} on axis {}, expected {}",
                    name, have, axis, want
                ))
                .into());
            }
        }
    }
    Ok(())
}

fn dim_error(name: &str, info: &NodeInfo) -> color_eyre::Report {
    SeqError::validation(format!(
        "'{}' has an unsupported shape {:?}",
        name, info.dims
    ))
    .into()
}
