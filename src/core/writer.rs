use crate::core::container::{Container, ElementKind, MemoryContainer, NodeData};
use crate::core::error::SeqError;
use crate::core::file::*;
use crate::genotype::codec::{encode_planes, encode_planes_unchecked};
use crate::genotype::allele_count;
use color_eyre::Result;
use indexmap::{IndexMap, IndexSet};
use log::debug;
use ndarray::{Array3, ArrayView2, Axis};

/// Site-level fields of one variant
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub chromosome: String,
    pub position: i32,
    /// Comma-joined, reference first
    pub allele: String,
    pub id: String,
    /// NaN when absent
    pub qual: f64,
    pub filter: String,
}

impl VariantRecord {
    pub fn new(chromosome: impl Into<String>, position: i32, allele: impl Into<String>) -> Self {
        Self {
            chromosome: chromosome.into(),
            position,
            allele: allele.into(),
            id: String::new(),
            qual: f64::NAN,
            filter: String::new(),
        }
    }
}

/// Shape of a per-variant annotation field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Exactly one value per variant, no index node
    Fixed,
    /// Any number of values per variant, with an `@` index node
    Ragged,
}

/// Create the node set every file carries
pub fn create_standard_nodes(
    container: &mut dyn Container,
    num_samples: usize,
    ploidy: usize,
) -> Result<()> {
    if ploidy == 0 {
        return Err(SeqError::validation("Ploidy must be at least 1").into());
    }
    container.create_node(SAMPLE_ID, ElementKind::String, &[])?;
    container.create_node(VARIANT_ID, ElementKind::Int32, &[])?;
    container.create_node(POSITION, ElementKind::Int32, &[])?;
    container.create_node(CHROMOSOME, ElementKind::String, &[])?;
    container.create_node(ALLELE, ElementKind::String, &[])?;
    container.create_node(GENOTYPE_DATA, ElementKind::UInt8, &[num_samples, ploidy])?;
    container.create_node(GENOTYPE_INDEX, ElementKind::Int32, &[])?;
    if ploidy > 1 {
        container.create_node(PHASE_DATA, ElementKind::UInt8, &phase_inner(num_samples, ploidy))?;
    }
    container.create_node(ANNOT_ID, ElementKind::String, &[])?;
    container.create_node(ANNOT_QUAL, ElementKind::Float64, &[])?;
    container.create_node(ANNOT_FILTER, ElementKind::String, &[])?;
    Ok(())
}

/// Trailing dimensions of `phase/data`
pub fn phase_inner(num_samples: usize, ploidy: usize) -> Vec<usize> {
    if ploidy > 2 {
        vec![num_samples, ploidy - 1]
    } else {
        vec![num_samples]
    }
}

/// Append one variant's packed planes, (plane, sample, ploidy), and its
/// plane count
pub fn append_packed(container: &mut dyn Container, planes: Array3<u8>) -> Result<()> {
    let count = planes.len_of(Axis(0)) as i32;
    container.append_range(GENOTYPE_DATA, &NodeData::from(planes.into_dyn()))?;
    container.append_value(GENOTYPE_INDEX, &NodeData::from_vec(vec![count]))
}

/// Builds a file variant by variant into a [`MemoryContainer`].
///
/// Streams are appended independently; [`SeqWriter::finish`] checks that
/// every per-variant stream ended up with one record per variant.
#[derive(Debug)]
pub struct SeqWriter {
    container: MemoryContainer,
    num_samples: usize,
    ploidy: usize,
    num_variants: usize,
    // allele counts of written variants, for checking genotypes
    alleles: Vec<usize>,
    num_genotypes: usize,
    num_phase: usize,
    info: IndexMap<String, FieldShape>,
    format: IndexMap<String, FieldShape>,
}

impl SeqWriter {
    pub fn new<S: AsRef<str>>(sample_ids: &[S], ploidy: usize) -> Result<Self> {
        let mut seen = IndexSet::new();
        for id in sample_ids {
            if !seen.insert(id.as_ref()) {
                return Err(
                    SeqError::validation(format!("Duplicate sample id '{}'", id.as_ref())).into(),
                );
            }
        }
        let mut container = MemoryContainer::new();
        create_standard_nodes(&mut container, sample_ids.len(), ploidy)?;
        let ids: Vec<String> = sample_ids.iter().map(|s| s.as_ref().to_string()).collect();
        container.append_range(SAMPLE_ID, &NodeData::from_vec(ids))?;
        Ok(Self {
            container,
            num_samples: sample_ids.len(),
            ploidy,
            num_variants: 0,
            alleles: Vec::new(),
            num_genotypes: 0,
            num_phase: 0,
            info: IndexMap::new(),
            format: IndexMap::new(),
        })
    }

    pub fn num_variants(&self) -> usize {
        self.num_variants
    }

    pub fn container_mut(&mut self) -> &mut MemoryContainer {
        &mut self.container
    }

    /// Append the site fields; `variant.id` is the 1-based ordinal
    pub fn add_variant(&mut self, record: &VariantRecord) -> Result<()> {
        let c = &mut self.container;
        c.append_value(VARIANT_ID, &NodeData::from_vec(vec![self.num_variants as i32 + 1]))?;
        c.append_value(CHROMOSOME, &NodeData::from_vec(vec![record.chromosome.clone()]))?;
        c.append_value(POSITION, &NodeData::from_vec(vec![record.position]))?;
        c.append_value(ALLELE, &NodeData::from_vec(vec![record.allele.clone()]))?;
        c.append_value(ANNOT_ID, &NodeData::from_vec(vec![record.id.clone()]))?;
        c.append_value(ANNOT_QUAL, &NodeData::from_vec(vec![record.qual]))?;
        c.append_value(ANNOT_FILTER, &NodeData::from_vec(vec![record.filter.clone()]))?;
        self.alleles.push(allele_count(&record.allele));
        self.num_variants += 1;
        Ok(())
    }

    /// Append calls, (sample, ploidy), for the next variant lacking genotypes.
    /// Negative values are missing.
    pub fn append_genotypes(&mut self, calls: ArrayView2<i32>) -> Result<()> {
        let num_alleles = self.next_genotype_alleles()?;
        self.check_call_shape(&calls)?;
        let planes = encode_planes(calls, num_alleles)?;
        append_packed(&mut self.container, planes)?;
        self.num_genotypes += 1;
        Ok(())
    }

    /// Like [`SeqWriter::append_genotypes`] without range checking
    pub fn append_genotypes_unchecked(&mut self, calls: ArrayView2<i32>, num_alleles: usize) -> Result<()> {
        self.next_genotype_alleles()?;
        self.check_call_shape(&calls)?;
        append_packed(&mut self.container, encode_planes_unchecked(calls, num_alleles))?;
        self.num_genotypes += 1;
        Ok(())
    }

    /// Allele count of the variant the next genotype record belongs to
    fn next_genotype_alleles(&self) -> Result<usize> {
        self.alleles.get(self.num_genotypes).copied().ok_or_else(|| {
            SeqError::contract(
                self.num_genotypes,
                "genotypes appended before the site fields of their variant",
            )
            .into()
        })
    }

    fn check_call_shape(&self, calls: &ArrayView2<i32>) -> Result<()> {
        if calls.dim() != (self.num_samples, self.ploidy) {
            return Err(SeqError::validation(format!(
                "Genotype block has shape {:?}, expected ({}, {})",
                calls.dim(),
                self.num_samples,
                self.ploidy
            ))
            .into());
        }
        Ok(())
    }

    /// Append phase flags for the next variant, shaped like one record of
    /// `phase/data`
    pub fn append_phase(&mut self, phase: NodeData) -> Result<()> {
        let expected = phase_inner(self.num_samples, self.ploidy);
        let mut shape = vec![1];
        shape.extend(&expected);
        let record = if phase.shape() == expected.as_slice() {
            reshape_record(phase, &shape)?
        } else {
            phase
        };
        self.container.append_value(PHASE_DATA, &record)?;
        self.num_phase += 1;
        Ok(())
    }

    /// Declare `annotation/info/<name>`; `inner` is the per-value shape
    pub fn add_info(&mut self, name: &str, kind: ElementKind, inner: &[usize], shape: FieldShape) -> Result<()> {
        if self.info.contains_key(name) {
            return Err(SeqError::validation(format!("INFO field '{}' already declared", name)).into());
        }
        self.container.create_node(&format!("{}{}", INFO_PREFIX, name), kind, inner)?;
        if shape == FieldShape::Ragged {
            self.container.create_node(&format!("{}@{}", INFO_PREFIX, name), ElementKind::Int32, &[])?;
        }
        self.info.insert(name.to_string(), shape);
        Ok(())
    }

    /// Append the values of one variant; fixed fields take exactly one
    pub fn append_info(&mut self, name: &str, values: &NodeData) -> Result<()> {
        let shape = *self
            .info
            .get(name)
            .ok_or_else(|| SeqError::validation(format!("Unknown INFO field '{}'", name)))?;
        let path = format!("{}{}", INFO_PREFIX, name);
        match shape {
            FieldShape::Fixed => self.container.append_value(&path, values),
            FieldShape::Ragged => {
                if !values.is_empty() {
                    self.container.append_range(&path, values)?;
                }
                self.container.append_value(
                    &format!("{}@{}", INFO_PREFIX, name),
                    &NodeData::from_vec(vec![values.len() as i32]),
                )
            }
        }
    }

    /// Declare `annotation/format/<name>`, one column per sample
    pub fn add_format(&mut self, name: &str, kind: ElementKind) -> Result<()> {
        if self.format.contains_key(name) {
            return Err(SeqError::validation(format!("FORMAT field '{}' already declared", name)).into());
        }
        self.container
            .create_node(&format!("{}{}/data", FORMAT_PREFIX, name), kind, &[self.num_samples])?;
        self.container
            .create_node(&format!("{}@{}", FORMAT_PREFIX, name), ElementKind::Int32, &[])?;
        self.format.insert(name.to_string(), FieldShape::Ragged);
        Ok(())
    }

    /// Append the rows, (value, sample), of one variant
    pub fn append_format(&mut self, name: &str, rows: &NodeData) -> Result<()> {
        if !self.format.contains_key(name) {
            return Err(SeqError::validation(format!("Unknown FORMAT field '{}'", name)).into());
        }
        if !rows.is_empty() {
            self.container
                .append_range(&format!("{}{}/data", FORMAT_PREFIX, name), rows)?;
        }
        self.container.append_value(
            &format!("{}@{}", FORMAT_PREFIX, name),
            &NodeData::from_vec(vec![rows.len() as i32]),
        )
    }

    /// Store `sample.annotation/<name>`, one record per sample
    pub fn set_sample_annotation(&mut self, name: &str, values: NodeData) -> Result<()> {
        if values.len() != self.num_samples {
            return Err(SeqError::validation(format!(
                "Sample annotation '{}' has {} entries for {} samples",
                name,
                values.len(),
                self.num_samples
            ))
            .into());
        }
        self.container
            .insert(&format!("{}{}", SAMPLE_ANNOT_PREFIX, name), values);
        Ok(())
    }

    /// Check stream lengths and hand back the container
    pub fn into_container(self) -> Result<MemoryContainer> {
        let n = self.num_variants;
        if self.num_genotypes != n {
            return Err(SeqError::validation(format!(
                "{} variants but {} genotype records",
                n, self.num_genotypes
            ))
            .into());
        }
        if self.ploidy > 1 && self.num_phase != 0 && self.num_phase != n {
            return Err(SeqError::validation(format!(
                "{} variants but {} phase records",
                n, self.num_phase
            ))
            .into());
        }
        let mut container = self.container;
        if self.ploidy > 1 && self.num_phase == 0 {
            // unphased throughout
            let inner = phase_inner(self.num_samples, self.ploidy);
            let mut shape = vec![n];
            shape.extend(&inner);
            let zeros = ndarray::ArrayD::<u8>::zeros(ndarray::IxDyn(&shape));
            container.insert(PHASE_DATA, NodeData::from(zeros));
        }
        for (name, shape) in &self.info {
            let check = match shape {
                FieldShape::Fixed => format!("{}{}", INFO_PREFIX, name),
                FieldShape::Ragged => format!("{}@{}", INFO_PREFIX, name),
            };
            let len = container.dims(&check)?[0];
            if len != n {
                return Err(SeqError::validation(format!(
                    "INFO field '{}' covers {} of {} variants",
                    name, len, n
                ))
                .into());
            }
        }
        for name in self.format.keys() {
            let len = container.dims(&format!("{}@{}", FORMAT_PREFIX, name))?[0];
            if len != n {
                return Err(SeqError::validation(format!(
                    "FORMAT field '{}' covers {} of {} variants",
                    name, len, n
                ))
                .into());
            }
        }
        debug!(
            "Finished writing {} variants for {} samples",
            n, self.num_samples
        );
        Ok(container)
    }

    pub fn finish(self) -> Result<SeqFile> {
        SeqFile::open(self.into_container()?)
    }
}

fn reshape_record(data: NodeData, shape: &[usize]) -> Result<NodeData> {
    let values = data
        .into_array::<u8>()
        .ok_or_else(|| SeqError::validation("Phase flags must be uint8"))?;
    let values: Vec<u8> = values.iter().copied().collect();
    NodeData::from_shape_vec(shape, values)
}
