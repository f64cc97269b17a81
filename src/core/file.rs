use crate::core::chrom::ChromIndex;
use crate::core::container::{Container, MemoryContainer, NodeData};
use crate::core::error::SeqError;
use crate::core::selection::{Selection, SelectionStack};
use crate::core::zarr;
use bitvec::prelude::*;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use indexmap::IndexMap;
use log::debug;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;

pub const SAMPLE_ID: &str = "sample.id";
pub const VARIANT_ID: &str = "variant.id";
pub const POSITION: &str = "position";
pub const CHROMOSOME: &str = "chromosome";
pub const ALLELE: &str = "allele";
pub const GENOTYPE_DATA: &str = "genotype/data";
pub const GENOTYPE_INDEX: &str = "genotype/@data";
pub const PHASE_DATA: &str = "phase/data";
pub const ANNOT_ID: &str = "annotation/id";
pub const ANNOT_QUAL: &str = "annotation/qual";
pub const ANNOT_FILTER: &str = "annotation/filter";
pub const INFO_PREFIX: &str = "annotation/info/";
pub const FORMAT_PREFIX: &str = "annotation/format/";
pub const SAMPLE_ANNOT_PREFIX: &str = "sample.annotation/";

/// Container shared read-only between handle clones
pub type SharedContainer = Arc<dyn Container + Send + Sync>;

/// Open variant file.
///
/// Owns the selection stack and the resolved-variable cache. A handle is
/// driven through `&mut self` by one caller at a time; concurrent work uses
/// [`SeqFile::try_clone`] to get a private handle per worker.
pub struct SeqFile {
    container: SharedContainer,
    num_samples: usize,
    num_variants: usize,
    ploidy: usize,
    chrom: ChromIndex,
    selection: SelectionStack,
    pub(crate) cache: HashMap<String, Arc<crate::var::VarBinding>>,
    pub(crate) externals: IndexMap<String, NodeData>,
}

impl std::fmt::Debug for SeqFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqFile")
            .field("num_samples", &self.num_samples)
            .field("num_variants", &self.num_variants)
            .field("ploidy", &self.ploidy)
            .field("scope_depth", &self.selection.depth())
            .finish()
    }
}

impl SeqFile {
    /// Open a Zarr store written by [`zarr::save`]
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let container = zarr::load(path)
            .wrap_err_with(|| format!("Failed to load store {}", path.display()))?;
        Self::open(container)
    }

    pub fn open(container: MemoryContainer) -> Result<Self> {
        Self::from_shared(Arc::new(container))
    }

    /// Open over an existing container.
    ///
    /// Sample and variant counts come from `sample.id` and `variant.id`;
    /// `position`, `chromosome` and `allele` must agree with the variant
    /// count.
    pub fn from_shared(container: SharedContainer) -> Result<Self> {
        let num_samples = one_dim_len(container.as_ref(), SAMPLE_ID)?;
        let num_variants = one_dim_len(container.as_ref(), VARIANT_ID)?;
        for path in [POSITION, CHROMOSOME, ALLELE] {
            let n = one_dim_len(container.as_ref(), path)?;
            if n != num_variants {
                return Err(SeqError::validation(format!(
                    "'{}' has {} entries but the file has {} variants",
                    path, n, num_variants
                ))
                .into());
            }
        }

        let ploidy = match container.resolve_child(GENOTYPE_DATA, false)? {
            Some(info) if info.ndim() == 3 => info.dims[2],
            Some(info) => {
                return Err(SeqError::validation(format!(
                    "'{}' must be three-dimensional, found {:?}",
                    GENOTYPE_DATA, info.dims
                ))
                .into())
            }
            None => 0,
        };

        let labels = container
            .read_range(CHROMOSOME, 0, num_variants)?
            .into_array::<String>()
            .ok_or_else(|| eyre!("'{}' must hold strings", CHROMOSOME))?;
        let chrom = ChromIndex::from_labels(labels.iter());
        debug!(
            "Opened file: {} samples, {} variants, ploidy {}, {} chromosome runs",
            num_samples,
            num_variants,
            ploidy,
            chrom.runs().len()
        );

        Ok(Self {
            container,
            num_samples,
            num_variants,
            ploidy,
            chrom,
            selection: SelectionStack::new(num_samples, num_variants),
            cache: HashMap::new(),
            externals: IndexMap::new(),
        })
    }

    /// New handle over the same container with a fresh copy of the current
    /// selection and external vectors, and an empty cache.
    pub fn try_clone(&self) -> Result<Self> {
        let mut selection = SelectionStack::new(self.num_samples, self.num_variants);
        let current = self.selection();
        selection
            .current_mut()
            .set_variant(current.variant().to_bitvec())?;
        selection
            .current_mut()
            .set_sample(current.sample().to_bitvec())?;
        Ok(Self {
            container: self.container.clone(),
            num_samples: self.num_samples,
            num_variants: self.num_variants,
            ploidy: self.ploidy,
            chrom: self.chrom.clone(),
            selection,
            cache: HashMap::new(),
            externals: self.externals.clone(),
        })
    }

    pub fn container(&self) -> &dyn Container {
        self.container.as_ref()
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn num_variants(&self) -> usize {
        self.num_variants
    }

    /// 0 when the file holds no genotypes
    pub fn ploidy(&self) -> usize {
        self.ploidy
    }

    pub fn chrom_index(&self) -> &ChromIndex {
        &self.chrom
    }

    pub fn selection(&self) -> &Selection {
        self.selection.current()
    }

    pub fn scope_depth(&self) -> usize {
        self.selection.depth()
    }

    /// Replace the variant mask of the current scope
    pub fn set_variant_mask(&mut self, mask: BitVec) -> Result<()> {
        self.selection.current_mut().set_variant(mask)
    }

    /// Replace the sample mask of the current scope
    pub fn set_sample_mask(&mut self, mask: BitVec) -> Result<()> {
        self.selection.current_mut().set_sample(mask)
    }

    /// Select variants by 0-based index range
    pub fn set_variant_range(&mut self, range: std::ops::Range<usize>) -> Result<()> {
        self.selection.current_mut().set_variant_range(range)
    }

    /// Select samples by identifier; unknown identifiers are an error
    pub fn set_samples_by_id<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<()> {
        let all = self
            .container
            .read_range(SAMPLE_ID, 0, self.num_samples)?
            .into_array::<String>()
            .ok_or_else(|| eyre!("'{}' must hold strings", SAMPLE_ID))?;
        let mut mask = bitvec![0; self.num_samples];
        for id in ids {
            let pos = all.iter().position(|s| s == id.as_ref()).ok_or_else(|| {
                SeqError::validation(format!("Unknown sample '{}'", id.as_ref()))
            })?;
            mask.set(pos, true);
        }
        self.set_sample_mask(mask)
    }

    /// Keep only variants on the given chromosome
    pub fn set_chromosome(&mut self, label: &str) -> Result<()> {
        let mut mask = bitvec![0; self.num_variants];
        for range in self.chrom.ranges_of(label) {
            mask[range].fill(true);
        }
        self.set_variant_mask(mask)
    }

    /// Select everything in the current scope
    pub fn reset_selection(&mut self) -> Result<()> {
        self.set_variant_mask(bitvec![1; self.num_variants])?;
        self.set_sample_mask(bitvec![1; self.num_samples])
    }

    /// Enter a nested selection scope.
    ///
    /// The returned guard derefs to the handle; the previous masks come back
    /// when it is dropped, on success and on early return alike.
    pub fn scope(
        &mut self,
        variant: Option<BitVec>,
        sample: Option<BitVec>,
    ) -> Result<ScopeGuard<'_>> {
        self.selection.push_scope(variant, sample)?;
        Ok(ScopeGuard { file: self })
    }

    /// Bind a caller-supplied per-variant vector, readable as `$:<name>`.
    ///
    /// The length is checked when the name is resolved.
    pub fn set_external(&mut self, name: &str, values: NodeData) {
        self.cache.remove(&format!("$:{}", name));
        self.externals.insert(name.to_string(), values);
    }

    /// Forget resolved variable bindings
    pub fn clear_var_cache(&mut self) {
        self.cache.clear();
    }
}

/// Pops its selection scope on drop
pub struct ScopeGuard<'a> {
    file: &'a mut SeqFile,
}

impl Deref for ScopeGuard<'_> {
    type Target = SeqFile;

    fn deref(&self) -> &SeqFile {
        self.file
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut SeqFile {
        self.file
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.file.selection.pop_scope();
    }
}

fn one_dim_len(container: &dyn Container, path: &str) -> Result<usize> {
    let info = container
        .resolve_child(path, true)?
        .ok_or_else(|| eyre!("No node '{}'", path))?;
    if info.ndim() != 1 {
        return Err(SeqError::validation(format!(
            "'{}' must be one-dimensional, found {:?}",
            path, info.dims
        ))
        .into());
    }
    Ok(info.dims[0])
}
