use crate::core::container::Container;
use crate::core::error::SeqError;
use crate::core::index::CardinalityIndex;
use crate::genotype::codec::{decode_planes, decode_planes_unchecked, GenoCell};
use bitvec::prelude::*;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use ndarray::{s, Array2, Array3, ArrayView3, Axis, Ix3};

/// Selected variants and samples of a packed genotype node
pub struct GenotypeRequest<'a> {
    /// Packed node, (plane, sample, ploidy)
    pub path: &'a str,
    /// Planes per variant
    pub planes: &'a CardinalityIndex,
    /// Allele count of each selected variant, in order
    pub num_alleles: &'a [usize],
    /// Full-length variant mask
    pub variants: &'a BitSlice,
    pub samples: &'a BitSlice,
    pub ploidy: usize,
}

impl GenotypeRequest<'_> {
    /// Refuse requests the output cell cannot represent, before any storage
    /// is touched.
    fn check_cell<T: GenoCell>(&self, plane_counts: &[i32]) -> Result<()> {
        if let Some(&n) = self
            .num_alleles
            .iter()
            .find(|&&n| n > 0 && (n - 1) as u64 > T::MAX_CODE)
        {
            return Err(SeqError::validation(format!(
                "A variant has {} alleles, too many for {}-byte genotype output",
                n,
                std::mem::size_of::<T>()
            ))
            .into());
        }
        if let Some(&p) = plane_counts.iter().find(|&&p| p as usize > T::MAX_PLANES) {
            return Err(SeqError::validation(format!(
                "A variant is stored with {} bit planes, too wide for {}-byte genotype output",
                p,
                std::mem::size_of::<T>()
            ))
            .into());
        }
        Ok(())
    }

    /// Decode into (variant, sample, ploidy)
    pub fn decode<T: GenoCell>(&self, container: &dyn Container) -> Result<Array3<T>> {
        self.decode_with(container, |block, i, variant| {
            decode_planes::<T>(block, self.num_alleles[i], variant)
        })
    }

    /// Decode without checking codes against the allele counts; codes the
    /// variant cannot have are returned as stored
    pub fn decode_unchecked(&self, container: &dyn Container) -> Result<Array3<i32>> {
        self.decode_with(container, |block, _, _| Ok(decode_planes_unchecked(block)))
    }

    fn decode_with<T, F>(&self, container: &dyn Container, decode_one: F) -> Result<Array3<T>>
    where
        T: GenoCell,
        F: Fn(ArrayView3<u8>, usize, usize) -> Result<Array2<T>>,
    {
        let sel = self.planes.length_and_selection(self.variants)?;
        if sel.counts.len() != self.num_alleles.len() {
            return Err(eyre!(
                "{} allele counts supplied for {} selected variants",
                self.num_alleles.len(),
                sel.counts.len()
            ));
        }
        self.check_cell::<T>(&sel.counts)?;

        let num_samples = self.samples.count_ones();
        let mut out = Array3::from_elem(
            (sel.counts.len(), num_samples, self.ploidy),
            T::MISSING,
        );
        if sel.count == 0 {
            return Ok(out);
        }

        let packed = container
            .read_masked(self.path, sel.start, &sel.mask, Some(self.samples))?
            .into_array::<u8>()
            .ok_or_else(|| eyre!("'{}' is not a uint8 node", self.path))?
            .into_dimensionality::<Ix3>()
            .wrap_err_with(|| format!("'{}' must be (plane, sample, ploidy)", self.path))?;

        let mut offset = 0usize;
        let variants = self.variants.iter_ones();
        for (i, (&planes, variant)) in sel.counts.iter().zip(variants).enumerate() {
            let planes = planes as usize;
            let block = packed.slice(s![offset..offset + planes, .., ..]);
            let calls = decode_one(block, i, variant)?;
            out.index_axis_mut(Axis(0), i).assign(&calls);
            offset += planes;
        }
        Ok(out)
    }
}
