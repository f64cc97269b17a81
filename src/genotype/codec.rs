use crate::core::container::{MISSING_I32, MISSING_U8};
use crate::core::error::SeqError;
use color_eyre::Result;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

/// Bits per plane
pub const PLANE_BITS: u32 = 2;
const PLANE_MASK: u8 = 0b11;

/// Smallest multiple of two bits able to hold `0..num_alleles` plus the
/// all-ones missing pattern. Never less than two.
pub fn bit_width(num_alleles: usize) -> u32 {
    let mut width = PLANE_BITS;
    while (num_alleles as u128 + 1) > (1u128 << width) {
        width += PLANE_BITS;
    }
    width
}

/// Number of 2-bit planes stored for a variant
pub fn num_planes(num_alleles: usize) -> usize {
    (bit_width(num_alleles) / PLANE_BITS) as usize
}

/// All-ones pattern over `planes` planes
pub fn missing_code(planes: usize) -> u64 {
    if planes >= 32 {
        u64::MAX
    } else {
        (1u64 << (planes as u32 * PLANE_BITS)) - 1
    }
}

/// Output cell of a decoded genotype or dosage
pub trait GenoCell: Copy + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const MISSING: Self;

    /// Largest allele code the cell can carry
    const MAX_CODE: u64;

    /// Widest plane count whose codes fit in the cell
    const MAX_PLANES: usize;

    fn from_code(code: u64) -> Self;
}

impl GenoCell for i32 {
    const MISSING: Self = MISSING_I32;
    const MAX_CODE: u64 = i32::MAX as u64;
    const MAX_PLANES: usize = 15;

    fn from_code(code: u64) -> Self {
        code as i32
    }
}

impl GenoCell for u8 {
    const MISSING: Self = MISSING_U8;
    // 0xFF is reserved for missing
    const MAX_CODE: u64 = (MISSING_U8 - 1) as u64;
    const MAX_PLANES: usize = 4;

    fn from_code(code: u64) -> Self {
        code as u8
    }
}

/// Split one variant's calls into 2-bit planes.
///
/// `calls` is (sample, ploidy); negative values (including the i32 missing
/// marker) are stored as missing. Returns (plane, sample, ploidy).
pub fn encode_planes(calls: ArrayView2<i32>, num_alleles: usize) -> Result<Array3<u8>> {
    if let Some(bad) = calls
        .iter()
        .find(|&&v| v >= 0 && v as usize >= num_alleles)
    {
        return Err(SeqError::validation(format!(
            "Allele index {} out of range for a variant with {} alleles",
            bad, num_alleles
        ))
        .into());
    }
    Ok(pack(calls, num_planes(num_alleles)))
}

/// Like [`encode_planes`] but keeps out-of-range codes as supplied, widening
/// the plane count so they are stored without truncation.
pub fn encode_planes_unchecked(calls: ArrayView2<i32>, num_alleles: usize) -> Array3<u8> {
    let max_code = calls.iter().copied().filter(|&v| v >= 0).max().unwrap_or(0) as usize;
    let planes = num_planes(num_alleles).max(num_planes(max_code + 1));
    pack(calls, planes)
}

fn pack(calls: ArrayView2<i32>, planes: usize) -> Array3<u8> {
    let (samples, ploidy) = calls.dim();
    let mut out = Array3::<u8>::zeros((planes, samples, ploidy));
    for (plane, mut layer) in out.axis_iter_mut(Axis(0)).enumerate() {
        let shift = plane as u32 * PLANE_BITS;
        for (cell, &call) in layer.iter_mut().zip(calls.iter()) {
            *cell = if call < 0 {
                PLANE_MASK
            } else {
                ((call as u64 >> shift) as u8) & PLANE_MASK
            };
        }
    }
    out
}

/// Reassemble one variant's calls from its planes.
///
/// `planes` is (plane, sample, ploidy). A decoded code at or above
/// `num_alleles` that is not the missing pattern is an integrity error.
pub fn decode_planes<T: GenoCell>(
    planes: ArrayView3<u8>,
    num_alleles: usize,
    variant: usize,
) -> Result<Array2<T>> {
    let (codes, missing) = combine(planes);
    let mut out = Array2::<T>::from_elem(codes.dim(), T::MISSING);
    for (dst, &code) in out.iter_mut().zip(codes.iter()) {
        if code == missing {
            continue;
        }
        if code >= num_alleles as u64 {
            return Err(SeqError::integrity(format!(
                "Genotype code {} at variant {} exceeds its {} alleles",
                code,
                variant + 1,
                num_alleles
            ))
            .into());
        }
        *dst = T::from_code(code);
    }
    Ok(out)
}

/// Like [`decode_planes`] but hands back every non-missing code as stored
pub fn decode_planes_unchecked<T: GenoCell>(planes: ArrayView3<u8>) -> Array2<T> {
    let (codes, missing) = combine(planes);
    codes.mapv(|code| {
        if code == missing {
            T::MISSING
        } else {
            T::from_code(code)
        }
    })
}

fn combine(planes: ArrayView3<u8>) -> (Array2<u64>, u64) {
    let (num_planes, samples, ploidy) = planes.dim();
    let mut codes = Array2::<u64>::zeros((samples, ploidy));
    for (plane, layer) in planes.axis_iter(Axis(0)).enumerate() {
        let shift = plane as u32 * PLANE_BITS;
        codes.zip_mut_with(&layer, |acc, &bits| {
            *acc |= ((bits & PLANE_MASK) as u64) << shift;
        });
    }
    (codes, missing_code(num_planes))
}

/// Count reference (allele 0) or alternate (allele >= 1) copies per sample.
///
/// `geno` is (variant, sample, ploidy); any missing call makes that
/// sample's dosage missing.
pub fn dosage<T: GenoCell>(geno: &Array3<T>, reference: bool) -> Array2<T> {
    let zero = T::from_code(0);
    geno.map_axis(Axis(2), |calls| {
        let mut count = 0u64;
        for &c in calls.iter() {
            if c == T::MISSING {
                return T::MISSING;
            }
            if (c == zero) == reference {
                count += 1;
            }
        }
        T::from_code(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rstest::rstest;

    #[rstest]
    #[case(0, 2)]
    #[case(1, 2)]
    #[case(2, 2)]
    #[case(3, 2)]
    #[case(4, 4)]
    #[case(15, 4)]
    #[case(16, 6)]
    #[case(63, 6)]
    #[case(64, 8)]
    #[case(255, 8)]
    #[case(256, 10)]
    fn test_bit_width(#[case] num_alleles: usize, #[case] width: u32) {
        assert_eq!(bit_width(num_alleles), width);
        assert_eq!(num_planes(num_alleles), width as usize / 2);
    }

    // deterministic pseudo-random calls with roughly one in seven missing
    fn calls(samples: usize, ploidy: usize, num_alleles: usize, seed: u64) -> Array2<i32> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        Array2::from_shape_fn((samples, ploidy), |_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let r = (state >> 33) as usize;
            if r % 7 == 0 {
                MISSING_I32
            } else {
                (r % num_alleles) as i32
            }
        })
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    #[case(4)]
    #[case(5)]
    #[case(16)]
    #[case(17)]
    fn test_round_trip(#[case] num_alleles: usize) {
        for (seed, ploidy) in [(1u64, 2usize), (2, 3), (3, 1)] {
            let input = calls(9, ploidy, num_alleles, seed * num_alleles as u64);
            let planes = encode_planes(input.view(), num_alleles).unwrap();
            assert_eq!(planes.dim().0, num_planes(num_alleles));
            let back: Array2<i32> = decode_planes(planes.view(), num_alleles, 0).unwrap();
            assert_eq!(back, input);
        }
    }

    #[test]
    fn test_missing_is_all_ones() {
        let input = arr2(&[[MISSING_I32, 4]]);
        let planes = encode_planes(input.view(), 5).unwrap();
        assert_eq!(planes.dim(), (2, 1, 2));
        assert_eq!(planes[[0, 0, 0]], 0b11);
        assert_eq!(planes[[1, 0, 0]], 0b11);
        // 4 = 0b0100: low plane 0, high plane 1
        assert_eq!(planes[[0, 0, 1]], 0);
        assert_eq!(planes[[1, 0, 1]], 1);
    }

    #[test]
    fn test_single_allele_keeps_two_bits() {
        let input = arr2(&[[0, MISSING_I32]]);
        let planes = encode_planes(input.view(), 1).unwrap();
        assert_eq!(planes.dim().0, 1);
        let back: Array2<i32> = decode_planes(planes.view(), 1, 0).unwrap();
        assert_eq!(back, input);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let input = arr2(&[[0, 2]]);
        let err = encode_planes(input.view(), 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeqError>(),
            Some(SeqError::Validation(_))
        ));
    }

    #[test]
    fn test_decode_out_of_range_is_integrity_error() {
        // code 2 with only two alleles is not the missing pattern (3)
        let planes = Array3::from_shape_vec((1, 1, 2), vec![0u8, 2]).unwrap();
        let err = decode_planes::<i32>(planes.view(), 2, 4).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeqError>(),
            Some(SeqError::Integrity(_))
        ));
        assert!(err.to_string().contains("variant 5"));
    }

    #[test]
    fn test_unchecked_widens_for_large_codes() {
        let input = arr2(&[[0, 5]]);
        let planes = encode_planes_unchecked(input.view(), 2);
        assert_eq!(planes.dim().0, 2);
        let back: Array2<i32> = decode_planes(planes.view(), 6, 0).unwrap();
        assert_eq!(back, input);
    }

    #[test]
    fn test_unchecked_decode_keeps_stray_codes() {
        let planes = Array3::from_shape_vec((1, 1, 3), vec![0u8, 2, 3]).unwrap();
        let back: Array2<i32> = decode_planes_unchecked(planes.view());
        assert_eq!(back, arr2(&[[0, 2, MISSING_I32]]));
    }

    #[test]
    fn test_byte_cells() {
        let input = arr2(&[[1, MISSING_I32]]);
        let planes = encode_planes(input.view(), 2).unwrap();
        let back: Array2<u8> = decode_planes(planes.view(), 2, 0).unwrap();
        assert_eq!(back, arr2(&[[1u8, MISSING_U8]]));
    }

    #[test]
    fn test_dosage() {
        let geno = Array3::from_shape_vec(
            (1, 3, 2),
            vec![0, 1, MISSING_I32, 0, 2, 1],
        )
        .unwrap();
        let reference = dosage(&geno, true);
        let alt = dosage(&geno, false);
        assert_eq!(reference.row(0).to_vec(), vec![1, MISSING_I32, 0]);
        assert_eq!(alt.row(0).to_vec(), vec![1, MISSING_I32, 2]);
    }
}
