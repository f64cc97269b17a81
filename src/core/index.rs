use crate::core::error::SeqError;
use bitvec::prelude::*;
use color_eyre::Result;

/// Result of projecting a variant selection onto a ragged node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSelection {
    /// Element count of each selected variant, in storage order (0 allowed)
    pub counts: Vec<i32>,
    /// First flat element touched by a selected variant
    pub start: usize,
    /// Length of the minimal contiguous flat range
    pub count: usize,
    /// One bit per element of `start..start + count`, set when the owning
    /// variant is selected
    pub mask: BitVec,
}

/// Per-variant element counts of a ragged node, stored as (value, repeat)
/// runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardinalityIndex {
    runs: Vec<(i32, usize)>,
    num_variants: usize,
    total: u64,
    max: i32,
    indexed: bool,
}

impl CardinalityIndex {
    /// Index for a fixed-shape node: one record per variant
    pub fn fixed(num_variants: usize) -> Self {
        Self {
            runs: if num_variants > 0 {
                vec![(1, num_variants)]
            } else {
                Vec::new()
            },
            num_variants,
            total: num_variants as u64,
            max: if num_variants > 0 { 1 } else { 0 },
            indexed: false,
        }
    }

    /// Build from stored per-variant counts
    pub fn from_counts(counts: &[i32]) -> Result<Self> {
        let mut runs: Vec<(i32, usize)> = Vec::new();
        let mut total = 0u64;
        let mut max = 0;
        for (variant, &c) in counts.iter().enumerate() {
            if c < 0 {
                return Err(SeqError::integrity(format!(
                    "Negative cardinality {} at variant {}",
                    c,
                    variant + 1
                ))
                .into());
            }
            total += c as u64;
            max = max.max(c);
            match runs.last_mut() {
                Some((value, repeat)) if *value == c => *repeat += 1,
                _ => runs.push((c, 1)),
            }
        }
        Ok(Self {
            runs,
            num_variants: counts.len(),
            total,
            max,
            indexed: true,
        })
    }

    /// False for fixed-shape nodes
    pub fn has_index(&self) -> bool {
        self.indexed
    }

    /// Every variant owns exactly one element
    pub fn is_fixed_one(&self) -> bool {
        self.runs.iter().all(|&(value, _)| value == 1)
    }

    pub fn max_len(&self) -> i32 {
        self.max
    }

    pub fn num_variants(&self) -> usize {
        self.num_variants
    }

    /// Sum of all counts, i.e. the expected flat length of the data node
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn runs(&self) -> &[(i32, usize)] {
        &self.runs
    }

    /// Confirm the flat data node has exactly `total()` records
    pub fn check_total(&self, flat_len: usize, name: &str) -> Result<()> {
        if self.total != flat_len as u64 {
            return Err(SeqError::integrity(format!(
                "Cardinality index of '{}' sums to {} but the data node has {} records",
                name, self.total, flat_len
            ))
            .into());
        }
        Ok(())
    }

    /// Per-variant counts expanded out of the runs
    pub fn counts(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.num_variants);
        for &(value, repeat) in &self.runs {
            out.extend(std::iter::repeat(value).take(repeat));
        }
        out
    }

    /// Project a variant mask (full length) onto the flat element range.
    pub fn length_and_selection(&self, variants: &BitSlice) -> Result<IndexSelection> {
        if variants.len() != self.num_variants {
            return Err(SeqError::validation(format!(
                "Variant mask has length {}, index covers {} variants",
                variants.len(),
                self.num_variants
            ))
            .into());
        }
        let (first, last) = match (variants.first_one(), variants.last_one()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Ok(IndexSelection::default()),
        };

        let mut counts = Vec::with_capacity(variants[first..=last].count_ones());
        let mut mask = BitVec::new();
        let mut offset = 0usize;
        let mut start = None;
        let mut variant = 0usize;

        'runs: for &(value, repeat) in &self.runs {
            let len = value as usize;
            // whole run before the selection: skip in one step
            if variant + repeat <= first {
                offset += len * repeat;
                variant += repeat;
                continue;
            }
            for _ in 0..repeat {
                if variant > last {
                    break 'runs;
                }
                if variant >= first {
                    let selected = variants[variant];
                    if start.is_none() {
                        start = Some(offset);
                    }
                    if selected {
                        counts.push(value);
                    }
                    mask.extend(std::iter::repeat(selected).take(len));
                }
                offset += len;
                variant += 1;
            }
        }

        // trailing elements owned by unselected variants never occur because
        // the walk stops at the last selected variant
        Ok(IndexSelection {
            counts,
            start: start.unwrap_or(0),
            count: mask.len(),
            mask,
        })
    }
}
