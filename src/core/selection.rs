use crate::core::error::SeqError;
use bitvec::prelude::*;
use color_eyre::Result;

/// Sample and variant inclusion masks for one file handle.
///
/// `var_start`/`var_end` bracket the set variant bits and are kept in sync
/// with every change to the variant mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    sample: BitVec,
    variant: BitVec,
    var_start: usize,
    var_end: usize,
}

impl Selection {
    /// Everything selected
    pub fn all(num_samples: usize, num_variants: usize) -> Self {
        let mut sel = Self {
            sample: bitvec![1; num_samples],
            variant: bitvec![1; num_variants],
            var_start: 0,
            var_end: 0,
        };
        sel.refresh_bounds();
        sel
    }

    pub fn sample(&self) -> &BitSlice {
        &self.sample
    }

    pub fn variant(&self) -> &BitSlice {
        &self.variant
    }

    /// First selected variant, or the mask length when nothing is selected
    pub fn var_start(&self) -> usize {
        self.var_start
    }

    /// One past the last selected variant
    pub fn var_end(&self) -> usize {
        self.var_end
    }

    /// Variant mask restricted to `var_start..var_end`
    pub fn variant_window(&self) -> &BitSlice {
        &self.variant[self.var_start..self.var_end]
    }

    pub fn num_samples(&self) -> usize {
        self.sample.len()
    }

    pub fn num_variants(&self) -> usize {
        self.variant.len()
    }

    pub fn selected_variant_count(&self) -> usize {
        self.variant.count_ones()
    }

    pub fn selected_sample_count(&self) -> usize {
        self.sample.count_ones()
    }

    pub fn set_variant(&mut self, mask: BitVec) -> Result<()> {
        if mask.len() != self.variant.len() {
            return Err(SeqError::validation(format!(
                "Variant mask has length {}, expected {}",
                mask.len(),
                self.variant.len()
            ))
            .into());
        }
        self.variant = mask;
        self.refresh_bounds();
        Ok(())
    }

    pub fn set_sample(&mut self, mask: BitVec) -> Result<()> {
        if mask.len() != self.sample.len() {
            return Err(SeqError::validation(format!(
                "Sample mask has length {}, expected {}",
                mask.len(),
                self.sample.len()
            ))
            .into());
        }
        self.sample = mask;
        Ok(())
    }

    /// Select variants whose index falls in `range` (0-based, end exclusive)
    pub fn set_variant_range(&mut self, range: std::ops::Range<usize>) -> Result<()> {
        if range.end > self.variant.len() || range.start > range.end {
            return Err(SeqError::validation(format!(
                "Variant range {:?} outside 0..{}",
                range,
                self.variant.len()
            ))
            .into());
        }
        let mut mask = bitvec![0; self.variant.len()];
        mask[range].fill(true);
        self.set_variant(mask)
    }

    pub fn clear_variants(&mut self) {
        self.variant.fill(false);
        self.refresh_bounds();
    }

    /// Selected variant indices in storage order
    pub fn selected_variants(&self) -> impl Iterator<Item = usize> + '_ {
        self.variant_window()
            .iter_ones()
            .map(move |i| i + self.var_start)
    }

    pub fn selected_samples(&self) -> impl Iterator<Item = usize> + '_ {
        self.sample.iter_ones()
    }

    fn refresh_bounds(&mut self) {
        match (self.variant.first_one(), self.variant.last_one()) {
            (Some(first), Some(last)) => {
                self.var_start = first;
                self.var_end = last + 1;
            }
            _ => {
                self.var_start = self.variant.len();
                self.var_end = self.variant.len();
            }
        }
    }
}

/// Nested selection scopes.
///
/// The bottom entry is the handle's base selection and is never popped.
/// Pushing snapshots the current masks; popping restores them exactly.
#[derive(Debug, Clone)]
pub struct SelectionStack {
    stack: Vec<Selection>,
}

impl SelectionStack {
    pub fn new(num_samples: usize, num_variants: usize) -> Self {
        Self {
            stack: vec![Selection::all(num_samples, num_variants)],
        }
    }

    pub fn current(&self) -> &Selection {
        self.stack.last().expect("selection stack always holds the base")
    }

    pub fn current_mut(&mut self) -> &mut Selection {
        self.stack
            .last_mut()
            .expect("selection stack always holds the base")
    }

    /// Number of pushed scopes above the base selection
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Push a copy of the current selection, replacing the given masks
    pub fn push_scope(&mut self, variant: Option<BitVec>, sample: Option<BitVec>) -> Result<()> {
        let mut next = self.current().clone();
        if let Some(mask) = variant {
            next.set_variant(mask)?;
        }
        if let Some(mask) = sample {
            next.set_sample(mask)?;
        }
        self.stack.push(next);
        Ok(())
    }

    /// Drop the innermost scope.
    ///
    /// # Panics
    /// When no scope has been pushed; unbalanced pops are a programming error.
    pub fn pop_scope(&mut self) {
        assert!(
            self.stack.len() > 1,
            "pop_scope called without a matching push_scope"
        );
        self.stack.pop();
    }
}
