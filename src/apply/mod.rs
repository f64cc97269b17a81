//! Block-wise iteration over the selected variants.
//!
//! Each block is the next `block_size` selected variants. The block is
//! entered as a nested selection scope and the requested variables are
//! decoded against it. The scope is popped as soon as decoding finishes, so
//! the transform and the sink see the caller's selection. The engine is not
//! re-entrant on one handle.

pub mod parallel;
pub mod sink;

use crate::core::error::SeqError;
use crate::core::file::SeqFile;
use crate::core::utils::create_progress_bar;
use crate::var::{ReadOptions, VarBundle};
use bitvec::prelude::*;
use color_eyre::Result;
use log::{debug, info};

pub use parallel::par_apply;
pub use sink::{AppendSink, BinarySink, BlockSink, BlockValue, CollectSink, TextSink};

/// Index handed to the transform alongside each block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VarIndex {
    #[default]
    None,
    /// 1-based position of the block's first variant within the selection
    Relative,
    /// 1-based ordinal of the block's first variant in the file
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyConfig {
    pub block_size: usize,
    pub var_index: VarIndex,
    pub read: ReadOptions,
    pub progress: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            var_index: VarIndex::None,
            read: ReadOptions::default(),
            progress: false,
        }
    }
}

impl ApplyConfig {
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size,
            ..Default::default()
        }
    }
}

/// Split the selected variant ordinals into block masks
pub(crate) fn block_masks(variant: &BitSlice, block_size: usize) -> Vec<(BitVec, usize)> {
    let selected: Vec<usize> = variant.iter_ones().collect();
    selected
        .chunks(block_size.max(1))
        .map(|chunk| {
            let mut mask = bitvec![0; variant.len()];
            for &i in chunk {
                mask.set(i, true);
            }
            (mask, chunk[0])
        })
        .collect()
}

/// Argument checks shared by the serial and parallel engines; every name is
/// resolved against `file` before any block is read
pub(crate) fn check_request<S: AsRef<str>>(
    file: &mut SeqFile,
    names: &[S],
    config: &ApplyConfig,
) -> Result<()> {
    if config.block_size == 0 {
        return Err(SeqError::validation("Block size must be at least 1").into());
    }
    if names.is_empty() {
        return Err(SeqError::validation("No variables requested").into());
    }
    // block scopes change which dimensions a cached binding was built for
    file.clear_var_cache();
    for name in names {
        file.resolve_var(name.as_ref())?
            .check_options(&config.read)?;
    }
    Ok(())
}

/// Drive blocks, numbering them from `first_block` and counting relative
/// indices from `first_relative` (both 0-based). `body` gets the handle
/// back once the block scope has been popped.
pub(crate) fn run_blocks<S, F>(
    file: &mut SeqFile,
    names: &[S],
    config: &ApplyConfig,
    first_block: usize,
    first_relative: usize,
    mut body: F,
) -> Result<usize>
where
    S: AsRef<str>,
    F: FnMut(usize, Option<usize>, &VarBundle, &SeqFile) -> Result<()>,
{
    check_request(file, names, config)?;

    let blocks = block_masks(file.selection().variant(), config.block_size);
    debug!(
        "Applying over {} selected variants in {} blocks of {}",
        file.selection().selected_variant_count(),
        blocks.len(),
        config.block_size
    );
    let total = blocks.len();
    let pb = create_progress_bar(total, "blocks", config.progress);

    for (i, (mask, first)) in blocks.into_iter().enumerate() {
        let block = first_block + i;
        let index = match config.var_index {
            VarIndex::None => None,
            VarIndex::Relative => Some(first_relative + i * config.block_size + 1),
            VarIndex::Absolute => Some(first + 1),
        };
        let bundle = {
            let mut scope = file.scope(Some(mask), None)?;
            scope.read_vars(names, &config.read)?
        };
        body(block, index, &bundle, file)?;
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(total)
}

/// Run `transform` on every block and collect its results in order.
///
/// With nothing selected the result is empty.
pub fn block_apply<S, F, R>(
    file: &mut SeqFile,
    names: &[S],
    config: &ApplyConfig,
    mut transform: F,
) -> Result<Vec<R>>
where
    S: AsRef<str>,
    F: FnMut(&VarBundle, Option<usize>) -> Result<R>,
{
    let mut out = Vec::new();
    run_blocks(file, names, config, 0, 0, |_, index, bundle, _| {
        out.push(transform(bundle, index)?);
        Ok(())
    })?;
    Ok(out)
}

/// Run `transform` on every block and route its results to `sink`.
///
/// The sink is finished after the last block; it is not finished when a
/// block fails.
pub fn block_apply_into<S, F>(
    file: &mut SeqFile,
    names: &[S],
    config: &ApplyConfig,
    mut transform: F,
    sink: &mut dyn BlockSink,
) -> Result<()>
where
    S: AsRef<str>,
    F: FnMut(&VarBundle, Option<usize>) -> Result<BlockValue>,
{
    let blocks = run_blocks(file, names, config, 0, 0, |block, index, bundle, _| {
        let value = transform(bundle, index)?;
        sink.accept(block, value)
    })?;
    sink.finish()?;
    info!("Wrote {} blocks", blocks);
    Ok(())
}
