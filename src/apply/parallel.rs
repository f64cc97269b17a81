use super::{block_masks, check_request, run_blocks, ApplyConfig};
use crate::core::file::SeqFile;
use crate::core::utils::split_ranges;
use crate::var::VarBundle;
use bitvec::prelude::*;
use color_eyre::Result;
use log::debug;
use rayon::prelude::*;

/// Block apply spread over the rayon pool.
///
/// Consecutive blocks are grouped into one contiguous run per worker, each
/// run on its own clone of the handle. Results come back in block order and
/// match what [`super::block_apply`] returns for the same inputs. The
/// caller's selection is never touched.
pub fn par_apply<S, F, R>(
    file: &SeqFile,
    names: &[S],
    config: &ApplyConfig,
    workers: usize,
    transform: F,
) -> Result<Vec<R>>
where
    S: AsRef<str> + Sync,
    F: Fn(&VarBundle, Option<usize>) -> Result<R> + Sync,
    R: Send,
{
    // same checks as the serial engine, even when nothing is selected
    check_request(&mut file.try_clone()?, names, config)?;
    let blocks = block_masks(file.selection().variant(), config.block_size);
    let groups = split_ranges(blocks.len(), workers);
    debug!(
        "Splitting {} blocks across {} workers",
        blocks.len(),
        groups.len()
    );

    let mut jobs = Vec::with_capacity(groups.len());
    for range in groups {
        let mut clone = file.try_clone()?;
        let mut mask = bitvec![0; file.num_variants()];
        for (block_mask, _) in &blocks[range.clone()] {
            mask |= block_mask.as_bitslice();
        }
        clone.set_variant_mask(mask)?;
        jobs.push((range.start, clone));
    }

    // progress belongs to the caller's thread, not the workers
    let inner = ApplyConfig {
        progress: false,
        ..*config
    };
    let per_group = jobs
        .into_par_iter()
        .map(|(first_block, mut clone)| {
            let mut out = Vec::new();
            run_blocks(
                &mut clone,
                names,
                &inner,
                first_block,
                first_block * config.block_size,
                |_, index, bundle, _| {
                    out.push(transform(bundle, index)?);
                    Ok(())
                },
            )?;
            Ok(out)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(per_group.into_iter().flatten().collect())
}
