use crate::core::error::SeqError;
use crate::core::file::{SeqFile, CHROMOSOME, POSITION};
use crate::var::ReadOptions;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use indexmap::IndexMap;
use log::debug;
use std::collections::{BTreeSet, HashMap};

/// Where each source's selected variants land in the merged output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    num_variants: usize,
    /// Per source, the 1-based merged position of each selected variant
    positions: Vec<Vec<usize>>,
}

// (position, repeat ordinal of the same chr:pos)
type SiteKey = (i32, usize);

impl MergePlan {
    /// Every list must be strictly increasing and lie within
    /// `1..=num_variants`.
    pub fn new(num_variants: usize, positions: Vec<Vec<usize>>) -> Result<Self> {
        for (f, list) in positions.iter().enumerate() {
            if let Some(w) = list.windows(2).find(|w| w[0] >= w[1]) {
                return Err(SeqError::validation(format!(
                    "Merge positions of file {} are not strictly increasing ({} then {})",
                    f + 1,
                    w[0],
                    w[1]
                ))
                .into());
            }
            if let Some(&p) = list.iter().find(|&&p| p == 0 || p > num_variants) {
                return Err(SeqError::validation(format!(
                    "Merge position {} of file {} is outside 1..={}",
                    p,
                    f + 1,
                    num_variants
                ))
                .into());
            }
        }
        Ok(Self {
            num_variants,
            positions,
        })
    }

    /// Order the union of the sources' selected sites: chromosomes in the
    /// order they are first seen, positions ascending within a chromosome.
    /// Sites with the same `chr:pos` key in several files are one merged
    /// variant; repeated positions within a file are told apart by their
    /// repeat ordinal, like `$chrom_pos` does.
    pub fn from_files(files: &mut [SeqFile]) -> Result<Self> {
        let mut per_file = Vec::with_capacity(files.len());
        let mut chroms: IndexMap<String, BTreeSet<SiteKey>> = IndexMap::new();
        for file in files.iter_mut() {
            let sites = selected_sites(file)?;
            for (chrom, key) in &sites {
                chroms.entry(chrom.clone()).or_default().insert(*key);
            }
            per_file.push(sites);
        }

        let mut global: HashMap<(&str, SiteKey), usize> = HashMap::new();
        for (chrom, keys) in &chroms {
            for key in keys {
                let next = global.len() + 1;
                global.insert((chrom.as_str(), *key), next);
            }
        }

        let positions = per_file
            .iter()
            .map(|sites| {
                sites
                    .iter()
                    .map(|(chrom, key)| {
                        global
                            .get(&(chrom.as_str(), *key))
                            .copied()
                            .ok_or_else(|| eyre!("Site {}:{} missing from the merge plan", chrom, key.0))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "Planned {} merged variants over {} chromosomes",
            global.len(),
            chroms.len()
        );
        Self::new(global.len(), positions).map_err(|e| {
            e.wrap_err("Sources must list their variants in merged order (chromosomes in a shared order, positions ascending)")
        })
    }

    pub fn num_variants(&self) -> usize {
        self.num_variants
    }

    pub fn num_sources(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self, source: usize) -> &[usize] {
        &self.positions[source]
    }
}

fn selected_sites(file: &mut SeqFile) -> Result<Vec<(String, SiteKey)>> {
    let opts = ReadOptions::default();
    let chroms = file.read_var(CHROMOSOME, &opts)?.data().to_text();
    let positions = file
        .read_var(POSITION, &opts)?
        .data()
        .to_vec::<i32>()
        .ok_or_else(|| SeqError::validation("'position' must hold int32 values"))?;
    let mut out: Vec<(String, SiteKey)> = Vec::with_capacity(chroms.len());
    for (chrom, pos) in chroms.into_iter().zip(positions) {
        let repeat = match out.last() {
            Some((c, (p, n))) if *c == chrom && *p == pos => n + 1,
            _ => 0,
        };
        out.push((chrom, (pos, repeat)));
    }
    Ok(out)
}
