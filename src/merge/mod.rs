//! Merging several files into one over the union of their variants.
//!
//! Samples are concatenated in file order. Each merged variant is claimed
//! by the sources listing it in the [`MergePlan`]; sources that do not
//! claim it contribute missing genotypes and unphased flags. A variant no
//! source claims is written with an empty allele list, a missing site and
//! missing values throughout.

pub mod plan;
pub mod remap;

use crate::core::container::{ElementKind, MemoryContainer, NodeData, MISSING_I32};
use crate::core::error::SeqError;
use crate::core::file::*;
use crate::core::utils::create_progress_bar;
use crate::core::writer::{phase_inner, FieldShape, SeqWriter, VariantRecord};
use crate::genotype::{allele_count, GenotypeRequest};
use crate::var::{ReadOptions, VarData, VarKind};
use bitvec::prelude::*;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use indexmap::IndexMap;
use log::{debug, info};
use ndarray::{s, Array2, Axis};

pub use plan::MergePlan;
pub use remap::{allele_map, merge_alleles, remap_calls};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// INFO fields to carry over; empty carries every field any source has
    pub info_fields: Vec<String>,
    pub progress: bool,
}

/// Shape of a merged INFO field
#[derive(Debug, Clone, PartialEq, Eq)]
struct InfoSpec {
    kind: ElementKind,
    inner: Vec<usize>,
    shape: FieldShape,
}

/// What one claiming source holds for the current merged variant
struct Source {
    file: usize,
    record: VariantRecord,
    // (sample, ploidy), local allele indices
    calls: Array2<i32>,
    phase: Vec<u8>,
    info: IndexMap<String, VarData>,
}

/// Plan the merge from the sources' selected sites, then merge
pub fn merge_files(files: &mut [SeqFile], options: &MergeOptions) -> Result<MemoryContainer> {
    let plan = MergePlan::from_files(files)?;
    merge_with_plan(files, &plan, options)
}

/// Merge under an explicit plan.
///
/// Source `f` contributes its selected variants, in order, at the merged
/// positions `plan.positions(f)`, and its selected samples.
pub fn merge_with_plan(
    files: &mut [SeqFile],
    plan: &MergePlan,
    options: &MergeOptions,
) -> Result<MemoryContainer> {
    if files.is_empty() {
        return Err(SeqError::validation("No files to merge").into());
    }
    if plan.num_sources() != files.len() {
        return Err(SeqError::validation(format!(
            "Merge plan covers {} sources, {} files given",
            plan.num_sources(),
            files.len()
        ))
        .into());
    }
    let ploidy = files[0].ploidy();
    for (f, file) in files.iter().enumerate() {
        if file.ploidy() != ploidy {
            return Err(SeqError::validation(format!(
                "File {} has ploidy {}, file 1 has {}",
                f + 1,
                file.ploidy(),
                ploidy
            ))
            .into());
        }
        let selected = file.selection().selected_variant_count();
        if plan.positions(f).len() != selected {
            return Err(SeqError::validation(format!(
                "Merge plan lists {} variants for file {}, which has {} selected",
                plan.positions(f).len(),
                f + 1,
                selected
            ))
            .into());
        }
    }

    let mut sample_ids = Vec::new();
    let mut offsets = Vec::with_capacity(files.len());
    for file in files.iter_mut() {
        offsets.push(sample_ids.len());
        let ids = file.read_var(SAMPLE_ID, &ReadOptions::default())?;
        sample_ids.extend(ids.data().to_text());
    }
    let fields = collect_info_fields(files, &options.info_fields)?;
    let mut writer = SeqWriter::new(&sample_ids, ploidy).wrap_err("Merged sample ids must be unique")?;
    for (name, spec) in &fields {
        writer.add_info(name, spec.kind, &spec.inner, spec.shape)?;
    }
    debug!(
        "Merging {} files: {} samples, {} variants, INFO fields {:?}",
        files.len(),
        sample_ids.len(),
        plan.num_variants(),
        fields.keys().collect::<Vec<_>>()
    );

    let locals: Vec<Vec<usize>> = files
        .iter()
        .map(|f| f.selection().selected_variants().collect())
        .collect();
    let mut next = vec![0usize; files.len()];
    let pb = create_progress_bar(plan.num_variants(), "variants", options.progress);

    for global in 1..=plan.num_variants() {
        let mut sources = Vec::new();
        for (f, file) in files.iter_mut().enumerate() {
            if plan.positions(f).get(next[f]) == Some(&global) {
                let source = read_source(file, f, locals[f][next[f]], &fields)
                    .wrap_err_with(|| format!("Failed to read file {} for merged variant {}", f + 1, global))?;
                sources.push(source);
                next[f] += 1;
            }
        }
        if sources.is_empty() {
            debug!("No file claims merged variant {}, writing it as missing", global);
        }

        let lists: Vec<&str> = sources.iter().map(|s| s.record.allele.as_str()).collect();
        let merged = merge_alleles(&lists);
        let calls = merge_genotypes(&sources, &merged, &offsets, sample_ids.len(), ploidy, global)?;

        let mut record = sources
            .first()
            .map(|s| s.record.clone())
            .unwrap_or_else(|| VariantRecord::new("", MISSING_I32, ""));
        record.allele = merged.iter().map(String::as_str).collect::<Vec<_>>().join(",");
        writer.add_variant(&record)?;
        writer.append_genotypes_unchecked(calls.view(), merged.len())?;
        if ploidy > 1 {
            writer.append_phase(merge_phase(&sources, &offsets, sample_ids.len(), ploidy)?)?;
        }
        for (name, spec) in &fields {
            // first claiming file with the field supplies the value
            let value = sources.iter().find_map(|s| s.info.get(name));
            writer.append_info(name, &merge_info(name, spec, value, global)?)?;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Merged {} files into {} variants and {} samples",
        files.len(),
        plan.num_variants(),
        sample_ids.len()
    );
    writer.into_container()
}

fn read_source(
    file: &mut SeqFile,
    index: usize,
    variant: usize,
    fields: &IndexMap<String, InfoSpec>,
) -> Result<Source> {
    let mut mask = bitvec![0; file.num_variants()];
    mask.set(variant, true);
    let mut scope = file.scope(Some(mask), None)?;
    let opts = ReadOptions::default();

    let chromosome = first_text(&mut scope, CHROMOSOME)?;
    let position = scope
        .read_var(POSITION, &opts)?
        .data()
        .to_vec::<i32>()
        .and_then(|v| v.first().copied())
        .ok_or_else(|| eyre!("No position for variant {}", variant + 1))?;
    let allele = first_text(&mut scope, ALLELE)?;
    let mut record = VariantRecord::new(chromosome, position, allele);
    if has_node(&scope, ANNOT_ID)? {
        record.id = first_text(&mut scope, ANNOT_ID)?;
    }
    if has_node(&scope, ANNOT_QUAL)? {
        if let Some(qual) = scope
            .read_var(ANNOT_QUAL, &opts)?
            .data()
            .to_vec::<f64>()
            .and_then(|v| v.first().copied())
        {
            record.qual = qual;
        }
    }
    if has_node(&scope, ANNOT_FILTER)? {
        record.filter = first_text(&mut scope, ANNOT_FILTER)?;
    }

    let binding = scope.resolve_var("genotype")?;
    let planes = match &binding.kind {
        VarKind::Genotype { planes } => planes,
        other => return Err(eyre!("'genotype' resolved to {:?}", other)),
    };
    let num_alleles = [allele_count(&record.allele)];
    let calls = GenotypeRequest {
        path: GENOTYPE_DATA,
        planes,
        num_alleles: &num_alleles,
        variants: scope.selection().variant(),
        samples: scope.selection().sample(),
        ploidy: scope.ploidy(),
    }
    .decode_unchecked(scope.container())?
    .index_axis(Axis(0), 0)
    .to_owned();

    let phase = if scope.ploidy() > 1 {
        scope
            .read_var("phase", &opts)?
            .data()
            .to_vec::<u8>()
            .ok_or_else(|| eyre!("'{}' must hold uint8 flags", PHASE_DATA))?
    } else {
        Vec::new()
    };

    let mut info = IndexMap::new();
    for name in fields.keys() {
        let path = format!("{}{}", INFO_PREFIX, name);
        if has_node(&scope, &path)? {
            let value = scope.read_var(&path, &opts)?;
            info.insert(name.clone(), value);
        }
    }

    Ok(Source {
        file: index,
        record,
        calls,
        phase,
        info,
    })
}

fn first_text(file: &mut SeqFile, name: &str) -> Result<String> {
    file.read_var(name, &ReadOptions::default())?
        .data()
        .to_text()
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("No '{}' value for the selected variant", name))
}

fn has_node(file: &SeqFile, path: &str) -> Result<bool> {
    Ok(file.container().resolve_child(path, false)?.is_some())
}

/// Remapped calls of every sample, (sample, ploidy); samples of files that
/// do not claim the variant are missing
fn merge_genotypes(
    sources: &[Source],
    merged: &indexmap::IndexSet<String>,
    offsets: &[usize],
    num_samples: usize,
    ploidy: usize,
    global: usize,
) -> Result<Array2<i32>> {
    let mut calls = Array2::from_elem((num_samples, ploidy), MISSING_I32);
    for source in sources {
        let map = allele_map(&source.record.allele, merged)
            .wrap_err_with(|| format!("File {} at merged variant {}", source.file + 1, global))?;
        let remapped = remap_calls(source.calls.view(), &map, source.file + 1, global);
        let start = offsets[source.file];
        calls
            .slice_mut(s![start..start + remapped.nrows(), ..])
            .assign(&remapped);
    }
    Ok(calls)
}

/// One record of `phase/data`; files that do not claim the variant are
/// unphased
fn merge_phase(sources: &[Source], offsets: &[usize], num_samples: usize, ploidy: usize) -> Result<NodeData> {
    let per_sample = ploidy - 1;
    let mut phase = vec![0u8; num_samples * per_sample];
    for source in sources {
        let start = offsets[source.file] * per_sample;
        let rows = source.calls.nrows() * per_sample;
        if source.phase.len() != rows {
            return Err(SeqError::integrity(format!(
                "File {} has {} phase flags for {} samples of ploidy {}",
                source.file + 1,
                source.phase.len(),
                source.calls.nrows(),
                ploidy
            ))
            .into());
        }
        phase[start..start + rows].copy_from_slice(&source.phase);
    }
    NodeData::from_shape_vec(&phase_inner(num_samples, ploidy), phase)
}

/// The record to append for one INFO field
fn merge_info(name: &str, spec: &InfoSpec, value: Option<&VarData>, global: usize) -> Result<NodeData> {
    let value = match value {
        Some(v) => v.data(),
        None => {
            return Ok(match spec.shape {
                FieldShape::Ragged => NodeData::empty(spec.kind, &spec.inner),
                FieldShape::Fixed => NodeData::missing_record(spec.kind, &spec.inner),
            })
        }
    };
    match (spec.shape, value.len()) {
        (FieldShape::Ragged, _) | (FieldShape::Fixed, 1) => Ok(value.clone()),
        (FieldShape::Fixed, 0) => Ok(NodeData::missing_record(spec.kind, &spec.inner)),
        (FieldShape::Fixed, n) => Err(SeqError::validation(format!(
            "INFO field '{}' has {} values at merged variant {} but holds one per variant",
            name, n, global
        ))
        .into()),
    }
}

/// INFO fields of the merged file, in the order first seen across sources.
/// A field stored ragged by any source is ragged in the result.
fn collect_info_fields(files: &[SeqFile], requested: &[String]) -> Result<IndexMap<String, InfoSpec>> {
    let mut found: IndexMap<String, InfoSpec> = IndexMap::new();
    for (f, file) in files.iter().enumerate() {
        let c = file.container();
        for path in c.node_paths() {
            let name = match path.strip_prefix(INFO_PREFIX) {
                Some(name) if !name.starts_with('@') && !name.contains('/') => name,
                _ => continue,
            };
            let node = c
                .resolve_child(&path, true)?
                .ok_or_else(|| eyre!("No node '{}'", path))?;
            let ragged = c
                .resolve_child(&format!("{}@{}", INFO_PREFIX, name), false)?
                .is_some();
            let spec = InfoSpec {
                kind: node.kind,
                inner: node.dims[1..].to_vec(),
                shape: if ragged {
                    FieldShape::Ragged
                } else {
                    FieldShape::Fixed
                },
            };
            match found.get_mut(name) {
                None => {
                    found.insert(name.to_string(), spec);
                }
                Some(seen) if seen.kind != spec.kind || seen.inner != spec.inner => {
                    return Err(SeqError::validation(format!(
                        "INFO field '{}' of file {} is {} {:?}, an earlier file has {} {:?}",
                        name,
                        f + 1,
                        spec.kind,
                        spec.inner,
                        seen.kind,
                        seen.inner
                    ))
                    .into());
                }
                Some(seen) => {
                    if spec.shape == FieldShape::Ragged {
                        seen.shape = FieldShape::Ragged;
                    }
                }
            }
        }
    }
    if requested.is_empty() {
        return Ok(found);
    }
    requested
        .iter()
        .map(|name| {
            found
                .get(name)
                .cloned()
                .map(|spec| (name.clone(), spec))
                .ok_or_else(|| {
                    SeqError::validation(format!("No file has INFO field '{}'", name)).into()
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::plan::tests::sites_file;
    use super::*;
    use crate::core::writer::tests::small_file;
    use ndarray::arr2;

    fn reopen(c: MemoryContainer) -> SeqFile {
        SeqFile::open(c).unwrap()
    }

    fn read(file: &mut SeqFile, name: &str) -> VarData {
        file.read_var(name, &ReadOptions::default()).unwrap()
    }

    fn one_sample_file(sample: &str, sites: &[(&str, i32, &str, [[i32; 2]; 1], u8, i32)]) -> SeqFile {
        let mut w = SeqWriter::new(&[sample], 2).unwrap();
        w.add_info("DP", ElementKind::Int32, &[], FieldShape::Fixed)
            .unwrap();
        for &(chrom, pos, allele, calls, phase, dp) in sites {
            w.add_variant(&VariantRecord::new(chrom, pos, allele)).unwrap();
            w.append_genotypes(arr2(&calls).view()).unwrap();
            w.append_phase(NodeData::from_vec(vec![phase])).unwrap();
            w.append_info("DP", &NodeData::from_vec(vec![dp])).unwrap();
        }
        w.finish().unwrap()
    }

    #[test]
    fn test_identity_merge() {
        let mut files = vec![small_file()];
        let merged = reopen(merge_files(&mut files, &MergeOptions::default()).unwrap());
        let mut original = small_file();
        let mut merged = merged;
        for name in [
            "sample.id",
            "variant.id",
            "chromosome",
            "position",
            "allele",
            "genotype",
            "phase",
            "annotation/id",
            "annotation/qual",
            "annotation/filter",
            "annotation/info/DP",
            "annotation/info/AC",
        ] {
            assert_eq!(read(&mut merged, name), read(&mut original, name), "{}", name);
        }
    }

    #[test]
    fn test_allele_union_remaps_genotypes() {
        let mut files = vec![
            one_sample_file("a", &[("1", 10, "A,G", [[0, 1]], 1, 5)]),
            one_sample_file("b", &[("1", 10, "A,T", [[1, 1]], 0, 7)]),
        ];
        let mut merged = reopen(merge_files(&mut files, &MergeOptions::default()).unwrap());
        assert_eq!(read(&mut merged, "allele").data().to_text(), vec!["A,G,T"]);
        assert_eq!(
            read(&mut merged, "genotype").data().to_vec::<i32>().unwrap(),
            vec![0, 1, 2, 2]
        );
        assert_eq!(read(&mut merged, "phase").data().to_vec::<u8>().unwrap(), vec![1, 0]);
        // first claiming file supplies INFO
        assert_eq!(
            read(&mut merged, "annotation/info/DP").data().to_vec::<i32>().unwrap(),
            vec![5]
        );
    }

    #[test]
    fn test_non_contributors_missing() {
        let mut files = vec![
            one_sample_file("a", &[("1", 10, "A,G", [[0, 1]], 1, 5)]),
            one_sample_file("b", &[("1", 20, "C,T", [[1, 0]], 1, 9)]),
        ];
        let mut merged = reopen(merge_files(&mut files, &MergeOptions::default()).unwrap());
        assert_eq!(merged.num_variants(), 2);
        assert_eq!(merged.num_samples(), 2);
        let m = MISSING_I32;
        assert_eq!(
            read(&mut merged, "genotype").data().to_vec::<i32>().unwrap(),
            vec![0, 1, m, m, m, m, 1, 0]
        );
        assert_eq!(
            read(&mut merged, "phase").data().to_vec::<u8>().unwrap(),
            vec![1, 0, 0, 1]
        );
        assert_eq!(
            read(&mut merged, "variant.id").data().to_vec::<i32>().unwrap(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_unclaimed_variant_written_missing() {
        let mut files = vec![one_sample_file(
            "a",
            &[
                ("1", 10, "A,G", [[0, 1]], 1, 5),
                ("1", 20, "C,T", [[1, 1]], 1, 6),
                ("1", 40, "G,A", [[0, 0]], 0, 7),
                ("1", 50, "T,C", [[1, 0]], 1, 8),
            ],
        )];
        let plan = MergePlan::new(5, vec![vec![1, 2, 4, 5]]).unwrap();
        let c = merge_with_plan(&mut files, &plan, &MergeOptions::default()).unwrap();
        let mut merged = reopen(c);
        let m = MISSING_I32;

        assert_eq!(merged.num_variants(), 5);
        assert_eq!(
            read(&mut merged, "allele").data().to_text(),
            vec!["A,G", "C,T", "", "G,A", "T,C"]
        );
        assert_eq!(
            read(&mut merged, "position").data().to_vec::<i32>().unwrap(),
            vec![10, 20, m, 40, 50]
        );
        assert_eq!(
            read(&mut merged, "genotype").data().to_vec::<i32>().unwrap(),
            vec![0, 1, 1, 1, m, m, 0, 0, 1, 0]
        );
        assert_eq!(
            read(&mut merged, "phase").data().to_vec::<u8>().unwrap(),
            vec![1, 1, 0, 0, 1]
        );
        assert_eq!(
            read(&mut merged, "annotation/info/DP").data().to_vec::<i32>().unwrap(),
            vec![5, 6, m, 7, 8]
        );
    }

    #[test]
    fn test_info_defaults_without_contributor() {
        let mut a = SeqWriter::new(&["a"], 2).unwrap();
        a.add_info("AC", ElementKind::Int32, &[], FieldShape::Ragged)
            .unwrap();
        a.add_variant(&VariantRecord::new("1", 10, "A,G")).unwrap();
        a.append_genotypes(arr2(&[[0, 1]]).view()).unwrap();
        a.append_info("AC", &NodeData::from_vec(vec![1, 2])).unwrap();
        let mut files = vec![
            a.finish().unwrap(),
            one_sample_file("b", &[("1", 20, "C,T", [[1, 0]], 1, 9)]),
        ];
        let mut merged = reopen(merge_files(&mut files, &MergeOptions::default()).unwrap());
        let ac = read(&mut merged, "annotation/info/AC");
        assert_eq!(ac.lengths(), Some(&[2, 0][..]));
        assert_eq!(ac.data().to_vec::<i32>().unwrap(), vec![1, 2]);
        assert_eq!(
            read(&mut merged, "annotation/info/DP").data().to_vec::<i32>().unwrap(),
            vec![MISSING_I32, 9]
        );
    }

    #[test]
    fn test_requested_info_fields() {
        let mut files = vec![small_file()];
        let options = MergeOptions {
            info_fields: vec!["DP".to_string()],
            ..Default::default()
        };
        let c = merge_files(&mut files, &options).unwrap();
        assert!(c.get("annotation/info/DP").is_some());
        assert!(c.get("annotation/info/AC").is_none());

        let options = MergeOptions {
            info_fields: vec!["NOPE".to_string()],
            ..Default::default()
        };
        assert!(merge_files(&mut files, &options).is_err());
    }

    #[test]
    fn test_selection_limits_sources() {
        let mut file = small_file();
        file.set_variant_mask(bitvec![0, 1, 0, 1]).unwrap();
        file.set_sample_mask(bitvec![1, 0, 1]).unwrap();
        let mut merged = reopen(merge_files(&mut [file], &MergeOptions::default()).unwrap());
        assert_eq!(read(&mut merged, "sample.id").data().to_text(), vec!["s1", "s3"]);
        assert_eq!(
            read(&mut merged, "$chrom_pos").data().to_text(),
            vec!["chr1:200", "chr2:100"]
        );
        let m = MISSING_I32;
        assert_eq!(
            read(&mut merged, "genotype").data().to_vec::<i32>().unwrap(),
            vec![2, 0, 0, 0, 1, 0, m, m]
        );
    }

    #[test]
    fn test_stray_genotype_kept() {
        let mut w = SeqWriter::new(&["a"], 2).unwrap();
        w.add_variant(&VariantRecord::new("1", 10, "A,G")).unwrap();
        // code 2 on a two-allele site
        w.append_genotypes_unchecked(arr2(&[[0, 2]]).view(), 2)
            .unwrap();
        let mut files = vec![w.finish().unwrap()];
        let mut merged = reopen(merge_files(&mut files, &MergeOptions::default()).unwrap());
        assert_eq!(
            merged
                .read_var("genotype", &ReadOptions::default())
                .unwrap_err()
                .downcast_ref::<SeqError>()
                .map(|e| matches!(e, SeqError::Integrity(_))),
            Some(true)
        );
        let c = merged.container();
        assert_eq!(c.dims(GENOTYPE_DATA).unwrap(), vec![1, 1, 2]);
    }

    #[test]
    fn test_duplicate_samples_rejected() {
        let mut files = vec![
            sites_file(&[("1", 10, "A,G")]),
            sites_file(&[("1", 20, "A,G")]),
        ];
        let err = merge_files(&mut files, &MergeOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeqError>(),
            Some(SeqError::Validation(_))
        ));
    }

    #[test]
    fn test_ploidy_mismatch_rejected() {
        let mut haploid = SeqWriter::new(&["h"], 1).unwrap();
        haploid
            .add_variant(&VariantRecord::new("1", 10, "A,G"))
            .unwrap();
        haploid.append_genotypes(arr2(&[[1]]).view()).unwrap();
        let mut files = vec![haploid.finish().unwrap(), small_file()];
        assert!(merge_files(&mut files, &MergeOptions::default()).is_err());
    }
}
