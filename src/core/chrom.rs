use bitvec::prelude::*;
use indexmap::IndexSet;
use std::ops::Range;

/// One run of consecutive variants on the same chromosome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromRun {
    pub label: String,
    pub count: usize,
}

/// Run-length map from variant ordinal to chromosome label.
///
/// A label may appear in several runs when the file is not grouped by
/// chromosome; runs are kept in storage order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChromIndex {
    runs: Vec<ChromRun>,
    // exclusive end ordinal of each run
    ends: Vec<usize>,
}

impl ChromIndex {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut runs: Vec<ChromRun> = Vec::new();
        for label in labels {
            let label = label.as_ref();
            match runs.last_mut() {
                Some(run) if run.label == label => run.count += 1,
                _ => runs.push(ChromRun {
                    label: label.to_string(),
                    count: 1,
                }),
            }
        }
        Self::from_runs(runs)
    }

    pub fn from_runs(runs: Vec<ChromRun>) -> Self {
        let runs: Vec<ChromRun> = runs.into_iter().filter(|r| r.count > 0).collect();
        let ends = runs
            .iter()
            .scan(0usize, |acc, r| {
                *acc += r.count;
                Some(*acc)
            })
            .collect();
        Self { runs, ends }
    }

    pub fn runs(&self) -> &[ChromRun] {
        &self.runs
    }

    /// Number of variants covered
    pub fn len(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, variant: usize) -> Option<&str> {
        let run = self.ends.partition_point(|&end| end <= variant);
        self.runs.get(run).map(|r| r.label.as_str())
    }

    /// Labels of the selected variants, one per set bit of `mask`
    pub fn decode_masked(&self, mask: &BitSlice) -> Vec<String> {
        let mut out = Vec::with_capacity(mask.count_ones());
        let mut run = 0;
        for i in mask.iter_ones() {
            while run < self.ends.len() && self.ends[run] <= i {
                run += 1;
            }
            match self.runs.get(run) {
                Some(r) => out.push(r.label.clone()),
                None => break,
            }
        }
        out
    }

    /// Distinct chromosome labels in first-seen order
    pub fn labels(&self) -> IndexSet<&str> {
        self.runs.iter().map(|r| r.label.as_str()).collect()
    }

    /// Variant ordinal ranges stored under `label`
    pub fn ranges_of(&self, label: &str) -> Vec<Range<usize>> {
        let mut start = 0;
        let mut out = Vec::new();
        for (run, &end) in self.runs.iter().zip(&self.ends) {
            if run.label == label {
                out.push(start..end);
            }
            start = end;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<&'static str> {
        vec!["chr1", "chr1", "chr1", "chr2", "chrX", "chrX", "chr1"]
    }

    #[test]
    fn test_runs_compress_consecutive_labels() {
        let idx = ChromIndex::from_labels(labels());
        assert_eq!(idx.runs().len(), 4);
        assert_eq!(idx.len(), 7);
        assert_eq!(idx.runs()[0].count, 3);
        assert_eq!(idx.get(0), Some("chr1"));
        assert_eq!(idx.get(3), Some("chr2"));
        assert_eq!(idx.get(5), Some("chrX"));
        assert_eq!(idx.get(6), Some("chr1"));
        assert_eq!(idx.get(7), None);
    }

    #[test]
    fn test_decode_full_mask_reproduces_labels() {
        let idx = ChromIndex::from_labels(labels());
        let all = bitvec![1; 7];
        assert_eq!(idx.decode_masked(&all), labels());
    }

    #[test]
    fn test_decode_partial_mask() {
        let idx = ChromIndex::from_labels(labels());
        let mask = bitvec![0, 1, 0, 1, 0, 0, 1];
        assert_eq!(idx.decode_masked(&mask), vec!["chr1", "chr2", "chr1"]);
        assert!(idx.decode_masked(&bitvec![0; 7]).is_empty());
    }

    #[test]
    fn test_labels_and_ranges() {
        let idx = ChromIndex::from_labels(labels());
        let names: Vec<_> = idx.labels().into_iter().collect();
        assert_eq!(names, vec!["chr1", "chr2", "chrX"]);
        assert_eq!(idx.ranges_of("chr1"), vec![0..3, 6..7]);
        assert!(idx.ranges_of("chr9").is_empty());
    }

    #[test]
    fn test_zero_count_runs_dropped() {
        let idx = ChromIndex::from_runs(vec![
            ChromRun {
                label: "chr1".into(),
                count: 0,
            },
            ChromRun {
                label: "chr2".into(),
                count: 2,
            },
        ]);
        assert_eq!(idx.runs().len(), 1);
        assert_eq!(idx.get(1), Some("chr2"));
    }
}
