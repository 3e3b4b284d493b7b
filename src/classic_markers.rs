//! C7: classic marker chooser. Picks the top-N most differentially expressed
//! genes for every label pair from one or more representative profile
//! matrices (§4.6).

use std::sync::Mutex;

use fnv::FnvHashMap;

use crate::error::{Result, SinglePpError};
use crate::markers::{Label, Markers};
use crate::matrix::{densify, ExpressionMatrix};
use crate::parallel::{self, parallelize};
use crate::rank::GeneIx;

/// `number`/`num_threads` as used by [`choose_classic_markers`]. `number < 0`
/// resolves to `round(500 * (2/3)^log2(num_labels))`, the reference
/// implementation's own default (§4.6).
#[derive(Clone, Copy, Debug)]
pub struct ChooseMarkersOptions {
    pub number: i32,
    pub num_threads: i32,
}

impl Default for ChooseMarkersOptions {
    fn default() -> Self {
        ChooseMarkersOptions { number: -1, num_threads: 0 }
    }
}

fn default_marker_count(num_labels: usize) -> usize {
    let l = (num_labels.max(1) as f64).log2();
    (500.0 * (2.0f64 / 3.0).powf(l)).round() as usize
}

/// For representative `r`, column index for each label actually present
/// (first occurrence wins if a label somehow labels more than one column).
fn column_for_label(labels: &[Label]) -> FnvHashMap<Label, usize> {
    let mut map = FnvHashMap::default();
    for (col, &l) in labels.iter().enumerate() {
        map.entry(l).or_insert(col);
    }
    map
}

/// Sums `profile_a[g] - profile_b[g]` over every representative in which both
/// `a` and `b` are present, gene by gene. Returns `None` if no representative
/// carries both labels.
fn difference_sum(
    representatives: &[&dyn ExpressionMatrix],
    columns: &[FnvHashMap<Label, usize>],
    a: Label,
    b: Label,
    num_genes: usize,
) -> Option<Vec<f64>> {
    let rows: Vec<u32> = (0..num_genes as u32).collect();
    let mut sum = vec![0.0; num_genes];
    let mut any = false;
    for (r, cols) in columns.iter().enumerate() {
        if let (Some(&ca), Some(&cb)) = (cols.get(&a), cols.get(&b)) {
            any = true;
            let pa = densify(representatives[r].extract_column(ca, &rows), num_genes);
            let pb = densify(representatives[r].extract_column(cb, &rows), num_genes);
            for g in 0..num_genes {
                sum[g] += pa[g] - pb[g];
            }
        }
    }
    any.then_some(sum)
}

/// Top-N most positive entries of `diff`, ties broken by smaller gene index,
/// floored to strictly positive values (§4.6's "negative-difference floor",
/// applied here to the positive-direction list).
fn top_positive(diff: &[f64], n: usize) -> Vec<GeneIx> {
    let mut candidates: Vec<(f64, u32)> =
        diff.iter().enumerate().filter(|&(_, &d)| d > 0.0).map(|(g, &d)| (d, g as u32)).collect();
    candidates.sort_by(|x, y| y.0.partial_cmp(&x.0).unwrap().then(x.1.cmp(&y.1)));
    candidates.truncate(n);
    candidates.into_iter().map(|(_, g)| g).collect()
}

/// Top-N most negative entries of `diff` (smaller gene index wins ties),
/// floored to strictly negative values.
fn top_negative(diff: &[f64], n: usize) -> Vec<GeneIx> {
    let mut candidates: Vec<(f64, u32)> =
        diff.iter().enumerate().filter(|&(_, &d)| d < 0.0).map(|(g, &d)| (d, g as u32)).collect();
    candidates.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap().then(x.1.cmp(&y.1)));
    candidates.truncate(n);
    candidates.into_iter().map(|(_, g)| g).collect()
}

/// Chooses top-N pairwise markers from one or more representative matrices
/// (§4.6). `representative_labels[r]` gives the label for column `c` of
/// `representatives[r]`; a representative need not carry every label.
pub fn choose_classic_markers(
    representatives: &[&dyn ExpressionMatrix],
    representative_labels: &[Vec<Label>],
    num_labels: usize,
    opts: &ChooseMarkersOptions,
) -> Result<Markers> {
    if representatives.is_empty() {
        return Err(SinglePpError::empty_input("choose_classic_markers: no representative matrices given"));
    }
    if representatives.len() != representative_labels.len() {
        return Err(SinglePpError::shape_mismatch(format!(
            "{} representatives but {} label vectors",
            representatives.len(),
            representative_labels.len()
        )));
    }
    let num_genes = representatives[0].nrow();
    for (r, rep) in representatives.iter().enumerate() {
        if rep.nrow() != num_genes {
            return Err(SinglePpError::shape_mismatch(format!(
                "representative {r} has {} rows, expected {num_genes}",
                rep.nrow()
            )));
        }
        if rep.ncol() != representative_labels[r].len() {
            return Err(SinglePpError::shape_mismatch(format!(
                "representative {r} has {} columns but {} labels were given",
                rep.ncol(),
                representative_labels[r].len()
            )));
        }
        for &l in &representative_labels[r] {
            if l as usize >= num_labels {
                return Err(SinglePpError::out_of_range(format!(
                    "label {l} in representative {r} exceeds {num_labels} labels known"
                )));
            }
        }
    }

    let n = if opts.number < 0 { default_marker_count(num_labels) } else { opts.number as usize };
    let columns: Vec<FnvHashMap<Label, usize>> =
        representative_labels.iter().map(|labs| column_for_label(labs)).collect();

    let pairs: Vec<(Label, Label)> =
        (0..num_labels as Label).flat_map(|a| ((a + 1)..num_labels as Label).map(move |b| (a, b))).collect();
    let num_threads = parallel::resolve_num_threads(opts.num_threads);

    // results[p] = Some((a_over_b, b_over_a)) once the pair has been scored;
    // None stays for pairs with no co-occurring representative.
    let results: Mutex<Vec<Option<(Vec<GeneIx>, Vec<GeneIx>)>>> = Mutex::new((0..pairs.len()).map(|_| None).collect());
    parallelize(pairs.len(), num_threads, |_worker, start, len| {
        for p in start..start + len {
            let (a, b) = pairs[p];
            if let Some(diff) = difference_sum(representatives, &columns, a, b, num_genes) {
                let a_over_b = top_positive(&diff, n);
                let b_over_a = top_negative(&diff, n);
                results.lock().unwrap()[p] = Some((a_over_b, b_over_a));
            }
        }
        Ok(())
    })?;

    let mut markers = Markers::new(num_labels);
    for (p, outcome) in results.into_inner().unwrap().into_iter().enumerate() {
        let (a, b) = pairs[p];
        if let Some((a_over_b, b_over_a)) = outcome {
            markers.set(a, b, a_over_b);
            markers.set(b, a, b_over_a);
        }
    }

    log::debug!("chose classic markers for {num_labels} labels, top {n}, across {} representatives", representatives.len());
    Ok(markers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DenseMatrix;
    use pretty_assertions::assert_eq;

    #[test]
    fn picks_up_and_down_genes_for_a_clear_signal() {
        // 4 genes, label 0 high on gene 0, label 1 high on gene 3.
        let rep = DenseMatrix::from_columns(4, vec![vec![10.0, 1.0, 1.0, 0.0], vec![0.0, 1.0, 1.0, 10.0]]).unwrap();
        let labels = vec![vec![0u32, 1u32]];
        let reps: Vec<&dyn ExpressionMatrix> = vec![&rep];
        let opts = ChooseMarkersOptions { number: 2, num_threads: 1 };
        let markers = choose_classic_markers(&reps, &labels, 2, &opts).unwrap();
        assert_eq!(markers.get(0, 1), &[0]); // up in 0 relative to 1
        assert_eq!(markers.get(1, 0), &[3]); // up in 1 relative to 0
    }

    #[test]
    fn label_pair_absent_from_every_representative_yields_no_markers() {
        let rep = DenseMatrix::from_columns(3, vec![vec![1.0, 2.0, 3.0]]).unwrap();
        let labels = vec![vec![0u32]]; // label 1 never present
        let reps: Vec<&dyn ExpressionMatrix> = vec![&rep];
        let markers = choose_classic_markers(&reps, &labels, 2, &ChooseMarkersOptions::default()).unwrap();
        assert!(markers.get(0, 1).is_empty());
        assert!(markers.get(1, 0).is_empty());
    }

    #[test]
    fn default_marker_count_shrinks_with_more_labels() {
        assert_eq!(default_marker_count(1), 500);
        assert!(default_marker_count(10) < default_marker_count(2));
    }

    #[test]
    fn rejects_out_of_range_label() {
        let rep = DenseMatrix::from_columns(2, vec![vec![1.0, 2.0]]).unwrap();
        let labels = vec![vec![5u32]];
        let reps: Vec<&dyn ExpressionMatrix> = vec![&rep];
        let err = choose_classic_markers(&reps, &labels, 2, &ChooseMarkersOptions::default()).unwrap_err();
        assert!(matches!(err, SinglePpError::OutOfRange { .. }));
    }
}
