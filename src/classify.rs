//! C5: single-reference classification. Per test cell, scales ranks over the
//! trained marker subset, runs a KMKNN k-NN search per label, converts the
//! resulting distances to a quantile-interpolated score, and (optionally)
//! fine-tunes by iteratively restricting to pairwise markers among the
//! surviving top labels (§4.5).

use std::sync::Mutex;

use crate::error::{Result, SinglePpError};
use crate::kmknn::{find_closest_neighbors, FindClosestNeighborsWorkspace, LabelRef, QueryProfile};
use crate::markers::{self, Label, Markers};
use crate::matrix::{Extracted, ExpressionMatrix};
use crate::parallel::{self, parallelize};
use crate::profile::{rank_profile, ProfileRank};
use crate::quantile;
use crate::rank::{self, GeneIx};
use crate::subset::{SubsetRemapper, SubsetSanitizer};
use crate::train::{TrainedSingle, TrainedSingleIntersect};

/// `quantile`/`fine_tune`/`fine_tune_threshold`/`num_threads` as used by both
/// [`classify_single`] and [`classify_single_intersect`] (§4.5, §6.4). The
/// defaults match the reference implementation's own CLI defaults.
#[derive(Clone, Copy, Debug)]
pub struct ClassifyOptions {
    pub quantile: f64,
    pub fine_tune: bool,
    pub fine_tune_threshold: f64,
    pub num_threads: i32,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        ClassifyOptions { quantile: 0.8, fine_tune: true, fine_tune_threshold: 0.05, num_threads: 0 }
    }
}

/// Owned classification output: cell ordering matches the test matrix's
/// column order (§5 "Ordering guarantees").
#[derive(Clone, Debug, Default)]
pub struct SingleResult {
    pub best: Vec<Label>,
    /// `scores[cell][label]`, the pre-fine-tune quantile score (fine-tuning
    /// only ever refines `best`/`delta`, never rewrites this matrix — see
    /// DESIGN.md's note on the open question in §9).
    pub scores: Vec<Vec<f64>>,
    pub delta: Vec<f64>,
}

/// Per-worker scratch reused across cells: one k-NN workspace and one
/// fine-tuning workspace, both sized once before the parallel region begins
/// (§5 "Per-worker scratch").
struct ClassifyWorkspace {
    knn: FindClosestNeighborsWorkspace,
    fine_tune: FineTuneWorkspace,
    scores: Vec<f64>,
}

impl ClassifyWorkspace {
    fn new(num_markers: usize, num_labels: usize) -> Self {
        ClassifyWorkspace {
            knn: FindClosestNeighborsWorkspace::new(num_markers),
            fine_tune: FineTuneWorkspace::new(num_markers),
            scores: vec![0.0; num_labels],
        }
    }
}

/// A `SubsetRemapper` plus the one scratch buffer fine-tuning needs to
/// densify a sparse profile for an `l2_dense_*` call.
struct FineTuneWorkspace {
    remapper: SubsetRemapper,
    scratch: Vec<f64>,
}

impl FineTuneWorkspace {
    fn new(capacity: usize) -> Self {
        FineTuneWorkspace { remapper: SubsetRemapper::new(capacity as u32), scratch: vec![0.0; capacity] }
    }
}

/// A scaled-rank profile rebuilt fresh from raw (simplified) rank streams
/// under a fine-tuning miniverse; mirrors [`QueryProfile`] but owns its data,
/// since both the test cell and every candidate reference profile need one
/// rebuilt per fine-tuning iteration.
enum ScaledProfile {
    Dense(Vec<f64>),
    Sparse { zero: f64, nonzero: Vec<(f64, GeneIx)>, has_nonzero: bool },
}

impl ScaledProfile {
    fn as_query(&self) -> QueryProfile<'_> {
        match self {
            ScaledProfile::Dense(v) => QueryProfile::Dense(v),
            ScaledProfile::Sparse { zero, nonzero, has_nonzero } => {
                QueryProfile::Sparse { nonzero, zero: *zero, has_nonzero: *has_nonzero }
            }
        }
    }
}

/// Remaps+rescales a dense profile's simplified all-ranks stream through
/// `remapper`, scattering the result into a dense `k`-length vector (a dense
/// profile covers every miniverse gene, so the scatter always fills the
/// whole buffer — see DESIGN.md).
fn remap_dense_profile(all_ranked: &[(u32, GeneIx)], remapper: &SubsetRemapper, k: usize) -> ScaledProfile {
    let as_f64: Vec<(f64, GeneIx)> = all_ranked.iter().map(|&(v, ix)| (v as f64, ix)).collect();
    let remapped = remapper.remap(&as_f64);
    let values: Vec<f64> = remapped.iter().map(|&(v, _)| v).collect();
    let scaled = rank::rescale_sorted(&values);
    let mut out = vec![0.0; k];
    for ((_, ix), s) in remapped.iter().zip(scaled) {
        out[*ix as usize] = s;
    }
    ScaledProfile::Dense(out)
}

/// Remaps+rescales a sparse profile's simplified negative/positive rank
/// streams through `remapper` under the current miniverse size `k`.
fn remap_sparse_profile(
    negative_ranked: &[(u32, GeneIx)],
    positive_ranked: &[(u32, GeneIx)],
    remapper: &SubsetRemapper,
    k: usize,
) -> ScaledProfile {
    let neg_f64: Vec<(f64, GeneIx)> = negative_ranked.iter().map(|&(v, ix)| (v as f64, ix)).collect();
    let pos_f64: Vec<(f64, GeneIx)> = positive_ranked.iter().map(|&(v, ix)| (v as f64, ix)).collect();
    let neg_remapped = remapper.remap(&neg_f64);
    let pos_remapped = remapper.remap(&pos_f64);
    let has_nonzero = !(neg_remapped.is_empty() && pos_remapped.is_empty());
    let (zero, nonzero) = rank::rescale_presplit_sparse(&neg_remapped, &pos_remapped, k);
    ScaledProfile::Sparse { zero, nonzero, has_nonzero }
}

/// L2 between two freshly rebuilt fine-tuning profiles, dispatching across
/// the four dense/sparse combinations the way [`LabelRef::l2_to_query`] does
/// for the KMKNN path (§9 "route through a small dispatcher").
fn l2_scaled(num_markers: usize, a: &ScaledProfile, b: &ScaledProfile, scratch: &mut [f64]) -> f64 {
    match (a, b) {
        (ScaledProfile::Dense(ad), ScaledProfile::Dense(bd)) => rank::l2_dense_dense(ad, bd),
        (ScaledProfile::Dense(ad), ScaledProfile::Sparse { zero, nonzero, .. }) => {
            rank::l2_dense_sparse(num_markers, ad, true, nonzero, *zero)
        }
        (ScaledProfile::Sparse { zero, nonzero, .. }, ScaledProfile::Dense(bd)) => {
            rank::l2_dense_sparse(num_markers, bd, true, nonzero, *zero)
        }
        (
            ScaledProfile::Sparse { zero: az, nonzero: an, has_nonzero },
            ScaledProfile::Sparse { zero: bz, nonzero: bn, .. },
        ) => rank::l2_sparse_sparse(num_markers, an, *az, *has_nonzero, bn, *bz, scratch),
    }
}

/// Rebuilds the test query under the current miniverse from its cached raw
/// rank streams.
fn remap_test_query(profile: &ProfileRank, remapper: &SubsetRemapper, k: usize) -> ScaledProfile {
    match profile {
        ProfileRank::Dense { all_ranked, .. } => remap_dense_profile(all_ranked, remapper, k),
        ProfileRank::Sparse { negative_ranked, positive_ranked, .. } => {
            remap_sparse_profile(negative_ranked, positive_ranked, remapper, k)
        }
    }
}

/// Scores one label's every profile against `query` under the current
/// miniverse, aggregating per-profile correlations via the quantile policy
/// (§4.5 step 4, "implemented on a small vector via an `nth_element`-like
/// partial ordering" — here, [`quantile::score_from_all_correlations`]).
fn score_label_fine_tuned(
    label_ref: &LabelRef,
    query: &ScaledProfile,
    remapper: &SubsetRemapper,
    k: usize,
    quantile: f64,
    scratch: &mut [f64],
) -> f64 {
    let correlations: Vec<f64> = match label_ref {
        LabelRef::Dense(d) => d
            .all_ranked
            .iter()
            .map(|all_ranked| {
                let profile = remap_dense_profile(all_ranked, remapper, k);
                rank::l2_to_correlation(l2_scaled(k, query, &profile, scratch))
            })
            .collect(),
        LabelRef::Sparse(s) => (0..s.num_samples)
            .map(|i| {
                let profile = remap_sparse_profile(&s.negative_ranked[i], &s.positive_ranked[i], remapper, k);
                rank::l2_to_correlation(l2_scaled(k, query, &profile, scratch))
            })
            .collect(),
    };
    quantile::score_from_all_correlations(&correlations, quantile)
}

/// One fine-tuning iteration's miniverse: the sorted union of pairwise
/// markers among `labels_in_use`, assembled into `workspace.remapper`.
fn rebuild_miniverse(markers: &Markers, labels_in_use: &[Label], workspace: &mut FineTuneWorkspace) -> usize {
    workspace.remapper.clear();
    let mut union: Vec<GeneIx> = markers::union_markers_among(markers, labels_in_use).into_iter().collect();
    union.sort_unstable();
    for g in union {
        workspace.remapper.add(g);
    }
    workspace.remapper.len()
}

/// Runs the fine-tuning loop of §4.5 to completion, returning the `(best,
/// delta)` pair from the last computed round (never a stale pre-loop
/// snapshot — see §9's open question and DESIGN.md).
fn fine_tune_single(
    markers: &Markers,
    built: &[LabelRef],
    test_profile: &ProfileRank,
    quantile: f64,
    threshold: f64,
    initial_scores: &[f64],
    workspace: &mut FineTuneWorkspace,
) -> (Label, f64) {
    let num_labels = initial_scores.len();
    let bound0 = initial_scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max) - threshold;
    let mut labels_in_use: Vec<Label> =
        (0..num_labels as Label).filter(|&l| initial_scores[l as usize] >= bound0).collect();

    if labels_in_use.len() <= 1 || labels_in_use.len() == num_labels {
        let (best_ix, delta) = quantile::find_best_and_delta(initial_scores);
        return (best_ix as Label, delta);
    }

    loop {
        let k = rebuild_miniverse(markers, &labels_in_use, workspace);
        let query = remap_test_query(test_profile, &workspace.remapper, k);

        let round_scores: Vec<f64> = labels_in_use
            .iter()
            .map(|&l| score_label_fine_tuned(&built[l as usize], &query, &workspace.remapper, k, quantile, &mut workspace.scratch))
            .collect();

        let bound = round_scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max) - threshold;
        let new_labels_in_use: Vec<Label> = labels_in_use
            .iter()
            .zip(round_scores.iter())
            .filter(|&(_, &s)| s >= bound)
            .map(|(&l, _)| l)
            .collect();

        if new_labels_in_use.len() == labels_in_use.len() {
            let (best_pos, delta) = quantile::find_best_and_delta(&round_scores);
            return (labels_in_use[best_pos], delta);
        }
        if new_labels_in_use.len() == 1 {
            // the deciding round already has >= 2 candidates scored in
            // `round_scores`; take the margin from that round rather than
            // looping again over a single-label (empty) miniverse, which
            // would otherwise report a NaN delta.
            let (best_pos, delta) = quantile::find_best_and_delta(&round_scores);
            return (labels_in_use[best_pos], delta);
        }
        labels_in_use = new_labels_in_use;
    }
}

/// Builds the KMKNN query form of a freshly ranked test profile.
fn query_profile(profile: &ProfileRank) -> QueryProfile<'_> {
    match profile {
        ProfileRank::Dense { scaled, .. } => QueryProfile::Dense(scaled),
        ProfileRank::Sparse { zero_scaled, nonzero_scaled, .. } => {
            QueryProfile::Sparse { nonzero: nonzero_scaled, zero: *zero_scaled, has_nonzero: !nonzero_scaled.is_empty() }
        }
    }
}

/// Scores every label against one test cell via KMKNN + quantile
/// interpolation, then (if enabled and more than one label is in play)
/// fine-tunes, writing the per-label scores into `ws.scores` and returning
/// `(best, delta)` (§4.5 steps 1-4 plus the fine-tuning loop).
fn classify_one_cell(
    profile: &ProfileRank,
    markers: &Markers,
    built: &[LabelRef],
    opts: &ClassifyOptions,
    ws: &mut ClassifyWorkspace,
) -> (Label, f64) {
    let query = query_profile(profile);
    for (label, label_ref) in built.iter().enumerate() {
        let n = label_ref.num_samples();
        let details = quantile::prepare_quantile_details(n, opts.quantile);
        let k = details.k().min(n);
        find_closest_neighbors(&query, k, label_ref, &mut ws.knn);
        let popped = ws.knn.furthest_first();
        let lower = rank::l2_to_correlation(popped[0].l2);
        let upper =
            if details.interpolate() { rank::l2_to_correlation(popped[details.upper_offset()].l2) } else { lower };
        ws.scores[label] = details.combine(lower, upper);
    }

    let (best, delta) = quantile::find_best_and_delta(&ws.scores);
    if opts.fine_tune && built.len() > 1 {
        let (ft_best, ft_delta) = fine_tune_single(
            markers,
            built,
            profile,
            opts.quantile,
            opts.fine_tune_threshold,
            &ws.scores,
            &mut ws.fine_tune,
        );
        log::trace!("fine-tuned cell: pre={best} post={ft_best} delta={ft_delta}");
        (ft_best, ft_delta)
    } else {
        (best as Label, delta)
    }
}

/// Classifies every column of `test` against `trained` (§4.5). `test` must
/// share `trained`'s gene space exactly (`test.nrow() == trained.test_nrow`);
/// use [`classify_single_intersect`] when the gene spaces merely overlap.
pub fn classify_single(test: &dyn ExpressionMatrix, trained: &TrainedSingle, opts: &ClassifyOptions) -> Result<SingleResult> {
    if test.nrow() != trained.test_nrow {
        return Err(SinglePpError::shape_mismatch(format!(
            "test matrix has {} rows, trained reference expects {}",
            test.nrow(),
            trained.test_nrow
        )));
    }
    let ncol = test.ncol();
    let num_labels = trained.built.len();
    let num_markers = trained.subset.len();
    let num_threads = parallel::resolve_num_threads(opts.num_threads);

    let best = Mutex::new(vec![0u32; ncol]);
    let scores = Mutex::new(vec![vec![0.0; num_labels]; ncol]);
    let delta = Mutex::new(vec![0.0; ncol]);

    parallelize(ncol, num_threads, |_worker, start, len| {
        let mut ws = ClassifyWorkspace::new(num_markers, num_labels);
        for c in start..start + len {
            let extracted = test.extract_column(c, &trained.subset);
            let profile = rank_profile(extracted, num_markers);
            let (cell_best, cell_delta) = classify_one_cell(&profile, &trained.markers, &trained.built, opts, &mut ws);
            best.lock().unwrap()[c] = cell_best;
            scores.lock().unwrap()[c] = ws.scores.clone();
            delta.lock().unwrap()[c] = cell_delta;
        }
        Ok(())
    })?;

    log::debug!("classified {ncol} cells against {num_labels} labels");
    Ok(SingleResult {
        best: best.into_inner().unwrap(),
        scores: scores.into_inner().unwrap(),
        delta: delta.into_inner().unwrap(),
    })
}

/// Re-orders a `trained.test_subset`-indexed extraction (arbitrary order,
/// since `test_subset` is a parallel array to `ref_subset`, not a sorted gene
/// list) back into `test_subset` coordinate order via a [`SubsetSanitizer`],
/// matching the sanitizer's documented contract (§4.2).
fn extract_intersect_column(test: &dyn ExpressionMatrix, col: usize, sanitizer: &SubsetSanitizer, k: usize) -> Extracted<'static> {
    match test.extract_column(col, sanitizer.extraction_subset()) {
        Extracted::Dense(values) => {
            let ranked = sanitizer.fill_ranks_dense(&values);
            let mut out = vec![0.0; k];
            for (v, ix) in ranked {
                out[ix as usize] = v;
            }
            Extracted::Dense(out)
        }
        Extracted::Sparse { values, indices } => {
            let ranked = sanitizer.fill_ranks_sparse(&values, &indices);
            let (out_values, out_indices): (Vec<f64>, Vec<u32>) = ranked.into_iter().unzip();
            Extracted::Sparse { values: out_values, indices: out_indices }
        }
        Extracted::Borrowed(_) => unreachable!("extract_column never returns a borrowed profile"),
    }
}

/// As [`classify_single`], but for a trained reference whose gene identifiers
/// were intersected with the test's at training time (§4.5
/// "classify_single_intersect"). When the trained intersection was empty,
/// every cell's scores are defined as `1.0` (L2 = 0 over zero genes ⇒
/// correlation = 1 by convention), `best = 0`, `delta = 0` (§7 "Empty
/// intersection").
pub fn classify_single_intersect(
    test: &dyn ExpressionMatrix,
    trained: &TrainedSingleIntersect,
    opts: &ClassifyOptions,
) -> Result<SingleResult> {
    if test.nrow() != trained.test_nrow {
        return Err(SinglePpError::shape_mismatch(format!(
            "test matrix has {} rows, trained reference expects {}",
            test.nrow(),
            trained.test_nrow
        )));
    }
    let ncol = test.ncol();
    let num_labels = trained.built.len();

    if trained.ref_subset.is_empty() {
        log::warn!("classify_single_intersect: empty gene intersection, scoring every cell as 1.0 by convention");
        return Ok(SingleResult {
            best: vec![0; ncol],
            scores: vec![vec![1.0; num_labels]; ncol],
            delta: vec![0.0; ncol],
        });
    }

    let num_markers = trained.ref_subset.len();
    let num_threads = parallel::resolve_num_threads(opts.num_threads);
    let sanitizer = SubsetSanitizer::new(&trained.test_subset);

    let best = Mutex::new(vec![0u32; ncol]);
    let scores = Mutex::new(vec![vec![0.0; num_labels]; ncol]);
    let delta = Mutex::new(vec![0.0; ncol]);

    parallelize(ncol, num_threads, |_worker, start, len| {
        let mut ws = ClassifyWorkspace::new(num_markers, num_labels);
        for c in start..start + len {
            let extracted = extract_intersect_column(test, c, &sanitizer, num_markers);
            let profile = rank_profile(extracted, num_markers);
            let (cell_best, cell_delta) = classify_one_cell(&profile, &trained.markers, &trained.built, opts, &mut ws);
            best.lock().unwrap()[c] = cell_best;
            scores.lock().unwrap()[c] = ws.scores.clone();
            delta.lock().unwrap()[c] = cell_delta;
        }
        Ok(())
    })?;

    log::debug!("classified {ncol} cells (intersect) against {num_labels} labels, {num_markers} shared markers");
    Ok(SingleResult {
        best: best.into_inner().unwrap(),
        scores: scores.into_inner().unwrap(),
        delta: delta.into_inner().unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::Markers;
    use crate::matrix::DenseMatrix;
    use crate::train::{self, TrainingOptions};
    use float_eq::assert_float_eq;
    use pretty_assertions::assert_eq;

    fn two_label_reference() -> (DenseMatrix, Vec<Label>, Markers) {
        let data = DenseMatrix::from_columns(
            4,
            vec![
                vec![1.0, 2.0, 3.0, 4.0],
                vec![1.0, 2.0, 3.0, 5.0],
                vec![4.0, 3.0, 2.0, 1.0],
                vec![5.0, 3.0, 2.0, 1.0],
            ],
        )
        .unwrap();
        let labels = vec![0u32, 0, 1, 1];
        let mut markers = Markers::new(2);
        markers.set(0, 1, vec![3]);
        markers.set(1, 0, vec![0]);
        (data, labels, markers)
    }

    #[test]
    fn identical_test_and_ref_recovers_labels_at_quantile_one() {
        let (reference, labels, markers) = two_label_reference();
        let trained = train::train_single(&reference, &labels, &markers, &TrainingOptions::default()).unwrap();
        let opts = ClassifyOptions { quantile: 1.0, fine_tune: false, ..ClassifyOptions::default() };
        let result = classify_single(&reference, &trained, &opts).unwrap();
        assert_eq!(result.best, labels);
        for (c, &label) in labels.iter().enumerate() {
            assert_float_eq!(result.scores[c][label as usize], 1.0, abs <= 1e-9);
        }
    }

    #[test]
    fn fine_tuning_matches_no_fine_tune_when_margin_is_wide() {
        let (reference, labels, markers) = two_label_reference();
        let trained = train::train_single(&reference, &labels, &markers, &TrainingOptions::default()).unwrap();
        let no_ft = ClassifyOptions { quantile: 1.0, fine_tune: false, ..ClassifyOptions::default() };
        let ft = ClassifyOptions { quantile: 1.0, fine_tune: true, fine_tune_threshold: 0.05, num_threads: 0 };
        let a = classify_single(&reference, &trained, &no_ft).unwrap();
        let b = classify_single(&reference, &trained, &ft).unwrap();
        assert_eq!(a.best, b.best);
    }

    #[test]
    fn empty_intersection_scores_everything_as_one() {
        let (reference, labels, markers) = two_label_reference();
        let test_ids = vec!["x", "y", "z"];
        let ref_ids = vec!["a", "b", "c", "d"];
        let trained = train::train_single_intersect(
            test_ids.len(),
            &test_ids,
            &reference,
            &ref_ids,
            &labels,
            &markers,
            &TrainingOptions::default(),
        )
        .unwrap();
        let test = DenseMatrix::from_columns(3, vec![vec![1.0, 2.0, 3.0]]).unwrap();
        let result = classify_single_intersect(&test, &trained, &ClassifyOptions::default()).unwrap();
        assert_eq!(result.best, vec![0]);
        assert_float_eq!(result.delta[0], 0.0, abs <= 1e-12);
        assert_eq!(result.scores[0], vec![1.0, 1.0]);
    }

    #[test]
    fn parallel_equivalence_of_best_across_thread_counts() {
        let (reference, labels, markers) = two_label_reference();
        let trained = train::train_single(&reference, &labels, &markers, &TrainingOptions::default()).unwrap();
        let one = ClassifyOptions { num_threads: 1, ..ClassifyOptions::default() };
        let many = ClassifyOptions { num_threads: 4, ..ClassifyOptions::default() };
        let a = classify_single(&reference, &trained, &one).unwrap();
        let b = classify_single(&reference, &trained, &many).unwrap();
        assert_eq!(a.best, b.best);
        for c in 0..a.scores.len() {
            for l in 0..a.scores[c].len() {
                assert_float_eq!(a.scores[c][l], b.scores[c][l], abs <= 1e-9);
            }
        }
    }

    #[test]
    fn fine_tune_single_returns_finite_delta_when_it_converges_to_one_label() {
        use crate::kmknn::DensePerLabel;

        // Two genes; labels 0 and 1 rank them in opposite order, so once the
        // round's markers narrow the miniverse to both genes, label 0 (same
        // order as the query) and label 1 (reversed) land at opposite ends of
        // the correlation scale. This drives `labels_in_use` from {0, 1}
        // straight down to a single survivor inside the loop.
        let mut markers = Markers::new(3);
        markers.set(0, 1, vec![0]);
        markers.set(1, 0, vec![1]);

        let label0 = LabelRef::Dense(DensePerLabel {
            num_samples: 1,
            num_markers: 2,
            data: vec![0.0, 0.0],
            distances: vec![0.0],
            seed_ranges: vec![(0, 1)],
            all_ranked: vec![vec![(0u32, 0u32), (1u32, 1u32)]],
        });
        let label1 = LabelRef::Dense(DensePerLabel {
            num_samples: 1,
            num_markers: 2,
            data: vec![0.0, 0.0],
            distances: vec![0.0],
            seed_ranges: vec![(0, 1)],
            all_ranked: vec![vec![(0u32, 1u32), (1u32, 0u32)]],
        });
        let built = vec![label0, label1];

        let test_profile = ProfileRank::Dense {
            scaled: vec![-0.5, 0.5],
            all_ranked: vec![(0u32, 0u32), (1u32, 1u32)],
        };

        let mut workspace = FineTuneWorkspace::new(2);
        // Scores 0 and 2 are both "in use" at the initial screen (threshold
        // 0.2, max 0.9); label 1 at 0.1 is screened out up front.
        let initial_scores = vec![0.9, 0.85, 0.1];
        let (best, delta) =
            fine_tune_single(&markers, &built, &test_profile, 1.0, 0.2, &initial_scores, &mut workspace);
        assert_eq!(best, 0);
        assert!(delta.is_finite(), "delta must not be NaN once fine-tuning converges to one label");
        assert!(delta > 1.5);
    }
}
