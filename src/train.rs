//! C4: reference training. Builds, per label, a KMKNN-searchable layout of
//! scaled-rank profiles plus the simplified raw-rank vectors fine-tuning
//! needs later, over the canonical marker subset produced by C3 (§4.4
//! "Reference training").

use std::cell::RefCell;
use std::hash::Hash;
use std::sync::Mutex;

use crate::error::{Result, SinglePpError};
use crate::kmknn::{self, DensePerLabel, LabelRef, SparsePerLabel};
use crate::markers::{self, Label, Markers};
use crate::matrix::ExpressionMatrix;
use crate::parallel::{self, parallelize};
use crate::profile::{rank_profile, ProfileRank};
use crate::rank::{self, GeneIx};

/// `top`/`num_threads` as used by [`train_single`] and [`train_single_intersect`].
#[derive(Clone, Copy, Debug)]
pub struct TrainingOptions {
    /// Markers kept per pairwise label list; `< 0` keeps all (§4.3).
    pub top: i32,
    /// `<= 0` resolves to every available core (§A.3).
    pub num_threads: i32,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions { top: -1, num_threads: 0 }
    }
}

/// A trained single reference, ready for [`crate::classify::classify_single`]
/// (§3 "Trained single reference").
pub struct TrainedSingle {
    pub test_nrow: usize,
    pub markers: Markers,
    pub subset: Vec<GeneIx>,
    pub built: Vec<LabelRef>,
}

/// As [`TrainedSingle`], but the reference and test matrices disagreed on
/// gene identifiers; `test_subset`/`ref_subset` are parallel arrays, each
/// referring to positions in its own matrix's row space (§4.5
/// "classify_single_intersect").
pub struct TrainedSingleIntersect {
    pub test_nrow: usize,
    pub markers: Markers,
    pub test_subset: Vec<GeneIx>,
    pub ref_subset: Vec<GeneIx>,
    pub built: Vec<LabelRef>,
}

/// Parallel over profiles (§5 "parallel over reference profiles"), routed
/// through [`parallelize`] with a lock held only long enough to drop one
/// result into its slot.
fn rank_profiles(
    reference: &dyn ExpressionMatrix,
    subset: &[GeneIx],
    num_threads: usize,
) -> Result<Vec<ProfileRank>> {
    let ncol = reference.ncol();
    let num_markers = subset.len();
    let results: Mutex<Vec<Option<ProfileRank>>> = Mutex::new((0..ncol).map(|_| None).collect());
    parallelize(ncol, num_threads, |_worker, start, len| {
        for col in start..start + len {
            let ranked = rank_profile(reference.extract_column(col, subset), num_markers);
            results.lock().unwrap()[col] = Some(ranked);
        }
        Ok(())
    })?;
    Ok(results.into_inner().unwrap().into_iter().map(|o| o.expect("every column ranked")).collect())
}

fn build_dense_label(num_markers: usize, profile_ixs: &[usize], profiles: &[ProfileRank]) -> LabelRef {
    let num_samples = profile_ixs.len();
    let scaled: Vec<Vec<f64>> = profile_ixs
        .iter()
        .map(|&p| match &profiles[p] {
            ProfileRank::Dense { scaled, .. } => scaled.clone(),
            ProfileRank::Sparse { .. } => unreachable!("label storage kind fixed by its first profile"),
        })
        .collect();
    let all_ranked: Vec<Vec<(u32, GeneIx)>> = profile_ixs
        .iter()
        .map(|&p| match &profiles[p] {
            ProfileRank::Dense { all_ranked, .. } => all_ranked.clone(),
            ProfileRank::Sparse { .. } => unreachable!(),
        })
        .collect();

    let seeds =
        kmknn::build_kmknn_seeds(num_samples, num_markers, |i, j| rank::l2_dense_dense(&scaled[i], &scaled[j]));
    let data = kmknn::reorder_dense(num_markers, &seeds.identities, &scaled);
    let all_ranked = kmknn::reorder_vec(&seeds.identities, &all_ranked);

    LabelRef::Dense(DensePerLabel {
        num_samples,
        num_markers,
        data,
        distances: seeds.distances,
        seed_ranges: seeds.seed_ranges,
        all_ranked,
    })
}

#[derive(Clone)]
struct SparseProfile {
    zero_scaled: f64,
    nonzero_scaled: Vec<(f64, GeneIx)>,
    negative_ranked: Vec<(u32, GeneIx)>,
    positive_ranked: Vec<(u32, GeneIx)>,
}

fn build_sparse_label(num_markers: usize, profile_ixs: &[usize], profiles: &[ProfileRank]) -> LabelRef {
    let num_samples = profile_ixs.len();
    let gathered: Vec<SparseProfile> = profile_ixs
        .iter()
        .map(|&p| match &profiles[p] {
            ProfileRank::Sparse { zero_scaled, nonzero_scaled, negative_ranked, positive_ranked } => SparseProfile {
                zero_scaled: *zero_scaled,
                nonzero_scaled: nonzero_scaled.clone(),
                negative_ranked: negative_ranked.clone(),
                positive_ranked: positive_ranked.clone(),
            },
            ProfileRank::Dense { .. } => unreachable!("label storage kind fixed by its first profile"),
        })
        .collect();

    let scratch = RefCell::new(vec![0.0; num_markers]);
    let seeds = kmknn::build_kmknn_seeds(num_samples, num_markers, |i, j| {
        let (gi, gj) = (&gathered[i], &gathered[j]);
        let mut s = scratch.borrow_mut();
        rank::l2_sparse_sparse(
            num_markers,
            &gi.nonzero_scaled,
            gi.zero_scaled,
            !gi.nonzero_scaled.is_empty(),
            &gj.nonzero_scaled,
            gj.zero_scaled,
            &mut s,
        )
    });

    let reordered = kmknn::reorder_vec(&seeds.identities, &gathered);
    let mut values = Vec::new();
    let mut indices = Vec::new();
    let mut indptrs = Vec::with_capacity(num_samples + 1);
    let mut zero = Vec::with_capacity(num_samples);
    indptrs.push(0);
    for p in &reordered {
        for &(v, ix) in &p.nonzero_scaled {
            values.push(v);
            indices.push(ix);
        }
        indptrs.push(values.len());
        zero.push(p.zero_scaled);
    }
    let negative_ranked = reordered.iter().map(|p| p.negative_ranked.clone()).collect();
    let positive_ranked = reordered.iter().map(|p| p.positive_ranked.clone()).collect();

    LabelRef::Sparse(SparsePerLabel {
        num_samples,
        num_markers,
        values,
        indices,
        indptrs,
        zero,
        distances: seeds.distances,
        seed_ranges: seeds.seed_ranges,
        negative_ranked,
        positive_ranked,
    })
}

fn build_label_ref(num_markers: usize, profile_ixs: &[usize], profiles: &[ProfileRank]) -> LabelRef {
    let is_sparse = matches!(profiles[profile_ixs[0]], ProfileRank::Sparse { .. });
    if is_sparse {
        build_sparse_label(num_markers, profile_ixs, profiles)
    } else {
        build_dense_label(num_markers, profile_ixs, profiles)
    }
}

/// Parallel over labels (§5 "separately parallel over labels"), same
/// lock-per-slot pattern as [`rank_profiles`].
fn build_labels(
    num_markers: usize,
    groups: &[Vec<usize>],
    profiles: &[ProfileRank],
    num_threads: usize,
) -> Result<Vec<LabelRef>> {
    let num_labels = groups.len();
    let results: Mutex<Vec<Option<LabelRef>>> = Mutex::new((0..num_labels).map(|_| None).collect());
    parallelize(num_labels, num_threads, |_worker, start, len| {
        for label in start..start + len {
            let built = build_label_ref(num_markers, &groups[label], profiles);
            results.lock().unwrap()[label] = Some(built);
        }
        Ok(())
    })?;
    Ok(results.into_inner().unwrap().into_iter().map(|o| o.expect("every label built")).collect())
}

pub(crate) fn group_profiles_by_label(labels: &[Label], num_labels: usize) -> Result<Vec<Vec<usize>>> {
    let mut groups = vec![Vec::new(); num_labels];
    for (profile_ix, &label) in labels.iter().enumerate() {
        if label as usize >= num_labels {
            return Err(SinglePpError::out_of_range(format!(
                "label {label} at profile {profile_ix} exceeds {num_labels} labels known to the marker table"
            )));
        }
        groups[label as usize].push(profile_ix);
    }
    for (label, group) in groups.iter().enumerate() {
        if group.is_empty() {
            return Err(SinglePpError::empty_input(format!("label {label} has zero profiles")));
        }
    }
    Ok(groups)
}

/// Trains a single reference over its own, identical-to-test gene space
/// (§4.4).
pub fn train_single(
    reference: &dyn ExpressionMatrix,
    labels: &[Label],
    markers: &Markers,
    opts: &TrainingOptions,
) -> Result<TrainedSingle> {
    if reference.ncol() != labels.len() {
        return Err(SinglePpError::shape_mismatch(format!(
            "reference has {} columns but {} labels were given",
            reference.ncol(),
            labels.len()
        )));
    }
    markers.validate(reference.nrow())?;

    let num_labels = markers.num_labels;
    let groups = group_profiles_by_label(labels, num_labels)?;

    let (remapped_markers, subset) = markers::subset_to_markers_identical(markers, opts.top);
    let num_markers = subset.len();
    let num_threads = parallel::resolve_num_threads(opts.num_threads);

    let profiles = rank_profiles(reference, &subset, num_threads)?;
    let built = build_labels(num_markers, &groups, &profiles, num_threads)?;

    log::debug!(
        "trained single reference: {num_labels} labels, {} markers, {} profiles",
        num_markers,
        reference.ncol()
    );
    Ok(TrainedSingle { test_nrow: reference.nrow(), markers: remapped_markers, subset, built })
}

/// Trains a single reference whose gene identifiers must first be
/// intersected against the test matrix's (§4.5 "classify_single_intersect").
pub fn train_single_intersect<T: Eq + Hash + Clone>(
    test_nrow: usize,
    test_ids: &[T],
    reference: &dyn ExpressionMatrix,
    ref_ids: &[T],
    labels: &[Label],
    markers: &Markers,
    opts: &TrainingOptions,
) -> Result<TrainedSingleIntersect> {
    if reference.ncol() != labels.len() {
        return Err(SinglePpError::shape_mismatch(format!(
            "reference has {} columns but {} labels were given",
            reference.ncol(),
            labels.len()
        )));
    }
    if reference.nrow() != ref_ids.len() {
        return Err(SinglePpError::shape_mismatch(format!(
            "reference has {} rows but {} reference gene ids were given",
            reference.nrow(),
            ref_ids.len()
        )));
    }
    if test_nrow != test_ids.len() {
        return Err(SinglePpError::shape_mismatch(format!(
            "test_nrow {test_nrow} does not match {} test gene ids",
            test_ids.len()
        )));
    }
    markers.validate(reference.nrow())?;

    let num_labels = markers.num_labels;
    let groups = group_profiles_by_label(labels, num_labels)?;

    let intersection = markers::intersect_genes(test_ids, ref_ids);
    if intersection.pairs.is_empty() {
        log::warn!("train_single_intersect: test and reference share no gene identifiers");
    }
    let (remapped_markers, test_subset, ref_subset) =
        markers::subset_to_markers_intersect(markers, &intersection, opts.top);
    let num_markers = ref_subset.len();
    let num_threads = parallel::resolve_num_threads(opts.num_threads);

    let profiles = rank_profiles(reference, &ref_subset, num_threads)?;
    let built = build_labels(num_markers, &groups, &profiles, num_threads)?;

    log::debug!(
        "trained single reference (intersect): {num_labels} labels, {} shared markers, {} profiles",
        num_markers,
        reference.ncol()
    );
    Ok(TrainedSingleIntersect { test_nrow, markers: remapped_markers, test_subset, ref_subset, built })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DenseMatrix;

    fn two_label_reference() -> (DenseMatrix, Vec<Label>, Markers) {
        // A1=[1,2,3,4], A2=[1,2,3,5], B1=[4,3,2,1], B2=[5,3,2,1]; labels [A,A,B,B]
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
    fn train_single_produces_one_label_ref_per_label_with_right_sample_counts() {
        let (reference, labels, markers) = two_label_reference();
        let opts = TrainingOptions::default();
        let trained = train_single(&reference, &labels, &markers, &opts).unwrap();
        assert_eq!(trained.built.len(), 2);
        assert_eq!(trained.test_nrow, 4);
        assert_eq!(trained.subset, vec![0, 3]); // union of {3} and {0}
        for label_ref in &trained.built {
            assert_eq!(label_ref.num_samples(), 2);
        }
    }

    #[test]
    fn train_single_rejects_label_with_zero_profiles() {
        let (reference, _labels, markers) = two_label_reference();
        let labels = vec![0u32, 0, 0, 0]; // label 1 never used
        let opts = TrainingOptions::default();
        let err = train_single(&reference, &labels, &markers, &opts).unwrap_err();
        assert!(matches!(err, SinglePpError::EmptyInput { .. }));
    }

    #[test]
    fn train_single_rejects_column_label_length_mismatch() {
        let (reference, _labels, markers) = two_label_reference();
        let labels = vec![0u32, 1, 1]; // too short
        let opts = TrainingOptions::default();
        let err = train_single(&reference, &labels, &markers, &opts).unwrap_err();
        assert!(matches!(err, SinglePpError::ShapeMismatch { .. }));
    }

    #[test]
    fn train_single_handles_sparse_reference() {
        use crate::matrix::SparseMatrix;
        // 4 genes x 4 profiles; only genes 0 and 3 are ever nonzero.
        let values = vec![1.0, 2.0, 1.0, 2.0];
        let indices = vec![0u32, 0, 3, 3];
        let indptrs = vec![0usize, 1, 2, 3, 4];
        let reference = SparseMatrix::from_csc(4, 4, values, indices, indptrs).unwrap();
        let labels = vec![0u32, 0, 1, 1];
        let mut markers = Markers::new(2);
        markers.set(0, 1, vec![3]);
        markers.set(1, 0, vec![0]);
        let opts = TrainingOptions::default();
        let trained = train_single(&reference, &labels, &markers, &opts).unwrap();
        assert_eq!(trained.built.len(), 2);
        for label_ref in &trained.built {
            assert!(matches!(label_ref, LabelRef::Sparse(_)));
            assert_eq!(label_ref.num_samples(), 2);
        }
    }

    #[test]
    fn train_single_intersect_with_no_shared_genes_still_builds_one_ref_per_label() {
        let (reference, labels, markers) = two_label_reference();
        let test_ids = vec!["x", "y", "z"];
        let ref_ids = vec!["a", "b", "c", "d"];
        let opts = TrainingOptions::default();
        let trained =
            train_single_intersect(test_ids.len(), &test_ids, &reference, &ref_ids, &labels, &markers, &opts)
                .unwrap();
        assert!(trained.ref_subset.is_empty());
        assert!(trained.test_subset.is_empty());
        assert_eq!(trained.built.len(), 2);
        assert_eq!(trained.built[0].num_samples(), 2);
    }
}
