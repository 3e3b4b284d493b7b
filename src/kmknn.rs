//! C4's KMKNN layer: seed selection (a k-means++-style weighted sample over
//! squared L2 in scaled-rank space), the label-local dense/sparse storage
//! it reorders profiles into, and the triangle-inequality-pruned k-NN search
//! used by classification (§4.4, §4.5 "KMKNN k-NN search").
//!
//! The original keeps one code path per `{dense, sparse} x {dense, sparse}`
//! combination via compile-time booleans; this port follows §9's advice and
//! routes dense/reference storage through a [`LabelRef`] enum instead, with
//! the distance math itself still shared via [`crate::rank`].

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::{Rng, SeedableRng};
use rand::rngs::SmallRng;

use crate::rank::{self, GeneIx};

/// Seed selection's PRNG is reseeded per label from `(num_markers,
/// num_samples)`, per §4.4/§9 and the supplemental constant recovered from
/// `build_reference.hpp`.
fn seed_rng(num_markers: usize, num_samples: usize) -> SmallRng {
    let seed = 6237u64.wrapping_add((num_markers as u64).wrapping_mul(num_samples as u64));
    SmallRng::seed_from_u64(seed)
}

/// Result of k-means++-style seed selection: `identities` is the full
/// sample-reordering permutation (seeds first in pick order, then every
/// other sample grouped by its seed and sorted by ascending distance to it);
/// `distances` holds each non-seed sample's distance to its seed
/// (non-decreasing within a seed's range); `seed_ranges[s] = (start, count)`
/// indexes into `distances`.
pub struct SeedSelection {
    pub identities: Vec<usize>,
    pub distances: Vec<f64>,
    pub seed_ranges: Vec<(usize, usize)>,
}

/// Runs seed selection given a symmetric squared-L2 callback over sample
/// indices in `[0, num_samples)`. `num_markers` only feeds the PRNG seed.
/// Stops early (fewer seeds than `round(sqrt(num_samples))`) once every
/// remaining sample has `mindist == 0`, i.e. only duplicate profiles are
/// left (§4.4).
pub fn build_kmknn_seeds<F>(num_samples: usize, num_markers: usize, dist_sq: F) -> SeedSelection
where
    F: Fn(usize, usize) -> f64,
{
    let target_seeds = (num_samples as f64).sqrt().round() as usize;
    let target_seeds = target_seeds.max(1).min(num_samples);

    let mut rng = seed_rng(num_markers, num_samples);
    let mut mindist = vec![1.0f64; num_samples];
    let mut assignment = vec![0usize; num_samples];
    let mut identities: Vec<usize> = Vec::with_capacity(num_samples);
    let mut cumulative = vec![0.0f64; num_samples];

    for se in 0..target_seeds {
        cumulative[0] = mindist[0];
        for sam in 1..num_samples {
            cumulative[sam] = cumulative[sam - 1] + mindist[sam];
        }
        let total = cumulative[num_samples - 1];
        if total == 0.0 {
            break;
        }

        let chosen = loop {
            let weight: f64 = rng.gen::<f64>() * total;
            let candidate = cumulative.partition_point(|&c| c < weight);
            if candidate != num_samples && mindist[candidate] != 0.0 {
                break candidate;
            }
        };

        mindist[chosen] = 0.0;
        assignment[chosen] = se;
        identities.push(chosen);

        for sam in 0..num_samples {
            if mindist[sam] == 0.0 {
                continue;
            }
            let l2 = dist_sq(chosen, sam);
            if se == 0 {
                mindist[sam] = l2;
            } else if l2 < mindist[sam] {
                mindist[sam] = l2;
                assignment[sam] = se;
            }
        }
    }

    let num_seeds = identities.len();
    let mut groups: Vec<Vec<(f64, usize)>> = vec![Vec::new(); num_seeds];
    for sam in 0..num_samples {
        groups[assignment[sam]].push((mindist[sam], sam));
    }

    let mut distances = Vec::with_capacity(num_samples.saturating_sub(num_seeds));
    let mut seed_ranges = Vec::with_capacity(num_seeds);
    for se in 0..num_seeds {
        let mut group = std::mem::take(&mut groups[se]);
        group.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
        let start = distances.len();
        let seed = identities[se];
        for &(d, id) in &group {
            if id != seed {
                distances.push(d.sqrt());
                identities.push(id);
            }
        }
        seed_ranges.push((start, group.len() - 1));
    }

    SeedSelection { identities, distances, seed_ranges }
}

/// Sample-major dense per-label storage (§3 "Per-label reference, dense").
/// Post-reorder, samples are laid out `[seed_0, .., seed_{S-1}, member_0,
/// ..]` where `S = seed_ranges.len()`; a seed's own column is its index in
/// `seed_ranges`, and `seed_ranges[s] = (start, count)` locates member `i`
/// of seed `s` at absolute column `num_seeds() + start + i`.
pub struct DensePerLabel {
    pub num_samples: usize,
    pub num_markers: usize,
    /// `data[sample * num_markers .. (sample+1) * num_markers]`, post-reorder.
    pub data: Vec<f64>,
    pub distances: Vec<f64>,
    pub seed_ranges: Vec<(usize, usize)>,
    /// Per-sample simplified raw-rank vector, same post-reorder order as `data`.
    pub all_ranked: Vec<Vec<(u32, GeneIx)>>,
}

impl DensePerLabel {
    pub fn sample(&self, i: usize) -> &[f64] {
        &self.data[i * self.num_markers..(i + 1) * self.num_markers]
    }

    pub fn num_seeds(&self) -> usize {
        self.seed_ranges.len()
    }
}

/// CSC-like sparse per-label storage (§3 "Per-label reference, sparse"). Same
/// post-reorder column layout as [`DensePerLabel`].
pub struct SparsePerLabel {
    pub num_samples: usize,
    pub num_markers: usize,
    pub values: Vec<f64>,
    pub indices: Vec<GeneIx>,
    pub indptrs: Vec<usize>,
    pub zero: Vec<f64>,
    pub distances: Vec<f64>,
    pub seed_ranges: Vec<(usize, usize)>,
    pub negative_ranked: Vec<Vec<(u32, GeneIx)>>,
    pub positive_ranked: Vec<Vec<(u32, GeneIx)>>,
}

impl SparsePerLabel {
    pub fn sample(&self, i: usize) -> (&[f64], &[GeneIx], f64) {
        let start = self.indptrs[i];
        let end = self.indptrs[i + 1];
        (&self.values[start..end], &self.indices[start..end], self.zero[i])
    }

    pub fn num_seeds(&self) -> usize {
        self.seed_ranges.len()
    }
}

/// One label's trained KMKNN layout, either dense or sparse storage, never
/// both (§3 "Invariant: every label has >=1 profile" is enforced by callers
/// at training time, before a `LabelRef` is constructed at all).
pub enum LabelRef {
    Dense(DensePerLabel),
    Sparse(SparsePerLabel),
}

impl LabelRef {
    pub fn num_samples(&self) -> usize {
        match self {
            LabelRef::Dense(d) => d.num_samples,
            LabelRef::Sparse(s) => s.num_samples,
        }
    }

    pub fn num_seeds(&self) -> usize {
        match self {
            LabelRef::Dense(d) => d.num_seeds(),
            LabelRef::Sparse(s) => s.num_seeds(),
        }
    }

    fn seed_ranges(&self) -> &[(usize, usize)] {
        match self {
            LabelRef::Dense(d) => &d.seed_ranges,
            LabelRef::Sparse(s) => &s.seed_ranges,
        }
    }

    fn distances(&self) -> &[f64] {
        match self {
            LabelRef::Dense(d) => &d.distances,
            LabelRef::Sparse(s) => &s.distances,
        }
    }

    fn l2_to_query(&self, sample_ix: usize, query: &QueryProfile, scratch: &mut [f64]) -> f64 {
        match self {
            LabelRef::Dense(d) => rank::l2_dense_dense(query.as_dense(scratch), d.sample(sample_ix)),
            LabelRef::Sparse(s) => {
                let (values, indices, zero) = s.sample(sample_ix);
                let ref_nonzero: Vec<(f64, GeneIx)> =
                    values.iter().zip(indices.iter()).map(|(&v, &ix)| (v, ix)).collect();
                match query {
                    QueryProfile::Dense(q) => rank::l2_dense_sparse(s.num_markers, q, true, &ref_nonzero, zero),
                    QueryProfile::Sparse { nonzero, zero: qzero, has_nonzero } => rank::l2_sparse_sparse(
                        s.num_markers,
                        nonzero,
                        *qzero,
                        *has_nonzero,
                        &ref_nonzero,
                        zero,
                        scratch,
                    ),
                }
            }
        }
    }
}

/// A query profile in scaled-rank space, abstracting over dense/sparse
/// storage the way §9 recommends (a `QueryProfile` capability orthogonal to
/// `LabelRef`'s `RefStorage`).
#[derive(Clone, Copy)]
pub enum QueryProfile<'a> {
    Dense(&'a [f64]),
    Sparse { nonzero: &'a [(f64, GeneIx)], zero: f64, has_nonzero: bool },
}

impl<'a> QueryProfile<'a> {
    /// Densifies into `scratch` (reused workspace, length `num_markers`) and
    /// returns the dense view; a no-op borrow when already dense.
    fn as_dense<'s>(&'s self, scratch: &'s mut [f64]) -> &'s [f64] {
        match *self {
            QueryProfile::Dense(d) => d,
            QueryProfile::Sparse { nonzero, zero, .. } => {
                for s in scratch.iter_mut() {
                    *s = zero;
                }
                for &(v, ix) in nonzero {
                    scratch[ix as usize] = v;
                }
                scratch
            }
        }
    }
}

#[derive(Clone, Copy)]
pub struct HeapEntry {
    pub l2: f64,
    pub sample_ix: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.l2 == other.l2
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.l2.partial_cmp(&other.l2).unwrap()
    }
}

/// Per-worker scratch for [`find_closest_neighbors`], reused across cells
/// and labels (§5 "Per-worker scratch").
pub struct FindClosestNeighborsWorkspace {
    seed_distances: Vec<(f64, u32)>,
    heap: BinaryHeap<HeapEntry>,
    popped: Vec<HeapEntry>,
    scratch: RefCell<Vec<f64>>,
}

impl FindClosestNeighborsWorkspace {
    pub fn new(num_markers: usize) -> Self {
        FindClosestNeighborsWorkspace {
            seed_distances: Vec::new(),
            heap: BinaryHeap::new(),
            popped: Vec::new(),
            scratch: RefCell::new(vec![0.0; num_markers]),
        }
    }

    /// The `k` nearest neighbors found by the last [`find_closest_neighbors`]
    /// call, furthest-first (i.e. in heap-pop order).
    pub fn furthest_first(&mut self) -> &[HeapEntry] {
        self.popped.clear();
        while let Some(e) = self.heap.pop() {
            self.popped.push(e);
        }
        &self.popped
    }
}

/// Computes query-to-seed distances, sorts ascending, then walks seeds in
/// that order applying the triangle-inequality bounds from §4.5 to prune
/// which samples within a seed's range need a full L2 evaluation. Leaves the
/// `k` closest candidates in `workspace`'s heap (popped furthest-first by
/// [`FindClosestNeighborsWorkspace::furthest_first`]).
pub fn find_closest_neighbors(
    query: &QueryProfile,
    k: usize,
    ref_label: &LabelRef,
    workspace: &mut FindClosestNeighborsWorkspace,
) {
    let seed_ranges = ref_label.seed_ranges();
    let distances = ref_label.distances();
    let num_seeds = seed_ranges.len();

    workspace.seed_distances.clear();
    {
        let mut scratch = workspace.scratch.borrow_mut();
        for seed_ix in 0..num_seeds {
            // a seed's own profile occupies column `seed_ix` in the reordered storage.
            let l2 = ref_label.l2_to_query(seed_ix, query, &mut scratch);
            workspace.seed_distances.push((l2, seed_ix as u32));
        }
    }
    workspace
        .seed_distances
        .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));

    workspace.heap.clear();
    let to_add = k.min(workspace.seed_distances.len());
    for &(l2, seed_ix) in &workspace.seed_distances[..to_add] {
        workspace.heap.push(HeapEntry { l2, sample_ix: seed_ix });
    }
    let mut threshold = if workspace.heap.len() < k { f64::INFINITY } else { workspace.heap.peek().unwrap().l2 };

    let seed_distances = workspace.seed_distances.clone();
    for &(query_to_seed_sq, seed_ix) in &seed_distances {
        let (start, count) = seed_ranges[seed_ix as usize];
        if count == 0 {
            continue;
        }
        let mut first = start;
        let mut last = start + count;

        if threshold.is_finite() {
            let thresh = threshold.sqrt();
            let query_to_seed = query_to_seed_sq.sqrt();
            let max_subj2seed = distances[last - 1];
            let lower_bd = query_to_seed - thresh;
            if max_subj2seed < lower_bd {
                continue;
            }
            first += distances[first..last].partition_point(|&d| d < lower_bd);

            let upper_bd = query_to_seed + thresh;
            if max_subj2seed > upper_bd {
                last = first + distances[first..last].partition_point(|&d| d <= upper_bd);
            }
        }

        for subj_pos in first..last {
            // member `subj_pos` of this seed's group lives at absolute column
            // `num_seeds + subj_pos` in the reordered storage (§ struct docs above).
            let sample_ix = num_seeds + subj_pos;
            let mut scratch = workspace.scratch.borrow_mut();
            let dist = ref_label.l2_to_query(sample_ix, query, &mut scratch);
            if dist <= threshold {
                workspace.heap.push(HeapEntry { l2: dist, sample_ix: sample_ix as u32 });
                if workspace.heap.len() > k {
                    workspace.heap.pop();
                }
                if workspace.heap.len() >= k {
                    threshold = workspace.heap.peek().unwrap().l2;
                }
            }
        }
    }
}

/// Reorders per-sample data according to `identities` (a full `[0,
/// num_samples)` permutation where `identities[new_pos] = old_pos`),
/// producing a reordered dense data buffer laid out as `[seed_0, seed_1,
/// ..., seed_{S-1}, member_0, member_1, ...]` — seeds occupy the first `S`
/// slots (in pick order) and every other sample follows in the
/// seed-grouped, distance-sorted order `identities[S..]` already encodes.
pub fn reorder_dense(num_markers: usize, identities: &[usize], source: &[Vec<f64>]) -> Vec<f64> {
    let mut out = Vec::with_capacity(identities.len() * num_markers);
    for &old in identities {
        out.extend_from_slice(&source[old]);
    }
    out
}

pub fn reorder_vec<T: Clone>(identities: &[usize], source: &[T]) -> Vec<T> {
    identities.iter().map(|&old| source[old].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force_knn(num_samples: usize, query: &[f64], data: &[Vec<f64>], k: usize) -> Vec<f64> {
        let mut dists: Vec<f64> = (0..num_samples).map(|i| rank::l2_dense_dense(query, &data[i])).collect();
        dists.sort_by(|a, b| a.partial_cmp(b).unwrap());
        dists.truncate(k);
        dists
    }

    #[test]
    fn kmknn_matches_brute_force_for_several_k() {
        // small deterministic "random" reference: 40 profiles x 12 markers,
        // generated from a simple LCG so the test has no external rand dependency.
        let num_samples = 40;
        let num_markers = 12;
        let mut state = 12345u64;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((state >> 33) as f64) / (u32::MAX as f64)
        };

        let mut scaled = Vec::with_capacity(num_samples);
        for _ in 0..num_samples {
            let values: Vec<f64> = (0..num_markers).map(|_| next()).collect();
            let ixs: Vec<GeneIx> = (0..num_markers as u32).collect();
            let mut out = vec![0.0; num_markers];
            rank::scaled_ranks_dense(&values, &ixs, &mut out);
            scaled.push(out);
        }

        let seeds = build_kmknn_seeds(num_samples, num_markers, |i, j| {
            rank::l2_dense_dense(&scaled[i], &scaled[j])
        });
        let reordered = reorder_dense(num_markers, &seeds.identities, &scaled);
        let label_ref = LabelRef::Dense(DensePerLabel {
            num_samples,
            num_markers,
            data: reordered,
            distances: seeds.distances,
            seed_ranges: seeds.seed_ranges,
            all_ranked: vec![Vec::new(); num_samples],
        });

        let query_values: Vec<f64> = (0..num_markers).map(|_| next()).collect();
        let ixs: Vec<GeneIx> = (0..num_markers as u32).collect();
        let mut query_scaled = vec![0.0; num_markers];
        rank::scaled_ranks_dense(&query_values, &ixs, &mut query_scaled);

        for &k in &[1usize, 5, 20, 40] {
            let mut workspace = FindClosestNeighborsWorkspace::new(num_markers);
            find_closest_neighbors(&QueryProfile::Dense(&query_scaled), k, &label_ref, &mut workspace);
            let mut got: Vec<f64> = workspace.furthest_first().iter().map(|e| e.l2).collect();
            got.sort_by(|a, b| a.partial_cmp(b).unwrap());

            let brute = brute_force_knn(num_samples, &query_scaled, &scaled, k);
            assert_eq!(got.len(), brute.len());
            for (g, b) in got.iter().zip(brute.iter()) {
                assert!((g - b).abs() < 1e-9, "k={k} got={g} want={b}");
            }
        }
    }
}
