//! C3: marker and gene-set management. Pairwise per-label marker lists,
//! reduced to the minimal gene universe actually needed downstream, plus
//! gene-identifier intersection between a test and a reference matrix.

use fnv::{FnvHashMap, FnvHashSet};

use crate::error::{Result, SinglePpError};
use crate::rank::GeneIx;

pub type Label = u32;

/// Dense `L x L` pairwise marker table; `markers[a][b]` is the ordered,
/// best-first gene list distinguishing label `a` from label `b`. The
/// diagonal is unused.
#[derive(Clone, Debug, Default)]
pub struct Markers {
    pub num_labels: usize,
    table: Vec<Vec<GeneIx>>,
}

impl Markers {
    pub fn new(num_labels: usize) -> Self {
        Markers { num_labels, table: vec![Vec::new(); num_labels * num_labels] }
    }

    fn idx(&self, a: Label, b: Label) -> usize {
        a as usize * self.num_labels + b as usize
    }

    pub fn get(&self, a: Label, b: Label) -> &[GeneIx] {
        &self.table[self.idx(a, b)]
    }

    pub fn set(&mut self, a: Label, b: Label, genes: Vec<GeneIx>) {
        let i = self.idx(a, b);
        self.table[i] = genes;
    }

    pub fn validate(&self, num_genes: usize) -> Result<()> {
        for row in &self.table {
            for &g in row {
                if g as usize >= num_genes {
                    return Err(SinglePpError::out_of_range(format!(
                        "marker gene index {g} exceeds {num_genes} rows"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// An ordered `(test_gene_ix, ref_gene_ix)` pairing, each side occurring at
/// most once, produced by [`intersect_genes`].
#[derive(Clone, Debug, Default)]
pub struct Intersection {
    pub pairs: Vec<(GeneIx, GeneIx)>,
}

impl Intersection {
    pub fn test_ixs(&self) -> Vec<GeneIx> {
        self.pairs.iter().map(|&(t, _)| t).collect()
    }

    pub fn ref_ixs(&self) -> Vec<GeneIx> {
        self.pairs.iter().map(|&(_, r)| r).collect()
    }
}

/// Matches gene identifiers between a test and reference matrix. Builds a
/// map identifier -> first test index, then walks reference identifiers in
/// order; on a hit, emits `(test_ix, ref_ix)` and *removes* the test entry,
/// so each test identifier contributes at most once even under duplicate ids
/// on either side. Result is sorted by `test_ix`.
pub fn intersect_genes<T: Eq + std::hash::Hash + Clone>(
    test_ids: &[T],
    ref_ids: &[T],
) -> Intersection {
    let mut test_found: FnvHashMap<T, GeneIx> = FnvHashMap::default();
    for (ix, id) in test_ids.iter().enumerate() {
        test_found.entry(id.clone()).or_insert(ix as GeneIx);
    }
    let mut pairs = Vec::new();
    for (ref_ix, id) in ref_ids.iter().enumerate() {
        if let Some(test_ix) = test_found.remove(id) {
            pairs.push((test_ix, ref_ix as GeneIx));
        }
    }
    pairs.sort_by_key(|&(t, _)| t);
    Intersection { pairs }
}

/// `subset_to_markers`, identical-feature-space variant (§4.3). Truncates
/// each pairwise list to `top` entries (`top < 0` keeps all), collects the
/// sorted-unique union as `subset`, and rewrites every marker index to its
/// position in `subset`.
pub fn subset_to_markers_identical(markers: &Markers, top: i32) -> (Markers, Vec<GeneIx>) {
    let l = markers.num_labels;
    let mut truncated = vec![Vec::new(); l * l];
    let mut union: FnvHashSet<GeneIx> = FnvHashSet::default();

    for a in 0..l {
        for b in 0..l {
            if a == b {
                continue;
            }
            let list = markers.get(a as Label, b as Label);
            let keep = if top < 0 { list.len() } else { (top as usize).min(list.len()) };
            let kept = list[..keep].to_vec();
            for &g in &kept {
                union.insert(g);
            }
            truncated[a * l + b] = kept;
        }
    }

    let mut subset: Vec<GeneIx> = union.into_iter().collect();
    subset.sort_unstable();
    let position: FnvHashMap<GeneIx, GeneIx> =
        subset.iter().enumerate().map(|(pos, &g)| (g, pos as GeneIx)).collect();

    let mut remapped = Markers::new(l);
    for a in 0..l {
        for b in 0..l {
            if a == b {
                continue;
            }
            let rewritten: Vec<GeneIx> =
                truncated[a * l + b].iter().map(|g| position[g]).collect();
            remapped.set(a as Label, b as Label, rewritten);
        }
    }

    (remapped, subset)
}

/// `subset_to_markers`, intersection variant (§4.3). Returns rewritten
/// markers (indexing into the compacted intersection) plus the compacted
/// `(test_subset, ref_subset)` parallel arrays. An empty `intersection`
/// yields an empty result, which callers must treat as well-defined (§7).
pub fn subset_to_markers_intersect(
    markers: &Markers,
    intersection: &Intersection,
    top: i32,
) -> (Markers, Vec<GeneIx>, Vec<GeneIx>) {
    let l = markers.num_labels;
    if intersection.pairs.is_empty() {
        return (Markers::new(l), Vec::new(), Vec::new());
    }

    // availability mask over ref_ix -> intersection position.
    let ref_position: FnvHashMap<GeneIx, u32> =
        intersection.pairs.iter().enumerate().map(|(pos, &(_, r))| (r, pos as u32)).collect();

    let upper_bound = if top < 0 { usize::MAX } else { top as usize };
    let mut truncated = vec![Vec::new(); l * l];
    let mut all_markers: FnvHashSet<u32> = FnvHashSet::default();

    for a in 0..l {
        for b in 0..l {
            if a == b {
                continue;
            }
            let list = markers.get(a as Label, b as Label);
            let mut kept = Vec::new();
            for &g in list {
                if kept.len() >= upper_bound {
                    break;
                }
                if let Some(&pos) = ref_position.get(&g) {
                    kept.push(pos);
                    all_markers.insert(pos);
                }
            }
            truncated[a * l + b] = kept;
        }
    }

    // Sort by ref_ix (not by intersection position) so `ref_subset` comes out
    // sorted-ascending and safe to hand directly to a sparse matrix's
    // `extract_column`, which assumes a sorted subset for its merge walk
    // (§6.1). `test_subset` loses that guarantee in exchange; callers extract
    // it through a `SubsetSanitizer` instead.
    let mut surviving_positions: Vec<u32> = all_markers.into_iter().collect();
    surviving_positions.sort_by_key(|&pos| intersection.pairs[pos as usize].1);
    let remap: FnvHashMap<u32, GeneIx> = surviving_positions
        .iter()
        .enumerate()
        .map(|(new_pos, &old_pos)| (old_pos, new_pos as GeneIx))
        .collect();

    let test_subset: Vec<GeneIx> =
        surviving_positions.iter().map(|&pos| intersection.pairs[pos as usize].0).collect();
    let ref_subset: Vec<GeneIx> =
        surviving_positions.iter().map(|&pos| intersection.pairs[pos as usize].1).collect();

    let mut remapped = Markers::new(l);
    for a in 0..l {
        for b in 0..l {
            if a == b {
                continue;
            }
            let rewritten: Vec<GeneIx> =
                truncated[a * l + b].iter().map(|pos| remap[pos]).collect();
            remapped.set(a as Label, b as Label, rewritten);
        }
    }

    (remapped, test_subset, ref_subset)
}

/// Unions the pairwise marker lists among a set of labels in use, symmetric
/// across both directions (`markers[a][b]` and `markers[b][a]`). Used by the
/// single-reference fine-tuning loop (§4.5 step 3).
pub fn union_markers_among<'a>(markers: &'a Markers, labels_in_use: &[Label]) -> FnvHashSet<GeneIx> {
    let mut union = FnvHashSet::default();
    for &a in labels_in_use {
        for &b in labels_in_use {
            if a == b {
                continue;
            }
            for &g in markers.get(a, b) {
                union.insert(g);
            }
        }
    }
    union
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn intersect_genes_first_occurrence_wins() {
        let test_ids = ["a", "b", "b", "c"];
        let ref_ids = ["c", "b", "z"];
        let inter = intersect_genes(&test_ids, &ref_ids);
        // "b" appears twice in test; only the first (ix 1) should be used.
        // pairs are sorted ascending by test_ix: (1,1) before (3,0).
        assert_eq!(inter.pairs, vec![(1, 1), (3, 0)]);
    }

    #[test]
    fn intersect_genes_symmetric_modulo_swap() {
        let test_ids = ["x", "y", "z"];
        let ref_ids = ["z", "w", "x"];
        let forward = intersect_genes(&test_ids, &ref_ids);
        let backward = intersect_genes(&ref_ids, &test_ids);
        let fwd_set: FnvHashSet<(GeneIx, GeneIx)> = forward.pairs.iter().copied().collect();
        let bwd_set: FnvHashSet<(GeneIx, GeneIx)> =
            backward.pairs.iter().map(|&(a, b)| (b, a)).collect();
        assert_eq!(fwd_set, bwd_set);
    }

    #[test]
    fn subset_to_markers_identical_builds_minimal_universe() {
        let mut markers = Markers::new(2);
        markers.set(0, 1, vec![3, 7]);
        markers.set(1, 0, vec![0, 3]);
        let (remapped, subset) = subset_to_markers_identical(&markers, -1);
        assert_eq!(subset, vec![0, 3, 7]);
        assert_eq!(remapped.get(0, 1), &[1, 2]);
        assert_eq!(remapped.get(1, 0), &[0, 1]);
    }

    #[test]
    fn subset_to_markers_intersect_empty_is_empty() {
        let markers = Markers::new(2);
        let inter = Intersection::default();
        let (remapped, test_subset, ref_subset) =
            subset_to_markers_intersect(&markers, &inter, -1);
        assert!(test_subset.is_empty());
        assert!(ref_subset.is_empty());
        assert!(remapped.get(0, 1).is_empty());
    }
}
