//! C2: subset / remap utilities. `SubsetSanitizer` prepares an arbitrary gene
//! subset for matrix extraction and undoes the sort permutation afterwards;
//! `SubsetRemapper` is the sparse forward map used repeatedly inside the
//! fine-tuning loop.

use fnv::FnvHashMap;

use crate::rank::GeneIx;

/// Sorts (and, if necessary, dedupes) a caller-supplied gene subset so it can
/// be fed to a matrix extractor, while remembering how to map extracted
/// values back to positions in the *original* `sub` ordering.
pub struct SubsetSanitizer {
    /// sorted unique gene indices, ready to hand to `consecutive_extractor`.
    extraction_subset: Vec<GeneIx>,
    /// `permutation[sorted_position] = original_position_in_sub`.
    permutation: Vec<usize>,
}

impl SubsetSanitizer {
    pub fn new(sub: &[GeneIx]) -> Self {
        let mut order: Vec<usize> = (0..sub.len()).collect();
        order.sort_by_key(|&i| sub[i]);

        let mut extraction_subset = Vec::with_capacity(order.len());
        let mut permutation = Vec::with_capacity(order.len());
        let mut last: Option<GeneIx> = None;
        for i in order {
            if last == Some(sub[i]) {
                // duplicate value in `sub`; the earlier occurrence already
                // owns this extraction slot, fold this one into it too so
                // fill_ranks can still report every original position.
                permutation.push(i);
                continue;
            }
            last = Some(sub[i]);
            extraction_subset.push(sub[i]);
            permutation.push(i);
        }
        SubsetSanitizer { extraction_subset, permutation }
    }

    pub fn extraction_subset(&self) -> &[GeneIx] {
        &self.extraction_subset
    }

    /// Given dense values extracted in `extraction_subset` order, produces a
    /// ranked vector whose `ix` refers back to positions in the original
    /// `sub` passed to [`SubsetSanitizer::new`].
    pub fn fill_ranks_dense(&self, extracted: &[f64]) -> Vec<(f64, GeneIx)> {
        extracted
            .iter()
            .zip(self.permutation.iter())
            .map(|(&v, &orig)| (v, orig as GeneIx))
            .collect()
    }

    /// Given sparse `(value, position_within_extraction_subset)` pairs,
    /// produces a ranked vector whose `ix` refers to positions in the
    /// original `sub`.
    pub fn fill_ranks_sparse(&self, values: &[f64], positions: &[u32]) -> Vec<(f64, GeneIx)> {
        values
            .iter()
            .zip(positions.iter())
            .map(|(&v, &pos)| (v, self.permutation[pos as usize] as GeneIx))
            .collect()
    }
}

/// A sparse forward map from matrix gene index (bounded by `capacity`) to a
/// dense position `[0, k)` in a user-assembled subset, reused across
/// fine-tuning iterations via cheap `clear()` rather than reallocation.
pub struct SubsetRemapper {
    capacity: u32,
    /// `mapping[gene] == capacity` means "unset"; otherwise it is the dense
    /// position assigned to `gene`.
    mapping: Vec<u32>,
    used: Vec<u32>,
}

impl SubsetRemapper {
    pub fn new(capacity: u32) -> Self {
        SubsetRemapper { capacity, mapping: vec![capacity; capacity as usize], used: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Appends `gene` to the subset if not already present. Duplicate calls
    /// are no-ops.
    pub fn add(&mut self, gene: GeneIx) {
        let slot = &mut self.mapping[gene as usize];
        if *slot == self.capacity {
            *slot = self.used.len() as u32;
            self.used.push(gene);
        }
    }

    /// Resets only the slots touched since the last clear — cheap, since
    /// fine-tuning's per-iteration subset is typically small relative to
    /// `capacity`.
    pub fn clear(&mut self) {
        for &gene in &self.used {
            self.mapping[gene as usize] = self.capacity;
        }
        self.used.clear();
    }

    /// The assembled subset in insertion order, suitable for passing to
    /// [`crate::rank::scaled_ranks_dense`] et al. as the new gene-position
    /// space.
    pub fn subset(&self) -> &[GeneIx] {
        &self.used
    }

    /// Filters `ranked` to entries present in the subset and rewrites their
    /// index to the dense position assigned by `add`.
    pub fn remap(&self, ranked: &[(f64, GeneIx)]) -> Vec<(f64, GeneIx)> {
        ranked
            .iter()
            .filter_map(|&(v, gene)| {
                let slot = self.mapping[gene as usize];
                if slot == self.capacity {
                    None
                } else {
                    Some((v, slot))
                }
            })
            .collect()
    }

    /// Remaps a cached simplified-rank stream (as produced by
    /// [`crate::rank::simplify_ranks`]) through this subset, rescales the
    /// surviving ranks, and scatters them into a dense `k`-length vector.
    /// Used by both single-reference fine-tuning and integrated scoring to
    /// rescore a cached profile under a smaller marker subset without
    /// re-ranking it from raw expression values.
    pub fn remap_and_rescale_dense(&self, raw_ranked: &[(u32, GeneIx)], k: usize) -> Vec<f64> {
        let as_f64: Vec<(f64, GeneIx)> = raw_ranked.iter().map(|&(v, ix)| (v as f64, ix)).collect();
        let remapped = self.remap(&as_f64);
        let values: Vec<f64> = remapped.iter().map(|&(v, _)| v).collect();
        let scaled = crate::rank::rescale_sorted(&values);
        let mut out = vec![0.0; k];
        for (&(_, ix), s) in remapped.iter().zip(scaled) {
            out[ix as usize] = s;
        }
        out
    }
}

/// Builds a compact lookup from arbitrary matrix gene index to position in
/// `sub`, used by sparse-input paths where a full `capacity`-sized array
/// would be wasteful relative to the number of distinct genes actually
/// touched. Valid only for lookups of genes that are present in `sub`.
pub fn sparse_position_lookup(sub: &[GeneIx]) -> FnvHashMap<GeneIx, u32> {
    sub.iter().enumerate().map(|(pos, &g)| (g, pos as u32)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_sorts_and_restores_original_positions() {
        let sub = [30u32, 10, 20];
        let sanitizer = SubsetSanitizer::new(&sub);
        assert_eq!(sanitizer.extraction_subset(), &[10, 20, 30]);
        let extracted = [100.0, 200.0, 300.0]; // values for genes 10, 20, 30
        let ranked = sanitizer.fill_ranks_dense(&extracted);
        // original sub = [30, 10, 20], so gene 10's value (100.0) belongs at
        // original position 1, gene 20's (200.0) at position 2, gene 30's
        // (300.0) at position 0.
        let as_map: FnvHashMap<u32, f64> = ranked.iter().map(|&(v, ix)| (ix, v)).collect();
        assert_eq!(as_map[&0], 300.0);
        assert_eq!(as_map[&1], 100.0);
        assert_eq!(as_map[&2], 200.0);
    }

    #[test]
    fn remapper_add_is_idempotent_and_clear_resets() {
        let mut remapper = SubsetRemapper::new(10);
        remapper.add(3);
        remapper.add(7);
        remapper.add(3);
        assert_eq!(remapper.len(), 2);
        assert_eq!(remapper.subset(), &[3, 7]);

        let ranked = vec![(1.0, 3u32), (2.0, 5u32), (3.0, 7u32)];
        let remapped = remapper.remap(&ranked);
        assert_eq!(remapped, vec![(1.0, 0), (3.0, 1)]);

        remapper.clear();
        assert!(remapper.is_empty());
        remapper.add(5);
        assert_eq!(remapper.subset(), &[5]);
    }
}
