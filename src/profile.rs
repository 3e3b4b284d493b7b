//! Shared "matrix column -> ranked representation" glue consumed by both
//! reference training (C4) and classification (C5/C6): turns one extracted
//! column into a scaled-rank vector (dense or sparse) plus the simplified
//! raw-rank streams fine-tuning needs to remap under a smaller marker subset
//! without having to re-extract or re-sort from scratch.

use crate::matrix::Extracted;
use crate::rank::{self, GeneIx};

#[derive(Clone)]
pub(crate) enum ProfileRank {
    Dense {
        scaled: Vec<f64>,
        all_ranked: Vec<(u32, GeneIx)>,
    },
    Sparse {
        zero_scaled: f64,
        nonzero_scaled: Vec<(f64, GeneIx)>,
        negative_ranked: Vec<(u32, GeneIx)>,
        positive_ranked: Vec<(u32, GeneIx)>,
    },
}

/// Splits a profile's nonzero `(value, ix)` pairs into two independently
/// simplified tied-rank streams by sign, the same split
/// [`rank::scaled_ranks_sparse`] computes internally — kept here so
/// fine-tuning can remap and rescale a sparse profile without
/// re-materializing its implicit zeros (§4.4 "Sparse training additionally
/// partitions...").
pub(crate) fn raw_rank_split_sparse(nonzero: &[(f64, GeneIx)]) -> (Vec<(u32, GeneIx)>, Vec<(u32, GeneIx)>) {
    let mut neg: Vec<(f64, GeneIx)> = nonzero.iter().copied().filter(|(v, _)| *v < 0.0).collect();
    let mut pos: Vec<(f64, GeneIx)> = nonzero.iter().copied().filter(|(v, _)| *v > 0.0).collect();
    neg.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
    pos.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
    (rank::simplify_ranks(&neg), rank::simplify_ranks(&pos))
}

pub(crate) fn rank_profile(extracted: Extracted, num_markers: usize) -> ProfileRank {
    match extracted {
        Extracted::Dense(values) => {
            let gene_ixs: Vec<GeneIx> = (0..values.len() as u32).collect();
            let sorted = rank::fill_ranks(&values, &gene_ixs);
            let all_ranked = rank::simplify_ranks(&sorted);
            let mut scaled = vec![0.0; values.len()];
            rank::scaled_ranks_dense(&values, &gene_ixs, &mut scaled);
            ProfileRank::Dense { scaled, all_ranked }
        }
        Extracted::Sparse { values, indices } => {
            let nonzero: Vec<(f64, GeneIx)> = values.into_iter().zip(indices).collect();
            let (zero_scaled, nonzero_scaled, _has_nonzero) =
                rank::scaled_ranks_sparse(&nonzero, num_markers);
            let (negative_ranked, positive_ranked) = raw_rank_split_sparse(&nonzero);
            ProfileRank::Sparse { zero_scaled, nonzero_scaled, negative_ranked, positive_ranked }
        }
        Extracted::Borrowed(_) => unreachable!("extract_column never returns a borrowed profile"),
    }
}
