//! The matrix abstraction consumed by training and classification (§6.1).
//! Rows are genes, columns are profiles/cells. `consecutive_extractor` yields,
//! per column, either a dense array over a caller-supplied sorted-unique gene
//! subset, or a sparse `(value, index)` pairing whose indices refer to
//! positions *within that subset* rather than the original row space.

use crate::error::{Result, SinglePpError};

/// One column's data extracted over a caller-chosen gene subset.
pub enum Extracted<'a> {
    Dense(Vec<f64>),
    Sparse { values: Vec<f64>, indices: Vec<u32> },
    #[allow(dead_code)]
    Borrowed(&'a [f64]),
}

/// Row-count / column-count queries plus per-column subset extraction. The
/// core assumes extraction is thread-safe across distinct extractor
/// instances, never across a single shared one.
pub trait ExpressionMatrix: Sync {
    fn nrow(&self) -> usize;
    fn ncol(&self) -> usize;
    fn is_sparse(&self) -> bool;

    /// Extracts one column's values at `subset` (sorted, unique, row
    /// indices), returning a plain `Vec<f64>` aligned with `subset` for dense
    /// storage, or `(values, positions_within_subset)` for sparse storage.
    fn extract_column(&self, col: usize, subset: &[u32]) -> Extracted<'static>;
}

/// Column-major dense matrix, `data[col * nrow + row]`.
pub struct DenseMatrix {
    nrow: usize,
    ncol: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn from_col_major(nrow: usize, ncol: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != nrow * ncol {
            return Err(SinglePpError::shape_mismatch(format!(
                "dense matrix expects {} values ({}x{}), got {}",
                nrow * ncol,
                nrow,
                ncol,
                data.len()
            )));
        }
        Ok(DenseMatrix { nrow, ncol, data })
    }

    pub fn from_columns(nrow: usize, columns: Vec<Vec<f64>>) -> Result<Self> {
        let ncol = columns.len();
        let mut data = Vec::with_capacity(nrow * ncol);
        for col in &columns {
            if col.len() != nrow {
                return Err(SinglePpError::shape_mismatch(format!(
                    "column has {} rows, expected {}",
                    col.len(),
                    nrow
                )));
            }
            data.extend_from_slice(col);
        }
        Ok(DenseMatrix { nrow, ncol, data })
    }

    pub fn column(&self, col: usize) -> &[f64] {
        &self.data[col * self.nrow..(col + 1) * self.nrow]
    }
}

impl ExpressionMatrix for DenseMatrix {
    fn nrow(&self) -> usize {
        self.nrow
    }

    fn ncol(&self) -> usize {
        self.ncol
    }

    fn is_sparse(&self) -> bool {
        false
    }

    fn extract_column(&self, col: usize, subset: &[u32]) -> Extracted<'static> {
        let column = self.column(col);
        let values = subset.iter().map(|&g| column[g as usize]).collect();
        Extracted::Dense(values)
    }
}

/// CSC-like sparse matrix: `indices[indptrs[c]..indptrs[c+1]]` gives the
/// sorted row indices present in column `c`, paired with `values` at the same
/// offsets. Rows absent from a column are implicitly zero.
pub struct SparseMatrix {
    nrow: usize,
    ncol: usize,
    values: Vec<f64>,
    indices: Vec<u32>,
    indptrs: Vec<usize>,
}

impl SparseMatrix {
    pub fn from_csc(
        nrow: usize,
        ncol: usize,
        values: Vec<f64>,
        indices: Vec<u32>,
        indptrs: Vec<usize>,
    ) -> Result<Self> {
        if indptrs.len() != ncol + 1 {
            return Err(SinglePpError::shape_mismatch(format!(
                "indptrs must have ncol+1 = {} entries, got {}",
                ncol + 1,
                indptrs.len()
            )));
        }
        if values.len() != indices.len() {
            return Err(SinglePpError::shape_mismatch(
                "values and indices must have equal length",
            ));
        }
        for &ix in &indices {
            if ix as usize >= nrow {
                return Err(SinglePpError::out_of_range(format!(
                    "row index {ix} out of range for {nrow} rows"
                )));
            }
        }
        Ok(SparseMatrix { nrow, ncol, values, indices, indptrs })
    }

    pub fn column_nonzeros(&self, col: usize) -> (&[f64], &[u32]) {
        let start = self.indptrs[col];
        let end = self.indptrs[col + 1];
        (&self.values[start..end], &self.indices[start..end])
    }
}

impl ExpressionMatrix for SparseMatrix {
    fn nrow(&self) -> usize {
        self.nrow
    }

    fn ncol(&self) -> usize {
        self.ncol
    }

    fn is_sparse(&self) -> bool {
        true
    }

    fn extract_column(&self, col: usize, subset: &[u32]) -> Extracted<'static> {
        let (values, indices) = self.column_nonzeros(col);
        let mut out_values = Vec::new();
        let mut out_positions = Vec::new();
        // subset is sorted unique; indices within a CSC column are sorted too,
        // so a merge walk avoids an O(|subset|) lookup per nonzero.
        let mut j = 0usize;
        for (pos, &g) in subset.iter().enumerate() {
            while j < indices.len() && indices[j] < g {
                j += 1;
            }
            if j < indices.len() && indices[j] == g {
                out_values.push(values[j]);
                out_positions.push(pos as u32);
            }
        }
        Extracted::Sparse { values: out_values, indices: out_positions }
    }
}

/// Scatters an [`Extracted`] column into a dense `len`-length buffer,
/// zero-filling implicit positions. Used where a consumer needs every
/// position materialized regardless of the matrix's own storage (the classic
/// marker chooser's full-row difference sums, integrated training/
/// classification's per-profile densification over a typically small
/// universe/miniverse).
pub(crate) fn densify(extracted: Extracted<'_>, len: usize) -> Vec<f64> {
    match extracted {
        Extracted::Dense(values) => values,
        Extracted::Sparse { values, indices } => {
            let mut out = vec![0.0; len];
            for (v, ix) in values.into_iter().zip(indices) {
                out[ix as usize] = v;
            }
            out
        }
        Extracted::Borrowed(values) => values.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_extracts_subset_in_order() {
        let m = DenseMatrix::from_columns(4, vec![vec![1.0, 2.0, 3.0, 4.0]]).unwrap();
        match m.extract_column(0, &[2, 0, 3]) {
            Extracted::Dense(v) => assert_eq!(v, vec![3.0, 1.0, 4.0]),
            _ => panic!("expected dense"),
        }
    }

    #[test]
    fn sparse_extracts_only_present_rows() {
        let m = SparseMatrix::from_csc(5, 1, vec![10.0, 30.0], vec![1, 3], vec![0, 2]).unwrap();
        match m.extract_column(0, &[0, 1, 2, 3, 4]) {
            Extracted::Sparse { values, indices } => {
                assert_eq!(values, vec![10.0, 30.0]);
                assert_eq!(indices, vec![1, 3]);
            }
            _ => panic!("expected sparse"),
        }
    }
}
