// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Real sparse matrices with a frozen CSR structure.
//!
//! The master-equation assembler builds a union sparsity pattern once and
//! afterwards only overwrites numerical values in place. All per-step
//! operations (`matvec`, `matvec_tr`, `axpy_same_pattern`) run in O(nnz)
//! and allocate nothing after warmup.
//!
//! Matrices are single-process and column indices within each row are
//! kept sorted, which makes the subset-pattern AXPY a linear merge.

use crate::error::{Error, Result};

/// Triplet-format builder for a sparse matrix.
///
/// Duplicate entries are summed when converting to CSR.
#[derive(Debug, Clone)]
pub struct CooMat {
    nrows: usize,
    ncols: usize,
    entries: Vec<(usize, usize, f64)>,
}

impl CooMat {
    /// Create an empty builder of the given shape.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            entries: Vec::new(),
        }
    }

    /// Add `val` at position (row, col). Duplicates accumulate.
    pub fn push(&mut self, row: usize, col: usize, val: f64) {
        debug_assert!(row < self.nrows && col < self.ncols);
        self.entries.push((row, col, val));
    }

    /// Number of raw (possibly duplicate) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries have been pushed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to compressed sparse row format, summing duplicates.
    ///
    /// Entries that sum to exactly zero are kept: the caller may rely on
    /// the structural position (e.g. a union pattern seeded with zeros).
    pub fn to_csr(mut self) -> CsrMat {
        self.entries
            .sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_ptr = vec![0usize; self.nrows + 1];
        let mut col_idx = Vec::with_capacity(self.entries.len());
        let mut vals = Vec::with_capacity(self.entries.len());

        let mut last: Option<(usize, usize)> = None;
        for &(r, c, v) in &self.entries {
            if last == Some((r, c)) {
                if let Some(lv) = vals.last_mut() {
                    *lv += v;
                }
            } else {
                col_idx.push(c);
                vals.push(v);
                row_ptr[r + 1] += 1;
                last = Some((r, c));
            }
        }
        for r in 0..self.nrows {
            row_ptr[r + 1] += row_ptr[r];
        }

        CsrMat {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptr,
            col_idx,
            vals,
        }
    }
}

/// Real sparse matrix in compressed sparse row format.
///
/// The structure (row pointers and column indices) is frozen after
/// construction; only `vals` may change.
#[derive(Debug, Clone)]
pub struct CsrMat {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    vals: Vec<f64>,
}

impl CsrMat {
    /// Build from triplets.
    pub fn from_coo(coo: CooMat) -> Self {
        coo.to_csr()
    }

    /// Identity matrix of order n.
    pub fn identity(n: usize) -> Self {
        let mut coo = CooMat::new(n, n);
        for i in 0..n {
            coo.push(i, i, 1.0);
        }
        coo.to_csr()
    }

    /// Structurally dense matrix with all values zero. Used for the
    /// parameter Jacobian, whose columns have no fixed sparsity.
    pub fn dense_pattern(nrows: usize, ncols: usize) -> Self {
        let row_ptr = (0..=nrows).map(|r| r * ncols).collect();
        let col_idx = (0..nrows).flat_map(|_| 0..ncols).collect();
        Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            vals: vec![0.0; nrows * ncols],
        }
    }

    /// Mutable access to the stored values (the pattern stays frozen).
    /// Values are ordered row-major within the CSR layout.
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.vals
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    /// Stored value at (row, col), or 0.0 if not in the pattern.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let lo = self.row_ptr[row];
        let hi = self.row_ptr[row + 1];
        match self.col_idx[lo..hi].binary_search(&col) {
            Ok(k) => self.vals[lo + k],
            Err(_) => 0.0,
        }
    }

    /// Iterate over the stored (column, value) pairs of one row.
    pub fn row_iter(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let lo = self.row_ptr[row];
        let hi = self.row_ptr[row + 1];
        self.col_idx[lo..hi]
            .iter()
            .copied()
            .zip(self.vals[lo..hi].iter().copied())
    }

    /// y = A x. Panics in debug builds on shape mismatch.
    pub fn matvec(&self, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.ncols);
        debug_assert_eq!(y.len(), self.nrows);
        for (r, yr) in y.iter_mut().enumerate() {
            let mut acc = 0.0;
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                acc += self.vals[k] * x[self.col_idx[k]];
            }
            *yr = acc;
        }
    }

    /// y = Aᵀ x.
    pub fn matvec_tr(&self, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.nrows);
        debug_assert_eq!(y.len(), self.ncols);
        y.fill(0.0);
        for r in 0..self.nrows {
            let xr = x[r];
            if xr == 0.0 {
                continue;
            }
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                y[self.col_idx[k]] += self.vals[k] * xr;
            }
        }
    }

    /// A ← A + α·B, where B's nonzero pattern must be a subset of A's.
    ///
    /// This is the in-step assembly workhorse: the union pattern is built
    /// once, after which each step only merges values. A structural entry
    /// of B missing from A is a programmer error.
    pub fn axpy_same_pattern(&mut self, alpha: f64, b: &CsrMat) {
        debug_assert_eq!(self.nrows, b.nrows);
        debug_assert_eq!(self.ncols, b.ncols);
        for r in 0..self.nrows {
            let mut ka = self.row_ptr[r];
            let ka_end = self.row_ptr[r + 1];
            for kb in b.row_ptr[r]..b.row_ptr[r + 1] {
                let cb = b.col_idx[kb];
                while ka < ka_end && self.col_idx[ka] < cb {
                    ka += 1;
                }
                debug_assert!(
                    ka < ka_end && self.col_idx[ka] == cb,
                    "axpy_same_pattern: entry ({}, {}) not in target pattern",
                    r,
                    cb
                );
                self.vals[ka] += alpha * b.vals[kb];
                ka += 1;
            }
        }
    }

    /// A ← α·A.
    pub fn scale(&mut self, alpha: f64) {
        for v in &mut self.vals {
            *v *= alpha;
        }
    }

    /// A ← A + α·I. The diagonal must be structurally present.
    pub fn shift_identity(&mut self, alpha: f64) -> Result<()> {
        for r in 0..self.nrows.min(self.ncols) {
            let lo = self.row_ptr[r];
            let hi = self.row_ptr[r + 1];
            match self.col_idx[lo..hi].binary_search(&r) {
                Ok(k) => self.vals[lo + k] += alpha,
                Err(_) => {
                    return Err(Error::Numerical(format!(
                        "shift_identity: diagonal entry ({r}, {r}) missing from pattern"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Keep the pattern, zero all values.
    pub fn zero_values(&mut self) {
        self.vals.fill(0.0);
    }

    /// Structural union of several matrices (values all zero).
    ///
    /// `with_diagonal` additionally forces every diagonal position into
    /// the pattern so that `shift_identity` can never fail later.
    pub fn union_pattern(mats: &[&CsrMat], with_diagonal: bool) -> Result<CsrMat> {
        let first = mats.first().ok_or_else(|| {
            Error::Config("union_pattern: need at least one matrix".into())
        })?;
        let (nrows, ncols) = (first.nrows, first.ncols);
        for m in mats {
            if m.nrows != nrows || m.ncols != ncols {
                return Err(Error::Dimension {
                    context: "union_pattern".into(),
                    expected: nrows,
                    actual: m.nrows,
                });
            }
        }
        let mut coo = CooMat::new(nrows, ncols);
        for m in mats {
            for r in 0..nrows {
                for k in m.row_ptr[r]..m.row_ptr[r + 1] {
                    coo.push(r, m.col_idx[k], 0.0);
                }
            }
        }
        if with_diagonal {
            for i in 0..nrows.min(ncols) {
                coo.push(i, i, 0.0);
            }
        }
        Ok(coo.to_csr())
    }

    /// Kronecker product A ⊗ B.
    pub fn kron(a: &CsrMat, b: &CsrMat) -> CsrMat {
        let mut coo = CooMat::new(a.nrows * b.nrows, a.ncols * b.ncols);
        for ra in 0..a.nrows {
            for ka in a.row_ptr[ra]..a.row_ptr[ra + 1] {
                let (ca, va) = (a.col_idx[ka], a.vals[ka]);
                for rb in 0..b.nrows {
                    for kb in b.row_ptr[rb]..b.row_ptr[rb + 1] {
                        coo.push(
                            ra * b.nrows + rb,
                            ca * b.ncols + b.col_idx[kb],
                            va * b.vals[kb],
                        );
                    }
                }
            }
        }
        coo.to_csr()
    }

    /// Sparse matrix product A·B.
    pub fn matmul(&self, b: &CsrMat) -> Result<CsrMat> {
        if self.ncols != b.nrows {
            return Err(Error::Dimension {
                context: "matmul".into(),
                expected: self.ncols,
                actual: b.nrows,
            });
        }
        let mut coo = CooMat::new(self.nrows, b.ncols);
        let mut scratch = vec![0.0f64; b.ncols];
        let mut touched: Vec<usize> = Vec::new();
        for r in 0..self.nrows {
            touched.clear();
            for ka in self.row_ptr[r]..self.row_ptr[r + 1] {
                let (ca, va) = (self.col_idx[ka], self.vals[ka]);
                for kb in b.row_ptr[ca]..b.row_ptr[ca + 1] {
                    let cb = b.col_idx[kb];
                    if scratch[cb] == 0.0 && !touched.contains(&cb) {
                        touched.push(cb);
                    }
                    scratch[cb] += va * b.vals[kb];
                }
            }
            for &c in &touched {
                coo.push(r, c, scratch[c]);
                scratch[c] = 0.0;
            }
        }
        Ok(coo.to_csr())
    }

    /// Linear combination α·A + β·B without pattern constraints.
    pub fn add_scaled(alpha: f64, a: &CsrMat, beta: f64, b: &CsrMat) -> Result<CsrMat> {
        if a.nrows != b.nrows || a.ncols != b.ncols {
            return Err(Error::Dimension {
                context: "add_scaled".into(),
                expected: a.nrows,
                actual: b.nrows,
            });
        }
        let mut coo = CooMat::new(a.nrows, a.ncols);
        for (m, s) in [(a, alpha), (b, beta)] {
            for r in 0..m.nrows {
                for k in m.row_ptr[r]..m.row_ptr[r + 1] {
                    coo.push(r, m.col_idx[k], s * m.vals[k]);
                }
            }
        }
        Ok(coo.to_csr())
    }

    /// Explicit transpose. Construction-time only; the hot path uses
    /// [`CsrMat::matvec_tr`] instead.
    pub fn transpose(&self) -> CsrMat {
        let mut coo = CooMat::new(self.ncols, self.nrows);
        for r in 0..self.nrows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                coo.push(self.col_idx[k], r, self.vals[k]);
            }
        }
        coo.to_csr()
    }

    /// Dense copy, for reference comparisons in tests.
    pub fn to_dense(&self) -> ndarray::Array2<f64> {
        let mut out = ndarray::Array2::zeros((self.nrows, self.ncols));
        for r in 0..self.nrows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                out[[r, self.col_idx[k]]] += self.vals[k];
            }
        }
        out
    }
}

/// ‖x‖₂.
pub fn norm2(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// ‖x‖∞.
pub fn norm_inf(x: &[f64]) -> f64 {
    x.iter().fold(0.0f64, |m, v| m.max(v.abs()))
}

/// x · y.
pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}
