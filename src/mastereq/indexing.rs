// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Index policy for the real-valued vectorized state.
//!
//! A density matrix ρ ∈ ℂ^{N×N} is vectorized column-major,
//! vec_id(i, j) = i + j·N, and split into two real blocks of length N²:
//! the real block first, the imaginary block second. The Schrödinger
//! state ψ ∈ ℂ^N uses the same two-block split with length N. Every
//! read and write in the crate goes through this policy.

/// Mapping between (i, j, re/im) positions and offsets in the real
/// state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLayout {
    /// Hilbert-space dimension N.
    pub dim_rho: usize,
    /// True for the Lindblad (density-matrix) representation.
    pub lindblad: bool,
}

impl StateLayout {
    /// Create a layout for dimension N.
    pub fn new(dim_rho: usize, lindblad: bool) -> Self {
        Self { dim_rho, lindblad }
    }

    /// Length of the complex vector being represented: N² or N.
    pub fn dim_vec(&self) -> usize {
        if self.lindblad {
            self.dim_rho * self.dim_rho
        } else {
            self.dim_rho
        }
    }

    /// Length of the real state vector: 2N² or 2N.
    pub fn dim_state(&self) -> usize {
        2 * self.dim_vec()
    }

    /// Column-major offset of ρ_{ij} within vec(ρ).
    pub fn vec_id(&self, i: usize, j: usize) -> usize {
        debug_assert!(self.lindblad);
        i + j * self.dim_rho
    }

    /// Offset of the real part of complex component k.
    pub fn idx_re(&self, k: usize) -> usize {
        k
    }

    /// Offset of the imaginary part of complex component k.
    pub fn idx_im(&self, k: usize) -> usize {
        self.dim_vec() + k
    }

    /// Offset of Re ρ_{ii} (Lindblad) or Re ψ_i (Schrödinger).
    pub fn diag_re(&self, i: usize) -> usize {
        if self.lindblad {
            self.idx_re(self.vec_id(i, i))
        } else {
            self.idx_re(i)
        }
    }

    /// Offset of Im ρ_{ii} (Lindblad) or Im ψ_i (Schrödinger).
    pub fn diag_im(&self, i: usize) -> usize {
        if self.lindblad {
            self.idx_im(self.vec_id(i, i))
        } else {
            self.idx_im(i)
        }
    }

    /// Trace of the represented density matrix (Lindblad only).
    pub fn trace(&self, x: &[f64]) -> f64 {
        debug_assert!(self.lindblad);
        (0..self.dim_rho).map(|i| x[self.diag_re(i)]).sum()
    }
}

/// Level of oscillator k encoded in composite Hilbert index i.
///
/// The first oscillator varies slowest, matching the Kronecker order
/// I_{n_1} ⊗ … ⊗ a_k ⊗ … ⊗ I_{n_K}.
pub fn level_of(i: usize, k: usize, nlevels: &[usize]) -> usize {
    let stride: usize = nlevels[k + 1..].iter().product();
    (i / stride) % nlevels[k]
}

/// True if composite state i occupies the guard level (the highest,
/// non-essential level) of oscillator k.
pub fn is_guard_level_of(i: usize, k: usize, nlevels: &[usize], nessential: &[usize]) -> bool {
    nessential[k] < nlevels[k] && level_of(i, k, nlevels) == nlevels[k] - 1
}

/// True if composite state i occupies the guard level of at least one
/// oscillator.
pub fn is_guard_level(i: usize, nlevels: &[usize], nessential: &[usize]) -> bool {
    (0..nlevels.len()).any(|k| is_guard_level_of(i, k, nlevels, nessential))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_id_column_major() {
        let layout = StateLayout::new(3, true);
        assert_eq!(layout.vec_id(0, 0), 0);
        assert_eq!(layout.vec_id(2, 0), 2);
        assert_eq!(layout.vec_id(0, 1), 3);
        assert_eq!(layout.vec_id(2, 2), 8);
    }

    #[test]
    fn test_block_offsets() {
        let layout = StateLayout::new(2, true);
        assert_eq!(layout.dim_vec(), 4);
        assert_eq!(layout.dim_state(), 8);
        assert_eq!(layout.idx_re(3), 3);
        assert_eq!(layout.idx_im(3), 7);
    }

    #[test]
    fn test_schrodinger_layout() {
        let layout = StateLayout::new(4, false);
        assert_eq!(layout.dim_state(), 8);
        assert_eq!(layout.diag_re(2), 2);
        assert_eq!(layout.diag_im(2), 6);
    }

    #[test]
    fn test_trace() {
        let layout = StateLayout::new(2, true);
        let mut x = vec![0.0; 8];
        x[layout.diag_re(0)] = 0.25;
        x[layout.diag_re(1)] = 0.75;
        assert!((layout.trace(&x) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_level_decomposition() {
        // Two oscillators with 2 and 3 levels; first varies slowest.
        let nlevels = [2, 3];
        assert_eq!(level_of(0, 0, &nlevels), 0);
        assert_eq!(level_of(0, 1, &nlevels), 0);
        assert_eq!(level_of(2, 1, &nlevels), 2);
        assert_eq!(level_of(3, 0, &nlevels), 1);
        assert_eq!(level_of(5, 0, &nlevels), 1);
        assert_eq!(level_of(5, 1, &nlevels), 2);
    }

    #[test]
    fn test_guard_levels() {
        // Oscillator 0: 3 levels, 2 essential -> level 2 is the guard.
        // Oscillator 1: 2 levels, all essential -> no guard.
        let nlevels = [3, 2];
        let nessential = [2, 2];
        let guards: Vec<usize> = (0..6)
            .filter(|&i| is_guard_level(i, &nlevels, &nessential))
            .collect();
        assert_eq!(guards, vec![4, 5]);
        assert!(is_guard_level_of(4, 0, &nlevels, &nessential));
        assert!(!is_guard_level_of(4, 1, &nlevels, &nessential));
    }

    #[test]
    fn test_no_guards_when_all_essential() {
        let nlevels = [2, 2];
        let nessential = [2, 2];
        assert!((0..4).all(|i| !is_guard_level(i, &nlevels, &nessential)));
    }
}
