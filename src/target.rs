// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Optimization-target interface.
//!
//! The terminal cost J_terminal(ρ(T)) is supplied by a collaborator
//! implementing [`OptimTarget`]. The interface is split reverse-mode
//! style: `eval_j` produces a raw complex overlap, `finalize_j` reduces
//! it to the scalar cost, and the `_diff` counterparts push the
//! corresponding adjoints back. The split lets the objective reuse one
//! forward overlap for both the cost and its derivative, and lets a
//! Schrödinger overlap square its magnitude *after* averaging.
//!
//! Gate algebra (gate zoos, basis rotations) stays outside the engine;
//! [`PureStateTarget`] covers state preparation and single gate columns.

use ndarray::Array2;
use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::mastereq::StateLayout;

/// Terminal-cost collaborator.
pub trait OptimTarget {
    /// Raw overlap (re, im) between the state and the target:
    /// Tr(ρ_tgt†ρ) for Lindblad, ⟨ψ_tgt|ψ⟩ for Schrödinger.
    fn eval_j(&self, x: &[f64]) -> (f64, f64);

    /// Reduce the (possibly averaged) overlap to the scalar cost.
    fn finalize_j(&self, re: f64, im: f64) -> f64;

    /// Derivative of [`OptimTarget::finalize_j`] with respect to (re, im).
    fn finalize_j_diff(&self, re: f64, im: f64) -> (f64, f64);

    /// Accumulate (∂(re, im)/∂x)ᵀ·(re_bar, im_bar) into `xbar`.
    fn eval_j_diff(&self, x: &[f64], xbar: &mut [f64], re_bar: f64, im_bar: f64);
}

/// Infidelity against a fixed pure state (or a gate column applied to a
/// basis initial condition).
#[derive(Debug, Clone)]
pub struct PureStateTarget {
    layout: StateLayout,
    /// Target in the same real-block encoding as the propagated state.
    target: Vec<f64>,
}

impl PureStateTarget {
    /// Target from an explicit real-encoded state vector.
    pub fn from_state_vector(layout: StateLayout, target: Vec<f64>) -> Result<Self> {
        if target.len() != layout.dim_state() {
            return Err(Error::Dimension {
                context: "target state vector".into(),
                expected: layout.dim_state(),
                actual: target.len(),
            });
        }
        Ok(Self { layout, target })
    }

    /// Target from a pure state |ψ⟩: ρ_tgt = |ψ⟩⟨ψ| in Lindblad mode,
    /// ψ itself in Schrödinger mode.
    pub fn from_pure_state(layout: StateLayout, psi: &[Complex64]) -> Result<Self> {
        let n = layout.dim_rho;
        if psi.len() != n {
            return Err(Error::Dimension {
                context: "target pure state".into(),
                expected: n,
                actual: psi.len(),
            });
        }
        let mut target = vec![0.0; layout.dim_state()];
        if layout.lindblad {
            for j in 0..n {
                for i in 0..n {
                    let rho_ij = psi[i] * psi[j].conj();
                    target[layout.idx_re(layout.vec_id(i, j))] = rho_ij.re;
                    target[layout.idx_im(layout.vec_id(i, j))] = rho_ij.im;
                }
            }
        } else {
            for i in 0..n {
                target[layout.idx_re(i)] = psi[i].re;
                target[layout.idx_im(i)] = psi[i].im;
            }
        }
        Ok(Self { layout, target })
    }

    /// Target V|initial_id⟩ for a unitary V on the full Hilbert space.
    pub fn from_gate_column(
        layout: StateLayout,
        gate: &Array2<Complex64>,
        initial_id: usize,
    ) -> Result<Self> {
        let n = layout.dim_rho;
        if gate.nrows() != n || gate.ncols() != n {
            return Err(Error::Dimension {
                context: "target gate".into(),
                expected: n,
                actual: gate.nrows(),
            });
        }
        if initial_id >= n {
            return Err(Error::Config(format!(
                "gate column {} out of range (N = {})",
                initial_id, n
            )));
        }
        let psi: Vec<Complex64> = (0..n).map(|i| gate[[i, initial_id]]).collect();
        Self::from_pure_state(layout, &psi)
    }

    /// The encoded target state.
    pub fn target_state(&self) -> &[f64] {
        &self.target
    }
}

impl OptimTarget for PureStateTarget {
    fn eval_j(&self, x: &[f64]) -> (f64, f64) {
        debug_assert_eq!(x.len(), self.target.len());
        let nv = self.layout.dim_vec();
        let (tu, tv) = self.target.split_at(nv);
        let (u, v) = x.split_at(nv);
        let mut re = 0.0;
        let mut im = 0.0;
        for i in 0..nv {
            re += tu[i] * u[i] + tv[i] * v[i];
            im += tu[i] * v[i] - tv[i] * u[i];
        }
        (re, im)
    }

    fn finalize_j(&self, re: f64, im: f64) -> f64 {
        if self.layout.lindblad {
            // Tr(ρ_tgt ρ) is real for Hermitian targets.
            1.0 - re
        } else {
            1.0 - (re * re + im * im)
        }
    }

    fn finalize_j_diff(&self, re: f64, im: f64) -> (f64, f64) {
        if self.layout.lindblad {
            (-1.0, 0.0)
        } else {
            (-2.0 * re, -2.0 * im)
        }
    }

    fn eval_j_diff(&self, x: &[f64], xbar: &mut [f64], re_bar: f64, im_bar: f64) {
        debug_assert_eq!(x.len(), xbar.len());
        let nv = self.layout.dim_vec();
        let (tu, tv) = self.target.split_at(nv);
        let (ubar, vbar) = xbar.split_at_mut(nv);
        for i in 0..nv {
            ubar[i] += re_bar * tu[i] - im_bar * tv[i];
            vbar[i] += re_bar * tv[i] + im_bar * tu[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn qubit_layout_lindblad() -> StateLayout {
        StateLayout::new(2, true)
    }

    fn excited_state() -> Vec<Complex64> {
        vec![Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)]
    }

    #[test]
    fn test_self_overlap_is_one() {
        let layout = qubit_layout_lindblad();
        let target = PureStateTarget::from_pure_state(layout, &excited_state()).unwrap();
        let x = target.target_state().to_vec();
        let (re, im) = target.eval_j(&x);
        assert_relative_eq!(re, 1.0, epsilon = 1e-14);
        assert_relative_eq!(im, 0.0, epsilon = 1e-14);
        assert_relative_eq!(target.finalize_j(re, im), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_orthogonal_states_have_unit_infidelity() {
        let layout = qubit_layout_lindblad();
        let ground = vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)];
        let target = PureStateTarget::from_pure_state(layout, &excited_state()).unwrap();
        let other = PureStateTarget::from_pure_state(layout, &ground).unwrap();
        let (re, im) = target.eval_j(other.target_state());
        assert_relative_eq!(target.finalize_j(re, im), 1.0, epsilon = 1e-14);
    }

    #[test]
    fn test_schrodinger_phase_invariance() {
        // A global phase must not change the Schrödinger fidelity.
        let layout = StateLayout::new(2, false);
        let psi = vec![
            Complex64::new(1.0 / 2.0f64.sqrt(), 0.0),
            Complex64::new(0.0, 1.0 / 2.0f64.sqrt()),
        ];
        let target = PureStateTarget::from_pure_state(layout, &psi).unwrap();
        let phase = Complex64::from_polar(1.0, 0.77);
        let rotated: Vec<Complex64> = psi.iter().map(|z| z * phase).collect();
        let rotated_target = PureStateTarget::from_pure_state(layout, &rotated).unwrap();
        let (re, im) = target.eval_j(rotated_target.target_state());
        assert_relative_eq!(target.finalize_j(re, im), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_eval_j_diff_matches_finite_differences() {
        let layout = qubit_layout_lindblad();
        let target = PureStateTarget::from_pure_state(layout, &excited_state()).unwrap();
        let dim = layout.dim_state();
        let mut x: Vec<f64> = (0..dim).map(|i| 0.1 * (i as f64 + 1.0)).collect();
        let (re_bar, im_bar) = (0.8, -0.3);

        let mut xbar = vec![0.0; dim];
        target.eval_j_diff(&x, &mut xbar, re_bar, im_bar);

        let eps = 1e-7;
        for i in 0..dim {
            let orig = x[i];
            x[i] = orig + eps;
            let (rp, ip) = target.eval_j(&x);
            x[i] = orig - eps;
            let (rm, im_) = target.eval_j(&x);
            x[i] = orig;
            let fd = (re_bar * (rp - rm) + im_bar * (ip - im_)) / (2.0 * eps);
            assert_relative_eq!(xbar[i], fd, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_gate_column_target() {
        // X-gate column 0 is |1⟩.
        let layout = qubit_layout_lindblad();
        let mut x_gate = Array2::zeros((2, 2));
        x_gate[[0, 1]] = Complex64::new(1.0, 0.0);
        x_gate[[1, 0]] = Complex64::new(1.0, 0.0);
        let from_gate = PureStateTarget::from_gate_column(layout, &x_gate, 0).unwrap();
        let from_state = PureStateTarget::from_pure_state(layout, &excited_state()).unwrap();
        for (a, b) in from_gate.target_state().iter().zip(from_state.target_state()) {
            assert_relative_eq!(*a, *b);
        }
    }

    #[test]
    fn test_dimension_checks() {
        let layout = qubit_layout_lindblad();
        assert!(PureStateTarget::from_state_vector(layout, vec![0.0; 3]).is_err());
        assert!(PureStateTarget::from_pure_state(layout, &[Complex64::new(1.0, 0.0)]).is_err());
        let gate = Array2::<Complex64>::zeros((2, 2));
        assert!(PureStateTarget::from_gate_column(layout, &gate, 5).is_err());
    }
}
