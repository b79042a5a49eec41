// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Control-pulse discretization.
//!
//! Each control pair (p(t), q(t)) is parameterized by quadratic B-spline
//! envelopes under carrier waves:
//!
//!   p(t) = Σ_c [ cos(f_c t)·u_c(t) − sin(f_c t)·v_c(t) ],
//!   q(t) = Σ_c [ sin(f_c t)·u_c(t) + cos(f_c t)·v_c(t) ],
//!
//! where u_c, v_c are quadratic B-spline expansions in the coefficient
//! pairs (α_{c,ℓ}, β_{c,ℓ}). Basis functions have local support of width
//! 3Δ with knot spacing Δ = T/(L − 2), so an evaluation touches at most
//! three splines. The ground (first) carrier frequency is subtracted
//! from every carrier to avoid aliasing.
//!
//! The two outermost splines at each end of the knot line are pinned to
//! zero so that p(0) = q(0) = p(T) = q(T) = 0 and the pulse starts and
//! stops smoothly. The pinned coefficients keep their slots in the
//! design vector; their gradient entries are exactly zero.

pub mod transfer;

pub use transfer::{CubicSpline, TransferFunction};

use crate::error::{Error, Result};

/// Quadratic B-spline × carrier-wave evaluator for one oscillator's
/// control pair.
#[derive(Debug, Clone)]
pub struct ControlBasis {
    nsplines: usize,
    dtknot: f64,
    tcenters: Vec<f64>,
    /// Carrier frequencies with the ground carrier subtracted.
    detuned_freqs: Vec<f64>,
}

impl ControlBasis {
    /// Create a basis with `nsplines` coefficients per carrier on [0, T].
    ///
    /// # Arguments
    /// * `nsplines` — Spline coefficients per carrier (≥ 5; four are pinned).
    /// * `total_time` — Pulse duration T.
    /// * `carrier_freqs` — Carrier angular frequencies; the first is the
    ///   ground carrier.
    pub fn new(nsplines: usize, total_time: f64, carrier_freqs: &[f64]) -> Result<Self> {
        if nsplines < 5 {
            return Err(Error::Config(format!(
                "nspline must be at least 5, got {}",
                nsplines
            )));
        }
        if total_time <= 0.0 {
            return Err(Error::Config("total_time must be > 0".into()));
        }
        let ground = *carrier_freqs
            .first()
            .ok_or_else(|| Error::Config("need at least one carrier frequency".into()))?;

        let dtknot = total_time / (nsplines as f64 - 2.0);
        let tcenters = (0..nsplines)
            .map(|l| dtknot * (l as f64 - 0.5))
            .collect();
        let detuned_freqs = carrier_freqs.iter().map(|f| f - ground).collect();

        Ok(Self {
            nsplines,
            dtknot,
            tcenters,
            detuned_freqs,
        })
    }

    /// Spline coefficients per carrier.
    pub fn nsplines(&self) -> usize {
        self.nsplines
    }

    /// Number of carrier waves.
    pub fn ncarriers(&self) -> usize {
        self.detuned_freqs.len()
    }

    /// Total number of real parameters: 2 per (carrier, spline) pair.
    pub fn num_params(&self) -> usize {
        2 * self.ncarriers() * self.nsplines
    }

    /// Knot spacing Δ = T/(L − 2).
    pub fn dtknot(&self) -> f64 {
        self.dtknot
    }

    /// Evaluate (p, q) at time t from the coefficient slice.
    ///
    /// Layout of `coeffs`: for each carrier c, for each spline ℓ, the
    /// pair (α_{c,ℓ}, β_{c,ℓ}).
    pub fn evaluate(&self, t: f64, coeffs: &[f64]) -> (f64, f64) {
        debug_assert_eq!(coeffs.len(), self.num_params());
        let mut p = 0.0;
        let mut q = 0.0;
        for (c, &freq) in self.detuned_freqs.iter().enumerate() {
            let mut u = 0.0;
            let mut v = 0.0;
            self.for_active_splines(t, |l, b| {
                let base = 2 * (c * self.nsplines + l);
                u += coeffs[base] * b;
                v += coeffs[base + 1] * b;
            });
            let (sin, cos) = (freq * t).sin_cos();
            p += cos * u - sin * v;
            q += sin * u + cos * v;
        }
        (p, q)
    }

    /// Accumulate the vector-Jacobian product ∂(p,q)/∂θ · (p̄, q̄) into
    /// `grad` (same layout and length as the coefficient slice).
    pub fn derivative(&self, t: f64, pbar: f64, qbar: f64, grad: &mut [f64]) {
        debug_assert_eq!(grad.len(), self.num_params());
        for (c, &freq) in self.detuned_freqs.iter().enumerate() {
            let (sin, cos) = (freq * t).sin_cos();
            self.for_active_splines(t, |l, b| {
                let base = 2 * (c * self.nsplines + l);
                grad[base] += b * (cos * pbar + sin * qbar);
                grad[base + 1] += b * (-sin * pbar + cos * qbar);
            });
        }
    }

    /// Visit the (at most three) live splines with nonzero support at t.
    fn for_active_splines<F: FnMut(usize, f64)>(&self, t: f64, mut f: F) {
        let k = (t / self.dtknot).floor() as isize;
        for l in (k - 1)..=(k + 2) {
            if l < 0 || l as usize >= self.nsplines {
                continue;
            }
            let l = l as usize;
            let b = self.basis(l, t);
            if b != 0.0 {
                f(l, b);
            }
        }
    }

    /// Quadratic B-spline basis function ℓ at time t; zero for the
    /// pinned boundary splines and outside the 3Δ support.
    fn basis(&self, l: usize, t: f64) -> f64 {
        if l < 2 || l + 2 >= self.nsplines {
            return 0.0;
        }
        let tau = (t - self.tcenters[l]) / self.dtknot;
        if !(-1.5..1.5).contains(&tau) {
            0.0
        } else if tau < -0.5 {
            0.5 * (tau + 1.5) * (tau + 1.5)
        } else if tau < 0.5 {
            0.75 - tau * tau
        } else {
            0.5 * (1.5 - tau) * (1.5 - tau)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn coeffs_for(basis: &ControlBasis, seed: u64) -> Vec<f64> {
        // Cheap deterministic fill; values in (-1, 1).
        (0..basis.num_params())
            .map(|i| {
                let x = ((i as u64 + 1) * (seed + 17)) % 1009;
                x as f64 / 504.5 - 1.0
            })
            .collect()
    }

    #[test]
    fn test_zero_at_boundaries() {
        let basis = ControlBasis::new(10, 4.0, &[0.0, 1.5]).unwrap();
        let coeffs = coeffs_for(&basis, 3);
        let (p0, q0) = basis.evaluate(0.0, &coeffs);
        let (pt, qt) = basis.evaluate(4.0, &coeffs);
        assert_relative_eq!(p0, 0.0, epsilon = 1e-14);
        assert_relative_eq!(q0, 0.0, epsilon = 1e-14);
        assert_relative_eq!(pt, 0.0, epsilon = 1e-14);
        assert_relative_eq!(qt, 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_nonzero_in_interior() {
        let basis = ControlBasis::new(10, 4.0, &[0.0]).unwrap();
        let coeffs = coeffs_for(&basis, 5);
        let (p, q) = basis.evaluate(2.0, &coeffs);
        assert!(p.abs() > 1e-6 || q.abs() > 1e-6);
    }

    #[test]
    fn test_single_spline_bump() {
        // One live coefficient produces the quadratic bump around its center.
        let basis = ControlBasis::new(9, 7.0, &[0.0]).unwrap();
        let mut coeffs = vec![0.0; basis.num_params()];
        coeffs[2 * 4] = 1.0; // α of spline 4
        let tc = basis.dtknot() * 3.5;
        let (p_center, _) = basis.evaluate(tc, &coeffs);
        assert_relative_eq!(p_center, 0.75, epsilon = 1e-12);
        let (p_half, _) = basis.evaluate(tc + 0.5 * basis.dtknot(), &coeffs);
        assert_relative_eq!(p_half, 0.5, epsilon = 1e-12);
        let (p_out, _) = basis.evaluate(tc + 1.5 * basis.dtknot(), &coeffs);
        assert_relative_eq!(p_out, 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_ground_carrier_subtracted() {
        // With a single carrier the effective frequency is zero, so the
        // p channel is the pure α-spline envelope and q the β envelope.
        let basis = ControlBasis::new(8, 2.0, &[3.7]).unwrap();
        let mut coeffs = vec![0.0; basis.num_params()];
        coeffs[2 * 3] = 0.6; // α
        coeffs[2 * 4 + 1] = -0.4; // β
        let t = 1.1;
        let (p, q) = basis.evaluate(t, &coeffs);
        let mut expect_p = 0.0;
        let mut expect_q = 0.0;
        basis.for_active_splines(t, |l, b| {
            if l == 3 {
                expect_p += 0.6 * b;
            }
            if l == 4 {
                expect_q += -0.4 * b;
            }
        });
        assert_relative_eq!(p, expect_p, epsilon = 1e-14);
        assert_relative_eq!(q, expect_q, epsilon = 1e-14);
    }

    #[test]
    fn test_derivative_matches_finite_differences() {
        let basis = ControlBasis::new(11, 5.0, &[0.0, 2.3, -1.1]).unwrap();
        let mut coeffs = coeffs_for(&basis, 11);
        let t = 2.34;
        let (pbar, qbar) = (0.7, -1.3);

        let mut grad = vec![0.0; basis.num_params()];
        basis.derivative(t, pbar, qbar, &mut grad);

        let eps = 1e-6;
        for i in 0..basis.num_params() {
            let orig = coeffs[i];
            coeffs[i] = orig + eps;
            let (pp, qp) = basis.evaluate(t, &coeffs);
            coeffs[i] = orig - eps;
            let (pm, qm) = basis.evaluate(t, &coeffs);
            coeffs[i] = orig;
            let fd = (pbar * (pp - pm) + qbar * (qp - qm)) / (2.0 * eps);
            assert_relative_eq!(grad[i], fd, epsilon = 1e-8, max_relative = 1e-8);
        }
    }

    #[test]
    fn test_pinned_splines_have_zero_gradient() {
        let basis = ControlBasis::new(10, 3.0, &[0.0]).unwrap();
        let mut grad = vec![0.0; basis.num_params()];
        for step in 0..30 {
            let t = 3.0 * step as f64 / 29.0;
            basis.derivative(t, 1.0, 1.0, &mut grad);
        }
        for l in [0usize, 1, 8, 9] {
            assert_relative_eq!(grad[2 * l], 0.0);
            assert_relative_eq!(grad[2 * l + 1], 0.0);
        }
        // and a live spline accumulated something
        assert!(grad[2 * 5].abs() > 1e-8);
    }

    #[test]
    fn test_num_params_layout() {
        let basis = ControlBasis::new(7, 1.0, &[0.0, 1.0]).unwrap();
        assert_eq!(basis.num_params(), 2 * 2 * 7);
        assert_eq!(basis.ncarriers(), 2);
        assert_eq!(basis.nsplines(), 7);
    }

    #[test]
    fn test_rejects_bad_construction() {
        assert!(ControlBasis::new(4, 1.0, &[0.0]).is_err());
        assert!(ControlBasis::new(10, 0.0, &[0.0]).is_err());
        assert!(ControlBasis::new(10, 1.0, &[]).is_err());
    }
}
