// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transfer functions acting on the raw controls.
//!
//! A transfer function maps the raw spline-carrier control value into the
//! physical amplitude seen by the Hamiltonian, u(p(t)) and v(q(t)). Both
//! `eval` and `der` are required so the chain rule composes correctly in
//! the adjoint. The set is closed; there is no open-ended dispatch.

use tracing::warn;

use crate::error::{Error, Result};

/// Closed sum type over the supported transfer functions.
#[derive(Debug, Clone)]
pub enum TransferFunction {
    /// u(x) = x.
    Identity,
    /// u(x) = c, u'(x) = 0.
    Constant(f64),
    /// u(x) = a·cos(f·x).
    Cosine {
        /// Amplitude a.
        amp: f64,
        /// Frequency f.
        freq: f64,
    },
    /// u(x) = a·sin(f·x).
    Sine {
        /// Amplitude a.
        amp: f64,
        /// Frequency f.
        freq: f64,
    },
    /// Calibrated cubic-spline transfer curve.
    Spline(CubicSpline),
}

impl TransferFunction {
    /// Evaluate u(x).
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            TransferFunction::Identity => x,
            TransferFunction::Constant(c) => *c,
            TransferFunction::Cosine { amp, freq } => amp * (freq * x).cos(),
            TransferFunction::Sine { amp, freq } => amp * (freq * x).sin(),
            TransferFunction::Spline(s) => s.eval(x),
        }
    }

    /// Evaluate u'(x).
    pub fn der(&self, x: f64) -> f64 {
        match self {
            TransferFunction::Identity => 1.0,
            TransferFunction::Constant(_) => 0.0,
            TransferFunction::Cosine { amp, freq } => -amp * freq * (freq * x).sin(),
            TransferFunction::Sine { amp, freq } => amp * freq * (freq * x).cos(),
            TransferFunction::Spline(s) => s.der(x),
        }
    }
}

/// Clamped cubic B-spline curve over caller-supplied knots and
/// coefficients (de Boor evaluation, FITPACK knot semantics).
///
/// Evaluation outside the knot range logs a warning and clamps, per the
/// boundary-violation policy.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    knots: Vec<f64>,
    coeffs: Vec<f64>,
    knot_min: f64,
    knot_max: f64,
}

const DEGREE: usize = 3;

impl CubicSpline {
    /// Build a cubic spline. `knots.len()` must equal `coeffs.len() + 4`
    /// and the knot vector must be non-decreasing.
    pub fn new(knots: Vec<f64>, coeffs: Vec<f64>) -> Result<Self> {
        if coeffs.len() < DEGREE + 1 {
            return Err(Error::Config(format!(
                "cubic spline needs at least {} coefficients, got {}",
                DEGREE + 1,
                coeffs.len()
            )));
        }
        if knots.len() != coeffs.len() + DEGREE + 1 {
            return Err(Error::Dimension {
                context: "cubic spline knot vector".into(),
                expected: coeffs.len() + DEGREE + 1,
                actual: knots.len(),
            });
        }
        if knots.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::Config("spline knots must be non-decreasing".into()));
        }
        let knot_min = knots[DEGREE];
        let knot_max = knots[coeffs.len()];
        Ok(Self {
            knots,
            coeffs,
            knot_min,
            knot_max,
        })
    }

    /// Lower bound of the valid evaluation range.
    pub fn knot_min(&self) -> f64 {
        self.knot_min
    }

    /// Upper bound of the valid evaluation range.
    pub fn knot_max(&self) -> f64 {
        self.knot_max
    }

    /// Spline value at x (clamped into the knot range).
    pub fn eval(&self, x: f64) -> f64 {
        let u = self.check_bounds(x);
        bspline_eval(&self.knots, &self.coeffs, DEGREE, u)
    }

    /// Spline derivative at x (clamped into the knot range).
    pub fn der(&self, x: f64) -> f64 {
        let u = self.check_bounds(x);
        // Coefficients of the derivative curve, degree 2 over the inner knots.
        let n = self.coeffs.len();
        let mut dcoeffs = Vec::with_capacity(n - 1);
        for i in 0..n - 1 {
            let span = self.knots[i + DEGREE + 1] - self.knots[i + 1];
            let d = if span > 0.0 {
                DEGREE as f64 * (self.coeffs[i + 1] - self.coeffs[i]) / span
            } else {
                0.0
            };
            dcoeffs.push(d);
        }
        bspline_eval(&self.knots[1..self.knots.len() - 1], &dcoeffs, DEGREE - 1, u)
    }

    fn check_bounds(&self, x: f64) -> f64 {
        if x < self.knot_min || x > self.knot_max {
            warn!(
                x,
                knot_min = self.knot_min,
                knot_max = self.knot_max,
                "spline transfer evaluated outside knot range; clamping"
            );
            x.clamp(self.knot_min, self.knot_max)
        } else {
            x
        }
    }
}

/// Evaluate a B-spline curve of the given degree at u.
///
/// `u` must lie inside [knots[degree], knots[coeffs.len()]].
fn bspline_eval(knots: &[f64], coeffs: &[f64], degree: usize, u: f64) -> f64 {
    let n = coeffs.len();
    let span = find_span(knots, n, degree, u);

    // Cox-de Boor basis functions on the span (The NURBS Book, A2.2).
    let mut basis = vec![0.0f64; degree + 1];
    let mut left = vec![0.0f64; degree + 1];
    let mut right = vec![0.0f64; degree + 1];
    basis[0] = 1.0;
    for j in 1..=degree {
        left[j] = u - knots[span + 1 - j];
        right[j] = knots[span + j] - u;
        let mut saved = 0.0;
        for r in 0..j {
            let denom = right[r + 1] + left[j - r];
            let temp = if denom != 0.0 { basis[r] / denom } else { 0.0 };
            basis[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        basis[j] = saved;
    }

    (0..=degree)
        .map(|j| basis[j] * coeffs[span - degree + j])
        .sum()
}

/// Largest index i in [degree, n-1] with knots[i] <= u (< knots[i+1]).
fn find_span(knots: &[f64], n: usize, degree: usize, u: f64) -> usize {
    if u >= knots[n] {
        return n - 1;
    }
    let mut lo = degree;
    let mut hi = n;
    while lo + 1 < hi {
        let mid = (lo + hi) / 2;
        if u < knots[mid] {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Clamped knot vector on [0, 1] with `ninner` uniform interior knots.
    fn clamped_knots(ninner: usize) -> Vec<f64> {
        let mut knots = vec![0.0; 4];
        for i in 1..=ninner {
            knots.push(i as f64 / (ninner + 1) as f64);
        }
        knots.extend_from_slice(&[1.0; 4]);
        knots
    }

    #[test]
    fn test_identity() {
        let tf = TransferFunction::Identity;
        assert_relative_eq!(tf.eval(0.7), 0.7);
        assert_relative_eq!(tf.der(0.7), 1.0);
    }

    #[test]
    fn test_constant() {
        let tf = TransferFunction::Constant(2.5);
        assert_relative_eq!(tf.eval(-3.0), 2.5);
        assert_relative_eq!(tf.der(-3.0), 0.0);
    }

    #[test]
    fn test_cosine_derivative_consistent() {
        let tf = TransferFunction::Cosine { amp: 1.3, freq: 2.0 };
        let (x, eps) = (0.4, 1e-6);
        let fd = (tf.eval(x + eps) - tf.eval(x - eps)) / (2.0 * eps);
        assert_relative_eq!(tf.der(x), fd, epsilon = 1e-7);
    }

    #[test]
    fn test_sine_derivative_consistent() {
        let tf = TransferFunction::Sine { amp: 0.8, freq: 3.1 };
        let (x, eps) = (-0.2, 1e-6);
        let fd = (tf.eval(x + eps) - tf.eval(x - eps)) / (2.0 * eps);
        assert_relative_eq!(tf.der(x), fd, epsilon = 1e-7);
    }

    #[test]
    fn test_spline_constant_curve() {
        // All coefficients equal: the curve is that constant everywhere.
        let knots = clamped_knots(3);
        let n = knots.len() - 4;
        let spline = CubicSpline::new(knots, vec![2.0; n]).unwrap();
        for &x in &[0.0, 0.25, 0.5, 0.99, 1.0] {
            assert_relative_eq!(spline.eval(x), 2.0, epsilon = 1e-12);
            assert_relative_eq!(spline.der(x), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_spline_reproduces_linear_function() {
        // Greville abscissae coefficients reproduce u(x) = x exactly.
        let knots = clamped_knots(4);
        let n = knots.len() - 4;
        let coeffs: Vec<f64> = (0..n)
            .map(|i| (knots[i + 1] + knots[i + 2] + knots[i + 3]) / 3.0)
            .collect();
        let spline = CubicSpline::new(knots, coeffs).unwrap();
        for &x in &[0.0, 0.1, 0.37, 0.62, 0.9, 1.0] {
            assert_relative_eq!(spline.eval(x), x, epsilon = 1e-12);
            assert_relative_eq!(spline.der(x), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_spline_derivative_matches_fd() {
        let knots = clamped_knots(3);
        let n = knots.len() - 4;
        let coeffs: Vec<f64> = (0..n).map(|i| ((i * 7 + 3) % 5) as f64 * 0.3).collect();
        let spline = CubicSpline::new(knots, coeffs).unwrap();
        let eps = 1e-6;
        for &x in &[0.1, 0.33, 0.58, 0.85] {
            let fd = (spline.eval(x + eps) - spline.eval(x - eps)) / (2.0 * eps);
            assert_relative_eq!(spline.der(x), fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_spline_clamps_out_of_range() {
        let knots = clamped_knots(2);
        let n = knots.len() - 4;
        let coeffs: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let spline = CubicSpline::new(knots, coeffs).unwrap();
        assert_relative_eq!(spline.eval(-5.0), spline.eval(0.0));
        assert_relative_eq!(spline.eval(7.0), spline.eval(1.0));
    }

    #[test]
    fn test_spline_rejects_bad_shapes() {
        assert!(CubicSpline::new(vec![0.0; 8], vec![1.0; 2]).is_err());
        assert!(CubicSpline::new(vec![0.0; 7], vec![1.0; 4]).is_err());
        let mut decreasing = clamped_knots(2);
        decreasing[4] = -1.0;
        let n = decreasing.len() - 4;
        assert!(CubicSpline::new(decreasing, vec![1.0; n]).is_err());
    }
}
