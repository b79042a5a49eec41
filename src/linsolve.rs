// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Inner linear solvers for the implicit time steps.
//!
//! Both strategies solve (I − αA) y = b with α = h/2 and never form the
//! shifted matrix: the operator application is y − α·(Ay) (or the
//! transpose for the adjoint sweep, which must reuse the *same*
//! operator instance as the forward solve).
//!
//! - Neumann series: y ← b + αAy fixed-point iteration; convergent when
//!   α·ρ(A) < 1, which holds for sufficiently small step sizes.
//! - GMRES with Givens rotations, no preconditioner.
//!
//! Both report iterations and the final residual and keep running
//! averages for diagnostics.

use crate::config::LinearSolverType;
use crate::error::{Error, Result};
use crate::sparse::{norm2, CsrMat};

/// Outcome of a single linear solve.
#[derive(Debug, Clone, Copy)]
pub struct SolveStats {
    /// Iterations taken.
    pub iterations: usize,
    /// Norm used by the stopping test at exit (update norm for Neumann,
    /// residual norm for GMRES).
    pub residual: f64,
}

/// Iterative solver for (I − αA) y = b.
#[derive(Debug)]
pub struct LinearSolver {
    kind: LinearSolverType,
    max_iter: usize,
    abs_tol: f64,
    rel_tol: f64,

    total_iterations: usize,
    total_residual: f64,
    solves: usize,

    tmp: Vec<f64>,
    err: Vec<f64>,
}

impl LinearSolver {
    /// Create a solver of the given kind.
    pub fn new(kind: LinearSolverType, max_iter: usize, abs_tol: f64, rel_tol: f64) -> Self {
        Self {
            kind,
            max_iter,
            abs_tol,
            rel_tol,
            total_iterations: 0,
            total_residual: 0.0,
            solves: 0,
            tmp: Vec::new(),
            err: Vec::new(),
        }
    }

    /// Which strategy this solver uses.
    pub fn kind(&self) -> LinearSolverType {
        self.kind
    }

    /// Average iterations per solve so far.
    pub fn avg_iterations(&self) -> f64 {
        if self.solves == 0 {
            0.0
        } else {
            self.total_iterations as f64 / self.solves as f64
        }
    }

    /// Average exit residual per solve so far.
    pub fn avg_residual(&self) -> f64 {
        if self.solves == 0 {
            0.0
        } else {
            self.total_residual / self.solves as f64
        }
    }

    /// Solve (I − αA) y = b, or the transposed system when `transpose`.
    pub fn solve(
        &mut self,
        a: &CsrMat,
        alpha: f64,
        b: &[f64],
        y: &mut [f64],
        transpose: bool,
    ) -> Result<SolveStats> {
        let stats = match self.kind {
            LinearSolverType::Neumann => self.neumann(a, alpha, b, y, transpose),
            LinearSolverType::Gmres => self.gmres(a, alpha, b, y, transpose),
        }?;
        self.total_iterations += stats.iterations;
        self.total_residual += stats.residual;
        self.solves += 1;
        Ok(stats)
    }

    /// Fixed-point iteration y ← b + αAy, started from y = b.
    ///
    /// Stops when the update norm ‖y − y_prev‖₂ drops below
    /// max(abs_tol, rel_tol·r₀).
    fn neumann(
        &mut self,
        a: &CsrMat,
        alpha: f64,
        b: &[f64],
        y: &mut [f64],
        transpose: bool,
    ) -> Result<SolveStats> {
        let n = b.len();
        self.tmp.resize(n, 0.0);
        self.err.resize(n, 0.0);

        y.copy_from_slice(b);
        let mut errnorm0 = 0.0;
        for iter in 0..self.max_iter {
            self.err.copy_from_slice(y);
            if transpose {
                a.matvec_tr(y, &mut self.tmp);
            } else {
                a.matvec(y, &mut self.tmp);
            }
            for i in 0..n {
                y[i] = b[i] + alpha * self.tmp[i];
            }
            for i in 0..n {
                self.err[i] -= y[i];
            }
            let errnorm = norm2(&self.err);
            if iter == 0 {
                errnorm0 = errnorm;
            }
            if errnorm < self.abs_tol || (errnorm0 > 0.0 && errnorm / errnorm0 < self.rel_tol) {
                return Ok(SolveStats {
                    iterations: iter + 1,
                    residual: errnorm,
                });
            }
            if !errnorm.is_finite() {
                return Err(Error::Numerical(
                    "Neumann iteration diverged to non-finite values".into(),
                ));
            }
        }
        let residual = norm2(&self.err);
        Err(Error::Convergence {
            iterations: self.max_iter,
            residual,
        })
    }

    /// GMRES on the shifted operator, with modified Gram-Schmidt
    /// orthogonalization and Givens rotations on the Hessenberg system.
    ///
    /// Ref: Saad & Schultz (1986), SIAM J. Sci. Stat. Comput. 7, 856.
    fn gmres(
        &mut self,
        a: &CsrMat,
        alpha: f64,
        b: &[f64],
        y: &mut [f64],
        transpose: bool,
    ) -> Result<SolveStats> {
        let n = b.len();
        self.tmp.resize(n, 0.0);

        // Initial guess y₀ = b: the residual is then α·Ab, already small
        // for the step sizes in play.
        y.copy_from_slice(b);
        let mut r = vec![0.0; n];
        self.apply_shifted(a, alpha, transpose, b, &mut r);
        for i in 0..n {
            r[i] = b[i] - r[i];
        }
        let beta = norm2(&r);
        let tol = self.abs_tol.max(self.rel_tol * beta);
        if beta <= tol {
            return Ok(SolveStats {
                iterations: 0,
                residual: beta,
            });
        }

        let m = self.max_iter;
        let mut basis: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
        basis.push(r.iter().map(|v| v / beta).collect());
        let mut h = vec![vec![0.0f64; m]; m + 1];
        let mut cs = vec![0.0f64; m];
        let mut sn = vec![0.0f64; m];
        let mut g = vec![0.0f64; m + 1];
        g[0] = beta;

        for j in 0..m {
            let mut w = vec![0.0; n];
            self.apply_shifted(a, alpha, transpose, &basis[j], &mut w);
            for i in 0..=j {
                let hij: f64 = w.iter().zip(&basis[i]).map(|(a, b)| a * b).sum();
                h[i][j] = hij;
                for (wk, vk) in w.iter_mut().zip(&basis[i]) {
                    *wk -= hij * vk;
                }
            }
            let hnorm = norm2(&w);
            h[j + 1][j] = hnorm;

            // Apply accumulated rotations to the new column.
            for i in 0..j {
                let (hi, hi1) = (h[i][j], h[i + 1][j]);
                h[i][j] = cs[i] * hi + sn[i] * hi1;
                h[i + 1][j] = -sn[i] * hi + cs[i] * hi1;
            }
            let denom = (h[j][j] * h[j][j] + h[j + 1][j] * h[j + 1][j]).sqrt();
            if denom == 0.0 {
                return Err(Error::Numerical("GMRES breakdown: zero Hessenberg column".into()));
            }
            cs[j] = h[j][j] / denom;
            sn[j] = h[j + 1][j] / denom;
            h[j][j] = denom;
            h[j + 1][j] = 0.0;
            g[j + 1] = -sn[j] * g[j];
            g[j] *= cs[j];

            let resid = g[j + 1].abs();
            if resid <= tol || hnorm == 0.0 {
                // Back-substitute and update y.
                let mut coeff = vec![0.0f64; j + 1];
                for i in (0..=j).rev() {
                    let mut sum = g[i];
                    for l in i + 1..=j {
                        sum -= h[i][l] * coeff[l];
                    }
                    coeff[i] = sum / h[i][i];
                }
                for (i, c) in coeff.iter().enumerate() {
                    for (yk, vk) in y.iter_mut().zip(&basis[i]) {
                        *yk += c * vk;
                    }
                }
                return Ok(SolveStats {
                    iterations: j + 1,
                    residual: resid,
                });
            }
            basis.push(w.iter().map(|v| v / hnorm).collect());
        }

        Err(Error::Convergence {
            iterations: m,
            residual: g[m].abs(),
        })
    }

    /// out = (I − αA)v, or the transposed operator.
    fn apply_shifted(
        &mut self,
        a: &CsrMat,
        alpha: f64,
        transpose: bool,
        v: &[f64],
        out: &mut [f64],
    ) {
        if transpose {
            a.matvec_tr(v, &mut self.tmp);
        } else {
            a.matvec(v, &mut self.tmp);
        }
        for (o, (vi, ti)) in out.iter_mut().zip(v.iter().zip(&self.tmp)) {
            *o = vi - alpha * ti;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::CooMat;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Random sparse matrix scaled to unit infinity-norm.
    fn random_operator(n: usize, seed: u64) -> CsrMat {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut coo = CooMat::new(n, n);
        for i in 0..n {
            for j in 0..n {
                if rng.gen::<f64>() < 0.4 || i == j {
                    coo.push(i, j, rng.gen::<f64>() - 0.5);
                }
            }
        }
        let mut a = coo.to_csr();
        let mut row_max = 0.0f64;
        for r in 0..n {
            let s: f64 = a.row_iter(r).map(|(_, v)| v.abs()).sum();
            row_max = row_max.max(s);
        }
        a.scale(1.0 / row_max);
        a
    }

    fn residual_norm(a: &CsrMat, alpha: f64, b: &[f64], y: &[f64]) -> f64 {
        let n = b.len();
        let mut ay = vec![0.0; n];
        a.matvec(y, &mut ay);
        let r: Vec<f64> = (0..n).map(|i| b[i] - (y[i] - alpha * ay[i])).collect();
        norm2(&r)
    }

    #[test]
    fn test_neumann_solves_small_alpha() {
        let n = 24;
        let a = random_operator(n, 1);
        let mut rng = StdRng::seed_from_u64(2);
        let b: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() - 0.5).collect();
        let mut y = vec![0.0; n];

        let mut solver = LinearSolver::new(LinearSolverType::Neumann, 200, 1e-13, 1e-20);
        let stats = solver.solve(&a, 0.005, &b, &mut y, false).unwrap();
        assert!(stats.iterations > 0);
        assert!(residual_norm(&a, 0.005, &b, &y) < 1e-11);
    }

    #[test]
    fn test_gmres_solves_small_alpha() {
        let n = 24;
        let a = random_operator(n, 3);
        let mut rng = StdRng::seed_from_u64(4);
        let b: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() - 0.5).collect();
        let mut y = vec![0.0; n];

        let mut solver = LinearSolver::new(LinearSolverType::Gmres, 50, 1e-13, 1e-20);
        solver.solve(&a, 0.005, &b, &mut y, false).unwrap();
        assert!(residual_norm(&a, 0.005, &b, &y) < 1e-11);
    }

    #[test]
    fn test_neumann_gmres_agree() {
        // h = 0.01 on a spectrally normalized operator.
        let n = 30;
        let a = random_operator(n, 5);
        let mut rng = StdRng::seed_from_u64(6);
        let b: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() - 0.5).collect();

        let alpha = 0.01 / 2.0;
        let mut y_n = vec![0.0; n];
        let mut y_g = vec![0.0; n];
        let mut neumann = LinearSolver::new(LinearSolverType::Neumann, 500, 1e-14, 1e-20);
        let mut gmres = LinearSolver::new(LinearSolverType::Gmres, 100, 1e-14, 1e-20);
        neumann.solve(&a, alpha, &b, &mut y_n, false).unwrap();
        gmres.solve(&a, alpha, &b, &mut y_g, false).unwrap();

        let max_diff = y_n
            .iter()
            .zip(&y_g)
            .fold(0.0f64, |m, (a, b)| m.max((a - b).abs()));
        assert!(max_diff <= 1e-8, "solvers disagree: {max_diff:.3e}");
    }

    #[test]
    fn test_transpose_solve_consistent() {
        // Solving the transposed system equals solving with Aᵀ.
        let n = 16;
        let a = random_operator(n, 7);
        let at = a.transpose();
        let mut rng = StdRng::seed_from_u64(8);
        let b: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() - 0.5).collect();

        for kind in [LinearSolverType::Neumann, LinearSolverType::Gmres] {
            let mut y_tr = vec![0.0; n];
            let mut y_at = vec![0.0; n];
            let mut s1 = LinearSolver::new(kind, 300, 1e-13, 1e-20);
            let mut s2 = LinearSolver::new(kind, 300, 1e-13, 1e-20);
            s1.solve(&a, 0.01, &b, &mut y_tr, true).unwrap();
            s2.solve(&at, 0.01, &b, &mut y_at, false).unwrap();
            for i in 0..n {
                assert!((y_tr[i] - y_at[i]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_neumann_reports_divergence() {
        // α·ρ(A) > 1: the fixed point iteration cannot converge.
        let mut coo = CooMat::new(2, 2);
        coo.push(0, 0, 1.0);
        coo.push(1, 1, 1.0);
        let a = coo.to_csr();
        let b = [1.0, 1.0];
        let mut y = [0.0, 0.0];
        let mut solver = LinearSolver::new(LinearSolverType::Neumann, 30, 1e-12, 1e-20);
        let result = solver.solve(&a, 2.0, &b, &mut y, false);
        assert!(matches!(
            result,
            Err(Error::Convergence { .. }) | Err(Error::Numerical(_))
        ));
    }

    #[test]
    fn test_running_averages() {
        let n = 10;
        let a = random_operator(n, 9);
        let b = vec![1.0; n];
        let mut y = vec![0.0; n];
        let mut solver = LinearSolver::new(LinearSolverType::Neumann, 100, 1e-12, 1e-20);
        assert_eq!(solver.avg_iterations(), 0.0);
        solver.solve(&a, 0.01, &b, &mut y, false).unwrap();
        solver.solve(&a, 0.02, &b, &mut y, false).unwrap();
        assert!(solver.avg_iterations() >= 1.0);
        assert!(solver.avg_residual() >= 0.0);
    }

    #[test]
    fn test_identity_limit() {
        // α = 0 reduces to y = b immediately for both solvers.
        let n = 8;
        let a = random_operator(n, 10);
        let b: Vec<f64> = (0..n).map(|i| i as f64 - 3.0).collect();
        for kind in [LinearSolverType::Neumann, LinearSolverType::Gmres] {
            let mut y = vec![0.0; n];
            let mut solver = LinearSolver::new(kind, 50, 1e-14, 1e-20);
            solver.solve(&a, 0.0, &b, &mut y, false).unwrap();
            for i in 0..n {
                assert!((y[i] - b[i]).abs() < 1e-12);
            }
        }
    }
}
