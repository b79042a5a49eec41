// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Objective function: terminal cost, running penalties and Tikhonov
//! regularization, with exact reverse-mode accumulation.
//!
//!   J(x) = Σ_init J_terminal(ρ(T)) / n_init
//!        + γ_tik·‖x − x₀‖²/2
//!        + γ_pen·∫₀ᵀ w(t)·J_terminal(ρ(t)) dt
//!        + γ_leak·(1/T)·∫₀ᵀ ℓ(ρ(t)) dt,
//!
//! with w(t) = (1/σ)·exp(−((t−T)/σ)²) emphasizing late-time deviations
//! and ℓ summing the weighted guard-level populations. The integrals
//! are step sums consistent with the integrator grid; their adjoints
//! are per-step forcing terms added to the adjoint state at each t_n+1.
//!
//! Penalties and the objective never fail: they return finite reals for
//! finite inputs.

use crate::config::Config;
use crate::error::Result;
use crate::mastereq::{indexing, MasterEq, StateLayout};
use crate::stepper::TimeStepper;
use crate::target::OptimTarget;

/// Gaussian late-time weight w(t) = (1/σ)·exp(−((t−T)/σ)²).
pub fn gaussian_weight(t: f64, total_time: f64, sigma: f64) -> f64 {
    let z = (t - total_time) / sigma;
    (-z * z).exp() / sigma
}

/// Per-step running cost evaluated inside the trajectory sweeps.
pub struct RunningCost<'a> {
    gamma_penalty: f64,
    penalty_param: f64,
    gamma_leakage: f64,
    total_time: f64,
    layout: StateLayout,
    /// Leakage weight per Hilbert state; zero off the guard levels.
    state_weights: Vec<f64>,
    target: Option<&'a dyn OptimTarget>,
}

impl<'a> RunningCost<'a> {
    /// Build the running cost for one master-equation instance.
    pub fn new(
        eq: &MasterEq,
        total_time: f64,
        gamma_penalty: f64,
        penalty_param: f64,
        gamma_leakage: f64,
        oscillator_weights: &[f64],
        target: Option<&'a dyn OptimTarget>,
    ) -> Self {
        let nlevels = eq.nlevels();
        let nessential = eq.nessential();
        let mut state_weights = vec![0.0; eq.dim_rho()];
        for (i, w) in state_weights.iter_mut().enumerate() {
            if !indexing::is_guard_level(i, nlevels, nessential) {
                continue;
            }
            for k in 0..nlevels.len() {
                if indexing::is_guard_level_of(i, k, nlevels, nessential) {
                    *w += oscillator_weights.get(k).copied().unwrap_or(1.0);
                }
            }
        }
        Self {
            gamma_penalty,
            penalty_param,
            gamma_leakage,
            total_time,
            layout: eq.layout(),
            state_weights,
            target,
        }
    }

    fn weighted_cost_active(&self) -> bool {
        self.gamma_penalty > 1e-13 && self.target.is_some()
    }

    fn leakage_active(&self) -> bool {
        self.gamma_leakage > 1e-13 && self.state_weights.iter().any(|&w| w != 0.0)
    }

    /// True if either penalty contributes.
    pub fn is_active(&self) -> bool {
        self.weighted_cost_active() || self.leakage_active()
    }

    /// Guard-level leakage ℓ(x) = Σ_i w_i·|ρ_ii|² (or |ψ_i|² weights in
    /// Schrödinger mode).
    pub fn leakage(&self, x: &[f64]) -> f64 {
        let mut leak = 0.0;
        for (i, &w) in self.state_weights.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            let re = x[self.layout.diag_re(i)];
            let im = x[self.layout.diag_im(i)];
            leak += w * (re * re + im * im);
        }
        leak
    }

    /// Penalty contribution of one accepted step ending at time t.
    pub fn penalty(&self, t: f64, x: &[f64], dt: f64) -> f64 {
        let mut penalty = 0.0;
        if self.weighted_cost_active() {
            if let Some(target) = self.target {
                let weight = gaussian_weight(t, self.total_time, self.penalty_param);
                let (re, im) = target.eval_j(x);
                penalty += self.gamma_penalty * weight * target.finalize_j(re, im) * dt;
            }
        }
        if self.leakage_active() {
            penalty += self.gamma_leakage * dt * self.leakage(x) / self.total_time;
        }
        penalty
    }

    /// Adjoint of [`RunningCost::penalty`]: adds the forcing terms for
    /// the step ending at t into `xbar`, scaled by `j_bar`.
    pub fn penalty_diff(&self, t: f64, x: &[f64], xbar: &mut [f64], j_bar: f64, dt: f64) {
        if self.weighted_cost_active() {
            if let Some(target) = self.target {
                let weight = gaussian_weight(t, self.total_time, self.penalty_param);
                let (re, im) = target.eval_j(x);
                let (re_bar, im_bar) = target.finalize_j_diff(re, im);
                let factor = self.gamma_penalty * weight * j_bar * dt;
                target.eval_j_diff(x, xbar, factor * re_bar, factor * im_bar);
            }
        }
        if self.leakage_active() {
            let factor = 2.0 * self.gamma_leakage * j_bar * dt / self.total_time;
            for (i, &w) in self.state_weights.iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                let (ire, iim) = (self.layout.diag_re(i), self.layout.diag_im(i));
                xbar[ire] += factor * w * x[ire];
                xbar[iim] += factor * w * x[iim];
            }
        }
    }
}

/// Breakdown of one objective evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ObjectiveValue {
    /// Total objective J(x).
    pub total: f64,
    /// Terminal cost averaged over the initial conditions.
    pub terminal: f64,
    /// Running penalty terms.
    pub penalty: f64,
    /// Tikhonov term.
    pub regularization: f64,
    /// Averaged fidelity 1 − J_terminal.
    pub fidelity: f64,
}

/// Objective evaluator: runs the forward and adjoint sweeps per initial
/// condition and combines all terms. This is the seam the external
/// optimizer drives; the optimizer itself lives outside the engine.
#[derive(Debug, Clone)]
pub struct Objective {
    /// Tikhonov weight γ_tik.
    pub gamma_tikhonov: f64,
    /// Tikhonov anchor x₀ (zero if absent).
    pub x0: Option<Vec<f64>>,
    /// Running-cost weight γ_pen.
    pub gamma_penalty: f64,
    /// Gaussian width σ of the running-cost weight.
    pub penalty_param: f64,
    /// Leakage weight γ_leak.
    pub gamma_leakage: f64,
    /// Leakage weight per oscillator.
    pub leakage_weights: Vec<f64>,
    /// Initial conditions averaged in the objective.
    pub initial_ids: Vec<usize>,
}

impl Objective {
    /// Build from the penalty section of the configuration.
    pub fn from_config(config: &Config, initial_ids: Vec<usize>) -> Self {
        Self {
            gamma_tikhonov: config.penalty.gamma_tikhonov,
            x0: None,
            gamma_penalty: config.penalty.gamma_penalty,
            penalty_param: config.penalty.penalty_param,
            gamma_leakage: config.penalty.gamma_leakage,
            leakage_weights: config.leakage_weights(),
            initial_ids,
        }
    }

    /// The running cost seen by the trajectory sweeps.
    pub fn running_cost<'a>(
        &self,
        eq: &MasterEq,
        total_time: f64,
        target: Option<&'a dyn OptimTarget>,
    ) -> RunningCost<'a> {
        RunningCost::new(
            eq,
            total_time,
            self.gamma_penalty,
            self.penalty_param,
            self.gamma_leakage,
            &self.leakage_weights,
            target,
        )
    }

    /// Tikhonov term γ_tik·‖x − x₀‖²/2.
    pub fn tikhonov(&self, x: &[f64]) -> f64 {
        let mut sum = 0.0;
        for (i, &xi) in x.iter().enumerate() {
            let anchor = self.x0.as_ref().map_or(0.0, |x0| x0[i]);
            let d = xi - anchor;
            sum += d * d;
        }
        0.5 * self.gamma_tikhonov * sum
    }

    /// Gradient of the Tikhonov term: adds γ_tik·(x − x₀) into `grad`.
    pub fn tikhonov_diff(&self, x: &[f64], grad: &mut [f64]) {
        for (i, &xi) in x.iter().enumerate() {
            let anchor = self.x0.as_ref().map_or(0.0, |x0| x0[i]);
            grad[i] += self.gamma_tikhonov * (xi - anchor);
        }
    }

    /// Evaluate J(x).
    pub fn eval_objective(
        &self,
        eq: &mut MasterEq,
        stepper: &mut TimeStepper,
        target: &dyn OptimTarget,
        x: &[f64],
    ) -> Result<ObjectiveValue> {
        eq.set_design(x)?;
        let cost = self.running_cost(eq, stepper.total_time(), Some(target));

        let ninit = self.initial_ids.len().max(1);
        let weight = 1.0 / ninit as f64;
        let mut terminal = 0.0;
        let mut penalty = 0.0;
        let mut fidelity = 0.0;
        let mut rho0 = vec![0.0; eq.dim_state()];

        for &id in &self.initial_ids {
            eq.initial_condition(id, &mut rho0)?;
            let final_state = stepper.solve_ode(eq, Some(&cost), id, &rho0, None)?;
            let (re, im) = target.eval_j(&final_state);
            let cost_t = target.finalize_j(re, im);
            terminal += weight * cost_t;
            fidelity += weight * (1.0 - cost_t);
            penalty += weight * stepper.penalty_integral();
        }

        let regularization = self.tikhonov(x);
        Ok(ObjectiveValue {
            total: terminal + penalty + regularization,
            terminal,
            penalty,
            regularization,
            fidelity,
        })
    }

    /// Evaluate J(x) and its exact gradient into `grad`.
    pub fn eval_gradient(
        &self,
        eq: &mut MasterEq,
        stepper: &mut TimeStepper,
        target: &dyn OptimTarget,
        x: &[f64],
        grad: &mut [f64],
    ) -> Result<ObjectiveValue> {
        eq.set_design(x)?;
        let cost = self.running_cost(eq, stepper.total_time(), Some(target));

        let ninit = self.initial_ids.len().max(1);
        let weight = 1.0 / ninit as f64;
        let mut terminal = 0.0;
        let mut penalty = 0.0;
        let mut fidelity = 0.0;
        let mut rho0 = vec![0.0; eq.dim_state()];
        let mut terminal_adjoint = vec![0.0; eq.dim_state()];

        grad.fill(0.0);
        for &id in &self.initial_ids {
            eq.initial_condition(id, &mut rho0)?;
            let final_state = stepper.solve_ode(eq, Some(&cost), id, &rho0, None)?;
            let (re, im) = target.eval_j(&final_state);
            let cost_t = target.finalize_j(re, im);
            terminal += weight * cost_t;
            fidelity += weight * (1.0 - cost_t);
            penalty += weight * stepper.penalty_integral();

            let (re_bar, im_bar) = target.finalize_j_diff(re, im);
            terminal_adjoint.fill(0.0);
            target.eval_j_diff(
                &final_state,
                &mut terminal_adjoint,
                weight * re_bar,
                weight * im_bar,
            );
            stepper.solve_adjoint_ode(
                eq,
                Some(&cost),
                id,
                &terminal_adjoint,
                &final_state,
                weight,
            )?;
            for (g, r) in grad.iter_mut().zip(stepper.reduced_gradient()) {
                *g += r;
            }
        }

        self.tikhonov_diff(x, grad);
        let regularization = self.tikhonov(x);
        Ok(ObjectiveValue {
            total: terminal + penalty + regularization,
            terminal,
            penalty,
            regularization,
            fidelity,
        })
    }
}
