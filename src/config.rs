// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the pulse engine.
//!
//! The core recognizes a flat key → value map ([`Config::from_map`]),
//! which is the interface an embedding application feeds after doing its
//! own file or command-line parsing. The same structure also derives
//! serde, so a YAML document with the nested sections works too.
//!
//! All validation is fail-fast at construction: inconsistent dimensions
//! or unknown options never reach the assembler.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which Lindblad dissipation channels are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LindbladType {
    /// Closed system; solve the Schrödinger equation on ψ.
    None,
    /// Energy decay (T1) channels only.
    Decay,
    /// Pure dephasing (T2) channels only.
    Dephase,
    /// Decay and dephasing.
    Both,
}

impl LindbladType {
    /// Number of collapse times expected per oscillator.
    pub fn channels_per_oscillator(self) -> usize {
        match self {
            LindbladType::None => 0,
            LindbladType::Decay | LindbladType::Dephase => 1,
            LindbladType::Both => 2,
        }
    }
}

impl fmt::Display for LindbladType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LindbladType::None => "none",
            LindbladType::Decay => "decay",
            LindbladType::Dephase => "dephase",
            LindbladType::Both => "both",
        };
        write!(f, "{}", s)
    }
}

/// Strategy for solving (I − αA) y = b inside the implicit steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearSolverType {
    /// Fixed-point Neumann-series iteration.
    Neumann,
    /// GMRES, untransposed forward / transposed adjoint.
    Gmres,
}

/// Time-stepping scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorType {
    /// Explicit Euler (testing only; first order).
    Euler,
    /// A-stable implicit midpoint rule (second order).
    ImplMidpoint,
    /// Yoshida triple-jump composition of the midpoint rule (fourth order).
    #[serde(rename = "composition_4")]
    Composition4,
    /// 15-stage symmetric composition (eighth order).
    #[serde(rename = "composition_8")]
    Composition8,
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Oscillator stack and drift Hamiltonian parameters.
    #[serde(default)]
    pub system: SystemConfig,

    /// Control parameterization.
    #[serde(default)]
    pub controls: ControlConfig,

    /// Dissipation channels.
    #[serde(default)]
    pub lindblad: LindbladConfig,

    /// Integration grid.
    #[serde(default)]
    pub grid: GridConfig,

    /// Integrator and linear solver selection.
    #[serde(default)]
    pub solver: SolverConfig,

    /// Objective penalties.
    #[serde(default)]
    pub penalty: PenaltyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            controls: ControlConfig::default(),
            lindblad: LindbladConfig::default(),
            grid: GridConfig::default(),
            solver: SolverConfig::default(),
            penalty: PenaltyConfig::default(),
        }
    }
}

/// Oscillator stack and drift Hamiltonian parameters.
///
/// All frequency-like quantities are angular frequencies in the same
/// time unit as `dt` (the engine never converts units).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Level count per oscillator.
    #[serde(default = "default_nlevels")]
    pub nlevels: Vec<usize>,

    /// Essential (computational) level count per oscillator. Levels above
    /// are guard levels; the topmost one is penalized as leakage.
    #[serde(default)]
    pub nessential: Vec<usize>,

    /// Fundamental transition frequency per oscillator.
    #[serde(default)]
    pub transition_frequencies: Vec<f64>,

    /// Rotating-frame frequency per oscillator (subtracted from the
    /// transition frequency in the drift).
    #[serde(default)]
    pub rotation_frequencies: Vec<f64>,

    /// Self-Kerr coefficient ξ_k per oscillator.
    #[serde(default)]
    pub selfkerr: Vec<f64>,

    /// Cross-Kerr ξ_kl per oscillator pair (k < l, row-major).
    #[serde(default)]
    pub crosskerr: Vec<f64>,

    /// Dipole coupling J_kl per oscillator pair (k < l, row-major).
    #[serde(default)]
    pub jkl: Vec<f64>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            nlevels: default_nlevels(),
            nessential: Vec::new(),
            transition_frequencies: Vec::new(),
            rotation_frequencies: Vec::new(),
            selfkerr: Vec::new(),
            crosskerr: Vec::new(),
            jkl: Vec::new(),
        }
    }
}

impl SystemConfig {
    /// Number of oscillators.
    pub fn noscillators(&self) -> usize {
        self.nlevels.len()
    }

    /// Number of (k, l) pairs with k < l.
    pub fn npairs(&self) -> usize {
        let k = self.noscillators();
        k * (k - 1) / 2
    }
}

fn default_nlevels() -> Vec<usize> {
    vec![2, 2]
}

/// Control parameterization: quadratic B-splines under carrier waves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Number of spline coefficients per carrier wave (≥ 5; the two
    /// outermost at each end are pinned to zero for smooth start/stop).
    #[serde(default = "default_nspline")]
    pub nspline: usize,

    /// Carrier-wave frequencies, shared by all oscillators. The first
    /// entry is the ground carrier and is subtracted from every carrier
    /// to avoid aliasing.
    #[serde(default = "default_carrier_frequencies")]
    pub carrier_frequencies: Vec<f64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            nspline: default_nspline(),
            carrier_frequencies: default_carrier_frequencies(),
        }
    }
}

fn default_nspline() -> usize {
    10
}

fn default_carrier_frequencies() -> Vec<f64> {
    vec![0.0]
}

/// Dissipation channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LindbladConfig {
    /// Which channels are active.
    #[serde(default = "default_lindblad_type")]
    pub lindblad_type: LindbladType,

    /// Collapse times. One per oscillator for `decay` or `dephase`;
    /// (decay, dephase) pairs per oscillator for `both`. A non-positive
    /// entry disables that channel.
    #[serde(default)]
    pub collapse_times: Vec<f64>,
}

impl Default for LindbladConfig {
    fn default() -> Self {
        Self {
            lindblad_type: default_lindblad_type(),
            collapse_times: Vec::new(),
        }
    }
}

fn default_lindblad_type() -> LindbladType {
    LindbladType::None
}

/// Integration grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of time steps.
    #[serde(default = "default_ntime")]
    pub ntime: usize,

    /// Step size.
    #[serde(default = "default_dt")]
    pub dt: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            ntime: default_ntime(),
            dt: default_dt(),
        }
    }
}

impl GridConfig {
    /// Time horizon T = ntime · dt.
    pub fn total_time(&self) -> f64 {
        self.ntime as f64 * self.dt
    }
}

fn default_ntime() -> usize {
    1000
}

fn default_dt() -> f64 {
    0.01
}

/// Integrator and linear solver selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Time-stepping scheme.
    #[serde(default = "default_integrator")]
    pub integrator: IntegratorType,

    /// Inner linear solver for the implicit stages.
    #[serde(default = "default_linear_solver")]
    pub linear_solver: LinearSolverType,

    /// Iteration budget per linear solve.
    #[serde(default = "default_linsolve_maxiter")]
    pub linsolve_maxiter: usize,

    /// Absolute tolerance on the update / residual norm.
    #[serde(default = "default_linsolve_abstol")]
    pub linsolve_abstol: f64,

    /// Relative tolerance against the initial residual.
    #[serde(default = "default_linsolve_reltol")]
    pub linsolve_reltol: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            integrator: default_integrator(),
            linear_solver: default_linear_solver(),
            linsolve_maxiter: default_linsolve_maxiter(),
            linsolve_abstol: default_linsolve_abstol(),
            linsolve_reltol: default_linsolve_reltol(),
        }
    }
}

fn default_integrator() -> IntegratorType {
    IntegratorType::ImplMidpoint
}

fn default_linear_solver() -> LinearSolverType {
    LinearSolverType::Neumann
}

fn default_linsolve_maxiter() -> usize {
    100
}

fn default_linsolve_abstol() -> f64 {
    1e-10
}

fn default_linsolve_reltol() -> f64 {
    1e-20
}

/// Objective penalty weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Tikhonov regularization weight γ_tik on ‖x − x₀‖²/2.
    #[serde(default)]
    pub gamma_tikhonov: f64,

    /// Weight γ_pen on the Gaussian-weighted running cost.
    #[serde(default)]
    pub gamma_penalty: f64,

    /// Weight γ_leak on the guard-level leakage integral.
    #[serde(default)]
    pub gamma_leakage: f64,

    /// Gaussian width σ of the running-cost weight w(t).
    #[serde(default = "default_penalty_param")]
    pub penalty_param: f64,

    /// Leakage weight per oscillator (default 1.0 each).
    #[serde(default)]
    pub leakage_weights: Vec<f64>,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            gamma_tikhonov: 0.0,
            gamma_penalty: 0.0,
            gamma_leakage: 0.0,
            penalty_param: default_penalty_param(),
            leakage_weights: Vec::new(),
        }
    }
}

fn default_penalty_param() -> f64 {
    0.5
}

impl Config {
    /// Parse a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from the flat key → value map recognized by the core.
    ///
    /// Recognized keys: `nlevels`, `noscillators`, `nessential`,
    /// `nspline`, `carrier_frequencies`, `transition_frequencies`,
    /// `rotation_frequencies`, `selfkerr`, `crosskerr`, `jkl`,
    /// `lindblad_type`, `lindblad_collapse_times`, `ntime`, `dt`,
    /// `integrator`, `linear_solver`, `linsolve_maxiter`,
    /// `linsolve_abstol`, `linsolve_reltol`, `gamma_tikhonov`,
    /// `gamma_penalty`, `gamma_leakage`, `penalty_param`,
    /// `leakage_weights`. Unknown keys are rejected.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut config = Config::default();

        let noscillators = match map.get("noscillators") {
            Some(v) => parse_usize("noscillators", v)?,
            None => 2,
        };
        let nlevels = match map.get("nlevels") {
            Some(v) => parse_usize("nlevels", v)?,
            None => 2,
        };
        config.system.nlevels = vec![nlevels; noscillators];

        for (key, value) in map {
            match key.as_str() {
                "noscillators" | "nlevels" => {} // handled above
                "nessential" => {
                    let n = parse_usize(key, value)?;
                    config.system.nessential = vec![n; noscillators];
                }
                "nspline" => config.controls.nspline = parse_usize(key, value)?,
                "carrier_frequencies" => {
                    config.controls.carrier_frequencies = parse_f64_list(key, value)?
                }
                "transition_frequencies" => {
                    config.system.transition_frequencies = parse_f64_list(key, value)?
                }
                "rotation_frequencies" => {
                    config.system.rotation_frequencies = parse_f64_list(key, value)?
                }
                "selfkerr" => config.system.selfkerr = parse_f64_list(key, value)?,
                "crosskerr" => config.system.crosskerr = parse_f64_list(key, value)?,
                "jkl" => config.system.jkl = parse_f64_list(key, value)?,
                "lindblad_type" => {
                    config.lindblad.lindblad_type = match value.trim() {
                        "none" => LindbladType::None,
                        "decay" => LindbladType::Decay,
                        "dephase" => LindbladType::Dephase,
                        "both" => LindbladType::Both,
                        other => {
                            return Err(Error::Config(format!(
                                "unknown lindblad_type '{}': choose none, decay, dephase or both",
                                other
                            )))
                        }
                    }
                }
                "lindblad_collapse_times" => {
                    config.lindblad.collapse_times = parse_f64_list(key, value)?
                }
                "ntime" => config.grid.ntime = parse_usize(key, value)?,
                "dt" => config.grid.dt = parse_f64(key, value)?,
                "integrator" => {
                    config.solver.integrator = match value.trim() {
                        "euler" => IntegratorType::Euler,
                        "impl_midpoint" => IntegratorType::ImplMidpoint,
                        "composition_4" => IntegratorType::Composition4,
                        "composition_8" => IntegratorType::Composition8,
                        other => {
                            return Err(Error::Config(format!(
                                "unknown integrator '{}': choose euler, impl_midpoint, \
                                 composition_4 or composition_8",
                                other
                            )))
                        }
                    }
                }
                "linear_solver" => {
                    config.solver.linear_solver = match value.trim() {
                        "neumann" => LinearSolverType::Neumann,
                        "gmres" => LinearSolverType::Gmres,
                        other => {
                            return Err(Error::Config(format!(
                                "unknown linear_solver '{}': choose neumann or gmres",
                                other
                            )))
                        }
                    }
                }
                "linsolve_maxiter" => config.solver.linsolve_maxiter = parse_usize(key, value)?,
                "linsolve_abstol" => config.solver.linsolve_abstol = parse_f64(key, value)?,
                "linsolve_reltol" => config.solver.linsolve_reltol = parse_f64(key, value)?,
                "gamma_tikhonov" => config.penalty.gamma_tikhonov = parse_f64(key, value)?,
                "gamma_penalty" => config.penalty.gamma_penalty = parse_f64(key, value)?,
                "gamma_leakage" => config.penalty.gamma_leakage = parse_f64(key, value)?,
                "penalty_param" => config.penalty.penalty_param = parse_f64(key, value)?,
                "leakage_weights" => {
                    config.penalty.leakage_weights = parse_f64_list(key, value)?
                }
                unknown => {
                    return Err(Error::Config(format!("unknown key '{}'", unknown)));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate all cross-field consistency constraints.
    pub fn validate(&self) -> Result<()> {
        let k = self.system.noscillators();
        if k == 0 {
            return Err(Error::Config("need at least one oscillator".into()));
        }
        for (i, &n) in self.system.nlevels.iter().enumerate() {
            if n < 2 {
                return Err(Error::Config(format!(
                    "oscillator {} must have at least 2 levels, got {}",
                    i, n
                )));
            }
        }
        if !self.system.nessential.is_empty() {
            check_len("nessential", self.system.nessential.len(), k)?;
            for (i, (&ness, &n)) in self
                .system
                .nessential
                .iter()
                .zip(&self.system.nlevels)
                .enumerate()
            {
                if ness == 0 || ness > n {
                    return Err(Error::Config(format!(
                        "oscillator {}: nessential {} must be in 1..={}",
                        i, ness, n
                    )));
                }
            }
        }
        for (name, list) in [
            ("transition_frequencies", &self.system.transition_frequencies),
            ("rotation_frequencies", &self.system.rotation_frequencies),
            ("selfkerr", &self.system.selfkerr),
        ] {
            if !list.is_empty() {
                check_len(name, list.len(), k)?;
            }
        }
        for (name, list) in [("crosskerr", &self.system.crosskerr), ("jkl", &self.system.jkl)] {
            if !list.is_empty() {
                check_len(name, list.len(), self.system.npairs())?;
            }
        }

        if self.controls.nspline < 5 {
            return Err(Error::Config(format!(
                "nspline must be at least 5 (two pinned splines at each end), got {}",
                self.controls.nspline
            )));
        }
        if self.controls.carrier_frequencies.is_empty() {
            return Err(Error::Config("need at least one carrier frequency".into()));
        }

        let expected_collapse = k * self.lindblad.lindblad_type.channels_per_oscillator();
        if self.lindblad.collapse_times.len() != expected_collapse {
            return Err(Error::Config(format!(
                "lindblad_type {} expects {} collapse times, got {}",
                self.lindblad.lindblad_type,
                expected_collapse,
                self.lindblad.collapse_times.len()
            )));
        }

        if self.grid.ntime == 0 {
            return Err(Error::Config("ntime must be > 0".into()));
        }
        if self.grid.dt <= 0.0 {
            return Err(Error::Config("dt must be > 0".into()));
        }

        if self.solver.linsolve_maxiter == 0 {
            return Err(Error::Config("linsolve_maxiter must be > 0".into()));
        }
        if self.solver.linsolve_abstol <= 0.0 || self.solver.linsolve_reltol <= 0.0 {
            return Err(Error::Config("linear solver tolerances must be > 0".into()));
        }

        if self.penalty.penalty_param <= 0.0 {
            return Err(Error::Config("penalty_param must be > 0".into()));
        }
        if !self.penalty.leakage_weights.is_empty() {
            check_len("leakage_weights", self.penalty.leakage_weights.len(), k)?;
        }

        Ok(())
    }

    /// Essential level counts, defaulting to all levels essential.
    pub fn nessential(&self) -> Vec<usize> {
        if self.system.nessential.is_empty() {
            self.system.nlevels.clone()
        } else {
            self.system.nessential.clone()
        }
    }

    /// Leakage weight per oscillator, defaulting to 1.0.
    pub fn leakage_weights(&self) -> Vec<f64> {
        if self.penalty.leakage_weights.is_empty() {
            vec![1.0; self.system.noscillators()]
        } else {
            self.penalty.leakage_weights.clone()
        }
    }
}

fn check_len(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(Error::Dimension {
            context: name.into(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("key '{}': cannot parse '{}' as integer", key, value)))
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("key '{}': cannot parse '{}' as double", key, value)))
}

fn parse_f64_list(key: &str, value: &str) -> Result<Vec<f64>> {
    value.split(',').map(|s| parse_f64(key, s)).collect()
}
