// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Master-equation assembler.
//!
//! Builds the real sparse operator that advances the vectorized state,
//!
//!   A(t) = A_const + Σ_k [ p_k(t)·Pₖ + q_k(t)·Qₖ ],
//!
//! where all constant pieces are precomputed at construction and
//! in-step assembly only overwrites values on a frozen union pattern.
//!
//! In Lindblad mode the continuous equation is
//!   dρ/dt = −i[H(t), ρ] + Σ_j γ_j (ℓ_j ρ ℓ_j† − ½{ℓ_j†ℓ_j, ρ}),
//! with H(t) = H_d + Σ_k [ p_k(t)(â_k + â_k†) + i q_k(t)(â_k − â_k†) ].
//! Vectorizing the commutator with vec(AXB) = (Bᵀ⊗A)vec(X) and splitting
//! real and imaginary blocks yields a real operator of order 2N² with
//! the block shape [[C + L, B], [−B, C + L]], where B collects the
//! symmetric Hamiltonian parts and C the antisymmetric ones. The
//! Schrödinger mode is the same shape of order 2N with B = H_sym and
//! C = H_anti directly.
//!
//! Ref: Breuer & Petruccione, "The Theory of Open Quantum Systems"
//! (2002), Ch. 3.

pub mod indexing;

pub use indexing::{is_guard_level, is_guard_level_of, level_of, StateLayout};

use crate::config::{Config, LindbladType};
use crate::controls::ControlBasis;
use crate::error::{Error, Result};
use crate::oscillator::Oscillator;
use crate::sparse::{dot, CooMat, CsrMat};

/// Assembler for the time-dependent system operator and its
/// parameter derivatives.
pub struct MasterEq {
    oscillators: Vec<Oscillator>,
    lindblad_type: LindbladType,
    layout: StateLayout,
    nlevels: Vec<usize>,
    nessential: Vec<usize>,
    ndesign: usize,
    param_offsets: Vec<usize>,

    /// Union-pattern operator, values rewritten by `assemble_rhs`.
    rhs: CsrMat,
    a_const: CsrMat,
    p_mats: Vec<CsrMat>,
    q_mats: Vec<CsrMat>,

    /// Drift Hamiltonian H_d (order N), kept for diagnostics and the
    /// manufactured exact solution.
    drift: CsrMat,
    drift_is_diagonal: bool,
    has_dissipation: bool,

    /// Parameter Jacobian with frozen dense pattern, built lazily.
    drhsdp: Option<CsrMat>,

    // per-call scratch
    pk_x: Vec<f64>,
    qk_x: Vec<f64>,
    dp: Vec<f64>,
    dq: Vec<f64>,
}

impl MasterEq {
    /// Build the assembler from explicit oscillators and pair couplings.
    ///
    /// `crosskerr` and `jkl` list ξ_kl and J_kl per oscillator pair
    /// (k < l, row-major); empty slices mean all zero.
    pub fn new(
        oscillators: Vec<Oscillator>,
        lindblad_type: LindbladType,
        crosskerr: &[f64],
        jkl: &[f64],
    ) -> Result<Self> {
        if oscillators.is_empty() {
            return Err(Error::Config("need at least one oscillator".into()));
        }
        let nlevels: Vec<usize> = oscillators.iter().map(|o| o.nlevels()).collect();
        let nessential: Vec<usize> = oscillators.iter().map(|o| o.nessential()).collect();
        let dim_rho: usize = nlevels.iter().product();
        let npairs = nlevels.len() * (nlevels.len() - 1) / 2;
        for (name, list) in [("crosskerr", crosskerr), ("jkl", jkl)] {
            if !list.is_empty() && list.len() != npairs {
                return Err(Error::Dimension {
                    context: name.into(),
                    expected: npairs,
                    actual: list.len(),
                });
            }
        }

        let lindblad = lindblad_type != LindbladType::None;
        let layout = StateLayout::new(dim_rho, lindblad);

        // Kronecker lifts of the per-oscillator ladder operators.
        let lifts: Vec<CsrMat> = (0..oscillators.len())
            .map(|k| lift(&nlevels, k, &oscillators[k].lowering()))
            .collect();

        let drift = build_drift(&oscillators, &nlevels, &lifts, crosskerr, jkl)?;
        let drift_is_diagonal = jkl.iter().all(|&j| j == 0.0);

        // Hermitian / anti-hermitian control parts per oscillator.
        let mut p_mats = Vec::with_capacity(oscillators.len());
        let mut q_mats = Vec::with_capacity(oscillators.len());
        for a in &lifts {
            let at = a.transpose();
            let sym = CsrMat::add_scaled(1.0, a, 1.0, &at)?;
            let anti = CsrMat::add_scaled(1.0, a, -1.0, &at)?;
            p_mats.push(real_block(layout, None, Some(&lift_sym(layout, &sym)?))?);
            q_mats.push(real_block(layout, Some(&lift_anti(layout, &anti)?), None)?);
        }

        // Constant part: drift in the B block, dissipation in the C block.
        let mut has_dissipation = false;
        let c_const = if lindblad {
            let mut l_sum: Option<CsrMat> = None;
            for (k, osc) in oscillators.iter().enumerate() {
                let mut channels: Vec<(f64, CsrMat)> = Vec::new();
                let use_decay = matches!(lindblad_type, LindbladType::Decay | LindbladType::Both);
                let use_dephase =
                    matches!(lindblad_type, LindbladType::Dephase | LindbladType::Both);
                if use_decay && osc.decay_time() > 0.0 {
                    channels.push((1.0 / osc.decay_time(), lifts[k].clone()));
                }
                if use_dephase && osc.dephase_time() > 0.0 {
                    channels.push((1.0 / osc.dephase_time(), lift(&nlevels, k, &osc.number())));
                }
                for (gamma, ell) in channels {
                    has_dissipation = true;
                    let term = dissipator_vec(&ell, gamma)?;
                    l_sum = Some(match l_sum {
                        Some(acc) => CsrMat::add_scaled(1.0, &acc, 1.0, &term)?,
                        None => term,
                    });
                }
            }
            l_sum
        } else {
            None
        };
        let b_const = lift_sym(layout, &drift)?;
        let a_const = real_block(layout, c_const.as_ref(), Some(&b_const))?;

        // Frozen union pattern (with full diagonal for identity shifts).
        let mut all: Vec<&CsrMat> = vec![&a_const];
        all.extend(p_mats.iter());
        all.extend(q_mats.iter());
        let rhs = CsrMat::union_pattern(&all, true)?;

        let mut param_offsets = Vec::with_capacity(oscillators.len());
        let mut ndesign = 0;
        for osc in &oscillators {
            param_offsets.push(ndesign);
            ndesign += osc.num_params();
        }

        let dim_state = layout.dim_state();
        let max_params = oscillators.iter().map(|o| o.num_params()).max().unwrap_or(0);

        Ok(Self {
            oscillators,
            lindblad_type,
            layout,
            nlevels,
            nessential,
            ndesign,
            param_offsets,
            rhs,
            a_const,
            p_mats,
            q_mats,
            drift,
            drift_is_diagonal,
            has_dissipation,
            drhsdp: None,
            pk_x: vec![0.0; dim_state],
            qk_x: vec![0.0; dim_state],
            dp: vec![0.0; max_params],
            dq: vec![0.0; max_params],
        })
    }

    /// Build the assembler from a validated [`Config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let total_time = config.grid.total_time();
        let nessential = config.nessential();
        let noscillators = config.system.noscillators();
        let at = |list: &[f64], k: usize| list.get(k).copied().unwrap_or(0.0);

        let mut oscillators = Vec::with_capacity(noscillators);
        for k in 0..noscillators {
            let basis = ControlBasis::new(
                config.controls.nspline,
                total_time,
                &config.controls.carrier_frequencies,
            )?;
            let detuning = at(&config.system.transition_frequencies, k)
                - at(&config.system.rotation_frequencies, k);
            let mut osc = Oscillator::new(
                config.system.nlevels[k],
                nessential[k],
                detuning,
                at(&config.system.selfkerr, k),
                basis,
            )?;
            let times = &config.lindblad.collapse_times;
            osc = match config.lindblad.lindblad_type {
                LindbladType::None => osc,
                LindbladType::Decay => osc.with_collapse_times(times[k], 0.0),
                LindbladType::Dephase => osc.with_collapse_times(0.0, times[k]),
                LindbladType::Both => osc.with_collapse_times(times[2 * k], times[2 * k + 1]),
            };
            oscillators.push(osc);
        }
        Self::new(
            oscillators,
            config.lindblad.lindblad_type,
            &config.system.crosskerr,
            &config.system.jkl,
        )
    }

    /// Hilbert-space dimension N.
    pub fn dim_rho(&self) -> usize {
        self.layout.dim_rho
    }

    /// Real state length: 2N² (Lindblad) or 2N (Schrödinger).
    pub fn dim_state(&self) -> usize {
        self.layout.dim_state()
    }

    /// Index policy for the real state vector.
    pub fn layout(&self) -> StateLayout {
        self.layout
    }

    /// Which dissipation channels are configured.
    pub fn lindblad_type(&self) -> LindbladType {
        self.lindblad_type
    }

    /// Total number of design parameters D.
    pub fn ndesign(&self) -> usize {
        self.ndesign
    }

    /// Number of oscillators.
    pub fn noscillators(&self) -> usize {
        self.oscillators.len()
    }

    /// Level counts per oscillator.
    pub fn nlevels(&self) -> &[usize] {
        &self.nlevels
    }

    /// Essential level counts per oscillator.
    pub fn nessential(&self) -> &[usize] {
        &self.nessential
    }

    /// Oscillator k.
    pub fn oscillator(&self, k: usize) -> &Oscillator {
        &self.oscillators[k]
    }

    /// Offset of oscillator k's parameters in the design vector.
    pub fn param_offset(&self, k: usize) -> usize {
        self.param_offsets[k]
    }

    /// Drift Hamiltonian H_d (order N).
    pub fn drift(&self) -> &CsrMat {
        &self.drift
    }

    /// Copy the design vector into the per-oscillator parameter slices.
    ///
    /// Layout: for each oscillator k, for each carrier c, for each
    /// spline ℓ, the pair (α, β).
    pub fn set_design(&mut self, x: &[f64]) -> Result<()> {
        if x.len() != self.ndesign {
            return Err(Error::Dimension {
                context: "design vector".into(),
                expected: self.ndesign,
                actual: x.len(),
            });
        }
        for (k, osc) in self.oscillators.iter_mut().enumerate() {
            let off = self.param_offsets[k];
            osc.set_params(&x[off..off + osc.num_params()])?;
        }
        Ok(())
    }

    /// Assemble A(t) in place on the frozen union pattern.
    pub fn assemble_rhs(&mut self, t: f64) -> &CsrMat {
        self.rhs.zero_values();
        self.rhs.axpy_same_pattern(1.0, &self.a_const);
        for k in 0..self.oscillators.len() {
            let (p, q) = self.oscillators[k].eval_control(t);
            self.rhs.axpy_same_pattern(p, &self.p_mats[k]);
            self.rhs.axpy_same_pattern(q, &self.q_mats[k]);
        }
        &self.rhs
    }

    /// The operator as last assembled.
    pub fn rhs(&self) -> &CsrMat {
        &self.rhs
    }

    /// Accumulate `scale · (∂A/∂θ)(t)ᵀ x_adj · x_fwd` into `grad`
    /// without materializing the Jacobian.
    ///
    /// Per parameter ξ of oscillator k, (∂A/∂ξ)x = (∂p_k/∂ξ)(t)·Pₖx +
    /// (∂q_k/∂ξ)(t)·Qₖx; the two mat-vecs per oscillator are cached and
    /// the small control Jacobian is applied through the basis.
    pub fn compute_drhsdp_contrib(
        &mut self,
        t: f64,
        x_fwd: &[f64],
        x_adj: &[f64],
        scale: f64,
        grad: &mut [f64],
    ) {
        debug_assert_eq!(x_fwd.len(), self.dim_state());
        debug_assert_eq!(x_adj.len(), self.dim_state());
        debug_assert_eq!(grad.len(), self.ndesign);
        for k in 0..self.oscillators.len() {
            self.p_mats[k].matvec(x_fwd, &mut self.pk_x);
            self.q_mats[k].matvec(x_fwd, &mut self.qk_x);
            let pbar = scale * dot(&self.pk_x, x_adj);
            let qbar = scale * dot(&self.qk_x, x_adj);
            let off = self.param_offsets[k];
            let np = self.oscillators[k].num_params();
            self.oscillators[k].eval_control_derivative(t, pbar, qbar, &mut grad[off..off + np]);
        }
    }

    /// Assemble the parameter Jacobian (∂A/∂θ)(t)·x, one column per
    /// design parameter (rows = state length, cols = D).
    pub fn assemble_drhsdp(&mut self, t: f64, x: &[f64]) -> Result<&CsrMat> {
        if x.len() != self.dim_state() {
            return Err(Error::Dimension {
                context: "state passed to assemble_drhsdp".into(),
                expected: self.dim_state(),
                actual: x.len(),
            });
        }
        let dim_state = self.dim_state();
        let ndesign = self.ndesign;
        let mut mat = match self.drhsdp.take() {
            Some(m) => m,
            None => CsrMat::dense_pattern(dim_state, ndesign),
        };
        mat.zero_values();

        for k in 0..self.oscillators.len() {
            self.p_mats[k].matvec(x, &mut self.pk_x);
            self.q_mats[k].matvec(x, &mut self.qk_x);
            let np = self.oscillators[k].num_params();
            self.dp[..np].fill(0.0);
            self.dq[..np].fill(0.0);
            self.oscillators[k].eval_control_derivative(t, 1.0, 0.0, &mut self.dp[..np]);
            self.oscillators[k].eval_control_derivative(t, 0.0, 1.0, &mut self.dq[..np]);
            let off = self.param_offsets[k];
            let vals = mat.values_mut();
            for i in 0..np {
                let (dpi, dqi) = (self.dp[i], self.dq[i]);
                if dpi == 0.0 && dqi == 0.0 {
                    continue;
                }
                for r in 0..dim_state {
                    vals[r * ndesign + off + i] = dpi * self.pk_x[r] + dqi * self.qk_x[r];
                }
            }
        }
        Ok(self.drhsdp.insert(mat))
    }

    /// Pure-level initial condition `initial_id`: |i⟩⟨i| (Lindblad) or
    /// |i⟩ (Schrödinger).
    pub fn initial_condition(&self, initial_id: usize, out: &mut [f64]) -> Result<()> {
        if initial_id >= self.dim_rho() {
            return Err(Error::Config(format!(
                "initial condition {} out of range (N = {})",
                initial_id,
                self.dim_rho()
            )));
        }
        if out.len() != self.dim_state() {
            return Err(Error::Dimension {
                context: "initial condition buffer".into(),
                expected: self.dim_state(),
                actual: out.len(),
            });
        }
        out.fill(0.0);
        out[self.layout.diag_re(initial_id)] = 1.0;
        Ok(())
    }

    /// True when the closed-form solution of [`MasterEq::exact_solution`]
    /// applies (diagonal drift, no dissipation; zero controls assumed).
    pub fn supports_exact_solution(&self) -> bool {
        self.drift_is_diagonal && !self.has_dissipation
    }

    /// Closed-form free evolution from `x0`, valid for a diagonal drift
    /// with no dissipation and zero controls: every component rotates as
    /// exp(−i(E_i − E_j)t) (Lindblad) or exp(−iE_i t) (Schrödinger).
    pub fn exact_solution(&self, t: f64, x0: &[f64], out: &mut [f64]) -> Result<()> {
        if !self.supports_exact_solution() {
            return Err(Error::Config(
                "exact solution requires a diagonal drift and no dissipation".into(),
            ));
        }
        if x0.len() != self.dim_state() || out.len() != self.dim_state() {
            return Err(Error::Dimension {
                context: "exact solution buffer".into(),
                expected: self.dim_state(),
                actual: out.len(),
            });
        }
        let n = self.dim_rho();
        let energy: Vec<f64> = (0..n).map(|i| self.drift.get(i, i)).collect();
        let layout = self.layout;
        if layout.lindblad {
            for j in 0..n {
                for i in 0..n {
                    let theta = (energy[i] - energy[j]) * t;
                    let (sin, cos) = theta.sin_cos();
                    let re = layout.idx_re(layout.vec_id(i, j));
                    let im = layout.idx_im(layout.vec_id(i, j));
                    out[re] = x0[re] * cos + x0[im] * sin;
                    out[im] = x0[im] * cos - x0[re] * sin;
                }
            }
        } else {
            for i in 0..n {
                let theta = energy[i] * t;
                let (sin, cos) = theta.sin_cos();
                let (re, im) = (layout.idx_re(i), layout.idx_im(i));
                out[re] = x0[re] * cos + x0[im] * sin;
                out[im] = x0[im] * cos - x0[re] * sin;
            }
        }
        Ok(())
    }
}

/// Kronecker lift I_{n_1} ⊗ … ⊗ op_k ⊗ … ⊗ I_{n_K}.
fn lift(nlevels: &[usize], k: usize, op: &CsrMat) -> CsrMat {
    let npre: usize = nlevels[..k].iter().product();
    let npost: usize = nlevels[k + 1..].iter().product();
    let pre = CsrMat::kron(&CsrMat::identity(npre), op);
    CsrMat::kron(&pre, &CsrMat::identity(npost))
}

/// Vectorized-space lift of a symmetric N×N matrix: the B block.
///
/// Lindblad: I⊗X − X⊗I; Schrödinger: X itself.
fn lift_sym(layout: StateLayout, x: &CsrMat) -> Result<CsrMat> {
    if layout.lindblad {
        let eye = CsrMat::identity(layout.dim_rho);
        CsrMat::add_scaled(1.0, &CsrMat::kron(&eye, x), -1.0, &CsrMat::kron(x, &eye))
    } else {
        Ok(x.clone())
    }
}

/// Vectorized-space lift of an antisymmetric N×N matrix: the C block.
///
/// Lindblad: I⊗Y + Y⊗I; Schrödinger: Y itself.
fn lift_anti(layout: StateLayout, y: &CsrMat) -> Result<CsrMat> {
    if layout.lindblad {
        let eye = CsrMat::identity(layout.dim_rho);
        CsrMat::add_scaled(1.0, &CsrMat::kron(&eye, y), 1.0, &CsrMat::kron(y, &eye))
    } else {
        Ok(y.clone())
    }
}

/// Real dissipator matrix γ(ℓ⊗ℓ − ½I⊗ℓᵀℓ − ½ℓᵀℓ⊗I) for a real collapse
/// operator ℓ (LGKS form after vectorization).
fn dissipator_vec(ell: &CsrMat, gamma: f64) -> Result<CsrMat> {
    let n = ell.nrows();
    let eye = CsrMat::identity(n);
    let ltl = ell.transpose().matmul(ell)?;
    let jump = CsrMat::kron(ell, ell);
    let anticomm = CsrMat::add_scaled(
        1.0,
        &CsrMat::kron(&eye, &ltl),
        1.0,
        &CsrMat::kron(&ltl, &eye),
    )?;
    let term = CsrMat::add_scaled(gamma, &jump, -0.5 * gamma, &anticomm)?;
    Ok(term)
}

/// Assemble the [[C, B], [−B, C]] real block operator. Either block may
/// be absent (treated as zero).
fn real_block(layout: StateLayout, c: Option<&CsrMat>, b: Option<&CsrMat>) -> Result<CsrMat> {
    let nv = layout.dim_vec();
    for m in [c, b].into_iter().flatten() {
        if m.nrows() != nv || m.ncols() != nv {
            return Err(Error::Dimension {
                context: "real block".into(),
                expected: nv,
                actual: m.nrows(),
            });
        }
    }
    let mut coo = CooMat::new(2 * nv, 2 * nv);
    if let Some(c) = c {
        for r in 0..nv {
            for (col, val) in c.row_iter(r) {
                coo.push(r, col, val);
                coo.push(nv + r, nv + col, val);
            }
        }
    }
    if let Some(b) = b {
        for r in 0..nv {
            for (col, val) in b.row_iter(r) {
                coo.push(r, nv + col, val);
                coo.push(nv + r, col, -val);
            }
        }
    }
    Ok(coo.to_csr())
}

/// Drift Hamiltonian: detuning, self-Kerr and cross-Kerr terms on the
/// diagonal plus the dipole couplings J_kl(â_k†â_l + â_kâ_l†).
fn build_drift(
    oscillators: &[Oscillator],
    nlevels: &[usize],
    lifts: &[CsrMat],
    crosskerr: &[f64],
    jkl: &[f64],
) -> Result<CsrMat> {
    let n: usize = nlevels.iter().product();
    let mut coo = CooMat::new(n, n);
    for i in 0..n {
        let mut val = 0.0;
        for (k, osc) in oscillators.iter().enumerate() {
            let l = level_of(i, k, nlevels) as f64;
            val += osc.detuning() * l - 0.5 * osc.selfkerr() * l * (l - 1.0);
        }
        let mut pair = 0;
        for k in 0..oscillators.len() {
            for m in k + 1..oscillators.len() {
                let xi = crosskerr.get(pair).copied().unwrap_or(0.0);
                if xi != 0.0 {
                    let lk = level_of(i, k, nlevels) as f64;
                    let lm = level_of(i, m, nlevels) as f64;
                    val -= xi * lk * lm;
                }
                pair += 1;
            }
        }
        coo.push(i, i, val);
    }
    let mut drift = coo.to_csr();

    let mut pair = 0;
    for k in 0..oscillators.len() {
        for m in k + 1..oscillators.len() {
            let j = jkl.get(pair).copied().unwrap_or(0.0);
            if j != 0.0 {
                let hop = lifts[k].transpose().matmul(&lifts[m])?;
                let coupling = CsrMat::add_scaled(1.0, &hop, 1.0, &hop.transpose())?;
                drift = CsrMat::add_scaled(1.0, &drift, j, &coupling)?;
            }
            pair += 1;
        }
    }
    Ok(drift)
}
