// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-oscillator model: level structure, ladder operators and the
//! binding between the oscillator and its control basis.
//!
//! The composite system operator uses the Kronecker lifts
//! â_k = I_{n_1} ⊗ … ⊗ a_k ⊗ … ⊗ I_{n_K}; the lifting itself happens in
//! the master-equation assembler. Here each oscillator only knows its
//! own n_k × n_k operators.

use crate::controls::{ControlBasis, TransferFunction};
use crate::error::{Error, Result};
use crate::sparse::{CooMat, CsrMat};

/// One oscillator of the coupled system.
#[derive(Debug, Clone)]
pub struct Oscillator {
    nlevels: usize,
    nessential: usize,
    /// Rotating-frame detuning ω_k − ω_rot,k.
    detuning: f64,
    /// Self-Kerr coefficient ξ_k.
    selfkerr: f64,
    /// Decay time T1 (≤ 0 disables the channel).
    decay_time: f64,
    /// Dephasing time T2 (≤ 0 disables the channel).
    dephase_time: f64,
    basis: ControlBasis,
    transfer_p: TransferFunction,
    transfer_q: TransferFunction,
    /// Copy of this oscillator's slice of the design vector.
    params: Vec<f64>,
}

impl Oscillator {
    /// Create an oscillator with identity transfer functions.
    ///
    /// # Arguments
    /// * `nlevels` — Hilbert dimension n_k of this oscillator.
    /// * `nessential` — Essential levels (≤ nlevels); the rest are guards.
    /// * `detuning` — Rotating-frame detuning ω_k − ω_rot,k.
    /// * `selfkerr` — Self-Kerr coefficient ξ_k.
    /// * `basis` — Control basis for this oscillator's (p, q) pair.
    pub fn new(
        nlevels: usize,
        nessential: usize,
        detuning: f64,
        selfkerr: f64,
        basis: ControlBasis,
    ) -> Result<Self> {
        if nlevels < 2 {
            return Err(Error::Config(format!(
                "oscillator needs at least 2 levels, got {}",
                nlevels
            )));
        }
        if nessential == 0 || nessential > nlevels {
            return Err(Error::Config(format!(
                "nessential {} must be in 1..={}",
                nessential, nlevels
            )));
        }
        let nparams = basis.num_params();
        Ok(Self {
            nlevels,
            nessential,
            detuning,
            selfkerr,
            decay_time: 0.0,
            dephase_time: 0.0,
            basis,
            transfer_p: TransferFunction::Identity,
            transfer_q: TransferFunction::Identity,
            params: vec![0.0; nparams],
        })
    }

    /// Set the collapse times (T1, T2). Non-positive values disable the
    /// respective channel.
    pub fn with_collapse_times(mut self, decay_time: f64, dephase_time: f64) -> Self {
        self.decay_time = decay_time;
        self.dephase_time = dephase_time;
        self
    }

    /// Install transfer functions wrapping the raw (p, q) controls.
    pub fn with_transfer(mut self, p: TransferFunction, q: TransferFunction) -> Self {
        self.transfer_p = p;
        self.transfer_q = q;
        self
    }

    /// Level count n_k.
    pub fn nlevels(&self) -> usize {
        self.nlevels
    }

    /// Essential level count.
    pub fn nessential(&self) -> usize {
        self.nessential
    }

    /// Rotating-frame detuning.
    pub fn detuning(&self) -> f64 {
        self.detuning
    }

    /// Self-Kerr coefficient.
    pub fn selfkerr(&self) -> f64 {
        self.selfkerr
    }

    /// Decay time T1.
    pub fn decay_time(&self) -> f64 {
        self.decay_time
    }

    /// Dephasing time T2.
    pub fn dephase_time(&self) -> f64 {
        self.dephase_time
    }

    /// Control basis of this oscillator.
    pub fn basis(&self) -> &ControlBasis {
        &self.basis
    }

    /// Number of design parameters owned by this oscillator.
    pub fn num_params(&self) -> usize {
        self.basis.num_params()
    }

    /// Copy this oscillator's slice of the design vector.
    pub fn set_params(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(Error::Dimension {
                context: "oscillator parameter slice".into(),
                expected: self.params.len(),
                actual: params.len(),
            });
        }
        self.params.copy_from_slice(params);
        Ok(())
    }

    /// Current parameter copy.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    /// Evaluate the control pair (p_k(t), q_k(t)) including transfers.
    pub fn eval_control(&self, t: f64) -> (f64, f64) {
        let (p_raw, q_raw) = self.basis.evaluate(t, &self.params);
        (self.transfer_p.eval(p_raw), self.transfer_q.eval(q_raw))
    }

    /// Accumulate ∂(p,q)/∂θ · (p̄, q̄) into `grad`, chained through the
    /// transfer functions.
    pub fn eval_control_derivative(&self, t: f64, pbar: f64, qbar: f64, grad: &mut [f64]) {
        let (p_raw, q_raw) = self.basis.evaluate(t, &self.params);
        let pbar_raw = pbar * self.transfer_p.der(p_raw);
        let qbar_raw = qbar * self.transfer_q.der(q_raw);
        self.basis.derivative(t, pbar_raw, qbar_raw, grad);
    }

    /// Lowering operator a_k of size n_k: a[i, i+1] = √(i+1).
    pub fn lowering(&self) -> CsrMat {
        let mut coo = CooMat::new(self.nlevels, self.nlevels);
        for i in 0..self.nlevels - 1 {
            coo.push(i, i + 1, ((i + 1) as f64).sqrt());
        }
        coo.to_csr()
    }

    /// Number operator a†a = diag(0, 1, …, n_k − 1).
    pub fn number(&self) -> CsrMat {
        let mut coo = CooMat::new(self.nlevels, self.nlevels);
        for i in 1..self.nlevels {
            coo.push(i, i, i as f64);
        }
        // keep the (0,0) slot structurally present for diagonal updates
        coo.push(0, 0, 0.0);
        coo.to_csr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn oscillator() -> Oscillator {
        let basis = ControlBasis::new(10, 4.0, &[0.0, 1.0]).unwrap();
        Oscillator::new(3, 2, 0.5, 0.2, basis).unwrap()
    }

    #[test]
    fn test_lowering_operator_entries() {
        let osc = oscillator();
        let a = osc.lowering();
        assert_relative_eq!(a.get(0, 1), 1.0);
        assert_relative_eq!(a.get(1, 2), 2.0f64.sqrt());
        assert_relative_eq!(a.get(1, 0), 0.0);
        assert_eq!(a.nnz(), 2);
    }

    #[test]
    fn test_number_operator_is_a_dagger_a() {
        let osc = oscillator();
        let a = osc.lowering();
        let n = a.transpose().matmul(&a).unwrap();
        let num = osc.number();
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(n.get(i, j), num.get(i, j), epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_set_params_length_checked() {
        let mut osc = oscillator();
        assert!(osc.set_params(&[0.0; 3]).is_err());
        let n = osc.num_params();
        assert!(osc.set_params(&vec![0.1; n]).is_ok());
    }

    #[test]
    fn test_controls_zero_with_zero_params() {
        let osc = oscillator();
        let (p, q) = osc.eval_control(1.7);
        assert_relative_eq!(p, 0.0);
        assert_relative_eq!(q, 0.0);
    }

    #[test]
    fn test_transfer_chain_rule() {
        let basis = ControlBasis::new(10, 4.0, &[0.0]).unwrap();
        let mut osc = Oscillator::new(2, 2, 0.0, 0.0, basis)
            .unwrap()
            .with_transfer(
                TransferFunction::Cosine { amp: 1.2, freq: 0.9 },
                TransferFunction::Sine { amp: 0.7, freq: 1.4 },
            );
        let n = osc.num_params();
        let params: Vec<f64> = (0..n).map(|i| 0.05 * (i as f64 + 1.0)).collect();
        osc.set_params(&params).unwrap();

        let t = 1.9;
        let (pbar, qbar) = (0.6, -0.9);
        let mut grad = vec![0.0; n];
        osc.eval_control_derivative(t, pbar, qbar, &mut grad);

        let eps = 1e-6;
        let mut osc_pert = osc.clone();
        for i in 0..n {
            let mut pp = params.clone();
            pp[i] += eps;
            osc_pert.set_params(&pp).unwrap();
            let (p_plus, q_plus) = osc_pert.eval_control(t);
            pp[i] -= 2.0 * eps;
            osc_pert.set_params(&pp).unwrap();
            let (p_minus, q_minus) = osc_pert.eval_control(t);
            let fd = (pbar * (p_plus - p_minus) + qbar * (q_plus - q_minus)) / (2.0 * eps);
            assert_relative_eq!(grad[i], fd, epsilon = 1e-7, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_construction_validation() {
        let basis = ControlBasis::new(10, 4.0, &[0.0]).unwrap();
        assert!(Oscillator::new(1, 1, 0.0, 0.0, basis.clone()).is_err());
        assert!(Oscillator::new(3, 4, 0.0, 0.0, basis.clone()).is_err());
        assert!(Oscillator::new(3, 0, 0.0, 0.0, basis).is_err());
    }
}
