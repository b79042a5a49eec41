// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-width ASCII output files.
//!
//! Three artifacts, one row per record:
//! - trajectory files: step index, time, trajectory norm, reference
//!   norm, relative error (the reference is the closed-form free
//!   evolution when the system supports it, otherwise the trajectory
//!   itself with zero error);
//! - control-pulse dumps: time, p(t), q(t);
//! - the optimized-parameter vector, one coefficient per line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::mastereq::MasterEq;
use crate::oscillator::Oscillator;
use crate::sparse::norm2;

/// Per-step trajectory writer driven by the forward sweep.
pub struct TrajectoryWriter {
    out: BufWriter<File>,
    exact: Vec<f64>,
}

impl TrajectoryWriter {
    /// Create the file and write the header row.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(
            out,
            "# {:>6} {:>22} {:>22} {:>22} {:>22}",
            "step", "time", "norm", "ref_norm", "rel_err"
        )?;
        Ok(Self {
            out,
            exact: Vec::new(),
        })
    }

    /// Append one trajectory row.
    pub fn write_step(
        &mut self,
        step: usize,
        time: f64,
        x: &[f64],
        eq: &MasterEq,
        rho0: &[f64],
    ) -> Result<()> {
        let norm = norm2(x);
        let (ref_norm, rel_err) = if eq.supports_exact_solution() {
            self.exact.resize(x.len(), 0.0);
            eq.exact_solution(time, rho0, &mut self.exact)?;
            let ref_norm = norm2(&self.exact);
            let diff: f64 = x
                .iter()
                .zip(&self.exact)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            let rel_err = if ref_norm > 0.0 { diff / ref_norm } else { diff };
            (ref_norm, rel_err)
        } else {
            (norm, 0.0)
        };
        writeln!(
            self.out,
            "  {:>6} {:>22.14e} {:>22.14e} {:>22.14e} {:>22.14e}",
            step, time, norm, ref_norm, rel_err
        )?;
        Ok(())
    }

    /// Flush buffered rows to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Dump the control pair of one oscillator over the time grid:
/// rows of (time, p(t), q(t)).
pub fn write_control_pulse<P: AsRef<Path>>(
    path: P,
    oscillator: &Oscillator,
    ntime: usize,
    dt: f64,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "# {:>22} {:>22} {:>22}", "time", "p", "q")?;
    for n in 0..=ntime {
        let t = n as f64 * dt;
        let (p, q) = oscillator.eval_control(t);
        writeln!(out, "  {:>22.14e} {:>22.14e} {:>22.14e}", t, p, q)?;
    }
    out.flush()?;
    Ok(())
}

/// Write the design vector, one coefficient per line.
pub fn write_parameters<P: AsRef<Path>>(path: P, x: &[f64]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for v in x {
        writeln!(out, "{:.14e}", v)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LindbladType;
    use crate::controls::ControlBasis;
    use crate::mastereq::MasterEq;

    fn free_qubit() -> MasterEq {
        let basis = ControlBasis::new(8, 1.0, &[0.0]).unwrap();
        let osc = crate::oscillator::Oscillator::new(2, 2, 1.0, 0.0, basis).unwrap();
        MasterEq::new(vec![osc], LindbladType::None, &[], &[]).unwrap()
    }

    #[test]
    fn test_trajectory_rows_parse() {
        let eq = free_qubit();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rho.dat");

        let mut rho0 = vec![0.0; eq.dim_state()];
        eq.initial_condition(0, &mut rho0).unwrap();

        let mut writer = TrajectoryWriter::create(&path).unwrap();
        writer.write_step(0, 0.0, &rho0, &eq, &rho0).unwrap();
        writer.write_step(1, 0.01, &rho0, &eq, &rho0).unwrap();
        writer.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows.len(), 2);
        for row in rows {
            let cols: Vec<&str> = row.split_whitespace().collect();
            assert_eq!(cols.len(), 5);
            for col in &cols[1..] {
                col.parse::<f64>().unwrap();
            }
        }
    }

    #[test]
    fn test_exact_reference_at_t0_has_zero_error() {
        let eq = free_qubit();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rho.dat");

        let mut rho0 = vec![0.0; eq.dim_state()];
        eq.initial_condition(1, &mut rho0).unwrap();

        let mut writer = TrajectoryWriter::create(&path).unwrap();
        writer.write_step(0, 0.0, &rho0, &eq, &rho0).unwrap();
        writer.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let row = content.lines().nth(1).unwrap();
        let cols: Vec<f64> = row
            .split_whitespace()
            .map(|c| c.parse().unwrap())
            .collect();
        assert!(cols[4].abs() < 1e-14, "rel_err at t=0 should vanish");
    }

    #[test]
    fn test_control_pulse_dump() {
        let eq = free_qubit();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control_01.dat");
        write_control_pulse(&path, eq.oscillator(0), 10, 0.1).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows.len(), 11);
        // zero design vector: all controls vanish
        for row in rows {
            let cols: Vec<f64> = row
                .split_whitespace()
                .map(|c| c.parse().unwrap())
                .collect();
            assert_eq!(cols.len(), 3);
            assert_eq!(cols[1], 0.0);
            assert_eq!(cols[2], 0.0);
        }
    }

    #[test]
    fn test_parameter_dump_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("param_optimized.dat");
        let x = vec![1.25, -0.5, 3.75e-3];
        write_parameters(&path, &x).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let back: Vec<f64> = content.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(back, x);
    }
}
