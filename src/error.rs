// Copyright 2026 Pulseopt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types.
//!
//! Every fallible operation in the crate returns [`Result`]; infallible
//! numerical kernels (mat-vec, stage updates) return plain values.

use std::fmt;

/// Result type alias for pulse-engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Pulse-engine error types.
#[derive(Debug)]
pub enum Error {
    /// Configuration error (missing key, unparseable value, bad option).
    Config(String),
    /// Dimension mismatch between collaborating objects.
    Dimension {
        /// What was being checked.
        context: String,
        /// Expected size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },
    /// Iterative linear solver failed to converge within its budget.
    Convergence {
        /// Iterations taken before giving up.
        iterations: usize,
        /// Residual norm at the last iterate.
        residual: f64,
    },
    /// Non-finite state or singular operator encountered mid-trajectory.
    Numerical(String),
    /// IO error from the output writers.
    Io(std::io::Error),
    /// Serialization error
    Serialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Dimension {
                context,
                expected,
                actual,
            } => write!(
                f,
                "Dimension mismatch in {}: expected {}, got {}",
                context, expected, actual
            ),
            Error::Convergence {
                iterations,
                residual,
            } => write!(
                f,
                "Linear solver did not converge: {} iterations, residual {:.2e}",
                iterations, residual
            ),
            Error::Numerical(msg) => write!(f, "Numerical failure: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display_config() {
        let e = Error::Config("bad lindblad_type".into());
        assert_eq!(e.to_string(), "Configuration error: bad lindblad_type");
    }

    #[test]
    fn test_error_display_dimension() {
        let e = Error::Dimension {
            context: "design vector".into(),
            expected: 40,
            actual: 39,
        };
        assert_eq!(
            e.to_string(),
            "Dimension mismatch in design vector: expected 40, got 39"
        );
    }

    #[test]
    fn test_error_display_convergence() {
        let e = Error::Convergence {
            iterations: 100,
            residual: 3.5e-2,
        };
        assert_eq!(
            e.to_string(),
            "Linear solver did not converge: 100 iterations, residual 3.50e-2"
        );
    }

    #[test]
    fn test_error_display_numerical() {
        let e = Error::Numerical("non-finite state at t=0.5".into());
        assert_eq!(
            e.to_string(),
            "Numerical failure: non-finite state at t=0.5"
        );
    }

    #[test]
    fn test_error_source_io() {
        let e = Error::Io(std::io::Error::other("disk"));
        assert!(e.source().is_some());
    }

    #[test]
    fn test_error_source_none_for_config() {
        let e = Error::Config("x".into());
        assert!(e.source().is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn test_from_serde_yaml_error() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("{{{{").unwrap_err();
        let e: Error = yaml_err.into();
        assert!(matches!(e, Error::Serialization(_)));
    }
}
