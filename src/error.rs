//! Crate-wide error type.
//!
//! Mirrors spec §7: `Parse` and `Solver` are fatal and abort the run,
//! `SolverAborted` and `Timeout` are recoverable and only ever observed by
//! the worker that owns the failing solver.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while parsing or verifying a Petri net.
#[derive(Debug, Error)]
pub enum PnError {
    /// A `.net`, `.pnml`, properties-XML, or reduction file was malformed.
    #[error("parse error in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// The external SMT solver could not be started, or violated the
    /// expected SMT-LIB response protocol.
    #[error("solver error: {0}")]
    Solver(String),

    /// The solver child process was killed by a sibling portfolio worker.
    /// Not a fatal error: the owning worker must stop silently.
    #[error("solver aborted by a sibling worker")]
    SolverAborted,

    /// A wall-clock timeout, enforced by the portfolio scheduler, expired
    /// while this worker was blocked in the solver.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Underlying I/O failure (spawning the solver, reading an input file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PnError {
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PnError::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors a portfolio worker should swallow rather than
    /// propagate to the scheduler's result queue (spec §5, §7).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PnError::SolverAborted | PnError::Timeout(_))
    }
}

pub type PnResult<T> = Result<T, PnError>;
