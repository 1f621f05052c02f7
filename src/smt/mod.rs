//! The solver driver abstraction (spec §4.1).
//!
//! `solver.py`'s own module docstring says the interface "can easily be
//! hacked to replace Z3 by another SMT solver supporting the SMT-LIB
//! format"; this crate takes that statement at face value and puts the
//! contract behind a trait instead of hardwiring a child process into
//! every engine.

pub mod process;
pub mod registry;

#[cfg(any(test, feature = "mock-solver"))]
pub mod mock;

use crate::error::PnResult;
use crate::net::{Marking, PetriNet};

/// Outcome of a `(check-sat)` round-trip (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckSatResult {
    Sat,
    Unsat,
    /// The scheduler's wall-clock timeout elapsed while blocked in the
    /// solver (spec §5).
    Timeout,
    /// A sibling worker signalled this solver's process to terminate
    /// while this call was blocked (spec §4.1, §5).
    Aborted,
}

/// The operations every engine drives a solver through, exactly as named
/// in spec §4.1: `push`, `pop`, `reset`, `write`, `check_sat`,
/// `get_marking`, `get_unsat_core`, `kill`.
///
/// `write` is append-only into the current context: callers never
/// retract an assertion except via `pop`. `check_sat` is synchronous and
/// blocking. `kill` is idempotent and may be called from a thread other
/// than the one driving this solver (the portfolio scheduler signalling
/// a losing worker, spec §5).
pub trait SolverBackend {
    fn push(&mut self) -> PnResult<()>;
    fn pop(&mut self) -> PnResult<()>;
    fn reset(&mut self) -> PnResult<()>;
    fn write(&mut self, text: &str) -> PnResult<()>;
    fn check_sat(&mut self) -> PnResult<CheckSatResult>;

    /// Extracts a marking from the last satisfying model, keeping only
    /// variables at `order` (or unindexed variables when `order` is
    /// `None`) — spec §4.1's "model parsing tolerates two forms: scalar
    /// ... and indexed `p@k`; only variables matching the requested
    /// order ... are retained."
    fn get_marking(&mut self, net: &PetriNet, order: Option<u32>) -> PnResult<Marking>;

    /// Returns the `:named` labels of the unsat core from the last
    /// `(check-sat)` (spec §4.1, §4.7).
    fn get_unsat_core(&mut self) -> PnResult<Vec<String>>;

    /// Idempotent: terminates the underlying process (or, for the mock,
    /// marks this context permanently aborted). Safe to call from
    /// another thread while a `check_sat` is in flight.
    fn kill(&mut self);
}
