//! Symbolic reachability/invariance checking for Petri nets over an
//! external SMT solver: BMC, k-induction, IC3/PDR and a stepper/
//! concurrent-places analyzer, raced by a portfolio scheduler (spec
//! §1-§9).
//!
//! Grounded on `MichaelOwenDyer-petrinets-rs`'s crate layout: a `net`
//! data model, a `formula` algebra, a `reduction` bridging layer, an
//! `smt` wire driver, and the `engines` that compose them.

pub mod config;
pub mod engines;
pub mod error;
pub mod formula;
pub mod net;
pub mod reduction;
pub mod smt;

pub use error::{PnError, PnResult};
