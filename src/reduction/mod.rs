//! The reduction-equations layer bridging an initial and a reduced net
//! (spec §3, §4.4).

pub mod system;

pub use system::{Equation, RelOp, System, Variable};
