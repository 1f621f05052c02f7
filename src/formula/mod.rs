//! Formula algebra: AST, DNF/negation/generalization, SMT-LIB emission,
//! and the properties-XML reader (spec §3, §4.3, §6).

pub mod ast;
pub mod dnf;
pub mod encode;
pub mod properties;

pub use ast::{ArithOp, BoolOp, CmpOp, Delta, Expr, SaturatedDelta, Term};
pub use properties::{generate_deadlock, generate_quasi_liveness, generate_reachability, Formula, PropertyKind, Properties};
