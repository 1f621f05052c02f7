//! SMT-LIB assertion emission, including the labelled-assertion form used
//! for unsat-core extraction (spec §4.1, §4.7).
//!
//! Grounded on `Atom.smtlib_unsat_core` / `StateFormula.smtlib_unsat_core`
//! (original_source, `ptio/formula.py` lines ~1079-1104 and ~1479-1498):
//! each cube of a DNF formula is asserted individually under a distinct
//! `:named` label so a subsequent `(get-unsat-core)` tells the caller
//! exactly which cubes participated.

use crate::net::PlaceId;

use super::ast::Expr;

/// Plain `(assert φ)` at order `k`.
pub fn assert_plain(expr: &Expr, k: Option<u32>, place_name: &impl Fn(PlaceId) -> String) -> String {
    format!("(assert {})\n", expr.smtlib(k, place_name))
}

/// Asserts every cube of a DNF formula individually, each under a
/// `lit@cN` label, so `(get-unsat-core)` returns exactly the labels of
/// the cubes that participated (spec §4.1's "unsat-core mode uses
/// labelled assertions `(assert (! φ :named lit@cN))`", spec §4.7's
/// `sub_clause_finder`/`generate_clause`).
pub fn assert_labelled_cubes(
    cubes: &[&Expr],
    k: Option<u32>,
    label_prefix: &str,
    place_name: &impl Fn(PlaceId) -> String,
) -> (String, Vec<String>) {
    let mut out = String::new();
    let mut labels = Vec::with_capacity(cubes.len());
    for (i, cube) in cubes.iter().enumerate() {
        let label = format!("{label_prefix}{i}");
        out.push_str(&format!(
            "(assert (! {} :named {label}))\n",
            cube.smtlib(k, place_name)
        ));
        labels.push(label);
    }
    (out, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::ast::{CmpOp, Term};

    #[test]
    fn labelled_cubes_get_distinct_names() {
        let cubes = vec![
            Expr::atom(Term::token_count(vec![PlaceId(0)]), CmpOp::Ge, Term::IntegerConstant(1)),
            Expr::atom(Term::token_count(vec![PlaceId(1)]), CmpOp::Lt, Term::IntegerConstant(2)),
        ];
        let refs: Vec<&Expr> = cubes.iter().collect();
        let name_of = |p: PlaceId| format!("p{}", p.0);
        let (text, labels) = assert_labelled_cubes(&refs, Some(3), "lit@c", &name_of);
        assert_eq!(labels, vec!["lit@c0", "lit@c1"]);
        assert!(text.contains(":named lit@c0"));
        assert!(text.contains("p0@3"));
    }
}
