//! DNF conversion, monotonicity tagging, and cube extraction (spec §4.3).
//!
//! Grounded on `StateFormula.dnf`/`Atom.dnf` (original_source,
//! `ptio/formula.py` lines ~1211-1276 and ~1588-1618).

use super::ast::{BoolOp, CmpOp, Expr};
use crate::net::Marking;

impl Expr {
    /// Converts to Disjunctive Normal Form. Entry point mirrors
    /// `dnf(negation_propagation=False)`.
    pub fn dnf(&self) -> Expr {
        self.dnf_inner(false)
    }

    fn dnf_inner(&self, negate: bool) -> Expr {
        match self {
            Expr::BooleanConstant(b) => Expr::BooleanConstant(if negate { !b } else { *b }),

            Expr::State { op: BoolOp::Not, operands } => {
                // DNF(not P) with negate=false recurses into P with negate=true;
                // DNF(not (not P)) with negate=true recurses into P with negate=false.
                operands[0].dnf_inner(!negate)
            }

            Expr::State { op: BoolOp::And, operands } if negate => {
                // DNF(not (P and Q)) <-> DNF((not P) or (not Q))
                let ored = Expr::State {
                    op: BoolOp::Or,
                    operands: operands.iter().map(|o| o.dnf_inner(true)).collect(),
                };
                ored.dnf()
            }
            Expr::State { op: BoolOp::And, operands } => {
                // Cartesian product distribution.
                let per_operand: Vec<Vec<Expr>> = operands
                    .iter()
                    .map(|o| match o.dnf() {
                        Expr::State { op: BoolOp::Or, operands } => operands,
                        other => vec![other],
                    })
                    .collect();
                let clauses = cartesian_and(&per_operand);
                Expr::State {
                    op: BoolOp::Or,
                    operands: clauses,
                }
            }

            Expr::State { op: BoolOp::Or, operands } if negate => {
                // DNF(not (P or Q)) <-> DNF((not P) and (not Q))
                let anded = Expr::State {
                    op: BoolOp::And,
                    operands: operands.iter().map(|o| o.dnf_inner(true)).collect(),
                };
                anded.dnf()
            }
            Expr::State { op: BoolOp::Or, operands } => {
                let mut flat = Vec::new();
                for o in operands {
                    match o.dnf() {
                        Expr::State { op: BoolOp::Or, operands } => flat.extend(operands),
                        other => flat.push(other),
                    }
                }
                Expr::State {
                    op: BoolOp::Or,
                    operands: flat,
                }
            }

            Expr::Atom { left, right, op, .. } => {
                let op = if negate { op.negated() } else { *op };
                if left.is_integer_constant() && right.is_token_count() {
                    // Normalize TokenCount to the left.
                    Expr::atom(right.clone(), op.commuted(), left.clone()).dnf()
                } else {
                    let monotonic =
                        matches!(op, CmpOp::Gt | CmpOp::Ge) && left.is_token_count() && right.is_integer_constant();
                    let anti_monotonic =
                        matches!(op, CmpOp::Lt | CmpOp::Le) && left.is_token_count() && right.is_integer_constant();
                    Expr::Atom {
                        left: left.clone(),
                        right: right.clone(),
                        op,
                        monotonic,
                        anti_monotonic,
                    }
                }
            }

            Expr::UniversalQuantification { variables, body } => Expr::UniversalQuantification {
                variables: variables.clone(),
                body: Box::new(body.dnf_inner(negate)),
            },
        }
    }

    /// Returns a cube of this (already-DNF) formula satisfied at `m`.
    /// Panics if none is satisfied — the caller must only invoke this
    /// on a DNF formula known to be true at `m` (spec §4.3 precondition).
    pub fn reached_cube(&self, m: &Marking) -> &Expr {
        match self {
            Expr::State { op: BoolOp::Or, operands } => operands
                .iter()
                .find(|cube| cube.eval(m))
                .expect("reached_cube: no satisfiable cube"),
            other => other,
        }
    }

    /// Returns the list of cubes of this (already-DNF) formula.
    pub fn get_cubes(&self) -> Vec<&Expr> {
        match self {
            Expr::State { op: BoolOp::Or, operands } => operands.iter().collect(),
            other => vec![other],
        }
    }
}

/// Cartesian product over each operand's list of disjuncts, flattening
/// any nested `and` encountered along the way (mirrors the
/// `combination_factorized` loop in `StateFormula.dnf`).
fn cartesian_and(per_operand: &[Vec<Expr>]) -> Vec<Expr> {
    let mut acc: Vec<Vec<Expr>> = vec![Vec::new()];
    for operand_disjuncts in per_operand {
        let mut next = Vec::with_capacity(acc.len() * operand_disjuncts.len());
        for prefix in &acc {
            for cube in operand_disjuncts {
                let mut combo = prefix.clone();
                match cube {
                    Expr::State { op: BoolOp::And, operands } => combo.extend(operands.iter().cloned()),
                    other => combo.push(other.clone()),
                }
                next.push(combo);
            }
        }
        acc = next;
    }
    acc.into_iter()
        .map(|conjuncts| Expr::State {
            op: BoolOp::And,
            operands: conjuncts,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::ast::Term;
    use crate::net::PlaceId;

    fn atom(p: usize, op: CmpOp, c: i64) -> Expr {
        Expr::atom(Term::token_count(vec![PlaceId(p)]), op, Term::IntegerConstant(c))
    }

    #[test]
    fn negation_involution_modulo_commutation() {
        let phi = Expr::and(vec![atom(0, CmpOp::Ge, 1), atom(1, CmpOp::Lt, 3)]);
        let back = phi.negation().negation();
        // negation flips and<->or and each comparator twice, landing back
        // on the original operator and operand order (no commutation
        // needed here since no IntegerConstant-left atom appears).
        assert_eq!(phi, back);
    }

    #[test]
    fn dnf_of_and_or_distributes() {
        // (a or b) and c -> (a and c) or (b and c)
        let phi = Expr::and(vec![
            Expr::or(vec![atom(0, CmpOp::Ge, 1), atom(1, CmpOp::Ge, 1)]),
            atom(2, CmpOp::Ge, 1),
        ]);
        let dnf = phi.dnf();
        let cubes = dnf.get_cubes();
        assert_eq!(cubes.len(), 2);
    }

    #[test]
    fn dnf_is_semantically_equivalent() {
        let mut m = Marking::new();
        m.set(PlaceId(0), 1);
        m.set(PlaceId(2), 1);
        let phi = Expr::and(vec![
            Expr::or(vec![atom(0, CmpOp::Ge, 1), atom(1, CmpOp::Ge, 1)]),
            atom(2, CmpOp::Ge, 1),
        ]);
        assert_eq!(phi.eval(&m), phi.dnf().eval(&m));
    }

    #[test]
    fn not_not_collapses() {
        let phi = atom(0, CmpOp::Ge, 1);
        let doubled = Expr::not(Expr::not(phi.clone()));
        assert_eq!(doubled.dnf(), phi.dnf());
    }

    #[test]
    fn monotonic_tag_set_for_ge_token_count_vs_constant() {
        let dnf = atom(0, CmpOp::Ge, 2).dnf();
        match dnf {
            Expr::Atom { monotonic, anti_monotonic, .. } => {
                assert!(monotonic);
                assert!(!anti_monotonic);
            }
            _ => panic!("expected atom"),
        }
    }
}
