//! Typed expression AST (spec §3, §4.3).
//!
//! Grounded on `ptio/formula.py`'s class hierarchy (original_source,
//! lines ~962-2615): `StateFormula`, `Atom`, `BooleanConstant`,
//! `TokenCount`, `IntegerConstant`, `ArithmeticOperation`,
//! `FreeVariable`, `UniversalQuantification`. Rust has no use for the
//! Python ABC dance (`SimpleExpression`/`Expression`); the variant enum
//! below plays the role spec §9 assigns it: "a tagged variant type
//! (closed set of node kinds) rather than a virtual-dispatch hierarchy".

use std::collections::BTreeMap;

use crate::net::{Marking, PlaceId};

/// Boolean connective for a [`Expr::State`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    Not,
    And,
    Or,
}

impl BoolOp {
    pub fn negated(self) -> BoolOp {
        match self {
            BoolOp::Not => BoolOp::Not,
            BoolOp::And => BoolOp::Or,
            BoolOp::Or => BoolOp::And,
        }
    }
}

/// Comparison operator for an [`Expr::Atom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// `NEGATION_COMPARISON_OPERATORS` (formula.py module constants).
    pub fn negated(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    /// `COMMUTATION_COMPARISON_OPERATORS`: flips `a op b` to `b op' a`.
    pub fn commuted(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    pub fn smtlib_symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "distinct",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Mul,
}

/// A delta vector: per-place signed offset, applied during generalization
/// (spec §4.3: "Generalization of a TokenCount by a delta vector d
/// replaces Σp by Σp + Σd(p)").
pub type Delta = BTreeMap<PlaceId, i64>;

/// Symbolic deltas collected during saturated generalization (spec §4.3),
/// kept separate from the numeric delta sum until emission.
pub type SaturatedDelta = BTreeMap<PlaceId, Vec<Expr>>;

/// A term: the non-boolean half of the algebra (`SimpleExpression` in
/// formula.py).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// `Σ places`, plus an accumulated integer delta and a list of
    /// symbolic deltas not yet folded into a number (spec §3).
    TokenCount {
        places: Vec<PlaceId>,
        delta: i64,
        saturated_delta: Vec<Expr>,
    },
    IntegerConstant(i64),
    Arithmetic {
        operands: Vec<Term>,
        op: ArithOp,
    },
    FreeVariable {
        id: String,
        index: u32,
    },
}

impl Term {
    pub fn token_count(places: Vec<PlaceId>) -> Term {
        Term::TokenCount {
            places,
            delta: 0,
            saturated_delta: Vec::new(),
        }
    }

    /// Replaces `p` by `p + delta(p)` (and/or appends `saturated_delta`
    /// terms) wherever this term is a `TokenCount` (spec §4.3). Other
    /// term kinds are unaffected (matching `IntegerConstant.generalize`
    /// / `FreeVariable.generalize`, which return `self`).
    pub fn generalize(&self, delta: Option<&Delta>, saturated: Option<&SaturatedDelta>) -> Term {
        match self {
            Term::TokenCount {
                places,
                delta: d,
                saturated_delta,
            } => {
                let mut new_delta = *d;
                let mut new_saturated = saturated_delta.clone();
                if let Some(delta) = delta {
                    for p in places {
                        new_delta += delta.get(p).copied().unwrap_or(0);
                    }
                }
                if let Some(saturated) = saturated {
                    for p in places {
                        if let Some(terms) = saturated.get(p) {
                            new_saturated.extend(terms.iter().cloned());
                        }
                    }
                }
                Term::TokenCount {
                    places: places.clone(),
                    delta: new_delta,
                    saturated_delta: new_saturated,
                }
            }
            other => other.clone(),
        }
    }

    pub fn eval(&self, m: &Marking) -> i64 {
        match self {
            Term::TokenCount { places, delta, .. } => {
                places.iter().map(|&p| m.get(p) as i64).sum::<i64>() + delta
            }
            Term::IntegerConstant(v) => *v,
            Term::Arithmetic { operands, op } => {
                let vals = operands.iter().map(|t| t.eval(m));
                match op {
                    ArithOp::Add => vals.sum(),
                    ArithOp::Mul => vals.product(),
                }
            }
            Term::FreeVariable { .. } => 0,
        }
    }

    pub fn is_token_count(&self) -> bool {
        matches!(self, Term::TokenCount { .. })
    }

    pub fn is_integer_constant(&self) -> bool {
        matches!(self, Term::IntegerConstant(_))
    }

    /// SMT-LIB rendering at unrolling order `k` (unindexed if `None`).
    pub fn smtlib(&self, k: Option<u32>, place_name: &impl Fn(PlaceId) -> String) -> String {
        match self {
            Term::TokenCount {
                places,
                delta,
                saturated_delta,
            } => {
                let mut terms: Vec<String> = places
                    .iter()
                    .map(|&p| match k {
                        Some(k) => format!("{}@{}", place_name(p), k),
                        None => place_name(p),
                    })
                    .collect();
                if *delta != 0 {
                    terms.push(delta.to_string());
                }
                for extra in saturated_delta {
                    terms.push(extra.smtlib(k, place_name));
                }
                match terms.len() {
                    0 => "0".to_string(),
                    1 => terms.remove(0),
                    _ => format!("(+ {})", terms.join(" ")),
                }
            }
            Term::IntegerConstant(v) => v.to_string(),
            Term::Arithmetic { operands, op } => {
                let sym = match op {
                    ArithOp::Add => "+",
                    ArithOp::Mul => "*",
                };
                let rendered: Vec<String> =
                    operands.iter().map(|t| t.smtlib(k, place_name)).collect();
                format!("({sym} {})", rendered.join(" "))
            }
            Term::FreeVariable { id, index } => format!("{id}{index}"),
        }
    }
}

/// The boolean half of the algebra (spec §3's Expression AST).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    BooleanConstant(bool),
    State {
        op: BoolOp,
        operands: Vec<Expr>,
    },
    Atom {
        left: Term,
        right: Term,
        op: CmpOp,
        /// Set only once an atom has passed through [`crate::formula::dnf`]
        /// (spec §4.3: "monotonicity flags are only valid on atoms in
        /// DNF with TokenCount left and IntegerConstant right").
        monotonic: bool,
        anti_monotonic: bool,
    },
    UniversalQuantification {
        variables: Vec<(String, u32)>,
        body: Box<Expr>,
    },
}

impl Expr {
    pub fn atom(left: Term, op: CmpOp, right: Term) -> Expr {
        Expr::Atom {
            left,
            right,
            op,
            monotonic: false,
            anti_monotonic: false,
        }
    }

    pub fn and(operands: Vec<Expr>) -> Expr {
        Expr::State {
            op: BoolOp::And,
            operands,
        }
    }

    pub fn or(operands: Vec<Expr>) -> Expr {
        Expr::State {
            op: BoolOp::Or,
            operands,
        }
    }

    pub fn not(inner: Expr) -> Expr {
        Expr::State {
            op: BoolOp::Not,
            operands: vec![inner],
        }
    }

    pub fn eval(&self, m: &Marking) -> bool {
        match self {
            Expr::BooleanConstant(b) => *b,
            Expr::State { op, operands } => match op {
                BoolOp::Not => !operands[0].eval(m),
                BoolOp::And => operands.iter().all(|o| o.eval(m)),
                BoolOp::Or => operands.iter().any(|o| o.eval(m)),
            },
            Expr::Atom { left, right, op, .. } => op.eval(left.eval(m), right.eval(m)),
            Expr::UniversalQuantification { .. } => false,
        }
    }

    /// Replaces every `TokenCount` leaf per `delta`/`saturated_delta`
    /// (spec §4.3), preserving structure and monotonicity flags.
    pub fn generalize(&self, delta: Option<&Delta>, saturated: Option<&SaturatedDelta>) -> Expr {
        match self {
            Expr::BooleanConstant(b) => Expr::BooleanConstant(*b),
            Expr::State { op, operands } => Expr::State {
                op: *op,
                operands: operands
                    .iter()
                    .map(|o| o.generalize(delta, saturated))
                    .collect(),
            },
            Expr::Atom {
                left,
                right,
                op,
                monotonic,
                anti_monotonic,
            } => Expr::Atom {
                left: left.generalize(delta, saturated),
                right: right.generalize(delta, saturated),
                op: *op,
                monotonic: *monotonic,
                anti_monotonic: *anti_monotonic,
            },
            Expr::UniversalQuantification { variables, body } => Expr::UniversalQuantification {
                variables: variables.clone(),
                body: Box::new(body.generalize(delta, saturated)),
            },
        }
    }

    /// `negation()` per formula.py: for a `StateFormula`, negate every
    /// operand and flip the connective; for an `Atom`, flip the
    /// comparison operator (keeping the operands, generalized, as-is).
    pub fn negation(&self) -> Expr {
        match self {
            Expr::BooleanConstant(b) => Expr::BooleanConstant(!b),
            Expr::State { op, operands } => Expr::State {
                op: op.negated(),
                operands: operands.iter().map(Expr::negation).collect(),
            },
            Expr::Atom { left, right, op, .. } => Expr::atom(left.clone(), op.negated(), right.clone()),
            Expr::UniversalQuantification { variables, body } => Expr::UniversalQuantification {
                variables: variables.clone(),
                body: Box::new(body.negation()),
            },
        }
    }

    pub fn smtlib(&self, k: Option<u32>, place_name: &impl Fn(PlaceId) -> String) -> String {
        match self {
            Expr::BooleanConstant(b) => if *b { "true" } else { "false" }.to_string(),
            Expr::State { op, operands } => {
                let rendered: Vec<String> = operands.iter().map(|o| o.smtlib(k, place_name)).collect();
                match op {
                    BoolOp::Not => format!("(not {})", rendered[0]),
                    BoolOp::And => format!("(and {})", rendered.join(" ")),
                    BoolOp::Or => format!("(or {})", rendered.join(" ")),
                }
            }
            Expr::Atom { left, right, op, .. } => format!(
                "({} {} {})",
                op.smtlib_symbol(),
                left.smtlib(k, place_name),
                right.smtlib(k, place_name)
            ),
            Expr::UniversalQuantification { variables, body } => {
                let decls: Vec<String> = variables
                    .iter()
                    .map(|(id, idx)| format!("({id}{idx} Int)"))
                    .collect();
                format!("(forall ({}) {})", decls.join(" "), body.smtlib(k, place_name))
            }
        }
    }
}
