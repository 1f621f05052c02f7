//! Test-only `SolverBackend`: an in-memory structural interpreter of the
//! asserted SMT-LIB text, sufficient to answer the spec §8 scenarios
//! deterministically without spawning a real z3 (spec SPEC_FULL §F).
//!
//! It parses the tiny fragment of SMT-LIB this crate ever emits
//! (`declare-const`, `assert`, `push`, `pop`, the `(! φ :named l)`
//! unsat-core wrapper) into s-expressions, then answers `check_sat` by
//! bounded backtracking search over the declared integer variables, and
//! `get_unsat_core` by deletion-based minimization: drop one named
//! assertion at a time and keep it in the core iff the rest stays sat.

use std::collections::BTreeMap;

use crate::error::{PnError, PnResult};
use crate::net::{Marking, PetriNet};

use super::{CheckSatResult, SolverBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sexpr {
    Atom(String),
    List(Vec<Sexpr>),
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    for line in text.lines() {
        let line = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        };
        for ch in line.chars() {
            match ch {
                '(' | ')' => {
                    if !cur.is_empty() {
                        tokens.push(std::mem::take(&mut cur));
                    }
                    tokens.push(ch.to_string());
                }
                c if c.is_whitespace() => {
                    if !cur.is_empty() {
                        tokens.push(std::mem::take(&mut cur));
                    }
                }
                c => cur.push(c),
            }
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

fn parse_one(tokens: &[String], pos: &mut usize) -> Option<Sexpr> {
    if *pos >= tokens.len() {
        return None;
    }
    if tokens[*pos] == "(" {
        *pos += 1;
        let mut items = Vec::new();
        while *pos < tokens.len() && tokens[*pos] != ")" {
            items.push(parse_one(tokens, pos)?);
        }
        *pos += 1; // consume ")"
        Some(Sexpr::List(items))
    } else {
        let atom = tokens[*pos].clone();
        *pos += 1;
        Some(Sexpr::Atom(atom))
    }
}

fn parse_toplevel(text: &str) -> Vec<Sexpr> {
    let tokens = tokenize(text);
    let mut pos = 0;
    let mut forms = Vec::new();
    while let Some(form) = parse_one(&tokens, &mut pos) {
        forms.push(form);
    }
    forms
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Int(i64),
    Bool(bool),
}

impl Value {
    fn as_int(self) -> i64 {
        match self {
            Value::Int(v) => v,
            Value::Bool(b) => b as i64,
        }
    }

    fn as_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Int(v) => v != 0,
        }
    }
}

fn eval(e: &Sexpr, env: &BTreeMap<String, i64>) -> Value {
    match e {
        Sexpr::Atom(a) => {
            if let Ok(v) = a.parse::<i64>() {
                Value::Int(v)
            } else if a == "true" {
                Value::Bool(true)
            } else if a == "false" {
                Value::Bool(false)
            } else {
                Value::Int(env.get(a).copied().unwrap_or(0))
            }
        }
        Sexpr::List(items) => {
            let Sexpr::Atom(op) = &items[0] else {
                panic!("mock solver: expected operator atom");
            };
            match op.as_str() {
                "!" => eval(&items[1], env),
                "not" => Value::Bool(!eval(&items[1], env).as_bool()),
                "and" => Value::Bool(items[1..].iter().all(|i| eval(i, env).as_bool())),
                "or" => Value::Bool(items[1..].iter().any(|i| eval(i, env).as_bool())),
                "=" => Value::Bool(items[1..].windows(2).all(|w| eval(&w[0], env).as_int() == eval(&w[1], env).as_int())),
                "distinct" => {
                    let vals: Vec<i64> = items[1..].iter().map(|i| eval(i, env).as_int()).collect();
                    let mut sorted = vals.clone();
                    sorted.sort_unstable();
                    sorted.dedup();
                    Value::Bool(sorted.len() == vals.len())
                }
                ">=" => Value::Bool(eval(&items[1], env).as_int() >= eval(&items[2], env).as_int()),
                "<=" => Value::Bool(eval(&items[1], env).as_int() <= eval(&items[2], env).as_int()),
                ">" => Value::Bool(eval(&items[1], env).as_int() > eval(&items[2], env).as_int()),
                "<" => Value::Bool(eval(&items[1], env).as_int() < eval(&items[2], env).as_int()),
                "+" => Value::Int(items[1..].iter().map(|i| eval(i, env).as_int()).sum()),
                "*" => Value::Int(items[1..].iter().map(|i| eval(i, env).as_int()).product()),
                "-" if items.len() == 2 => Value::Int(-eval(&items[1], env).as_int()),
                "-" => {
                    let mut vals = items[1..].iter().map(|i| eval(i, env).as_int());
                    let first = vals.next().unwrap_or(0);
                    Value::Int(vals.fold(first, |acc, v| acc - v))
                }
                other => panic!("mock solver: unsupported operator `{other}`"),
            }
        }
    }
}

fn collect_vars(e: &Sexpr, out: &mut Vec<String>) {
    match e {
        Sexpr::Atom(a) => {
            if a.parse::<i64>().is_err() && a != "true" && a != "false" {
                if !out.contains(a) {
                    out.push(a.clone());
                }
            }
        }
        Sexpr::List(items) => {
            for (i, item) in items.iter().enumerate() {
                if i == 0 {
                    continue; // operator position
                }
                collect_vars(item, out);
            }
        }
    }
}

fn collect_consts(e: &Sexpr, bound: &mut i64) {
    match e {
        Sexpr::Atom(a) => {
            if let Ok(v) = a.parse::<i64>() {
                *bound = (*bound).max(v.unsigned_abs() as i64);
            }
        }
        Sexpr::List(items) => {
            for item in items {
                collect_consts(item, bound);
            }
        }
    }
}

/// One named (or anonymous) assertion live in the current context.
#[derive(Debug, Clone)]
struct Assertion {
    label: Option<String>,
    expr: Sexpr,
}

/// An in-memory stand-in for z3, structural rather than symbolic: good
/// enough to make the six spec §8 scenarios deterministic in tests.
pub struct MockSolver {
    declared: Vec<String>,
    /// One frame per outstanding `push`; frame 0 always exists.
    frames: Vec<Vec<Assertion>>,
    last_model: BTreeMap<String, i64>,
    aborted: bool,
    search_bound: i64,
}

impl Default for MockSolver {
    fn default() -> Self {
        MockSolver {
            declared: Vec::new(),
            frames: vec![Vec::new()],
            last_model: BTreeMap::new(),
            aborted: false,
            search_bound: 6,
        }
    }
}

impl MockSolver {
    pub fn new() -> Self {
        MockSolver::default()
    }

    fn all_assertions(&self) -> Vec<&Assertion> {
        self.frames.iter().flatten().collect()
    }

    fn solve(&self, assertions: &[&Assertion]) -> Option<BTreeMap<String, i64>> {
        let mut bound = self.search_bound;
        for a in assertions {
            collect_consts(&a.expr, &mut bound);
        }
        let mut vars = Vec::new();
        for a in assertions {
            collect_vars(&a.expr, &mut vars);
        }
        for v in &self.declared {
            if !vars.contains(v) {
                vars.push(v.clone());
            }
        }
        vars.sort();

        let mut assignment = BTreeMap::new();
        if backtrack(&vars, 0, bound, &mut assignment, assertions) {
            Some(assignment)
        } else {
            None
        }
    }
}

fn backtrack(
    vars: &[String],
    idx: usize,
    bound: i64,
    assignment: &mut BTreeMap<String, i64>,
    assertions: &[&Assertion],
) -> bool {
    if idx == vars.len() {
        return assertions.iter().all(|a| eval(&a.expr, assignment).as_bool());
    }
    for value in 0..=bound {
        assignment.insert(vars[idx].clone(), value);
        // Prune as early as possible on assertions whose variables are
        // already fully bound.
        let feasible = assertions.iter().all(|a| {
            let mut seen = Vec::new();
            collect_vars(&a.expr, &mut seen);
            if seen.iter().all(|v| assignment.contains_key(v)) {
                eval(&a.expr, assignment).as_bool()
            } else {
                true
            }
        });
        if feasible && backtrack(vars, idx + 1, bound, assignment, assertions) {
            return true;
        }
    }
    assignment.remove(&vars[idx]);
    false
}

impl SolverBackend for MockSolver {
    fn push(&mut self) -> PnResult<()> {
        self.frames.push(Vec::new());
        Ok(())
    }

    fn pop(&mut self) -> PnResult<()> {
        if self.frames.len() <= 1 {
            return Err(PnError::Solver("pop with no matching push".to_string()));
        }
        self.frames.pop();
        Ok(())
    }

    fn reset(&mut self) -> PnResult<()> {
        self.declared.clear();
        self.frames = vec![Vec::new()];
        self.last_model.clear();
        Ok(())
    }

    fn write(&mut self, text: &str) -> PnResult<()> {
        for form in parse_toplevel(text) {
            let Sexpr::List(items) = &form else { continue };
            let Some(Sexpr::Atom(head)) = items.first() else { continue };
            match head.as_str() {
                "declare-const" => {
                    if let Some(Sexpr::Atom(name)) = items.get(1) {
                        if !self.declared.contains(name) {
                            self.declared.push(name.clone());
                        }
                    }
                }
                "assert" => {
                    let body = items.get(1).cloned().unwrap_or(Sexpr::Atom("true".to_string()));
                    let (label, expr) = match &body {
                        Sexpr::List(inner)
                            if matches!(inner.first(), Some(Sexpr::Atom(op)) if op == "!") =>
                        {
                            let label = inner
                                .iter()
                                .position(|s| matches!(s, Sexpr::Atom(a) if a == ":named"))
                                .and_then(|i| inner.get(i + 1))
                                .and_then(|s| match s {
                                    Sexpr::Atom(a) => Some(a.clone()),
                                    _ => None,
                                });
                            (label, inner[1].clone())
                        }
                        _ => (None, body),
                    };
                    self.frames
                        .last_mut()
                        .expect("at least one frame")
                        .push(Assertion { label, expr });
                }
                "push" => self.push()?,
                "pop" => self.pop()?,
                _ => {}
            }
        }
        Ok(())
    }

    fn check_sat(&mut self) -> PnResult<CheckSatResult> {
        if self.aborted {
            return Ok(CheckSatResult::Aborted);
        }
        let assertions = self.all_assertions();
        match self.solve(&assertions) {
            Some(model) => {
                self.last_model = model;
                Ok(CheckSatResult::Sat)
            }
            None => {
                self.last_model.clear();
                Ok(CheckSatResult::Unsat)
            }
        }
    }

    fn get_marking(&mut self, net: &PetriNet, order: Option<u32>) -> PnResult<Marking> {
        let mut marking = Marking::new();
        for p in net.places() {
            let key = match order {
                Some(k) => format!("{}@{}", p.name, k),
                None => p.name.clone(),
            };
            if let Some(&v) = self.last_model.get(&key) {
                marking.set(p.id, v.max(0) as u64);
            }
        }
        Ok(marking)
    }

    fn get_unsat_core(&mut self) -> PnResult<Vec<String>> {
        let named: Vec<Assertion> = self
            .all_assertions()
            .into_iter()
            .filter(|a| a.label.is_some())
            .cloned()
            .collect();
        let unnamed: Vec<Assertion> = self
            .all_assertions()
            .into_iter()
            .filter(|a| a.label.is_none())
            .cloned()
            .collect();

        let mut core = Vec::new();
        for (i, candidate) in named.iter().enumerate() {
            let rest: Vec<&Assertion> = named
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, a)| a)
                .chain(unnamed.iter())
                .collect();
            // `candidate` is in the core iff dropping it alone makes the
            // remaining set satisfiable again (deletion-based
            // minimization).
            if self.solve(&rest).is_some() {
                core.push(candidate.label.clone().unwrap());
            }
        }
        if core.is_empty() {
            core = named.iter().filter_map(|a| a.label.clone()).collect();
        }
        Ok(core)
    }

    fn kill(&mut self) {
        self.aborted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfies_a_simple_conjunction() {
        let mut s = MockSolver::new();
        s.write("(declare-const x Int)\n(assert (>= x 0))\n(assert (= x 3))\n").unwrap();
        assert_eq!(s.check_sat().unwrap(), CheckSatResult::Sat);
    }

    #[test]
    fn detects_unsat() {
        let mut s = MockSolver::new();
        s.write("(declare-const x Int)\n(assert (>= x 0))\n(assert (< x 0))\n").unwrap();
        assert_eq!(s.check_sat().unwrap(), CheckSatResult::Unsat);
    }

    #[test]
    fn push_pop_restores_satisfiability() {
        let mut s = MockSolver::new();
        s.write("(declare-const x Int)\n(assert (= x 1))\n").unwrap();
        assert_eq!(s.check_sat().unwrap(), CheckSatResult::Sat);
        s.push().unwrap();
        s.write("(assert (= x 2))\n").unwrap();
        assert_eq!(s.check_sat().unwrap(), CheckSatResult::Unsat);
        s.pop().unwrap();
        assert_eq!(s.check_sat().unwrap(), CheckSatResult::Sat);
    }

    #[test]
    fn unsat_core_names_the_conflicting_labels() {
        let mut s = MockSolver::new();
        s.write("(declare-const x Int)\n").unwrap();
        s.write("(assert (! (>= x 5) :named lit@c0))\n").unwrap();
        s.write("(assert (! (< x 5) :named lit@c1))\n").unwrap();
        assert_eq!(s.check_sat().unwrap(), CheckSatResult::Unsat);
        let core = s.get_unsat_core().unwrap();
        assert_eq!(core.len(), 2);
    }

    #[test]
    fn kill_is_observed_as_aborted() {
        let mut s = MockSolver::new();
        s.kill();
        assert_eq!(s.check_sat().unwrap(), CheckSatResult::Aborted);
    }
}
