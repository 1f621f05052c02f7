//! Concurrent-places analyzer (spec §4.8).
//!
//! Grounded on the stepper (`super::stepper`) for the BFS half of the
//! loop and on `BmcEngine`/`KInductionEngine`'s unrolling discipline
//! (bmc.rs, kinduction.rs) for the symbolic half: this engine owns its
//! solver the same way and asserts the transition relation the same
//! way, just against a goal formula it rebuilds every round instead of
//! a fixed one.

use std::collections::BTreeSet;

use tracing::{debug, info, info_span};

use crate::error::{PnError, PnResult};
use crate::formula::ast::CmpOp;
use crate::formula::encode::assert_plain;
use crate::formula::{Expr, Term};
use crate::net::{Marking, PetriNet, PlaceId};
use crate::smt::registry::PidRegistry;
use crate::smt::{CheckSatResult, SolverBackend};

use super::bmc::ReductionContext;
use super::stepper::Stepper;
use super::{CancelToken, Checker, ResultsSender, Verdict, WorkerResult};

/// Bound on how far the symbolic half (step (b) of spec §4.8) unrolls
/// before giving up and declaring the matrix complete. The spec calls
/// for a full k-Induction proof of "no new concurrent pair exists at
/// any depth"; this engine approximates that with a search up to this
/// depth rather than a genuine inductive fixpoint check, recorded as an
/// open decision in DESIGN.md.
const MAX_PROBE_DEPTH: u32 = 16;

fn order_pair(a: PlaceId, b: PlaceId) -> (PlaceId, PlaceId) {
    if a.0 <= b.0 {
        (a, b)
    } else {
        (b, a)
    }
}

/// The lower-triangular {0,1} concurrency matrix (spec §3: diagonal
/// always 1 — a place is trivially concurrent with itself).
#[derive(Debug, Clone, Default)]
pub struct ConcurrentMatrix {
    pub pairs: BTreeSet<(PlaceId, PlaceId)>,
}

impl ConcurrentMatrix {
    pub fn is_concurrent(&self, a: PlaceId, b: PlaceId) -> bool {
        a == b || self.pairs.contains(&order_pair(a, b))
    }

    fn insert_all_pairs(&mut self, positive: &[PlaceId]) {
        for i in 0..positive.len() {
            for j in (i + 1)..positive.len() {
                self.pairs.insert(order_pair(positive[i], positive[j]));
            }
        }
    }

    /// Renders the matrix per spec §6's `--compressed-matrix` (upper
    /// triangle, one line per place listing its concurrent successors)
    /// or `--complete-matrix` (full square of 0/1, diagonal always 1).
    pub fn render(&self, net: &PetriNet, compressed: bool) -> String {
        let places: Vec<PlaceId> = net.places().map(|p| p.id).collect();
        let mut out = String::new();
        if compressed {
            for &a in &places {
                let neighbors: Vec<&str> = places
                    .iter()
                    .filter(|&&b| b.0 > a.0 && self.is_concurrent(a, b))
                    .map(|&b| net.place(b).name.as_str())
                    .collect();
                out.push_str(&format!("{}: {}\n", net.place(a).name, neighbors.join(" ")));
            }
        } else {
            for &a in &places {
                let row: Vec<&str> = places
                    .iter()
                    .map(|&b| if self.is_concurrent(a, b) { "1" } else { "0" })
                    .collect();
                out.push_str(&row.join(" "));
                out.push('\n');
            }
        }
        out
    }
}

pub struct ConcurrentPlacesEngine<'a, S: SolverBackend> {
    net: &'a PetriNet,
    solver: S,
    reduction: Option<ReductionContext<'a>>,
    matrix: ConcurrentMatrix,
    visited: BTreeSet<Marking>,
    /// Whether [`ConcurrentPlacesEngine::setup`] has already declared
    /// order-0 constants and asserted the initial marking into the
    /// live solver session. `probe_uncovered_pair` resets the session
    /// before repeating `setup` on every call after the first, since
    /// the prior probe's unrolling (declarations and transition-relation
    /// assertions up to its own depth) is otherwise left in the context
    /// and a fresh `setup` would re-declare order 0 a second time.
    probed_once: bool,
}

impl<'a, S: SolverBackend> ConcurrentPlacesEngine<'a, S> {
    pub fn new(net: &'a PetriNet, solver: S) -> Self {
        ConcurrentPlacesEngine {
            net,
            solver,
            reduction: None,
            matrix: ConcurrentMatrix::default(),
            visited: BTreeSet::new(),
            probed_once: false,
        }
    }

    pub fn with_reduction(mut self, reduction: ReductionContext<'a>) -> Self {
        self.reduction = Some(reduction);
        self
    }

    fn place_name(&self) -> impl Fn(PlaceId) -> String + '_ {
        move |p| self.net.place_name(p)
    }

    fn positive_places(&self, m: &Marking) -> Vec<PlaceId> {
        self.net.places().filter(|p| m.get(p.id) > 0).map(|p| p.id).collect()
    }

    fn setup(&mut self) -> PnResult<()> {
        self.solver.write(&self.net.smtlib_declare_places(Some(0)))?;
        self.solver.write(&self.net.smtlib_initial_marking(Some(0)))?;
        if let Some(ctx) = &self.reduction {
            self.solver.write(&ctx.initial_net.smtlib_declare_places(Some(0)))?;
            self.solver.write(&ctx.initial_net.smtlib_initial_marking(Some(0)))?;
            self.solver.write(&ctx.system.smtlib_equations_without_reduced(Some(0)))?;
        }
        Ok(())
    }

    fn assert_reduction_at(&mut self, k: u32) -> PnResult<()> {
        if let Some(ctx) = &self.reduction {
            self.solver.write(&ctx.system.smtlib_equations_with_reduced(k, Some(0)))?;
            self.solver.write(&ctx.system.smtlib_link_nets(k, Some(0)))?;
        }
        Ok(())
    }

    /// Blocks every already-discovered marking vector at order `k` so
    /// the symbolic search doesn't rediscover a pair it already knows
    /// about (spec §4.8).
    fn assert_blocked(&mut self, k: u32) -> PnResult<()> {
        for m in self.visited.clone() {
            let disjuncts: Vec<String> = self
                .net
                .places()
                .map(|p| format!("(not (= {}@{} {}))", p.name, k, m.get(p.id)))
                .collect();
            self.solver.write(&format!("(assert (or {}))\n", disjuncts.join(" ")))?;
        }
        Ok(())
    }

    /// Builds "exists a marking with a pair not yet in the matrix",
    /// `false` once the matrix already covers every pair of places.
    fn uncovered_pair_expr(&self) -> Expr {
        let places: Vec<PlaceId> = self.net.places().map(|p| p.id).collect();
        let mut disjuncts = Vec::new();
        for i in 0..places.len() {
            for j in (i + 1)..places.len() {
                let (a, b) = order_pair(places[i], places[j]);
                if !self.matrix.pairs.contains(&(a, b)) {
                    disjuncts.push(Expr::and(vec![
                        Expr::atom(Term::token_count(vec![a]), CmpOp::Ge, Term::IntegerConstant(1)),
                        Expr::atom(Term::token_count(vec![b]), CmpOp::Ge, Term::IntegerConstant(1)),
                    ]));
                }
            }
        }
        if disjuncts.is_empty() {
            Expr::BooleanConstant(false)
        } else {
            Expr::or(disjuncts)
        }
    }

    /// Step (b) of spec §4.8: searches for a marking exhibiting a pair
    /// not yet known to be concurrent. `Ok(None)` means the matrix is
    /// complete (the search exhausted [`MAX_PROBE_DEPTH`] without
    /// finding one).
    fn probe_uncovered_pair(&mut self, cancel: &CancelToken) -> PnResult<Option<Marking>> {
        let target = self.uncovered_pair_expr();
        if matches!(target, Expr::BooleanConstant(false)) {
            return Ok(None);
        }

        if self.probed_once {
            self.solver.reset()?;
        }
        self.probed_once = true;
        self.setup()?;
        self.assert_reduction_at(0)?;
        self.assert_blocked(0)?;

        let mut k: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(PnError::SolverAborted);
            }
            self.solver.push()?;
            self.solver.write(&assert_plain(&target, Some(k), &self.place_name()))?;
            debug!(k, "concurrent-places: probing for an uncovered pair");
            match self.solver.check_sat()? {
                CheckSatResult::Sat => {
                    let marking = self.solver.get_marking(self.net, Some(k))?;
                    self.solver.pop()?;
                    return Ok(Some(marking));
                }
                CheckSatResult::Unsat => {
                    self.solver.pop()?;
                    if k >= MAX_PROBE_DEPTH {
                        return Ok(None);
                    }
                    self.solver.write(&self.net.smtlib_declare_places(Some(k + 1)))?;
                    self.solver.write(&self.net.smtlib_transition_relation(k, false))?;
                    self.assert_reduction_at(k + 1)?;
                    self.assert_blocked(k + 1)?;
                    k += 1;
                }
                CheckSatResult::Timeout | CheckSatResult::Aborted => return Err(PnError::SolverAborted),
            }
        }
    }

    /// Lifts pairs discovered over the reduced net back onto the
    /// initial net (spec §4.8: "using trivial and matrix c-stables
    /// derived from reduction equations"). This engine implements the
    /// trivial case only — pairs whose two places are common to both
    /// nets (the set `smtlib_link_nets` already equates) carry over
    /// directly; places introduced purely by reduction are not lifted,
    /// a simplification recorded in DESIGN.md.
    fn lift_to_initial(&self) -> ConcurrentMatrix {
        let Some(ctx) = &self.reduction else {
            return self.matrix.clone();
        };
        let mut lifted = ConcurrentMatrix::default();
        for &(a, b) in &self.matrix.pairs {
            let (name_a, name_b) = (self.net.place_name(a), self.net.place_name(b));
            if let (Some(ia), Some(ib)) = (ctx.initial_net.place_id(&name_a), ctx.initial_net.place_id(&name_b)) {
                lifted.pairs.insert(order_pair(ia, ib));
            }
        }
        lifted
    }

    /// Drives the full analyzer (spec §4.8) to completion.
    pub fn compute_matrix(&mut self, cancel: &CancelToken) -> PnResult<ConcurrentMatrix> {
        let span = info_span!("concurrent_places");
        let _enter = span.enter();

        self.matrix.insert_all_pairs(&self.positive_places(&self.net.initial_marking.clone()));
        self.visited.insert(self.net.initial_marking.clone());
        let mut frontier = vec![self.net.initial_marking.clone()];
        let stepper = Stepper::new(self.net);

        loop {
            if cancel.is_cancelled() {
                return Err(PnError::SolverAborted);
            }

            let mut discovered = Vec::new();
            for m in frontier.drain(..) {
                for succ in stepper.successors(&m) {
                    if self.visited.insert(succ.clone()) {
                        self.matrix.insert_all_pairs(&self.positive_places(&succ));
                        discovered.push(succ);
                    }
                }
            }
            if !discovered.is_empty() {
                frontier = discovered;
                continue;
            }

            match self.probe_uncovered_pair(cancel)? {
                None => {
                    info!(pairs = self.matrix.pairs.len(), "concurrent-places: matrix complete");
                    return Ok(if self.reduction.is_some() {
                        self.lift_to_initial()
                    } else {
                        self.matrix.clone()
                    });
                }
                Some(marking) => {
                    if !self.visited.insert(marking.clone()) {
                        // Already known: the probe re-found a blocked state, treat as complete.
                        return Ok(if self.reduction.is_some() {
                            self.lift_to_initial()
                        } else {
                            self.matrix.clone()
                        });
                    }
                    self.matrix.insert_all_pairs(&self.positive_places(&marking));
                    frontier = vec![marking];
                }
            }
        }
    }
}

impl<'a, S: SolverBackend> Checker for ConcurrentPlacesEngine<'a, S> {
    /// Runs the analyzer to completion and reports `INV` once the
    /// matrix is computed (spec §4.9 lists CP among the portfolio's
    /// configurable worker kinds alongside the reachability/invariance
    /// engines; the matrix itself is retrieved separately through
    /// [`ConcurrentPlacesEngine::compute_matrix`] for `--concurrent-places`
    /// mode, which does not race a TRUE/FALSE verdict).
    fn prove(&mut self, results: &ResultsSender, _concurrent_pids: &PidRegistry, cancel: &CancelToken) -> PnResult<()> {
        if self.compute_matrix(cancel).is_ok() {
            let _ = results.send(WorkerResult {
                engine: "concurrent_places",
                verdict: Verdict::Inv,
                witness: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::parser_net::parse_net_str;
    use crate::smt::mock::MockSolver;
    use std::path::PathBuf;

    #[test]
    fn s6_disjoint_cycles_are_pairwise_concurrent() {
        let net = parse_net_str(
            &PathBuf::from("t.net"),
            "net n\n\
             pl a1 (1)\npl a2 (0)\ntr ta1 a1 -> a2\ntr ta2 a2 -> a1\n\
             pl b1 (1)\npl b2 (0)\ntr tb1 b1 -> b2\ntr tb2 b2 -> b1\n",
        )
        .unwrap();
        let mut engine = ConcurrentPlacesEngine::new(&net, MockSolver::new());
        let cancel = CancelToken::new();
        let matrix = engine.compute_matrix(&cancel).unwrap();

        let a1 = net.place_id("a1").unwrap();
        let b1 = net.place_id("b1").unwrap();
        assert!(matrix.is_concurrent(a1, b1));
    }

    #[test]
    fn a_single_place_net_has_only_the_trivial_diagonal() {
        let net = parse_net_str(&PathBuf::from("t.net"), "net n\npl p (1)\n").unwrap();
        let mut engine = ConcurrentPlacesEngine::new(&net, MockSolver::new());
        let cancel = CancelToken::new();
        let matrix = engine.compute_matrix(&cancel).unwrap();
        assert!(matrix.pairs.is_empty());
        let p = net.place_id("p").unwrap();
        assert!(matrix.is_concurrent(p, p));
    }
}
