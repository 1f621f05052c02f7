//! Bounded Model Checking engine (spec §4.5).
//!
//! Grounded on `bmc.py`'s unrolling loop (original_source): incremental
//! assertions, single-level push/pop of the feared-events predicate, and
//! a non-blocking read of the k-Induction worker's announced bound.

use crossbeam_channel::Receiver;
use tracing::{debug, info, info_span};

use crate::error::PnResult;
use crate::formula::Formula;
use crate::net::PetriNet;
use crate::reduction::System;
use crate::smt::registry::PidRegistry;
use crate::smt::{CheckSatResult, SolverBackend};

use super::{Checker, ResultsSender, Verdict, WorkerResult};

/// When a reduction certificate is present, the initial net's
/// declarations and the equations with no reduced-net variable are
/// asserted once, at this fixed index, at startup (spec §4.4: "only the
/// reduced-net unrolling grows over iterations" — the initial net's
/// marking is referenced once, not itself unrolled).
const K_INITIAL: u32 = 0;

/// Couples a reduction certificate to the net actually being unrolled
/// (the reduced net).
pub struct ReductionContext<'a> {
    pub system: &'a System,
    pub initial_net: &'a PetriNet,
}

pub struct BmcEngine<'a, S: SolverBackend> {
    net: &'a PetriNet,
    formula: &'a Formula,
    solver: S,
    reduction: Option<ReductionContext<'a>>,
    bound_rx: Option<Receiver<u32>>,
}

impl<'a, S: SolverBackend> BmcEngine<'a, S> {
    pub fn new(net: &'a PetriNet, formula: &'a Formula, solver: S) -> Self {
        BmcEngine {
            net,
            formula,
            solver,
            reduction: None,
            bound_rx: None,
        }
    }

    pub fn with_reduction(mut self, reduction: ReductionContext<'a>) -> Self {
        self.reduction = Some(reduction);
        self
    }

    /// Subscribes to the k-Induction worker's write-once bound channel
    /// (spec §4.5 step 4, §5 rendezvous point 1).
    pub fn with_bound_channel(mut self, bound_rx: Receiver<u32>) -> Self {
        self.bound_rx = Some(bound_rx);
        self
    }

    fn place_name(&self) -> impl Fn(crate::net::PlaceId) -> String + '_ {
        move |p| self.net.place_name(p)
    }

    fn setup(&mut self) -> PnResult<()> {
        self.solver.write(&self.net.smtlib_declare_places(Some(0)))?;
        self.solver.write(&self.net.smtlib_initial_marking(Some(0)))?;
        if let Some(ctx) = &self.reduction {
            self.solver
                .write(&ctx.initial_net.smtlib_declare_places(Some(K_INITIAL)))?;
            self.solver
                .write(&ctx.initial_net.smtlib_initial_marking(Some(K_INITIAL)))?;
            self.solver
                .write(&ctx.system.smtlib_equations_without_reduced(Some(K_INITIAL)))?;
        }
        Ok(())
    }

    fn assert_reduction_at(&mut self, k: u32) -> PnResult<()> {
        if let Some(ctx) = &self.reduction {
            self.solver
                .write(&ctx.system.smtlib_equations_with_reduced(k, Some(K_INITIAL)))?;
            self.solver.write(&ctx.system.smtlib_link_nets(k, Some(K_INITIAL)))?;
        }
        Ok(())
    }

    /// Drives the unrolling loop (spec §4.5). Returns `Ok(Some(verdict))`
    /// when a verdict is reached, `Ok(None)` on cancellation/recoverable
    /// solver failure (the worker should exit silently), and `Err` on a
    /// fatal error.
    pub fn run(&mut self, cancel: &super::CancelToken) -> PnResult<Option<(Verdict, Option<crate::net::Marking>)>> {
        let span = info_span!("bmc");
        let _enter = span.enter();

        self.setup()?;
        self.assert_reduction_at(0)?;

        let mut k: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(rx) = &self.bound_rx {
                if let Ok(bound) = rx.try_recv() {
                    if k >= bound {
                        info!(k, bound, "BMC: k-induction bound reached, reporting INV");
                        return Ok(Some((Verdict::Inv, None)));
                    }
                }
            }

            self.solver.push()?;
            self.solver.write(&format!(
                "(assert {})\n",
                self.formula.r.smtlib(Some(k), &self.place_name())
            ))?;
            debug!(k, "BMC: checking R at current unroll depth");
            match self.solver.check_sat()? {
                CheckSatResult::Sat => {
                    let marking = self.solver.get_marking(self.net, Some(k))?;
                    info!(k, "BMC: found a counterexample");
                    return Ok(Some((Verdict::Cex, Some(marking))));
                }
                CheckSatResult::Unsat => {
                    self.solver.pop()?;
                    self.solver.write(&self.net.smtlib_declare_places(Some(k + 1)))?;
                    self.solver.write(&self.net.smtlib_transition_relation(k, false))?;
                    self.assert_reduction_at(k + 1)?;
                    k += 1;
                }
                CheckSatResult::Timeout | CheckSatResult::Aborted => return Ok(None),
            }
        }
    }
}

impl<'a, S: SolverBackend> Checker for BmcEngine<'a, S> {
    fn prove(&mut self, results: &ResultsSender, _concurrent_pids: &PidRegistry, cancel: &super::CancelToken) -> PnResult<()> {
        if let Some((verdict, witness)) = self.run(cancel)? {
            let _ = results.send(WorkerResult {
                engine: "bmc",
                verdict,
                witness,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{generate_reachability, PropertyKind};
    use crate::net::parser_net::parse_net_str;
    use crate::smt::mock::MockSolver;
    use std::path::PathBuf;

    fn formula_for(r: crate::formula::Expr) -> Formula {
        let p = crate::formula::Expr::not(r.clone());
        Formula {
            r,
            p,
            property_def: PropertyKind::Finally,
            non_monotonic: false,
        }
    }

    #[test]
    fn s2_single_place_reachability_finds_cex() {
        let net = parse_net_str(&PathBuf::from("t.net"), "net n\npl p (0)\ntr t -> p\n").unwrap();
        let p = net.place_id("p").unwrap();
        let formula = formula_for(generate_reachability(&[(p, 1)]));
        let mut bmc = BmcEngine::new(&net, &formula, MockSolver::new());
        let cancel = super::super::CancelToken::new();
        let (verdict, witness) = bmc.run(&cancel).unwrap().expect("a verdict");
        assert_eq!(verdict, Verdict::Cex);
        assert!(witness.unwrap().get(p) >= 1);
    }

    #[test]
    fn s3_inhibited_place_never_reached_reports_unsat_each_round() {
        // Not a full INV proof (that needs k-induction's bound), but at
        // k=0 the feared set is not yet reachable.
        let net = parse_net_str(
            &PathBuf::from("t.net"),
            "net n\npl p (1)\npl q (0)\ntr t p?-1 -> q\n",
        )
        .unwrap();
        let q = net.place_id("q").unwrap();
        let formula = formula_for(generate_reachability(&[(q, 1)]));
        let mut solver = MockSolver::new();
        solver
            .write(&net.smtlib_declare_places(Some(0)))
            .unwrap();
        solver
            .write(&net.smtlib_initial_marking(Some(0)))
            .unwrap();
        solver.push().unwrap();
        solver
            .write(&format!(
                "(assert {})\n",
                formula.r.smtlib(Some(0), &|p| net.place_name(p))
            ))
            .unwrap();
        assert_eq!(solver.check_sat().unwrap(), CheckSatResult::Unsat);
    }
}
