//! Portfolio scheduler (spec §4.9, §5).
//!
//! Grounded on the capability-set design note (spec §9, `engines/mod.rs`):
//! every engine variant implements [`Checker`], so the scheduler just
//! spawns a thread per configured worker, shares a results queue and a
//! [`PidRegistry`], and takes the first answer.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{after, bounded, select, unbounded};
use tracing::{error, info, info_span, warn};

use crate::engines::bmc::{BmcEngine, ReductionContext};
use crate::engines::concurrent_places::ConcurrentPlacesEngine;
use crate::engines::ic3::Ic3Engine;
use crate::engines::kinduction::KInductionEngine;
use crate::error::PnResult;
use crate::formula::Formula;
use crate::net::{Marking, PetriNet};
use crate::reduction::System;
use crate::smt::process::ProcessSolver;
use crate::smt::registry::PidRegistry;

use super::{CancelToken, Checker, ResultsSender, Verdict, WorkerResult};

/// The engine kinds the portfolio can be configured to race (spec
/// §4.9: "a subset of {BMC, k-Induction, IC3, Random-Walk, CP}").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Bmc,
    KInduction,
    Ic3,
    /// The MiniZinc/walker auxiliary solver. Accepted for configuration
    /// symmetry but never spawned: it is an external collaborator, out
    /// of scope for this crate (spec §1 Non-goals). The scheduler logs
    /// and skips it.
    RandomWalk,
    ConcurrentPlaces,
}

pub struct PortfolioOutcome {
    pub engine: &'static str,
    pub verdict: Verdict,
    pub witness: Option<Marking>,
}

pub struct Portfolio<'a> {
    net: &'a PetriNet,
    formula: &'a Formula,
    reduction: Option<(&'a System, &'a PetriNet)>,
    solver_path: String,
    timeout: Duration,
    engines: Vec<EngineKind>,
}

impl<'a> Portfolio<'a> {
    pub fn new(net: &'a PetriNet, formula: &'a Formula, solver_path: impl Into<String>, timeout: Duration) -> Self {
        Portfolio {
            net,
            formula,
            reduction: None,
            solver_path: solver_path.into(),
            timeout,
            engines: vec![EngineKind::Bmc, EngineKind::KInduction, EngineKind::Ic3],
        }
    }

    pub fn with_reduction(mut self, system: &'a System, initial_net: &'a PetriNet) -> Self {
        self.reduction = Some((system, initial_net));
        self
    }

    pub fn with_engines(mut self, engines: Vec<EngineKind>) -> Self {
        self.engines = engines;
        self
    }

    fn run_one(
        &self,
        kind: EngineKind,
        results: &ResultsSender,
        registry: &PidRegistry,
        cancel: &CancelToken,
        bound_tx: crossbeam_channel::Sender<u32>,
        bound_rx: crossbeam_channel::Receiver<u32>,
    ) -> PnResult<()> {
        let solver = ProcessSolver::spawn(&self.solver_path, registry.clone(), self.timeout)?;
        match kind {
            EngineKind::Bmc => {
                let mut engine = BmcEngine::new(self.net, self.formula, solver).with_bound_channel(bound_rx);
                if let Some((system, initial_net)) = self.reduction {
                    engine = engine.with_reduction(ReductionContext { system, initial_net });
                }
                engine.prove(results, registry, cancel)
            }
            EngineKind::KInduction => {
                let mut engine = KInductionEngine::new(self.net, self.formula, solver).with_bound_channel(bound_tx);
                if let Some((system, initial_net)) = self.reduction {
                    engine = engine.with_reduction(ReductionContext { system, initial_net });
                }
                engine.prove(results, registry, cancel)
            }
            EngineKind::Ic3 => {
                let mut engine = Ic3Engine::new(self.net, self.formula, solver);
                engine.prove(results, registry, cancel)
            }
            EngineKind::ConcurrentPlaces => {
                let mut engine = ConcurrentPlacesEngine::new(self.net, solver);
                if let Some((system, initial_net)) = self.reduction {
                    engine = engine.with_reduction(ReductionContext { system, initial_net });
                }
                engine.prove(results, registry, cancel)
            }
            EngineKind::RandomWalk => unreachable!("filtered out before dispatch"),
        }
    }

    /// Races the configured engines to a verdict. `Ok(None)` means no
    /// worker reached a decision before the wall-clock timeout (spec
    /// §5); `Err` propagates a fatal (non-recoverable) engine error.
    pub fn run(&self) -> PnResult<Option<PortfolioOutcome>> {
        let span = info_span!("portfolio");
        let _enter = span.enter();

        let (results_tx, results_rx) = unbounded::<WorkerResult>();
        let registry = PidRegistry::new();
        let cancel = CancelToken::new();
        let (bound_tx, bound_rx) = bounded::<u32>(1);

        let first = thread::scope(|scope| {
            for kind in self.engines.iter().copied() {
                if kind == EngineKind::RandomWalk {
                    warn!("random-walk engine is an external collaborator, not spawned (spec §1 Non-goals)");
                    continue;
                }
                let results_tx = results_tx.clone();
                let registry = registry.clone();
                let cancel = cancel.clone();
                let bound_tx = bound_tx.clone();
                let bound_rx = bound_rx.clone();
                scope.spawn(move || {
                    if let Err(e) = self.run_one(kind, &results_tx, &registry, &cancel, bound_tx, bound_rx) {
                        if !e.is_recoverable() {
                            error!(?kind, error = %e, "portfolio worker failed");
                        }
                    }
                });
            }
            drop(results_tx);
            drop(bound_tx);
            drop(bound_rx);

            let timeout_chan = after(self.timeout);
            let first = select! {
                recv(results_rx) -> msg => msg.ok(),
                recv(timeout_chan) -> _ => {
                    info!(timeout = ?self.timeout, "portfolio: wall-clock timeout expired");
                    None
                }
            };

            // Stop every worker's solver before the scope's implicit join
            // waits for the spawned threads to finish (spec §5: losing
            // workers are terminated by signalling their solver process).
            cancel.cancel();
            registry.kill_all();
            first
        });

        if let Some(result) = &first {
            info!(engine = result.engine, verdict = ?result.verdict, "portfolio: first result wins");
        }

        Ok(first.map(|r| PortfolioOutcome {
            engine: r.engine,
            verdict: r.verdict,
            witness: r.witness,
        }))
    }
}
