//! Verification engines: BMC, k-Induction, IC3/PDR, the stepper, the
//! concurrent-places analyzer, and the portfolio scheduler (spec
//! §4.5-§4.9, §5, §9).
//!
//! Grounded on the capability-set design note (spec §9): "Multiple
//! inheritance over `AbstractChecker` maps to a single capability set
//! `{ prove(results, concurrent_pids, cancel_token) }` implemented by
//! each engine variant; the portfolio holds a list of these variants."

pub mod bmc;
pub mod concurrent_places;
pub mod ic3;
pub mod kinduction;
pub mod portfolio;
pub mod stepper;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::error::PnResult;
use crate::net::Marking;
use crate::smt::registry::PidRegistry;

/// The answer to a reachability/invariance query (spec §7): `CEX` means
/// the feared predicate R is reachable (with a witness marking);
/// `INV` means it never is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Cex,
    Inv,
}

/// Posted by a worker onto the portfolio's results queue (spec §4.9:
/// "a 'results' queue receiving `(Verdict, Model?)`").
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub engine: &'static str,
    pub verdict: Verdict,
    pub witness: Option<Marking>,
}

pub type ResultsSender = Sender<WorkerResult>;

/// A first-class cancellation token observed by every worker and its
/// solver driver (spec §9: "Global cancellation flags become a
/// first-class cancellation token passed to every worker ... there is
/// no process-global mutable state").
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The single capability every engine variant implements (spec §9).
/// `prove` posts at most one [`WorkerResult`] to `results` before
/// returning; a fatal [`crate::error::PnError`] propagates to the
/// portfolio, while a recoverable one (`SolverAborted`/`Timeout`) is
/// swallowed internally — the worker just stops (spec §5, §7).
pub trait Checker {
    fn prove(&mut self, results: &ResultsSender, concurrent_pids: &PidRegistry, cancel: &CancelToken) -> PnResult<()>;
}

/// Helper every engine's `prove` loop calls at its cancellation-check
/// points (spec §4.5 step 5, §4.6 step 5): swallows a recoverable error
/// into a plain "stop, no result" outcome, propagates anything else.
pub(crate) fn recoverable_or_propagate<T>(result: PnResult<T>) -> PnResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_recoverable() => Ok(None),
        Err(e) => Err(e),
    }
}
