//! The spec §8 testable-property scenarios (S1-S6), driven through the
//! public engine/portfolio API against [`MockSolver`] so they run
//! without spawning a real SMT solver.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use pnreach::engines::bmc::{BmcEngine, ReductionContext};
use pnreach::engines::concurrent_places::ConcurrentPlacesEngine;
use pnreach::engines::ic3::Ic3Engine;
use pnreach::engines::portfolio::{EngineKind, Portfolio};
use pnreach::engines::{CancelToken, Checker, Verdict};
use pnreach::formula::{generate_deadlock, generate_reachability, Expr, Formula, PropertyKind};
use pnreach::net::parser_net::parse_net_str;
use pnreach::net::PetriNet;
use pnreach::reduction::{Equation, RelOp, System, Variable};
use pnreach::smt::mock::MockSolver;
use pnreach::smt::registry::PidRegistry;

fn net(src: &str) -> PetriNet {
    parse_net_str(&PathBuf::from("scenario.net"), src).expect("scenario net parses")
}

fn reachability_formula(net: &PetriNet, places: &[(&str, u64)]) -> Formula {
    let marking: Vec<_> = places
        .iter()
        .map(|&(name, count)| (net.place_id(name).expect("place exists"), count))
        .collect();
    let r = generate_reachability(&marking);
    Formula {
        p: Expr::not(r.clone()),
        r,
        property_def: PropertyKind::Finally,
        non_monotonic: false,
    }
}

fn deadlock_formula(net: &PetriNet) -> Formula {
    let r = generate_deadlock(net);
    Formula {
        p: Expr::not(r.clone()),
        r,
        property_def: PropertyKind::Finally,
        non_monotonic: false,
    }
}

/// Drives a single BMC worker to completion, bypassing the portfolio's
/// thread-per-engine scheduling so the scenario gets a deterministic,
/// single-threaded answer.
fn run_bmc(net: &PetriNet, formula: &Formula) -> Option<Verdict> {
    let registry = PidRegistry::new();
    let cancel = CancelToken::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut engine = BmcEngine::new(net, formula, MockSolver::new());
    engine.prove(&tx, &registry, &cancel).expect("bmc worker does not error on a mock solver");
    drop(tx);
    rx.try_recv().ok().map(|r| r.verdict)
}

#[test]
fn s1_sequential_net_never_deadlocks() {
    let n = net("net n\npl p (1)\npl q (0)\ntr t p -> q\n");
    let formula = deadlock_formula(&n);
    assert_eq!(run_bmc(&n, &formula), Some(Verdict::Inv));
}

#[test]
fn s2_single_place_reachability_finds_a_witness() {
    let n = net("net n\npl p (0)\ntr t -> p\n");
    let formula = reachability_formula(&n, &[("p", 1)]);
    assert_eq!(run_bmc(&n, &formula), Some(Verdict::Cex));
}

#[test]
fn s3_inhibitor_starvation_blocks_reachability() {
    let n = net("net n\npl p (1)\npl q (0)\ntr t p?-1 -> q\n");
    let formula = reachability_formula(&n, &[("q", 1)]);
    assert_eq!(run_bmc(&n, &formula), Some(Verdict::Inv));
}

/// Drives a single BMC worker with a reduction certificate attached,
/// the same way [`run_bmc`] drives an unreduced one.
fn run_bmc_with_reduction(net: &PetriNet, formula: &Formula, reduction: ReductionContext<'_>) -> Option<Verdict> {
    let registry = PidRegistry::new();
    let cancel = CancelToken::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut engine = BmcEngine::new(net, formula, MockSolver::new()).with_reduction(reduction);
    engine.prove(&tx, &registry, &cancel).expect("bmc worker does not error on a mock solver");
    drop(tx);
    rx.try_recv().ok().map(|r| r.verdict)
}

/// S4 (reduction agreement, spec §8): the verdict obtained by checking
/// a property directly on the initial net must equal the verdict
/// obtained by checking the corresponding property on a reduced net
/// plus the bridging equations, end to end through [`BmcEngine`].
///
/// `initial` names its place `p`; `reduced` is the net actually
/// unrolled and renames that place `p2` but keeps the shared place `q`
/// and the same transition structure, with a `p = p2` equation
/// standing in for a real reduction tool's bridging certificate.
#[test]
fn s4_reduction_agreement_end_to_end() {
    let initial = net("net n\npl p (1)\npl q (0)\ntr t p -> q\n");
    let reduced = net("net n\npl p2 (1)\npl q (0)\ntr t2 p2 -> q\n");

    let system = System {
        places_initial: BTreeSet::from(["p".to_string(), "q".to_string()]),
        places_reduced: BTreeSet::from(["p2".to_string(), "q".to_string()]),
        additional_vars: Vec::new(),
        equations: vec![Equation {
            left: vec![Variable { id: "p".to_string(), multiplier: None }],
            right: vec![Variable { id: "p2".to_string(), multiplier: None }],
            operator: RelOp::Eq,
            contains_reduced: true,
        }],
    };

    let direct_formula = reachability_formula(&initial, &[("q", 1)]);
    let direct_verdict = run_bmc(&initial, &direct_formula);

    let reduced_formula = reachability_formula(&reduced, &[("q", 1)]);
    let reduced_verdict = run_bmc_with_reduction(
        &reduced,
        &reduced_formula,
        ReductionContext { system: &system, initial_net: &initial },
    );

    assert_eq!(direct_verdict, reduced_verdict);
    assert_eq!(direct_verdict, Some(Verdict::Cex));
}

#[test]
fn s5_ic3_proves_the_token_preserving_loop_invariant() {
    let n = net("net n\npl a (1)\npl b (0)\ntr t1 a -> b\ntr t2 b -> a\n");
    let formula = reachability_formula(&n, &[("a", 1), ("b", 1)]);

    let registry = PidRegistry::new();
    let cancel = CancelToken::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut engine = Ic3Engine::new(&n, &formula, MockSolver::new());
    engine.prove(&tx, &registry, &cancel).expect("ic3 worker does not error on a mock solver");
    drop(tx);
    assert_eq!(rx.try_recv().ok().map(|r| r.verdict), Some(Verdict::Inv));
}

#[test]
fn s6_disjoint_cycles_are_pairwise_concurrent_through_the_engine() {
    let n = net(
        "net n\n\
         pl a1 (1)\npl a2 (0)\ntr ta1 a1 -> a2\ntr ta2 a2 -> a1\n\
         pl b1 (1)\npl b2 (0)\ntr tb1 b1 -> b2\ntr tb2 b2 -> b1\n",
    );
    let mut engine = ConcurrentPlacesEngine::new(&n, MockSolver::new());
    let cancel = CancelToken::new();
    let matrix = engine.compute_matrix(&cancel).expect("concurrent-places analysis completes");

    for &a in &["a1", "a2"] {
        for &b in &["b1", "b2"] {
            let pa = n.place_id(a).unwrap();
            let pb = n.place_id(b).unwrap();
            assert!(matrix.is_concurrent(pa, pb), "{a} and {b} should be concurrent");
        }
    }
}

#[test]
fn portfolio_times_out_cleanly_when_no_solver_binary_is_available() {
    // `Portfolio::run` spawns real `ProcessSolver`s; with a bogus solver
    // path every worker fails to spawn, so the scheduler should still
    // return cleanly once the (short) wall-clock timeout elapses rather
    // than hang or panic. Engine logic itself is covered by the
    // `MockSolver`-backed scenarios above.
    let n = net("net n\npl p (1)\npl q (0)\ntr t p -> q\n");
    let formula = deadlock_formula(&n);
    let portfolio = Portfolio::new(&n, &formula, "pnreach-nonexistent-solver-binary", Duration::from_millis(200))
        .with_engines(vec![EngineKind::Bmc, EngineKind::KInduction]);
    let outcome = portfolio.run().expect("scheduler itself does not error out");
    assert!(outcome.is_none());
}
