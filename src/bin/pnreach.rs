//! CLI entry point (spec §6, §7).
//!
//! Grounded on `oxidized`'s `main.rs` for the `tracing-subscriber`
//! `EnvFilter` setup and the "parse, resolve, dispatch, exit-code"
//! shape; the property-to-verdict dispatch itself follows
//! `solver.py::main`'s top-level modes (XML properties,
//! `--reachability`, `--quasi-liveness`, `--concurrent-places`).

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pnreach::config::{Cli, MatrixFormat, PropertySpec, RunConfig};
use pnreach::engines::bmc::ReductionContext;
use pnreach::engines::concurrent_places::ConcurrentPlacesEngine;
use pnreach::engines::portfolio::Portfolio;
use pnreach::engines::{CancelToken, Verdict};
use pnreach::formula::properties::parse_properties_xml;
use pnreach::formula::{generate_quasi_liveness, generate_reachability, Expr, Formula, PropertyKind};
use pnreach::net::parser_net::parse_net_str;
use pnreach::net::pnml;
use pnreach::net::{Marking, PetriNet};
use pnreach::reduction::System;
use pnreach::smt::process::ProcessSolver;
use pnreach::smt::registry::PidRegistry;

const SOLVER_PATH: &str = "z3";

const ABOUT: &str = "Checks a reachability or invariance property of a Petri net by racing \
bounded model checking, k-induction, and IC3/PDR over an external SMT \
solver, optionally corroborated by a reduction-equations certificate.";

/// The initial net and reduction-equations system, held alive for the
/// duration of a run so engines can borrow from them (spec §4.4).
struct Reduction {
    initial_net: PetriNet,
    system: System,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.about {
        println!("{ABOUT}");
        return Ok(());
    }

    let config = RunConfig::resolve(cli).map_err(|msg| anyhow::anyhow!(msg))?;
    init_logging(config.verbose, config.debug);

    let mut net = load_net(&config.net_path)?;
    if let Some(pnml_path) = &config.pnml_path {
        net.nupn = load_nupn(pnml_path)?;
    }
    let net = net;
    let reduction = load_reduction(&config, &net)?;

    match &config.property {
        PropertySpec::ConcurrentPlaces => run_concurrent_places(&net, &reduction, &config),
        PropertySpec::Xml(path) => run_properties_file(&net, path, &reduction, &config),
        PropertySpec::Reachability(tokens) => run_reachability(&net, tokens, &reduction, &config),
        PropertySpec::QuasiLiveness(transitions) => run_quasi_liveness(&net, transitions, &reduction, &config),
    }
}

fn init_logging(verbose: bool, debug: bool) {
    let default_level = if debug { "debug" } else if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_net(path: &Path) -> Result<PetriNet> {
    let text = fs::read_to_string(path).with_context(|| format!("reading net file {}", path.display()))?;
    parse_net_str(path, &text).with_context(|| format!("parsing net file {}", path.display()))
}

/// Loads a `.pnml` file's name/id mapping and NUPN toolspecific section
/// (spec §6), resolving the NUPN tree's place lists (raw PNML ids) to
/// the names used inside the checked net before they're ever used to
/// build a unit-safety constraint. Returns `Ok(None)` when the file
/// carries no NUPN section at all.
fn load_nupn(path: &Path) -> Result<Option<pnml::Nupn>> {
    let mapping = pnml::parse_pnml_mapping(path)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("parsing pnml mapping in {}", path.display()))?;
    let nupn = pnml::parse_nupn(path)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("parsing NUPN section in {}", path.display()))?;
    Ok(nupn.map(|mut n| {
        n.resolve_place_names(&mapping);
        n
    }))
}

/// Loads the reduction certificate when `--reduced`/`--auto-reduce`
/// resolved to a file.
///
/// By this crate's own convention (an Open Question the upstream tool
/// leaves to the caller, recorded in DESIGN.md): the file named by
/// `--reduced`/`--auto-reduce` is itself a valid `.net` file describing
/// the *initial* (pre-reduction) net, with the `reduce`-tool's
/// "generated equations" block appended as `%`-prefixed line comments
/// so [`parse_net_str`] skips it while [`System::parse`] still finds it
/// by scanning the raw file text. The positional `<net>` argument is
/// always the net actually unrolled by the engines (the "reduced" net
/// in spec §3/§4.4 terminology, even when no reduction is configured at
/// all).
fn load_reduction(config: &RunConfig, reduced_net: &PetriNet) -> Result<Option<Reduction>> {
    let Some(path) = &config.reduction_path else {
        return Ok(None);
    };

    let text = fs::read_to_string(path).with_context(|| format!("reading reduction file {}", path.display()))?;
    let initial_net =
        parse_net_str(path, &text).with_context(|| format!("parsing reduction file {} as the initial net", path.display()))?;

    let places_initial: BTreeSet<String> = initial_net.places().map(|p| p.name.clone()).collect();
    let places_reduced: BTreeSet<String> = reduced_net.places().map(|p| p.name.clone()).collect();
    let system = System::parse(path, places_initial, places_reduced)
        .with_context(|| format!("parsing reduction equations in {}", path.display()))?;

    Ok(Some(Reduction { initial_net, system }))
}

fn run_concurrent_places(net: &PetriNet, reduction: &Option<Reduction>, config: &RunConfig) -> Result<()> {
    let registry = PidRegistry::new();
    let solver = ProcessSolver::spawn(SOLVER_PATH, registry, config.timeout).context("spawning the SMT solver")?;

    let mut engine = ConcurrentPlacesEngine::new(net, solver);
    if let Some(r) = reduction {
        engine = engine.with_reduction(ReductionContext { system: &r.system, initial_net: &r.initial_net });
    }

    let cancel = CancelToken::new();
    let matrix = engine
        .compute_matrix(&cancel)
        .map_err(anyhow::Error::from)
        .context("computing the concurrent-places matrix")?;

    let compressed = !matches!(config.matrix_format, MatrixFormat::Complete);
    print!("{}", matrix.render(net, compressed));
    Ok(())
}

fn run_reachability(net: &PetriNet, tokens: &[(String, u64)], reduction: &Option<Reduction>, config: &RunConfig) -> Result<()> {
    let marking = tokens
        .iter()
        .map(|(name, count)| {
            net.place_id(name)
                .map(|id| (id, *count))
                .ok_or_else(|| anyhow::anyhow!("unknown place `{name}` in --reachability"))
        })
        .collect::<Result<Vec<_>>>()?;

    let r = generate_reachability(&marking);
    let formula = Formula {
        p: Expr::not(r.clone()),
        r,
        property_def: PropertyKind::Finally,
        non_monotonic: false,
    };

    verify_and_report(net, &formula, reduction, config, None)
}

/// `--quasi-liveness`: true when at least one named transition is
/// fireable from some reachable marking (spec's dropped-but-kept
/// feature, grounded on `generate_quasi_liveness`).
fn run_quasi_liveness(net: &PetriNet, transitions: &[String], reduction: &Option<Reduction>, config: &RunConfig) -> Result<()> {
    let ids = transitions
        .iter()
        .map(|name| {
            net.transition_id(name)
                .ok_or_else(|| anyhow::anyhow!("unknown transition `{name}` in --quasi-liveness"))
        })
        .collect::<Result<Vec<_>>>()?;

    let r = generate_quasi_liveness(net, &ids);
    let formula = Formula {
        p: Expr::not(r.clone()),
        r,
        property_def: PropertyKind::Finally,
        non_monotonic: true,
    };

    verify_and_report(net, &formula, reduction, config, None)
}

fn run_properties_file(net: &PetriNet, path: &Path, reduction: &Option<Reduction>, config: &RunConfig) -> Result<()> {
    let properties = parse_properties_xml(path, net)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("parsing properties file {}", path.display()))?;

    for (id, formula) in &properties.entries {
        verify_and_report(net, formula, reduction, config, id.as_deref())?;
    }
    Ok(())
}

/// Checks one formula and prints its verdict per spec §7. The
/// enumerative engine (a precomputed state-space listing) is tried
/// first when configured, since it settles small nets without paying
/// for an SMT session at all; otherwise the formula is raced across the
/// symbolic portfolio.
///
/// The printed answer reports whether `formula.r` is reachable
/// (`TRUE`) or not (`FALSE`); `formula.property_def` is metadata the
/// monotonicity analysis in `formula/properties.rs` uses internally and
/// does not flip this mapping (see that module for how `r` is derived
/// for `exists-path/finally` vs. `all-paths/globally`).
fn verify_and_report(net: &PetriNet, formula: &Formula, reduction: &Option<Reduction>, config: &RunConfig, label: Option<&str>) -> Result<()> {
    if let Some(id) = label {
        println!("{id}");
    }

    if let Some(enumerative_path) = &config.enumerative_path {
        let states = parse_marking_listing(enumerative_path, net)
            .with_context(|| format!("reading enumerative state-space file {}", enumerative_path.display()))?;
        if let Some(witness) = states.iter().find(|m| formula.r.eval(m)) {
            println!("TRUE");
            println!("{}", witness.display_with(|p| net.place_name(p)));
            return Ok(());
        }
        info!(
            path = %enumerative_path.display(),
            states = states.len(),
            "enumerative state-space exhausted with no match; falling back to the symbolic portfolio"
        );
    }

    let mut portfolio = Portfolio::new(net, formula, SOLVER_PATH, config.timeout);
    if let Some(r) = reduction {
        portfolio = portfolio.with_reduction(&r.system, &r.initial_net);
    }

    let outcome = portfolio
        .run()
        .map_err(anyhow::Error::from)
        .context("running the verification portfolio")?;

    match outcome {
        Some(outcome) => match outcome.verdict {
            Verdict::Cex => {
                println!("TRUE");
                if let Some(witness) = outcome.witness {
                    println!("{}", witness.display_with(|p| net.place_name(p)));
                }
            }
            Verdict::Inv => println!("FALSE"),
        },
        // Wall-clock timeout or an aborted run: spec §7 prints no
        // verdict line in this case.
        None => {}
    }
    Ok(())
}

/// Parses a precomputed state-space listing: one marking per line in
/// `solver.py::display_model` syntax (`"p1(2) p3(1)"`, or `"empty
/// marking"`), the same textual form [`Marking::display_with`]
/// produces — this crate's own convention for what `--enumerative`/
/// `--auto-enumerative` files contain (recorded in DESIGN.md).
fn parse_marking_listing(path: &Path, net: &PetriNet) -> pnreach::PnResult<BTreeSet<Marking>> {
    let text = fs::read_to_string(path).map_err(pnreach::PnError::Io)?;
    let mut out = BTreeSet::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "empty marking" {
            out.insert(Marking::new());
            continue;
        }
        let mut m = Marking::new();
        for tok in line.split_whitespace() {
            let (name, count_str) = tok
                .split_once('(')
                .and_then(|(n, rest)| rest.strip_suffix(')').map(|c| (n, c)))
                .ok_or_else(|| pnreach::PnError::parse(path, format!("invalid marking token `{tok}`")))?;
            let place = net
                .place_id(name)
                .ok_or_else(|| pnreach::PnError::parse(path, format!("unknown place `{name}` in enumerative listing")))?;
            let count: u64 = count_str
                .parse()
                .map_err(|_| pnreach::PnError::parse(path, format!("invalid token count in `{tok}`")))?;
            m.set(place, count);
        }
        out.insert(m);
    }
    Ok(out)
}
