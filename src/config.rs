//! CLI surface and resolved run configuration (spec §6).
//!
//! Grounded on `gat-cli`'s `clap::Parser` derive conventions for the
//! struct shape and on the `meyerphi-strix` `options.rs` mutually
//! exclusive `ArgGroup` pattern (ported from clap 2.x's `Clap` derive to
//! clap 4.5's `Parser`/`ArgGroup` combination) for the property
//! specifiers and the two matrix-output flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgGroup, Parser};
use tracing::warn;

/// `--auto-reduce` looks for a sibling file with this suffix next to
/// the input net (spec SPEC_FULL §D: "the conventional suffix produced
/// by the `reduce`/`tina` tools" — this crate does not itself invoke
/// `reduce`, so the suffix is this crate's own convention, recorded in
/// DESIGN.md).
const AUTO_REDUCE_SUFFIX: &str = ".redeq";

/// `--auto-enumerative` looks for a sibling precomputed state-space
/// listing with this suffix.
const AUTO_ENUMERATIVE_SUFFIX: &str = ".states";

#[derive(Debug, Parser)]
#[command(
    name = "pnreach",
    version,
    about = "Symbolic reachability and invariance checking for Petri nets",
    long_about = "Checks a reachability or invariance property of a Petri net by racing \
                   bounded model checking, k-induction, and IC3/PDR over an external SMT \
                   solver, optionally corroborated by a reduction-equations certificate."
)]
// Not `required(true)`: `--about` must be usable on its own, the same
// way clap's built-in `--version`/`--help` bypass other requirements.
// Presence of exactly one property specifier is instead checked in
// `RunConfig::resolve` once `--about` has had a chance to short-circuit.
#[command(group(
    ArgGroup::new("property").args(["xml", "reachability", "quasi_liveness", "concurrent_places"])
))]
#[command(group(
    ArgGroup::new("reduction_source").args(["reduced", "auto_reduce"])
))]
#[command(group(
    ArgGroup::new("enumerative_source").args(["enumerative", "auto_enumerative"])
))]
#[command(group(
    ArgGroup::new("matrix_format").args(["compressed_matrix", "complete_matrix"])
))]
pub struct Cli {
    /// Path to the `.net` file to check.
    pub net: PathBuf,

    /// Properties-XML file (spec §6: `exists-path/finally` or
    /// `all-paths/globally` formulas with a property id per entry).
    #[arg(long, value_name = "PATH")]
    pub xml: Option<PathBuf>,

    /// `.pnml` file supplying the name/id mapping and, when present, the
    /// NUPN unit-safety toolspecific section (spec §6).
    #[arg(long, value_name = "PATH")]
    pub pnml: Option<PathBuf>,

    /// Reachability target as a comma-separated place list, each entry
    /// optionally `name=count` (count defaults to 1).
    #[arg(long, value_name = "PLACES", value_delimiter = ',')]
    pub reachability: Option<Vec<String>>,

    /// Quasi-liveness target: a comma-separated transition list, true
    /// when at least one of them is fireable from some reachable
    /// marking (spec's dropped-but-kept `generate_quasi_liveness`
    /// feature, grounded on `formula.py` lines ~613-645).
    #[arg(long, value_name = "TRANSITIONS", value_delimiter = ',')]
    pub quasi_liveness: Option<Vec<String>>,

    /// Run the concurrent-places analyzer instead of checking a
    /// reachability/invariance property.
    #[arg(long)]
    pub concurrent_places: bool,

    /// Reduction-equations file bridging this net and a reduced net.
    #[arg(long, value_name = "PATH")]
    pub reduced: Option<PathBuf>,

    /// Look for a sibling reduction-equations file next to `net`.
    #[arg(long)]
    pub auto_reduce: bool,

    /// Precomputed state-space listing, used in place of the stepper's
    /// own BFS for the enumerative engine.
    #[arg(long, value_name = "PATH")]
    pub enumerative: Option<PathBuf>,

    /// Look for a sibling state-space listing next to `net`.
    #[arg(long)]
    pub auto_enumerative: bool,

    /// Wall-clock budget per engine, in seconds (spec §5).
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Print the concurrent-places matrix in compressed (upper
    /// triangle only) form. Default when neither flag is given.
    #[arg(long)]
    pub compressed_matrix: bool,

    /// Print the concurrent-places matrix in full square form.
    #[arg(long)]
    pub complete_matrix: bool,

    /// Raise logging to `info`.
    #[arg(short, long)]
    pub verbose: bool,

    /// Raise logging to `debug` (and `trace` for the exact SMT-LIB text
    /// written to the solver).
    #[arg(long)]
    pub debug: bool,

    /// Print the long description and exit, mirroring `--help` but
    /// without the full usage listing.
    #[arg(long)]
    pub about: bool,
}

/// The mutually exclusive property specifiers (spec §6), resolved from
/// `Cli` but not yet bound to a parsed [`crate::net::PetriNet`] — place
/// and transition names in `Reachability`/`QuasiLiveness` are resolved
/// against the net once it has been loaded (see `src/bin/pnreach.rs`).
#[derive(Debug, Clone)]
pub enum PropertySpec {
    Xml(PathBuf),
    Reachability(Vec<(String, u64)>),
    QuasiLiveness(Vec<String>),
    ConcurrentPlaces,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixFormat {
    Compressed,
    Complete,
}

/// The fully resolved run configuration: CLI flags turned into typed,
/// filesystem-checked values (spec SPEC_FULL §D keeps this resolution
/// out of the engines, which stay free of filesystem assumptions).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub net_path: PathBuf,
    pub property: PropertySpec,
    pub reduction_path: Option<PathBuf>,
    pub enumerative_path: Option<PathBuf>,
    pub pnml_path: Option<PathBuf>,
    pub timeout: Duration,
    pub matrix_format: MatrixFormat,
    pub verbose: bool,
    pub debug: bool,
    pub about: bool,
}

fn parse_reachability_tokens(tokens: &[String]) -> Vec<(String, u64)> {
    tokens
        .iter()
        .map(|tok| match tok.split_once('=') {
            Some((name, count)) => (name.to_string(), count.trim().parse().unwrap_or(1)),
            None => (tok.clone(), 1),
        })
        .collect()
}

fn sibling_with_suffix(net_path: &Path, suffix: &str) -> Option<PathBuf> {
    let candidate = {
        let mut s = net_path.as_os_str().to_owned();
        s.push(suffix);
        PathBuf::from(s)
    };
    candidate.is_file().then_some(candidate)
}

impl RunConfig {
    /// Turns parsed CLI flags into a [`RunConfig`]. Returns `Err` if none
    /// of the mutually exclusive property specifiers were given and
    /// `--about` wasn't either — the clap `ArgGroup` can't enforce this
    /// on its own since `--about` must remain usable by itself (spec
    /// §6).
    pub fn resolve(cli: Cli) -> Result<RunConfig, String> {
        let property = if let Some(xml) = cli.xml {
            PropertySpec::Xml(xml)
        } else if let Some(tokens) = cli.reachability {
            PropertySpec::Reachability(parse_reachability_tokens(&tokens))
        } else if let Some(transitions) = cli.quasi_liveness {
            PropertySpec::QuasiLiveness(transitions)
        } else if cli.concurrent_places {
            PropertySpec::ConcurrentPlaces
        } else if cli.about {
            PropertySpec::ConcurrentPlaces // placeholder; main exits on `about` before using it
        } else {
            return Err(
                "one of --xml, --reachability, --quasi-liveness, or --concurrent-places is required".to_string(),
            );
        };

        let reduction_path = if cli.auto_reduce {
            let found = sibling_with_suffix(&cli.net, AUTO_REDUCE_SUFFIX);
            if found.is_none() {
                warn!(suffix = AUTO_REDUCE_SUFFIX, "auto-reduce: no sibling reduction file found");
            }
            found
        } else {
            cli.reduced
        };

        let enumerative_path = if cli.auto_enumerative {
            let found = sibling_with_suffix(&cli.net, AUTO_ENUMERATIVE_SUFFIX);
            if found.is_none() {
                warn!(suffix = AUTO_ENUMERATIVE_SUFFIX, "auto-enumerative: no sibling state-space file found");
            }
            found
        } else {
            cli.enumerative
        };

        let matrix_format = if cli.complete_matrix {
            MatrixFormat::Complete
        } else {
            MatrixFormat::Compressed
        };

        Ok(RunConfig {
            net_path: cli.net,
            property,
            reduction_path,
            enumerative_path,
            pnml_path: cli.pnml,
            timeout: Duration::from_secs(cli.timeout),
            matrix_format,
            verbose: cli.verbose,
            debug: cli.debug,
            about: cli.about,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reachability_tokens_with_and_without_counts() {
        let tokens = vec!["p".to_string(), "q=3".to_string()];
        let parsed = parse_reachability_tokens(&tokens);
        assert_eq!(parsed, vec![("p".to_string(), 1), ("q".to_string(), 3)]);
    }

    #[test]
    fn auto_reduce_without_sibling_file_resolves_to_none() {
        let cli = Cli {
            net: PathBuf::from("/nonexistent/net/path/example.net"),
            xml: None,
            pnml: None,
            reachability: None,
            quasi_liveness: None,
            concurrent_places: true,
            reduced: None,
            auto_reduce: true,
            enumerative: None,
            auto_enumerative: false,
            timeout: 60,
            compressed_matrix: false,
            complete_matrix: false,
            verbose: false,
            debug: false,
            about: false,
        };
        let resolved = RunConfig::resolve(cli).unwrap();
        assert!(resolved.reduction_path.is_none());
    }

    #[test]
    fn resolve_rejects_missing_property_specifier() {
        let cli = Cli {
            net: PathBuf::from("example.net"),
            xml: None,
            pnml: None,
            reachability: None,
            quasi_liveness: None,
            concurrent_places: false,
            reduced: None,
            auto_reduce: false,
            enumerative: None,
            auto_enumerative: false,
            timeout: 60,
            compressed_matrix: false,
            complete_matrix: false,
            verbose: false,
            debug: false,
            about: false,
        };
        assert!(RunConfig::resolve(cli).is_err());
    }
}
