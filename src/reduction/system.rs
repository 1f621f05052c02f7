//! The reduction-equations system bridging an initial and a reduced net
//! (spec §3, §4.4).
//!
//! Grounded on `smpt/system.py::System`/`Equation`/`Variable`
//! (original_source, read in full): parses the `reduce`-tool "generated
//! equations" block and re-emits it under a chosen pair of time indices.
//! The TINA `convert`-specific `-1.` multiplier quirk (system.py lines
//! ~490-497) is not reproduced; this parser follows spec §6's simpler
//! grammar (`<name> |- <sum> <op> <sum>`, skipping `. O`/`. C` marker
//! lines) rather than every edge case of the original tool chain.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{PnError, PnResult};
use crate::net::normalize_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Le,
    Ge,
    Lt,
    Gt,
}

impl RelOp {
    fn parse(s: &str) -> Option<RelOp> {
        Some(match s {
            "=" => RelOp::Eq,
            "<=" => RelOp::Le,
            ">=" => RelOp::Ge,
            "<" => RelOp::Lt,
            ">" => RelOp::Gt,
            _ => return None,
        })
    }

    fn smtlib_symbol(self) -> &'static str {
        match self {
            RelOp::Eq => "=",
            RelOp::Le => "<=",
            RelOp::Ge => ">=",
            RelOp::Lt => "<",
            RelOp::Gt => ">",
        }
    }
}

/// One term of an equation member: a variable name with an optional
/// integer multiplier (spec §3: "each with optional integer
/// multiplier").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub id: String,
    pub multiplier: Option<i64>,
}

impl Variable {
    /// Renders `id` (or `id@k`), optionally wrapped in `(* m ...)`.
    fn smtlib(&self, k: Option<u32>) -> String {
        let base = match k {
            Some(k) => format!("{}@{}", self.id, k),
            None => self.id.clone(),
        };
        match self.multiplier {
            Some(m) => format!("(* {m} {base})"),
            None => base,
        }
    }
}

/// One linear (in)equation between initial-net places, reduced-net
/// places, and auxiliary variables (spec §3).
#[derive(Debug, Clone)]
pub struct Equation {
    pub left: Vec<Variable>,
    pub right: Vec<Variable>,
    pub operator: RelOp,
    pub contains_reduced: bool,
}

impl Equation {
    fn member_smtlib(member: &[Variable], k: Option<u32>) -> String {
        let rendered: Vec<String> = member.iter().map(|v| v.smtlib(k)).collect();
        if rendered.len() > 1 {
            format!(" (+{})", rendered.join(""))
        } else {
            rendered
                .into_iter()
                .map(|s| format!(" {s}"))
                .collect::<Vec<_>>()
                .join("")
        }
    }

    /// Asserts this equation, indexing each variable as follows: a
    /// variable that names a reduced-net place is indexed at `k`; a
    /// variable that is neither a reduced-net place nor (when
    /// `k_initial` is given) an initial-net/auxiliary variable falls
    /// back unindexed (spec §4.4's four emission groups are built from
    /// repeated calls to this with different `k`/`k_initial`).
    pub fn smtlib_with_order(
        &self,
        k: Option<u32>,
        k_initial: Option<u32>,
        places_reduced: &BTreeSet<String>,
    ) -> String {
        let render_member = |member: &[Variable]| -> String {
            let rendered: Vec<String> = member
                .iter()
                .map(|v| {
                    if places_reduced.contains(&v.id) {
                        v.smtlib(k)
                    } else if k_initial.is_some() {
                        v.smtlib(k_initial)
                    } else {
                        v.smtlib(None)
                    }
                })
                .collect();
            if rendered.len() > 1 {
                format!(" (+{})", rendered.join(""))
            } else {
                rendered
                    .into_iter()
                    .map(|s| format!(" {s}"))
                    .collect::<Vec<_>>()
                    .join("")
            }
        };
        format!(
            "(assert ({}{}{}))",
            self.operator.smtlib_symbol(),
            render_member(&self.left),
            render_member(&self.right)
        )
    }

    /// Time-invariant form (no `k`/`k_initial` distinction): used for
    /// equations with `contains_reduced == false` (spec §4.4 group ii).
    pub fn smtlib(&self, k_initial: Option<u32>) -> String {
        format!(
            "(assert ({}{}{}))",
            self.operator.smtlib_symbol(),
            Self::member_smtlib(&self.left, k_initial),
            Self::member_smtlib(&self.right, k_initial)
        )
    }
}

/// Three disjoint name sets plus the parsed equations (spec §3).
#[derive(Debug, Clone, Default)]
pub struct System {
    pub places_initial: BTreeSet<String>,
    pub places_reduced: BTreeSet<String>,
    pub additional_vars: Vec<String>,
    pub equations: Vec<Equation>,
}

impl System {
    /// Parses a reduction-equations file: scans for the `reduce`-tool's
    /// "generated equations" block and parses each `<name> |- <sum> <op>
    /// <sum>` line, skipping `. O`/`. C` marker lines (spec §6, grounded
    /// on `System.parser`/`Equation.parse_equation`).
    pub fn parse(
        path: &Path,
        places_initial: BTreeSet<String>,
        places_reduced: BTreeSet<String>,
    ) -> PnResult<System> {
        let text = normalize_identifier(&std::fs::read_to_string(path)?);
        let mut system = System {
            places_initial,
            places_reduced,
            additional_vars: Vec::new(),
            equations: Vec::new(),
        };

        let Some(block) = extract_equations_block(&text) else {
            return Ok(system);
        };

        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((marker, rest)) = line.split_once(" |- ") else {
                continue;
            };
            if marker == ". O" || marker == ". C" {
                continue;
            }
            let eq = parse_equation(rest, &mut system, path)?;
            system.equations.push(eq);
        }

        Ok(system)
    }

    /// Declares the additional (non-place) variables and asserts every
    /// equation at the given indices (spec §4.4): reduced-net variables
    /// at `k`, everything else at `k_initial` (or unindexed if absent).
    pub fn smtlib(&self, k: Option<u32>, k_initial: Option<u32>) -> String {
        let mut out = self.smtlib_declare_additional_variables(k_initial);
        for eq in &self.equations {
            if eq.contains_reduced {
                out.push_str(&eq.smtlib_with_order(k, k_initial, &self.places_reduced));
            } else {
                out.push_str(&eq.smtlib(k_initial));
            }
            out.push('\n');
        }
        out
    }

    /// Declares every auxiliary variable (not itself a reduced-net
    /// place) with non-negativity, at `k_initial` if given.
    pub fn smtlib_declare_additional_variables(&self, k_initial: Option<u32>) -> String {
        let mut out = String::new();
        for var in &self.additional_vars {
            if self.places_reduced.contains(var) {
                continue;
            }
            let name = match k_initial {
                Some(k) => format!("{var}@{k}"),
                None => var.clone(),
            };
            out.push_str(&format!("(declare-const {name} Int)\n(assert (>= {name} 0))\n"));
        }
        out
    }

    /// Equations not involving reduced-net places: time-invariant,
    /// asserted once at startup (spec §4.4 group ii).
    pub fn smtlib_equations_without_reduced(&self, k_initial: Option<u32>) -> String {
        let mut out = String::new();
        for eq in &self.equations {
            if !eq.contains_reduced {
                out.push_str(&eq.smtlib(k_initial));
                out.push('\n');
            }
        }
        out
    }

    /// Equations involving reduced-net places, reindexed at `k` on every
    /// iteration (spec §4.4 group iii).
    pub fn smtlib_equations_with_reduced(&self, k: u32, k_initial: Option<u32>) -> String {
        let mut out = String::new();
        for eq in &self.equations {
            if eq.contains_reduced {
                out.push_str(&eq.smtlib_with_order(Some(k), k_initial, &self.places_reduced));
                out.push('\n');
            }
        }
        out
    }

    /// Links places common to both nets: `p@k = p@k_initial` (or `p@k =
    /// p` when `k_initial` is absent), spec §4.4 group iv.
    pub fn smtlib_link_nets(&self, k: u32, k_initial: Option<u32>) -> String {
        let mut out = String::new();
        for pl in &self.places_reduced {
            if self.places_initial.contains(pl) {
                match k_initial {
                    Some(ki) => {
                        out.push_str(&format!("(assert (= {pl}@{k} {pl}@{ki}))\n"));
                    }
                    None => {
                        out.push_str(&format!("(assert (= {pl}@{k} {pl}))\n"));
                    }
                }
            }
        }
        out
    }
}

fn extract_equations_block(text: &str) -> Option<&str> {
    let marker = "generated equations\n";
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find("\n\n").unwrap_or(rest.len());
    Some(&rest[..end])
}

fn parse_equation(body: &str, system: &mut System, path: &Path) -> PnResult<Equation> {
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut operator = None;
    let mut contains_reduced = false;

    let (mut current, mut inversed) = (&mut left, &mut right);
    let mut minus = false;

    for token in body.split_whitespace() {
        if let Some(op) = RelOp::parse(token) {
            operator = Some(op);
            std::mem::swap(&mut current, &mut inversed);
            minus = false;
            continue;
        }
        match token {
            "+" => {
                minus = false;
                continue;
            }
            "-" => {
                minus = true;
                continue;
            }
            _ => {}
        }

        let (id, multiplier) = match token.rsplit_once('.') {
            Some((id, mult)) if !id.is_empty() && mult.chars().all(|c| c.is_ascii_digit()) && !mult.is_empty() => {
                (id.to_string(), mult.parse::<i64>().ok())
            }
            _ => (token.to_string(), None),
        };

        if !id.chars().all(|c| c.is_ascii_digit()) {
            if !system.places_initial.contains(&id) && !system.additional_vars.contains(&id) {
                system.additional_vars.push(id.clone());
            }
            if system.places_reduced.contains(&id) {
                contains_reduced = true;
            }
        }

        let var = Variable { id, multiplier };
        if !minus {
            current.push(var);
        } else {
            inversed.push(var);
        }
    }

    let operator = operator.ok_or_else(|| {
        PnError::parse(path, format!("equation missing operator: `{body}`"))
    })?;

    Ok(Equation {
        left,
        right,
        operator,
        contains_reduced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn places(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn s4_reduction_agreement_equation() {
        let text = "\nsome header\ngenerated equations\np1 |- p1 = p2 + k1\n\nfooter\n";
        let path = std::path::PathBuf::from("eqs.net");
        std::fs::write(&path, text).unwrap();
        let sys = System::parse(&path, places(&["p1"]), places(&["p2"])).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(sys.equations.len(), 1);
        let eq = &sys.equations[0];
        assert!(eq.contains_reduced);
        assert_eq!(eq.operator, RelOp::Eq);
        assert_eq!(sys.additional_vars, vec!["k1".to_string()]);
    }

    #[test]
    fn skips_marker_lines() {
        let text = "\ngenerated equations\n. O |- ignored\np1 |- p1 = p2\n\n";
        let path = std::path::PathBuf::from("eqs2.net");
        std::fs::write(&path, text).unwrap();
        let sys = System::parse(&path, places(&["p1"]), places(&["p2"])).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(sys.equations.len(), 1);
    }

    #[test]
    fn link_nets_emits_equality_at_two_orders() {
        let mut sys = System::default();
        sys.places_initial = places(&["p1"]);
        sys.places_reduced = places(&["p1"]);
        let out = sys.smtlib_link_nets(2, Some(0));
        assert_eq!(out, "(assert (= p1@2 p1@0))\n");
    }
}
