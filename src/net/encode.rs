//! SMT-LIB emission for the net (spec §4.2).
//!
//! Grounded on `ptnet.py::smtlib_declare_places` / `smtlib_initial_marking`
//! / `smtlib_transition_relation` / `Transition.smtlib` (original_source,
//! lines ~85-137 and ~522-620).
//!
//! `ptnet.py::Transition.smtlib_read_arc_constraints` (lines ~616-631)
//! is deliberately not ported: it guards the *unordered* state-equation
//! encoding (one set of transition-occurrence variables with no step
//! index), where a linear combination of deltas can satisfy a tested
//! place's threshold without any transition having actually fed it
//! first. The compact, order-indexed encoding emitted below never has
//! that gap — `p@k` is pinned by the chain of `(assert (= p@(j+1) ...))`
//! updates for every `j < k`, so a transition whose test arc requires
//! `p@k >= w` can only fire if some earlier disjunct in the unrolled
//! path actually deposited those tokens. Asserting the read-arc
//! implication on top would be redundant with what the transition
//! relation already enforces (spec §9 Open Question (c) settles for the
//! compact encoding only).

use std::fmt::Write as _;

use super::{Marking, PetriNet, PlaceId};

impl PetriNet {
    /// `(declare-const p@k Int)` plus `p@k >= 0` for every place, at order
    /// `k` (or unindexed when `k` is `None`), plus this net's NUPN
    /// unit-safety constraints at the same order when a `.pnml` file
    /// supplied one (spec §6) — this is the single point every engine
    /// already calls whenever it introduces a new order, so the pragma
    /// is asserted there rather than duplicated per engine.
    pub fn smtlib_declare_places(&self, k: Option<u32>) -> String {
        let mut out = String::new();
        for p in self.places() {
            let id = p.smtlib_id(k);
            let _ = writeln!(out, "(declare-const {id} Int)");
            let _ = writeln!(out, "(assert (>= {id} 0))");
        }
        if let Some(nupn) = &self.nupn {
            out.push_str(&nupn.smtlib_unit_safety_constraints(self, k));
        }
        out
    }

    /// Asserts `p@k = m0(p)` for every place (spec §4.2).
    pub fn smtlib_initial_marking(&self, k: Option<u32>) -> String {
        let mut out = String::new();
        for p in self.places() {
            let id = p.smtlib_id(k);
            let _ = writeln!(out, "(assert (= {id} {}))", self.initial_marking.get(p.id));
        }
        out
    }

    /// Asserts `p@k = value` for every place in `marking` (used to seed a
    /// solver context with an arbitrary marking, e.g. in the
    /// concurrent-places analyzer — mirrors `Marking.smtlib`).
    pub fn smtlib_set_marking(&self, marking: &Marking, k: Option<u32>) -> String {
        let mut out = String::new();
        for p in self.places() {
            let id = p.smtlib_id(k);
            let _ = writeln!(out, "(assert (= {id} {}))", marking.get(p.id));
        }
        out
    }

    /// One-step transition relation from order `k` to `k+1`: an `or` over
    /// every transition's firing disjunct plus, when `stutter` is true, a
    /// final "no place changes" disjunct (spec §4.2, §9 Open Question (c):
    /// only the compact encoding with explicit stutter disjunct is
    /// required).
    pub fn smtlib_transition_relation(&self, k: u32, stutter: bool) -> String {
        if self.place_count() == 0 {
            return String::new();
        }
        let mut out = String::from("(assert (or\n");
        for t in self.transitions() {
            out.push_str(&self.smtlib_transition_disjunct(t, k));
        }
        if stutter {
            out.push_str("\t(and\n\t\t");
            for p in self.places() {
                let _ = write!(
                    out,
                    "(= {} {})",
                    p.smtlib_id(Some(k + 1)),
                    p.smtlib_id(Some(k))
                );
            }
            out.push_str("\n\t)");
        }
        out.push_str("\n))\n");
        out
    }

    fn smtlib_transition_disjunct(&self, t: &super::Transition, k: u32) -> String {
        let mut clauses = Vec::new();

        // Firing guard: pre(p) > 0 -> p@k >= pre(p); inhibitor -> p@k < |pre(p)|.
        for (&p, &w) in &t.pre {
            let id = self.place(p).smtlib_id(Some(k));
            if w < 0 {
                clauses.push(format!("(< {id} {})", w.unsigned_abs()));
            } else {
                clauses.push(format!("(>= {id} {w})"));
            }
        }

        // Update: places with flow move by -inputs + outputs; places never
        // touched (or only tested) stay put.
        let connected: std::collections::BTreeSet<PlaceId> = t.connected_places().collect();
        for p in self.places() {
            let next = self.place(p.id).smtlib_id(Some(k + 1));
            let cur = self.place(p.id).smtlib_id(Some(k));
            if connected.contains(&p.id) {
                let inputs = t.inputs.get(&p.id).copied().unwrap_or(0) as i64;
                let outputs = t.outputs.get(&p.id).copied().unwrap_or(0) as i64;
                if inputs != 0 || outputs != 0 {
                    clauses.push(format!("(= {next} (+ {cur} {}))", outputs - inputs));
                } else {
                    clauses.push(format!("(= {next} {cur})"));
                }
            } else {
                clauses.push(format!("(= {next} {cur})"));
            }
        }

        format!("\t(and\n\t\t{}\n\t)\n", clauses.join(" "))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::parser_net::parse_net_str;
    use std::path::PathBuf;

    fn net(text: &str) -> PetriNet {
        parse_net_str(&PathBuf::from("t.net"), text).unwrap()
    }

    #[test]
    fn declares_places_with_order() {
        let n = net("net n\npl p (1)\ntr t p -> \n");
        let decl = n.smtlib_declare_places(Some(0));
        assert!(decl.contains("(declare-const p@0 Int)"));
        assert!(decl.contains("(assert (>= p@0 0))"));
    }

    #[test]
    fn initial_marking_asserts_m0() {
        let n = net("net n\npl p (3)\ntr t p -> \n");
        let m = n.smtlib_initial_marking(Some(0));
        assert!(m.contains("(assert (= p@0 3))"));
    }

    #[test]
    fn transition_relation_has_stutter_disjunct() {
        let n = net("net n\npl p (1)\ntr t p -> \n");
        let tr = n.smtlib_transition_relation(0, true);
        assert!(tr.contains("(and\n\t\t(= p@1 p@0)\n\t)"));
    }
}
