//! One-step successor enumeration (spec §4.8).
//!
//! Grounded on `PetriNet::is_enabled`/`fire` (net/mod.rs, themselves
//! transliterated from `ptnet.py`'s firing rule): the stepper adds no
//! new firing semantics, only the "enumerate every enabled transition"
//! loop the concurrent-places analyzer and the enumerative engine both
//! need.

use std::collections::BTreeSet;

use crate::net::{Marking, PetriNet};

pub struct Stepper<'a> {
    net: &'a PetriNet,
}

impl<'a> Stepper<'a> {
    pub fn new(net: &'a PetriNet) -> Self {
        Stepper { net }
    }

    /// Every marking reachable from `m` by firing exactly one enabled
    /// transition (spec §4.8: "enumerates one-step successors of a
    /// marking by iterating enabled transitions").
    pub fn successors(&self, m: &Marking) -> BTreeSet<Marking> {
        self.net
            .transitions()
            .filter(|t| self.net.is_enabled(t.id, m))
            .map(|t| self.net.fire(t.id, m))
            .collect()
    }

    /// Breadth-first exploration of the full reachability set, up to
    /// `bound` discovered markings. Used by the enumerative engine
    /// (`--enumerative`/`--auto-enumerative`) as a complete alternative
    /// to the symbolic engines on nets small enough to explore whole.
    /// Returns `None` if `bound` is exceeded before the frontier dries
    /// up — the caller must then fall back to a symbolic engine.
    pub fn explore(&self, bound: usize) -> Option<BTreeSet<Marking>> {
        let mut visited = BTreeSet::new();
        visited.insert(self.net.initial_marking.clone());
        let mut frontier = vec![self.net.initial_marking.clone()];

        while let Some(m) = frontier.pop() {
            for succ in self.successors(&m) {
                if visited.len() > bound {
                    return None;
                }
                if visited.insert(succ.clone()) {
                    frontier.push(succ);
                }
            }
        }
        Some(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::parser_net::parse_net_str;
    use std::path::PathBuf;

    #[test]
    fn s1_single_transition_net_has_one_successor() {
        let net = parse_net_str(&PathBuf::from("t.net"), "net n\npl p (1)\npl q (0)\ntr t p -> q\n").unwrap();
        let stepper = Stepper::new(&net);
        let succs = stepper.successors(&net.initial_marking);
        assert_eq!(succs.len(), 1);
        let q = net.place_id("q").unwrap();
        assert_eq!(succs.iter().next().unwrap().get(q), 1);
    }

    #[test]
    fn s3_inhibited_transition_yields_no_successor() {
        let net = parse_net_str(
            &PathBuf::from("t.net"),
            "net n\npl p (1)\npl q (0)\ntr t p?-1 -> q\n",
        )
        .unwrap();
        let stepper = Stepper::new(&net);
        assert!(stepper.successors(&net.initial_marking).is_empty());
    }

    #[test]
    fn explore_terminates_on_a_bounded_state_space() {
        let net = parse_net_str(
            &PathBuf::from("t.net"),
            "net n\npl a (1)\npl b (0)\ntr t1 a -> b\ntr t2 b -> a\n",
        )
        .unwrap();
        let stepper = Stepper::new(&net);
        let states = stepper.explore(100).expect("finite state space");
        assert_eq!(states.len(), 2);
    }
}
