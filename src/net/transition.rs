//! Transitions and arc normalization.
//!
//! Grounded on `ptnet.py::Transition` (original_source, lines ~700-946):
//! a transition stores `pre`/`post` as parsed, then `normalize_flows`
//! derives `inputs`/`outputs`/`tests`/`delta` from them per spec §3's
//! invariant.

use std::collections::BTreeMap;

use derive_more::Display;

use super::place::PlaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display(fmt = "t{}", _0)]
pub struct TransitionId(pub usize);

/// An arc weight as read from `.net`/`.pnml`, before normalization.
/// Inhibitor arcs are represented as a negative `pre` weight (spec §6:
/// `p?-w` suffix), matching `ptnet.py::parse_arc`'s sign convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawArc {
    /// Plain or weighted input arc, `p` or `p*w`.
    Pre(u64),
    /// Inhibitor arc, `p?-w`.
    Inhibitor(u64),
    /// Test (read) arc, `p?w`: an input arc with no consuming effect
    /// beyond the shared pre/post quadrilateral below.
    Test(u64),
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub id: TransitionId,
    pub name: String,
    pub label: Option<String>,

    /// Firing threshold per place, signed: positive ordinary arcs,
    /// negative inhibitor arcs (magnitude is the inhibitor threshold).
    pub pre: BTreeMap<PlaceId, i64>,
    /// Tokens produced per place on firing.
    pub post: BTreeMap<PlaceId, u64>,

    /// Derived by [`Transition::normalize_flows`].
    pub inputs: BTreeMap<PlaceId, u64>,
    pub outputs: BTreeMap<PlaceId, u64>,
    pub tests: BTreeMap<PlaceId, u64>,
    pub delta: BTreeMap<PlaceId, i64>,
}

impl Transition {
    pub fn new(id: TransitionId, name: impl Into<String>) -> Self {
        Transition {
            id,
            name: name.into(),
            label: None,
            pre: BTreeMap::new(),
            post: BTreeMap::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            tests: BTreeMap::new(),
            delta: BTreeMap::new(),
        }
    }

    /// Every place that appears in any arc incident to this transition
    /// (spec §3: `connected_places`).
    pub fn connected_places(&self) -> impl Iterator<Item = PlaceId> + '_ {
        let mut ids: Vec<PlaceId> = self
            .pre
            .keys()
            .copied()
            .chain(self.post.keys().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter()
    }

    /// Derives `inputs`/`outputs`/`tests`/`delta` from `pre`/`post`, per
    /// spec §3's transition invariant (mirrors `ptnet.py::normalize_flows`,
    /// lines ~643-692):
    ///
    /// for each place `p`: let `pre = pre(t,p)` (only the positive,
    /// non-inhibitor part participates here — inhibitors never combine
    /// with a post weight) and `post = post(t,p)`.
    ///
    /// - if both `pre > 0` and `post > 0`: `tests[p] = min(pre, post)`,
    ///   `delta[p] = post - pre`, `inputs[p] = max(0, pre - post)`,
    ///   `outputs[p] = max(0, post - pre)`.
    /// - else if `pre > 0`: `inputs[p] = pre`, `delta[p] = -pre`.
    /// - else if `post > 0`: `outputs[p] = post`, `delta[p] = post`.
    ///
    /// Inhibitor entries (`pre(t,p) < 0`) never contribute to
    /// inputs/outputs/delta: they only gate firing (spec §4.2).
    pub fn normalize_flows(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
        self.tests.clear();
        self.delta.clear();

        for p in self.connected_places() {
            let pre = self.pre.get(&p).copied().unwrap_or(0);
            let post = self.post.get(&p).copied().unwrap_or(0) as i64;

            if pre < 0 {
                // Inhibitor: no token-flow contribution.
                continue;
            }

            match (pre > 0, post > 0) {
                (true, true) => {
                    let test = pre.min(post) as u64;
                    if test > 0 {
                        self.tests.insert(p, test);
                    }
                    let delta = post - pre;
                    if delta != 0 {
                        self.delta.insert(p, delta);
                    }
                    let inputs = (pre - post).max(0) as u64;
                    if inputs > 0 {
                        self.inputs.insert(p, inputs);
                    }
                    let outputs = (post - pre).max(0) as u64;
                    if outputs > 0 {
                        self.outputs.insert(p, outputs);
                    }
                }
                (true, false) => {
                    self.inputs.insert(p, pre as u64);
                    self.delta.insert(p, -pre);
                }
                (false, true) => {
                    self.outputs.insert(p, post as u64);
                    self.delta.insert(p, post);
                }
                (false, false) => {}
            }
        }
    }

    /// Threshold for place `p` to enable this transition: ordinary arcs
    /// require `m(p) >= pre(p)`; inhibitors require `m(p) < |pre(p)|`.
    pub fn firing_guard(&self, place: PlaceId) -> Option<FiringGuard> {
        self.pre.get(&place).map(|&w| {
            if w < 0 {
                FiringGuard::Inhibitor(w.unsigned_abs())
            } else {
                FiringGuard::AtLeast(w as u64)
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringGuard {
    AtLeast(u64),
    Inhibitor(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t_with(pre: &[(usize, i64)], post: &[(usize, u64)]) -> Transition {
        let mut t = Transition::new(TransitionId(0), "t0");
        for &(p, w) in pre {
            t.pre.insert(PlaceId(p), w);
        }
        for &(p, w) in post {
            t.post.insert(PlaceId(p), w);
        }
        t.normalize_flows();
        t
    }

    #[test]
    fn pure_consumer_is_input_only() {
        let t = t_with(&[(0, 2)], &[]);
        assert_eq!(t.inputs.get(&PlaceId(0)), Some(&2));
        assert!(t.outputs.is_empty());
        assert!(t.tests.is_empty());
        assert_eq!(t.delta.get(&PlaceId(0)), Some(&-2));
    }

    #[test]
    fn pure_producer_is_output_only() {
        let t = t_with(&[], &[(0, 3)]);
        assert_eq!(t.outputs.get(&PlaceId(0)), Some(&3));
        assert_eq!(t.delta.get(&PlaceId(0)), Some(&3));
    }

    #[test]
    fn shared_place_splits_into_test_and_residual() {
        // pre=3, post=1 on the same place: test=min(3,1)=1, inputs=2, outputs=0.
        let t = t_with(&[(0, 3)], &[(0, 1)]);
        assert_eq!(t.tests.get(&PlaceId(0)), Some(&1));
        assert_eq!(t.inputs.get(&PlaceId(0)), Some(&2));
        assert!(!t.outputs.contains_key(&PlaceId(0)));
        assert_eq!(t.delta.get(&PlaceId(0)), Some(&-2));
    }

    #[test]
    fn invariant_inputs_minus_outputs_equals_negated_delta() {
        for (pre, post) in [(3_i64, 1_u64), (1, 3), (2, 2), (0, 5), (5, 0)] {
            let t = t_with(&[(0, pre)], &[(0, post)]);
            let inputs = *t.inputs.get(&PlaceId(0)).unwrap_or(&0) as i64;
            let outputs = *t.outputs.get(&PlaceId(0)).unwrap_or(&0) as i64;
            let delta = *t.delta.get(&PlaceId(0)).unwrap_or(&0);
            assert_eq!(inputs - outputs, -delta, "pre={pre} post={post}");
        }
    }

    #[test]
    fn inhibitor_contributes_no_flow() {
        let t = t_with(&[(0, -1)], &[]);
        assert!(t.inputs.is_empty() && t.outputs.is_empty() && t.delta.is_empty());
        assert_eq!(t.firing_guard(PlaceId(0)), Some(FiringGuard::Inhibitor(1)));
    }
}
