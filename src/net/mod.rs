//! Petri net data model.
//!
//! Grounded on `ptnet.py::PetriNet` for the data shape and on
//! `MichaelOwenDyer-petrinets-rs`'s arena-of-handles architecture
//! (places/transitions owned by the net, referenced elsewhere only by
//! id — spec §9 Design Notes).

pub mod encode;
pub mod marking;
pub mod parser_net;
pub mod place;
pub mod pnml;
pub mod transition;

pub use marking::Marking;
pub use place::{normalize_identifier, Place, PlaceId};
pub use transition::{FiringGuard, RawArc, Transition, TransitionId};

use std::collections::BTreeMap;

/// The net itself: an arena of places and transitions plus the initial
/// marking. Every cross-reference (transition->place, formula->place) is
/// a [`PlaceId`]/[`TransitionId`] handle, never a back-pointer (spec §9).
#[derive(Debug, Clone)]
pub struct PetriNet {
    pub name: String,
    places: Vec<Place>,
    transitions: Vec<Transition>,
    place_index: BTreeMap<String, PlaceId>,
    transition_index: BTreeMap<String, TransitionId>,
    pub initial_marking: Marking,
    /// Present when a `.pnml` file supplied a NUPN toolspecific section
    /// (spec §6).
    pub nupn: Option<pnml::Nupn>,
}

impl PetriNet {
    pub fn new(name: impl Into<String>) -> Self {
        PetriNet {
            name: name.into(),
            places: Vec::new(),
            transitions: Vec::new(),
            place_index: BTreeMap::new(),
            transition_index: BTreeMap::new(),
            initial_marking: Marking::new(),
            nupn: None,
        }
    }

    pub fn add_place(&mut self, name: impl Into<String>) -> PlaceId {
        let name = name.into();
        if let Some(&id) = self.place_index.get(&name) {
            return id;
        }
        let id = PlaceId(self.places.len());
        self.places.push(Place::new(id, name.clone()));
        self.place_index.insert(name, id);
        id
    }

    pub fn add_transition(&mut self, name: impl Into<String>) -> TransitionId {
        let name = name.into();
        if let Some(&id) = self.transition_index.get(&name) {
            return id;
        }
        let id = TransitionId(self.transitions.len());
        self.transitions.push(Transition::new(id, name.clone()));
        self.transition_index.insert(name, id);
        id
    }

    pub fn place(&self, id: PlaceId) -> &Place {
        &self.places[id.0]
    }

    pub fn place_mut(&mut self, id: PlaceId) -> &mut Place {
        &mut self.places[id.0]
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.0]
    }

    pub fn transition_mut(&mut self, id: TransitionId) -> &mut Transition {
        &mut self.transitions[id.0]
    }

    pub fn place_id(&self, name: &str) -> Option<PlaceId> {
        self.place_index.get(name).copied()
    }

    pub fn transition_id(&self, name: &str) -> Option<TransitionId> {
        self.transition_index.get(name).copied()
    }

    pub fn place_name(&self, id: PlaceId) -> String {
        self.places[id.0].name.clone()
    }

    pub fn places(&self) -> impl Iterator<Item = &Place> {
        self.places.iter()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }

    pub fn place_count(&self) -> usize {
        self.places.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Re-derives `inputs`/`outputs`/`tests`/`delta` for every transition
    /// and the per-place `delta`/input/output-transition sets. Must be
    /// called once after all arcs have been added (by the `.net` parser),
    /// mirroring `ptnet.py`'s call to `normalize_flows` at the end of
    /// `parse_net`.
    pub fn finalize(&mut self) {
        for t in self.transitions.iter_mut() {
            t.normalize_flows();
        }
        for p in self.places.iter_mut() {
            p.delta.clear();
            p.input_transitions.clear();
            p.output_transitions.clear();
        }
        for t in &self.transitions {
            for (&p, &d) in &t.delta {
                self.places[p.0].delta.insert(t.id, d);
                if d > 0 {
                    self.places[p.0].input_transitions.push(t.id);
                } else {
                    self.places[p.0].output_transitions.push(t.id);
                }
            }
        }
    }

    /// Is `t` enabled at marking `m`? (GLOSSARY: `m >= pre(t)` for
    /// ordinary arcs, `m < |pre(t)|` for inhibitors.)
    pub fn is_enabled(&self, t: TransitionId, m: &Marking) -> bool {
        let t = self.transition(t);
        t.pre.iter().all(|(&p, &w)| {
            if w < 0 {
                m.get(p) < w.unsigned_abs()
            } else {
                m.get(p) >= w as u64
            }
        })
    }

    /// Fires `t` at `m`, returning the successor marking. Caller must
    /// have checked [`PetriNet::is_enabled`].
    pub fn fire(&self, t: TransitionId, m: &Marking) -> Marking {
        let t = self.transition(t);
        let mut next = m.clone();
        for (&p, &w) in &t.inputs {
            next.set(p, next.get(p).saturating_sub(w));
        }
        for (&p, &w) in &t.outputs {
            next.set(p, next.get(p) + w);
        }
        next
    }
}
