//! Places.
//!
//! Grounded on `ptnet.py::Place` (original_source): an identifier, an
//! initial marking, and — only needed once state-equation emission is
//! requested — the per-transition delta map plus the sets of incident
//! transitions used by [`Transition::normalize_flows`].

use std::collections::BTreeMap;

use derive_more::Display;

use super::TransitionId;

/// Stable handle into [`crate::net::PetriNet::places`]. Places are owned by
/// the arena; every other structure refers to them by index, never by
/// reference, so the net can be freely moved and shared across portfolio
/// workers (spec §3, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display(fmt = "p{}", _0)]
pub struct PlaceId(pub usize);

/// A place: identifier, initial marking, and the bookkeeping needed for
/// state-equation emission (spec §3, §4.2).
#[derive(Debug, Clone)]
pub struct Place {
    pub id: PlaceId,
    /// SMT-LIB-safe identifier (`#`, `,`, `{`, `}` already stripped/normalized
    /// at parse time, spec §3).
    pub name: String,
    pub initial_marking: u64,
    /// Signed per-transition contribution to this place's token count,
    /// populated by `Transition::normalize_flows` for every transition
    /// that touches this place.
    pub delta: BTreeMap<TransitionId, i64>,
    /// Transitions that can add tokens to this place.
    pub input_transitions: Vec<TransitionId>,
    /// Transitions that can remove tokens from this place.
    pub output_transitions: Vec<TransitionId>,
}

impl Place {
    pub fn new(id: PlaceId, name: impl Into<String>) -> Self {
        Place {
            id,
            name: name.into(),
            initial_marking: 0,
            delta: BTreeMap::new(),
            input_transitions: Vec::new(),
            output_transitions: Vec::new(),
        }
    }

    /// SMT-LIB identifier for this place, optionally suffixed with an
    /// unrolling order `p@k` (spec §4.2, §6).
    pub fn smtlib_id(&self, order: Option<u32>) -> String {
        match order {
            Some(k) => format!("{}@{}", self.name, k),
            None => self.name.clone(),
        }
    }
}

/// Normalizes a raw identifier read from `.net`/`.pnml` input per spec §3:
/// `#` and `,` are forbidden in SMT-LIB symbols and become `.`; `{` and `}`
/// are simply stripped. Mirrors `ptnet.py::parse_net`'s
/// `.replace('#', '.').replace(',', '.')` plus the `{`/`}` stripping done
/// per-token in `parse_transition`/`parse_place`/`parse_arc`.
pub fn normalize_identifier(raw: &str) -> String {
    raw.replace('#', ".")
        .replace(',', ".")
        .replace('{', "")
        .replace('}', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_forbidden_characters() {
        assert_eq!(normalize_identifier("p#1,2{x}"), "p.1.2x");
    }

    #[test]
    fn smtlib_id_without_order_is_bare_name() {
        let p = Place::new(PlaceId(0), "p0");
        assert_eq!(p.smtlib_id(None), "p0");
        assert_eq!(p.smtlib_id(Some(3)), "p0@3");
    }
}
