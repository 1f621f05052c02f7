//! Markings.
//!
//! Grounded on `ptnet.py::Marking` (original_source) and, for display
//! style, `solver.py::Solver.display_model` ("p1(2) p3(1)" / "empty
//! marking").

use std::collections::BTreeMap;

use super::place::PlaceId;

/// A total map place -> token count. Comparison and arithmetic are
/// componentwise (spec §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Marking(pub BTreeMap<PlaceId, u64>);

impl Marking {
    pub fn new() -> Self {
        Marking(BTreeMap::new())
    }

    pub fn get(&self, place: PlaceId) -> u64 {
        self.0.get(&place).copied().unwrap_or(0)
    }

    pub fn set(&mut self, place: PlaceId, tokens: u64) {
        if tokens == 0 {
            self.0.remove(&place);
        } else {
            self.0.insert(place, tokens);
        }
    }

    /// `m >= other` componentwise (used for the "covers" check in several
    /// engines' edge cases).
    pub fn covers(&self, other: &Marking) -> bool {
        other.0.iter().all(|(p, &w)| self.get(*p) >= w)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|&t| t == 0)
    }
}

impl Marking {
    /// Renders this marking as a witness in the style of
    /// `solver.py::display_model`: `"p1(2) p3(1)"`, or `"empty marking"` if
    /// every place is zero. `name_of` resolves a place id to its textual
    /// name, typically `PetriNet::place_name`.
    pub fn display_with(&self, name_of: impl Fn(PlaceId) -> String) -> String {
        let mut parts = Vec::new();
        for (&p, &tokens) in self.0.iter() {
            if tokens > 0 {
                parts.push(format!("{}({})", name_of(p), tokens));
            }
        }
        if parts.is_empty() {
            "empty marking".to_string()
        } else {
            parts.join(" ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_marking_displays_as_empty() {
        let m = Marking::new();
        assert_eq!(m.display_with(|_p| "p?".to_string()), "empty marking");
    }

    #[test]
    fn nonzero_marking_lists_positive_places() {
        let mut m = Marking::new();
        m.set(PlaceId(0), 2);
        m.set(PlaceId(1), 0);
        m.set(PlaceId(2), 1);
        let name_of = |p: PlaceId| {
            match p.0 {
                0 => "p1",
                2 => "p3",
                _ => "?",
            }
            .to_string()
        };
        assert_eq!(m.display_with(name_of), "p1(2) p3(1)");
    }

    #[test]
    fn covers_is_componentwise() {
        let mut a = Marking::new();
        a.set(PlaceId(0), 3);
        let mut b = Marking::new();
        b.set(PlaceId(0), 2);
        assert!(a.covers(&b));
        assert!(!b.covers(&a));
    }
}
