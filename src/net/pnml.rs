//! `.pnml` name/id mapping and NUPN (nested-unit Petri net) reader.
//!
//! Grounded on `ptnet.py::ids_mapping` and `ptnet.py::NUPN`/`Unit`
//! (original_source, lines ~170-186 and ~753-923). Uses `quick-xml`
//! the way the teacher (petrinets-rs) reads its own XML inputs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{PnError, PnResult};

use super::PetriNet;

/// Maps PNML `id` attributes to the textual names used elsewhere in this
/// crate, with the same `#`/`,` normalization as `.net` identifiers
/// (spec §6).
#[derive(Debug, Clone, Default)]
pub struct PnmlMapping {
    pub places: BTreeMap<String, String>,
    pub transitions: BTreeMap<String, String>,
}

pub fn parse_pnml_mapping(path: &Path) -> PnResult<PnmlMapping> {
    let text = std::fs::read_to_string(path)?;
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut mapping = PnmlMapping::default();
    let mut stack: Vec<String> = Vec::new();
    let mut current_id: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| {
            PnError::parse(path, format!("xml error: {e}"))
        })? {
            Event::Start(e) | Event::Empty(e) => {
                let local = local_name(&e);
                if local == "place" || local == "transition" {
                    current_id = find_attr(&e, "id");
                    stack.push(local);
                } else if local == "name" {
                    stack.push(local);
                }
            }
            Event::Text(t) => {
                if stack.last().map(String::as_str) == Some("name") {
                    if let Some(id) = &current_id {
                        let raw = t.unescape().unwrap_or_default().into_owned();
                        let normalized = super::place::normalize_identifier(&raw);
                        if stack.iter().any(|s| s == "place") {
                            mapping.places.insert(id.clone(), normalized);
                        } else if stack.iter().any(|s| s == "transition") {
                            mapping.transitions.insert(id.clone(), normalized);
                        }
                    }
                }
            }
            Event::End(e) => {
                let local = local_name(&e);
                if local == "name" || local == "place" || local == "transition" {
                    if let Some(pos) = stack.iter().rposition(|s| s == &local) {
                        stack.truncate(pos);
                    }
                }
                if local == "place" || local == "transition" {
                    current_id = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(mapping)
}

fn local_name(e: &quick_xml::events::BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn find_attr(e: &quick_xml::events::BytesStart, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == key.as_bytes() {
            Some(String::from_utf8_lossy(&a.value).into_owned())
        } else {
            None
        }
    })
}

/// A NUPN unit: an id, a set of local places, and a set of subunits
/// (spec §6, grounded on `ptnet.py::Unit`).
#[derive(Debug, Clone, Default)]
pub struct Unit {
    pub id: String,
    pub places: BTreeSet<String>,
    pub subunits: BTreeSet<String>,
}

/// Nested-unit Petri net toolspecific section: the unit-safe pragma, the
/// root unit id, and the full unit tree (spec §6, GLOSSARY "NUPN").
#[derive(Debug, Clone, Default)]
pub struct Nupn {
    pub unit_safe: bool,
    pub root: Option<String>,
    pub units: BTreeMap<String, Unit>,
}

impl Nupn {
    fn get_or_create(&mut self, id: &str) -> &mut Unit {
        self.units.entry(id.to_string()).or_insert_with(|| Unit {
            id: id.to_string(),
            ..Default::default()
        })
    }

    /// Hierarchical paths from leaf units (that carry places) up to the
    /// root, used to assert unit-safety as a sum-at-most-1 constraint
    /// (mirrors `Unit::compute_paths`).
    pub fn paths_from(&self, unit_id: &str) -> Vec<Vec<String>> {
        let Some(unit) = self.units.get(unit_id) else {
            return vec![vec![]];
        };
        if unit.subunits.is_empty() {
            return if unit.places.is_empty() {
                vec![vec![]]
            } else {
                vec![vec![unit.id.clone()]]
            };
        }
        let mut paths: Vec<Vec<String>> = unit
            .subunits
            .iter()
            .flat_map(|s| self.paths_from(s))
            .collect();
        if !unit.places.is_empty() {
            for path in paths.iter_mut() {
                path.push(unit.id.clone());
            }
        }
        paths
    }

    pub fn root_paths(&self) -> Vec<Vec<String>> {
        match &self.root {
            Some(root) => self.paths_from(root),
            None => Vec::new(),
        }
    }

    /// Rewrites every unit's `<places>` entries from raw PNML ids to the
    /// names `mapping` resolves them to, falling back to the raw id when
    /// `mapping` has no entry for it (e.g. a `.pnml` file that already
    /// lists plain `.net`-style names inside `<places>`). Must run
    /// before [`Nupn::smtlib_unit_safety_constraints`] is ever called,
    /// since that method looks places up by name against the checked
    /// [`PetriNet`].
    pub fn resolve_place_names(&mut self, mapping: &PnmlMapping) {
        for unit in self.units.values_mut() {
            unit.places = unit
                .places
                .iter()
                .map(|id| mapping.places.get(id).cloned().unwrap_or_else(|| id.clone()))
                .collect();
        }
    }

    /// Emits the unit-safe pragma's constraints (spec §6, GLOSSARY
    /// "NUPN"): every root-to-leaf chain [`Nupn::root_paths`] exposes
    /// names a set of directly-place-owning units that, taken together,
    /// model a single sequential component — the pragma pledges that
    /// component never holds more than one token at once. One
    /// `(<= (+ ...) 1)` is asserted per chain with more than one
    /// resolved place; a place name the chain names but the checked net
    /// doesn't declare (a stale or mismatched `.pnml` mapping) is
    /// skipped rather than failing the whole run over it. Returns the
    /// empty string when this NUPN section isn't marked `unit_safe`.
    pub fn smtlib_unit_safety_constraints(&self, net: &PetriNet, k: Option<u32>) -> String {
        if !self.unit_safe {
            return String::new();
        }
        let mut out = String::new();
        for path in self.root_paths() {
            if path.is_empty() {
                continue;
            }
            let mut ids: BTreeSet<super::PlaceId> = BTreeSet::new();
            for unit_id in &path {
                if let Some(unit) = self.units.get(unit_id) {
                    for place_name in &unit.places {
                        if let Some(pid) = net.place_id(place_name) {
                            ids.insert(pid);
                        }
                    }
                }
            }
            if ids.len() > 1 {
                let terms: Vec<String> = ids.iter().map(|&p| net.place(p).smtlib_id(k)).collect();
                let _ = writeln!(out, "(assert (<= (+ {}) 1))", terms.join(" "));
            }
        }
        out
    }
}

/// Parses the `<toolspecific>` NUPN structure from a `.pnml` file, if
/// present. Returns `Ok(None)` when the file carries no NUPN section
/// (mirrors `NUPN.parse_pnml`'s early return when `structure is None`).
pub fn parse_nupn(path: &Path) -> PnResult<Option<Nupn>> {
    let text = std::fs::read_to_string(path)?;
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut nupn = Nupn::default();
    let mut found_structure = false;
    let mut in_unit: Option<String> = None;
    let mut in_places = false;
    let mut in_subunits = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| {
            PnError::parse(path, format!("xml error: {e}"))
        })? {
            Event::Start(e) | Event::Empty(e) => {
                let local = local_name(&e);
                match local.as_str() {
                    "structure" => {
                        if let Some(safe) = find_attr(&e, "safe") {
                            found_structure = true;
                            nupn.unit_safe = safe == "true";
                            if let Some(root) = find_attr(&e, "root") {
                                nupn.root = Some(root.clone());
                                nupn.get_or_create(&root);
                            }
                        }
                    }
                    "unit" => {
                        if let Some(id) = find_attr(&e, "id") {
                            nupn.get_or_create(&id);
                            in_unit = Some(id);
                        }
                    }
                    "places" => in_places = true,
                    "subunits" => in_subunits = true,
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some(unit_id) = &in_unit {
                    let raw = t.unescape().unwrap_or_default().into_owned();
                    if in_places {
                        let places: BTreeSet<String> = raw
                            .split_whitespace()
                            .map(super::place::normalize_identifier)
                            .collect();
                        nupn.get_or_create(unit_id).places = places;
                    } else if in_subunits {
                        let subunits: BTreeSet<String> =
                            raw.split_whitespace().map(|s| s.to_string()).collect();
                        for sub in &subunits {
                            nupn.get_or_create(sub);
                        }
                        nupn.get_or_create(unit_id).subunits = subunits;
                    }
                }
            }
            Event::End(e) => match local_name(&e).as_str() {
                "unit" => in_unit = None,
                "places" => in_places = false,
                "subunits" => in_subunits = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !found_structure || !nupn.unit_safe {
        return Ok(if found_structure { Some(nupn) } else { None });
    }
    Ok(Some(nupn))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_single_leaf_unit() {
        let mut n = Nupn::default();
        n.root = Some("root".into());
        let mut root = Unit {
            id: "root".into(),
            ..Default::default()
        };
        root.places.insert("p0".into());
        n.units.insert("root".into(), root);
        assert_eq!(n.root_paths(), vec![vec!["root".to_string()]]);
    }

    #[test]
    fn paths_nested_units_append_parent() {
        let mut n = Nupn::default();
        n.root = Some("u0".into());
        let mut leaf = Unit {
            id: "u1".into(),
            ..Default::default()
        };
        leaf.places.insert("p0".into());
        let mut root = Unit {
            id: "u0".into(),
            ..Default::default()
        };
        root.subunits.insert("u1".into());
        n.units.insert("u0".into(), root);
        n.units.insert("u1".into(), leaf);
        let paths = n.root_paths();
        assert_eq!(paths, vec![vec!["u1".to_string(), "u0".to_string()]]);
    }

    #[test]
    fn resolve_place_names_falls_back_to_raw_id() {
        let mut n = Nupn::default();
        let mut u = Unit {
            id: "u0".into(),
            ..Default::default()
        };
        u.places.insert("id0".into());
        u.places.insert("already-a-name".into());
        n.units.insert("u0".into(), u);

        let mut mapping = PnmlMapping::default();
        mapping.places.insert("id0".into(), "p0".into());
        n.resolve_place_names(&mapping);

        let resolved = &n.units["u0"].places;
        assert!(resolved.contains("p0"));
        assert!(resolved.contains("already-a-name"));
    }

    #[test]
    fn unit_safety_constraint_sums_a_single_leaf_chain() {
        let mut net = PetriNet::new("n");
        net.add_place("p0");
        net.add_place("p1");

        let mut n = Nupn {
            unit_safe: true,
            root: Some("root".into()),
            ..Default::default()
        };
        let mut root = Unit {
            id: "root".into(),
            ..Default::default()
        };
        root.places.insert("p0".into());
        root.places.insert("p1".into());
        n.units.insert("root".into(), root);

        let smt = n.smtlib_unit_safety_constraints(&net, Some(0));
        assert!(smt.contains("(assert (<= (+ p0@0 p1@0) 1))"));
    }

    #[test]
    fn unit_safety_constraint_empty_when_not_marked_safe() {
        let net = PetriNet::new("n");
        let n = Nupn {
            unit_safe: false,
            root: None,
            units: BTreeMap::new(),
        };
        assert_eq!(n.smtlib_unit_safety_constraints(&net, Some(0)), "");
    }
}
