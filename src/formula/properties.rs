//! Properties-XML reader and the `deadlock` / `reachability` /
//! `quasi-liveness` formula generators (spec §4.3, §6).
//!
//! Grounded on `Formula.parse_xml` / `parse_simple_expression_xml` /
//! `generate_deadlock` / `generate_quasi_liveness` / `generate_reachability`
//! (original_source, `ptio/formula.py` lines ~331-489 and ~576-664), and on
//! `Properties.parse_xml` (same file, lines ~187-204) for the top-level
//! `<property>` loop.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{PnError, PnResult};
use crate::net::{normalize_identifier, PetriNet, PlaceId};

use super::ast::{CmpOp, Expr, Term};

/// Top-level connective of a property (spec §3: `Formula = (R, P,
/// property_tag, non_monotonic)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Finally,
    Globally,
}

/// One verification goal: the feared predicate `R`, its complement `P`,
/// the top-level property tag, and the monotonicity hint used by the
/// concurrent-places / IC3 saturation logic (spec §3, §4.3).
#[derive(Debug, Clone)]
pub struct Formula {
    pub r: Expr,
    pub p: Expr,
    pub property_def: PropertyKind,
    pub non_monotonic: bool,
}

/// One or more named formulas read from a properties file (spec §6).
#[derive(Debug, Clone, Default)]
pub struct Properties {
    pub entries: Vec<(Option<String>, Formula)>,
}

// --- a tiny generic XML tree, built once, then walked recursively ------

#[derive(Debug, Clone)]
struct XmlNode {
    tag: String,
    text: Option<String>,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

fn local(tag: &[u8]) -> String {
    let s = String::from_utf8_lossy(tag);
    match s.rfind('}') {
        Some(idx) => s[idx + 1..].to_string(),
        None => s.into_owned(),
    }
}

fn parse_xml_tree(path: &Path, text: &str) -> PnResult<Vec<XmlNode>> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut roots = Vec::new();
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| PnError::parse(path, format!("xml error: {e}")))?
        {
            Event::Start(e) => {
                let attrs = e
                    .attributes()
                    .flatten()
                    .map(|a| {
                        (
                            String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                            String::from_utf8_lossy(&a.value).into_owned(),
                        )
                    })
                    .collect();
                stack.push(XmlNode {
                    tag: local(e.local_name().as_ref()),
                    text: None,
                    attrs,
                    children: Vec::new(),
                });
            }
            Event::Empty(e) => {
                let attrs = e
                    .attributes()
                    .flatten()
                    .map(|a| {
                        (
                            String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                            String::from_utf8_lossy(&a.value).into_owned(),
                        )
                    })
                    .collect();
                let node = XmlNode {
                    tag: local(e.local_name().as_ref()),
                    text: None,
                    attrs,
                    children: Vec::new(),
                };
                push_child(&mut stack, &mut roots, node);
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let s = t.unescape().unwrap_or_default().into_owned();
                    if !s.trim().is_empty() {
                        top.text = Some(s);
                    }
                }
            }
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    push_child(&mut stack, &mut roots, node);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(roots)
}

fn push_child(stack: &mut [XmlNode], roots: &mut Vec<XmlNode>, node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else {
        roots.push(node);
    }
}

// --- parse_xml / parse_simple_expression_xml, transliterated ----------

struct FormulaParser<'n> {
    net: &'n PetriNet,
    property_def: Option<PropertyKind>,
    non_monotonic: bool,
}

impl<'n> FormulaParser<'n> {
    fn place_of(&self, text: &str) -> PnResult<PlaceId> {
        let name = normalize_identifier(text);
        self.net
            .place_id(&name)
            .ok_or_else(|| PnError::Solver(format!("unknown place `{name}` in properties file")))
    }

    fn transition_pre(&self, text: &str) -> PnResult<&crate::net::Transition> {
        let name = normalize_identifier(text);
        let id = self
            .net
            .transition_id(&name)
            .ok_or_else(|| PnError::Solver(format!("unknown transition `{name}` in properties file")))?;
        Ok(self.net.transition(id))
    }

    fn parse_simple_expression(&self, node: &XmlNode) -> PnResult<Term> {
        match node.tag.as_str() {
            "tokens-count" => {
                let places = node
                    .children
                    .iter()
                    .map(|c| self.place_of(c.text.as_deref().unwrap_or("")))
                    .collect::<PnResult<Vec<_>>>()?;
                Ok(Term::token_count(places))
            }
            "integer-constant" => {
                let v: i64 = node
                    .text
                    .as_deref()
                    .unwrap_or("0")
                    .trim()
                    .parse()
                    .map_err(|_| PnError::Solver("invalid integer-constant".to_string()))?;
                Ok(Term::IntegerConstant(v))
            }
            other => Err(PnError::Solver(format!("invalid simple-expression node `{other}`"))),
        }
    }

    fn parse_formula(&mut self, node: &XmlNode, negation: bool) -> PnResult<Option<Expr>> {
        match node.tag.as_str() {
            "exists-path" => {
                let child = &node.children[0];
                if child.tag == "finally" {
                    self.property_def = Some(PropertyKind::Finally);
                    let r = self
                        .parse_formula(&child.children[0], negation)?
                        .expect("finally child must produce an Expr");
                    return Ok(Some(r));
                }
                Err(PnError::Solver("exists-path requires a finally child".to_string()))
            }
            "all-paths" => {
                let child = &node.children[0];
                if child.tag == "globally" {
                    self.property_def = Some(PropertyKind::Globally);
                    let p = self
                        .parse_formula(&child.children[0], negation)?
                        .expect("globally child must produce an Expr");
                    return Ok(Some(p));
                }
                Err(PnError::Solver("all-paths requires a globally child".to_string()))
            }
            "deadlock" => Ok(Some(generate_deadlock(self.net))),
            "negation" | "conjunction" | "disjunction" => {
                let negation = negation ^ (node.tag == "negation");
                let operands = node
                    .children
                    .iter()
                    .map(|c| self.parse_formula(c, negation))
                    .collect::<PnResult<Vec<_>>>()?
                    .into_iter()
                    .map(|o| o.expect("boolean operand must produce an Expr"))
                    .collect();
                Ok(Some(match node.tag.as_str() {
                    "negation" => Expr::not(operands.into_iter().next().unwrap()),
                    "conjunction" => Expr::and(operands),
                    _ => Expr::or(operands),
                }))
            }
            "is-fireable" => {
                let mut clauses = Vec::new();
                for tr in &node.children {
                    let text = tr.text.as_deref().unwrap_or("");
                    let t = self.transition_pre(text)?;
                    let mut inequalities = Vec::new();
                    for (&p, &w) in &t.pre {
                        if w > 0 {
                            inequalities.push(Expr::atom(
                                Term::token_count(vec![p]),
                                CmpOp::Ge,
                                Term::IntegerConstant(w),
                            ));
                        } else {
                            inequalities.push(Expr::atom(
                                Term::token_count(vec![p]),
                                CmpOp::Lt,
                                Term::IntegerConstant(-w),
                            ));
                        }
                    }
                    clauses.push(match inequalities.len() {
                        0 => Expr::BooleanConstant(true),
                        1 => inequalities.into_iter().next().unwrap(),
                        _ => Expr::and(inequalities),
                    });
                }
                self.non_monotonic = true;
                Ok(Some(if clauses.len() == 1 {
                    clauses.into_iter().next().unwrap()
                } else {
                    Expr::or(clauses)
                }))
            }
            "integer-le" | "integer-ge" | "integer-eq" => {
                let left = self.parse_simple_expression(&node.children[0])?;
                let right = self.parse_simple_expression(&node.children[1])?;
                let op = match node.tag.as_str() {
                    "integer-le" => CmpOp::Le,
                    "integer-ge" => CmpOp::Ge,
                    _ => CmpOp::Eq,
                };

                let finally_monotonic = self.property_def == Some(PropertyKind::Finally)
                    && ((!negation && left.is_integer_constant() && right.is_token_count())
                        || (negation && left.is_token_count() && right.is_integer_constant()));
                let globally_monotonic = self.property_def == Some(PropertyKind::Globally)
                    && ((negation && left.is_integer_constant() && right.is_token_count())
                        || (!negation && left.is_token_count() && right.is_integer_constant()));
                if !(finally_monotonic || globally_monotonic) {
                    self.non_monotonic = true;
                }
                Ok(Some(Expr::atom(left, op, right)))
            }
            other => Err(PnError::Solver(format!("invalid formula node `{other}`"))),
        }
    }
}

/// Parses a properties-XML file into zero or more named [`Formula`]s
/// (spec §6: "one or more property entries, each having an id").
pub fn parse_properties_xml(path: &Path, net: &PetriNet) -> PnResult<Properties> {
    let text = std::fs::read_to_string(path)?;
    let roots = parse_xml_tree(path, &text)?;

    let mut entries = Vec::new();
    for root in &roots {
        let property_nodes: Vec<&XmlNode> = if root.tag == "property-set" {
            root.children.iter().filter(|c| c.tag == "property").collect()
        } else if root.tag == "property" {
            vec![root]
        } else {
            Vec::new()
        };

        for prop in property_nodes {
            let id = prop.attr("id").map(|s| s.to_string()).or_else(|| {
                prop.children
                    .iter()
                    .find(|c| c.tag == "id")
                    .and_then(|c| c.text.clone())
            });
            let formula_node = prop
                .children
                .iter()
                .find(|c| c.tag == "formula")
                .ok_or_else(|| PnError::parse(path, "property missing <formula>"))?;
            let top = formula_node
                .children
                .first()
                .ok_or_else(|| PnError::parse(path, "empty <formula>"))?;

            let mut parser = FormulaParser {
                net,
                property_def: None,
                non_monotonic: false,
            };
            let r = parser
                .parse_formula(top, false)
                .map_err(|e| PnError::parse(path, e.to_string()))?
                .ok_or_else(|| PnError::parse(path, "formula did not resolve to an expression"))?;
            let property_def = parser.property_def.unwrap_or(PropertyKind::Finally);
            let p = match property_def {
                PropertyKind::Finally => Expr::not(r.clone()),
                PropertyKind::Globally => Expr::not(r.clone()),
            };
            entries.push((
                id,
                Formula {
                    r,
                    p,
                    property_def,
                    non_monotonic: parser.non_monotonic,
                },
            ));
        }
    }

    Ok(Properties { entries })
}

/// `deadlock` generator (spec §4.3): R = AND over transitions of "some
/// pre-place is unmet", i.e. OR over pre-places of `Σp < pre(p)` (or
/// `Σp >= |pre(p)|` for inhibitors).
pub fn generate_deadlock(net: &PetriNet) -> Expr {
    let mut clauses = Vec::new();
    for t in net.transitions() {
        let mut inequalities = Vec::new();
        for (&p, &w) in &t.pre {
            if w > 0 {
                inequalities.push(Expr::atom(
                    Term::token_count(vec![p]),
                    CmpOp::Lt,
                    Term::IntegerConstant(w),
                ));
            } else {
                inequalities.push(Expr::atom(
                    Term::token_count(vec![p]),
                    CmpOp::Ge,
                    Term::IntegerConstant(-w),
                ));
            }
        }
        clauses.push(match inequalities.len() {
            0 => Expr::BooleanConstant(false),
            1 => inequalities.into_iter().next().unwrap(),
            _ => Expr::or(inequalities),
        });
    }
    Expr::and(clauses)
}

/// `reachability(marking)` generator (spec §4.3): R = AND of `p >= m(p)`
/// over the specified places.
pub fn generate_reachability(marking: &[(PlaceId, u64)]) -> Expr {
    let clauses = marking
        .iter()
        .map(|&(p, tokens)| {
            Expr::atom(
                Term::token_count(vec![p]),
                CmpOp::Ge,
                Term::IntegerConstant(tokens as i64),
            )
        })
        .collect();
    Expr::and(clauses)
}

/// `quasi-liveness(transitions)` generator (spec's dropped-but-kept
/// feature, grounded on `generate_quasi_liveness`, lines ~613-645): R =
/// OR over the named transitions of "enabled", i.e. AND over pre-places
/// of `Σp >= pre(p)` (or `Σp < |pre(p)|` for inhibitors). Reachable from
/// `--quasi-liveness` in `src/bin/pnreach.rs`, the same way the
/// original exposes it directly to a caller rather than through the
/// properties-XML grammar.
pub fn generate_quasi_liveness(net: &PetriNet, transitions: &[crate::net::TransitionId]) -> Expr {
    let mut clauses = Vec::new();
    for &tid in transitions {
        let t = net.transition(tid);
        let mut inequalities = Vec::new();
        for (&p, &w) in &t.pre {
            if w > 0 {
                inequalities.push(Expr::atom(
                    Term::token_count(vec![p]),
                    CmpOp::Ge,
                    Term::IntegerConstant(w),
                ));
            } else {
                inequalities.push(Expr::atom(
                    Term::token_count(vec![p]),
                    CmpOp::Lt,
                    Term::IntegerConstant(-w),
                ));
            }
        }
        clauses.push(match inequalities.len() {
            0 => Expr::BooleanConstant(true),
            1 => inequalities.into_iter().next().unwrap(),
            _ => Expr::and(inequalities),
        });
    }
    Expr::or(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::parser_net::parse_net_str;
    use std::path::PathBuf;

    #[test]
    fn s1_deadlock_generator_false_on_live_net() {
        let net = parse_net_str(&PathBuf::from("t.net"), "net n\npl p (1)\npl q (0)\ntr t p -> q\n").unwrap();
        let r = generate_deadlock(&net);
        let mut m = net.initial_marking.clone();
        // At m0 = {p:1}, t is enabled (p >= 1), so R (deadlock) is false.
        assert!(!r.dnf().eval(&m));
        // Firing t leaves {q:1}, with no enabled transition: deadlock.
        m.set(net.place_id("p").unwrap(), 0);
        m.set(net.place_id("q").unwrap(), 1);
        assert!(r.dnf().eval(&m));
    }

    #[test]
    fn quasi_liveness_generator_is_true_once_any_transition_is_enabled() {
        let net = parse_net_str(&PathBuf::from("t.net"), "net n\npl p (0)\npl q (1)\ntr t1 p -> \ntr t2 q -> \n").unwrap();
        let t1 = net.transition_id("t1").unwrap();
        let t2 = net.transition_id("t2").unwrap();
        let r = generate_quasi_liveness(&net, &[t1, t2]);
        // t1 needs p >= 1 (false at m0), t2 needs q >= 1 (true at m0).
        assert!(r.eval(&net.initial_marking));
        assert!(!generate_quasi_liveness(&net, &[t1]).eval(&net.initial_marking));
    }

    #[test]
    fn s2_reachability_generator() {
        let net = parse_net_str(&PathBuf::from("t.net"), "net n\npl p (0)\ntr t -> p\n").unwrap();
        let p = net.place_id("p").unwrap();
        let r = generate_reachability(&[(p, 1)]);
        assert!(!r.eval(&net.initial_marking));
        let reached = net.fire(net.transition_id("t").unwrap(), &net.initial_marking);
        assert!(r.eval(&reached));
    }
}
