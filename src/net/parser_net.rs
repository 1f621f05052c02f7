//! `.net` textual format parser (Tina syntax, spec §6).
//!
//! Grounded on `ptnet.py::parse_net` / `parse_transition` / `parse_arc` /
//! `parse_place` / `parse_label` / `parse_value` (original_source, lines
//! ~200-420).

use std::path::Path;

use crate::error::{PnError, PnResult};

use super::place::normalize_identifier;
use super::{PetriNet, PlaceId};

/// Parses the contents of a `.net` file into a [`PetriNet`].
///
/// Grammar (spec §6): `net <id>`, `pl <id> (<marking>)`,
/// `tr <id> [: <label>] <pre-arcs> -> <post-arcs>`. Arc tokens are
/// `p`, `p*w` (weighted), `p?w` (test), `p?-w` (inhibitor). Integer
/// literals may carry a `K`/`M` suffix (x1000 / x1_000_000).
pub fn parse_net_str(path: &Path, text: &str) -> PnResult<PetriNet> {
    let mut net = PetriNet::new(
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "net".to_string()),
    );

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let keyword = tokens.next().unwrap();
        let rest: Vec<&str> = tokens.collect();

        match keyword {
            "net" => {
                if let Some(&id) = rest.first() {
                    net.name = normalize_identifier(id);
                }
            }
            "pl" => parse_place_line(&mut net, &rest, path, lineno)?,
            "tr" => parse_transition_line(&mut net, &rest, line, path, lineno)?,
            _ => {
                return Err(PnError::parse(
                    path,
                    format!("line {}: unknown keyword `{keyword}`", lineno + 1),
                ))
            }
        }
    }

    net.finalize();
    Ok(net)
}

fn strip_comment(line: &str) -> &str {
    match line.find('%') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_place_line(net: &mut PetriNet, rest: &[&str], path: &Path, lineno: usize) -> PnResult<()> {
    let id = rest.first().ok_or_else(|| {
        PnError::parse(path, format!("line {}: `pl` missing identifier", lineno + 1))
    })?;
    let name = normalize_identifier(id);
    let place = net.add_place(name);

    // Initial marking is given in a parenthesized group, e.g. `(3)`.
    let rejoined = rest[1..].join(" ");
    if let Some(marking_text) = extract_parenthesized(&rejoined) {
        let tokens = parse_integer_value(marking_text.trim(), path, lineno)?;
        net.place_mut(place).initial_marking = tokens;
        net.initial_marking.set(place, tokens);
    }
    Ok(())
}

fn parse_transition_line(
    net: &mut PetriNet,
    rest: &[&str],
    _original_line: &str,
    path: &Path,
    lineno: usize,
) -> PnResult<()> {
    let mut tokens = rest.iter().copied();
    let id = tokens.next().ok_or_else(|| {
        PnError::parse(path, format!("line {}: `tr` missing identifier", lineno + 1))
    })?;
    let name = normalize_identifier(id);
    let transition = net.add_transition(name);

    // Optional `: label` token (spec §6: `tr <id> [: <label>] ...`).
    let mut peeked = tokens.next();
    let mut label = None;
    if peeked == Some(":") {
        label = tokens.next().map(|s| s.to_string());
        peeked = tokens.next();
    } else if let Some(tok) = peeked {
        if let Some(stripped) = tok.strip_prefix(':') {
            label = Some(stripped.to_string());
            peeked = tokens.next();
        }
    }
    net.transition_mut(transition).label = label;

    // Remaining tokens: `<pre-arcs...> -> <post-arcs...>`.
    let mut pre_tokens = Vec::new();
    let mut post_tokens = Vec::new();
    let mut seen_arrow = false;
    let mut cursor = peeked;
    loop {
        match cursor {
            Some("->") => {
                seen_arrow = true;
            }
            Some(tok) => {
                if seen_arrow {
                    post_tokens.push(tok);
                } else {
                    pre_tokens.push(tok);
                }
            }
            None => break,
        }
        cursor = tokens.next();
    }
    if !seen_arrow {
        return Err(PnError::parse(
            path,
            format!("line {}: transition missing `->`", lineno + 1),
        ));
    }

    for token in pre_tokens {
        let (place_name, kind) = parse_arc_token(token, path, lineno)?;
        let place = net.add_place(normalize_identifier(&place_name));
        apply_pre_arc(net, transition, place, kind);
    }
    for token in post_tokens {
        let (place_name, weight) = parse_post_arc_token(token, path, lineno)?;
        let place = net.add_place(normalize_identifier(&place_name));
        let t = net.transition_mut(transition);
        *t.post.entry(place).or_insert(0) += weight;
    }
    Ok(())
}

enum ArcKind {
    Ordinary(u64),
    Test(u64),
    Inhibitor(u64),
}

/// A test (read) arc has no net effect on the place: `ptnet.py` models it
/// as contributing the same weight to both `pre` and `post`, so
/// `normalize_flows` resolves it to `tests[p] = w`, `delta[p] = 0` (spec
/// §3's transition invariant for the both-positive case).
fn apply_pre_arc(net: &mut PetriNet, transition: super::TransitionId, place: PlaceId, kind: ArcKind) {
    let t = net.transition_mut(transition);
    match kind {
        ArcKind::Ordinary(w) => {
            *t.pre.entry(place).or_insert(0) += w as i64;
        }
        ArcKind::Test(w) => {
            *t.pre.entry(place).or_insert(0) += w as i64;
            *t.post.entry(place).or_insert(0) += w;
        }
        ArcKind::Inhibitor(w) => {
            t.pre.insert(place, -(w as i64));
        }
    }
}

/// Parses one pre-arc token: `p`, `p*w`, `p?w` (test), `p?-w` (inhibitor).
fn parse_arc_token(token: &str, path: &Path, lineno: usize) -> PnResult<(String, ArcKind)> {
    if let Some(idx) = token.find("?-") {
        let (name, weight) = token.split_at(idx);
        let weight = &weight[2..];
        let w = if weight.is_empty() {
            1
        } else {
            parse_integer_value(weight, path, lineno)?
        };
        return Ok((name.to_string(), ArcKind::Inhibitor(w)));
    }
    if let Some(idx) = token.find('?') {
        let (name, weight) = token.split_at(idx);
        let weight = &weight[1..];
        let w = if weight.is_empty() {
            1
        } else {
            parse_integer_value(weight, path, lineno)?
        };
        return Ok((name.to_string(), ArcKind::Test(w)));
    }
    if let Some(idx) = token.find('*') {
        let (name, weight) = token.split_at(idx);
        let weight = &weight[1..];
        let w = parse_integer_value(weight, path, lineno)?;
        return Ok((name.to_string(), ArcKind::Ordinary(w)));
    }
    Ok((token.to_string(), ArcKind::Ordinary(1)))
}

fn parse_post_arc_token(token: &str, path: &Path, lineno: usize) -> PnResult<(String, u64)> {
    if let Some(idx) = token.find('*') {
        let (name, weight) = token.split_at(idx);
        let w = parse_integer_value(&weight[1..], path, lineno)?;
        Ok((name.to_string(), w))
    } else {
        Ok((token.to_string(), 1))
    }
}

/// Parses an integer literal carrying an optional `K` (x1000) or `M`
/// (x1,000,000) suffix (spec §6).
fn parse_integer_value(text: &str, path: &Path, lineno: usize) -> PnResult<u64> {
    let text = text.trim();
    let (digits, factor) = if let Some(d) = text.strip_suffix('K') {
        (d, 1_000)
    } else if let Some(d) = text.strip_suffix('M') {
        (d, 1_000_000)
    } else {
        (text, 1)
    };
    digits
        .parse::<u64>()
        .map(|v| v * factor)
        .map_err(|e| PnError::parse(path, format!("line {}: {e}", lineno + 1)))
}

fn extract_parenthesized(text: &str) -> Option<&str> {
    let start = text.find('(')?;
    let end = text.rfind(')')?;
    if end > start {
        Some(&text[start + 1..end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(text: &str) -> PetriNet {
        parse_net_str(&PathBuf::from("test.net"), text).expect("should parse")
    }

    #[test]
    fn s1_sequential_deadlock_free() {
        let net = parse("net n\npl p (1)\npl q (0)\ntr t p -> q\n");
        assert_eq!(net.place_count(), 2);
        let p = net.place_id("p").unwrap();
        let q = net.place_id("q").unwrap();
        assert_eq!(net.initial_marking.get(p), 1);
        assert_eq!(net.initial_marking.get(q), 0);
        let t = net.transition_id("t").unwrap();
        assert_eq!(net.transition(t).inputs.get(&p), Some(&1));
        assert_eq!(net.transition(t).outputs.get(&q), Some(&1));
    }

    #[test]
    fn s2_pure_producer() {
        let net = parse("net n\npl p (0)\ntr t -> p\n");
        let p = net.place_id("p").unwrap();
        let t = net.transition_id("t").unwrap();
        assert!(net.transition(t).inputs.is_empty());
        assert_eq!(net.transition(t).outputs.get(&p), Some(&1));
    }

    #[test]
    fn s3_inhibitor_starvation() {
        let net = parse("net n\npl p (1)\npl q (0)\ntr t p?-1 -> q\n");
        let p = net.place_id("p").unwrap();
        let t = net.transition_id("t").unwrap();
        assert!(!net.is_enabled(t, &net.initial_marking));
        assert_eq!(net.transition(t).pre.get(&p), Some(&-1));
    }

    #[test]
    fn weighted_and_k_suffix() {
        let net = parse("net n\npl p (2K)\ntr t p*2 -> \n");
        let p = net.place_id("p").unwrap();
        assert_eq!(net.initial_marking.get(p), 2000);
        let t = net.transition_id("t").unwrap();
        assert_eq!(net.transition(t).inputs.get(&p), Some(&2));
    }

    #[test]
    fn forbidden_characters_normalized() {
        let net = parse("net n\npl p#1,2 (0)\ntr t -> p#1,2\n");
        assert!(net.place_id("p.1.2").is_some());
    }
}
