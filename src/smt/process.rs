//! The production solver driver: a long-lived child process speaking
//! SMT-LIB 2 over line-buffered stdin/stdout (spec §4.1).
//!
//! Grounded on `gat-solver-common::subprocess::SolverProcess` for the
//! spawn/pipe/`which`-lookup shape, adapted from a one-shot
//! request/response call into a persistent push/pop/check-sat session:
//! this driver outlives many `write`/`check_sat` round-trips instead of
//! spawning one process per query.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{PnError, PnResult};
use crate::net::{Marking, PetriNet};

use super::registry::PidRegistry;
use super::{CheckSatResult, SolverBackend};

/// Drives one external SMT solver process (Z3 by default, or any
/// SMT-LIB-2-speaking binary named by `solver_path`).
pub struct ProcessSolver {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    child: Arc<Mutex<Option<Child>>>,
    pid: u32,
    registry: PidRegistry,
    aborted: Arc<AtomicBool>,
    timeout: Duration,
    push_depth: u32,
    /// Parsed `(define-fun ...)` bindings from the last successful
    /// `(get-model)`.
    last_model: BTreeMap<String, i64>,
}

impl ProcessSolver {
    /// Spawns `solver_path` (resolved via `which` if not absolute) with
    /// `-in` (z3's "read SMT-LIB from stdin" flag), registering its pid
    /// with `registry` so a sibling portfolio worker can kill it (spec
    /// §4.1, §5).
    pub fn spawn(solver_path: &str, registry: PidRegistry, timeout: Duration) -> PnResult<Self> {
        let resolved = which::which(solver_path)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| solver_path.to_string());

        let mut child = Command::new(&resolved)
            .arg("-in")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PnError::Solver(format!("failed to spawn `{resolved}`: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PnError::Solver("solver stdin was not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PnError::Solver("solver stdout was not piped".to_string()))?;
        let pid = child.id();

        let handle = Arc::new(Mutex::new(Some(child)));
        registry.register(pid, handle.clone());

        Ok(ProcessSolver {
            stdin,
            reader: BufReader::new(stdout),
            child: handle,
            pid,
            registry,
            aborted: Arc::new(AtomicBool::new(false)),
            timeout,
            push_depth: 0,
            last_model: BTreeMap::new(),
        })
    }

    fn write_line(&mut self, line: &str) -> PnResult<()> {
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush())
            .map_err(PnError::Io)
    }

    /// Reads one line with a deadline, polling `aborted` in between so a
    /// sibling worker's `kill()` unblocks this call promptly even though
    /// the underlying `read_line` has no built-in timeout.
    fn read_line_deadline(&mut self, deadline: Instant) -> PnResult<Option<String>> {
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(PnError::Timeout(self.timeout));
            }
            let mut line = String::new();
            match self.reader.fill_buf() {
                Ok(buf) if buf.is_empty() => {
                    return Err(PnError::Solver("solver closed its stdout".to_string()));
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PnError::Io(e)),
            }
            match self.reader.read_line(&mut line) {
                Ok(0) => return Err(PnError::Solver("solver closed its stdout".to_string())),
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        return Ok(Some(trimmed.to_string()));
                    }
                }
                Err(e) => return Err(PnError::Io(e)),
            }
        }
    }

    /// Reads a single, possibly multi-line, balanced-parenthesis
    /// response (used for `(get-model)` and `(get-unsat-core)`, both of
    /// which z3 answers with one s-expression that may span lines).
    fn read_sexpr_block(&mut self, deadline: Instant) -> PnResult<String> {
        let mut out = String::new();
        let mut depth: i64 = 0;
        let mut started = false;
        loop {
            let Some(line) = self.read_line_deadline(deadline)? else {
                return Err(PnError::SolverAborted);
            };
            for ch in line.chars() {
                match ch {
                    '(' => {
                        depth += 1;
                        started = true;
                    }
                    ')' => depth -= 1,
                    _ => {}
                }
            }
            out.push_str(&line);
            out.push('\n');
            if started && depth <= 0 {
                return Ok(out);
            }
            if !started {
                // A bare-atom response (e.g. a single identifier with no
                // surrounding parens); one line is the whole answer.
                return Ok(out);
            }
        }
    }
}

impl SolverBackend for ProcessSolver {
    fn push(&mut self) -> PnResult<()> {
        self.push_depth += 1;
        self.write_line("(push 1)")
    }

    fn pop(&mut self) -> PnResult<()> {
        if self.push_depth == 0 {
            return Err(PnError::Solver("pop with no matching push".to_string()));
        }
        self.push_depth -= 1;
        self.write_line("(pop 1)")
    }

    fn reset(&mut self) -> PnResult<()> {
        self.push_depth = 0;
        self.last_model.clear();
        self.write_line("(reset)")
    }

    fn write(&mut self, text: &str) -> PnResult<()> {
        self.stdin.write_all(text.as_bytes()).map_err(PnError::Io)?;
        self.stdin.flush().map_err(PnError::Io)
    }

    fn check_sat(&mut self) -> PnResult<CheckSatResult> {
        if self.aborted.load(Ordering::SeqCst) {
            return Ok(CheckSatResult::Aborted);
        }
        self.write_line("(check-sat)")?;
        let deadline = Instant::now() + self.timeout;
        match self.read_line_deadline(deadline) {
            Ok(Some(line)) => match line.as_str() {
                "sat" => Ok(CheckSatResult::Sat),
                "unsat" => Ok(CheckSatResult::Unsat),
                "timeout" | "unknown" => Ok(CheckSatResult::Timeout),
                other => Err(PnError::Solver(format!("unexpected check-sat response: {other}"))),
            },
            Ok(None) => Ok(CheckSatResult::Aborted),
            Err(PnError::Timeout(d)) => {
                self.kill();
                Err(PnError::Timeout(d))
            }
            Err(e) => Err(e),
        }
    }

    fn get_marking(&mut self, net: &PetriNet, order: Option<u32>) -> PnResult<Marking> {
        self.write_line("(get-model)")?;
        let deadline = Instant::now() + self.timeout;
        let block = self.read_sexpr_block(deadline)?;
        self.last_model = parse_define_funs(&block);

        let mut marking = Marking::new();
        for p in net.places() {
            let key = match order {
                Some(k) => format!("{}@{}", p.name, k),
                None => p.name.clone(),
            };
            if let Some(&v) = self.last_model.get(&key) {
                marking.set(p.id, v.max(0) as u64);
            }
        }
        Ok(marking)
    }

    fn get_unsat_core(&mut self) -> PnResult<Vec<String>> {
        self.write_line("(get-unsat-core)")?;
        let deadline = Instant::now() + self.timeout;
        let block = self.read_sexpr_block(deadline)?;
        Ok(block
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split_whitespace()
            .map(|s| s.to_string())
            .collect())
    }

    fn kill(&mut self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.registry.kill(self.pid);
    }
}

impl Drop for ProcessSolver {
    fn drop(&mut self) {
        self.registry.deregister(self.pid);
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Extracts `name -> value` from a `(get-model)` response, accepting
/// both `(define-fun p () Int 3)` and `(define-fun p@2 () Int 3)` (spec
/// §4.1: "model parsing tolerates two forms: scalar ... and indexed
/// `p@k`").
fn parse_define_funs(block: &str) -> BTreeMap<String, i64> {
    let mut out = BTreeMap::new();
    let spaced = block.replace('(', " ( ").replace(')', " ) ");
    let tokens: Vec<&str> = spaced.split_whitespace().collect();

    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == "define-fun" && i + 4 < tokens.len() {
            let name = tokens[i + 1].to_string();
            // Skip over the (possibly empty) argument list `()` and the
            // sort name, landing on the value token.
            let mut j = i + 2;
            if tokens.get(j) == Some(&"(") {
                while j < tokens.len() && tokens[j] != ")" {
                    j += 1;
                }
                j += 1;
            }
            j += 1; // sort name (`Int`)
            if let Some(&value) = tokens.get(j) {
                if let Ok(v) = value.parse::<i64>() {
                    out.insert(name, v);
                } else if value == "(" && tokens.get(j + 1) == Some(&"-") {
                    // `(- 3)` negative literal.
                    if let Some(v) = tokens.get(j + 2).and_then(|t| t.parse::<i64>().ok()) {
                        out.insert(name, -v);
                    }
                }
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalar_and_indexed_defines() {
        let block = "(\n  (define-fun p () Int 3)\n  (define-fun q@2 () Int 0)\n  (define-fun r () Int (- 1))\n)\n";
        let model = parse_define_funs(block);
        assert_eq!(model.get("p"), Some(&3));
        assert_eq!(model.get("q@2"), Some(&0));
        assert_eq!(model.get("r"), Some(&-1));
    }
}
