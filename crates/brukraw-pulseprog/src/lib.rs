//! Bruker pulse program codec.
//!
//! A pulse program is the instrument-side script of an experiment.  For
//! shape inference only its loop skeleton matters: how many `lo to …
//! times N` loops there are, which of them advance a delay/pulse pointer
//! (`id`/`dd`/`ipu`/`dpu` — an "active" loop driving an indirect
//! dimension) and which only cycle phases (`ip`/`dp` or nothing — a
//! "passive" repeat). The parser reduces the program to that skeleton
//! plus the `"name=value"` assignments loop counts may refer to.
//!
//! The writer emits a minimal synthetic program that reads back to the
//! same record. It is not a runnable pulse sequence; it exists so loop
//! tables can be serialized for tests and tooling.

use brukraw_core::{LoopCount, PulseProgram};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseProgramError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("destination exists (pass overwrite=true to replace): {0}")]
    AlreadyExists(PathBuf),
}

// ─── Reading ────────────────────────────────────────────────────────────────

/// Read and parse a `pulseprogram` file.
pub fn read(path: &Path) -> Result<PulseProgram, PulseProgramError> {
    let content = fs::read_to_string(path)?;
    Ok(parse(&content))
}

/// Parse pulse program text.
///
/// Lines that are neither loop, increment, phase, nor assignment
/// statements (pulses, delays, gradients, includes) are ignored.
pub fn parse(content: &str) -> PulseProgram {
    let mut prog = PulseProgram::new();
    let mut loop_tokens: Vec<String> = Vec::new();

    // One accumulating list set is always open; a `lo` statement closes
    // it and opens the next. The set left open at EOF is dropped.
    prog.increments.push(Vec::new());
    prog.phases.push(Vec::new());
    prog.phase_extra.push(Vec::new());

    for line in content.lines() {
        // `;` starts a trailing comment.
        let code = line.split(';').next().unwrap_or("");
        let mut tokens: Vec<&str> = code.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        // Leading line labels: all-digit tokens or `label,` markers.
        let first = tokens[0];
        if (!first.is_empty() && first.chars().all(|c| c.is_ascii_digit()))
            || first.ends_with(',')
        {
            tokens.remove(0);
            if tokens.is_empty() {
                continue;
            }
        }

        let text = tokens.join(" ");

        if text.contains('"') {
            if text.contains('=') {
                // "name=value" assignment.
                let open = text.find('"').unwrap();
                let close = text.rfind('"').unwrap();
                if close > open {
                    let inner = &text[open + 1..close];
                    if let Some((name, value)) = inner.split_once('=') {
                        prog.variables
                            .insert(name.trim().to_string(), value.trim().to_string());
                    }
                }
            }
            // Quoted statements without `=` carry no loop information.
            continue;
        }

        if text.starts_with("lo") {
            // `lo to <label> times <N>`
            if tokens.len() < 5 {
                log::warn!("ignoring short loop statement: {:?}", line);
                continue;
            }
            loop_tokens.push(tokens[4].to_string());
            prog.increments.push(Vec::new());
            prog.phases.push(Vec::new());
            prog.phase_extra.push(Vec::new());
            continue;
        }

        if tokens.len() < 2 {
            continue;
        }
        let stmt = tokens[1];
        if let Some(v) = parse_operand(stmt, &["id", "dd"], 2) {
            prog.increments.last_mut().unwrap().push(v);
        } else if let Some(v) = parse_operand(stmt, &["ipu", "dpu"], 3) {
            prog.increments.last_mut().unwrap().push(v);
        } else if let Some(v) = parse_operand(stmt, &["ip", "dp"], 2) {
            prog.phases.last_mut().unwrap().push(v);
            prog.phase_extra
                .last_mut()
                .unwrap()
                .push(tokens[2..].join(" ").trim().to_string());
        }
    }

    // Drop the never-closed trailing accumulators.
    prog.increments.pop();
    prog.phases.pop();
    prog.phase_extra.pop();

    // Resolve loop counts: literal integers directly, otherwise through
    // a `"name=value"` assignment, otherwise keep the symbol.
    prog.loops = loop_tokens
        .into_iter()
        .map(|tok| {
            if let Ok(n) = tok.parse::<i64>() {
                return LoopCount::Count(n);
            }
            if let Some(val) = prog.variables.get(&tok) {
                if let Ok(n) = val.parse::<i64>() {
                    return LoopCount::Count(n);
                }
            }
            LoopCount::Symbol(tok)
        })
        .collect();

    debug_assert!(prog.is_consistent());
    prog
}

/// Integer operand of a statement token, if the token starts with one of
/// `prefixes` (suffix begins at `skip` chars in).
fn parse_operand(stmt: &str, prefixes: &[&str], skip: usize) -> Option<i64> {
    if prefixes.iter().any(|p| stmt.starts_with(p)) {
        stmt[skip..].parse().ok()
    } else {
        None
    }
}

// ─── Writing ────────────────────────────────────────────────────────────────

/// Write a pulse program record as a minimal synthetic program.
pub fn write(prog: &PulseProgram, path: &Path, overwrite: bool) -> Result<(), PulseProgramError> {
    if !overwrite && path.exists() {
        return Err(PulseProgramError::AlreadyExists(path.to_path_buf()));
    }
    fs::write(path, to_string(prog))?;
    Ok(())
}

/// Render a record as program text that parses back to the same loops,
/// increments, phases, extras, and variables.
pub fn to_string(prog: &PulseProgram) -> String {
    let mut out = String::new();
    out.push_str("; synthetic pulse program (loop skeleton only)\n");

    for (name, value) in &prog.variables {
        out.push_str(&format!("\"{}={}\"\n", name, value));
    }

    for (i, lc) in prog.loops.iter().enumerate() {
        for v in prog.increments.get(i).map(Vec::as_slice).unwrap_or(&[]) {
            out.push_str(&format!("1u id{}\n", v));
        }
        let phases = prog.phases.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let extras = prog.phase_extra.get(i).map(Vec::as_slice).unwrap_or(&[]);
        for (j, v) in phases.iter().enumerate() {
            let extra = extras.get(j).map(String::as_str).unwrap_or("");
            if extra.is_empty() {
                out.push_str(&format!("1u ip{}\n", v));
            } else {
                out.push_str(&format!("1u ip{} {}\n", v, extra));
            }
        }
        let count = match lc {
            LoopCount::Count(n) => n.to_string(),
            LoopCount::Symbol(s) => s.clone(),
        };
        out.push_str(&format!("lo to 0 times {}\n", count));
    }

    out
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_2d_program() {
        let content = "\
; hsqc-style loop skeleton
\"d0=3u\"
\"l0=2\"
1 ze
2 d1 pl1:f1
  (p1 ph1):f1
  d0
  go=2 ph31
  d1 ipu1
lo to 2 times 2
  d1 id0
  d1 ip3 ; advance receiver
lo to 2 times 128
exit
";
        let p = parse(content);
        assert_eq!(p.loops, vec![LoopCount::Count(2), LoopCount::Count(128)]);
        assert_eq!(p.increments, vec![vec![1], vec![0]]);
        assert_eq!(p.phases, vec![vec![], vec![3]]);
        assert_eq!(p.phase_extra, vec![Vec::<String>::new(), vec![String::new()]]);
        assert_eq!(p.variables.get("d0").map(String::as_str), Some("3u"));
    }

    #[test]
    fn test_loop_count_via_variable() {
        let content = "\"l1=16\"\n  d1 id0\nlo to 2 times l1\n";
        let p = parse(content);
        assert_eq!(p.loops, vec![LoopCount::Count(16)]);
    }

    #[test]
    fn test_unresolvable_loop_count_stays_symbolic() {
        let p = parse("  d1 id0\nlo to 2 times td1\n");
        assert_eq!(p.loops, vec![LoopCount::Symbol("td1".into())]);
    }

    #[test]
    fn test_label_and_comment_stripping() {
        // Numeric labels and `label,` markers are stripped before the
        // statement token is inspected.
        let p = parse("4 d1 id2 ; comment with id9\nstart, d1 dd5\nlo to 4 times 8\n");
        assert_eq!(p.increments, vec![vec![2, 5]]);
    }

    #[test]
    fn test_ipu_routes_to_increments() {
        let p = parse("  d1 ipu3\n  d1 dpu4\n  d1 ip7 extra text\nlo to 2 times 2\n");
        assert_eq!(p.increments, vec![vec![3, 4]]);
        assert_eq!(p.phases, vec![vec![7]]);
        assert_eq!(p.phase_extra, vec![vec!["extra text".to_string()]]);
    }

    #[test]
    fn test_quoted_statement_without_assignment_ignored() {
        let p = parse("\"p1*2\"\nlo to 2 times 4\n");
        assert!(p.variables.is_empty());
        assert_eq!(p.loops, vec![LoopCount::Count(4)]);
    }

    #[test]
    fn test_statements_after_last_loop_dropped() {
        let p = parse("  d1 id1\nlo to 2 times 2\n  d1 id9\n");
        assert_eq!(p.increments, vec![vec![1]]);
        assert!(p.is_consistent());
    }

    #[test]
    fn test_round_trip() {
        let mut p = PulseProgram::new();
        p.loops = vec![
            LoopCount::Count(2),
            LoopCount::Count(64),
            LoopCount::Symbol("nbl".into()),
        ];
        p.increments = vec![vec![], vec![0, 1], vec![2]];
        p.phases = vec![vec![1], vec![], vec![3, 4]];
        p.phase_extra = vec![
            vec![String::new()],
            vec![],
            vec!["ph31".to_string(), String::new()],
        ];
        p.variables.insert("d0".into(), "3u".into());

        let text = to_string(&p);
        let back = parse(&text);
        assert_eq!(back, p);
    }

    #[test]
    fn test_file_round_trip_and_overwrite_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pulseprogram");

        let mut p = PulseProgram::new();
        p.loops = vec![LoopCount::Count(8)];
        p.increments = vec![vec![0]];
        p.phases = vec![vec![]];
        p.phase_extra = vec![vec![]];

        write(&p, &path, false).unwrap();
        assert_eq!(read(&path).unwrap(), p);

        let err = write(&p, &path, false).unwrap_err();
        assert!(matches!(err, PulseProgramError::AlreadyExists(_)));
        write(&p, &path, true).unwrap();
    }
}
