//! Bruker-flavored JCAMP-DX parameter file codec.
//!
//! TopSpin stores acquisition and processing parameters (`acqus`,
//! `acqu2s`, `procs`, …) in a JCAMP-DX dialect where every vendor
//! parameter lives on a `##$NAME= value` line:
//!
//! ```text
//! ##TITLE= Parameter file, TopSpin 3.2      core header, verbatim
//! $$ 2023-01-05 12:00:00.000 +0100          comment, verbatim
//! ##$AQ_mod= 3                              integer
//! ##$SW_h= 8012.820512                      float
//! ##$PULPROG= <zg30>                        string
//! ##$DIGMOD= yes                            boolean
//! ##$D= (0..3)                              array, elements follow
//! 1 0.001 0.0001 2
//! ##END=
//! ```
//!
//! Only the Bruker subset is handled; the general JCAMP-DX compressed
//! data tables are out of scope here. A single unparseable line is
//! skipped with a warning rather than failing the whole file — real
//! acqus files occasionally contain lines TopSpin itself never reads
//! back.

use brukraw_core::{ParamValue, ParameterTable};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::Lines;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JcampError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("destination exists (pass overwrite=true to replace): {0}")]
    AlreadyExists(PathBuf),
}

// ─── Reading ────────────────────────────────────────────────────────────────

/// Read and parse one JCAMP-DX parameter file.
pub fn read(path: &Path) -> Result<ParameterTable, JcampError> {
    let content = fs::read_to_string(path)?;
    Ok(parse(&content))
}

/// Parse JCAMP-DX content.
///
/// Parsing never fails as a whole: malformed `##$` lines and lines that
/// match no recognized prefix are logged and skipped.
pub fn parse(content: &str) -> ParameterTable {
    let mut table = ParameterTable::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if line.starts_with("##END=") {
            break;
        }
        if line.starts_with("$$") {
            table.comments.push(line.to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("##$") {
            match parse_assignment(rest, &mut lines) {
                Ok((key, value)) => {
                    table.insert(key, value);
                }
                Err(msg) => log::warn!("skipping malformed parameter line {:?}: {}", line, msg),
            }
            continue;
        }
        if line.starts_with("##") {
            table.core_header.push(line.to_string());
            continue;
        }
        log::warn!("unexpected line format in JCAMP-DX input: {:?}", line);
    }

    table
}

/// Parse one `##$KEY= value` assignment, consuming continuation lines
/// for unterminated strings and under-filled arrays.
fn parse_assignment(rest: &str, lines: &mut Lines) -> Result<(String, ParamValue), String> {
    let eq = rest.find('=').ok_or("missing '='")?;
    let key = rest[..eq].to_string();
    let text = rest[eq + 1..].trim_start().to_string();

    // Typing priority: bracketed string, then array, then yes/no, then
    // bare scalar.
    if text.contains('<') {
        let mut text = text;
        while !text.contains('>') {
            let next = lines.next().ok_or("unterminated <...> string")?;
            text.push('\n');
            text.push_str(next);
        }
        let open = text.find('<').unwrap();
        let close = text.rfind('>').unwrap();
        if close < open {
            return Err("mismatched <...> delimiters".into());
        }
        return Ok((key, ParamValue::Str(text[open + 1..close].to_string())));
    }

    if text.contains('(') {
        let dots = text.find("..").ok_or("array prefix missing '..'")?;
        let close = text.find(')').ok_or("array prefix missing ')'")?;
        if close < dots + 2 {
            return Err("malformed array count prefix".into());
        }
        // The prefix records the maximum zero-based index.
        let max_index: usize = text[dots + 2..close]
            .trim()
            .parse()
            .map_err(|_| "bad array element count")?;
        let count = max_index + 1;

        let mut values = Vec::with_capacity(count);
        let mut pending = text[close + 1..].to_string();
        loop {
            for tok in pending.split_whitespace() {
                if values.len() < count {
                    values.push(parse_scalar(tok)?);
                }
            }
            if values.len() >= count {
                break;
            }
            pending = lines
                .next()
                .ok_or("array ended before all elements were read")?
                .to_string();
        }
        return Ok((key, ParamValue::List(values)));
    }

    let trimmed = text.trim();
    match trimmed {
        "yes" => return Ok((key, ParamValue::Bool(true))),
        "no" => return Ok((key, ParamValue::Bool(false))),
        _ => {}
    }

    Ok((key, parse_scalar(trimmed)?))
}

/// Scalar typing rule shared by bare values and array elements.
fn parse_scalar(tok: &str) -> Result<ParamValue, String> {
    if tok.contains('<') {
        let open = tok.find('<').unwrap();
        let close = tok.rfind('>').ok_or("unterminated <...> token")?;
        if close < open {
            return Err("mismatched <...> token".into());
        }
        return Ok(ParamValue::Str(tok[open + 1..close].to_string()));
    }
    if tok.contains('.') || tok.contains('e') || tok.contains('E') || tok.contains("inf") {
        let v: f64 = tok.parse().map_err(|_| format!("bad float token {:?}", tok))?;
        Ok(ParamValue::Float(v))
    } else {
        let v: i64 = tok.parse().map_err(|_| format!("bad integer token {:?}", tok))?;
        Ok(ParamValue::Int(v))
    }
}

// ─── Writing ────────────────────────────────────────────────────────────────

/// Write a parameter table back out as JCAMP-DX text.
///
/// Fails if `path` exists and `overwrite` is false; nothing is written
/// in that case.
pub fn write(table: &ParameterTable, path: &Path, overwrite: bool) -> Result<(), JcampError> {
    if !overwrite && path.exists() {
        return Err(JcampError::AlreadyExists(path.to_path_buf()));
    }
    fs::write(path, to_string(table))?;
    Ok(())
}

/// Render a parameter table as JCAMP-DX text: core header and comments
/// verbatim, then every parameter in sorted key order, then `##END=`.
pub fn to_string(table: &ParameterTable) -> String {
    let mut out = String::new();

    for line in &table.core_header {
        out.push_str(line);
        out.push('\n');
    }
    for line in &table.comments {
        out.push_str(line);
        out.push('\n');
    }

    for (key, value) in table.iter() {
        match value {
            // A zero-element array has no valid `(0..N)` prefix (the
            // prefix records the maximum index) and its block would
            // swallow the following line on re-parse.
            ParamValue::List(items) if items.is_empty() => {
                log::warn!("skipping parameter {} with an empty array value", key);
            }
            ParamValue::List(items) => {
                out.push_str(&format!("##${}= (0..{})\n", key, items.len() - 1));
                write_wrapped_tokens(&mut out, items);
            }
            other => {
                out.push_str(&format!("##${}= {}\n", key, scalar_text(other)));
            }
        }
    }

    out.push_str("##END=\n");
    out
}

/// Emit list elements space-separated, starting a new line once the
/// current one would pass 70 columns. Wrapping is for readability only;
/// re-parsing is insensitive to where the breaks fall.
fn write_wrapped_tokens(out: &mut String, items: &[ParamValue]) {
    let mut line = String::new();
    for item in items {
        let tok = match item {
            // One level of nesting (2D numeric tables): flatten in place.
            ParamValue::List(inner) => inner
                .iter()
                .map(scalar_text)
                .collect::<Vec<_>>()
                .join(" "),
            other => scalar_text(other),
        };
        if !line.is_empty() && line.len() + 1 + tok.len() > 70 {
            out.push_str(&line);
            out.push('\n');
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&tok);
    }
    if !line.is_empty() {
        out.push_str(&line);
        out.push('\n');
    }
}

fn scalar_text(value: &ParamValue) -> String {
    match value {
        ParamValue::Float(v) => float_text(*v),
        ParamValue::Int(v) => v.to_string(),
        ParamValue::Str(s) => format!("<{}>", s),
        ParamValue::Bool(true) => "yes".to_string(),
        ParamValue::Bool(false) => "no".to_string(),
        ParamValue::List(items) => items
            .iter()
            .map(scalar_text)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Shortest round-tripping decimal text that still re-parses as a float
/// (an integral value like 44.0 would otherwise come back as an Int).
fn float_text(v: f64) -> String {
    let s = format!("{}", v);
    if s.contains('.') || s.contains('e') || s.contains('E') || s.contains("inf") || s.contains("NaN")
    {
        s
    } else {
        format!("{}.0", s)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
