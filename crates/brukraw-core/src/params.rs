//! Typed parameter tables for Bruker JCAMP-DX files (acqus, acqu2s, procs, …).
//!
//! A [`ParameterTable`] maps parameter names (the text between `##$` and
//! `=`, case-sensitive) to typed values. The non-parameter lines of a
//! JCAMP-DX file — the `##TITLE=`-style core header and `$$` comments —
//! are carried verbatim so that a table can be written back out
//! faithfully.

use std::collections::BTreeMap;

/// One parameter value from a JCAMP-DX file.
///
/// The variant is determined by the syntax used in the file: angle
/// brackets give strings, a `(0..N)` prefix gives lists, bare `yes`/`no`
/// gives booleans, everything else is numeric. Lists may nest one level
/// (pulse-shape tables).
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Numeric value as i64, if this is an Int or a Float.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Numeric value as f64, if this is an Int or a Float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String content, if this is a Str.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

/// Parsed contents of one Bruker JCAMP-DX parameter file.
///
/// Parameters are kept in a sorted map so that writing a table emits
/// keys in lexical order, matching the layout TopSpin itself produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    /// `##…=` lines whose third character is not `$`, verbatim.
    pub core_header: Vec<String>,
    /// `$$ …` comment lines, verbatim.
    pub comments: Vec<String>,
    params: BTreeMap<String, ParamValue>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterate parameters in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.params.iter()
    }

    /// Integer value of `key`, or `default` if the key is absent or not
    /// numeric. Missing optional keys drive a lot of shape inference, so
    /// the default-returning form is the primary accessor.
    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        self.params.get(key).and_then(|v| v.as_int()).unwrap_or(default)
    }

    /// Float value of `key`, or `default`.
    pub fn float_or(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).and_then(|v| v.as_float()).unwrap_or(default)
    }

    /// String value of `key`, or `default`.
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.params.get(key).and_then(|v| v.as_str()).unwrap_or(default)
    }
}

impl FromIterator<(String, ParamValue)> for ParameterTable {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        ParameterTable {
            core_header: Vec::new(),
            comments: Vec::new(),
            params: iter.into_iter().collect(),
        }
    }
}
