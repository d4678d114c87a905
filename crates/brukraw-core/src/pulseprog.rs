//! Structured record of a Bruker pulse program.
//!
//! Only the statements that matter for shape inference are kept: loop
//! statements (`lo to <label> times <N>`), pointer increment statements
//! (`id`/`dd`/`ipu`/`dpu`), phase statements (`ip`/`dp`), and
//! `"name=value"` variable assignments. Everything else in the program
//! (pulses, delays, gradients) is irrelevant here and dropped by the
//! parser.

use std::collections::BTreeMap;

/// The `times` operand of one loop statement.
///
/// Loop counts are usually literal integers or resolvable through a
/// preceding `"name=value"` assignment; anything else stays symbolic and
/// blocks shape refinement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopCount {
    Count(i64),
    Symbol(String),
}

impl LoopCount {
    pub fn as_count(&self) -> Option<i64> {
        match self {
            LoopCount::Count(n) => Some(*n),
            LoopCount::Symbol(_) => None,
        }
    }
}

/// Loop structure of one pulse program.
///
/// The four per-loop sequences are parallel: index `i` describes the
/// statements accumulated before the `i`-th `lo … times` line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PulseProgram {
    /// `times` operand per loop, in file order.
    pub loops: Vec<LoopCount>,
    /// Operands of `id`/`dd`/`ipu`/`dpu` statements per loop.
    pub increments: Vec<Vec<i64>>,
    /// Operands of `ip`/`dp` statements per loop.
    pub phases: Vec<Vec<i64>>,
    /// Trailing text after each phase operand (may be empty strings).
    pub phase_extra: Vec<Vec<String>>,
    /// `"name=value"` assignments, raw right-hand sides.
    pub variables: BTreeMap<String, String>,
}

impl PulseProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of loop statements.
    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    /// All parallel sequences have matching lengths.
    pub fn is_consistent(&self) -> bool {
        let n = self.loops.len();
        self.increments.len() == n && self.phases.len() == n && self.phase_extra.len() == n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency() {
        let mut p = PulseProgram::new();
        p.loops.push(LoopCount::Count(2));
        p.increments.push(vec![]);
        p.phases.push(vec![1]);
        p.phase_extra.push(vec![String::new()]);
        assert!(p.is_consistent());

        p.phases.push(vec![2]);
        assert!(!p.is_consistent());
    }

    #[test]
    fn test_loop_count_resolution() {
        assert_eq!(LoopCount::Count(8).as_count(), Some(8));
        assert_eq!(LoopCount::Symbol("l1".into()).as_count(), None);
    }
}
