//! Acquisition shape inference.
//!
//! Bruker raw files (`fid`/`ser`) carry no header: the logical shape of
//! the sample array has to be reconstructed from the side-channel
//! parameter files (TD of each `acqu*s` file, AQ_mod, the binary file
//! size) and, for ≥3D experiments, from the loop structure of the pulse
//! program. The heuristics here follow the behaviour of TopSpin's own
//! bookkeeping: TD counts on-disk points (real+imag pairs count twice),
//! the direct dimension is zero-filled to a multiple of 256 points, and
//! an indirect dimension shows up in the pulse program as a passive
//! phase-cycle loop of 2 directly before an active incremented loop.

use crate::params::ParameterTable;
use crate::pulseprog::{LoopCount, PulseProgram};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShapeError {
    #[error("cannot infer shape: binary file size unknown (stat the fid/ser file first)")]
    MissingFileSize,
    #[error("unknown acquisition mode AQ_mod={0} (expected 0..3)")]
    UnknownAcquisitionMode(i64),
}

/// The parameter tables of one experiment directory.
///
/// `acqus` is always present; the higher-dimension tables only exist for
/// 2D/3D/4D acquisitions. `file_size` is the byte count of the binary
/// `fid`/`ser` file, supplied by whoever discovered the file.
#[derive(Debug, Clone, Default)]
pub struct AcqParams {
    pub acqus: ParameterTable,
    pub acqu2s: Option<ParameterTable>,
    pub acqu3s: Option<ParameterTable>,
    pub acqu4s: Option<ParameterTable>,
    pub file_size: Option<u64>,
}

/// Inferred logical shape of an acquisition, outermost dimension first.
///
/// When `direct_dim_complex` is set the last entry already counts
/// complex points (interleaved real/imag pairs on disk count as one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionShape {
    pub dims: Vec<usize>,
    pub direct_dim_complex: bool,
}

impl AcquisitionShape {
    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total element count (complex elements count once).
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Expected byte count of the matching fid/ser file.
    pub fn byte_count(&self) -> u64 {
        let width = if self.direct_dim_complex { 8 } else { 4 };
        self.num_elements() as u64 * width
    }
}

/// How the pulse-program loop table refines the file-size-derived shape.
///
/// Expressed as a tagged result rather than in-place mutation so the
/// "leave the shape alone on pattern mismatch" fallback is explicit and
/// each loop-count case is unit-testable on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoopRefinement {
    /// Pattern mismatch or unusable loop table: keep the raw shape.
    NoRefinement,
    /// Refine the first indirect dimension; keep the last 2 entries.
    Planes2 { y: i64 },
    /// Refine up to two indirect dimensions; keep the last 3 entries.
    Planes3 { y: i64, z: Option<i64> },
    /// Refine up to three indirect dimensions; keep all 4 entries.
    Planes4 { y: i64, z: Option<i64>, a: Option<i64> },
}

/// Guess the N-dimensional shape and complexity of an acquisition.
///
/// The direct dimension of the returned shape is already halved when the
/// acquisition mode is complex, so the result can be handed straight to
/// the binary codec together with the complexity flag.
pub fn guess_shape(
    acq: &AcqParams,
    pulse: Option<&PulseProgram>,
) -> Result<AcquisitionShape, ShapeError> {
    // AQ_mod: 0 = qf, 1 = qsim, 2 = qseq, 3 = dqd. qsim and dqd record
    // interleaved complex pairs.
    let aq_mod = acq.acqus.int_or("AQ_mod", 0);
    let complex = match aq_mod {
        0 | 2 => false,
        1 | 3 => true,
        other => return Err(ShapeError::UnknownAcquisitionMode(other)),
    };

    let file_size = acq.file_size.ok_or(ShapeError::MissingFileSize)? as i64;

    // TD of each dimension; absent tables fall back dimension-by-dimension.
    let td0 = acq.acqus.int_or("TD", 1024);
    let td2 = acq.acqu2s.as_ref().map_or(0, |t| t.int_or("TD", 0));
    let td1 = acq.acqu3s.as_ref().map_or(td2, |t| t.int_or("TD", td2));
    let td3 = acq.acqu4s.as_ref().map_or(td1, |t| t.int_or("TD", td1));

    // Direct dimension is stored zero-filled to a 256-point boundary.
    let mut shape: [i64; 4] = [0, 0, td2, ceil_mult_256(td0)];
    if shape[2] != 0 && shape[3] != 0 {
        shape[1] = file_size / (shape[3] * shape[2] * 4);
        shape[0] = file_size / (shape[3] * shape[2] * 16 * 4);
    }

    let kept: Vec<i64> = match resolve_loops(pulse, td0, td1, td2, td3) {
        Some((loops, li)) => match refine_from_loops(&loops, &li) {
            LoopRefinement::NoRefinement => shape.to_vec(),
            LoopRefinement::Planes2 { y } => {
                shape[2] = y;
                shape[2..].to_vec()
            }
            LoopRefinement::Planes3 { y, z } => {
                shape[2] = y;
                if let Some(z) = z {
                    shape[1] = z;
                }
                shape[1..].to_vec()
            }
            LoopRefinement::Planes4 { y, z, a } => {
                shape[2] = y;
                if let Some(z) = z {
                    shape[1] = z;
                }
                if let Some(a) = a {
                    shape[0] = a;
                }
                shape.to_vec()
            }
        },
        None => shape.to_vec(),
    };

    // Collapse singleton and empty entries, then halve the direct
    // dimension once if the data is complex-interleaved.
    let mut dims: Vec<usize> = kept.into_iter().filter(|&n| n >= 2).map(|n| n as usize).collect();
    if dims.is_empty() {
        dims.push(1);
    }
    if complex {
        if let Some(last) = dims.last_mut() {
            *last = (*last / 2).max(1);
        }
    }

    Ok(AcquisitionShape {
        dims,
        direct_dim_complex: complex,
    })
}

/// Round up to the next multiple of 256 (zero stays zero).
fn ceil_mult_256(n: i64) -> i64 {
    if n <= 0 {
        return 0;
    }
    (n + 255) / 256 * 256
}

/// Resolve loop counts to integers, substituting the textual `td0`…`td3`
/// placeholders TopSpin sequences use. Returns `None` when there is no
/// pulse program or a loop count stays symbolic — refinement is skipped
/// then, not attempted with garbage.
fn resolve_loops(
    pulse: Option<&PulseProgram>,
    td0: i64,
    td1: i64,
    td2: i64,
    td3: i64,
) -> Option<(Vec<i64>, Vec<usize>)> {
    let pulse = pulse?;
    if pulse.loops.is_empty() {
        return None;
    }

    let mut loops = Vec::with_capacity(pulse.loops.len());
    for lc in &pulse.loops {
        let n = match lc {
            LoopCount::Count(n) => *n,
            LoopCount::Symbol(s) => match s.as_str() {
                "td0" => td0,
                "td1" => td1,
                "td2" => td2,
                "td3" => td3,
                _ => return None,
            },
        };
        loops.push(n);
    }

    let li: Vec<usize> = pulse.increments.iter().map(|v| v.len()).collect();
    Some((loops, li))
}

/// The empirical case table over the number of loop statements.
///
/// An indirect dimension shows up as a passive loop of 2 with no
/// increments directly before an active loop carrying increments; the
/// dimension size is then twice the active loop count. Sequences with an
/// odd loop count carry one extra outer wrapper loop, which shifts the
/// marker positions by one.
fn refine_from_loops(loops: &[i64], li: &[usize]) -> LoopRefinement {
    debug_assert_eq!(loops.len(), li.len());
    match loops.len() {
        1 => {
            if li[0] != 0 {
                LoopRefinement::Planes2 { y: loops[0] }
            } else {
                LoopRefinement::NoRefinement
            }
        }
        2 => {
            if loops[0] == 2 && li[0] == 0 && li[1] != 0 {
                LoopRefinement::Planes2 { y: 2 * loops[1] }
            } else {
                LoopRefinement::NoRefinement
            }
        }
        3 => {
            if loops[0] == 2 && loops[1] == 2 && li[0] == 0 && li[1] == 0 && li[2] != 0 {
                LoopRefinement::Planes2 { y: 2 * loops[2] }
            } else {
                LoopRefinement::NoRefinement
            }
        }
        4 => {
            if loops[0] == 2 && li[0] == 0 && li[1] != 0 {
                let z = if loops[2] == 2 && li[2] == 0 && li[3] != 0 {
                    Some(2 * loops[3])
                } else {
                    None
                };
                LoopRefinement::Planes3 { y: 2 * loops[1], z }
            } else {
                LoopRefinement::NoRefinement
            }
        }
        5 => {
            if loops[1] == 2 && li[1] == 0 && li[2] != 0 {
                let z = if loops[3] == 2 && li[3] == 0 && li[4] != 0 {
                    Some(2 * loops[4])
                } else {
                    None
                };
                LoopRefinement::Planes3 { y: 2 * loops[2], z }
            } else {
                LoopRefinement::NoRefinement
            }
        }
        6 => {
            if loops[0] == 2 && li[0] == 0 && li[1] != 0 {
                let z = if loops[2] == 2 && li[2] == 0 && li[3] != 0 {
                    Some(2 * loops[3])
                } else {
                    None
                };
                let a = if loops[4] == 2 && li[4] == 0 && li[5] != 0 {
                    Some(2 * loops[5])
                } else {
                    None
                };
                LoopRefinement::Planes4 { y: 2 * loops[1], z, a }
            } else {
                LoopRefinement::NoRefinement
            }
        }
        7 => {
            if loops[1] == 2 && li[1] == 0 && li[2] != 0 {
                let z = if loops[3] == 2 && li[3] == 0 && li[4] != 0 {
                    Some(2 * loops[4])
                } else {
                    None
                };
                let a = if loops[5] == 2 && li[5] == 0 && li[6] != 0 {
                    Some(2 * loops[6])
                } else {
                    None
                };
                LoopRefinement::Planes4 { y: 2 * loops[2], z, a }
            } else {
                LoopRefinement::NoRefinement
            }
        }
        _ => LoopRefinement::NoRefinement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acq_1d(td: i64, aq_mod: i64, file_size: u64) -> AcqParams {
        let mut acqus = ParameterTable::new();
        acqus.insert("TD", td);
        acqus.insert("AQ_mod", aq_mod);
        AcqParams {
            acqus,
            file_size: Some(file_size),
            ..Default::default()
        }
    }

    fn acq_2d(td: i64, td2: i64, aq_mod: i64, file_size: u64) -> AcqParams {
        let mut p = acq_1d(td, aq_mod, file_size);
        let mut acqu2s = ParameterTable::new();
        acqu2s.insert("TD", td2);
        p.acqu2s = Some(acqu2s);
        p
    }

    fn pulse(loops: &[LoopCount], incr: &[&[i64]]) -> PulseProgram {
        let mut p = PulseProgram::new();
        p.loops = loops.to_vec();
        p.increments = incr.iter().map(|v| v.to_vec()).collect();
        p.phases = vec![Vec::new(); loops.len()];
        p.phase_extra = vec![Vec::new(); loops.len()];
        p
    }

    #[test]
    fn test_1d_real() {
        // 1024 real points, no indirect dims.
        let shape = guess_shape(&acq_1d(1024, 0, 4 * 1024), None).unwrap();
        assert_eq!(shape.dims, vec![1024]);
        assert!(!shape.direct_dim_complex);
    }

    #[test]
    fn test_1d_complex_halving() {
        let shape = guess_shape(&acq_1d(1024, 3, 4 * 1024), None).unwrap();
        assert_eq!(shape.dims, vec![512]);
        assert!(shape.direct_dim_complex);
    }

    #[test]
    fn test_2d_dqd_without_pulseprog() {
        // Matches the reference end-to-end scenario: AQ_mod=3, TD=512,
        // acqu2s TD=8, file of 4*8*512 bytes → (8, 256) complex.
        let shape = guess_shape(&acq_2d(512, 8, 3, 4 * 8 * 512), None).unwrap();
        assert_eq!(shape.dims, vec![8, 256]);
        assert!(shape.direct_dim_complex);
    }

    #[test]
    fn test_direct_dim_rounded_to_256() {
        // TD=300 rounds to 512 on-disk points.
        let shape = guess_shape(&acq_1d(300, 0, 4 * 512), None).unwrap();
        assert_eq!(shape.dims, vec![512]);
    }

    #[test]
    fn test_unknown_aq_mod() {
        let err = guess_shape(&acq_1d(1024, 7, 4096), None).unwrap_err();
        assert!(matches!(err, ShapeError::UnknownAcquisitionMode(7)));
    }

    #[test]
    fn test_missing_file_size() {
        let mut acq = acq_1d(1024, 0, 0);
        acq.file_size = None;
        let err = guess_shape(&acq, None).unwrap_err();
        assert!(matches!(err, ShapeError::MissingFileSize));
    }

    #[test]
    fn test_refine_loopn_1_active() {
        assert_eq!(
            refine_from_loops(&[16], &[2]),
            LoopRefinement::Planes2 { y: 16 }
        );
        assert_eq!(refine_from_loops(&[16], &[0]), LoopRefinement::NoRefinement);
    }

    #[test]
    fn test_refine_loopn_2_passive_active() {
        assert_eq!(
            refine_from_loops(&[2, 64], &[0, 1]),
            LoopRefinement::Planes2 { y: 128 }
        );
        // Passive loop count must be exactly 2.
        assert_eq!(
            refine_from_loops(&[4, 64], &[0, 1]),
            LoopRefinement::NoRefinement
        );
    }

    #[test]
    fn test_refine_loopn_3() {
        assert_eq!(
            refine_from_loops(&[2, 2, 32], &[0, 0, 1]),
            LoopRefinement::Planes2 { y: 64 }
        );
    }

    #[test]
    fn test_refine_loopn_4_three_dims() {
        assert_eq!(
            refine_from_loops(&[2, 16, 2, 8], &[0, 1, 0, 2]),
            LoopRefinement::Planes3 {
                y: 32,
                z: Some(16)
            }
        );
        // Second marker missing: only the first indirect dim is refined.
        assert_eq!(
            refine_from_loops(&[2, 16, 3, 8], &[0, 1, 0, 2]),
            LoopRefinement::Planes3 { y: 32, z: None }
        );
    }

    #[test]
    fn test_refine_loopn_5_shifted_markers() {
        assert_eq!(
            refine_from_loops(&[4, 2, 16, 2, 8], &[0, 0, 1, 0, 2]),
            LoopRefinement::Planes3 {
                y: 32,
                z: Some(16)
            }
        );
    }

    #[test]
    fn test_refine_loopn_6() {
        assert_eq!(
            refine_from_loops(&[2, 16, 2, 8, 2, 4], &[0, 1, 0, 1, 0, 1]),
            LoopRefinement::Planes4 {
                y: 32,
                z: Some(16),
                a: Some(8)
            }
        );
    }

    #[test]
    fn test_refine_loopn_7() {
        assert_eq!(
            refine_from_loops(&[4, 2, 16, 2, 8, 2, 4], &[0, 0, 1, 0, 1, 0, 1]),
            LoopRefinement::Planes4 {
                y: 32,
                z: Some(16),
                a: Some(8)
            }
        );
    }

    #[test]
    fn test_refine_loopn_out_of_range() {
        assert_eq!(
            refine_from_loops(&[2; 8], &[0; 8]),
            LoopRefinement::NoRefinement
        );
    }

    #[test]
    fn test_guess_with_pulseprog_refinement() {
        // 2D States-style experiment: passive 2-loop then active loop of
        // 32 → first indirect dim is 64, overriding the TD-derived 48.
        let acq = acq_2d(512, 48, 3, (4 * 64 * 512) as u64);
        let p = pulse(
            &[LoopCount::Count(2), LoopCount::Count(32)],
            &[&[], &[1]],
        );
        let shape = guess_shape(&acq, Some(&p)).unwrap();
        assert_eq!(shape.dims, vec![64, 256]);
    }

    #[test]
    fn test_symbolic_loop_skips_refinement() {
        let acq = acq_2d(512, 8, 3, (4 * 8 * 512) as u64);
        let p = pulse(
            &[LoopCount::Count(2), LoopCount::Symbol("l3".into())],
            &[&[], &[1]],
        );
        let shape = guess_shape(&acq, Some(&p)).unwrap();
        assert_eq!(shape.dims, vec![8, 256]);
    }

    #[test]
    fn test_td_placeholder_substitution() {
        let acq = acq_2d(512, 8, 3, (4 * 8 * 512) as u64);
        // `td2` resolves to 8; loopn=1 active loop sets the indirect dim.
        let p = pulse(&[LoopCount::Symbol("td2".into())], &[&[2]]);
        let shape = guess_shape(&acq, Some(&p)).unwrap();
        assert_eq!(shape.dims, vec![8, 256]);
    }

    #[test]
    fn test_shape_byte_count() {
        let s = AcquisitionShape {
            dims: vec![8, 256],
            direct_dim_complex: true,
        };
        assert_eq!(s.byte_count(), 8 * 256 * 8);
        assert_eq!(s.num_elements(), 2048);
    }
}
