//! Group-delay removal for digitally filtered acquisitions.
//!
//! Bruker DSP firmware prepends a frequency-dependent group delay to
//! every trace. The delay in points is either reported directly in
//! GRPDLY (newer firmware) or derived from the (DSPFVS, DECIM) pair via
//! a fixed lookup table. Correction shifts each trace backwards by the
//! fractional delay in the frequency domain, folds the wrap-around
//! samples back onto the head, and drops the now-meaningless tail.

use ndarray::{ArrayD, Axis, Slice};
use num_complex::Complex64;
use rustfft::FftPlanner;
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DspError {
    #[error("no group delay known for DSPFVS={dspfvs}, DECIM={decim}")]
    LookupNotFound { dspfvs: i64, decim: i64 },
}

/// Group delay in points for a firmware/decimation pair.
///
/// Firmware versions 14 and later report the delay in GRPDLY themselves,
/// so the table answer for them is zero.
pub fn lookup_group_delay(dspfvs: i64, decim: i64) -> Result<f64, DspError> {
    if dspfvs >= 14 {
        return Ok(0.0);
    }
    let delay = match (dspfvs, decim) {
        (10, 2) => 44.75,
        (10, 3) => 33.5,
        (10, 4) => 66.625,
        (10, 6) => 59.083333333333333,
        (10, 8) => 68.5625,
        (10, 12) => 60.375,
        (10, 16) => 69.53125,
        (10, 24) => 61.020833333333333,
        (10, 32) => 70.015625,
        (10, 48) => 61.34375,
        (10, 64) => 70.2578125,
        (10, 96) => 61.505208333333333,
        (10, 128) => 70.37890625,
        (10, 192) => 61.5859375,
        (10, 256) => 70.439453125,
        (10, 384) => 61.626302083333333,
        (10, 512) => 70.4697265625,
        (10, 768) => 61.646484375,
        (10, 1024) => 70.485107421875,
        (10, 1536) => 61.656575520833333,
        (10, 2048) => 70.4927978515625,
        (11, 2) => 46.0,
        (11, 3) => 36.5,
        (11, 4) => 48.0,
        (11, 6) => 50.166666666666667,
        (11, 8) => 53.25,
        (11, 12) => 69.5,
        (11, 16) => 72.25,
        (11, 24) => 70.166666666666667,
        (11, 32) => 72.75,
        (11, 48) => 70.5,
        (11, 64) => 73.0,
        (11, 96) => 70.666666666666667,
        (11, 128) => 72.5,
        (11, 192) => 71.333333333333333,
        (11, 256) => 72.25,
        (11, 384) => 71.666666666666667,
        (11, 512) => 72.125,
        (11, 768) => 71.833333333333333,
        (11, 1024) => 72.0625,
        (11, 1536) => 71.916666666666667,
        (11, 2048) => 72.03125,
        (12, 2) => 46.0,
        (12, 3) => 36.5,
        (12, 4) => 48.0,
        (12, 6) => 50.166666666666667,
        (12, 8) => 53.25,
        (12, 12) => 69.5,
        (12, 16) => 71.625,
        (12, 24) => 70.166666666666667,
        (12, 32) => 72.125,
        (12, 48) => 70.5,
        (12, 64) => 72.375,
        (12, 96) => 70.666666666666667,
        (12, 128) => 72.5,
        (13, 2) => 2.75,
        (13, 3) => 2.8333333333333333,
        (13, 4) => 2.875,
        (13, 6) => 2.9166666666666667,
        (13, 8) => 2.9375,
        (13, 12) => 2.9583333333333333,
        (13, 16) => 2.96875,
        (13, 24) => 2.9791666666666667,
        (13, 32) => 2.984375,
        (13, 48) => 2.9895833333333333,
        (13, 64) => 2.9921875,
        (13, 96) => 2.9947916666666667,
        _ => return Err(DspError::LookupNotFound { dspfvs, decim }),
    };
    Ok(delay)
}

/// Circularly shift every trace left by a (fractional) number of points.
///
/// Works in the frequency domain: FFT, multiply bin `j` by
/// `exp(-2*pi*i*pts*j/L)`, inverse FFT with 1/L normalization.
pub fn freq_shift(data: &ArrayD<Complex64>, pts: f64) -> ArrayD<Complex64> {
    let last = data.ndim() - 1;
    let len = data.shape()[last];
    let mut out = data.clone();
    if len == 0 {
        return out;
    }

    let mut planner = FftPlanner::new();
    let fwd = planner.plan_fft_forward(len);
    let inv = planner.plan_fft_inverse(len);
    let norm = 1.0 / len as f64;
    let ramp: Vec<Complex64> = (0..len)
        .map(|j| Complex64::new(0.0, -2.0 * PI * pts * j as f64 / len as f64).exp())
        .collect();

    let mut buf = vec![Complex64::new(0.0, 0.0); len];
    for mut lane in out.lanes_mut(Axis(last)) {
        for (b, v) in buf.iter_mut().zip(lane.iter()) {
            *b = *v;
        }
        fwd.process(&mut buf);
        for (b, r) in buf.iter_mut().zip(&ramp) {
            *b *= r;
        }
        inv.process(&mut buf);
        for (dst, b) in lane.iter_mut().zip(&buf) {
            *dst = b * norm;
        }
    }
    out
}

/// Undo the DSP group delay on every trace of `data`.
///
/// A positive `grpdly` takes precedence over the firmware table. The
/// last axis shrinks by `floor(delay + 2)` points.
pub fn remove_digital_filter(
    data: &ArrayD<Complex64>,
    decim: i64,
    dspfvs: i64,
    grpdly: f64,
) -> Result<ArrayD<Complex64>, DspError> {
    let phase = if grpdly > 0.0 {
        grpdly
    } else {
        lookup_group_delay(dspfvs, decim)?
    };

    let last = data.ndim() - 1;
    let len = data.shape()[last];
    let skip = (phase + 2.0).floor() as usize;
    let add = skip.saturating_sub(6);

    let mut shifted = freq_shift(data, phase);
    if len > 1 {
        for mut lane in shifted.lanes_mut(Axis(last)) {
            for i in 0..add.min(len - 1) {
                let fold = lane[len - 2 - i];
                lane[i] += fold;
            }
        }
    }
    let keep = len.saturating_sub(skip);
    Ok(shifted
        .slice_axis(Axis(last), Slice::from(..keep))
        .to_owned())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_lookup_known_values() {
        assert_eq!(lookup_group_delay(10, 2).unwrap(), 44.75);
        assert_eq!(lookup_group_delay(13, 64).unwrap(), 2.9921875);
        assert_eq!(lookup_group_delay(13, 96).unwrap(), 2.9947916666666667);
        assert_eq!(lookup_group_delay(11, 2048).unwrap(), 72.03125);
    }

    #[test]
    fn test_lookup_modern_firmware_is_zero() {
        assert_eq!(lookup_group_delay(14, 2).unwrap(), 0.0);
        assert_eq!(lookup_group_delay(20, 123).unwrap(), 0.0);
    }

    #[test]
    fn test_lookup_unknown_pair() {
        let err = lookup_group_delay(10, 999).unwrap_err();
        assert_eq!(
            err,
            DspError::LookupNotFound {
                dspfvs: 10,
                decim: 999
            }
        );
        assert!(lookup_group_delay(9, 2).is_err());
    }

    #[test]
    fn test_freq_shift_integer_is_circular() {
        let data = ArrayD::from_shape_vec(
            IxDyn(&[4]),
            vec![
                Complex64::new(0.0, 0.0),
                Complex64::new(1.0, 0.0),
                Complex64::new(2.0, 0.0),
                Complex64::new(3.0, 0.0),
            ],
        )
        .unwrap();
        let shifted = freq_shift(&data, 1.0);
        let want = [1.0, 2.0, 3.0, 0.0];
        for (got, want) in shifted.iter().zip(want) {
            assert!((got.re - want).abs() < 1e-9, "{got} vs {want}");
            assert!(got.im.abs() < 1e-9);
        }
    }

    #[test]
    fn test_freq_shift_zero_is_identity() {
        let data = ArrayD::from_shape_vec(
            IxDyn(&[2, 3]),
            (0..6).map(|i| Complex64::new(i as f64, -(i as f64))).collect(),
        )
        .unwrap();
        let shifted = freq_shift(&data, 0.0);
        for (got, want) in shifted.iter().zip(data.iter()) {
            assert!((got - want).norm() < 1e-9);
        }
    }

    const TABLE_DECIMS: [i64; 21] = [
        2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536, 2048,
    ];

    #[test]
    fn test_filter_removal_length_contract() {
        // Every documented (firmware, decimation) pair shrinks the last
        // axis by exactly floor(delay + 2).
        let len = 256usize;
        let data = ArrayD::from_shape_vec(
            IxDyn(&[2, len]),
            (0..2 * len).map(|i| Complex64::new(i as f64, 0.0)).collect(),
        )
        .unwrap();

        for dspfvs in [10i64, 11, 12, 13] {
            for &decim in &TABLE_DECIMS {
                let delay = match lookup_group_delay(dspfvs, decim) {
                    Ok(d) => d,
                    Err(DspError::LookupNotFound { .. }) => continue,
                };
                let skip = (delay + 2.0).floor() as usize;
                let out = remove_digital_filter(&data, decim, dspfvs, 0.0).unwrap();
                assert_eq!(
                    out.shape(),
                    &[2, len - skip],
                    "dspfvs={dspfvs} decim={decim}"
                );
            }
        }
    }

    #[test]
    fn test_grpdly_overrides_table() {
        let data = ArrayD::from_shape_vec(
            IxDyn(&[1, 64]),
            (0..64).map(|i| Complex64::new(i as f64, 0.0)).collect(),
        )
        .unwrap();
        // Unknown (dspfvs, decim) pair must not matter when GRPDLY is set.
        let out = remove_digital_filter(&data, 999, 9, 8.5).unwrap();
        assert_eq!(out.shape(), &[1, 54]);
    }

    #[test]
    fn test_filter_removal_rejects_unknown_pair() {
        let data =
            ArrayD::from_shape_vec(IxDyn(&[8]), vec![Complex64::new(1.0, 0.0); 8]).unwrap();
        assert!(remove_digital_filter(&data, 999, 10, 0.0).is_err());
    }
}
