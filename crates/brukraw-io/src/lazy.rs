//! Seek-on-demand reader for large fid/ser files.
//!
//! [`LazyFid`] commits to a fixed stride layout at construction time and
//! materializes only the slices asked for, so multi-gigabyte ser files
//! can be walked trace by trace. Unlike the eager codec there is no flat
//! fallback: a shape that does not match the file size is a hard error,
//! because the stride bookkeeping would be meaningless.
//!
//! The underlying file handle stays open until the value is dropped or
//! [`LazyFid::close`]d, and every seek+read pair runs under a mutex,
//! since concurrent consumers would otherwise interleave seeks.

use crate::fid::{Endian, SampleArray};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ndarray::{ArrayD, Axis, IxDyn};
use num_complex::Complex64;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LazyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("shape {shape:?} needs {expected} bytes but file has {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: u64,
        actual: u64,
    },
    #[error("invalid axis permutation {0:?}")]
    InvalidAxes(Vec<usize>),
    #[error("slice {ranges:?} out of bounds for shape {shape:?}")]
    SliceOutOfBounds {
        ranges: Vec<Range<usize>>,
        shape: Vec<usize>,
    },
}

/// A raw sample file indexed lazily through seek+read.
#[derive(Debug)]
pub struct LazyFid {
    file: Mutex<File>,
    /// Logical shape after any transpositions.
    shape: Vec<usize>,
    /// Logical axis → on-disk axis.
    axes: Vec<usize>,
    /// Element strides per on-disk axis (row-major).
    strides: Vec<usize>,
    complex: bool,
    endian: Endian,
}

impl LazyFid {
    /// Open a file and commit to a shape.
    ///
    /// Fails with [`LazyError::ShapeMismatch`] when the shape's byte
    /// count does not equal the file size exactly.
    pub fn open(
        path: &Path,
        shape: &[usize],
        complex: bool,
        endian: Endian,
    ) -> Result<Self, LazyError> {
        let file = File::open(path)?;
        let actual = file.metadata()?.len();
        let width = if complex { 8u64 } else { 4u64 };
        let expected = shape.iter().product::<usize>() as u64 * width;
        if expected != actual || shape.is_empty() {
            return Err(LazyError::ShapeMismatch {
                shape: shape.to_vec(),
                expected,
                actual,
            });
        }

        let ndim = shape.len();
        let mut strides = vec![1usize; ndim];
        for i in (0..ndim - 1).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }

        Ok(LazyFid {
            file: Mutex::new(file),
            shape: shape.to_vec(),
            axes: (0..ndim).collect(),
            strides,
            complex,
            endian,
        })
    }

    /// Current logical shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn is_complex(&self) -> bool {
        self.complex
    }

    /// Reorder the logical axes: new axis `i` is the current axis
    /// `axes[i]`. Only index bookkeeping changes; no data moves.
    pub fn transpose(&mut self, axes: &[usize]) -> Result<(), LazyError> {
        let ndim = self.ndim();
        let mut seen = vec![false; ndim];
        if axes.len() != ndim || axes.iter().any(|&a| a >= ndim || std::mem::replace(&mut seen[a], true)) {
            return Err(LazyError::InvalidAxes(axes.to_vec()));
        }
        self.shape = axes.iter().map(|&a| self.shape[a]).collect();
        self.axes = axes.iter().map(|&a| self.axes[a]).collect();
        Ok(())
    }

    /// Materialize an arbitrary rectangular slice as a dense array.
    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<SampleArray, LazyError> {
        let ndim = self.ndim();
        if ranges.len() != ndim
            || ranges
                .iter()
                .zip(&self.shape)
                .any(|(r, &s)| r.start > r.end || r.end > s)
        {
            return Err(LazyError::SliceOutOfBounds {
                ranges: ranges.to_vec(),
                shape: self.shape.clone(),
            });
        }

        let out_shape: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        let total: usize = out_shape.iter().product();
        let width = if self.complex { 8 } else { 4 };
        let lstrides: Vec<usize> = self.axes.iter().map(|&a| self.strides[a]).collect();

        // Coalesce reads along the innermost logical axis when it is
        // file-contiguous.
        let contiguous = lstrides[ndim - 1] == 1;
        let run_len = if contiguous { out_shape[ndim - 1].max(1) } else { 1 };
        let vary = if contiguous { ndim - 1 } else { ndim };

        let mut bytes = vec![0u8; total * width];
        if total > 0 {
            let mut file = self.file.lock().unwrap();
            let mut idx = vec![0usize; ndim];
            let mut written = 0usize;
            loop {
                let off: usize = idx
                    .iter()
                    .zip(ranges)
                    .zip(&lstrides)
                    .map(|((&i, r), &st)| (r.start + i) * st)
                    .sum();
                let chunk = &mut bytes[written..written + run_len * width];
                file.seek(SeekFrom::Start(off as u64 * width as u64))?;
                file.read_exact(chunk)?;
                written += run_len * width;

                // Odometer over the varying axes.
                let mut d = vary;
                loop {
                    if d == 0 {
                        break;
                    }
                    d -= 1;
                    idx[d] += 1;
                    if idx[d] < out_shape[d] {
                        break;
                    }
                    idx[d] = 0;
                }
                if idx.iter().all(|&i| i == 0) {
                    break;
                }
            }
        }

        Ok(self.decode(&bytes, &out_shape))
    }

    /// One trace: the full slab at `index` along the first logical axis.
    pub fn trace(&self, index: usize) -> Result<SampleArray, LazyError> {
        let mut ranges: Vec<Range<usize>> = vec![index..index + 1];
        ranges.extend(self.shape[1..].iter().map(|&s| 0..s));
        let arr = self.slice(&ranges)?;
        Ok(match arr {
            SampleArray::Int(a) => SampleArray::Int(a.index_axis_move(Axis(0), 0)),
            SampleArray::Complex(a) => SampleArray::Complex(a.index_axis_move(Axis(0), 0)),
        })
    }

    /// Iterate traces in first-axis order.
    pub fn traces(&self) -> impl Iterator<Item = Result<SampleArray, LazyError>> + '_ {
        (0..self.shape[0]).map(move |i| self.trace(i))
    }

    /// Materialize the whole file in the current logical order.
    pub fn read_all(&self) -> Result<SampleArray, LazyError> {
        let ranges: Vec<Range<usize>> = self.shape.iter().map(|&s| 0..s).collect();
        self.slice(&ranges)
    }

    /// Release the underlying file handle. Dropping the value has the
    /// same effect; this form just makes the hand-back explicit.
    pub fn close(self) {}

    fn decode(&self, bytes: &[u8], out_shape: &[usize]) -> SampleArray {
        if self.complex {
            let vals: Vec<Complex64> = bytes
                .chunks_exact(8)
                .map(|c| {
                    let (re, im) = match self.endian {
                        Endian::Little => {
                            (LittleEndian::read_i32(&c[..4]), LittleEndian::read_i32(&c[4..]))
                        }
                        Endian::Big => (BigEndian::read_i32(&c[..4]), BigEndian::read_i32(&c[4..])),
                    };
                    Complex64::new(re as f64, im as f64)
                })
                .collect();
            SampleArray::Complex(ArrayD::from_shape_vec(IxDyn(out_shape), vals).unwrap())
        } else {
            let vals: Vec<i32> = bytes
                .chunks_exact(4)
                .map(|c| match self.endian {
                    Endian::Little => LittleEndian::read_i32(c),
                    Endian::Big => BigEndian::read_i32(c),
                })
                .collect();
            SampleArray::Int(ArrayD::from_shape_vec(IxDyn(out_shape), vals).unwrap())
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fid::{read_shaped, write_shaped};

    fn int_file(dir: &Path, shape: &[usize]) -> (std::path::PathBuf, ArrayD<i32>) {
        let total: usize = shape.iter().product();
        let arr =
            ArrayD::from_shape_vec(IxDyn(shape), (0..total as i32).collect::<Vec<_>>()).unwrap();
        let path = dir.join("ser");
        write_shaped(&path, &SampleArray::Int(arr.clone()), Endian::Big, true).unwrap();
        (path, arr)
    }

    #[test]
    fn test_size_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = int_file(dir.path(), &[2, 3, 4]);
        let err = LazyFid::open(&path, &[2, 3, 5], false, Endian::Big).unwrap_err();
        assert!(matches!(err, LazyError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_read_all_matches_eager() {
        let dir = tempfile::tempdir().unwrap();
        let (path, arr) = int_file(dir.path(), &[2, 3, 4]);

        let lazy = LazyFid::open(&path, &[2, 3, 4], false, Endian::Big).unwrap();
        let all = lazy.read_all().unwrap();
        assert_eq!(all.as_int().unwrap(), &arr);

        let eager = read_shaped(&path, &[2, 3, 4], false, Endian::Big)
            .unwrap()
            .into_array();
        assert_eq!(all, eager);
    }

    #[test]
    fn test_slice_matches_in_memory_view() {
        let dir = tempfile::tempdir().unwrap();
        let (path, arr) = int_file(dir.path(), &[4, 6]);

        let lazy = LazyFid::open(&path, &[4, 6], false, Endian::Big).unwrap();
        let got = lazy.slice(&[1..3, 2..5]).unwrap();
        let want = arr.slice(ndarray::s![1..3, 2..5]).to_owned().into_dyn();
        assert_eq!(got.as_int().unwrap(), &want);
    }

    #[test]
    fn test_transpose_is_bookkeeping_only() {
        let dir = tempfile::tempdir().unwrap();
        let (path, arr) = int_file(dir.path(), &[3, 5]);

        let mut lazy = LazyFid::open(&path, &[3, 5], false, Endian::Big).unwrap();
        lazy.transpose(&[1, 0]).unwrap();
        assert_eq!(lazy.shape(), &[5, 3]);

        let got = lazy.read_all().unwrap();
        let want = arr.t().to_owned().into_dyn();
        assert_eq!(got.as_int().unwrap(), &want);

        let err = lazy.transpose(&[0, 0]).unwrap_err();
        assert!(matches!(err, LazyError::InvalidAxes(_)));
    }

    #[test]
    fn test_trace_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let (path, arr) = int_file(dir.path(), &[3, 4]);

        let lazy = LazyFid::open(&path, &[3, 4], false, Endian::Big).unwrap();
        for (i, trace) in lazy.traces().enumerate() {
            let trace = trace.unwrap();
            assert_eq!(trace.shape(), &[4]);
            assert_eq!(
                trace.as_int().unwrap(),
                &arr.index_axis(Axis(0), i).to_owned().into_dyn()
            );
        }
    }

    #[test]
    fn test_complex_lazy_read() {
        let dir = tempfile::tempdir().unwrap();
        let vals: Vec<Complex64> = (0..12)
            .map(|i| Complex64::new(i as f64, -(i as f64)))
            .collect();
        let arr = ArrayD::from_shape_vec(IxDyn(&[3, 4]), vals).unwrap();
        let path = dir.path().join("ser");
        write_shaped(&path, &SampleArray::Complex(arr.clone()), Endian::Little, true).unwrap();

        let lazy = LazyFid::open(&path, &[3, 4], true, Endian::Little).unwrap();
        assert_eq!(lazy.read_all().unwrap().as_complex().unwrap(), &arr);
        assert_eq!(
            lazy.slice(&[0..1, 1..3]).unwrap().as_complex().unwrap(),
            &arr.slice(ndarray::s![0..1, 1..3]).to_owned().into_dyn()
        );
    }

    #[test]
    fn test_close_releases_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (path, arr) = int_file(dir.path(), &[2, 3]);

        let lazy = LazyFid::open(&path, &[2, 3], false, Endian::Big).unwrap();
        assert_eq!(lazy.trace(0).unwrap().as_int().unwrap().len(), 3);
        lazy.close();
        assert_eq!(arr.len(), 6);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_slice_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = int_file(dir.path(), &[3, 4]);
        let lazy = LazyFid::open(&path, &[3, 4], false, Endian::Big).unwrap();
        let err = lazy.slice(&[0..3, 0..5]).unwrap_err();
        assert!(matches!(err, LazyError::SliceOutOfBounds { .. }));
    }
}
