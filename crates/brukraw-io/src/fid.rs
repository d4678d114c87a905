//! Eager codec for Bruker raw sample files.
//!
//! A `fid`/`ser` file is a bare array of 4-byte signed integers with no
//! header; byte order comes from `acqus.BYTORDA` and everything else
//! (shape, complex interleave) from shape inference. Complex
//! acquisitions store real/imaginary as adjacent int pairs, so pairing
//! happens before the reshape.

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use ndarray::{ArrayD, Axis, IxDyn};
use num_complex::Complex64;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FidError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("destination exists (pass overwrite=true to replace): {0}")]
    AlreadyExists(PathBuf),
}

/// Byte order of a raw sample file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Map the `BYTORDA`/`BYTORDP` convention: 1 = big-endian, else little.
    pub fn from_bytorda(v: i64) -> Self {
        if v == 1 {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

/// A dense sample array: raw integers straight off disk, or complex
/// doubles after interleave pairing.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleArray {
    Int(ArrayD<i32>),
    Complex(ArrayD<Complex64>),
}

impl SampleArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            SampleArray::Int(a) => a.shape(),
            SampleArray::Complex(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Element count (one complex value counts once).
    pub fn len(&self) -> usize {
        match self {
            SampleArray::Int(a) => a.len(),
            SampleArray::Complex(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_complex(&self) -> Option<&ArrayD<Complex64>> {
        match self {
            SampleArray::Complex(a) => Some(a),
            SampleArray::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<&ArrayD<i32>> {
        match self {
            SampleArray::Int(a) => Some(a),
            SampleArray::Complex(_) => None,
        }
    }
}

/// Outcome of an eager shaped read.
///
/// A failed reshape degrades to the flat 1-D data instead of erroring:
/// the samples are still valid, only the metadata-derived shape was
/// wrong. Callers branch on the variant instead of sniffing array rank.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    Shaped(SampleArray),
    FlatFallback {
        data: SampleArray,
        attempted: Vec<usize>,
    },
}

impl ReadResult {
    /// The array, shaped or flat.
    pub fn into_array(self) -> SampleArray {
        match self {
            ReadResult::Shaped(a) => a,
            ReadResult::FlatFallback { data, .. } => data,
        }
    }

    pub fn is_shaped(&self) -> bool {
        matches!(self, ReadResult::Shaped(_))
    }
}

// ─── Reading ────────────────────────────────────────────────────────────────

/// Read a raw sample file into an array of the given shape.
///
/// When `complex` is set, adjacent int pairs are combined into
/// `re + i·im` complex values before reshaping, and `shape` counts
/// complex elements. A shape whose product does not match the file's
/// element count yields [`ReadResult::FlatFallback`] plus a warning.
pub fn read_shaped(
    path: &Path,
    shape: &[usize],
    complex: bool,
    endian: Endian,
) -> Result<ReadResult, FidError> {
    let raw = fs::read(path)?;
    if raw.len() % 4 != 0 {
        log::warn!(
            "{}: file size {} is not a multiple of 4, trailing bytes ignored",
            path.display(),
            raw.len()
        );
    }

    let n = raw.len() / 4;
    let mut ints = vec![0i32; n];
    match endian {
        Endian::Little => LittleEndian::read_i32_into(&raw[..n * 4], &mut ints),
        Endian::Big => BigEndian::read_i32_into(&raw[..n * 4], &mut ints),
    }

    if complex {
        if n % 2 != 0 {
            log::warn!(
                "{}: odd sample count {} for complex data, last value ignored",
                path.display(),
                n
            );
        }
        let values: Vec<Complex64> = ints
            .chunks_exact(2)
            .map(|p| Complex64::new(p[0] as f64, p[1] as f64))
            .collect();
        Ok(reshape_or_flat(values, shape, path, SampleArray::Complex))
    } else {
        Ok(reshape_or_flat(ints, shape, path, SampleArray::Int))
    }
}

fn reshape_or_flat<T: Clone>(
    values: Vec<T>,
    shape: &[usize],
    path: &Path,
    wrap: fn(ArrayD<T>) -> SampleArray,
) -> ReadResult {
    let product: usize = shape.iter().product();
    if !shape.is_empty() && product == values.len() {
        let arr = ArrayD::from_shape_vec(IxDyn(shape), values).unwrap();
        ReadResult::Shaped(wrap(arr))
    } else {
        log::warn!(
            "{}: cannot reshape {} elements into {:?}, returning flat data",
            path.display(),
            values.len(),
            shape
        );
        let len = values.len();
        let flat = ArrayD::from_shape_vec(IxDyn(&[len]), values).unwrap();
        ReadResult::FlatFallback {
            data: wrap(flat),
            attempted: shape.to_vec(),
        }
    }
}

// ─── Writing ────────────────────────────────────────────────────────────────

/// Write a sample array as a raw fid/ser file.
///
/// Complex arrays are de-interleaved back into int pairs (doubling the
/// last axis); real/imaginary parts are truncated toward zero with
/// `as i32` (saturating at the i32 range).
pub fn write_shaped(
    path: &Path,
    array: &SampleArray,
    endian: Endian,
    overwrite: bool,
) -> Result<(), FidError> {
    if !overwrite && path.exists() {
        return Err(FidError::AlreadyExists(path.to_path_buf()));
    }
    let mut w = BufWriter::new(fs::File::create(path)?);
    match array {
        SampleArray::Int(a) => {
            for &v in a.iter() {
                put_i32(&mut w, v, endian)?;
            }
        }
        SampleArray::Complex(a) => {
            for z in a.iter() {
                put_i32(&mut w, z.re as i32, endian)?;
                put_i32(&mut w, z.im as i32, endian)?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

/// Same output bytes as [`write_shaped`], but writes one outermost-axis
/// trace at a time so peak buffering stays at one trace.
pub fn write_shaped_lowmem(
    path: &Path,
    array: &SampleArray,
    endian: Endian,
    overwrite: bool,
) -> Result<(), FidError> {
    if !overwrite && path.exists() {
        return Err(FidError::AlreadyExists(path.to_path_buf()));
    }
    let mut w = BufWriter::new(fs::File::create(path)?);
    match array {
        SampleArray::Int(a) => {
            for trace in a.axis_iter(Axis(0)) {
                let mut buf = Vec::with_capacity(trace.len() * 4);
                for &v in trace.iter() {
                    put_i32(&mut buf, v, endian)?;
                }
                w.write_all(&buf)?;
            }
        }
        SampleArray::Complex(a) => {
            for trace in a.axis_iter(Axis(0)) {
                let mut buf = Vec::with_capacity(trace.len() * 8);
                for z in trace.iter() {
                    put_i32(&mut buf, z.re as i32, endian)?;
                    put_i32(&mut buf, z.im as i32, endian)?;
                }
                w.write_all(&buf)?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

fn put_i32<W: Write>(w: &mut W, v: i32, endian: Endian) -> io::Result<()> {
    match endian {
        Endian::Little => w.write_i32::<LittleEndian>(v),
        Endian::Big => w.write_i32::<BigEndian>(v),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
