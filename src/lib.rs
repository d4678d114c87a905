//! Experiment-directory orchestration for raw Bruker acquisition data.
//!
//! A Bruker experiment directory holds a binary sample file (`fid` for
//! 1-D, `ser` for N-D), a set of JCAMP-DX parameter files (`acqus`,
//! `acqu2s`, ...) and usually a `pulseprogram`. [`Experiment::open`]
//! discovers and parses all of them, infers the logical array shape,
//! and exposes eager and lazy readers plus the digital-filter
//! correction, composing the focused crates under `crates/`.

use brukraw_core::{guess_shape, AcqParams, AcquisitionShape, ParameterTable, PulseProgram};
use brukraw_core::ShapeError;
use brukraw_io::{
    read_shaped, remove_digital_filter, DspError, Endian, FidError, LazyError, LazyFid,
    ReadResult, SampleArray,
};
use brukraw_jcamp::JcampError;
use brukraw_pulseprog::PulseProgramError;
use ndarray::ArrayD;
use num_complex::Complex64;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("no fid or ser file in {0}")]
    NoDataFile(PathBuf),
    #[error("required parameter file missing: {0}")]
    MissingParams(PathBuf),
    #[error("digital filter correction needs complex data")]
    NotComplex,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Jcamp(#[from] JcampError),
    #[error(transparent)]
    PulseProgram(#[from] PulseProgramError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Fid(#[from] FidError),
    #[error(transparent)]
    Lazy(#[from] LazyError),
    #[error(transparent)]
    Dsp(#[from] DspError),
}

/// One opened experiment directory with all metadata parsed and the
/// acquisition shape already inferred.
#[derive(Debug)]
pub struct Experiment {
    pub dir: PathBuf,
    /// Resolved path of the binary sample file.
    pub data_path: PathBuf,
    /// True when the data file is `ser` (N-D series) rather than `fid`.
    pub is_series: bool,
    pub acq: AcqParams,
    pub pulse_program: Option<PulseProgram>,
    pub shape: AcquisitionShape,
    pub endian: Endian,
}

impl Experiment {
    /// Discover and parse an experiment directory.
    ///
    /// `fid` is preferred over `ser` when both exist. `acqus` is
    /// required; `acqu2s`..`acqu4s` and `pulseprogram` are optional.
    /// The binary file's size is merged into the acqus table under
    /// `FILE_SIZE` and drives shape inference.
    pub fn open(dir: &Path) -> Result<Self, ExperimentError> {
        let (data_path, is_series) = discover_data_file(dir)?;
        let file_size = fs::metadata(&data_path)?.len();

        let acqus_path = dir.join("acqus");
        if !acqus_path.is_file() {
            return Err(ExperimentError::MissingParams(acqus_path));
        }
        let mut acqus = brukraw_jcamp::read(&acqus_path)?;
        acqus.insert("FILE_SIZE", file_size as i64);

        let acq = AcqParams {
            acqus,
            acqu2s: read_optional(&dir.join("acqu2s"))?,
            acqu3s: read_optional(&dir.join("acqu3s"))?,
            acqu4s: read_optional(&dir.join("acqu4s"))?,
            file_size: Some(file_size),
        };

        let pp_path = dir.join("pulseprogram");
        let pulse_program = if pp_path.is_file() {
            Some(brukraw_pulseprog::read(&pp_path)?)
        } else {
            None
        };

        let shape = guess_shape(&acq, pulse_program.as_ref())?;
        // BYTORDA: 1 = big-endian, anything else little-endian.
        let endian = Endian::from_bytorda(acq.acqus.int_or("BYTORDA", 0));

        Ok(Experiment {
            dir: dir.to_path_buf(),
            data_path,
            is_series,
            acq,
            pulse_program,
            shape,
            endian,
        })
    }

    /// Read the whole sample file into memory, shaped per the inferred
    /// [`AcquisitionShape`]. A size mismatch degrades to the flat
    /// fallback inside [`read_shaped`].
    pub fn read(&self) -> Result<ReadResult, ExperimentError> {
        let result = read_shaped(
            &self.data_path,
            &self.shape.dims,
            self.shape.direct_dim_complex,
            self.endian,
        )?;
        if let ReadResult::FlatFallback { data, attempted } = &result {
            log::warn!(
                "{}: inferred shape {:?} does not fit the file, got {} flat elements",
                self.dir.display(),
                attempted,
                data.len()
            );
        }
        Ok(result)
    }

    /// Open the sample file for seek-on-demand access. Unlike [`read`],
    /// this fails hard when the inferred shape does not match the file.
    ///
    /// [`read`]: Experiment::read
    pub fn read_lazy(&self) -> Result<LazyFid, ExperimentError> {
        Ok(LazyFid::open(
            &self.data_path,
            &self.shape.dims,
            self.shape.direct_dim_complex,
            self.endian,
        )?)
    }

    /// The group delay this experiment's DSP firmware introduced, in
    /// points. A positive `GRPDLY` wins over the firmware lookup table.
    pub fn group_delay(&self) -> Result<f64, ExperimentError> {
        let grpdly = self.acq.acqus.float_or("GRPDLY", 0.0);
        if grpdly > 0.0 {
            return Ok(grpdly);
        }
        let dspfvs = self.acq.acqus.int_or("DSPFVS", -1);
        let decim = self.acq.acqus.int_or("DECIM", 1);
        Ok(brukraw_io::lookup_group_delay(dspfvs, decim)?)
    }

    /// Remove the digital-filter group delay from `data` using this
    /// experiment's `DECIM`/`DSPFVS`/`GRPDLY` parameters.
    pub fn remove_digital_filter(
        &self,
        data: &ArrayD<Complex64>,
    ) -> Result<ArrayD<Complex64>, ExperimentError> {
        let decim = self.acq.acqus.int_or("DECIM", 1);
        let dspfvs = self.acq.acqus.int_or("DSPFVS", -1);
        let grpdly = self.acq.acqus.float_or("GRPDLY", 0.0);
        Ok(remove_digital_filter(data, decim, dspfvs, grpdly)?)
    }

    /// Read, and when the data is complex, correct it in one step.
    pub fn read_corrected(&self) -> Result<ArrayD<Complex64>, ExperimentError> {
        match self.read()?.into_array() {
            SampleArray::Complex(data) => self.remove_digital_filter(&data),
            SampleArray::Int(_) => Err(ExperimentError::NotComplex),
        }
    }
}

fn discover_data_file(dir: &Path) -> Result<(PathBuf, bool), ExperimentError> {
    let fid = dir.join("fid");
    if fid.is_file() {
        return Ok((fid, false));
    }
    let ser = dir.join("ser");
    if ser.is_file() {
        return Ok((ser, true));
    }
    Err(ExperimentError::NoDataFile(dir.to_path_buf()))
}

fn read_optional(path: &Path) -> Result<Option<ParameterTable>, ExperimentError> {
    if path.is_file() {
        Ok(Some(brukraw_jcamp::read(path)?))
    } else {
        Ok(None)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
