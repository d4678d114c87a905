//! Binary I/O for Bruker raw sample files (`fid`/`ser`): eager and
//! low-memory codecs plus the digital-filter group-delay correction.

pub mod dfcorrect;
pub mod fid;
pub mod lazy;

pub use dfcorrect::{freq_shift, lookup_group_delay, remove_digital_filter, DspError};
pub use fid::{
    read_shaped, write_shaped, write_shaped_lowmem, Endian, FidError, ReadResult, SampleArray,
};
pub use lazy::{LazyError, LazyFid};
