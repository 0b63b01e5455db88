//! Error taxonomy for the binning index core.
//!
//! Kinds mirror the propagation policy described alongside the reader and
//! writer: readers report rather than recover, and the writer aborts on the
//! first ordering violation rather than producing a best-effort index.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// The first 4 bytes of the index did not match the expected literal.
    #[error("bad magic bytes: expected \"BAI\\x01\"")]
    BadMagic,

    /// A read would have run past the end of the file.
    #[error("truncated index: unexpected end of file")]
    Truncated,

    /// `n_bin`, `n_chunk`, `bin_id`, or `n_intv` took an implausible value.
    #[error("corrupt index: {reason}")]
    Corrupt { reason: String },

    /// The record stream violated the coordinate-sorted ingestion contract.
    #[error(
        "out-of-order record: reference {reference_index} start {start} \
         after previous start {previous_start} in reference {previous_reference_index}"
    )]
    OutOfOrder {
        reference_index: i32,
        previous_reference_index: i32,
        start: u32,
        previous_start: u32,
    },

    /// Virtual offsets could not be safely shifted for the supplied segment layout.
    #[error("bad concatenation: {reason}")]
    BadConcatenation { reason: String },

    /// Underlying I/O failure propagated verbatim.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
