//! Fragmentation module - splitting large payloads across frames and
//! joining them back together.
//!
//! Provides:
//! - [`fragment`] / [`fragment_with_request_n`] - lazy [`Fragmenter`] iterator
//! - [`is_fragmentable`] - whether a payload needs splitting at all
//! - [`Reassembler`] - per-stream FOLLOWS chain collection

mod fragmenter;
mod reassembler;

pub use fragmenter::{
    fragment, fragment_with_request_n, is_fragmentable, Fragmenter, METADATA_LENGTH_OVERHEAD,
    MIN_FRAGMENT_SIZE, REQUEST_N_FRAGMENT_OVERHEAD,
};
pub use reassembler::{Reassembler, DEFAULT_MAX_REASSEMBLY_SIZE};
