//! Input file formats.
//!
//! The converter ingests raw spectra from the `zspc` columnar layout; the
//! reader reconstructs an in-memory [`crate::source::GridSource`] that the
//! assembly pipeline consumes.

pub mod zspc;
