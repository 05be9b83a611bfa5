//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O, the escaped-value codec and the error types shared
//! by the rewriting and packetizing stages.

pub mod bitstream_io;
pub mod errors;
