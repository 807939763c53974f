//! Sparse Project VCF (spVCF) codec.
//!
//! Population-scale ("project") VCFs are dominated by sample cells that
//! repeat the cell directly above them. This crate implements the spVCF
//! representation: a streaming encoder that collapses such vertical runs
//! into compact `"` / `"<n>` tokens with periodic dense checkpoint rows, the
//! matching decoder, a lossy "squeeze" pre-pass that regularises low-entropy
//! quality fields, and a tabix-backed slicer that extracts self-consistent
//! genomic ranges from bgzf-compressed spVCF.

pub mod cli;
pub mod codec;
pub mod io;
pub mod slice;

pub use codec::{Decoder, Encoder, EncoderOptions, TranscodeStats, Transcoder};
