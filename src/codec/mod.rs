//! Streaming spVCF transcoding.
//!
//! The encoder, decoder, and squeeze pass all operate line by line over a
//! caller-owned buffer and return a view borrowed from the codec's reusable
//! output buffer, valid until the next call. The entry points at the bottom
//! wire them to the CLI: stream setup, the line loop (or the parallel
//! driver), and the statistics report.

mod decoder;
mod encoder;
mod parallel;
pub mod split;
mod squeeze;
mod stats;

use std::io::{BufRead, Write};

use anyhow::{anyhow, bail, Result};
use tracing::{info, warn};

use crate::cli::{DecodeArgs, EncodeArgs, SqueezeArgs};
use crate::io::{open_input, open_output};

pub use decoder::Decoder;
pub use encoder::{Encoder, EncoderOptions};
pub use parallel::encode_parallel;
pub use stats::TranscodeStats;

pub(crate) use encoder::CHECKPOINT_INFO_TAG;

/// One streaming codec instance: feed it whole lines (without the trailing
/// newline), get back the transcoded line. The returned slice borrows the
/// codec's internal buffer and is overwritten by the next call.
pub trait Transcoder {
    fn process_line(&mut self, line: &[u8]) -> Result<&[u8]>;
    fn stats(&self) -> TranscodeStats;
}

/// Fatal codec errors carry the 1-based input line number.
pub(crate) fn fail_at(line_number: u64, msg: &str) -> anyhow::Error {
    anyhow!("spvcf: {msg} (line {line_number})")
}

/// Strict unsigned integer parse over raw bytes.
pub(crate) fn parse_u64(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Encode pVCF to spVCF (`spvcf encode`).
pub fn encode(args: &EncodeArgs) -> Result<()> {
    let options = EncoderOptions {
        period: args.period,
        sparse: true,
        squeeze: !args.no_squeeze,
        resolution: args.resolution,
    };
    let stats = run_encode(args.input.as_deref(), args.output.as_deref(), options, args.threads)?;
    if !args.quiet {
        print_stats(&stats, options.squeeze, true, true);
    }
    Ok(())
}

/// Squeeze pVCF without sparse encoding (`spvcf squeeze`).
pub fn squeeze(args: &SqueezeArgs) -> Result<()> {
    let options = EncoderOptions {
        sparse: false,
        squeeze: true,
        resolution: args.resolution,
        ..Default::default()
    };
    let stats = run_encode(args.input.as_deref(), args.output.as_deref(), options, args.threads)?;
    if !args.quiet {
        print_stats(&stats, true, false, false);
    }
    Ok(())
}

/// Decode spVCF back to pVCF (`spvcf decode`).
pub fn decode(args: &DecodeArgs) -> Result<()> {
    let input = open_input(args.input.as_deref())?;
    let output = open_output(args.output.as_deref())?;
    let mut decoder = Decoder::new(args.with_missing_fields);
    run_transcode(input, output, &mut decoder)?;
    if !args.quiet {
        print_stats(&decoder.stats(), false, true, false);
    }
    Ok(())
}

fn run_encode(
    input_path: Option<&str>,
    output_path: Option<&std::path::Path>,
    options: EncoderOptions,
    threads: usize,
) -> Result<TranscodeStats> {
    if options.squeeze && options.resolution <= 1.0 {
        bail!("--resolution must be greater than 1.0");
    }
    let input = open_input(input_path)?;
    let output = open_output(output_path)?;
    if threads >= 2 {
        info!("encoding with {threads} worker threads");
        encode_parallel(input, output, options, threads)
    } else {
        let mut encoder = Encoder::new(options);
        run_transcode(input, output, &mut encoder)?;
        Ok(encoder.stats())
    }
}

/// Single-threaded line loop shared by the encoder and decoder paths.
fn run_transcode<R, W>(mut input: R, mut output: W, codec: &mut dyn Transcoder) -> Result<()>
where
    R: BufRead,
    W: Write,
{
    use anyhow::Context;
    let mut line = Vec::new();
    let mut first = true;
    loop {
        line.clear();
        let n = input.read_until(b'\n', &mut line).context("reading input")?;
        if n == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if first {
            if !line.starts_with(b"##fileformat=") {
                warn!("input does not begin with a ##fileformat= line; proceeding anyway");
            }
            first = false;
        }
        let transcoded = codec.process_line(&line)?;
        output.write_all(transcoded).context("writing output")?;
        output.write_all(b"\n").context("writing output")?;
    }
    output.flush().context("flushing output")?;
    Ok(())
}

/// Statistics block printed to stderr, mode-dependent like the subcommands
/// that produce it.
fn print_stats(stats: &TranscodeStats, squeeze: bool, sparse: bool, encode: bool) {
    eprintln!("N = {}", stats.n);
    eprintln!("dense cells = {}", stats.n * stats.lines);
    if squeeze {
        eprintln!("squeezed cells = {}", stats.squeezed_cells);
    }
    if sparse {
        eprintln!("sparse cells = {}", stats.sparse_cells);
        eprintln!("lines (non-header) = {}", stats.lines);
        eprintln!("lines (75% sparse) = {}", stats.sparse75_lines);
        eprintln!("lines (90% sparse) = {}", stats.sparse90_lines);
        eprintln!("lines (99% sparse) = {}", stats.sparse99_lines);
    }
    if encode {
        eprintln!("checkpoints = {}", stats.checkpoints);
    }
}
