//! Genomic range slicing of compressed spVCF.
//!
//! A sparse row only makes sense downstream of the checkpoint it references,
//! so extracting `chrom:lo-hi` cannot simply copy the indexed lines: when the
//! first line of the range is sparse, the slicer re-queries from the
//! checkpoint POS that row names, decodes forward until it reaches `lo`,
//! emits that row as a fresh dense checkpoint, and rewrites the checkpoint
//! references of the following sparse rows to point at it. The result is a
//! self-consistent spVCF stream for every requested region.
//!
//! The state machine consumes a [`RegionSource`] capability; the
//! tabix/bgzf-backed implementation lives in [`tabix`].

pub mod tabix;

use std::io::Write;
use std::ops::Range;

use anyhow::{anyhow, bail, Context, Result};

use crate::cli::TabixArgs;
use crate::codec::split::split;
use crate::codec::{parse_u64, Decoder, Transcoder, CHECKPOINT_INFO_TAG};
use crate::io::open_output;

/// Line-oriented random access into an indexed spVCF: the interface the
/// slicer core consumes. `lines` yields the data rows overlapping a region,
/// in file order.
pub trait RegionSource {
    fn header_lines(&mut self) -> Result<Vec<Vec<u8>>>;
    fn lines(
        &mut self,
        chrom: &str,
        lo: Option<u64>,
        hi: Option<u64>,
    ) -> Result<Box<dyn Iterator<Item = Result<Vec<u8>>> + '_>>;
}

/// Entry point for `spvcf tabix`.
pub fn tabix_slice(args: &TabixArgs) -> Result<()> {
    let mut source = tabix::TabixSource::open(&args.input)?;
    let mut output = open_output(args.output.as_deref())?;
    slice_regions(&mut source, &args.regions, &mut output)
}

/// Emit a self-consistent spVCF stream covering each requested region,
/// preceded by the source's header lines.
pub fn slice_regions<S, W>(source: &mut S, regions: &[String], out: &mut W) -> Result<()>
where
    S: RegionSource,
    W: Write,
{
    for line in source.header_lines()? {
        write_line(out, &line)?;
    }
    for region in regions {
        let (chrom, bounds) = parse_region(region)?;
        slice_one_region(source, region, &chrom, bounds, out)?;
    }
    out.flush().context("flushing output")?;
    Ok(())
}

/// Parse `chrom` or `chrom:lo-hi` (1-based, inclusive).
fn parse_region(region: &str) -> Result<(String, Option<(u64, u64)>)> {
    let invalid = || anyhow!("invalid region {region}");
    match region.split_once(':') {
        None => {
            if region.is_empty() {
                return Err(invalid());
            }
            Ok((region.to_string(), None))
        }
        Some((chrom, range)) => {
            if chrom.is_empty() {
                return Err(invalid());
            }
            let (lo, hi) = range.split_once('-').ok_or_else(invalid)?;
            let lo: u64 = lo.parse().map_err(|_| invalid())?;
            let hi: u64 = hi.parse().map_err(|_| invalid())?;
            Ok((chrom.to_string(), Some((lo, hi))))
        }
    }
}

fn slice_one_region<S, W>(
    source: &mut S,
    region: &str,
    chrom: &str,
    bounds: Option<(u64, u64)>,
    out: &mut W,
) -> Result<()>
where
    S: RegionSource,
    W: Write,
{
    let (lo, hi) = match bounds {
        Some((lo, hi)) => (Some(lo), Some(hi)),
        None => (None, None),
    };

    let mut iter = source.lines(chrom, lo, hi)?;
    let first = match iter.next() {
        None => return Ok(()),
        Some(line) => line?,
    };

    let fields = row_fields(&first)?;
    if !first[fields[7].clone()].starts_with(CHECKPOINT_INFO_TAG) {
        // The first line happens to be a checkpoint, so the whole region can
        // be copied as-is. Always the case when slicing a whole chromosome,
        // and occasionally mid-range.
        write_line(out, &first)?;
        for line in iter {
            write_line(out, &line?)?;
        }
        return Ok(());
    }
    let (Some(lo), Some(hi)) = (lo, hi) else {
        bail!("first line for chromosome was not a checkpoint: {region}");
    };

    // The first line is sparse: find the checkpoint it references.
    let ck = checkpoint_pos(&first[fields[7].clone()])
        .filter(|&ck| ck < lo)
        .ok_or_else(|| anyhow!("invalid spVCF_checkpointPOS field"))?;
    drop(iter);

    let ck_region = format!("{chrom}:{ck}-{hi}");
    let mut iter = source.lines(chrom, Some(ck), Some(hi))?;

    // The checkpoint is not guaranteed to be the very first result: skip any
    // sparse rows ahead of it, but never past `lo`.
    let mut line = iter
        .next()
        .transpose()?
        .ok_or_else(|| anyhow!("couldn't open checkpoint region {ck_region} before {region}"))?;
    loop {
        let fields = row_fields(&line)?;
        let pos = parse_u64(&line[fields[1].clone()]).ok_or_else(|| {
            anyhow!("invalid POS while looking for checkpoint in {ck_region}")
        })?;
        if !line[fields[7].clone()].starts_with(CHECKPOINT_INFO_TAG) {
            break;
        }
        match iter.next().transpose()? {
            Some(next) if pos < lo => line = next,
            _ => bail!("couldn't find checkpoint in {ck_region} before {region}"),
        }
    }

    // Decode forward from the checkpoint; the first decoded row with
    // POS >= lo becomes the output's new checkpoint.
    let mut decoder = Decoder::new(false);
    let new_checkpoint_pos;
    let mut pending;
    loop {
        let decoded = decoder.process_line(&line)?.to_vec();
        let fields = row_fields(&decoded)?;
        let pos = parse_u64(&decoded[fields[1].clone()]).ok_or_else(|| {
            anyhow!("invalid POS while decoding from checkpoint in {ck_region}")
        })?;
        let next = iter.next().transpose()?;
        if pos >= lo {
            write_line(out, &decoded)?;
            new_checkpoint_pos = pos;
            pending = next;
            break;
        }
        line = next
            .ok_or_else(|| anyhow!("couldn't resume from checkpoint {ck_region} for {region}"))?;
    }

    // Rewrite checkpoint references until the next true checkpoint, then
    // pass the remainder of the region through verbatim.
    let mut rewriting = true;
    while let Some(line) = pending {
        if rewriting {
            let fields = row_fields(&line)?;
            let info = &line[fields[7].clone()];
            if !info.starts_with(CHECKPOINT_INFO_TAG) {
                rewriting = false;
                write_line(out, &line)?;
            } else {
                write_rewritten(out, &line, &fields, new_checkpoint_pos)?;
            }
        } else {
            write_line(out, &line)?;
        }
        pending = iter.next().transpose()?;
    }
    Ok(())
}

/// Tab-split into the nine fixed columns plus the undivided remainder.
fn row_fields(line: &[u8]) -> Result<Vec<Range<usize>>> {
    let fields = split(line, b'\t', 9);
    if fields.len() < 10 {
        bail!("read line with fewer than 10 columns");
    }
    Ok(fields)
}

/// Extract the POS value of a `spVCF_checkpointPOS=` INFO sub-field.
fn checkpoint_pos(info: &[u8]) -> Option<u64> {
    let rest = &info[CHECKPOINT_INFO_TAG.len()..];
    let end = rest
        .iter()
        .position(|&b| b == b';')
        .unwrap_or(rest.len());
    parse_u64(&rest[..end])
}

fn write_rewritten<W: Write>(
    out: &mut W,
    line: &[u8],
    fields: &[Range<usize>],
    checkpoint_pos: u64,
) -> Result<()> {
    let mut rewritten = Vec::with_capacity(line.len());
    for (i, range) in fields.iter().enumerate() {
        if i > 0 {
            rewritten.push(b'\t');
        }
        if i == 7 {
            rewritten.extend_from_slice(CHECKPOINT_INFO_TAG);
            rewritten.extend_from_slice(checkpoint_pos.to_string().as_bytes());
            let info = &line[range.clone()];
            if let Some(p) = info.iter().position(|&b| b == b';') {
                rewritten.extend_from_slice(&info[p..]);
            }
        } else {
            rewritten.extend_from_slice(&line[range.clone()]);
        }
    }
    write_line(out, &rewritten)
}

fn write_line<W: Write>(out: &mut W, line: &[u8]) -> Result<()> {
    out.write_all(line).context("writing output")?;
    out.write_all(b"\n").context("writing output")?;
    Ok(())
}
