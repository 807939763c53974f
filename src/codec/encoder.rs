//! Streaming spVCF encoder.
//!
//! Consumes one dense pVCF row per call, compares each sample cell to the
//! last value recorded densely for that column, and collapses vertical runs
//! of repeats into `"` / `"<n>` tokens. Periodically, and at every
//! chromosome change, it emits the row fully dense instead: a checkpoint
//! that bounds run lengths and lets a range slicer resume mid-file.

use std::ops::Range;

use anyhow::Result;

use super::split::split_into;
use super::squeeze::Squeezer;
use super::stats::TranscodeStats;
use super::{fail_at, parse_u64, Transcoder};

/// Version stamped into the `##fileformat=spVCF...` header line.
const SPVCF_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// INFO sub-field carrying the POS of the preceding checkpoint.
pub(crate) const CHECKPOINT_INFO_TAG: &[u8] = b"spVCF_checkpointPOS=";

#[derive(Debug, Clone, Copy)]
pub struct EncoderOptions {
    /// Maximum data rows between checkpoints; 0 disables periodic
    /// checkpoints (chromosome changes still force one).
    pub period: u64,
    /// Emit sparse rows; false turns the encoder into a squeeze-only
    /// pass-through that still writes dense VCF.
    pub sparse: bool,
    /// Apply the lossy squeeze transformation before encoding.
    pub squeeze: bool,
    /// Depth rounding base for squeezed cells.
    pub resolution: f64,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            period: 1000,
            sparse: true,
            squeeze: false,
            resolution: 2.0,
        }
    }
}

pub struct Encoder {
    period: u64,
    sparse: bool,
    squeezer: Option<Squeezer>,

    line_number: u64,
    stats: TranscodeStats,

    /// Last cell recorded densely per sample column.
    dense_entries: Vec<Vec<u8>>,
    chrom: Vec<u8>,
    since_checkpoint: u64,
    checkpoint_pos: u64,
    last_pos: u64,

    tokens: Vec<Range<usize>>,
    squeezed_line: Vec<u8>,
    squeezed_tokens: Vec<Range<usize>>,
    out: Vec<u8>,
}

impl Encoder {
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            period: options.period,
            sparse: options.sparse,
            squeezer: options.squeeze.then(|| Squeezer::new(options.resolution)),
            line_number: 0,
            stats: TranscodeStats::default(),
            dense_entries: Vec::new(),
            chrom: Vec::new(),
            since_checkpoint: 0,
            checkpoint_pos: 0,
            last_pos: 0,
            tokens: Vec::new(),
            squeezed_line: Vec::new(),
            squeezed_tokens: Vec::new(),
            out: Vec::new(),
        }
    }

    /// Number the next input line `offset + 1`, so error messages from a
    /// batch processed mid-stream report positions in the whole input.
    pub fn set_line_offset(&mut self, offset: u64) {
        self.line_number = offset;
    }

    fn fail(&self, msg: impl AsRef<str>) -> anyhow::Error {
        fail_at(self.line_number, msg.as_ref())
    }
}

impl Transcoder for Encoder {
    fn process_line(&mut self, line: &[u8]) -> Result<&[u8]> {
        self.line_number += 1;
        // Pass through header lines, stamping the fileformat declaration.
        if line.is_empty() || line[0] == b'#' {
            self.out.clear();
            if self.sparse && line.starts_with(b"##fileformat=") {
                self.out.extend_from_slice(b"##fileformat=spVCF");
                self.out.extend_from_slice(SPVCF_VERSION.as_bytes());
                self.out.push(b';');
                self.out.extend_from_slice(&line["##fileformat=".len()..]);
            } else {
                self.out.extend_from_slice(line);
            }
            return Ok(&self.out);
        }
        self.stats.lines += 1;

        split_into(line, b'\t', usize::MAX, &mut self.tokens);
        if self.tokens.len() < 10 {
            return Err(self.fail("invalid project VCF: fewer than 10 columns"));
        }
        let format = &line[self.tokens[8].clone()];
        if format != b"GT" && !format.starts_with(b"GT:") {
            return Err(self.fail("cells don't start with genotype (GT)"));
        }

        let n = self.tokens.len() - 9;
        if self.dense_entries.is_empty() {
            // First data row fixes the column count.
            self.dense_entries.resize(n, Vec::new());
            self.stats.n = n as u64;
        } else if self.dense_entries.len() != n {
            for range in &self.tokens[9..] {
                if line[range.clone()].starts_with(b"\"") {
                    return Err(self.fail("input seems to be sparse-encoded already"));
                }
            }
            return Err(self.fail("inconsistent number of samples"));
        }

        let mut pos = 0;
        if self.sparse {
            pos = parse_u64(&line[self.tokens[1].clone()])
                .ok_or_else(|| self.fail("couldn't parse POS"))?;
            if self.chrom == &line[self.tokens[0].clone()] && pos < self.last_pos {
                return Err(self.fail("input VCF not sorted (detected decreasing POS)"));
            }
            self.last_pos = pos;
        }

        let mut squeezed_cells = 0;
        if let Some(squeezer) = &self.squeezer {
            squeezed_cells = squeezer.squeeze_row(
                line,
                &self.tokens,
                &mut self.squeezed_line,
                &mut self.squeezed_tokens,
                self.line_number,
            )?;
        }
        self.stats.squeezed_cells += squeezed_cells;
        let (buf, tokens): (&[u8], &[Range<usize>]) = if self.squeezer.is_some() {
            (&self.squeezed_line, &self.squeezed_tokens)
        } else {
            (line, &self.tokens)
        };

        let mut out = std::mem::take(&mut self.out);
        out.clear();

        // Columns CHROM..FORMAT, with the checkpoint tag prepended to INFO
        // when emitting sparse rows.
        out.extend_from_slice(&buf[tokens[0].clone()]);
        for i in 1..9 {
            out.push(b'\t');
            let token = &buf[tokens[i].clone()];
            if i == 7 && self.sparse {
                out.extend_from_slice(CHECKPOINT_INFO_TAG);
                out.extend_from_slice(self.checkpoint_pos.to_string().as_bytes());
                if !token.is_empty() && token != b"." {
                    out.push(b';');
                    out.extend_from_slice(token);
                }
            } else {
                out.extend_from_slice(token);
            }
        }

        if !self.sparse {
            for range in &tokens[9..] {
                out.push(b'\t');
                out.extend_from_slice(&buf[range.clone()]);
            }
            self.out = out;
            return Ok(&self.out);
        }

        // Compare each cell with the last entry recorded densely for its
        // column, collapsing matches into runs of quotes.
        let mut quote_run: u64 = 0;
        let mut sparse_cells: u64 = 0;
        for s in 0..n {
            let cell = &buf[tokens[s + 9].clone()];
            if cell.starts_with(b"\"") {
                self.out = out;
                return Err(self.fail("input seems to be sparse-encoded already"));
            }
            let remembered = &self.dense_entries[s];
            let mut emit_dense = remembered.is_empty() || remembered != cell;
            if !emit_dense {
                emit_dense = match unquotable_gt(cell) {
                    Some(unquotable) => unquotable,
                    None => {
                        self.out = out;
                        return Err(self.fail("missing GT entry"));
                    }
                };
            }
            if emit_dense {
                if quote_run > 0 {
                    out.extend_from_slice(b"\t\"");
                    if quote_run > 1 {
                        out.extend_from_slice(quote_run.to_string().as_bytes());
                    }
                    quote_run = 0;
                    sparse_cells += 1;
                }
                out.push(b'\t');
                out.extend_from_slice(cell);
                sparse_cells += 1;
                self.dense_entries[s] = cell.to_vec();
            } else {
                quote_run += 1;
            }
        }
        if quote_run > 0 {
            out.extend_from_slice(b"\t\"");
            if quote_run > 1 {
                out.extend_from_slice(quote_run.to_string().as_bytes());
            }
            sparse_cells += 1;
        }

        // Checkpoint: re-emit the row densely (with its original INFO) on a
        // chromosome change or once the configured period has elapsed.
        self.since_checkpoint += 1;
        if self.chrom != &buf[tokens[0].clone()]
            || (self.period > 0 && self.since_checkpoint >= self.period)
        {
            out.clear();
            for (i, range) in tokens.iter().enumerate() {
                if i > 0 {
                    out.push(b'\t');
                }
                out.extend_from_slice(&buf[range.clone()]);
                if i >= 9 {
                    self.dense_entries[i - 9] = buf[range.clone()].to_vec();
                }
            }
            self.since_checkpoint = 0;
            self.checkpoint_pos = pos;
            self.chrom = buf[tokens[0].clone()].to_vec();
            self.stats.checkpoints += 1;
            self.out = out;
            return Ok(&self.out);
        }

        self.stats.record_sparse_row(sparse_cells, n as u64);
        self.out = out;
        Ok(&self.out)
    }

    fn stats(&self) -> TranscodeStats {
        self.stats
    }
}

/// Whether a cell's GT makes it ineligible for run encoding.
///
/// Runs may only cover genotypes made purely of reference and no-call
/// alleles, and a half-call such as `./0` must stay dense so that expanding
/// a run never conflates it with `0/0` or `./.`. Returns `None` when the GT
/// sub-field is missing entirely.
fn unquotable_gt(cell: &[u8]) -> Option<bool> {
    if cell.is_empty() || cell[0] == b':' {
        return None;
    }
    let mut zero = false;
    let mut dot = false;
    for &b in cell {
        match b {
            b':' => break,
            b'0' => zero = true,
            b'.' => dot = true,
            b'/' | b'|' => {}
            _ => return Some(true),
        }
    }
    Some(zero == dot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(period: u64) -> Encoder {
        Encoder::new(EncoderOptions {
            period,
            ..Default::default()
        })
    }

    fn process(enc: &mut Encoder, line: &str) -> String {
        String::from_utf8(enc.process_line(line.as_bytes()).unwrap().to_vec()).unwrap()
    }

    fn process_err(enc: &mut Encoder, line: &str) -> String {
        enc.process_line(line.as_bytes()).unwrap_err().to_string()
    }

    #[test]
    fn test_unquotable_gt() {
        assert_eq!(unquotable_gt(b"0/0:30"), Some(false));
        assert_eq!(unquotable_gt(b"./.:."), Some(false));
        assert_eq!(unquotable_gt(b"0|0"), Some(false));
        assert_eq!(unquotable_gt(b"./0:30"), Some(true));
        assert_eq!(unquotable_gt(b"0/1:30"), Some(true));
        assert_eq!(unquotable_gt(b"1/1"), Some(true));
        assert_eq!(unquotable_gt(b"/"), Some(true));
        assert_eq!(unquotable_gt(b""), None);
        assert_eq!(unquotable_gt(b":30"), None);
    }

    #[test]
    fn test_fileformat_header_stamp() {
        let mut enc = encoder(1000);
        let out = process(&mut enc, "##fileformat=VCFv4.2");
        assert_eq!(out, format!("##fileformat=spVCF{SPVCF_VERSION};VCFv4.2"));
        // Other header lines pass through verbatim.
        let out = process(&mut enc, "#CHROM\tPOS\tID");
        assert_eq!(out, "#CHROM\tPOS\tID");
    }

    #[test]
    fn test_first_row_is_checkpoint_then_runs() {
        let mut enc = encoder(1000);
        let r1 = process(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0/1\t0/0");
        // Checkpoint rows keep their original INFO, undisturbed.
        assert_eq!(r1, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0/1\t0/0");
        let r2 = process(&mut enc, "chr1\t200\t.\tC\tT\t.\tPASS\t.\tGT\t1/1\t0/0");
        assert_eq!(
            r2,
            "chr1\t200\t.\tC\tT\t.\tPASS\tspVCF_checkpointPOS=100\tGT\t1/1\t\""
        );
        let r3 = process(&mut enc, "chr1\t300\t.\tG\tA\t.\tPASS\t.\tGT\t0/1\t0/0");
        assert_eq!(
            r3,
            "chr1\t300\t.\tG\tA\t.\tPASS\tspVCF_checkpointPOS=100\tGT\t0/1\t\""
        );
        assert_eq!(enc.stats().checkpoints, 1);
        assert_eq!(enc.stats().lines, 3);
        assert_eq!(enc.stats().n, 2);
    }

    #[test]
    fn test_nonempty_info_is_preserved_behind_tag() {
        let mut enc = encoder(1000);
        process(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\tAF=0.5\tGT\t0/0\t0/0");
        let r2 = process(&mut enc, "chr1\t150\t.\tC\tT\t.\tPASS\tAF=0.5\tGT\t0/0\t0/0");
        assert_eq!(
            r2,
            "chr1\t150\t.\tC\tT\t.\tPASS\tspVCF_checkpointPOS=100;AF=0.5\tGT\t\"2"
        );
    }

    #[test]
    fn test_periodic_checkpoints() {
        let mut enc = encoder(2);
        let mut outputs = Vec::new();
        for i in 0..5 {
            let line = format!("chr1\t{}\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0", 100 + i);
            outputs.push(process(&mut enc, &line));
        }
        // Checkpoints at rows 1, 3, 5; rows 2 and 4 fully sparse.
        assert!(!outputs[0].contains('"'));
        assert!(outputs[1].ends_with("\t\"2"));
        assert!(!outputs[2].contains('"'));
        assert!(outputs[3].ends_with("\t\"2"));
        assert!(!outputs[4].contains('"'));
        assert_eq!(enc.stats().checkpoints, 3);
    }

    #[test]
    fn test_chromosome_change_forces_dense_row() {
        let mut enc = encoder(1000);
        process(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0");
        process(&mut enc, "chr1\t200\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0");
        let r3 = process(&mut enc, "chr2\t50\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0");
        assert_eq!(r3, "chr2\t50\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0");
        assert_eq!(enc.stats().checkpoints, 2);
    }

    #[test]
    fn test_half_call_is_never_quoted() {
        let mut enc = encoder(1000);
        process(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t./0\t0/0");
        let r2 = process(&mut enc, "chr1\t200\t.\tC\tT\t.\tPASS\t.\tGT\t./0\t0/0");
        assert_eq!(
            r2,
            "chr1\t200\t.\tC\tT\t.\tPASS\tspVCF_checkpointPOS=100\tGT\t./0\t\""
        );
    }

    #[test]
    fn test_rejects_sparse_input() {
        let mut enc = encoder(1000);
        process(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0");
        let err = process_err(&mut enc, "chr1\t200\t.\tC\tT\t.\tPASS\t.\tGT\t\"2");
        assert!(err.contains("sparse-encoded already"), "{err}");
    }

    #[test]
    fn test_rejects_inconsistent_sample_count() {
        let mut enc = encoder(1000);
        process(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0");
        let err = process_err(&mut enc, "chr1\t200\t.\tC\tT\t.\tPASS\t.\tGT\t0/0");
        assert!(err.contains("inconsistent number of samples"), "{err}");
        assert!(err.contains("line 2"), "{err}");
    }

    #[test]
    fn test_rejects_decreasing_pos() {
        let mut enc = encoder(1000);
        process(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0");
        process(&mut enc, "chr1\t300\t.\tA\tG\t.\tPASS\t.\tGT\t0/1\t0/0");
        let err = process_err(&mut enc, "chr1\t200\t.\tC\tT\t.\tPASS\t.\tGT\t0/0\t0/0");
        assert!(err.contains("not sorted"), "{err}");
        // A new chromosome may restart positions.
        let mut enc = encoder(1000);
        process(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0");
        process(&mut enc, "chr2\t50\t.\tA\tG\t.\tPASS\t.\tGT\t0/0\t0/0");
    }

    #[test]
    fn test_rejects_bad_pos_and_short_rows() {
        let mut enc = encoder(1000);
        let err = process_err(&mut enc, "chr1\tx00\t.\tA\tG\t.\tPASS\t.\tGT\t0/0");
        assert!(err.contains("couldn't parse POS"), "{err}");
        let err = process_err(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT");
        assert!(err.contains("fewer than 10 columns"), "{err}");
        let err = process_err(&mut enc, "chr1\t100\t.\tA\tG\t.\tPASS\t.\tDP:GT\t0/0");
        assert!(err.contains("genotype (GT)"), "{err}");
    }

    #[test]
    fn test_squeeze_only_mode_keeps_info_and_skips_runs() {
        let mut enc = Encoder::new(EncoderOptions {
            sparse: false,
            squeeze: true,
            ..Default::default()
        });
        let out = process(
            &mut enc,
            "chr1\t100\t.\tA\tG\t.\tPASS\tAF=0.5\tGT:AD:DP\t0/0:25,0:25\t0/0:25,0:25",
        );
        assert_eq!(
            out,
            "chr1\t100\t.\tA\tG\t.\tPASS\tAF=0.5\tGT:DP:AD\t0/0:16\t0/0:16"
        );
        assert_eq!(enc.stats().squeezed_cells, 2);
        assert_eq!(enc.stats().checkpoints, 0);
        // The fileformat line is left alone without sparse encoding.
        let out = process(&mut enc, "##fileformat=VCFv4.2");
        assert_eq!(out, "##fileformat=VCFv4.2");
    }

    #[test]
    fn test_sparse_stats_thresholds() {
        let mut enc = encoder(1000);
        let cells = vec!["0/0"; 100].join("\t");
        process(&mut enc, &format!("chr1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t{cells}"));
        process(&mut enc, &format!("chr1\t200\t.\tA\tG\t.\tPASS\t.\tGT\t{cells}"));
        let stats = enc.stats();
        // Second row collapses to a single run token: 1% of 100 columns.
        assert_eq!(stats.sparse_cells, 1);
        assert_eq!(stats.sparse75_lines, 1);
        assert_eq!(stats.sparse90_lines, 1);
        assert_eq!(stats.sparse99_lines, 1);
    }

    #[test]
    fn test_line_offset_shows_in_errors() {
        let mut enc = encoder(1000);
        enc.set_line_offset(5000);
        let err = process_err(&mut enc, "chr1\t100\t.\tA");
        assert!(err.contains("line 5001"), "{err}");
    }
}
