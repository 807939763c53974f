//! Lossy squeeze pre-pass.
//!
//! Reduces pVCF entropy ahead of sparse encoding: every cell is reordered to
//! begin with `GT:DP`, trailing runs of missing sub-fields are dropped, and
//! when the row carries compelling evidence that a sample has no alternate
//! allele (AD of the shape `x,0,...,0`, or VR exactly `0`) the cell is
//! truncated to `GT:rDP` with DP rounded down to a power of the configured
//! resolution base.

use std::ops::Range;

use anyhow::Result;

use super::split::{split, split_into};
use super::{fail_at, parse_u64};

/// Largest DP value with a precomputed rounded string.
const ROUND_DP_TABLE_SIZE: u64 = 10_000;

pub struct Squeezer {
    base: f64,
    round_dp_table: Vec<Vec<u8>>,
}

impl Squeezer {
    /// `base` is the depth-rounding resolution; callers validate `base > 1`.
    pub fn new(base: f64) -> Self {
        let mut round_dp_table = Vec::with_capacity(ROUND_DP_TABLE_SIZE as usize);
        round_dp_table.push(b"0".to_vec());
        for dp in 1..ROUND_DP_TABLE_SIZE {
            round_dp_table.push(round_dp(base, dp).to_string().into_bytes());
        }
        Self {
            base,
            round_dp_table,
        }
    }

    fn rounded_dp(&self, dp: u64) -> Vec<u8> {
        match self.round_dp_table.get(dp as usize) {
            Some(s) => s.clone(),
            None => round_dp(self.base, dp).to_string().into_bytes(),
        }
    }

    /// Rewrite one tokenised data row into `out`, recording the new token
    /// ranges in `out_tokens`. Returns the number of truncated cells.
    ///
    /// `tokens` must hold at least ten fields and FORMAT must begin with GT
    /// (the encoder has checked both before calling).
    pub fn squeeze_row(
        &self,
        line: &[u8],
        tokens: &[Range<usize>],
        out: &mut Vec<u8>,
        out_tokens: &mut Vec<Range<usize>>,
        line_number: u64,
    ) -> Result<u64> {
        out.clear();
        out_tokens.clear();

        // Columns CHROM..INFO pass through untouched.
        for (i, range) in tokens[..8].iter().enumerate() {
            if i > 0 {
                out.push(b'\t');
            }
            let start = out.len();
            out.extend_from_slice(&line[range.clone()]);
            out_tokens.push(start..out.len());
        }

        let format_range = tokens[8].clone();
        let format = split(&line[format_range.clone()], b':', usize::MAX);
        let format_field =
            |i: usize| &line[format_range.start + format[i].start..format_range.start + format[i].end];
        let i_dp = (1..format.len()).find(|&i| format_field(i) == b"DP");
        let i_ad = (1..format.len()).find(|&i| format_field(i) == b"AD");
        let i_vr = (1..format.len()).find(|&i| format_field(i) == b"VR");

        // New sub-field order: GT, then DP, then the rest as declared.
        let mut permutation = Vec::with_capacity(format.len());
        permutation.push(0);
        if let Some(i_dp) = i_dp {
            permutation.push(i_dp);
        }
        for i in 1..format.len() {
            if Some(i) != i_dp {
                permutation.push(i);
            }
        }

        out.push(b'\t');
        let start = out.len();
        out.extend_from_slice(b"GT");
        for &i in &permutation[1..] {
            out.push(b':');
            out.extend_from_slice(format_field(i));
        }
        out_tokens.push(start..out.len());

        let mut squeezed_cells = 0;
        let mut entries: Vec<Range<usize>> = Vec::new();
        let mut new_cell: Vec<u8> = Vec::new();
        for range in &tokens[9..] {
            let cell = &line[range.clone()];
            if cell.is_empty() {
                return Err(fail_at(line_number, "empty cell"));
            }
            split_into(cell, b':', usize::MAX, &mut entries);
            let entry = |i: usize| entries.get(i).map(|r| &cell[r.clone()]);

            // Evidence that no alternate allele is present: AD with only
            // zeroes after the first value, or VR exactly zero.
            let mut truncate = false;
            if let Some(i_ad) = i_ad {
                if let Some(ad) = entry(i_ad) {
                    if let Some(comma) = ad.iter().position(|&b| b == b',') {
                        if ad[comma..].iter().all(|&b| b == b'0' || b == b',') {
                            truncate = true;
                        }
                    }
                }
            }
            if let Some(i_vr) = i_vr {
                if entry(i_vr).is_some_and(|vr| vr == b"0") {
                    truncate = true;
                }
            }

            new_cell.clear();
            new_cell.extend_from_slice(&cell[entries[0].clone()]);
            if let Some(i_dp) = i_dp {
                new_cell.push(b':');
                match entry(i_dp) {
                    Some(dp_text) if truncate => {
                        let dp = parse_u64(dp_text)
                            .ok_or_else(|| fail_at(line_number, "couldn't parse DP"))?;
                        new_cell.extend_from_slice(&self.rounded_dp(dp));
                    }
                    Some(dp_text) => new_cell.extend_from_slice(dp_text),
                    None => new_cell.push(b'.'),
                }
            }

            if truncate {
                squeezed_cells += 1;
            } else {
                // Even an untruncated cell may end in a run of missing
                // values, which VCF lets us omit.
                let first_other = if i_dp.is_some() { 2 } else { 1 };
                let mut last = permutation.len();
                while last > first_other {
                    if let Some(e) = entry(permutation[last - 1]) {
                        if e.iter().any(|&b| b != b'.' && b != b',') {
                            break;
                        }
                    }
                    last -= 1;
                }
                for &i in &permutation[first_other..last] {
                    new_cell.push(b':');
                    match entry(i) {
                        Some(e) => new_cell.extend_from_slice(e),
                        None => new_cell.push(b'.'),
                    }
                }
            }

            out.push(b'\t');
            let start = out.len();
            out.extend_from_slice(&new_cell);
            out_tokens.push(start..out.len());
        }

        Ok(squeezed_cells)
    }
}

/// `floor(base ^ floor(log_base(dp)))`, the largest power of `base` not
/// exceeding `dp`.
fn round_dp(base: f64, dp: u64) -> u64 {
    debug_assert!(dp > 0);
    let rounded = base.powf((dp as f64).ln() / base.ln()).floor() as u64;
    debug_assert!(rounded <= dp);
    rounded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squeeze_line(squeezer: &Squeezer, line: &[u8]) -> (Vec<u8>, u64) {
        let tokens = split(line, b'\t', usize::MAX);
        let mut out = Vec::new();
        let mut out_tokens = Vec::new();
        let squeezed = squeezer
            .squeeze_row(line, &tokens, &mut out, &mut out_tokens, 1)
            .unwrap();
        assert_eq!(out_tokens.len(), tokens.len());
        (out, squeezed)
    }

    const PREFIX: &str = "chr1\t100\t.\tA\tG\t.\tPASS\t.";

    #[test]
    fn test_round_dp_powers_of_two() {
        assert_eq!(round_dp(2.0, 1), 1);
        assert_eq!(round_dp(2.0, 25), 16);
        assert_eq!(round_dp(2.0, 32), 32);
        assert_eq!(round_dp(2.0, 1023), 512);
    }

    #[test]
    fn test_truncates_on_zero_alt_ad() {
        let squeezer = Squeezer::new(2.0);
        let line = format!("{PREFIX}\tGT:AD:DP\t0/0:25,0:25");
        let (out, squeezed) = squeeze_line(&squeezer, line.as_bytes());
        assert_eq!(
            out,
            format!("{PREFIX}\tGT:DP:AD\t0/0:16").as_bytes(),
            "cell truncated to GT:rDP and FORMAT reordered"
        );
        assert_eq!(squeezed, 1);
    }

    #[test]
    fn test_keeps_cell_with_alt_reads() {
        let squeezer = Squeezer::new(2.0);
        let line = format!("{PREFIX}\tGT:AD:DP\t0/1:12,13:25");
        let (out, squeezed) = squeeze_line(&squeezer, line.as_bytes());
        assert_eq!(out, format!("{PREFIX}\tGT:DP:AD\t0/1:25:12,13").as_bytes());
        assert_eq!(squeezed, 0);
    }

    #[test]
    fn test_truncates_on_zero_vr() {
        let squeezer = Squeezer::new(2.0);
        let line = format!("{PREFIX}\tGT:DP:VR\t0/0:9:0\t0/0:9:2");
        let (out, squeezed) = squeeze_line(&squeezer, line.as_bytes());
        assert_eq!(out, format!("{PREFIX}\tGT:DP:VR\t0/0:8\t0/0:9:2").as_bytes());
        assert_eq!(squeezed, 1);
    }

    #[test]
    fn test_multi_allele_ad_requires_all_zero() {
        let squeezer = Squeezer::new(2.0);
        let line = format!("{PREFIX}\tGT:AD:DP\t0/0:30,0,0:30\t0/0:30,0,1:31");
        let (out, squeezed) = squeeze_line(&squeezer, line.as_bytes());
        assert_eq!(
            out,
            format!("{PREFIX}\tGT:DP:AD\t0/0:16\t0/0:31:30,0,1").as_bytes()
        );
        assert_eq!(squeezed, 1);
    }

    #[test]
    fn test_drops_trailing_missing_fields() {
        let squeezer = Squeezer::new(2.0);
        let line = format!("{PREFIX}\tGT:DP:AD:PL\t0/1:25:12,13:.\t0/1:25:.,.:.");
        let (out, _) = squeeze_line(&squeezer, line.as_bytes());
        assert_eq!(
            out,
            format!("{PREFIX}\tGT:DP:AD:PL\t0/1:25:12,13\t0/1:25").as_bytes()
        );
    }

    #[test]
    fn test_missing_dp_becomes_dot() {
        let squeezer = Squeezer::new(2.0);
        let line = format!("{PREFIX}\tGT:DP\t./.");
        let (out, _) = squeeze_line(&squeezer, line.as_bytes());
        assert_eq!(out, format!("{PREFIX}\tGT:DP\t./.:.").as_bytes());
    }

    #[test]
    fn test_no_dp_in_format() {
        let squeezer = Squeezer::new(2.0);
        let line = format!("{PREFIX}\tGT:AD\t0/1:12,13");
        let (out, _) = squeeze_line(&squeezer, line.as_bytes());
        assert_eq!(out, format!("{PREFIX}\tGT:AD\t0/1:12,13").as_bytes());
    }

    #[test]
    fn test_resolution_base_three() {
        let squeezer = Squeezer::new(3.0);
        let line = format!("{PREFIX}\tGT:AD:DP\t0/0:80,0:80");
        let (out, _) = squeeze_line(&squeezer, line.as_bytes());
        // 3^floor(log3 80) = 27
        assert_eq!(out, format!("{PREFIX}\tGT:DP:AD\t0/0:27").as_bytes());
    }

    #[test]
    fn test_dp_above_table_bound() {
        let squeezer = Squeezer::new(2.0);
        let line = format!("{PREFIX}\tGT:AD:DP\t0/0:20000,0:20000");
        let (out, _) = squeeze_line(&squeezer, line.as_bytes());
        assert_eq!(out, format!("{PREFIX}\tGT:DP:AD\t0/0:16384").as_bytes());
    }

    #[test]
    fn test_unparseable_dp_is_fatal() {
        let squeezer = Squeezer::new(2.0);
        let line = format!("{PREFIX}\tGT:AD:DP\t0/0:9,0:abc");
        let tokens = split(line.as_bytes(), b'\t', usize::MAX);
        let err = squeezer
            .squeeze_row(line.as_bytes(), &tokens, &mut Vec::new(), &mut Vec::new(), 7)
            .unwrap_err();
        assert!(err.to_string().contains("couldn't parse DP"));
        assert!(err.to_string().contains("line 7"));
    }
}
