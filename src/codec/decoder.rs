//! Streaming spVCF decoder.
//!
//! Expands `"` / `"<n>` run tokens back into dense cells using the same
//! remembered-row discipline as the encoder, and strips the checkpoint
//! metadata the encoder folded into INFO.

use std::ops::Range;

use anyhow::Result;

use super::encoder::CHECKPOINT_INFO_TAG;
use super::split::{split, split_into};
use super::stats::TranscodeStats;
use super::{fail_at, parse_u64, Transcoder};

/// Largest padded vector of missing values precomputed for
/// `--with-missing-fields` (AD/PL arities beyond this are fatal).
const MAX_MISSING_VALUES: usize = 256;

pub struct Decoder {
    with_missing_fields: bool,

    line_number: u64,
    stats: TranscodeStats,

    /// Last dense cell seen per sample column.
    dense_entries: Vec<Vec<u8>>,

    tokens: Vec<Range<usize>>,
    out: Vec<u8>,

    // --with-missing-fields state: the stream's constant FORMAT and
    // precomputed `.`, `.,.`, ... vectors indexed by arity.
    format: Vec<u8>,
    format_fields: Vec<Vec<u8>>,
    missing_values: Vec<Vec<u8>>,
    cell_buf: Vec<u8>,
}

impl Decoder {
    pub fn new(with_missing_fields: bool) -> Self {
        Self {
            with_missing_fields,
            line_number: 0,
            stats: TranscodeStats::default(),
            dense_entries: Vec::new(),
            tokens: Vec::new(),
            out: Vec::new(),
            format: Vec::new(),
            format_fields: Vec::new(),
            missing_values: Vec::new(),
            cell_buf: Vec::new(),
        }
    }

    fn fail(&self, msg: impl AsRef<str>) -> anyhow::Error {
        fail_at(self.line_number, msg.as_ref())
    }

    /// Pad `cell` out to the stream FORMAT with `.` per absent sub-field,
    /// giving AD and PL their full comma-separated arity.
    fn add_missing_fields(&mut self, cell: &[u8], n_alt: usize) -> Result<()> {
        let fields = split(cell, b':', usize::MAX);
        self.cell_buf.clear();
        for (i, format_field) in self.format_fields.iter().enumerate() {
            let value = fields.get(i).map(|r| &cell[r.clone()]);
            if i > 0 {
                self.cell_buf.push(b':');
            }
            let missing = value.map_or(true, |v| v == b".");
            if format_field == b"AD" && missing {
                let n_ad = n_alt + 1;
                let padded = self
                    .missing_values
                    .get(n_ad)
                    .ok_or_else(|| fail_at(self.line_number, "AD arity too large to pad"))?;
                self.cell_buf.extend_from_slice(padded);
            } else if format_field == b"PL" && missing {
                let n_pl = (n_alt + 1) * (n_alt + 2) / 2;
                let padded = self
                    .missing_values
                    .get(n_pl)
                    .ok_or_else(|| fail_at(self.line_number, "PL arity too large to pad"))?;
                self.cell_buf.extend_from_slice(padded);
            } else {
                match value {
                    Some(v) => self.cell_buf.extend_from_slice(v),
                    None => self.cell_buf.push(b'.'),
                }
            }
        }
        Ok(())
    }
}

impl Transcoder for Decoder {
    fn process_line(&mut self, line: &[u8]) -> Result<&[u8]> {
        self.line_number += 1;
        // Pass through header lines, restoring the fileformat declaration.
        if line.is_empty() || line[0] == b'#' {
            self.out.clear();
            if line.starts_with(b"##fileformat=spVCF") {
                if let Some(semicolon) = line.iter().position(|&b| b == b';') {
                    self.out.extend_from_slice(b"##fileformat=");
                    self.out.extend_from_slice(&line[semicolon + 1..]);
                    return Ok(&self.out);
                }
            }
            self.out.extend_from_slice(line);
            return Ok(&self.out);
        }
        self.stats.lines += 1;

        split_into(line, b'\t', usize::MAX, &mut self.tokens);
        if self.tokens.len() < 10 {
            return Err(self.fail("invalid spVCF: fewer than 10 columns"));
        }

        // Arity of padded AD/PL vectors depends on the ALT allele count.
        let mut n_alt = 0;
        if self.with_missing_fields {
            n_alt = 1 + bytecount(&line[self.tokens[4].clone()], b',');
        }

        // The first data row fixes the dense column count.
        if self.dense_entries.is_empty() {
            let n = self.tokens.len() - 9;
            self.dense_entries.resize(n, Vec::new());
            self.stats.n = n as u64;
        }
        let n = self.dense_entries.len();

        let mut out = std::mem::take(&mut self.out);
        out.clear();
        out.extend_from_slice(&line[self.tokens[0].clone()]);
        for i in 1..9 {
            out.push(b'\t');
            let token = &line[self.tokens[i].clone()];
            if i == 7 && token.starts_with(CHECKPOINT_INFO_TAG) {
                // Strip the checkpoint sub-field, keeping any INFO after it.
                match token.iter().position(|&b| b == b';') {
                    Some(p) => out.extend_from_slice(&token[p + 1..]),
                    None => out.push(b'.'),
                }
                continue;
            }
            if i == 8 && self.with_missing_fields {
                if self.format.is_empty() {
                    self.format = token.to_vec();
                    self.format_fields = split(token, b':', usize::MAX)
                        .into_iter()
                        .map(|r| token[r].to_vec())
                        .collect();
                    self.missing_values.push(Vec::new());
                    self.missing_values.push(b".".to_vec());
                    for arity in 2..MAX_MISSING_VALUES {
                        let mut v = self.missing_values[arity - 1].clone();
                        v.extend_from_slice(b",.");
                        self.missing_values.push(v);
                    }
                } else if self.format != token {
                    self.out = out;
                    return Err(self.fail(
                        "--with-missing-fields is unsuitable when pVCF lines have varying \
                         field FORMATs; try piping output through bcftools instead",
                    ));
                }
            }
            out.extend_from_slice(token);
        }

        // Walk the sparse columns, expanding runs against the remembered row.
        let sparse_cells = (self.tokens.len() - 9) as u64;
        let mut dense_cursor = 0usize;
        for sparse_cursor in 0..self.tokens.len() - 9 {
            let token = &line[self.tokens[sparse_cursor + 9].clone()];
            if token.is_empty() {
                self.out = out;
                return Err(self.fail("empty cell"));
            }
            if token[0] != b'"' {
                // Dense entry: remember it and copy it to the output.
                if dense_cursor >= n {
                    self.out = out;
                    return Err(self.fail(
                        "greater-than-expected number of columns implied by sparse encoding",
                    ));
                }
                if self.with_missing_fields {
                    self.add_missing_fields(token, n_alt)?;
                    self.dense_entries[dense_cursor].clear();
                    let padded = &self.cell_buf;
                    self.dense_entries[dense_cursor].extend_from_slice(padded);
                } else {
                    self.dense_entries[dense_cursor] = token.to_vec();
                }
                out.push(b'\t');
                out.extend_from_slice(&self.dense_entries[dense_cursor]);
                dense_cursor += 1;
            } else {
                // Run token: replay entries from the remembered row.
                let run = if token.len() > 1 {
                    match parse_u64(&token[1..]) {
                        Some(r) => r as usize,
                        None => {
                            self.out = out;
                            return Err(self.fail("undecodable sparse cell"));
                        }
                    }
                } else {
                    1
                };
                if run > n - dense_cursor {
                    self.out = out;
                    return Err(self.fail(format!(
                        "greater-than-expected number of columns implied by sparse encoding \
                         (expected N={n})"
                    )));
                }
                for _ in 0..run {
                    if self.dense_entries[dense_cursor].is_empty() {
                        self.out = out;
                        return Err(self.fail("missing preceding dense cells"));
                    }
                    out.push(b'\t');
                    out.extend_from_slice(&self.dense_entries[dense_cursor]);
                    dense_cursor += 1;
                }
            }
        }
        if dense_cursor != n {
            self.out = out;
            return Err(self.fail(format!(
                "unexpected number of columns implied by sparse encoding \
                 (expected N={n}, got {dense_cursor})"
            )));
        }

        self.stats.record_sparse_row(sparse_cells, n as u64);
        self.out = out;
        Ok(&self.out)
    }

    fn stats(&self) -> TranscodeStats {
        self.stats
    }
}

fn bytecount(haystack: &[u8], needle: u8) -> usize {
    haystack.iter().filter(|&&b| b == needle).count()
}
