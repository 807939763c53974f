//! bgzf + tabix-backed [`RegionSource`].
//!
//! Thin adapter over the noodles indexed-reading stack: the companion
//! `.tbi` (or `.csi`) index resolves each region to bgzf chunks, and the
//! indexed reader yields the raw tab-delimited lines overlapping it.

use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use noodles::bgzf;
use noodles::core::{Position, Region};
use noodles::csi;
use noodles::csi::binning_index::BinningIndex;
use noodles::tabix;

use super::RegionSource;

type TbiReader = csi::io::IndexedReader<bgzf::Reader<File>, tabix::Index>;
type CsiReader = csi::io::IndexedReader<bgzf::Reader<File>, csi::Index>;

enum IndexedSpvcf {
    Tbi(TbiReader),
    Csi(CsiReader),
}

pub struct TabixSource {
    path: PathBuf,
    reader: IndexedSpvcf,
    /// Header-line prefix declared by the index (`#` for VCF).
    meta_char: u8,
    reference_names: Vec<String>,
}

impl TabixSource {
    /// Open `path` with its companion index, trying `.tbi` then `.csi`.
    pub fn open(path: &str) -> Result<Self> {
        let tbi_path = format!("{path}.tbi");
        let csi_path = format!("{path}.csi");
        let (reader, meta_char, reference_names) = if Path::new(&tbi_path).exists() {
            let index = tabix::read(&tbi_path)
                .with_context(|| format!("failed to read index {tbi_path}"))?;
            let (meta_char, reference_names) = index_metadata(&index);
            let reader = tabix::io::indexed_reader::Builder::default()
                .set_index(index)
                .build_from_path(path)
                .with_context(|| format!("failed to open {path}"))?;
            (IndexedSpvcf::Tbi(reader), meta_char, reference_names)
        } else if Path::new(&csi_path).exists() {
            let index = csi::read(&csi_path)
                .with_context(|| format!("failed to read index {csi_path}"))?;
            let (meta_char, reference_names) = index_metadata(&index);
            let file = File::open(path).with_context(|| format!("failed to open {path}"))?;
            let reader = csi::io::IndexedReader::new(file, index);
            (IndexedSpvcf::Csi(reader), meta_char, reference_names)
        } else {
            bail!("no .tbi or .csi index found for {path}");
        };
        Ok(Self {
            path: PathBuf::from(path),
            reader,
            meta_char,
            reference_names,
        })
    }
}

impl RegionSource for TabixSource {
    /// Read the leading header lines with a fresh bgzf reader, stopping at
    /// the first line that does not carry the index's meta character.
    fn header_lines(&mut self) -> Result<Vec<Vec<u8>>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut reader = bgzf::Reader::new(file);
        let mut lines = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).context("reading header")?;
            if n == 0 {
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.is_empty() || line[0] != self.meta_char {
                break;
            }
            lines.push(line.clone());
        }
        Ok(lines)
    }

    fn lines(
        &mut self,
        chrom: &str,
        lo: Option<u64>,
        hi: Option<u64>,
    ) -> Result<Box<dyn Iterator<Item = Result<Vec<u8>>> + '_>> {
        // A chromosome absent from the index yields an empty region rather
        // than an error, mirroring how tabix itself behaves.
        if !self.reference_names.iter().any(|name| name == chrom) {
            return Ok(Box::new(std::iter::empty()));
        }
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if hi == 0 || hi < lo.max(1) {
                return Ok(Box::new(std::iter::empty()));
            }
        }
        let region = build_region(chrom, lo, hi)?;
        // The query iterator's lifetime is tied to `region`, which doesn't
        // outlive this function, so results are collected eagerly here.
        let lines: Vec<Result<Vec<u8>>> = match &mut self.reader {
            IndexedSpvcf::Tbi(reader) => reader
                .query(&region)
                .with_context(|| format!("failed to query {region}"))?
                .map(record_to_line)
                .collect(),
            IndexedSpvcf::Csi(reader) => reader
                .query(&region)
                .with_context(|| format!("failed to query {region}"))?
                .map(record_to_line)
                .collect(),
        };
        Ok(Box::new(lines.into_iter()))
    }
}

fn index_metadata<I: BinningIndex>(index: &I) -> (u8, Vec<String>) {
    match index.header() {
        Some(header) => (
            header.line_comment_prefix(),
            header
                .reference_sequence_names()
                .iter()
                .map(|name| name.to_string())
                .collect(),
        ),
        None => (b'#', Vec::new()),
    }
}

fn build_region(chrom: &str, lo: Option<u64>, hi: Option<u64>) -> Result<Region> {
    Ok(match (lo, hi) {
        (Some(lo), Some(hi)) => {
            let start = Position::try_from(lo.max(1) as usize)?;
            let end = Position::try_from(hi as usize)?;
            Region::new(chrom, start..=end)
        }
        _ => Region::new(chrom, ..),
    })
}

fn record_to_line<T: AsRef<str>>(result: std::io::Result<T>) -> Result<Vec<u8>> {
    match result {
        Ok(record) => {
            let line: &str = record.as_ref();
            Ok(line.as_bytes().to_vec())
        }
        Err(e) => Err(anyhow::Error::from(e).context("reading indexed line")),
    }
}
