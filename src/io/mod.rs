//! Input and output stream setup for the CLI.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, IsTerminal, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Open the input stream: a file path, or standard input for `None` / `-`.
///
/// Refuses to read from an interactive terminal (the caller almost certainly
/// forgot the input file), and peeks at the first two bytes so gzipped input
/// is rejected with a hint instead of being transcoded as garbage.
pub fn open_input(path: Option<&str>) -> Result<Box<dyn BufRead + Send>> {
    let mut reader: Box<dyn BufRead + Send> = match path {
        Some(p) if p != "-" => {
            let file =
                File::open(p).with_context(|| format!("failed to open input file: {p}"))?;
            Box::new(BufReader::new(file))
        }
        _ => {
            if io::stdin().is_terminal() {
                bail!(
                    "no input file given and standard input is a terminal; \
                     run `spvcf help` for usage"
                );
            }
            Box::new(BufReader::new(io::stdin()))
        }
    };
    let peek = reader.fill_buf().context("reading input")?;
    if peek.len() >= 2 && peek[0] == 0x1f && peek[1] == 0x8b {
        bail!(
            "input appears to be gzip-compressed; decompress it first, \
             e.g. `bgzip -dc in.gz | spvcf ...`"
        );
    }
    Ok(reader)
}

/// Open the output stream: a file path, or standard output for `None`.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(p) => {
            let file = File::create(p)
                .with_context(|| format!("failed to create output file: {}", p.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_rejects_gzip_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.vcf.gz");
        let mut f = File::create(&path).unwrap();
        f.write_all(&[0x1f, 0x8b, 0x08, 0x00]).unwrap();
        drop(f);
        let err = match open_input(Some(path.to_str().unwrap())) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e.to_string(),
        };
        assert!(err.contains("gzip"), "{err}");
    }

    #[test]
    fn test_opens_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.vcf");
        std::fs::write(&path, "##fileformat=VCFv4.2\n").unwrap();
        let mut reader = open_input(Some(path.to_str().unwrap())).unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "##fileformat=VCFv4.2\n");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = match open_input(Some("/definitely/not/here.vcf")) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e.to_string(),
        };
        assert!(err.contains("failed to open input file"), "{err}");
    }
}
