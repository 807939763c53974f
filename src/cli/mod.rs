use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spvcf")]
#[command(version)]
#[command(about = "Sparse Project VCF codec", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode Project VCF to Sparse Project VCF
    Encode(EncodeArgs),
    /// Squeeze Project VCF without sparse encoding
    Squeeze(SqueezeArgs),
    /// Decode Sparse Project VCF back to Project VCF
    Decode(DecodeArgs),
    /// Slice a bgzip-compressed, tabix-indexed spVCF by genomic range
    Tabix(TabixArgs),
}

#[derive(Parser)]
pub struct EncodeArgs {
    /// Input pVCF file (reads standard input if omitted or `-`)
    #[arg(value_name = "IN")]
    pub input: Option<String>,

    /// Write to this file instead of standard output
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Ensure checkpoints (full dense rows) at this period or less (0 disables)
    #[arg(short, long, default_value_t = 1000, value_name = "P")]
    pub period: u64,

    /// Disable the lossy squeeze transformation (truncating cells to GT:DP
    /// when AD or VR show no alternate-allele reads)
    #[arg(long)]
    pub no_squeeze: bool,

    /// Rounding base for squeezed DP values (rounded down to a power of this;
    /// must be greater than 1)
    #[arg(short, long, default_value_t = 2.0, value_name = "R")]
    pub resolution: f64,

    /// Number of encoder threads
    #[arg(short = 't', long, default_value_t = 1, value_name = "T")]
    pub threads: usize,

    /// Suppress statistics printed to standard error
    #[arg(short, long)]
    pub quiet: bool,
}

impl Default for EncodeArgs {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            period: 1000,
            no_squeeze: false,
            resolution: 2.0,
            threads: 1,
            quiet: false,
        }
    }
}

#[derive(Parser)]
pub struct SqueezeArgs {
    /// Input pVCF file (reads standard input if omitted or `-`)
    #[arg(value_name = "IN")]
    pub input: Option<String>,

    /// Write to this file instead of standard output
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Rounding base for squeezed DP values (must be greater than 1)
    #[arg(short, long, default_value_t = 2.0, value_name = "R")]
    pub resolution: f64,

    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = 1, value_name = "T")]
    pub threads: usize,

    /// Suppress statistics printed to standard error
    #[arg(short, long)]
    pub quiet: bool,
}

impl Default for SqueezeArgs {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            resolution: 2.0,
            threads: 1,
            quiet: false,
        }
    }
}

#[derive(Parser, Default)]
pub struct DecodeArgs {
    /// Input spVCF file (reads standard input if omitted or `-`)
    #[arg(value_name = "IN")]
    pub input: Option<String>,

    /// Write to this file instead of standard output
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Pad each cell out to its FORMAT with missing values (requires the
    /// FORMAT to be constant across the stream)
    #[arg(long)]
    pub with_missing_fields: bool,

    /// Suppress statistics printed to standard error
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Parser)]
pub struct TabixArgs {
    /// bgzip-compressed spVCF with a .tbi or .csi index alongside
    #[arg(value_name = "IN.SPVCF.GZ")]
    pub input: String,

    /// Regions to slice, as `chrom` or `chrom:lo-hi` (1-based, inclusive)
    #[arg(value_name = "REGION", required = true, num_args = 1..)]
    pub regions: Vec<String>,

    /// Write to this file instead of standard output
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_defaults() {
        let cli = Cli::try_parse_from(["spvcf", "encode", "in.vcf"]).unwrap();
        match cli.command {
            Commands::Encode(args) => {
                assert_eq!(args.input.as_deref(), Some("in.vcf"));
                assert_eq!(args.period, 1000);
                assert!(!args.no_squeeze);
                assert_eq!(args.resolution, 2.0);
                assert_eq!(args.threads, 1);
            }
            _ => panic!("expected encode subcommand"),
        }
    }

    #[test]
    fn test_encode_flags() {
        let cli = Cli::try_parse_from([
            "spvcf", "encode", "-p", "500", "--no-squeeze", "-t", "4", "-o", "out.spvcf", "-",
        ])
        .unwrap();
        match cli.command {
            Commands::Encode(args) => {
                assert_eq!(args.input.as_deref(), Some("-"));
                assert_eq!(args.period, 500);
                assert!(args.no_squeeze);
                assert_eq!(args.threads, 4);
                assert_eq!(args.output.unwrap(), PathBuf::from("out.spvcf"));
            }
            _ => panic!("expected encode subcommand"),
        }
    }

    #[test]
    fn test_tabix_requires_region() {
        assert!(Cli::try_parse_from(["spvcf", "tabix", "in.spvcf.gz"]).is_err());
        let cli = Cli::try_parse_from(["spvcf", "tabix", "in.spvcf.gz", "chr1:1000-2000", "chr2"])
            .unwrap();
        match cli.command {
            Commands::Tabix(args) => {
                assert_eq!(args.regions, vec!["chr1:1000-2000", "chr2"]);
            }
            _ => panic!("expected tabix subcommand"),
        }
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        assert!(Cli::try_parse_from(["spvcf", "transmogrify"]).is_err());
    }
}
