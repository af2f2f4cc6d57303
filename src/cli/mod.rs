use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod convert;
mod demo;
mod info;

/// peakTree - Doppler spectra to peak-tree bundle converter
#[derive(Parser)]
#[command(name = "peaktree")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a zspc spectra file to a peak-tree bundle
    Convert {
        /// Input zspc Parquet file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output bundle directory (defaults to `<input stem>.peaktree`)
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Campaign identifier selecting the settings record
        #[arg(short, long, default_value = "Lacros")]
        system: String,

        /// TOML document with institution and contact strings
        #[arg(long, value_name = "FILE")]
        meta: Option<PathBuf>,

        /// Compression level for ZSTD (1-22)
        #[arg(short = 'c', long, default_value = "3")]
        compression_level: i32,
    },

    /// Generate synthetic radar spectra and convert them
    Demo {
        /// Output bundle directory
        #[arg(value_name = "OUTPUT", default_value = "demo.peaktree")]
        output: PathBuf,

        /// Campaign identifier selecting the settings record
        #[arg(short, long, default_value = "Lacros")]
        system: String,

        /// Also keep the generated spectra as a zspc file next to the
        /// bundle
        #[arg(long)]
        keep_spectra: bool,
    },

    /// Display information about a peak-tree bundle
    Info {
        /// Bundle directory
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Convert {
            input,
            output,
            system,
            meta,
            compression_level,
        } => convert::run(input, output, &system, meta, compression_level),
        Commands::Demo {
            output,
            system,
            keep_spectra,
        } => demo::run(output, &system, keep_spectra),
        Commands::Info { bundle } => info::run(bundle),
    }
}
