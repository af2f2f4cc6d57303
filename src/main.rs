//! # peakTree Converter
//!
//! Command-line tool for converting Doppler-radar spectra files into
//! peak-tree bundles.
//!
//! ## Usage
//!
//! ```bash
//! # Convert a zspc spectra file
//! peaktree convert spectra.zspc.parquet output.peaktree --system Lacros
//!
//! # Generate demo data
//! peaktree demo demo.peaktree
//!
//! # Inspect a bundle
//! peaktree info output.peaktree
//! ```

mod cli;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
