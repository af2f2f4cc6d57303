use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use peaktree::assemble::Assembler;
use peaktree::config::{Campaign, OutputMeta};
use peaktree::formats::zspc;
use peaktree::schema::BUNDLE_EXTENSION;
use peaktree::writer::{CompressionType, WriterConfig};

pub fn run(
    input: PathBuf,
    output: Option<PathBuf>,
    system: &str,
    meta: Option<PathBuf>,
    compression_level: i32,
) -> Result<()> {
    let campaign = Campaign::for_system(system)?;
    let meta = match meta {
        Some(path) => OutputMeta::from_toml_file(&path)
            .with_context(|| format!("failed to load metadata document {}", path.display()))?,
        None => OutputMeta::default(),
    };

    let output = output.unwrap_or_else(|| input.with_extension(BUNDLE_EXTENSION));

    info!("reading spectra from {}", input.display());
    let grid = zspc::read_grid(&input)
        .with_context(|| format!("failed to read zspc file {}", input.display()))?;

    let config = WriterConfig {
        compression: CompressionType::Zstd(compression_level),
        ..Default::default()
    };

    let assembler = Assembler::new(grid, campaign, meta);
    let stats = assembler
        .assemble_time_height(&output, config)
        .context("assembly failed")?;

    info!("conversion complete");
    info!("  output bundle: {}", stats.output.display());
    info!("  time steps: {}", stats.times);
    info!("  range gates: {}", stats.ranges);
    info!("  nodes written: {}", stats.nodes_written);
    Ok(())
}
