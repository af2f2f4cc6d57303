use anyhow::{Context, Result};
use std::path::PathBuf;

use peaktree::reader::PeakTreeReader;

pub fn run(bundle: PathBuf) -> Result<()> {
    let reader = PeakTreeReader::open(&bundle)
        .with_context(|| format!("failed to open bundle {}", bundle.display()))?;
    let meta = reader.metadata();

    println!("peakTree bundle: {}", bundle.display());
    println!("  format version: {}", meta.format_version);
    println!("  location: {}", meta.location);
    println!("  institution: {}", meta.institution);
    println!("  contact: {}", meta.contact);
    println!("  created: {} (v{})", meta.creation_time, meta.software_version);
    println!(
        "  observation date: {}-{:0>2}-{:0>2}",
        meta.year, meta.month, meta.day
    );
    println!("  settings: {}", serde_json::to_string(&meta.settings)?);
    if let Some(decoupling) = meta.decoupling {
        println!("  decoupling: {decoupling} dB");
    }
    println!("  velocity bins: {}", meta.velocity.len());

    let ts = reader.timestamps();
    let rg = reader.ranges();
    println!("  time steps: {}", ts.len());
    if let (Some(first), Some(last)) = (ts.first(), ts.last()) {
        println!("  time span: {first:.0} .. {last:.0}");
    }
    println!("  range gates: {}", rg.len());
    if let (Some(first), Some(last)) = (rg.first(), rg.last()) {
        println!("  range span: {first:.0} .. {last:.0} m");
    }

    let node_count = reader.nodes().len();
    let populated = reader.cells().iter().filter(|c| c.no_nodes > 0).count();
    let max_nodes = reader.cells().iter().map(|c| c.no_nodes).max().unwrap_or(0);
    println!("  node rows: {node_count}");
    println!(
        "  populated cells: {populated} / {} (max {max_nodes} nodes)",
        reader.cells().len()
    );
    Ok(())
}
