//! # peakTree - Peak Trees from Doppler Radar Spectra
//!
//! `peaktree` decomposes cloud-radar Doppler spectra into binary trees of
//! sub-peaks. For every (time, range) cell of an observation it detects
//! noise-separated peaks, refines them at interior local minima gated by
//! a prominence filter, and computes the statistical moments of every
//! tree node (reflectivity, mean velocity, width, skewness, LDR,
//! prominence). The trees of the whole time-range grid are written as a
//! Parquet bundle indexed by level-order node id.
//!
//! ## Pipeline
//!
//! 1. [`source`]: read-only view of the observation grid (`Z`, `LDR`,
//!    `SNRco` over a velocity axis).
//! 2. [`spectrum`]: per-cell preparation - masks, cross-polar channel,
//!    noise threshold, optional smoothing, axis reversal, temporal
//!    averaging.
//! 3. [`peaks`]: runs above the noise threshold and interior local
//!    minima.
//! 4. [`tree`]: binary tree construction and level-order traversal.
//! 5. [`moments`]: per-node moments.
//! 6. [`assemble`]: the sweep over all cells, parallel across the grid.
//! 7. [`writer`] / [`reader`]: the bundle on disk and its round trip.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peaktree::assemble::Assembler;
//! use peaktree::config::{Campaign, OutputMeta};
//! use peaktree::formats::zspc;
//! use peaktree::writer::WriterConfig;
//!
//! let grid = zspc::read_grid("spectra.zspc.parquet")?;
//! let campaign = Campaign::for_system("Lacros")?;
//! let assembler = Assembler::new(grid, campaign, OutputMeta::default());
//! let stats = assembler.assemble_time_height("output.peaktree", WriterConfig::default())?;
//! println!("wrote {} nodes", stats.nodes_written);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Bundle layout
//!
//! ```text
//! output.peaktree/
//! ├── nodes.parquet    # one row per emitted tree node
//! ├── cells.parquet    # one row per (time, range) cell
//! └── metadata.json    # location, settings, axes, provenance
//! ```
//!
//! Single cells can be queried interactively with
//! [`assemble::Assembler::tree_at`] before conversion, or reloaded from a
//! bundle with [`reader::PeakTreeReader::tree_at`]; the tree shape,
//! bounds and parent ids survive the round trip exactly.

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod assemble;
pub mod config;
pub mod formats;
pub mod moments;
pub mod peaks;
pub mod reader;
pub mod schema;
pub mod source;
pub mod spectrum;
pub mod tree;
pub mod units;
pub mod writer;

/// Re-export of commonly used types.
pub mod prelude {
    pub use crate::assemble::{AssembleError, AssembleStats, Assembler};
    pub use crate::config::{Campaign, ConfigError, OutputMeta, Settings};
    pub use crate::moments::Moments;
    pub use crate::reader::{PeakTreeReader, ReaderError};
    pub use crate::source::{CellSample, GridSource, SourceError, SpectrumSource};
    pub use crate::spectrum::Spectrum;
    pub use crate::tree::{full_tree_id, tree_from_spectrum, Node, TravNode, TravTree, TreeError};
    pub use crate::units::{lin2z, z2lin};
    pub use crate::writer::{
        BundleMetadata, CompressionType, PeakTreeWriter, WriterConfig, WriterError, WriterStats,
    };
}
