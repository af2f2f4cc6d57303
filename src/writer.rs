//! Bundle writer for processed peak trees.
//!
//! A bundle is a directory with two Parquet tables and a sidecar
//! metadata document:
//!
//! ```text
//! output.peaktree/
//! ├── nodes.parquet    # one row per emitted tree node
//! ├── cells.parquet    # one row per (time, range) cell
//! └── metadata.json    # location, settings, axes, provenance
//! ```
//!
//! Both Parquet footers also carry the format version and the serialized
//! settings record, so each table stays self-describing on its own.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float32Builder, Int32Builder};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::schema::{
    create_cells_schema_arc, create_nodes_schema_arc, CELLS_FILE, KEY_FORMAT_VERSION,
    KEY_SETTINGS, METADATA_FILE, NODES_FILE, PEAKTREE_FORMAT_VERSION,
};

/// Errors that can occur during bundle writing.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Arrow error.
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Parquet error.
    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// Metadata serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Compression options for the bundle tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// ZSTD compression (recommended).
    Zstd(i32),
    /// Snappy compression (faster, slightly larger files).
    Snappy,
    /// No compression.
    Uncompressed,
}

impl Default for CompressionType {
    fn default() -> Self {
        Self::Zstd(3)
    }
}

/// Configuration for the bundle writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Compression applied to both tables.
    pub compression: CompressionType,
    /// Target rows per Parquet row group.
    pub row_group_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression: CompressionType::default(),
            row_group_size: 100_000,
        }
    }
}

impl WriterConfig {
    fn writer_properties(&self, settings_json: &str) -> WriterProperties {
        let compression = match self.compression {
            CompressionType::Zstd(level) => {
                Compression::ZSTD(ZstdLevel::try_new(level).unwrap_or_default())
            }
            CompressionType::Snappy => Compression::SNAPPY,
            CompressionType::Uncompressed => Compression::UNCOMPRESSED,
        };
        WriterProperties::builder()
            .set_compression(compression)
            .set_max_row_group_size(self.row_group_size)
            .set_key_value_metadata(Some(vec![
                KeyValue {
                    key: KEY_FORMAT_VERSION.to_string(),
                    value: Some(PEAKTREE_FORMAT_VERSION.to_string()),
                },
                KeyValue {
                    key: KEY_SETTINGS.to_string(),
                    value: Some(settings_json.to_string()),
                },
            ]))
            .build()
    }
}

/// Metadata document written to `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Format version of the bundle.
    pub format_version: String,
    /// Short description of the processing.
    pub description: String,
    /// Site name.
    pub location: String,
    /// Institution operating the instrument.
    pub institution: String,
    /// Contact address.
    pub contact: String,
    /// UTC creation timestamp.
    pub creation_time: String,
    /// Version of the converting software.
    pub software_version: String,
    /// Settings record the file was produced with.
    pub settings: Settings,
    /// Day of the first observation.
    pub day: String,
    /// Month of the first observation.
    pub month: String,
    /// Year of the first observation.
    pub year: String,
    /// LDR decoupling (dB), present when the system records LDR.
    pub decoupling: Option<f64>,
    /// Velocity axis of the input spectra (m/s).
    pub velocity: Vec<f32>,
}

/// One row of the nodes table, already converted to output units.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    /// Unix timestamp of the cell (s).
    pub timestamp: i32,
    /// Range of the cell (m).
    pub range: f32,
    /// Level-order node id.
    pub node_id: i32,
    /// Parent node id, -1 for the root.
    pub parent: i32,
    /// Integrated reflectivity (dBZ).
    pub z: f32,
    /// Mean velocity (m/s).
    pub v: f32,
    /// Spectral width (m/s).
    pub width: f32,
    /// Skewness.
    pub skew: f32,
    /// Left bound (bin).
    pub bound_l: i32,
    /// Right bound (bin).
    pub bound_r: i32,
    /// Sub-peak threshold (dBZ).
    pub threshold: f32,
    /// LDR (dB), `None` when undefined or not recorded.
    pub ldr: Option<f32>,
    /// LDR at the SNR maximum (dB), `None` when undefined or not recorded.
    pub ldrmax: Option<f32>,
    /// Prominence above the threshold (dB).
    pub prominence: f32,
}

/// One row of the cells table.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRow {
    /// Unix timestamp (s).
    pub timestamp: i32,
    /// Decimal hours from midnight UTC.
    pub time: f32,
    /// Range (m).
    pub range: f32,
    /// Height above mean sea level (m).
    pub height: f32,
    /// Number of detected nodes before the emission cap.
    pub no_nodes: i32,
}

/// Statistics returned when a bundle is finalized.
#[derive(Debug, Clone, Copy)]
pub struct WriterStats {
    /// Node rows written.
    pub nodes_written: usize,
    /// Cell rows written.
    pub cells_written: usize,
}

/// Streaming writer for a peak-tree bundle.
pub struct PeakTreeWriter {
    root: PathBuf,
    metadata: BundleMetadata,
    nodes_writer: ArrowWriter<File>,
    cells_writer: ArrowWriter<File>,
    nodes_written: usize,
    cells_written: usize,
}

impl PeakTreeWriter {
    /// Create a bundle directory and open both table writers.
    pub fn create<P: AsRef<Path>>(
        path: P,
        metadata: BundleMetadata,
        config: WriterConfig,
    ) -> Result<Self, WriterError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let settings_json = serde_json::to_string(&metadata.settings)?;
        let props = config.writer_properties(&settings_json);

        let nodes_file = File::create(root.join(NODES_FILE))?;
        let nodes_writer =
            ArrowWriter::try_new(nodes_file, create_nodes_schema_arc(), Some(props.clone()))?;
        let cells_file = File::create(root.join(CELLS_FILE))?;
        let cells_writer =
            ArrowWriter::try_new(cells_file, create_cells_schema_arc(), Some(props))?;

        Ok(Self {
            root,
            metadata,
            nodes_writer,
            cells_writer,
            nodes_written: 0,
            cells_written: 0,
        })
    }

    /// Append rows to the nodes table.
    pub fn write_nodes(&mut self, rows: &[NodeRow]) -> Result<(), WriterError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut timestamp = Int32Builder::with_capacity(rows.len());
        let mut range = Float32Builder::with_capacity(rows.len());
        let mut node_id = Int32Builder::with_capacity(rows.len());
        let mut parent = Int32Builder::with_capacity(rows.len());
        let mut z = Float32Builder::with_capacity(rows.len());
        let mut v = Float32Builder::with_capacity(rows.len());
        let mut width = Float32Builder::with_capacity(rows.len());
        let mut skew = Float32Builder::with_capacity(rows.len());
        let mut bound_l = Int32Builder::with_capacity(rows.len());
        let mut bound_r = Int32Builder::with_capacity(rows.len());
        let mut threshold = Float32Builder::with_capacity(rows.len());
        let mut ldr = Float32Builder::with_capacity(rows.len());
        let mut ldrmax = Float32Builder::with_capacity(rows.len());
        let mut prominence = Float32Builder::with_capacity(rows.len());

        for row in rows {
            timestamp.append_value(row.timestamp);
            range.append_value(row.range);
            node_id.append_value(row.node_id);
            parent.append_value(row.parent);
            z.append_value(row.z);
            v.append_value(row.v);
            width.append_value(row.width);
            skew.append_value(row.skew);
            bound_l.append_value(row.bound_l);
            bound_r.append_value(row.bound_r);
            threshold.append_value(row.threshold);
            match row.ldr {
                Some(value) => ldr.append_value(value),
                None => ldr.append_null(),
            }
            match row.ldrmax {
                Some(value) => ldrmax.append_value(value),
                None => ldrmax.append_null(),
            }
            prominence.append_value(row.prominence);
        }

        let arrays: Vec<ArrayRef> = vec![
            Arc::new(timestamp.finish()),
            Arc::new(range.finish()),
            Arc::new(node_id.finish()),
            Arc::new(parent.finish()),
            Arc::new(z.finish()),
            Arc::new(v.finish()),
            Arc::new(width.finish()),
            Arc::new(skew.finish()),
            Arc::new(bound_l.finish()),
            Arc::new(bound_r.finish()),
            Arc::new(threshold.finish()),
            Arc::new(ldr.finish()),
            Arc::new(ldrmax.finish()),
            Arc::new(prominence.finish()),
        ];
        let batch = RecordBatch::try_new(create_nodes_schema_arc(), arrays)?;
        self.nodes_writer.write(&batch)?;
        self.nodes_written += rows.len();
        Ok(())
    }

    /// Append rows to the cells table.
    pub fn write_cells(&mut self, rows: &[CellRow]) -> Result<(), WriterError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut timestamp = Int32Builder::with_capacity(rows.len());
        let mut time = Float32Builder::with_capacity(rows.len());
        let mut range = Float32Builder::with_capacity(rows.len());
        let mut height = Float32Builder::with_capacity(rows.len());
        let mut no_nodes = Int32Builder::with_capacity(rows.len());
        for row in rows {
            timestamp.append_value(row.timestamp);
            time.append_value(row.time);
            range.append_value(row.range);
            height.append_value(row.height);
            no_nodes.append_value(row.no_nodes);
        }
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(timestamp.finish()),
            Arc::new(time.finish()),
            Arc::new(range.finish()),
            Arc::new(height.finish()),
            Arc::new(no_nodes.finish()),
        ];
        let batch = RecordBatch::try_new(create_cells_schema_arc(), arrays)?;
        self.cells_writer.write(&batch)?;
        self.cells_written += rows.len();
        Ok(())
    }

    /// Finalize both tables and write `metadata.json`.
    pub fn close(self) -> Result<WriterStats, WriterError> {
        self.nodes_writer.close()?;
        self.cells_writer.close()?;

        let json = serde_json::to_string_pretty(&self.metadata)?;
        fs::write(self.root.join(METADATA_FILE), json)?;

        log::info!(
            "wrote bundle {} ({} nodes, {} cells)",
            self.root.display(),
            self.nodes_written,
            self.cells_written
        );
        Ok(WriterStats {
            nodes_written: self.nodes_written,
            cells_written: self.cells_written,
        })
    }
}
