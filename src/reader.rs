//! Bundle reader: reload processed peak trees and their metadata.
//!
//! The reader reconstructs the traversed tree of any (time, range) cell
//! from the flat nodes table. Coordinates follow from the level-order ids
//! alone: the root is id 0 with coords `[0]`, odd ids are left children,
//! even ids right children of `(id - 1) / 2`.

use std::fs::File;
use std::path::Path;

use arrow::array::{Array, Float32Array, Int32Array};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::moments::Moments;
use crate::schema::{cell_columns, node_columns, CELLS_FILE, METADATA_FILE, NODES_FILE};
use crate::source::{range_index, time_index};
use crate::tree::{TravNode, TravTree};
use crate::units::z2lin;
use crate::writer::{BundleMetadata, CellRow, NodeRow};

/// Errors that can occur during bundle reading.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Arrow error.
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Parquet error.
    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// Metadata parsing error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Missing column in a bundle table.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// The bundle violates the format.
    #[error("invalid bundle: {0}")]
    InvalidFormat(String),
}

fn get_i32<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array, ReaderError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ReaderError::ColumnNotFound(name.to_string()))?
        .as_any()
        .downcast_ref::<Int32Array>()
        .ok_or_else(|| ReaderError::InvalidFormat(format!("{name} is not Int32")))
}

fn get_f32<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float32Array, ReaderError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ReaderError::ColumnNotFound(name.to_string()))?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| ReaderError::InvalidFormat(format!("{name} is not Float32")))
}

fn optional_f32(array: &Float32Array, idx: usize) -> Option<f32> {
    if array.is_null(idx) {
        None
    } else {
        Some(array.value(idx))
    }
}

/// Reader over a peak-tree bundle directory.
pub struct PeakTreeReader {
    metadata: BundleMetadata,
    nodes: Vec<NodeRow>,
    cells: Vec<CellRow>,
    timestamps: Vec<f64>,
    ranges: Vec<f32>,
}

impl PeakTreeReader {
    /// Open a bundle directory, loading both tables eagerly.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReaderError> {
        let root = path.as_ref();
        let metadata: BundleMetadata =
            serde_json::from_str(&std::fs::read_to_string(root.join(METADATA_FILE))?)?;

        let nodes = Self::read_nodes(&root.join(NODES_FILE))?;
        let cells = Self::read_cells(&root.join(CELLS_FILE))?;

        let mut timestamps: Vec<f64> = Vec::new();
        let mut ranges: Vec<f32> = Vec::new();
        for cell in &cells {
            if timestamps.last() != Some(&(cell.timestamp as f64)) {
                timestamps.push(cell.timestamp as f64);
            }
            if !ranges.contains(&cell.range) {
                ranges.push(cell.range);
            }
        }

        Ok(Self {
            metadata,
            nodes,
            cells,
            timestamps,
            ranges,
        })
    }

    fn read_nodes(path: &Path) -> Result<Vec<NodeRow>, ReaderError> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch?;
            let timestamp = get_i32(&batch, node_columns::TIMESTAMP)?;
            let range = get_f32(&batch, node_columns::RANGE)?;
            let node_id = get_i32(&batch, node_columns::NODE_ID)?;
            let parent = get_i32(&batch, node_columns::PARENT)?;
            let z = get_f32(&batch, node_columns::Z)?;
            let v = get_f32(&batch, node_columns::V)?;
            let width = get_f32(&batch, node_columns::WIDTH)?;
            let skew = get_f32(&batch, node_columns::SKEW)?;
            let bound_l = get_i32(&batch, node_columns::BOUND_L)?;
            let bound_r = get_i32(&batch, node_columns::BOUND_R)?;
            let threshold = get_f32(&batch, node_columns::THRESHOLD)?;
            let ldr = get_f32(&batch, node_columns::LDR)?;
            let ldrmax = get_f32(&batch, node_columns::LDRMAX)?;
            let prominence = get_f32(&batch, node_columns::PROMINENCE)?;
            for i in 0..batch.num_rows() {
                rows.push(NodeRow {
                    timestamp: timestamp.value(i),
                    range: range.value(i),
                    node_id: node_id.value(i),
                    parent: parent.value(i),
                    z: z.value(i),
                    v: v.value(i),
                    width: width.value(i),
                    skew: skew.value(i),
                    bound_l: bound_l.value(i),
                    bound_r: bound_r.value(i),
                    threshold: threshold.value(i),
                    ldr: optional_f32(ldr, i),
                    ldrmax: optional_f32(ldrmax, i),
                    prominence: prominence.value(i),
                });
            }
        }
        Ok(rows)
    }

    fn read_cells(path: &Path) -> Result<Vec<CellRow>, ReaderError> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch?;
            let timestamp = get_i32(&batch, cell_columns::TIMESTAMP)?;
            let time = get_f32(&batch, cell_columns::TIME)?;
            let range = get_f32(&batch, cell_columns::RANGE)?;
            let height = get_f32(&batch, cell_columns::HEIGHT)?;
            let no_nodes = get_i32(&batch, cell_columns::NO_NODES)?;
            for i in 0..batch.num_rows() {
                rows.push(CellRow {
                    timestamp: timestamp.value(i),
                    time: time.value(i),
                    range: range.value(i),
                    height: height.value(i),
                    no_nodes: no_nodes.value(i),
                });
            }
        }
        Ok(rows)
    }

    /// Bundle metadata document.
    pub fn metadata(&self) -> &BundleMetadata {
        &self.metadata
    }

    /// Output time axis (unix seconds).
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Output range axis (m).
    pub fn ranges(&self) -> &[f32] {
        &self.ranges
    }

    /// All rows of the cells table.
    pub fn cells(&self) -> &[CellRow] {
        &self.cells
    }

    /// All rows of the nodes table.
    pub fn nodes(&self) -> &[NodeRow] {
        &self.nodes
    }

    /// Number of detected nodes in the cell closest to `(sel_ts,
    /// sel_range)`.
    pub fn no_nodes_at(&self, sel_ts: f64, sel_range: f32) -> Option<i32> {
        let ts = self.timestamps.get(time_index(&self.timestamps, sel_ts))?;
        let rg = self.ranges.get(range_index(&self.ranges, sel_range))?;
        self.cells
            .iter()
            .find(|c| c.timestamp as f64 == *ts && c.range == *rg)
            .map(|c| c.no_nodes)
    }

    /// Reconstruct the traversed tree of the cell closest to `(sel_ts,
    /// sel_range)`.
    ///
    /// Reflectivity-like fields are converted back to linear units;
    /// coordinates and parent links are rebuilt from the level-order ids.
    pub fn tree_at(&self, sel_ts: f64, sel_range: f32) -> Result<TravTree, ReaderError> {
        if self.timestamps.is_empty() || self.ranges.is_empty() {
            return Err(ReaderError::InvalidFormat("bundle has no cells".to_string()));
        }
        let ts = self.timestamps[time_index(&self.timestamps, sel_ts)] as i32;
        let rg = self.ranges[range_index(&self.ranges, sel_range)];

        let mut tree = TravTree::new();
        let mut rows: Vec<&NodeRow> = self
            .nodes
            .iter()
            .filter(|n| n.timestamp == ts && n.range == rg)
            .collect();
        rows.sort_by_key(|n| n.node_id);

        for row in rows {
            let id = row.node_id as usize;
            let coords = if id == 0 {
                vec![0]
            } else {
                let parent = tree.get(&(row.parent as usize)).ok_or_else(|| {
                    ReaderError::InvalidFormat(format!(
                        "node {} references missing parent {}",
                        id, row.parent
                    ))
                })?;
                let mut coords = parent.coords.clone();
                coords.push(if id % 2 == 0 { 1 } else { 0 });
                coords
            };
            tree.insert(
                id,
                TravNode {
                    coords,
                    bounds: (row.bound_l as usize, row.bound_r as usize),
                    thres: z2lin(row.threshold as f64),
                    parent_id: row.parent as i64,
                    moments: Moments {
                        v: row.v as f64,
                        width: row.width as f64,
                        skew: row.skew as f64,
                        z: z2lin(row.z as f64),
                        prominence: z2lin(row.prominence as f64),
                        ldr: row.ldr.map_or(f64::NAN, |x| z2lin(x as f64)),
                        ldrmax: row.ldrmax.map_or(f64::NAN, |x| z2lin(x as f64)),
                    },
                },
            );
        }
        Ok(tree)
    }
}
