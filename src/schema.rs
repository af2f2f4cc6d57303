//! Arrow schema definitions for the peak-tree bundle tables.
//!
//! A bundle holds two long tables: `nodes.parquet` with one row per
//! emitted tree node and `cells.parquet` with one row per (time, range)
//! cell of the output grid. Rows are ordered by (time, range, node id),
//! so the repeated cell coordinates compress well under dictionary
//! encoding and RLE.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};

/// Bundle format version, semantic versioning.
pub const PEAKTREE_FORMAT_VERSION: &str = "1.0.0";

/// Extension of a bundle directory.
pub const BUNDLE_EXTENSION: &str = "peaktree";

/// File name of the per-node table inside a bundle.
pub const NODES_FILE: &str = "nodes.parquet";

/// File name of the per-cell table inside a bundle.
pub const CELLS_FILE: &str = "cells.parquet";

/// File name of the human-readable metadata document inside a bundle.
pub const METADATA_FILE: &str = "metadata.json";

/// Parquet footer key carrying the format version.
pub const KEY_FORMAT_VERSION: &str = "peaktree:format_version";

/// Parquet footer key carrying the serialized settings record.
pub const KEY_SETTINGS: &str = "peaktree:settings";

/// Column names of the nodes table.
pub mod node_columns {
    /// Unix timestamp of the cell (s).
    pub const TIMESTAMP: &str = "timestamp";
    /// Range of the cell (m).
    pub const RANGE: &str = "range";
    /// Level-order node id.
    pub const NODE_ID: &str = "node_id";
    /// Level-order id of the parent node, -1 for the root.
    pub const PARENT: &str = "parent";
    /// Integrated reflectivity (dBZ).
    pub const Z: &str = "Z";
    /// Mean velocity (m/s).
    pub const V: &str = "v";
    /// Spectral width (m/s).
    pub const WIDTH: &str = "width";
    /// Skewness.
    pub const SKEW: &str = "skew";
    /// Left bound of the peak (bin).
    pub const BOUND_L: &str = "bound_l";
    /// Right bound of the peak (bin).
    pub const BOUND_R: &str = "bound_r";
    /// Sub-peak threshold (dBZ).
    pub const THRESHOLD: &str = "threshold";
    /// Linear depolarization ratio (dB).
    pub const LDR: &str = "LDR";
    /// LDR at the bin of maximum SNR (dB).
    pub const LDRMAX: &str = "ldrmax";
    /// Prominence of the peak above its threshold (dB).
    pub const PROMINENCE: &str = "prominence";
}

/// Column names of the cells table.
pub mod cell_columns {
    /// Unix timestamp (s).
    pub const TIMESTAMP: &str = "timestamp";
    /// Decimal hours from midnight UTC.
    pub const TIME: &str = "time";
    /// Range (m).
    pub const RANGE: &str = "range";
    /// Height above mean sea level (m).
    pub const HEIGHT: &str = "height";
    /// Number of detected nodes, before the emission cap.
    pub const NO_NODES: &str = "no_nodes";
}

/// Create the Arrow schema of the nodes table.
pub fn create_nodes_schema() -> Schema {
    Schema::new(vec![
        Field::new(node_columns::TIMESTAMP, DataType::Int32, false),
        Field::new(node_columns::RANGE, DataType::Float32, false),
        Field::new(node_columns::NODE_ID, DataType::Int32, false),
        Field::new(node_columns::PARENT, DataType::Int32, false),
        Field::new(node_columns::Z, DataType::Float32, false),
        Field::new(node_columns::V, DataType::Float32, false),
        Field::new(node_columns::WIDTH, DataType::Float32, false),
        Field::new(node_columns::SKEW, DataType::Float32, false),
        Field::new(node_columns::BOUND_L, DataType::Int32, false),
        Field::new(node_columns::BOUND_R, DataType::Int32, false),
        Field::new(node_columns::THRESHOLD, DataType::Float32, false),
        Field::new(node_columns::LDR, DataType::Float32, true),
        Field::new(node_columns::LDRMAX, DataType::Float32, true),
        Field::new(node_columns::PROMINENCE, DataType::Float32, false),
    ])
}

/// Create the Arrow schema of the nodes table wrapped in an `Arc`.
pub fn create_nodes_schema_arc() -> Arc<Schema> {
    Arc::new(create_nodes_schema())
}

/// Create the Arrow schema of the cells table.
pub fn create_cells_schema() -> Schema {
    Schema::new(vec![
        Field::new(cell_columns::TIMESTAMP, DataType::Int32, false),
        Field::new(cell_columns::TIME, DataType::Float32, false),
        Field::new(cell_columns::RANGE, DataType::Float32, false),
        Field::new(cell_columns::HEIGHT, DataType::Float32, false),
        Field::new(cell_columns::NO_NODES, DataType::Int32, false),
    ])
}

/// Create the Arrow schema of the cells table wrapped in an `Arc`.
pub fn create_cells_schema_arc() -> Arc<Schema> {
    Arc::new(create_cells_schema())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_schema_shape() {
        let schema = create_nodes_schema();
        assert_eq!(schema.fields().len(), 14);
        assert!(!schema.field_with_name(node_columns::Z).unwrap().is_nullable());
        assert!(schema.field_with_name(node_columns::LDR).unwrap().is_nullable());
    }

    #[test]
    fn cells_schema_shape() {
        let schema = create_cells_schema();
        assert_eq!(schema.fields().len(), 5);
        assert_eq!(
            schema.field_with_name(cell_columns::NO_NODES).unwrap().data_type(),
            &DataType::Int32
        );
    }
}
