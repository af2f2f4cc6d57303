//! The `zspc` raw-spectra layout: a Parquet long table with one row per
//! `(timestamp, range, velocity)` sample.
//!
//! Columns: `timestamp` (Int64 unix s), `range` (Float32 m), `velocity`
//! (Float32 m/s), `z` (Float64 linear), `ldr` (Float64 linear, nullable,
//! absent for systems without a polarimetric channel), `snr_co`
//! (Float64). Rows are ordered time-major, then range, then velocity.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float32Array, Float32Builder, Float64Array, Float64Builder, Int64Array,
    Int64Builder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::source::{CellSample, GridSource, SpectrumSource};

/// Errors raised while reading or writing `zspc` files.
#[derive(Debug, thiserror::Error)]
pub enum ZspcError {
    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Arrow error.
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Parquet error.
    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// Required column missing.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// The table does not describe a dense time/range/velocity grid.
    #[error("invalid zspc layout: {0}")]
    InvalidLayout(String),

    /// Grid reconstruction error.
    #[error("source error: {0}")]
    SourceError(#[from] crate::source::SourceError),
}

/// Column names of the `zspc` table.
pub mod columns {
    /// Unix timestamp (s).
    pub const TIMESTAMP: &str = "timestamp";
    /// Range (m).
    pub const RANGE: &str = "range";
    /// Velocity (m/s).
    pub const VELOCITY: &str = "velocity";
    /// Co-polar reflectivity, linear.
    pub const Z: &str = "z";
    /// Linear depolarization ratio, linear.
    pub const LDR: &str = "ldr";
    /// Co-polar signal-to-noise ratio, linear.
    pub const SNR_CO: &str = "snr_co";
}

/// Create the Arrow schema of a `zspc` table.
pub fn create_zspc_schema(with_ldr: bool) -> Schema {
    let mut fields = vec![
        Field::new(columns::TIMESTAMP, DataType::Int64, false),
        Field::new(columns::RANGE, DataType::Float32, false),
        Field::new(columns::VELOCITY, DataType::Float32, false),
        Field::new(columns::Z, DataType::Float64, false),
    ];
    if with_ldr {
        fields.push(Field::new(columns::LDR, DataType::Float64, true));
    }
    fields.push(Field::new(columns::SNR_CO, DataType::Float64, false));
    Schema::new(fields)
}

fn get_i64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array, ZspcError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ZspcError::ColumnNotFound(name.to_string()))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| ZspcError::InvalidLayout(format!("{name} is not Int64")))
}

fn get_f32<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float32Array, ZspcError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ZspcError::ColumnNotFound(name.to_string()))?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| ZspcError::InvalidLayout(format!("{name} is not Float32")))
}

fn get_f64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array, ZspcError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ZspcError::ColumnNotFound(name.to_string()))?
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| ZspcError::InvalidLayout(format!("{name} is not Float64")))
}

/// Read a `zspc` file into a dense in-memory grid.
pub fn read_grid<P: AsRef<Path>>(path: P) -> Result<GridSource, ZspcError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut ts = Vec::new();
    let mut rg = Vec::new();
    let mut vel = Vec::new();
    let mut z = Vec::new();
    let mut snr = Vec::new();
    let mut ldr: Option<Vec<f64>> = None;

    for batch in reader {
        let batch = batch?;
        let ts_col = get_i64(&batch, columns::TIMESTAMP)?;
        let rg_col = get_f32(&batch, columns::RANGE)?;
        let vel_col = get_f32(&batch, columns::VELOCITY)?;
        let z_col = get_f64(&batch, columns::Z)?;
        let snr_col = get_f64(&batch, columns::SNR_CO)?;
        let ldr_col = batch
            .column_by_name(columns::LDR)
            .and_then(|c| c.as_any().downcast_ref::<Float64Array>());
        if ldr_col.is_some() && ldr.is_none() {
            if !ts.is_empty() {
                return Err(ZspcError::InvalidLayout(
                    "ldr column appears mid-file".to_string(),
                ));
            }
            ldr = Some(Vec::new());
        }

        for i in 0..batch.num_rows() {
            ts.push(ts_col.value(i) as f64);
            rg.push(rg_col.value(i));
            vel.push(vel_col.value(i) as f64);
            z.push(z_col.value(i));
            snr.push(snr_col.value(i));
            if let Some(ldr_values) = ldr.as_mut() {
                match ldr_col {
                    Some(col) if !col.is_null(i) => ldr_values.push(col.value(i)),
                    _ => ldr_values.push(f64::NAN),
                }
            }
        }
    }

    if ts.is_empty() {
        return Err(ZspcError::InvalidLayout("file contains no rows".to_string()));
    }

    // axis extents from the leading rows: velocity turns over fastest,
    // then range, then time
    let nv = leading_run(&ts, &rg);
    let rows_at_t0 = ts.iter().take_while(|&&t| t == ts[0]).count();
    if nv == 0 || rows_at_t0 % nv != 0 {
        return Err(ZspcError::InvalidLayout(
            "rows per cell do not divide the first time block".to_string(),
        ));
    }
    let nr = rows_at_t0 / nv;
    if ts.len() % (nr * nv) != 0 {
        return Err(ZspcError::InvalidLayout(format!(
            "{} rows do not form a dense grid of {} x {} samples",
            ts.len(),
            nr,
            nv
        )));
    }
    let nt = ts.len() / (nr * nv);

    let timestamps: Vec<f64> = (0..nt).map(|it| ts[it * nr * nv]).collect();
    let ranges: Vec<f32> = (0..nr).map(|ir| rg[ir * nv]).collect();
    let velocity: Vec<f64> = vel[..nv].to_vec();

    let mut grid = GridSource::new(timestamps.clone(), ranges.clone(), velocity.clone(), ldr.is_some());
    for it in 0..nt {
        for ir in 0..nr {
            let off = (it * nr + ir) * nv;
            if ts[off] != timestamps[it] || rg[off] != ranges[ir] {
                return Err(ZspcError::InvalidLayout(format!(
                    "row {} breaks the time/range ordering",
                    off
                )));
            }
            let sample = CellSample::new(
                z[off..off + nv].to_vec(),
                ldr.as_ref().map(|l| l[off..off + nv].to_vec()),
                snr[off..off + nv].to_vec(),
            );
            grid.set_cell(ir, it, sample)?;
        }
    }
    Ok(grid)
}

/// Length of the leading run with constant `(timestamp, range)`.
fn leading_run(ts: &[f64], rg: &[f32]) -> usize {
    ts.iter()
        .zip(rg)
        .take_while(|(&t, &r)| t == ts[0] && r == rg[0])
        .count()
}

/// Write a dense grid as a `zspc` file.
pub fn write_grid<P: AsRef<Path>>(path: P, grid: &GridSource) -> Result<(), ZspcError> {
    let with_ldr = grid.has_ldr();
    let schema = Arc::new(create_zspc_schema(with_ldr));
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    let nv = grid.velocity().len();
    let rows = grid.timestamps().len() * grid.ranges().len() * nv;
    let mut ts_b = Int64Builder::with_capacity(rows);
    let mut rg_b = Float32Builder::with_capacity(rows);
    let mut vel_b = Float32Builder::with_capacity(rows);
    let mut z_b = Float64Builder::with_capacity(rows);
    let mut ldr_b = Float64Builder::with_capacity(rows);
    let mut snr_b = Float64Builder::with_capacity(rows);

    for (it, &ts) in grid.timestamps().iter().enumerate() {
        for (ir, &rg) in grid.ranges().iter().enumerate() {
            let sample = grid.read_cell(ir, it)?;
            for iv in 0..nv {
                ts_b.append_value(ts as i64);
                rg_b.append_value(rg);
                vel_b.append_value(grid.velocity()[iv] as f32);
                z_b.append_value(sample.z[iv]);
                if with_ldr {
                    match sample.ldr.as_ref().map(|l| l[iv]) {
                        Some(v) if v.is_finite() => ldr_b.append_value(v),
                        _ => ldr_b.append_null(),
                    }
                }
                snr_b.append_value(sample.snr_co[iv]);
            }
        }
    }

    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(ts_b.finish()),
        Arc::new(rg_b.finish()),
        Arc::new(vel_b.finish()),
        Arc::new(z_b.finish()),
    ];
    if with_ldr {
        arrays.push(Arc::new(ldr_b.finish()));
    }
    arrays.push(Arc::new(snr_b.finish()));

    let batch = RecordBatch::try_new(schema, arrays)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> GridSource {
        let mut grid = GridSource::new(
            vec![100.0, 102.0],
            vec![500.0, 530.0],
            vec![-2.0, 0.0, 2.0],
            true,
        );
        for it in 0..2 {
            for ir in 0..2 {
                let scale = (1 + it + ir) as f64;
                let sample = CellSample::new(
                    vec![1e-6 * scale, 2e-6 * scale, 1e-6 * scale],
                    Some(vec![0.01, f64::NAN, 0.02]),
                    vec![1.0, 2.0 * scale, 1.0],
                );
                grid.set_cell(ir, it, sample).unwrap();
            }
        }
        grid
    }

    #[test]
    fn grid_survives_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.zspc.parquet");
        let grid = small_grid();
        write_grid(&path, &grid).unwrap();

        let back = read_grid(&path).unwrap();
        assert_eq!(back.timestamps(), grid.timestamps());
        assert_eq!(back.ranges(), grid.ranges());
        assert_eq!(back.velocity(), grid.velocity());
        assert!(back.has_ldr());

        let cell = back.read_cell(1, 1).unwrap();
        let orig = grid.read_cell(1, 1).unwrap();
        assert_eq!(cell.z, orig.z);
        assert_eq!(cell.snr_co, orig.snr_co);
        // NaN LDR bins pass through the nullable column
        let ldr = cell.ldr.unwrap();
        assert!((ldr[0] - 0.01).abs() < 1e-12);
        assert!(ldr[1].is_nan());
    }

    #[test]
    fn ragged_tables_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.zspc.parquet");
        let schema = Arc::new(create_zspc_schema(false));
        let props = WriterProperties::builder().build();
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props)).unwrap();
        // five rows cannot tile a 2-bin velocity axis
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0, 0, 0, 0, 1])),
                Arc::new(Float32Array::from(vec![1.0, 1.0, 2.0, 2.0, 1.0])),
                Arc::new(Float32Array::from(vec![-1.0, 1.0, -1.0, 1.0, -1.0])),
                Arc::new(Float64Array::from(vec![1.0; 5])),
                Arc::new(Float64Array::from(vec![1.0; 5])),
            ],
        )
        .unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        assert!(matches!(
            read_grid(&path),
            Err(ZspcError::InvalidLayout(_))
        ));
    }
}
