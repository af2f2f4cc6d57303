//! Assembly of a whole observation file into a peak-tree bundle.
//!
//! The converter walks the (time, range) grid of a spectrum source,
//! prepares each cell (optionally averaged over a temporal grid bin),
//! builds and traverses its peak tree, and packs the per-node results
//! into the bundle tables. Cells are independent, so the sweep fans out
//! over a work-stealing pool; rows are packed serially in grid order, so
//! the output is reproducible bit for bit.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use rayon::prelude::*;

use crate::config::{Campaign, OutputMeta, Settings};
use crate::schema::PEAKTREE_FORMAT_VERSION;
use crate::source::{check_window, range_index, time_index, CellSample, SourceError, SpectrumSource};
use crate::spectrum::Spectrum;
use crate::tree::{tree_from_spectrum, TravTree, TreeError};
use crate::units::lin2z;
use crate::writer::{
    BundleMetadata, CellRow, NodeRow, PeakTreeWriter, WriterConfig, WriterError,
};

/// Errors raised by the assembly pipeline. Cell-local failures are logged
/// and never surfaced here; these abort the batch.
#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    /// Source read error.
    #[error("source error: {0}")]
    SourceError(#[from] SourceError),

    /// Bundle writing error.
    #[error("writer error: {0}")]
    WriterError(#[from] WriterError),

    /// Tree construction error on a directly queried cell.
    #[error("tree error: {0}")]
    TreeError(#[from] TreeError),

    /// The requested timestamp is too far from any sample.
    #[error("timestamp {sel_ts} more than {delta:.1} s from the nearest sample")]
    TimestampOutOfRange {
        /// Requested timestamp.
        sel_ts: f64,
        /// Permitted distance (mean sampling interval).
        delta: f64,
    },

    /// The source exposes no timestamps.
    #[error("source has no timestamps")]
    EmptySource,

    /// A timestamp does not map to a calendar date.
    #[error("timestamp {0} outside the representable range")]
    InvalidTimestamp(f64),
}

/// One bin of the regular output time grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeGridBin {
    /// Left edge (unix seconds).
    pub begin_ts: f64,
    /// Right edge (unix seconds).
    pub end_ts: f64,
    /// Midpoint, emitted as the output timestamp.
    pub mid: f64,
    /// First input index digitized into this bin.
    pub index_begin: usize,
    /// One past the last input index of this bin.
    pub index_end: usize,
    /// Number of input timestamps in this bin.
    pub count: usize,
}

/// Digitize `timestamps` onto a regular grid over `ts_range` with the
/// given step; empty bins are dropped. Timestamps must be ascending.
pub fn time_grid(timestamps: &[f64], ts_range: (f64, f64), interval: f64) -> Vec<TimeGridBin> {
    let mut grid = Vec::new();
    let mut edge = ts_range.0;
    while edge < ts_range.1 + 1.0 {
        grid.push(edge);
        edge += interval;
    }
    if grid.len() < 2 {
        return Vec::new();
    }
    let nbins = grid.len() - 1;

    let mut bins = vec![
        (usize::MAX, 0usize, 0usize); // begin, end, count
        nbins
    ];
    for (j, &ts) in timestamps.iter().enumerate() {
        let edge_above = grid.partition_point(|&e| e <= ts);
        if edge_above == 0 {
            continue;
        }
        let b = edge_above - 1;
        if b >= nbins {
            // beyond the last full bin; the tail is not gridded
            continue;
        }
        let (begin, end, count) = &mut bins[b];
        if *count == 0 {
            *begin = j;
        }
        *end = j + 1;
        *count += 1;
    }

    bins.iter()
        .enumerate()
        .filter(|(_, &(_, _, count))| count != 0)
        .map(|(b, &(begin, end, count))| TimeGridBin {
            begin_ts: grid[b],
            end_ts: grid[b + 1],
            mid: grid[b] + (grid[b + 1] - grid[b]) / 2.0,
            index_begin: begin,
            index_end: end,
            count,
        })
        .collect()
}

/// Statistics of a finished assembly run.
#[derive(Debug, Clone)]
pub struct AssembleStats {
    /// Output bundle path.
    pub output: PathBuf,
    /// Output time steps.
    pub times: usize,
    /// Range gates.
    pub ranges: usize,
    /// Node rows written (after the emission cap).
    pub nodes_written: usize,
}

/// Converter of a spectrum source into a peak-tree bundle.
pub struct Assembler<S> {
    source: S,
    campaign: Campaign,
    meta: OutputMeta,
}

impl<S: SpectrumSource> Assembler<S> {
    /// Bind a source to a campaign configuration.
    pub fn new(source: S, campaign: Campaign, meta: OutputMeta) -> Self {
        Self {
            source,
            campaign,
            meta,
        }
    }

    /// Campaign settings in effect.
    pub fn settings(&self) -> &Settings {
        &self.campaign.settings
    }

    /// The underlying spectrum source.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn delta_ts(&self) -> f64 {
        let ts = self.source.timestamps();
        if ts.len() > 1 {
            (ts[ts.len() - 1] - ts[0]) / (ts.len() - 1) as f64
        } else {
            2.0
        }
    }

    /// Prepare the spectrum of one cell. `window` is `(begin, end)` in
    /// input time indices with `end` included in the average.
    fn spectrum_at(
        &self,
        it: usize,
        ir: usize,
        window: Option<(usize, usize)>,
    ) -> Result<Spectrum, AssembleError> {
        let settings = &self.campaign.settings;
        let ts = self.source.timestamps()[it];
        let rg = self.source.ranges()[ir];
        let vel = self.source.velocity();

        let strip_ldr = |mut sample: CellSample| {
            if !settings.ldr {
                sample.ldr = None;
            }
            sample
        };

        match window {
            None => {
                let sample = strip_ldr(self.source.read_cell(ir, it)?);
                Ok(Spectrum::from_cell(settings, ts, rg, vel, &sample))
            }
            Some((it_b, it_e)) => {
                let last = it_e.min(self.source.timestamps().len() - 1);
                let samples = (it_b..=last)
                    .map(|i| self.source.read_cell(ir, i).map(&strip_ldr))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Spectrum::from_window(settings, ts, rg, vel, &samples))
            }
        }
    }

    /// Build the tree of a single cell selected by timestamp and range,
    /// optionally averaging over `temporal_average` seconds around the
    /// timestamp.
    pub fn tree_at(
        &self,
        sel_ts: f64,
        sel_range: f32,
        temporal_average: Option<f64>,
    ) -> Result<(TravTree, Spectrum), AssembleError> {
        let timestamps = self.source.timestamps();
        if timestamps.is_empty() {
            return Err(AssembleError::EmptySource);
        }
        let it = time_index(timestamps, sel_ts);
        let delta = self.delta_ts();
        if (sel_ts - timestamps[it]).abs() >= delta {
            return Err(AssembleError::TimestampOutOfRange { sel_ts, delta });
        }
        let ir = range_index(self.source.ranges(), sel_range);

        let window = match temporal_average {
            Some(secs) => {
                let it_b = time_index(timestamps, sel_ts - secs / 2.0);
                let it_e = time_index(timestamps, sel_ts + secs / 2.0);
                check_window(timestamps, it_b, it_e)?;
                Some((it_b, it_e))
            }
            None => None,
        };

        let spectrum = self.spectrum_at(it, ir, window)?;
        let tree = tree_from_spectrum(&spectrum)?;
        Ok((tree, spectrum))
    }

    /// Convert the whole source into a bundle at `out_path`.
    pub fn assemble_time_height<P: AsRef<Path>>(
        &self,
        out_path: P,
        writer_config: WriterConfig,
    ) -> Result<AssembleStats, AssembleError> {
        let timestamps = self.source.timestamps();
        if timestamps.is_empty() {
            return Err(AssembleError::EmptySource);
        }
        let settings = &self.campaign.settings;
        let ranges = self.source.ranges();

        let (output_ts, windows): (Vec<f64>, Vec<Option<(usize, usize)>>) =
            match settings.grid_time {
                Some(interval) => {
                    let bins = time_grid(
                        timestamps,
                        (timestamps[0], timestamps[timestamps.len() - 1]),
                        interval,
                    );
                    (
                        bins.iter().map(|b| b.mid).collect(),
                        bins.iter()
                            .map(|b| Some((b.index_begin, b.index_end)))
                            .collect(),
                    )
                }
                None => (timestamps.to_vec(), vec![None; timestamps.len()]),
            };

        log::info!(
            "assembling {} time steps x {} ranges",
            output_ts.len(),
            ranges.len()
        );

        let cells: Vec<(usize, usize)> = (0..output_ts.len())
            .flat_map(|it| (0..ranges.len()).map(move |ir| (it, ir)))
            .collect();

        let trees: Vec<TravTree> = cells
            .par_iter()
            .map(|&(it_out, ir)| {
                let it_radar = time_index(timestamps, output_ts[it_out]);
                let result = self
                    .spectrum_at(it_radar, ir, windows[it_out])
                    .and_then(|spectrum| {
                        tree_from_spectrum(&spectrum).map_err(AssembleError::from)
                    });
                match result {
                    Ok(tree) => tree,
                    Err(e) => {
                        log::warn!(
                            "cell (time {}, range {}) dropped: {}",
                            it_out,
                            ir,
                            e
                        );
                        TravTree::new()
                    }
                }
            })
            .collect();

        let begin_dt = datetime_of(timestamps[0])?;
        let metadata = BundleMetadata {
            format_version: PEAKTREE_FORMAT_VERSION.to_string(),
            description: "peakTree processing".to_string(),
            location: self.campaign.location.clone(),
            institution: self.meta.institution.clone(),
            contact: self.meta.contact.clone(),
            creation_time: Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            settings: settings.clone(),
            day: begin_dt.day().to_string(),
            month: begin_dt.month().to_string(),
            year: begin_dt.year().to_string(),
            decoupling: settings.ldr.then_some(settings.decoupling),
            velocity: self.source.velocity().iter().map(|&v| v as f32).collect(),
        };

        let mut writer = PeakTreeWriter::create(&out_path, metadata, writer_config)?;
        let mut cell_rows = Vec::with_capacity(cells.len());
        let mut node_rows = Vec::new();

        for (cell_idx, &(it_out, ir)) in cells.iter().enumerate() {
            let tree = &trees[cell_idx];
            let ts = output_ts[it_out];
            let timestamp = ts as i32;
            let rg = ranges[ir];
            let dt = datetime_of(ts)?;
            let hours =
                dt.hour() as f64 + dt.minute() as f64 / 60.0 + dt.second() as f64 / 3600.0;

            cell_rows.push(CellRow {
                timestamp,
                time: hours as f32,
                range: rg,
                height: rg + settings.station_altitude as f32,
                no_nodes: tree.len() as i32,
            });

            for (&id, node) in tree.iter().filter(|(&id, _)| id < settings.max_no_nodes) {
                node_rows.push(NodeRow {
                    timestamp,
                    range: rg,
                    node_id: id as i32,
                    parent: node.parent_id as i32,
                    z: lin2z(node.moments.z) as f32,
                    v: node.moments.v as f32,
                    width: node.moments.width as f32,
                    skew: node.moments.skew as f32,
                    bound_l: node.bounds.0 as i32,
                    bound_r: node.bounds.1 as i32,
                    threshold: lin2z(node.thres) as f32,
                    ldr: settings.ldr.then(|| db_or_null(node.moments.ldr)).flatten(),
                    ldrmax: settings
                        .ldr
                        .then(|| db_or_null(node.moments.ldrmax))
                        .flatten(),
                    prominence: lin2z(node.moments.prominence) as f32,
                });
            }
        }

        writer.write_cells(&cell_rows)?;
        writer.write_nodes(&node_rows)?;
        let stats = writer.close()?;

        Ok(AssembleStats {
            output: out_path.as_ref().to_path_buf(),
            times: output_ts.len(),
            ranges: ranges.len(),
            nodes_written: stats.nodes_written,
        })
    }
}

fn datetime_of(ts: f64) -> Result<DateTime<Utc>, AssembleError> {
    Utc.timestamp_opt(ts as i64, 0)
        .single()
        .ok_or(AssembleError::InvalidTimestamp(ts))
}

/// dB conversion for the nullable output columns; undefined values become
/// nulls rather than NaN floats.
fn db_or_null(linear: f64) -> Option<f32> {
    let db = lin2z(linear);
    if db.is_nan() {
        None
    } else {
        Some(db as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_bins_cover_sorted_timestamps() {
        let ts: Vec<f64> = (0..10).map(|i| 100.0 + 2.0 * i as f64).collect();
        let bins = time_grid(&ts, (ts[0], ts[9]), 6.0);
        assert!(!bins.is_empty());
        // every bin keeps a contiguous index window
        for b in &bins {
            assert!(b.index_begin < b.index_end);
            assert_eq!(b.count, b.index_end - b.index_begin);
            for j in b.index_begin..b.index_end {
                assert!(ts[j] >= b.begin_ts && ts[j] < b.end_ts);
            }
            assert!((b.mid - (b.begin_ts + 3.0)).abs() < 1e-9);
        }
        // bins tile without overlap
        for pair in bins.windows(2) {
            assert!(pair[0].index_end <= pair[1].index_begin);
        }
    }

    #[test]
    fn empty_bins_are_dropped() {
        let ts = [0.0, 1.0, 7.0, 20.0];
        let bins = time_grid(&ts, (0.0, 20.0), 5.0);
        // the [10, 15) bin holds nothing and disappears; the final
        // timestamp sits past the last full bin and is not gridded
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].index_begin, 0);
        assert_eq!(bins[0].count, 2);
        assert_eq!(bins[1].index_begin, 2);
        assert_eq!(bins[1].count, 1);
        assert!((bins[1].mid - 7.5).abs() < 1e-9);
    }

    #[test]
    fn single_timestamp_grid_is_empty() {
        assert!(time_grid(&[5.0], (5.0, 5.0), 6.0).is_empty());
    }
}
