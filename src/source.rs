//! Spectrum sources: the read-only view of an observation grid.
//!
//! A source exposes the time, range and velocity axes plus per-cell
//! channel reads. Reads take `&self` and implementations are `Sync`, so
//! the assembly sweep can fan out across cells.

/// Maximum span in seconds of a temporal averaging window.
pub const MAX_AVG_WINDOW_SECS: f64 = 15.0;

/// Errors raised by spectrum sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A cell index outside the grid was requested.
    #[error("cell (range {range_index}, time {time_index}) outside grid of {ranges} x {times}")]
    CellOutOfRange {
        /// Requested range index.
        range_index: usize,
        /// Requested time index.
        time_index: usize,
        /// Number of range gates.
        ranges: usize,
        /// Number of timestamps.
        times: usize,
    },

    /// The requested averaging window spans too much time.
    #[error("averaging window of {span:.1} s exceeds {MAX_AVG_WINDOW_SECS} s")]
    WindowTooLarge {
        /// Span of the offending window in seconds.
        span: f64,
    },

    /// Channel arrays with inconsistent lengths were supplied.
    #[error("channel length {got} does not match velocity axis length {expected}")]
    ChannelLength {
        /// Supplied length.
        got: usize,
        /// Velocity axis length.
        expected: usize,
    },
}

/// Channel arrays of one (range, time) cell, in file bin order.
#[derive(Debug, Clone)]
pub struct CellSample {
    /// Co-polar reflectivity, linear units.
    pub z: Vec<f64>,
    /// Linear depolarization ratio, absent for systems without a
    /// polarimetric channel.
    pub ldr: Option<Vec<f64>>,
    /// Co-polar signal-to-noise ratio.
    pub snr_co: Vec<f64>,
}

impl CellSample {
    /// Bundle channel reads of one cell.
    pub fn new(z: Vec<f64>, ldr: Option<Vec<f64>>, snr_co: Vec<f64>) -> Self {
        Self { z, ldr, snr_co }
    }
}

/// Read-only view of a multi-dimensional spectra dataset.
pub trait SpectrumSource: Sync {
    /// Unix timestamps of the time axis (seconds).
    fn timestamps(&self) -> &[f64];
    /// Range axis (m).
    fn ranges(&self) -> &[f32];
    /// Velocity axis (m/s).
    fn velocity(&self) -> &[f64];
    /// Whether `LDR` is recorded.
    fn has_ldr(&self) -> bool;
    /// Read the channels of one cell.
    fn read_cell(&self, range_index: usize, time_index: usize) -> Result<CellSample, SourceError>;
}

/// Index of the timestamp closest to `sel_ts`; the earlier index wins
/// ties.
pub fn time_index(timestamps: &[f64], sel_ts: f64) -> usize {
    let mut best = 0;
    let mut best_diff = f64::INFINITY;
    for (i, &ts) in timestamps.iter().enumerate() {
        let diff = (sel_ts - ts).abs();
        if diff < best_diff {
            best_diff = diff;
            best = i;
        }
    }
    best
}

/// Index of the range gate closest to `sel_range`.
pub fn range_index(ranges: &[f32], sel_range: f32) -> usize {
    let mut best = 0;
    let mut best_diff = f32::INFINITY;
    for (i, &rg) in ranges.iter().enumerate() {
        let diff = (sel_range - rg).abs();
        if diff < best_diff {
            best_diff = diff;
            best = i;
        }
    }
    best
}

/// Validate that the window `[it_b, it_e]` spans less than the permitted
/// averaging interval.
pub fn check_window(timestamps: &[f64], it_b: usize, it_e: usize) -> Result<(), SourceError> {
    let span = timestamps[it_e] - timestamps[it_b];
    if span >= MAX_AVG_WINDOW_SECS {
        return Err(SourceError::WindowTooLarge { span });
    }
    Ok(())
}

/// Dense in-memory observation grid, laid out `[time][range][velocity]`.
///
/// Cells start NaN-filled; ingestion and the demo generator populate them
/// with [`GridSource::set_cell`].
#[derive(Debug, Clone)]
pub struct GridSource {
    timestamps: Vec<f64>,
    ranges: Vec<f32>,
    velocity: Vec<f64>,
    z: Vec<f64>,
    ldr: Option<Vec<f64>>,
    snr_co: Vec<f64>,
}

impl GridSource {
    /// Allocate a grid over the given axes.
    pub fn new(timestamps: Vec<f64>, ranges: Vec<f32>, velocity: Vec<f64>, with_ldr: bool) -> Self {
        let len = timestamps.len() * ranges.len() * velocity.len();
        Self {
            timestamps,
            ranges,
            velocity,
            z: vec![f64::NAN; len],
            ldr: with_ldr.then(|| vec![f64::NAN; len]),
            snr_co: vec![f64::NAN; len],
        }
    }

    fn offset(&self, range_index: usize, time_index: usize) -> usize {
        (time_index * self.ranges.len() + range_index) * self.velocity.len()
    }

    fn check_cell(&self, range_index: usize, time_index: usize) -> Result<(), SourceError> {
        if range_index >= self.ranges.len() || time_index >= self.timestamps.len() {
            return Err(SourceError::CellOutOfRange {
                range_index,
                time_index,
                ranges: self.ranges.len(),
                times: self.timestamps.len(),
            });
        }
        Ok(())
    }

    /// Store the channels of one cell.
    pub fn set_cell(
        &mut self,
        range_index: usize,
        time_index: usize,
        sample: CellSample,
    ) -> Result<(), SourceError> {
        self.check_cell(range_index, time_index)?;
        let nv = self.velocity.len();
        for (name_len, expected) in [(sample.z.len(), nv), (sample.snr_co.len(), nv)] {
            if name_len != expected {
                return Err(SourceError::ChannelLength {
                    got: name_len,
                    expected,
                });
            }
        }
        let off = self.offset(range_index, time_index);
        self.z[off..off + nv].copy_from_slice(&sample.z);
        self.snr_co[off..off + nv].copy_from_slice(&sample.snr_co);
        if let (Some(ldr_store), Some(ldr)) = (self.ldr.as_mut(), sample.ldr.as_ref()) {
            if ldr.len() != nv {
                return Err(SourceError::ChannelLength {
                    got: ldr.len(),
                    expected: nv,
                });
            }
            ldr_store[off..off + nv].copy_from_slice(ldr);
        }
        Ok(())
    }
}

impl SpectrumSource for GridSource {
    fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    fn ranges(&self) -> &[f32] {
        &self.ranges
    }

    fn velocity(&self) -> &[f64] {
        &self.velocity
    }

    fn has_ldr(&self) -> bool {
        self.ldr.is_some()
    }

    fn read_cell(&self, range_index: usize, time_index: usize) -> Result<CellSample, SourceError> {
        self.check_cell(range_index, time_index)?;
        let nv = self.velocity.len();
        let off = self.offset(range_index, time_index);
        Ok(CellSample {
            z: self.z[off..off + nv].to_vec(),
            ldr: self.ldr.as_ref().map(|l| l[off..off + nv].to_vec()),
            snr_co: self.snr_co[off..off + nv].to_vec(),
        })
    }
}
