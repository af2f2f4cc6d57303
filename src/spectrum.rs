//! Per-cell spectrum preparation.
//!
//! Raw channel reads (`Z`, `LDR`, `SNRco`) become a [`Spectrum`] record:
//! validity masks, the derived cross-polar channel `Zcx = Z * LDR`, the
//! noise threshold, optional three-tap smoothing, and the single reversal
//! of all per-bin arrays into the canonical orientation. The velocity axis
//! itself is not reversed; all bin indices downstream refer to the
//! reversed ordering.

use crate::config::Settings;
use crate::source::CellSample;
use crate::units::z2lin;

/// Fallback noise threshold when every reflectivity bin is invalid.
const NOISE_THRES_ALL_MASKED: f64 = 1e-25;

/// Cross-polar channel data of a prepared spectrum.
#[derive(Debug, Clone)]
pub struct Polarimetry {
    /// Linear depolarization ratio per bin.
    pub spec_ldr: Vec<f64>,
    /// LDR invalidity flags (non-finite bins).
    pub spec_ldr_mask: Vec<bool>,
    /// Cross-polar reflectivity `Z * LDR`.
    pub spec_zcx: Vec<f64>,
    /// Cross-polar invalidity: co/cross channel invalidity plus the
    /// cross-polar threshold test.
    pub spec_zcx_mask: Vec<bool>,
    /// `spec_zcx` with bins failing the cross-polar validity zeroed.
    pub spec_zcx_validcx: Vec<f64>,
    /// Co-polar reflectivity counterpart used in the LDR sum ratio.
    pub spec_z_validcx: Vec<f64>,
}

/// One prepared spectrum of a (time, range) cell, in reversed-bin
/// orientation.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Unix timestamp of the cell (seconds).
    pub ts: f64,
    /// Range of the cell (m).
    pub range: f32,
    /// Velocity of each bin (m/s), in file order.
    pub vel: Vec<f64>,
    /// Co-polar reflectivity per bin, linear units.
    pub spec_z: Vec<f64>,
    /// Reflectivity invalidity flags.
    pub spec_z_mask: Vec<bool>,
    /// Co-polar signal-to-noise ratio per bin.
    pub spec_snr_co: Vec<f64>,
    /// SNR invalidity flags.
    pub spec_snr_co_mask: Vec<bool>,
    /// Cross-polar channels, absent when the system records no LDR.
    pub polarimetry: Option<Polarimetry>,
    /// Reflectivity level separating signal from noise, linear units.
    pub noise_thres: f64,
    /// Antenna decoupling carried from the campaign settings (dB).
    pub decoupling: f64,
    /// Number of cells averaged into this spectrum.
    pub no_temp_avg: usize,
}

impl Spectrum {
    /// Prepare a spectrum from a single cell read.
    pub fn from_cell(
        settings: &Settings,
        ts: f64,
        range: f32,
        vel: &[f64],
        sample: &CellSample,
    ) -> Self {
        let zcx = sample
            .ldr
            .as_ref()
            .map(|ldr| mul(&sample.z, ldr));
        build(
            settings,
            ts,
            range,
            vel,
            sample.z.clone(),
            sample.ldr.clone(),
            zcx,
            sample.snr_co.clone(),
            1,
        )
    }

    /// Prepare a spectrum by averaging a window of cell reads along time.
    ///
    /// `Zcx` is formed per cell before averaging; the post-average LDR is
    /// `avg(Zcx) / avg(Z)`.
    pub fn from_window(
        settings: &Settings,
        ts: f64,
        range: f32,
        vel: &[f64],
        samples: &[CellSample],
    ) -> Self {
        let z = average(samples.iter().map(|s| &s.z));
        let snr_co = average(samples.iter().map(|s| &s.snr_co));
        let has_ldr = samples.iter().all(|s| s.ldr.is_some());
        let (zcx, ldr) = if has_ldr && !samples.is_empty() {
            let zcx_rows: Vec<Vec<f64>> = samples
                .iter()
                .filter_map(|s| s.ldr.as_ref().map(|l| mul(&s.z, l)))
                .collect();
            let zcx = average(zcx_rows.iter());
            let ldr: Vec<f64> = zcx.iter().zip(&z).map(|(&cx, &co)| cx / co).collect();
            (Some(zcx), Some(ldr))
        } else {
            (None, None)
        };
        build(settings, ts, range, vel, z, ldr, zcx, snr_co, samples.len())
    }
}

fn mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(&x, &y)| x * y).collect()
}

fn average<'a>(rows: impl Iterator<Item = &'a Vec<f64>>) -> Vec<f64> {
    let mut sum: Vec<f64> = Vec::new();
    let mut count = 0usize;
    for row in rows {
        if sum.is_empty() {
            sum = vec![0.0; row.len()];
        }
        for (acc, &v) in sum.iter_mut().zip(row) {
            *acc += v;
        }
        count += 1;
    }
    if count > 0 {
        for acc in &mut sum {
            *acc /= count as f64;
        }
    }
    sum
}

/// Symmetric three-tap convolution with weights `(0.25, 0.5, 0.25)`;
/// boundary bins use truncated taps.
fn smooth3(z: &[f64]) -> Vec<f64> {
    let n = z.len();
    (0..n)
        .map(|i| {
            let mut acc = 0.5 * z[i];
            if i > 0 {
                acc += 0.25 * z[i - 1];
            }
            if i + 1 < n {
                acc += 0.25 * z[i + 1];
            }
            acc
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn build(
    settings: &Settings,
    ts: f64,
    range: f32,
    vel: &[f64],
    z: Vec<f64>,
    ldr: Option<Vec<f64>>,
    zcx: Option<Vec<f64>>,
    snr_co: Vec<f64>,
    no_temp_avg: usize,
) -> Spectrum {
    let z_mask: Vec<bool> = z.iter().map(|&v| v == 0.0 || !v.is_finite()).collect();
    let snr_mask: Vec<bool> = snr_co.iter().map(|&v| v == 0.0).collect();

    let noise_thres = match z
        .iter()
        .zip(&z_mask)
        .filter(|(_, &m)| !m)
        .map(|(&v, _)| v)
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        }) {
        Some(min_valid) => min_valid * z2lin(settings.thres_factor_co),
        None => NOISE_THRES_ALL_MASKED,
    };

    let spec_z = if settings.smooth { smooth3(&z) } else { z };

    // the single axis reversal; every bin index below this point refers to
    // the reversed orientation
    let spec_z = reversed(spec_z);
    let spec_z_mask = reversed(z_mask);
    let spec_snr_co = reversed(snr_co);
    let spec_snr_co_mask = reversed(snr_mask);

    let polarimetry = match (ldr, zcx) {
        (Some(ldr), Some(zcx)) => {
            let ldr = reversed(ldr);
            let zcx = reversed(zcx);
            let ldr_mask: Vec<bool> = ldr.iter().map(|&v| !v.is_finite()).collect();

            let mut zcx_mask: Vec<bool> = spec_z_mask
                .iter()
                .zip(&ldr_mask)
                .map(|(&a, &b)| a || b)
                .collect();
            let thres_zcx = zcx
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .fold(None, |acc: Option<f64>, v| {
                    Some(acc.map_or(v, |a| a.min(v)))
                })
                .map(|min_cx| min_cx * z2lin(settings.thres_factor_cx));
            for (i, &v) in zcx.iter().enumerate() {
                let below = thres_zcx.map_or(false, |t| v < t);
                if below || !v.is_finite() {
                    zcx_mask[i] = true;
                }
            }

            let spec_zcx_validcx: Vec<f64> = zcx
                .iter()
                .zip(&zcx_mask)
                .map(|(&v, &m)| if m { 0.0 } else { v })
                .collect();
            // only the cross channel is zeroed at invalid bins; the
            // co-polar counterpart stays the raw spectrum
            let spec_z_validcx = spec_z.clone();

            Some(Polarimetry {
                spec_ldr: ldr,
                spec_ldr_mask: ldr_mask,
                spec_zcx: zcx,
                spec_zcx_mask: zcx_mask,
                spec_zcx_validcx,
                spec_z_validcx,
            })
        }
        _ => None,
    };

    Spectrum {
        ts,
        range,
        vel: vel.to_vec(),
        spec_z,
        spec_z_mask,
        spec_snr_co,
        spec_snr_co_mask,
        polarimetry,
        noise_thres,
        decoupling: settings.decoupling,
        no_temp_avg,
    }
}

fn reversed<T>(mut v: Vec<T>) -> Vec<T> {
    v.reverse();
    v
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::config::Campaign;
    use crate::source::CellSample;

    /// Bare spectrum over `z` with an explicit noise threshold, no
    /// masking, no smoothing, no reversal. Velocity spans -8..8 m/s.
    pub fn spectrum_from_z(z: Vec<f64>, noise_thres: f64) -> Spectrum {
        let n = z.len();
        let vel: Vec<f64> = (0..n)
            .map(|i| -8.0 + 16.0 * i as f64 / (n - 1).max(1) as f64)
            .collect();
        let mask: Vec<bool> = z.iter().map(|&v| v == 0.0 || !v.is_finite()).collect();
        Spectrum {
            ts: 0.0,
            range: 0.0,
            vel,
            spec_snr_co: z.clone(),
            spec_snr_co_mask: mask.clone(),
            spec_z: z,
            spec_z_mask: mask,
            polarimetry: None,
            noise_thres,
            decoupling: -30.0,
            no_temp_avg: 1,
        }
    }

    /// Spectrum with a directly constructed cross-polar channel.
    pub fn spectrum_with_ldr(z: Vec<f64>, ldr: Vec<f64>, noise_thres: f64) -> Spectrum {
        let zcx: Vec<f64> = z.iter().zip(&ldr).map(|(&a, &b)| a * b).collect();
        let zcx_mask: Vec<bool> = zcx.iter().map(|v| !v.is_finite()).collect();
        let zcx_validcx: Vec<f64> = zcx
            .iter()
            .zip(&zcx_mask)
            .map(|(&v, &m)| if m { 0.0 } else { v })
            .collect();
        let mut spectrum = spectrum_from_z(z.clone(), noise_thres);
        spectrum.polarimetry = Some(Polarimetry {
            spec_ldr_mask: ldr.iter().map(|v| !v.is_finite()).collect(),
            spec_ldr: ldr,
            spec_zcx: zcx,
            spec_zcx_mask: zcx_mask,
            spec_zcx_validcx: zcx_validcx,
            spec_z_validcx: z,
        });
        spectrum
    }

    fn lacros_settings() -> Settings {
        Campaign::for_system("Lacros").unwrap().settings
    }

    #[test]
    fn masks_zero_and_nonfinite_reflectivity() {
        let mut settings = lacros_settings();
        settings.smooth = false;
        let sample = CellSample::new(
            vec![0.0, 1e-6, f64::NAN, 2e-6],
            Some(vec![0.01, 0.02, 0.01, f64::NAN]),
            vec![0.0, 10.0, 20.0, 30.0],
        );
        let spectrum = Spectrum::from_cell(&settings, 0.0, 100.0, &[-2.0, -1.0, 1.0, 2.0], &sample);
        // reversed orientation
        assert_eq!(spectrum.spec_z_mask, vec![false, true, false, true]);
        assert_eq!(spectrum.spec_snr_co_mask, vec![false, false, false, true]);
        // velocity axis stays in file order
        assert_eq!(spectrum.vel, vec![-2.0, -1.0, 1.0, 2.0]);
    }

    #[test]
    fn noise_threshold_from_min_valid_bin() {
        let mut settings = lacros_settings();
        settings.smooth = false;
        settings.thres_factor_co = 3.0;
        let sample = CellSample::new(vec![0.0, 4e-7, 1e-6], None, vec![0.0, 1.0, 2.0]);
        let spectrum = Spectrum::from_cell(&settings, 0.0, 0.0, &[-1.0, 0.0, 1.0], &sample);
        assert!((spectrum.noise_thres - 4e-7 * z2lin(3.0)).abs() < 1e-18);
    }

    #[test]
    fn all_masked_falls_back_to_default_threshold() {
        let settings = lacros_settings();
        let sample = CellSample::new(vec![0.0, 0.0, f64::NAN], None, vec![0.0; 3]);
        let spectrum = Spectrum::from_cell(&settings, 0.0, 0.0, &[-1.0, 0.0, 1.0], &sample);
        assert_eq!(spectrum.noise_thres, 1e-25);
    }

    #[test]
    fn smoothing_uses_truncated_taps_at_boundaries() {
        let smoothed = smooth3(&[4.0, 0.0, 0.0, 8.0]);
        assert_eq!(smoothed, vec![2.0, 1.0, 2.0, 4.0]);
    }

    #[test]
    fn reversal_applies_to_bins_once() {
        let mut settings = lacros_settings();
        settings.smooth = false;
        let sample = CellSample::new(vec![1.0, 2.0, 3.0], None, vec![4.0, 5.0, 6.0]);
        let spectrum = Spectrum::from_cell(&settings, 0.0, 0.0, &[-1.0, 0.0, 1.0], &sample);
        assert_eq!(spectrum.spec_z, vec![3.0, 2.0, 1.0]);
        assert_eq!(spectrum.spec_snr_co, vec![6.0, 5.0, 4.0]);
    }

    #[test]
    fn cross_polar_threshold_refines_the_mask() {
        let mut settings = lacros_settings();
        settings.smooth = false;
        settings.thres_factor_cx = 3.0;
        // zcx spans two decades so the threshold knocks out the weak bin
        let sample = CellSample::new(
            vec![1e-6, 1e-6, 1e-6],
            Some(vec![0.001, 0.5, 0.5]),
            vec![1.0, 2.0, 3.0],
        );
        let spectrum = Spectrum::from_cell(&settings, 0.0, 0.0, &[-1.0, 0.0, 1.0], &sample);
        let pol = spectrum.polarimetry.as_ref().unwrap();
        // reversed: the weak bin is now last
        assert_eq!(pol.spec_zcx_mask, vec![false, false, true]);
        assert_eq!(pol.spec_zcx_validcx[2], 0.0);
        // the co-polar counterpart stays raw
        assert_eq!(pol.spec_z_validcx, spectrum.spec_z);
    }

    #[test]
    fn window_average_recomputes_ldr_from_averages() {
        let mut settings = lacros_settings();
        settings.smooth = false;
        let a = CellSample::new(vec![2e-6, 4e-6], Some(vec![0.01, 0.02]), vec![1.0, 1.0]);
        let b = CellSample::new(vec![4e-6, 8e-6], Some(vec![0.03, 0.02]), vec![3.0, 3.0]);
        let spectrum =
            Spectrum::from_window(&settings, 0.0, 0.0, &[-1.0, 1.0], &[a.clone(), b.clone()]);

        assert_eq!(spectrum.no_temp_avg, 2);
        // averages in reversed order
        assert_eq!(spectrum.spec_z, vec![6e-6, 3e-6]);
        assert_eq!(spectrum.spec_snr_co, vec![2.0, 2.0]);
        let pol = spectrum.polarimetry.as_ref().unwrap();
        let zcx0 = (2e-6 * 0.01 + 4e-6 * 0.03) / 2.0;
        assert!((pol.spec_zcx[1] - zcx0).abs() < 1e-18);
        assert!((pol.spec_ldr[1] - zcx0 / 3e-6).abs() < 1e-12);
    }
}
