//! Statistical moments of a sub-peak, following Görsdorf (2015) and
//! Maahn (2017).
//!
//! All sums run over the inclusive bin range of a node with invalid and
//! below-threshold bins zeroed; summation order is the bin order, so the
//! results are reproducible across runs.

use crate::peaks::PeakBounds;
use crate::spectrum::Spectrum;

/// Moments attached to one traversed node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    /// Mean Doppler velocity (m/s).
    pub v: f64,
    /// RMS spectral width (m/s).
    pub width: f64,
    /// Skewness.
    pub skew: f64,
    /// Integrated reflectivity, linear units (raw sum over the bin range).
    pub z: f64,
    /// Ratio of the peak maximum to the separating threshold, linear.
    pub prominence: f64,
    /// Linear depolarization ratio integrated over the peak, linear.
    pub ldr: f64,
    /// LDR at the bin of maximum co-polar SNR, linear.
    pub ldrmax: f64,
}

/// Mean, RMS width and skewness of a reflectivity chunk over its
/// velocity bins.
fn velocity_moments(vel: &[f64], z: &[f64]) -> (f64, f64, f64) {
    let sum_z: f64 = z.iter().sum();
    let mean = vel.iter().zip(z).map(|(&x, &w)| x * w).sum::<f64>() / sum_z;
    let rms = (vel
        .iter()
        .zip(z)
        .map(|(&x, &w)| (x - mean).powi(2) * w)
        .sum::<f64>()
        / sum_z)
        .sqrt();
    let skew = vel
        .iter()
        .zip(z)
        .map(|(&x, &w)| (x - mean).powi(3) * w)
        .sum::<f64>()
        / (sum_z * rms.powi(3));
    (mean, rms, skew)
}

/// Index of the maximum within `values`; first bin wins ties. NaN
/// propagates: the first NaN bin, if any, is the maximum.
fn argmax(values: &[f64]) -> usize {
    let mut best = f64::NEG_INFINITY;
    let mut idx = 0;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            return i;
        }
        if v > best {
            best = v;
            idx = i;
        }
    }
    idx
}

/// Compute the moments of the node spanning `bounds` with separating
/// threshold `thres` (linear units).
///
/// The velocity moments weight by reflectivity with masked and
/// below-threshold bins zeroed; the integrated reflectivity `z` is the raw
/// sum. When the spectrum carries no polarimetric channel, `ldr` and
/// `ldrmax` are zero.
pub fn calc_moments(spectrum: &Spectrum, bounds: PeakBounds, thres: f64) -> Moments {
    let (l, r) = bounds;
    let z_total: f64 = spectrum.spec_z[l..=r].iter().sum();

    let masked_z: Vec<f64> = spectrum.spec_z[l..=r]
        .iter()
        .zip(&spectrum.spec_z_mask[l..=r])
        .map(|(&z, &m)| if m || z < thres { 0.0 } else { z })
        .collect();
    let (v, width, skew) = velocity_moments(&spectrum.vel[l..=r], &masked_z);

    let ind_max = argmax(&spectrum.spec_snr_co[l..=r]);
    let prominence = if spectrum.spec_z_mask[l + ind_max] {
        1e-99
    } else {
        spectrum.spec_z[l + ind_max] / thres
    };

    let (ldr, ldrmax) = match &spectrum.polarimetry {
        Some(pol) => {
            let ldrmax = pol.spec_ldr[l + ind_max];
            let any_valid_cx = pol.spec_zcx_mask[l..=r].iter().any(|&m| !m);
            let ldr = if any_valid_cx {
                pol.spec_zcx_validcx[l..=r].iter().sum::<f64>()
                    / pol.spec_z_validcx[l..=r].iter().sum::<f64>()
            } else {
                f64::NAN
            };
            let ldr = if ldr.is_finite() && ldr.abs() > 1e-8 {
                ldr
            } else {
                f64::NAN
            };
            (ldr, ldrmax)
        }
        None => (0.0, 0.0),
    };

    Moments {
        v,
        width,
        skew,
        z: z_total,
        prominence,
        ldr,
        ldrmax,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::tests::{spectrum_from_z, spectrum_with_ldr};

    /// A single Gaussian bump: the mean velocity is the bin-weighted mean,
    /// the width its standard deviation, the skewness near zero.
    #[test]
    fn gaussian_bump_moments() {
        let n = 128;
        let vel: Vec<f64> = (0..n).map(|i| -8.0 + 16.0 * i as f64 / (n - 1) as f64).collect();
        let center = 1.5;
        let sigma = 0.8;
        let z: Vec<f64> = vel
            .iter()
            .map(|&v| 1e-8 + 1e-4 * (-(v - center).powi(2) / (2.0 * sigma * sigma)).exp())
            .collect();
        let mut spectrum = spectrum_from_z(z, 3e-8);
        spectrum.vel = vel;

        let moments = calc_moments(&spectrum, (0, n - 1), spectrum.noise_thres);
        assert!((moments.v - center).abs() < 0.05);
        assert!((moments.width - sigma).abs() < 0.05);
        assert!(moments.skew.abs() < 0.05);
        assert!(moments.width >= 0.0);
        assert!(moments.skew.is_finite());
    }

    #[test]
    fn integrated_reflectivity_is_the_raw_sum() {
        let z = vec![1.0, 2.0, 3.0, 4.0];
        let spectrum = spectrum_from_z(z, 2.5);
        let moments = calc_moments(&spectrum, (0, 3), 2.5);
        // raw sum ignores the threshold, the velocity moments do not
        assert!((moments.z - 10.0).abs() < 1e-12);
    }

    #[test]
    fn prominence_of_masked_peak_bin_collapses() {
        let z = vec![0.0, 5.0, 0.0, 2.0, 3.0, 2.0];
        let mut spectrum = spectrum_from_z(z, 0.1);
        // maximum SNR sits on a masked bin
        spectrum.spec_snr_co = vec![0.0, 9.0, 0.0, 1.0, 2.0, 1.0];
        spectrum.spec_z_mask[1] = true;
        let moments = calc_moments(&spectrum, (0, 5), 0.1);
        assert_eq!(moments.prominence, 1e-99);
    }

    /// A NaN SNR bin takes the argmax over larger finite bins, so the
    /// prominence comes from the invalid bin's reflectivity.
    #[test]
    fn nan_snr_bin_captures_the_argmax() {
        let z = vec![1.0, 2.0, 5.0, 2.0];
        let mut spectrum = spectrum_from_z(z, 0.1);
        spectrum.spec_snr_co = vec![1.0, f64::NAN, 9.0, 1.0];
        let moments = calc_moments(&spectrum, (0, 3), 0.1);
        assert!((moments.prominence - 2.0 / 0.1).abs() < 1e-12);
    }

    #[test]
    fn ldr_sum_ratio() {
        let z = vec![1e-6, 4e-6, 1e-6];
        let ldr = vec![0.01, 0.02, 0.01];
        let spectrum = spectrum_with_ldr(z.clone(), ldr, 1e-8);
        let moments = calc_moments(&spectrum, (0, 2), 1e-8);

        let pol = spectrum.polarimetry.as_ref().unwrap();
        let expected = pol.spec_zcx_validcx.iter().sum::<f64>() / pol.spec_z_validcx.iter().sum::<f64>();
        assert!((moments.ldr - expected).abs() < 1e-15);
        assert!(moments.ldr > 0.0);
    }

    #[test]
    fn all_masked_cross_polar_yields_nan_ldr() {
        let z = vec![1e-6, 4e-6, 1e-6];
        let ldr = vec![f64::NAN, f64::NAN, f64::NAN];
        let spectrum = spectrum_with_ldr(z, ldr, 1e-8);
        let moments = calc_moments(&spectrum, (0, 2), 1e-8);
        assert!(moments.ldr.is_nan());
    }

    #[test]
    fn no_polarimetry_yields_zero_ldr() {
        let spectrum = spectrum_from_z(vec![1.0, 2.0, 1.0], 0.1);
        let moments = calc_moments(&spectrum, (0, 2), 0.1);
        assert_eq!(moments.ldr, 0.0);
        assert_eq!(moments.ldrmax, 0.0);
    }
}
