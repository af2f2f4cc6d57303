//! Benchmark of the per-cell hot path: peak detection, tree
//! construction and moment computation over one spectrum.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use peaktree::spectrum::Spectrum;
use peaktree::tree::tree_from_spectrum;

fn gaussian(v: f64, center: f64, sigma: f64, height: f64) -> f64 {
    height * (-(v - center).powi(2) / (2.0 * sigma * sigma)).exp()
}

/// Trimodal spectrum over 512 bins, two modes separated by a noise gap
/// and one interior shoulder.
fn synthetic_spectrum() -> Spectrum {
    let n = 512;
    let vel: Vec<f64> = (0..n)
        .map(|i| -8.0 + 16.0 * i as f64 / (n - 1) as f64)
        .collect();
    let z: Vec<f64> = vel
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            gaussian(v, -4.0, 0.4, 5e-5)
                + gaussian(v, 1.0, 0.5, 3e-5)
                + gaussian(v, 2.2, 0.4, 2e-5)
                + 1e-9 * (1.0 + 0.2 * (i as f64 * 0.43).sin())
        })
        .collect();
    let mask = vec![false; n];
    Spectrum {
        ts: 0.0,
        range: 1000.0,
        vel,
        spec_snr_co: z.iter().map(|&x| x / 1e-9).collect(),
        spec_snr_co_mask: mask.clone(),
        spec_z: z,
        spec_z_mask: mask,
        polarimetry: None,
        noise_thres: 3e-9,
        decoupling: -30.0,
        no_temp_avg: 1,
    }
}

fn bench_tree_building(c: &mut Criterion) {
    let spectrum = synthetic_spectrum();
    c.bench_function("tree_from_spectrum 512 bins", |b| {
        b.iter(|| tree_from_spectrum(black_box(&spectrum)))
    });
}

criterion_group!(benches, bench_tree_building);
criterion_main!(benches);
