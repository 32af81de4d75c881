//! Synthetic dataset generators with known true parameters.
//!
//! Both generators are deterministic given a seed (ChaCha20 stream), so
//! calibration and reproducibility tests can pin their output.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::f64::consts::TAU;

use crate::data::Dataset;
use crate::error::Result;

/// True parameters of the Gaussian linear generating process.
#[derive(Debug, Clone, Copy)]
pub struct TrueParams {
    pub intercept: f64,
    pub slope: f64,
    pub sigma: f64,
}

impl Default for TrueParams {
    fn default() -> Self {
        Self {
            intercept: 2.0,
            slope: 3.0,
            sigma: 1.0,
        }
    }
}

/// Temperature range (degrees F) for the synthetic count process, matching
/// the shape of the air-quality data the Poisson model is taught on.
const TEMP_RANGE: (f64, f64) = (55.0, 95.0);

/// Standard normal via Box-Muller.
pub(crate) fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // 1 - u maps [0,1) to (0,1], keeping the log finite.
    let u1 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

/// Poisson draw by inversion for small rates, normal approximation above.
fn poisson<R: Rng>(rng: &mut R, rate: f64) -> u64 {
    if rate <= 0.0 {
        return 0;
    }
    if rate < 30.0 {
        let limit = (-rate).exp();
        let mut product: f64 = rng.random();
        let mut count = 0u64;
        while product > limit {
            product *= rng.random::<f64>();
            count += 1;
        }
        count
    } else {
        let draw = rate + rate.sqrt() * standard_normal(rng);
        draw.round().max(0.0) as u64
    }
}

/// Generate `n` observations of the linear process: x ~ Normal(0, 1),
/// y = intercept + slope * x + Normal(0, sigma). Columns `x`, `y`.
pub fn generate_linear(n: usize, params: &TrueParams, seed: u64) -> Result<Dataset> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for _ in 0..n {
        let x = standard_normal(&mut rng);
        let y = params.intercept + params.slope * x + params.sigma * standard_normal(&mut rng);
        xs.push(Some(x));
        ys.push(Some(y));
    }
    Dataset::new(vec!["x".into(), "y".into()], vec![xs, ys])
}

/// Generate `n` observations of the count process: temp uniform on a fixed
/// range, ozone ~ Poisson(exp(a + b * temp)). Columns `temp`, `ozone`.
pub fn generate_counts(n: usize, a: f64, b: f64, seed: u64) -> Result<Dataset> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let (lo, hi) = TEMP_RANGE;
    let mut temps = Vec::with_capacity(n);
    let mut ozones = Vec::with_capacity(n);
    for _ in 0..n {
        let temp = lo + (hi - lo) * rng.random::<f64>();
        let rate = (a + b * temp).exp();
        temps.push(Some(temp));
        ozones.push(Some(poisson(&mut rng, rate) as f64));
    }
    Dataset::new(vec!["temp".into(), "ozone".into()], vec![temps, ozones])
}

/// Punch missing holes into a dataset: each cell is independently blanked
/// with probability `frac`. Exercises the drop-never-impute policy.
pub fn punch_missing(dataset: &Dataset, frac: f64, seed: u64) -> Result<Dataset> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let names = dataset.names().to_vec();
    let columns = names
        .iter()
        .map(|name| {
            dataset
                .column(name)
                .unwrap_or(&[])
                .iter()
                .map(|&cell| {
                    if rng.random::<f64>() < frac {
                        None
                    } else {
                        cell
                    }
                })
                .collect()
        })
        .collect();
    Dataset::new(names, columns)
}
