//! Split-chain R-hat, effective sample size, and divergence accounting.
//!
//! These run only after every chain has reported completion; the chains never
//! communicate during sampling. Findings are [`ConvergenceWarning`] values
//! attached to the sample set, never errors: draws from a poorly mixed fit
//! are still draws, the caller just must not trust them blindly. Retrying
//! with identical inputs reproduces the same failure mode, so nothing here
//! retries anything.

use serde::Serialize;
use std::fmt;

use crate::draws::PosteriorDraws;

/// Non-fatal convergence findings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConvergenceWarning {
    HighRhat { param: String, rhat: f64 },
    LowEss { param: String, ess: f64 },
    DivergentTransitions { count: usize },
    TreedepthSaturation { count: usize },
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceWarning::HighRhat { param, rhat } => {
                write!(f, "{}: split R-hat = {:.3} (want < 1.01)", param, rhat)
            }
            ConvergenceWarning::LowEss { param, ess } => {
                write!(f, "{}: effective sample size = {:.0} (want > 400)", param, ess)
            }
            ConvergenceWarning::DivergentTransitions { count } => {
                write!(f, "{} divergent transitions", count)
            }
            ConvergenceWarning::TreedepthSaturation { count } => {
                write!(f, "{} draws saturated max tree depth", count)
            }
        }
    }
}

/// Warning thresholds. Defaults follow common Stan practice.
#[derive(Debug, Clone, Serialize)]
pub struct Thresholds {
    pub max_rhat: f64,
    pub min_ess: f64,
    pub max_treedepth: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_rhat: 1.01,
            min_ess: 400.0,
            max_treedepth: 10,
        }
    }
}

/// Per-parameter posterior summary.
#[derive(Debug, Clone, Serialize)]
pub struct ParamStats {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub rhat: f64,
    pub ess: f64,
    pub q05: f64,
    pub q50: f64,
    pub q95: f64,
}

/// Whole-fit summary: shape, diagnostics, and warning texts.
#[derive(Debug, Clone, Serialize)]
pub struct FitSummary {
    pub n_chains: usize,
    pub n_draws: usize,
    pub n_divergent: usize,
    pub params: Vec<ParamStats>,
    pub warnings: Vec<String>,
}

/// Split-chain R-hat: each chain is halved, then the classic between/within
/// variance ratio is taken over the half-chains. Degenerate inputs (a single
/// short chain half) report 1.0 rather than a spurious warning.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let halves = split_in_half(chains);
    if halves.len() < 2 {
        return 1.0;
    }
    let n = halves.iter().map(Vec::len).min().unwrap_or(0);
    if n < 2 {
        return 1.0;
    }
    let halves: Vec<&[f64]> = halves.iter().map(|h| &h[..n]).collect();

    let m = halves.len() as f64;
    let means: Vec<f64> = halves
        .iter()
        .map(|h| h.iter().sum::<f64>() / n as f64)
        .collect();
    let vars: Vec<f64> = halves
        .iter()
        .zip(&means)
        .map(|(h, mean)| h.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64)
        .collect();

    let grand_mean = means.iter().sum::<f64>() / m;
    let between = n as f64 * means.iter().map(|v| (v - grand_mean).powi(2)).sum::<f64>() / (m - 1.0);
    let within = vars.iter().sum::<f64>() / m;
    if within <= 0.0 {
        return 1.0;
    }
    let var_plus = ((n - 1) as f64 * within + between) / n as f64;
    (var_plus / within).sqrt()
}

/// Bulk effective sample size via chain-averaged autocorrelations with
/// Geyer's initial positive sequence truncation.
pub fn ess_bulk(chains: &[Vec<f64>]) -> f64 {
    let m = chains.len();
    let n = chains.iter().map(Vec::len).min().unwrap_or(0);
    let total = (m * n) as f64;
    if n < 4 {
        return total;
    }

    let means: Vec<f64> = chains
        .iter()
        .map(|c| c[..n].iter().sum::<f64>() / n as f64)
        .collect();
    let vars: Vec<f64> = chains
        .iter()
        .zip(&means)
        .map(|(c, mean)| c[..n].iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64)
        .collect();
    let within = vars.iter().sum::<f64>() / m as f64;
    if within <= 0.0 {
        return total;
    }

    let grand_mean = means.iter().sum::<f64>() / m as f64;
    let between = if m > 1 {
        n as f64 * means.iter().map(|v| (v - grand_mean).powi(2)).sum::<f64>() / (m - 1) as f64
    } else {
        0.0
    };
    let var_plus = ((n - 1) as f64 * within + between) / n as f64;

    // Chain-averaged autocovariance at lag t.
    let autocov = |t: usize| -> f64 {
        chains
            .iter()
            .zip(&means)
            .map(|(c, mean)| {
                (0..n - t)
                    .map(|i| (c[i] - mean) * (c[i + t] - mean))
                    .sum::<f64>()
                    / n as f64
            })
            .sum::<f64>()
            / m as f64
    };

    let mut rho_sum = 0.0;
    let mut t = 1;
    while t + 1 < n {
        let rho_even = 1.0 - (within - autocov(t)) / var_plus;
        let rho_odd = 1.0 - (within - autocov(t + 1)) / var_plus;
        if rho_even + rho_odd <= 0.0 {
            break;
        }
        rho_sum += rho_even + rho_odd;
        t += 2;
    }

    total / (1.0 + 2.0 * rho_sum)
}

/// Evaluate a completed sample set against the thresholds and return every
/// finding. An empty vector means the diagnostics saw nothing suspicious.
pub fn check(draws: &PosteriorDraws, thresholds: &Thresholds) -> Vec<ConvergenceWarning> {
    let mut warnings = Vec::new();

    for name in draws.param_names() {
        if let Some(per_chain) = draws.per_chain(name) {
            let rhat = split_rhat(&per_chain);
            if rhat > thresholds.max_rhat {
                warnings.push(ConvergenceWarning::HighRhat {
                    param: name.clone(),
                    rhat,
                });
            }
            let ess = ess_bulk(&per_chain);
            if ess < thresholds.min_ess {
                warnings.push(ConvergenceWarning::LowEss {
                    param: name.clone(),
                    ess,
                });
            }
        }
    }

    let divergent = draws.n_divergent();
    if divergent > 0 {
        warnings.push(ConvergenceWarning::DivergentTransitions { count: divergent });
    }
    let saturated = draws.n_treedepth_hits(thresholds.max_treedepth);
    if saturated > 0 {
        warnings.push(ConvergenceWarning::TreedepthSaturation { count: saturated });
    }

    warnings
}

/// Full per-parameter summary of a sample set.
pub fn summarize(draws: &PosteriorDraws) -> FitSummary {
    let params = draws
        .param_names()
        .iter()
        .map(|name| {
            let per_chain = draws.per_chain(name).unwrap_or_default();
            ParamStats {
                name: name.clone(),
                mean: draws.mean(name).unwrap_or(f64::NAN),
                sd: draws.sd(name).unwrap_or(f64::NAN),
                rhat: split_rhat(&per_chain),
                ess: ess_bulk(&per_chain),
                q05: draws.quantile(name, 0.05).unwrap_or(f64::NAN),
                q50: draws.quantile(name, 0.50).unwrap_or(f64::NAN),
                q95: draws.quantile(name, 0.95).unwrap_or(f64::NAN),
            }
        })
        .collect();

    FitSummary {
        n_chains: draws.n_chains(),
        n_draws: draws.n_draws(),
        n_divergent: draws.n_divergent(),
        params,
        warnings: draws.warnings().iter().map(|w| w.to_string()).collect(),
    }
}

fn split_in_half(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut halves = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let half = chain.len() / 2;
        if half == 0 {
            continue;
        }
        halves.push(chain[..half].to_vec());
        halves.push(chain[chain.len() - half..].to_vec());
    }
    halves
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    fn iid_chain(seed: u64, n: usize, shift: f64) -> Vec<f64> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let u1 = 1.0 - rng.random::<f64>();
                let u2: f64 = rng.random();
                shift + (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
            })
            .collect()
    }

    #[test]
    fn rhat_near_one_for_well_mixed_chains() {
        let chains = vec![
            iid_chain(1, 1000, 0.0),
            iid_chain(2, 1000, 0.0),
            iid_chain(3, 1000, 0.0),
            iid_chain(4, 1000, 0.0),
        ];
        let rhat = split_rhat(&chains);
        assert!((rhat - 1.0).abs() < 0.01, "rhat = {}", rhat);
    }

    #[test]
    fn rhat_flags_displaced_chains() {
        let chains = vec![iid_chain(1, 1000, 0.0), iid_chain(2, 1000, 2.0)];
        let rhat = split_rhat(&chains);
        assert!(rhat > 1.01, "rhat = {}", rhat);
    }

    #[test]
    fn single_draw_chains_are_degenerate() {
        assert_eq!(split_rhat(&[vec![1.0], vec![2.0]]), 1.0);
    }

    #[test]
    fn ess_close_to_total_for_iid_draws() {
        let chains = vec![iid_chain(5, 1000, 0.0), iid_chain(6, 1000, 0.0)];
        let ess = ess_bulk(&chains);
        assert!(ess > 1000.0, "ess = {}", ess);
    }

    #[test]
    fn ess_low_for_sticky_chains() {
        // Strongly autocorrelated AR(1) walk.
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let mut make = || {
            let mut v = 0.0;
            (0..1000)
                .map(|_| {
                    let u1 = 1.0 - rng.random::<f64>();
                    let u2: f64 = rng.random();
                    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
                    v = 0.99 * v + 0.1 * z;
                    v
                })
                .collect::<Vec<f64>>()
        };
        let chains = vec![make(), make()];
        let ess = ess_bulk(&chains);
        assert!(ess < 500.0, "ess = {}", ess);
    }
}
