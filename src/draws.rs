//! Posterior sample sets.
//!
//! A [`PosteriorDraws`] holds one row per joint draw and one column per
//! declared parameter, with per-chain provenance retained so split-chain
//! diagnostics can compare completed chains. Engine diagnostic columns
//! (`lp__`, `divergent__`, `treedepth__`) are stored alongside the table but
//! never listed among the declared parameters.

use std::fs;
use std::path::Path;

use crate::diagnostics::ConvergenceWarning;
use crate::error::{Error, Result};

/// Draws from a single chain.
#[derive(Debug, Clone, Default)]
pub struct ChainDraws {
    /// One row per draw, one column per parameter.
    pub draws: Vec<Vec<f64>>,
    /// Log-density per draw (`lp__`).
    pub lp: Vec<f64>,
    /// Divergence flag per draw. Empty when the engine reports none.
    pub divergent: Vec<bool>,
    /// NUTS tree depth per draw. Empty when the engine reports none.
    pub treedepth: Vec<u32>,
}

/// The posterior sample set: parameter columns, chain provenance, and any
/// convergence warnings attached after all chains completed.
#[derive(Debug, Clone)]
pub struct PosteriorDraws {
    param_names: Vec<String>,
    chains: Vec<ChainDraws>,
    warnings: Vec<ConvergenceWarning>,
}

impl PosteriorDraws {
    pub fn new(param_names: Vec<String>, chains: Vec<ChainDraws>) -> Result<Self> {
        if chains.is_empty() {
            return Err(Error::Validation("posterior sample set has no chains".into()));
        }
        for (i, chain) in chains.iter().enumerate() {
            for row in &chain.draws {
                if row.len() != param_names.len() {
                    return Err(Error::Validation(format!(
                        "chain {} draw has {} values for {} parameters",
                        i + 1,
                        row.len(),
                        param_names.len()
                    )));
                }
            }
        }
        Ok(Self {
            param_names,
            chains,
            warnings: Vec::new(),
        })
    }

    /// Parse every chain's CmdStan CSV output into one sample set. All files
    /// must agree on the parameter columns.
    pub fn from_chain_csvs(paths: &[impl AsRef<Path>]) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::Validation("no chain output files".into()));
        }
        let mut names: Option<Vec<String>> = None;
        let mut chains = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let content = fs::read_to_string(path)?;
            let (chain_names, chain) = parse_chain_csv(&content)
                .map_err(|e| Error::Sampler(format!("{}: {}", path.display(), e)))?;
            match &names {
                None => names = Some(chain_names),
                Some(expected) => {
                    if *expected != chain_names {
                        return Err(Error::Sampler(format!(
                            "{}: parameter columns differ from first chain",
                            path.display()
                        )));
                    }
                }
            }
            chains.push(chain);
        }
        let names = names.unwrap_or_default();
        Self::new(names, chains)
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn n_params(&self) -> usize {
        self.param_names.len()
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Total draws across all chains.
    pub fn n_draws(&self) -> usize {
        self.chains.iter().map(|c| c.draws.len()).sum()
    }

    pub fn chains(&self) -> &[ChainDraws] {
        &self.chains
    }

    /// All draws of one parameter, flattened across chains in chain order.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.param_names.iter().position(|n| n == name)?;
        Some(
            self.chains
                .iter()
                .flat_map(|c| c.draws.iter().map(move |row| row[idx]))
                .collect(),
        )
    }

    /// One vector per chain for a parameter, for split-chain diagnostics.
    pub fn per_chain(&self, name: &str) -> Option<Vec<Vec<f64>>> {
        let idx = self.param_names.iter().position(|n| n == name)?;
        Some(
            self.chains
                .iter()
                .map(|c| c.draws.iter().map(|row| row[idx]).collect())
                .collect(),
        )
    }

    /// Log-density per draw, flattened across chains.
    pub fn log_density(&self) -> Vec<f64> {
        self.chains.iter().flat_map(|c| c.lp.iter().copied()).collect()
    }

    pub fn n_divergent(&self) -> usize {
        self.chains
            .iter()
            .map(|c| c.divergent.iter().filter(|&&d| d).count())
            .sum()
    }

    /// Draws whose tree depth reached `max_depth`.
    pub fn n_treedepth_hits(&self, max_depth: u32) -> usize {
        self.chains
            .iter()
            .map(|c| c.treedepth.iter().filter(|&&d| d >= max_depth).count())
            .sum()
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        let col = self.column(name)?;
        if col.is_empty() {
            return None;
        }
        Some(col.iter().sum::<f64>() / col.len() as f64)
    }

    pub fn sd(&self, name: &str) -> Option<f64> {
        let col = self.column(name)?;
        if col.len() < 2 {
            return None;
        }
        let mean = col.iter().sum::<f64>() / col.len() as f64;
        let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (col.len() - 1) as f64;
        Some(var.sqrt())
    }

    pub fn quantile(&self, name: &str, p: f64) -> Option<f64> {
        let mut col = self.column(name)?;
        if col.is_empty() || !(0.0..=1.0).contains(&p) {
            return None;
        }
        col.sort_by(|a, b| a.total_cmp(b));
        let idx = (p * (col.len() - 1) as f64).round() as usize;
        Some(col[idx.min(col.len() - 1)])
    }

    /// Warnings attached by post-hoc diagnostics. Non-fatal: the draws are
    /// still returned, the caller decides what to do with them.
    pub fn warnings(&self) -> &[ConvergenceWarning] {
        &self.warnings
    }

    pub fn set_warnings(&mut self, warnings: Vec<ConvergenceWarning>) {
        self.warnings = warnings;
    }
}

/// Parse one CmdStan CSV: `#` comment lines, a header row, then one row per
/// draw. Columns ending in `__` are engine diagnostics, not parameters.
pub fn parse_chain_csv(content: &str) -> Result<(Vec<String>, ChainDraws)> {
    let mut lines = content.lines();

    let mut header = None;
    for line in lines.by_ref() {
        if !line.starts_with('#') {
            header = Some(line);
            break;
        }
    }
    let header = header.ok_or_else(|| Error::Sampler("no header row in chain output".into()))?;
    let all_names: Vec<&str> = header.split(',').map(|s| s.trim()).collect();

    let lp_idx = all_names.iter().position(|&n| n == "lp__");
    let divergent_idx = all_names.iter().position(|&n| n == "divergent__");
    let treedepth_idx = all_names.iter().position(|&n| n == "treedepth__");

    let param_indices: Vec<usize> = all_names
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.ends_with("__"))
        .map(|(i, _)| i)
        .collect();
    let param_names: Vec<String> = param_indices
        .iter()
        .map(|&i| all_names[i].to_string())
        .collect();

    let mut chain = ChainDraws::default();
    for line in lines {
        // CmdStan appends adaptation/timing comments after the draws.
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let cells: Vec<&str> = line.split(',').collect();
        if cells.len() != all_names.len() {
            return Err(Error::Sampler(format!(
                "chain row has {} cells, expected {}",
                cells.len(),
                all_names.len()
            )));
        }
        let parse = |i: usize| -> Result<f64> {
            cells[i]
                .trim()
                .parse()
                .map_err(|_| Error::Sampler(format!("unparseable value `{}`", cells[i])))
        };

        let mut row = Vec::with_capacity(param_indices.len());
        for &i in &param_indices {
            row.push(parse(i)?);
        }
        chain.draws.push(row);
        if let Some(i) = lp_idx {
            chain.lp.push(parse(i)?);
        }
        if let Some(i) = divergent_idx {
            chain.divergent.push(parse(i)? > 0.5);
        }
        if let Some(i) = treedepth_idx {
            chain.treedepth.push(parse(i)? as u32);
        }
    }

    Ok((param_names, chain))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "\
# stan_version_major = 2
# model = gaussian_linear_model
lp__,accept_stat__,stepsize__,treedepth__,n_leapfrog__,divergent__,energy__,intercept,slope,sigma
-12.3,0.99,0.41,3,7,0,14.1,2.01,2.97,1.02
-11.9,0.95,0.41,2,3,0,13.8,1.98,3.05,0.97
-13.0,0.88,0.41,3,7,1,15.0,2.10,2.88,1.10
# timing comment
";

    #[test]
    fn fixture_parses_parameters_and_diagnostics() {
        let (names, chain) = parse_chain_csv(FIXTURE).unwrap();
        assert_eq!(names, vec!["intercept", "slope", "sigma"]);
        assert_eq!(chain.draws.len(), 3);
        assert_eq!(chain.lp.len(), 3);
        assert_eq!(chain.divergent, vec![false, false, true]);
        assert_eq!(chain.treedepth, vec![3, 2, 3]);
        assert!((chain.draws[0][0] - 2.01).abs() < 1e-12);
    }

    #[test]
    fn sample_set_summaries() {
        let (names, chain) = parse_chain_csv(FIXTURE).unwrap();
        let draws = PosteriorDraws::new(names, vec![chain.clone(), chain]).unwrap();
        assert_eq!(draws.n_chains(), 2);
        assert_eq!(draws.n_draws(), 6);
        assert_eq!(draws.n_divergent(), 2);
        assert_eq!(draws.n_treedepth_hits(3), 4);
        let mean = draws.mean("slope").unwrap();
        assert!((mean - (2.97 + 3.05 + 2.88) / 3.0).abs() < 1e-12);
        assert!(draws.sd("sigma").unwrap() > 0.0);
        assert_eq!(draws.quantile("sigma", 0.5).unwrap(), 1.02);
    }

    #[test]
    fn mismatched_row_width_rejected() {
        let err = PosteriorDraws::new(
            vec!["a".into()],
            vec![ChainDraws {
                draws: vec![vec![1.0, 2.0]],
                ..Default::default()
            }],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
