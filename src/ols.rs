//! Ordinary least squares for simple linear regression.
//!
//! The frequentist baseline the Bayesian fits are compared against. Closed
//! form, no iteration.

use serde::Serialize;

use crate::data::Dataset;
use crate::error::{Error, Result};

/// A completed least-squares fit.
#[derive(Debug, Clone, Serialize)]
pub struct OlsFit {
    pub n: usize,
    pub intercept: f64,
    pub slope: f64,
    /// Residual standard deviation (divisor n - 2).
    pub sigma_hat: f64,
    pub se_intercept: f64,
    pub se_slope: f64,
    pub r_squared: f64,
}

/// Fit `y = intercept + slope * x` by least squares. Requires at least three
/// observations so the residual variance has a degree of freedom.
pub fn fit(x: &[f64], y: &[f64]) -> Result<OlsFit> {
    if x.len() != y.len() {
        return Err(Error::Validation(format!(
            "predictor has {} values, response has {}",
            x.len(),
            y.len()
        )));
    }
    let n = x.len();
    if n < 3 {
        return Err(Error::Validation(
            "least squares needs at least 3 observations".into(),
        ));
    }

    let nf = n as f64;
    let xbar = x.iter().sum::<f64>() / nf;
    let ybar = y.iter().sum::<f64>() / nf;
    let sxx: f64 = x.iter().map(|v| (v - xbar).powi(2)).sum();
    let syy: f64 = y.iter().map(|v| (v - ybar).powi(2)).sum();
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - xbar) * (b - ybar)).sum();

    if sxx <= 0.0 {
        return Err(Error::Validation(
            "predictor has zero variance; slope is not identifiable".into(),
        ));
    }

    let slope = sxy / sxx;
    let intercept = ybar - slope * xbar;
    let rss: f64 = x
        .iter()
        .zip(y)
        .map(|(a, b)| {
            let r = b - (intercept + slope * a);
            r * r
        })
        .sum();
    let sigma_hat = (rss / (nf - 2.0)).sqrt();
    let se_slope = sigma_hat / sxx.sqrt();
    let se_intercept = sigma_hat * (1.0 / nf + xbar * xbar / sxx).sqrt();
    let r_squared = if syy > 0.0 { 1.0 - rss / syy } else { 0.0 };

    Ok(OlsFit {
        n,
        intercept,
        slope,
        sigma_hat,
        se_intercept,
        se_slope,
        r_squared,
    })
}

/// Fit directly from dataset columns. The columns must be complete; drop
/// missing rows first.
pub fn fit_dataset(dataset: &Dataset, x_col: &str, y_col: &str) -> Result<OlsFit> {
    let extract = |name: &str| -> Result<Vec<f64>> {
        let column = dataset
            .column(name)
            .ok_or_else(|| Error::SchemaMismatch(format!("column `{}` not found", name)))?;
        column
            .iter()
            .enumerate()
            .map(|(row, cell)| {
                cell.ok_or_else(|| {
                    Error::Validation(format!(
                        "missing value in `{}` at row {}; drop incomplete rows before fitting",
                        name, row
                    ))
                })
            })
            .collect()
    };
    fit(&extract(x_col)?, &extract(y_col)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_fit_on_noiseless_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [2.0, 5.0, 8.0, 11.0];
        let fit = fit(&x, &y).unwrap();
        assert!((fit.intercept - 2.0).abs() < 1e-12);
        assert!((fit.slope - 3.0).abs() < 1e-12);
        assert!(fit.sigma_hat.abs() < 1e-10);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn too_few_points_rejected() {
        let err = fit(&[1.0, 2.0], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn constant_predictor_rejected() {
        let err = fit(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(err.to_string().contains("zero variance"));
    }

    #[test]
    fn dataset_fit_refuses_missing_cells() {
        let ds = Dataset::parse_csv("x,y\n1,2\n2,NA\n3,8\n").unwrap();
        let err = fit_dataset(&ds, "x", "y").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
