//! Quadratic approximation of the posterior.
//!
//! Maximizes the joint log-posterior of a [`ModelSpec`] over an unconstrained
//! parameter vector (non-negative parameters are log-transformed, with the
//! Jacobian term included), then draws from the multivariate normal centered
//! at the mode with covariance equal to the inverse negative Hessian. Mapping
//! log-transformed coordinates back through `exp` keeps every constrained
//! draw inside its declared support. Deterministic given a seed.
//!
//! This is the high-level Bayesian fitting route that needs no external
//! engine; MCMC stays in [`crate::stanrun`].

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::data::{Dataset, PreparedData};
use crate::datagen::standard_normal;
use crate::draws::{ChainDraws, PosteriorDraws};
use crate::error::{Error, Result};
use crate::model::{BinOp, Expr, Likelihood, ModelSpec, Prior, Support};

const LN_2PI: f64 = 1.8378770664093453;

#[derive(Debug, Clone)]
pub struct QuapConfig {
    /// Number of posterior draws to generate at the mode.
    pub n_draws: usize,
    pub seed: u64,
    pub max_iter: usize,
    /// Relative gradient tolerance for declaring the mode found.
    pub tol: f64,
}

impl Default for QuapConfig {
    fn default() -> Self {
        Self {
            n_draws: 4000,
            seed: 0,
            max_iter: 200,
            tol: 1e-6,
        }
    }
}

/// A completed quadratic-approximation fit.
#[derive(Debug)]
pub struct QuapFit {
    /// Posterior mode on the constrained scale, in parameter order.
    pub mode: Vec<(String, f64)>,
    /// Draws from the Gaussian approximation (a single synthetic chain; no
    /// engine diagnostic flags).
    pub draws: PosteriorDraws,
}

/// Fit a model by quadratic approximation.
pub fn fit(spec: &ModelSpec, dataset: &Dataset, config: &QuapConfig) -> Result<QuapFit> {
    let prepared = dataset.prepare(spec)?;
    let posterior = Posterior::compile(spec, &prepared)?;
    let dim = spec.params.len();

    // Newton ascent from the origin of the unconstrained space.
    let mut theta = vec![0.0; dim];
    let mut value = posterior.log_posterior(&theta);
    if !value.is_finite() {
        return Err(Error::Sampler(
            "log posterior is not finite at the initial point".into(),
        ));
    }

    let mut converged = false;
    for _ in 0..config.max_iter {
        let grad = posterior.gradient(&theta);
        let scale = 1.0 + value.abs();
        if grad.iter().all(|g| g.abs() < config.tol * scale) {
            converged = true;
            break;
        }

        let hessian = posterior.hessian(&theta);
        let neg_hessian = negate(&hessian);
        // Newton direction where the curvature is usable, gradient ascent
        // otherwise.
        let direction = match cholesky(&neg_hessian, dim) {
            Some(l) => cholesky_solve(&l, &grad, dim),
            None => grad.clone(),
        };

        let mut step = 1.0;
        let mut improved = false;
        for _ in 0..40 {
            let candidate: Vec<f64> = theta
                .iter()
                .zip(&direction)
                .map(|(t, d)| t + step * d)
                .collect();
            let candidate_value = posterior.log_posterior(&candidate);
            if candidate_value.is_finite() && candidate_value > value {
                theta = candidate;
                value = candidate_value;
                improved = true;
                break;
            }
            step *= 0.5;
        }
        if !improved {
            // No ascent direction left at line-search resolution: treat the
            // current point as the mode if the gradient is small enough.
            let grad = posterior.gradient(&theta);
            converged = grad.iter().all(|g| g.abs() < 1e-3 * scale);
            break;
        }
    }

    if !converged {
        return Err(Error::Sampler(format!(
            "quadratic approximation for `{}` did not converge in {} iterations",
            spec.name, config.max_iter
        )));
    }

    let hessian = posterior.hessian(&theta);
    let neg_hessian = negate(&hessian);
    let l = cholesky(&neg_hessian, dim).ok_or_else(|| {
        Error::Sampler(format!(
            "Hessian for `{}` is not positive definite at the mode",
            spec.name
        ))
    })?;

    // Draw x ~ N(mode, H^-1): solve L^T x = z for standard-normal z.
    let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
    let mut chain = ChainDraws::default();
    for _ in 0..config.n_draws {
        let z: Vec<f64> = (0..dim).map(|_| standard_normal(&mut rng)).collect();
        let offset = back_substitute_transpose(&l, &z, dim);
        let draw_unc: Vec<f64> = theta.iter().zip(&offset).map(|(t, o)| t + o).collect();
        chain.lp.push(posterior.log_posterior(&draw_unc));
        let (constrained, _) = constrain(&spec.params, &draw_unc);
        chain.draws.push(constrained);
    }

    let (mode_constrained, _) = constrain(&spec.params, &theta);
    let mode = spec
        .params
        .iter()
        .map(|p| p.name.clone())
        .zip(mode_constrained)
        .collect();

    let draws = PosteriorDraws::new(spec.param_names(), vec![chain])?;
    Ok(QuapFit { mode, draws })
}

/// Map unconstrained coordinates to the declared supports, accumulating the
/// log-Jacobian of the transform.
fn constrain(params: &[crate::model::ParamDecl], theta: &[f64]) -> (Vec<f64>, f64) {
    let mut out = Vec::with_capacity(theta.len());
    let mut log_jacobian = 0.0;
    for (param, &z) in params.iter().zip(theta) {
        match param.support {
            Support::Real => out.push(z),
            Support::NonNegative => {
                out.push(z.exp());
                log_jacobian += z;
            }
        }
    }
    (out, log_jacobian)
}

fn log_prior(prior: &Prior, value: f64) -> f64 {
    match prior {
        Prior::Normal { mean, sd } => {
            let z = (value - mean) / sd;
            -0.5 * z * z - sd.ln() - 0.5 * LN_2PI
        }
        Prior::Exponential { rate } => rate.ln() - rate * value,
    }
}

/// An expression with names resolved to column/parameter indices.
enum Compiled {
    Lit(f64),
    Col(usize),
    Par(usize),
    Bin(BinOp, Box<Compiled>, Box<Compiled>),
}

impl Compiled {
    fn eval(&self, row: usize, columns: &[Vec<f64>], theta: &[f64]) -> f64 {
        match self {
            Compiled::Lit(v) => *v,
            Compiled::Col(i) => columns[*i][row],
            Compiled::Par(i) => theta[*i],
            Compiled::Bin(op, lhs, rhs) => {
                let a = lhs.eval(row, columns, theta);
                let b = rhs.eval(row, columns, theta);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                }
            }
        }
    }
}

enum CompiledLikelihood {
    /// (response column, location expression, sd parameter index)
    Normal(usize, Compiled, usize),
    /// (response column, log-rate expression)
    Poisson(usize, Compiled),
}

/// The joint log-posterior over the unconstrained space, with the data bound.
struct Posterior<'a> {
    spec: &'a ModelSpec,
    n: usize,
    columns: Vec<Vec<f64>>,
    likelihood: CompiledLikelihood,
}

impl<'a> Posterior<'a> {
    fn compile(spec: &'a ModelSpec, prepared: &PreparedData) -> Result<Self> {
        let columns: Vec<Vec<f64>> = spec
            .data
            .iter()
            .map(|field| {
                prepared
                    .column(&field.name)
                    .map(<[f64]>::to_vec)
                    .ok_or_else(|| {
                        Error::SchemaMismatch(format!("column `{}` missing", field.name))
                    })
            })
            .collect::<Result<_>>()?;

        let col_index = |name: &str| -> Result<usize> {
            spec.data
                .iter()
                .position(|f| f.name == name)
                .ok_or_else(|| Error::Validation(format!("undeclared field `{}`", name)))
        };
        let par_index = |name: &str| -> Result<usize> {
            spec.params
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| Error::Validation(format!("undeclared parameter `{}`", name)))
        };

        fn compile_expr(
            expr: &Expr,
            col_index: &dyn Fn(&str) -> Result<usize>,
            par_index: &dyn Fn(&str) -> Result<usize>,
        ) -> Result<Compiled> {
            Ok(match expr {
                Expr::Lit(v) => Compiled::Lit(*v),
                Expr::Data(name) => Compiled::Col(col_index(name)?),
                Expr::Param(name) => Compiled::Par(par_index(name)?),
                Expr::Binary(op, lhs, rhs) => Compiled::Bin(
                    *op,
                    Box::new(compile_expr(lhs, col_index, par_index)?),
                    Box::new(compile_expr(rhs, col_index, par_index)?),
                ),
            })
        }

        let likelihood = match &spec.likelihood {
            Likelihood::Normal {
                response,
                mean,
                sd_param,
            } => CompiledLikelihood::Normal(
                col_index(response)?,
                compile_expr(mean, &col_index, &par_index)?,
                par_index(sd_param)?,
            ),
            Likelihood::Poisson { response, log_rate } => CompiledLikelihood::Poisson(
                col_index(response)?,
                compile_expr(log_rate, &col_index, &par_index)?,
            ),
        };

        Ok(Self {
            spec,
            n: prepared.n,
            columns,
            likelihood,
        })
    }

    fn log_posterior(&self, theta_unc: &[f64]) -> f64 {
        let (theta, log_jacobian) = constrain(&self.spec.params, theta_unc);
        let mut lp = log_jacobian;
        for (param, &value) in self.spec.params.iter().zip(&theta) {
            lp += log_prior(&param.prior, value);
        }

        match &self.likelihood {
            CompiledLikelihood::Normal(response, mean, sd_idx) => {
                let sigma = theta[*sd_idx];
                if !(sigma.is_finite() && sigma > 0.0) {
                    return f64::NEG_INFINITY;
                }
                let log_sigma = sigma.ln();
                let y = &self.columns[*response];
                for i in 0..self.n {
                    let z = (y[i] - mean.eval(i, &self.columns, &theta)) / sigma;
                    lp += -0.5 * z * z - log_sigma - 0.5 * LN_2PI;
                }
            }
            CompiledLikelihood::Poisson(response, log_rate) => {
                let y = &self.columns[*response];
                for i in 0..self.n {
                    let eta = log_rate.eval(i, &self.columns, &theta);
                    // ln(y!) is constant in the parameters and omitted.
                    lp += y[i] * eta - eta.exp();
                }
            }
        }
        lp
    }

    fn gradient(&self, theta: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; theta.len()];
        let mut point = theta.to_vec();
        for i in 0..theta.len() {
            let h = 1e-6 * (1.0 + theta[i].abs());
            point[i] = theta[i] + h;
            let fp = self.log_posterior(&point);
            point[i] = theta[i] - h;
            let fm = self.log_posterior(&point);
            point[i] = theta[i];
            grad[i] = (fp - fm) / (2.0 * h);
        }
        grad
    }

    /// Finite-difference Hessian, symmetrized. Row-major `dim * dim`.
    fn hessian(&self, theta: &[f64]) -> Vec<f64> {
        let dim = theta.len();
        let f0 = self.log_posterior(theta);
        let h: Vec<f64> = theta.iter().map(|t| 1e-4 * (1.0 + t.abs())).collect();
        let mut out = vec![0.0; dim * dim];
        let mut point = theta.to_vec();

        for i in 0..dim {
            point[i] = theta[i] + h[i];
            let fp = self.log_posterior(&point);
            point[i] = theta[i] - h[i];
            let fm = self.log_posterior(&point);
            point[i] = theta[i];
            out[i * dim + i] = (fp - 2.0 * f0 + fm) / (h[i] * h[i]);
        }

        for i in 0..dim {
            for j in (i + 1)..dim {
                point[i] = theta[i] + h[i];
                point[j] = theta[j] + h[j];
                let fpp = self.log_posterior(&point);
                point[j] = theta[j] - h[j];
                let fpm = self.log_posterior(&point);
                point[i] = theta[i] - h[i];
                let fmm = self.log_posterior(&point);
                point[j] = theta[j] + h[j];
                let fmp = self.log_posterior(&point);
                point[i] = theta[i];
                point[j] = theta[j];
                let value = (fpp - fpm - fmp + fmm) / (4.0 * h[i] * h[j]);
                out[i * dim + j] = value;
                out[j * dim + i] = value;
            }
        }
        out
    }
}

fn negate(matrix: &[f64]) -> Vec<f64> {
    matrix.iter().map(|v| -v).collect()
}

/// Lower-triangular Cholesky factor of a symmetric matrix, or `None` if it is
/// not positive definite.
fn cholesky(matrix: &[f64], dim: usize) -> Option<Vec<f64>> {
    let mut l = vec![0.0; dim * dim];
    for i in 0..dim {
        for j in 0..=i {
            let mut sum = matrix[i * dim + j];
            for k in 0..j {
                sum -= l[i * dim + k] * l[j * dim + k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i * dim + i] = sum.sqrt();
            } else {
                l[i * dim + j] = sum / l[j * dim + j];
            }
        }
    }
    Some(l)
}

/// Solve `A x = b` given the Cholesky factor `L` of `A`.
fn cholesky_solve(l: &[f64], b: &[f64], dim: usize) -> Vec<f64> {
    // Forward: L y = b.
    let mut y = vec![0.0; dim];
    for i in 0..dim {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i * dim + k] * y[k];
        }
        y[i] = sum / l[i * dim + i];
    }
    // Backward: L^T x = y.
    let mut x = vec![0.0; dim];
    for i in (0..dim).rev() {
        let mut sum = y[i];
        for k in (i + 1)..dim {
            sum -= l[k * dim + i] * x[k];
        }
        x[i] = sum / l[i * dim + i];
    }
    x
}

/// Solve `L^T x = z`: the resulting `x` has covariance `(L L^T)^-1`.
fn back_substitute_transpose(l: &[f64], z: &[f64], dim: usize) -> Vec<f64> {
    let mut x = vec![0.0; dim];
    for i in (0..dim).rev() {
        let mut sum = z[i];
        for k in (i + 1)..dim {
            sum -= l[k * dim + i] * x[k];
        }
        x[i] = sum / l[i * dim + i];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagen::{generate_linear, TrueParams};
    use crate::models::gaussian_linear;

    #[test]
    fn cholesky_recovers_identity() {
        let l = cholesky(&[4.0, 2.0, 2.0, 3.0], 2).unwrap();
        assert!((l[0] - 2.0).abs() < 1e-12);
        let x = cholesky_solve(&l, &[4.0, 2.0], 2);
        // [4 2; 2 3] x = [4, 2] -> x = [1, 0].
        assert!((x[0] - 1.0).abs() < 1e-10 && x[1].abs() < 1e-10);
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        assert!(cholesky(&[1.0, 2.0, 2.0, 1.0], 2).is_none());
    }

    #[test]
    fn mode_tracks_generating_process() {
        let data = generate_linear(400, &TrueParams::default(), 21).unwrap();
        let fit = fit(
            &gaussian_linear(),
            &data,
            &QuapConfig {
                n_draws: 100,
                ..Default::default()
            },
        )
        .unwrap();
        let mode: std::collections::HashMap<_, _> = fit.mode.iter().cloned().collect();
        assert!((mode["intercept"] - 2.0).abs() < 0.3, "{:?}", fit.mode);
        assert!((mode["slope"] - 3.0).abs() < 0.3, "{:?}", fit.mode);
        assert!((mode["sigma"] - 1.0).abs() < 0.3, "{:?}", fit.mode);
    }

    #[test]
    fn all_sigma_draws_positive() {
        let data = generate_linear(50, &TrueParams::default(), 5).unwrap();
        let fit = fit(&gaussian_linear(), &data, &QuapConfig::default()).unwrap();
        let sigmas = fit.draws.column("sigma").unwrap();
        assert_eq!(sigmas.len(), 4000);
        assert!(sigmas.iter().all(|&s| s > 0.0));
    }

    #[test]
    fn empty_dataset_is_rejected_before_fitting() {
        let data = crate::data::Dataset::parse_csv("x,y\n").unwrap();
        let err = fit(&gaussian_linear(), &data, &QuapConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
