//! The two regression specifications this crate ships.

use crate::model::{Expr, FieldDecl, Likelihood, ModelSpec, ParamDecl, Prior, Support};

/// Gaussian linear regression: `y[i] ~ Normal(intercept + slope * x[i], sigma)`
/// with standard-normal priors on the coefficients and `sigma ~ Exponential(1)`
/// constrained to be non-negative.
pub fn gaussian_linear() -> ModelSpec {
    ModelSpec::new(
        "gaussian_linear",
        vec![FieldDecl::real("x"), FieldDecl::real("y")],
        vec![
            ParamDecl::new(
                "intercept",
                Support::Real,
                Prior::Normal { mean: 0.0, sd: 1.0 },
            ),
            ParamDecl::new("slope", Support::Real, Prior::Normal { mean: 0.0, sd: 1.0 }),
            ParamDecl::new(
                "sigma",
                Support::NonNegative,
                Prior::Exponential { rate: 1.0 },
            ),
        ],
        Likelihood::Normal {
            response: "y".into(),
            mean: Expr::add(
                Expr::param("intercept"),
                Expr::mul(Expr::param("slope"), Expr::data("x")),
            ),
            sd_param: "sigma".into(),
        },
    )
    .expect("builtin gaussian_linear spec is valid")
}

/// Poisson log-linear regression:
/// `ozone[i] ~ Poisson(exp(a + b * temp[i]))` with weak Normal(0, 100) priors.
pub fn poisson_loglinear() -> ModelSpec {
    ModelSpec::new(
        "poisson_loglinear",
        vec![FieldDecl::real("temp"), FieldDecl::count("ozone")],
        vec![
            ParamDecl::new(
                "a",
                Support::Real,
                Prior::Normal {
                    mean: 0.0,
                    sd: 100.0,
                },
            ),
            ParamDecl::new(
                "b",
                Support::Real,
                Prior::Normal {
                    mean: 0.0,
                    sd: 100.0,
                },
            ),
        ],
        Likelihood::Poisson {
            response: "ozone".into(),
            log_rate: Expr::add(Expr::param("a"), Expr::mul(Expr::param("b"), Expr::data("temp"))),
        },
    )
    .expect("builtin poisson_loglinear spec is valid")
}
