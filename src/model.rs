//! Declarative model specifications.
//!
//! A [`ModelSpec`] is the canonical form consumed by every fitting route:
//! observed-data shapes, unknown parameters with priors, and a likelihood
//! linking parameters to data. Specs are authored through the validated
//! [`ModelSpec::new`] constructor and treated as immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};

/// Element type of an observed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Real-valued vector.
    Real,
    /// Non-negative integer counts.
    Count,
}

/// One declared data column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: FieldType,
}

impl FieldDecl {
    pub fn real(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Real,
        }
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Count,
        }
    }
}

/// Support of an unknown scalar. Positivity constraints live here, in the
/// declaration, never in run-time filtering of draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Support {
    Real,
    NonNegative,
}

/// Prior family with fixed hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Prior {
    Normal { mean: f64, sd: f64 },
    Exponential { rate: f64 },
}

/// A named unknown scalar with declared support and prior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub support: Support,
    pub prior: Prior,
}

impl ParamDecl {
    pub fn new(name: impl Into<String>, support: Support, prior: Prior) -> Self {
        Self {
            name: name.into(),
            support,
            prior,
        }
    }
}

/// Expression over parameters and data columns, used for likelihood
/// location/rate terms. Data references are vectorized over the N rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Lit(f64),
    Data(String),
    Param(String),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl Expr {
    pub fn lit(value: f64) -> Self {
        Expr::Lit(value)
    }

    pub fn data(name: impl Into<String>) -> Self {
        Expr::Data(name.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(BinOp::Add, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(BinOp::Mul, lhs, rhs)
    }

    /// Names of every `Data` reference in the tree.
    fn data_refs(&self, out: &mut Vec<String>) {
        match self {
            Expr::Lit(_) => {}
            Expr::Data(name) => out.push(name.clone()),
            Expr::Param(_) => {}
            Expr::Binary(_, lhs, rhs) => {
                lhs.data_refs(out);
                rhs.data_refs(out);
            }
        }
    }

    /// Names of every `Param` reference in the tree.
    fn param_refs(&self, out: &mut Vec<String>) {
        match self {
            Expr::Lit(_) => {}
            Expr::Data(_) => {}
            Expr::Param(name) => out.push(name.clone()),
            Expr::Binary(_, lhs, rhs) => {
                lhs.param_refs(out);
                rhs.param_refs(out);
            }
        }
    }
}

/// Likelihood linking parameters and predictors to the response column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Likelihood {
    /// `response[i] ~ Normal(mean_i, sd)` where `sd` is a declared parameter.
    Normal {
        response: String,
        mean: Expr,
        sd_param: String,
    },
    /// `response[i] ~ Poisson(exp(log_rate_i))`. The log link keeps the rate
    /// positive for any sign of the linear predictor.
    Poisson { response: String, log_rate: Expr },
}

impl Likelihood {
    pub fn response(&self) -> &str {
        match self {
            Likelihood::Normal { response, .. } => response,
            Likelihood::Poisson { response, .. } => response,
        }
    }
}

/// The complete specification: observation schema, parameter set, likelihood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub data: Vec<FieldDecl>,
    pub params: Vec<ParamDecl>,
    pub likelihood: Likelihood,
}

impl ModelSpec {
    /// Build and validate a specification. Checks name uniqueness, prior
    /// hyperparameters, and that every likelihood reference resolves to a
    /// declared field or parameter of the right kind.
    pub fn new(
        name: impl Into<String>,
        data: Vec<FieldDecl>,
        params: Vec<ParamDecl>,
        likelihood: Likelihood,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Validation("model name must not be empty".into()));
        }
        if data.is_empty() {
            return Err(Error::Validation(format!(
                "model `{}` declares no data fields",
                name
            )));
        }
        if params.is_empty() {
            return Err(Error::Validation(format!(
                "model `{}` declares no parameters",
                name
            )));
        }

        let mut seen = HashSet::new();
        for field in &data {
            if !seen.insert(field.name.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate field `{}` in model `{}`",
                    field.name, name
                )));
            }
        }
        for param in &params {
            if !seen.insert(param.name.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate name `{}` in model `{}`",
                    param.name, name
                )));
            }
            match param.prior {
                Prior::Normal { sd, .. } => {
                    if !(sd.is_finite() && sd > 0.0) {
                        return Err(Error::Validation(format!(
                            "prior sd for `{}` must be positive and finite",
                            param.name
                        )));
                    }
                }
                Prior::Exponential { rate } => {
                    if !(rate.is_finite() && rate > 0.0) {
                        return Err(Error::Validation(format!(
                            "prior rate for `{}` must be positive and finite",
                            param.name
                        )));
                    }
                }
            }
        }

        let spec = Self {
            name,
            data,
            params,
            likelihood,
        };
        spec.check_likelihood()?;
        Ok(spec)
    }

    fn check_likelihood(&self) -> Result<()> {
        let response = self.likelihood.response();
        let response_field = self.field(response).ok_or_else(|| {
            Error::Validation(format!(
                "likelihood response `{}` is not a declared field of `{}`",
                response, self.name
            ))
        })?;

        let location = match &self.likelihood {
            Likelihood::Normal {
                mean, sd_param, ..
            } => {
                if response_field.ty != FieldType::Real {
                    return Err(Error::Validation(format!(
                        "normal likelihood response `{}` must be a real field",
                        response
                    )));
                }
                let sd = self.param(sd_param).ok_or_else(|| {
                    Error::Validation(format!(
                        "likelihood sd `{}` is not a declared parameter of `{}`",
                        sd_param, self.name
                    ))
                })?;
                if sd.support != Support::NonNegative {
                    return Err(Error::Validation(format!(
                        "likelihood sd `{}` must have non-negative support",
                        sd_param
                    )));
                }
                mean
            }
            Likelihood::Poisson { log_rate, .. } => {
                if response_field.ty != FieldType::Count {
                    return Err(Error::Validation(format!(
                        "poisson likelihood response `{}` must be a count field",
                        response
                    )));
                }
                log_rate
            }
        };

        let mut refs = Vec::new();
        location.data_refs(&mut refs);
        for field in &refs {
            if self.field(field).is_none() {
                return Err(Error::Validation(format!(
                    "likelihood references undeclared field `{}`",
                    field
                )));
            }
        }
        refs.clear();
        location.param_refs(&mut refs);
        for param in &refs {
            if self.param(param).is_none() {
                return Err(Error::Validation(format!(
                    "likelihood references undeclared parameter `{}`",
                    param
                )));
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.data.iter().find(|f| f.name == name)
    }

    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Declared parameter names in declaration order. This is the column
    /// order of every posterior sample set produced from this spec.
    pub fn param_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_likelihood() -> Likelihood {
        Likelihood::Normal {
            response: "y".into(),
            mean: Expr::add(
                Expr::param("intercept"),
                Expr::mul(Expr::param("slope"), Expr::data("x")),
            ),
            sd_param: "sigma".into(),
        }
    }

    fn linear_params() -> Vec<ParamDecl> {
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
        ]
    }

    #[test]
    fn valid_spec_constructs() {
        let spec = ModelSpec::new(
            "linear",
            vec![FieldDecl::real("x"), FieldDecl::real("y")],
            linear_params(),
            linear_likelihood(),
        )
        .unwrap();
        assert_eq!(spec.param_names(), vec!["intercept", "slope", "sigma"]);
        assert_eq!(spec.field("x").unwrap().ty, FieldType::Real);
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = ModelSpec::new(
            "linear",
            vec![FieldDecl::real("x"), FieldDecl::real("x")],
            linear_params(),
            linear_likelihood(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate field"));
    }

    #[test]
    fn undeclared_reference_rejected() {
        let err = ModelSpec::new(
            "linear",
            vec![FieldDecl::real("y")],
            linear_params(),
            linear_likelihood(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("undeclared field `x`"));
    }

    #[test]
    fn normal_sd_must_be_nonnegative_support() {
        let mut params = linear_params();
        params[2].support = Support::Real;
        let err = ModelSpec::new(
            "linear",
            vec![FieldDecl::real("x"), FieldDecl::real("y")],
            params,
            linear_likelihood(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-negative support"));
    }

    #[test]
    fn bad_prior_hyperparameter_rejected() {
        let mut params = linear_params();
        params[0].prior = Prior::Normal {
            mean: 0.0,
            sd: -1.0,
        };
        let err = ModelSpec::new(
            "linear",
            vec![FieldDecl::real("x"), FieldDecl::real("y")],
            params,
            linear_likelihood(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("prior sd"));
    }

    #[test]
    fn spec_serde_round_trip() {
        let spec = ModelSpec::new(
            "linear",
            vec![FieldDecl::real("x"), FieldDecl::real("y")],
            linear_params(),
            linear_likelihood(),
        )
        .unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let decoded: ModelSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.name, "linear");
        assert_eq!(decoded.params.len(), 3);
    }
}
