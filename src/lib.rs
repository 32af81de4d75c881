//! Bayesian regression workflow toolkit.
//!
//! Declarative model specifications ([`model`], [`models`]) are fit three
//! ways: closed-form least squares ([`ols`]), a quadratic approximation of
//! the posterior ([`quap`]), and generated Stan programs run through an
//! external CmdStan-compatible engine ([`codegen`], [`stanrun`]). The
//! [`data`] and [`datagen`] modules cover ingestion and synthetic data;
//! [`draws`] and [`diagnostics`] handle posterior sample sets and
//! convergence checks.

pub mod codegen;
pub mod data;
pub mod datagen;
pub mod diagnostics;
pub mod draws;
pub mod error;
pub mod model;
pub mod models;
pub mod ols;
pub mod quap;
pub mod stanrun;

pub use error::{Error, Result};
