//! Post-hoc MCMC convergence diagnostics.

pub mod mcmc;

pub use mcmc::{
    check, ess_bulk, split_rhat, summarize, ConvergenceWarning, FitSummary, ParamStats, Thresholds,
};
