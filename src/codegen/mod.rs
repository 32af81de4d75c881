//! Probabilistic-program rendering backends.

pub mod stan;

pub use stan::generate_stan;
