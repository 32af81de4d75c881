// Bayesian workflow CLI: generate data, prepare it, emit models, fit them.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bayesfit::data::Dataset;
use bayesfit::datagen::{self, TrueParams};
use bayesfit::diagnostics::{self, summarize};
use bayesfit::draws::PosteriorDraws;
use bayesfit::model::ModelSpec;
use bayesfit::models;
use bayesfit::ols;
use bayesfit::quap::{self, QuapConfig};
use bayesfit::stanrun::{self, SamplerConfig};

#[derive(Parser)]
#[command(name = "bayesfit")]
#[command(version = "0.1.0")]
#[command(about = "Bayesian regression workflow: synthetic data, OLS, quadratic approximation, and external MCMC", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelKind {
    /// Gaussian linear regression (x, y).
    Gaussian,
    /// Poisson log-linear count regression (temp, ozone).
    Poisson,
}

impl ModelKind {
    fn spec(self) -> ModelSpec {
        match self {
            ModelKind::Gaussian => models::gaussian_linear(),
            ModelKind::Poisson => models::poisson_loglinear(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic dataset with known true parameters
    GenerateData {
        /// Which generating process to simulate
        #[arg(long, value_enum, default_value = "gaussian")]
        model: ModelKind,

        /// Number of observations
        #[arg(short = 'n', long, default_value = "100")]
        n: usize,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Fraction of cells to blank out as missing
        #[arg(long, default_value = "0.0")]
        missing: f64,

        /// Output CSV file
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Drop rows with missing values and report how many were removed
    PrepareData {
        /// Input CSV file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV file for the filtered rows
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,
    },

    /// Write the rendered Stan program for a model
    EmitModel {
        #[arg(long, value_enum)]
        model: ModelKind,

        /// Output file (stdout when omitted)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Frequentist baseline: ordinary least squares
    Ols {
        /// Input CSV file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Predictor column
        #[arg(short, long, default_value = "x")]
        x: String,

        /// Response column
        #[arg(short, long, default_value = "y")]
        y: String,
    },

    /// Bayesian fit by quadratic approximation (no external engine)
    Quap {
        #[arg(long, value_enum)]
        model: ModelKind,

        /// Input CSV file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Number of posterior draws
        #[arg(long, default_value = "4000")]
        draws: usize,

        /// Random seed for the posterior draws
        #[arg(long, default_value = "0")]
        seed: u64,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Full MCMC through an external CmdStan-compatible engine
    Run {
        #[arg(long, value_enum)]
        model: ModelKind,

        /// Input CSV file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Working directory for the program, data bundle, and chain output
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Number of parallel chains
        #[arg(long, default_value = "4")]
        chains: usize,

        /// Warmup iterations per chain
        #[arg(long, default_value = "1000")]
        warmup: usize,

        /// Sampling iterations per chain
        #[arg(long, default_value = "1000")]
        samples: usize,

        /// Base random seed (chain i uses seed + i)
        #[arg(long)]
        seed: Option<u64>,

        /// Wall-clock timeout in seconds for the whole run
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Summarize existing chain CSVs with convergence diagnostics
    Diagnostics {
        /// Directory holding chain_*.csv files
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::GenerateData {
            model,
            n,
            seed,
            missing,
            output,
            verbose,
        } => cmd_generate_data(model, n, seed, missing, &output, verbose),
        Commands::PrepareData { input, output } => cmd_prepare_data(&input, &output),
        Commands::EmitModel { model, output } => cmd_emit_model(model, output.as_deref()),
        Commands::Ols { input, x, y } => cmd_ols(&input, &x, &y),
        Commands::Quap {
            model,
            input,
            draws,
            seed,
            verbose,
        } => cmd_quap(model, &input, draws, seed, verbose),
        Commands::Run {
            model,
            input,
            output,
            chains,
            warmup,
            samples,
            seed,
            timeout,
            verbose,
        } => cmd_run(
            model, &input, &output, chains, warmup, samples, seed, timeout, verbose,
        ),
        Commands::Diagnostics { dir } => cmd_diagnostics(&dir),
    }
}

fn cmd_generate_data(
    model: ModelKind,
    n: usize,
    seed: u64,
    missing: f64,
    output: &std::path::Path,
    verbose: bool,
) -> Result<()> {
    let dataset = match model {
        ModelKind::Gaussian => {
            let params = TrueParams::default();
            if verbose {
                eprintln!(
                    "generating {} linear observations: intercept={}, slope={}, sigma={}",
                    n, params.intercept, params.slope, params.sigma
                );
            }
            datagen::generate_linear(n, &params, seed)?
        }
        ModelKind::Poisson => {
            // Defaults give ozone counts in a realistic range over the
            // temperature band.
            let (a, b) = (0.5, 0.04);
            if verbose {
                eprintln!("generating {} count observations: a={}, b={}", n, a, b);
            }
            datagen::generate_counts(n, a, b, seed)?
        }
    };
    let dataset = if missing > 0.0 {
        datagen::punch_missing(&dataset, missing, seed.wrapping_add(1))?
    } else {
        dataset
    };
    dataset
        .write_csv(output)
        .with_context(|| format!("writing {}", output.display()))?;
    if verbose {
        eprintln!("wrote {} rows to {}", dataset.n_rows(), output.display());
    }
    Ok(())
}

fn cmd_prepare_data(input: &std::path::Path, output: &std::path::Path) -> Result<()> {
    let dataset =
        Dataset::from_csv(input).with_context(|| format!("reading {}", input.display()))?;
    let (clean, dropped) = dataset.drop_missing();
    clean
        .write_csv(output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "rows_in": dataset.n_rows(),
            "rows_out": clean.n_rows(),
            "rows_dropped": dropped,
        }))?
    );
    Ok(())
}

fn cmd_emit_model(model: ModelKind, output: Option<&std::path::Path>) -> Result<()> {
    let program = bayesfit::codegen::generate_stan(&model.spec());
    match output {
        Some(path) => {
            fs::write(path, &program).with_context(|| format!("writing {}", path.display()))?
        }
        None => print!("{}", program),
    }
    Ok(())
}

fn cmd_ols(input: &std::path::Path, x: &str, y: &str) -> Result<()> {
    let dataset =
        Dataset::from_csv(input).with_context(|| format!("reading {}", input.display()))?;
    let fit = ols::fit_dataset(&dataset, x, y).context("least-squares fit failed")?;
    println!("{}", serde_json::to_string_pretty(&fit)?);
    Ok(())
}

fn cmd_quap(
    model: ModelKind,
    input: &std::path::Path,
    draws: usize,
    seed: u64,
    verbose: bool,
) -> Result<()> {
    let spec = model.spec();
    let dataset =
        Dataset::from_csv(input).with_context(|| format!("reading {}", input.display()))?;
    if verbose {
        eprintln!(
            "fitting `{}` by quadratic approximation on {} rows",
            spec.name,
            dataset.n_rows()
        );
    }
    let fit = quap::fit(
        &spec,
        &dataset,
        &QuapConfig {
            n_draws: draws,
            seed,
            ..Default::default()
        },
    )
    .context("quadratic approximation failed")?;
    println!("{}", serde_json::to_string_pretty(&summarize(&fit.draws))?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    model: ModelKind,
    input: &std::path::Path,
    output: &std::path::Path,
    chains: usize,
    warmup: usize,
    samples: usize,
    seed: Option<u64>,
    timeout: Option<u64>,
    verbose: bool,
) -> Result<()> {
    let spec = model.spec();
    let dataset =
        Dataset::from_csv(input).with_context(|| format!("reading {}", input.display()))?;
    let config = SamplerConfig {
        chains,
        warmup,
        samples,
        seed,
        timeout: timeout.map(Duration::from_secs),
        ..Default::default()
    };
    if verbose {
        eprintln!(
            "sampling `{}` with {} chains of {} draws",
            spec.name, config.chains, config.samples
        );
    }
    let draws = stanrun::fit_model(&spec, &dataset, output, &config)
        .context("external sampling run failed")?;
    for warning in draws.warnings() {
        eprintln!("warning: {}", warning);
    }
    println!("{}", serde_json::to_string_pretty(&summarize(&draws))?);
    Ok(())
}

fn cmd_diagnostics(dir: &std::path::Path) -> Result<()> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("csv"))
        .collect();
    files.sort();
    anyhow::ensure!(!files.is_empty(), "no chain CSVs in {}", dir.display());

    let mut draws = PosteriorDraws::from_chain_csvs(&files).context("parsing chain output")?;
    let warnings = diagnostics::check(&draws, &diagnostics::Thresholds::default());
    draws.set_warnings(warnings);
    for warning in draws.warnings() {
        eprintln!("warning: {}", warning);
    }
    println!("{}", serde_json::to_string_pretty(&summarize(&draws))?);
    Ok(())
}
