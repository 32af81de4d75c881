//! External CmdStan-compatible engine driver.
//!
//! Responsibilities: detect the engine, compile a rendered model, spawn one
//! OS process per chain (all up front, nothing shared between chains, each
//! with a private seed stream), block until every chain finishes or the
//! optional wall-clock deadline passes, then parse the chain CSVs and attach
//! convergence warnings. Chain stderr goes to a per-chain log file in the
//! output directory, so a chatty engine can never fill a pipe and stall.
//! A timeout or a failed chain discards the whole run; partial sample sets
//! are never returned, and nothing is retried: rerunning a non-converged
//! sampler with identical inputs reproduces the same failure.

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::codegen::generate_stan;
use crate::data::Dataset;
use crate::diagnostics::{self, Thresholds};
use crate::draws::PosteriorDraws;
use crate::error::{Error, Result};
use crate::model::ModelSpec;

/// Sampler invocation settings.
#[derive(Debug, Clone, Serialize)]
pub struct SamplerConfig {
    /// Number of parallel chains.
    pub chains: usize,
    /// Warmup iterations per chain (discarded from the draws).
    pub warmup: usize,
    /// Post-warmup sampling iterations per chain.
    pub samples: usize,
    /// Base random seed; chain `i` runs with `seed + i`. `None` lets the
    /// engine pick its own.
    pub seed: Option<u64>,
    /// Target acceptance rate for step-size adaptation.
    pub adapt_delta: f64,
    pub max_treedepth: u32,
    /// Wall-clock deadline for the whole run.
    pub timeout: Option<Duration>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            warmup: 1000,
            samples: 1000,
            seed: None,
            adapt_delta: 0.8,
            max_treedepth: 10,
            timeout: None,
        }
    }
}

#[derive(Serialize)]
struct ChainStatus {
    id: usize,
    exit_code: Option<i32>,
    output_file: String,
}

#[derive(Serialize)]
struct RunMetadata<'a> {
    model: &'a str,
    config: &'a SamplerConfig,
    started: String,
    finished: String,
    duration_secs: f64,
    chains: Vec<ChainStatus>,
}

/// Locate a CmdStan installation: the `CMDSTAN` environment variable first,
/// then common install locations.
pub fn detect_engine() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CMDSTAN") {
        let path = PathBuf::from(&path);
        if path.exists() {
            return Ok(path);
        }
    }

    let home = std::env::var("HOME").unwrap_or_default();
    let roots = [
        format!("{}/.cmdstan", home),
        format!("{}/cmdstan", home),
        "/usr/local/cmdstan".to_string(),
        "/opt/cmdstan".to_string(),
    ];
    for root in roots {
        let root = PathBuf::from(root);
        if root.exists() {
            // Version directories live under the root; take the newest.
            if let Ok(entries) = fs::read_dir(&root) {
                let mut versions: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect();
                versions.sort();
                if let Some(latest) = versions.pop() {
                    return Ok(latest);
                }
            }
        }
    }

    Err(Error::Sampler(
        "CmdStan not found; set the CMDSTAN environment variable or install under ~/.cmdstan"
            .into(),
    ))
}

/// Compile a Stan program through the engine's make system. Returns the path
/// to the model executable; reuses it when it is newer than the source.
pub fn compile_model(stan_file: &Path, engine_path: &Path) -> Result<PathBuf> {
    let exe_path = stan_file.with_extension("");

    if exe_path.exists() {
        let stan_modified = fs::metadata(stan_file)?.modified()?;
        let exe_modified = fs::metadata(&exe_path)?.modified()?;
        if exe_modified > stan_modified {
            return Ok(exe_path);
        }
    }

    let output = Command::new("make")
        .current_dir(engine_path)
        .arg(exe_path.to_string_lossy().to_string())
        .output()
        .map_err(|e| Error::Sampler(format!("failed to run make: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Sampler(format!(
            "model compilation failed:\n{}",
            stderr
        )));
    }
    Ok(exe_path)
}

/// Run the sampler: validate the data against the spec, write the JSON data
/// bundle, spawn every chain, wait for all of them, parse the draws, and
/// attach convergence warnings. Fails before spawning anything if the data
/// does not match the declared schema.
pub fn run_sampler(
    exe_path: &Path,
    spec: &ModelSpec,
    dataset: &Dataset,
    output_dir: &Path,
    config: &SamplerConfig,
) -> Result<PosteriorDraws> {
    let bundle = dataset.to_stan_data(spec)?;

    fs::create_dir_all(output_dir)?;
    let data_file = output_dir.join("data.json");
    fs::write(&data_file, bundle)?;

    let started = Utc::now();
    let start = Instant::now();
    let deadline = config.timeout.map(|t| start + t);

    let mut children: Vec<Child> = Vec::with_capacity(config.chains);
    let mut chain_files: Vec<PathBuf> = Vec::with_capacity(config.chains);
    let mut stderr_files: Vec<PathBuf> = Vec::with_capacity(config.chains);
    for chain_id in 1..=config.chains {
        let output_file = output_dir.join(format!("chain_{}.csv", chain_id));
        // Stderr goes to a file, not a pipe: nobody drains a pipe while the
        // chains run, and a full pipe would block the engine forever.
        let stderr_file = output_dir.join(format!("chain_{}.stderr.log", chain_id));
        let stderr = fs::File::create(&stderr_file)?;
        let mut cmd = Command::new(exe_path);
        cmd.arg("sample")
            .arg(format!("num_warmup={}", config.warmup))
            .arg(format!("num_samples={}", config.samples))
            .arg("adapt")
            .arg(format!("delta={}", config.adapt_delta))
            .arg("algorithm=hmc")
            .arg("engine=nuts")
            .arg(format!("max_depth={}", config.max_treedepth))
            .arg(format!("id={}", chain_id))
            .arg("data")
            .arg(format!("file={}", data_file.display()))
            .arg("output")
            .arg(format!("file={}", output_file.display()))
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr));
        if let Some(seed) = config.seed {
            cmd.arg("random").arg(format!("seed={}", seed + chain_id as u64));
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::Sampler(format!("failed to spawn chain {}: {}", chain_id, e)))?;
        children.push(child);
        chain_files.push(output_file);
        stderr_files.push(stderr_file);
    }

    let statuses = wait_for_chains(&mut children, deadline, config)?;

    for (idx, status) in statuses.iter().enumerate() {
        if !status.success() {
            let stderr = fs::read_to_string(&stderr_files[idx]).unwrap_or_default();
            return Err(Error::Sampler(format!(
                "chain {} exited with {}: {}",
                idx + 1,
                status,
                stderr.trim()
            )));
        }
    }

    let mut draws = PosteriorDraws::from_chain_csvs(&chain_files)?;
    // Diagnostics compare completed chains; they run only after every chain
    // has reported success.
    let warnings = diagnostics::check(
        &draws,
        &Thresholds {
            max_treedepth: config.max_treedepth,
            ..Thresholds::default()
        },
    );
    draws.set_warnings(warnings);

    let finished = Utc::now();
    let metadata = RunMetadata {
        model: &spec.name,
        config,
        started: started.to_rfc3339(),
        finished: finished.to_rfc3339(),
        duration_secs: start.elapsed().as_secs_f64(),
        chains: statuses
            .iter()
            .enumerate()
            .map(|(i, s)| ChainStatus {
                id: i + 1,
                exit_code: s.code(),
                output_file: chain_files[i].display().to_string(),
            })
            .collect(),
    };
    fs::write(
        output_dir.join("run_metadata.json"),
        serde_json::to_string_pretty(&metadata)?,
    )?;

    Ok(draws)
}

/// Poll all chains until they exit or the deadline passes. On deadline, every
/// live chain is killed and the run fails; no partial output survives.
fn wait_for_chains(
    children: &mut [Child],
    deadline: Option<Instant>,
    config: &SamplerConfig,
) -> Result<Vec<std::process::ExitStatus>> {
    let mut statuses: Vec<Option<std::process::ExitStatus>> = vec![None; children.len()];
    loop {
        let mut all_done = true;
        for (status, child) in statuses.iter_mut().zip(children.iter_mut()) {
            if status.is_none() {
                match child.try_wait()? {
                    Some(s) => *status = Some(s),
                    None => all_done = false,
                }
            }
        }
        if all_done {
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                for (status, child) in statuses.iter().zip(children.iter_mut()) {
                    if status.is_none() {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                }
                // Round up so a sub-second deadline never reads as "0s".
                let seconds = config
                    .timeout
                    .map(|t| t.as_secs_f64().ceil() as u64)
                    .unwrap_or_default();
                return Err(Error::SamplerTimeout { seconds });
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    Ok(statuses.into_iter().flatten().collect())
}

/// Whole-workflow convenience: detect the engine, render and compile the
/// model, then sample.
pub fn fit_model(
    spec: &ModelSpec,
    dataset: &Dataset,
    workdir: &Path,
    config: &SamplerConfig,
) -> Result<PosteriorDraws> {
    let engine = detect_engine()?;
    fs::create_dir_all(workdir)?;
    let stan_file = workdir.join(format!("{}.stan", spec.name));
    fs::write(&stan_file, generate_stan(spec))?;
    let exe = compile_model(&stan_file, &engine)?;
    run_sampler(&exe, spec, dataset, workdir, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagen::{generate_linear, TrueParams};
    use crate::models::gaussian_linear;

    #[test]
    fn default_config() {
        let config = SamplerConfig::default();
        assert_eq!(config.chains, 4);
        assert_eq!(config.warmup, 1000);
        assert_eq!(config.samples, 1000);
        assert!(config.seed.is_none());
        assert!(config.timeout.is_none());
    }

    #[cfg(unix)]
    fn fake_engine(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake_engine.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn stalled_chains_time_out_and_are_killed() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_engine(dir.path(), "sleep 30");
        let data = generate_linear(5, &TrueParams::default(), 1).unwrap();
        let config = SamplerConfig {
            chains: 2,
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let start = Instant::now();
        let err = run_sampler(
            &exe,
            &gaussian_linear(),
            &data,
            &dir.path().join("out"),
            &config,
        )
        .unwrap_err();
        match err {
            Error::SamplerTimeout { seconds } => {
                assert!(seconds >= 1, "sub-second deadline must not report 0s")
            }
            other => panic!("expected SamplerTimeout, got {}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn chatty_chain_stderr_does_not_stall_the_run() {
        let dir = tempfile::tempdir().unwrap();
        // 256 KiB of stderr, well past any OS pipe buffer, then a failure.
        // The run must finish in engine time, not wedge until the deadline.
        let exe = fake_engine(
            dir.path(),
            "i=0\n\
             while [ $i -lt 4096 ]; do\n\
               echo 'chain noise 0123456789012345678901234567890123456789012345678' >&2\n\
               i=$((i+1))\n\
             done\n\
             echo 'final failure marker' >&2\n\
             exit 3",
        );
        let data = generate_linear(5, &TrueParams::default(), 1).unwrap();
        let config = SamplerConfig {
            chains: 1,
            timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let start = Instant::now();
        let err = run_sampler(
            &exe,
            &gaussian_linear(),
            &data,
            &dir.path().join("out"),
            &config,
        )
        .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(10));
        match err {
            Error::Sampler(msg) => assert!(msg.contains("final failure marker"), "{}", msg),
            other => panic!("expected Sampler error, got {}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn failing_chain_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_engine(dir.path(), "echo 'boom: bad model' >&2\nexit 3");
        let data = generate_linear(5, &TrueParams::default(), 1).unwrap();
        let config = SamplerConfig {
            chains: 2,
            ..Default::default()
        };
        let err = run_sampler(
            &exe,
            &gaussian_linear(),
            &data,
            &dir.path().join("out"),
            &config,
        )
        .unwrap_err();
        match err {
            Error::Sampler(msg) => assert!(msg.contains("boom"), "{}", msg),
            other => panic!("expected Sampler error, got {}", other),
        }
    }

    #[test]
    fn schema_failure_precedes_any_spawn() {
        let dir = tempfile::tempdir().unwrap();
        // Wrong columns: run_sampler must fail before touching the exe path,
        // which does not even exist.
        let data = crate::data::Dataset::parse_csv("a,b\n1,2\n").unwrap();
        let err = run_sampler(
            Path::new("/nonexistent/engine"),
            &gaussian_linear(),
            &data,
            &dir.path().join("out"),
            &SamplerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)), "{}", err);
    }
}
