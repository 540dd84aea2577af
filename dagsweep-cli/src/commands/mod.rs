pub mod plan;
pub mod run;
pub mod script;
pub mod validate;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;

use sweep_service::{
    BackendKind, CachePolicy, MatrixGrid, ScheduleConfig, ScheduleParser, SlurmOptions, Sweep,
    Value,
};

/// Options shared by every command that expands a sweep
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Schedule params file (matrix, root, backend, ...)
    #[arg(long, short = 'p', value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Pipeline definition; overrides `pipeline:` in the params file
    #[arg(long, value_name = "FILE")]
    pub pipeline: Option<PathBuf>,

    /// Run root for node output directories
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// never, primary_exists or success_marker
    #[arg(long, value_name = "POLICY")]
    pub cache_policy: Option<CachePolicy>,

    /// local, dry_run, slurm or serial
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<BackendKind>,

    /// Maximum concurrent jobs (0 = unlimited)
    #[arg(long, short = 'j', value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Per-job timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Sweep a parameter (can be repeated, format: node.param=v1,v2)
    #[arg(long = "axis", short = 'a', value_name = "KEY=VALUES")]
    pub axes: Vec<String>,
}

impl SweepArgs {
    /// Params file merged with command-line overrides
    pub fn config(&self) -> Result<ScheduleConfig> {
        let mut config = match &self.params {
            Some(path) => ScheduleParser::parse_file(path).map_err(|e| eyre!("{}", e))?,
            None => ScheduleConfig::default(),
        };

        if let Some(root) = &self.root {
            config.root = Some(root.clone());
        }
        if let Some(policy) = self.cache_policy {
            config.cache_policy = policy;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if self.max_parallel.is_some() {
            config.max_parallel = self.max_parallel;
        }
        if self.timeout.is_some() {
            config.timeout = self.timeout;
        }

        for axis in &self.axes {
            let (key, values) = parse_axis(axis)?;
            if config.matrix.grids.is_empty() {
                config.matrix.grids.push(MatrixGrid::new());
            }
            // An override replaces the key in every grid that sweeps it
            let mut replaced = false;
            for grid in &mut config.matrix.grids {
                if let Some(existing) = grid.axes.get_mut(&key) {
                    *existing = values.clone();
                    replaced = true;
                }
            }
            if !replaced {
                for grid in &mut config.matrix.grids {
                    grid.axes.insert(key.clone(), values.clone());
                }
            }
        }

        Ok(config)
    }

    /// Build the sweep described by these arguments
    pub fn sweep(&self) -> Result<(ScheduleConfig, Sweep)> {
        let config = self.config()?;
        let sweep =
            Sweep::from_config(&config, self.pipeline.as_deref()).map_err(|e| eyre!("{}", e))?;
        Ok((config, sweep))
    }
}

/// sbatch settings from the params file's `slurm:` section
pub fn slurm_options(config: &ScheduleConfig) -> SlurmOptions {
    let mut options = SlurmOptions {
        defaults: config.slurm.defaults.clone(),
        ..Default::default()
    };
    if let Some(prefix) = &config.slurm.job_name_prefix {
        options.job_name_prefix = prefix.clone();
    }
    options
}

/// Parse `node.param=v1,v2` into a matrix axis
fn parse_axis(axis: &str) -> Result<(String, Vec<Value>)> {
    let Some((key, values)) = axis.split_once('=') else {
        bail!("Invalid axis '{}'. Expected node.param=v1,v2", axis);
    };
    let key = key.trim();
    if !key.contains('.') {
        bail!("Invalid axis key '{}'. Expected node.param", key);
    }
    if values.trim().is_empty() {
        bail!("Axis '{}' has no values", key);
    }

    let values = values.split(',').map(|raw| parse_value(raw.trim())).collect();
    Ok((key.to_string(), values))
}

/// Numbers, booleans and null as JSON; anything else is a string
fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from_json(&json),
        Err(_) => Value::String(raw.to_string()),
    }
}
