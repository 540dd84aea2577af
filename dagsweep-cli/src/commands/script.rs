use crate::commands::{slurm_options, SweepArgs};
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;

use sweep_service::{render_serial_script, BackendKind, SlurmBackend};

/// Render a driver script instead of running the sweep
#[derive(Args, Debug)]
pub struct ScriptArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,

    /// Write the script here instead of stdout
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
}

pub fn execute(args: ScriptArgs) -> Result<()> {
    let (config, sweep) = args.sweep.sweep()?;
    let plan = sweep.plan().map_err(|e| eyre!("{}", e))?;

    let script = match config.backend {
        BackendKind::Serial => render_serial_script(&plan),
        BackendKind::Slurm => SlurmBackend::new(slurm_options(&config)).render_script(&plan),
        other => bail!(
            "the {} backend runs jobs directly; pass --backend serial or --backend slurm",
            other
        ),
    };

    // The scripts only run commands; configs go next to each job up front
    plan.write_job_configs(&sweep.options().workspace).map_err(|e| eyre!("{}", e))?;

    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &script)?;
            output::success(&format!(
                "Wrote {} script for {} jobs to {}",
                config.backend,
                plan.len(),
                path.display()
            ));
        }
        None => print!("{}", script),
    }

    Ok(())
}
