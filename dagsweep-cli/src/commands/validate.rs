use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;

use sweep_service::{PipelineParser, ScheduleParser, Sweep};

/// Validate a pipeline definition and, optionally, a params file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Also expand the matrix from this params file
    #[arg(long, short = 'p', value_name = "FILE")]
    pub params: Option<PathBuf>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let pipeline_path = &args.pipeline;

    if !pipeline_path.exists() {
        bail!("Pipeline file not found: {}", pipeline_path.display());
    }

    output::status("Validating", &format!("{}", pipeline_path.display()));

    let definition = match PipelineParser::parse_file(pipeline_path) {
        Ok(definition) => definition,
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(1);
        }
    };
    output::check("YAML syntax valid");

    let pipeline = match PipelineParser::build(&definition) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(1);
        }
    };
    output::check(&format!(
        "{} nodes, {} connections",
        pipeline.len(),
        pipeline.connections().len()
    ));

    let warnings = match pipeline.validate() {
        Ok(warnings) => warnings,
        Err(e) => {
            output::failure(&e.to_string());
            std::process::exit(1);
        }
    };
    output::check("Graph is acyclic");

    for node in pipeline.nodes() {
        let groups = &node.groups;
        output::dim(&format!(
            "    {} ({} in, {} out, {} algo, {} perf)",
            node.name,
            groups.in_paths.len(),
            groups.out_paths.len(),
            groups.algo_params.len(),
            groups.perf_params.len()
        ));
    }
    for connection in pipeline.connections() {
        output::dim(&format!("    {}", connection));
    }
    for warning in &warnings {
        output::warning(&warning.to_string());
    }

    if let Some(params) = &args.params {
        let config = ScheduleParser::parse_file(params).map_err(|e| eyre!("{}", e))?;
        let sweep =
            Sweep::from_config(&config, Some(pipeline_path)).map_err(|e| eyre!("{}", e))?;
        let plan = match sweep.plan() {
            Ok(plan) => plan,
            Err(e) => {
                output::failure(&e.to_string());
                std::process::exit(1);
            }
        };
        output::check(&format!(
            "Matrix expands to {} instances, {} unique jobs ({} cached)",
            plan.instances().len(),
            plan.len(),
            plan.cached_count()
        ));
    }

    println!();
    if warnings.is_empty() {
        output::success("Pipeline is valid");
    } else {
        output::success(&format!("Pipeline is valid ({} warnings)", warnings.len()));
    }

    Ok(())
}
