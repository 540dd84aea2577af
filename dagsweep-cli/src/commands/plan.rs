use crate::commands::SweepArgs;
use crate::output;

use clap::Args;
use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Expand a sweep and list its jobs without running anything
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,

    /// Print the rendered command of every job
    #[arg(long, short = 'c')]
    pub commands: bool,

    /// Print the job list as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: PlanArgs) -> Result<()> {
    let (_, sweep) = args.sweep.sweep()?;
    let plan = sweep.plan().map_err(|e| eyre!("{}", e))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(plan.jobs())?);
        return Ok(());
    }

    output::header(&format!(
        "{} instances, {} jobs ({} cached) under {}",
        plan.instances().len(),
        plan.len(),
        plan.cached_count(),
        sweep.options().workspace.root().display()
    ));

    for (idx, job) in plan.jobs().iter().enumerate() {
        let marker = if job.cached { " (cached)" } else { "" };
        println!("[{:>3}] {}{}", idx, job.id, marker);
        if !job.predecessors.is_empty() {
            let after: Vec<&str> = job.predecessors.iter().map(|id| id.as_str()).collect();
            output::dim(&format!("      after {}", after.join(", ")));
        }
        if args.commands {
            output::dim(&format!("      $ {}", job.command));
        }
    }

    Ok(())
}
