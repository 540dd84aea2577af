// Serial Script
// Bash driver that runs a job plan one job after another

use crate::cache::SUCCESS_MARKER;
use crate::schedule::command::shell_quote;
use crate::schedule::job::Job;
use crate::schedule::plan::JobPlan;

use std::fmt::Write as _;

/// Render a bash script that executes `plan` in dependency order.
///
/// Each job runs in its own `set -e` subshell and records its outcome in
/// `job_<n>`. A failed job leaves independent jobs running; its dependents
/// are skipped as blocked. The script ends with a summary and exits
/// non-zero when anything failed or was blocked.
pub fn render_serial_script(plan: &JobPlan) -> String {
    let total = plan.len();
    let mut script = String::new();
    let _ = writeln!(script, "#!/bin/bash");
    let _ = writeln!(script, "# dagsweep serial driver: {} jobs", total);
    let _ = writeln!(script, "failed=0");
    let _ = writeln!(script, "blocked=0");

    for (idx, job) in plan.jobs().iter().enumerate() {
        script.push('\n');
        let _ = writeln!(script, "# [{}/{}] {}", idx + 1, total, job.id);
        if job.cached {
            let _ = writeln!(script, "# cached, skipping");
            let _ = writeln!(script, "job_{}=ok", idx);
            continue;
        }

        let guards: Vec<String> = job
            .predecessors
            .iter()
            .filter_map(|pred| plan.position(pred))
            .map(|pos| format!("[ \"$job_{}\" = ok ]", pos))
            .collect();

        if guards.is_empty() {
            render_job(&mut script, idx, job, "");
        } else {
            let _ = writeln!(script, "if {}; then", guards.join(" && "));
            render_job(&mut script, idx, job, "    ");
            let _ = writeln!(script, "else");
            let _ = writeln!(script, "    job_{}=blocked", idx);
            let _ = writeln!(script, "    blocked=$((blocked + 1))");
            let _ = writeln!(
                script,
                "    echo {} >&2",
                shell_quote(&format!("dagsweep: {} blocked by a failed predecessor", job.id))
            );
            let _ = writeln!(script, "fi");
        }
    }

    script.push('\n');
    let _ = writeln!(
        script,
        "echo \"dagsweep: $failed failed, $blocked blocked of {} jobs\" >&2",
        total
    );
    let _ = writeln!(script, "if [ \"$failed\" -ne 0 ] || [ \"$blocked\" -ne 0 ]; then");
    let _ = writeln!(script, "    exit 1");
    let _ = writeln!(script, "fi");

    script
}

/// One job subshell followed by its outcome bookkeeping.
///
/// The exit status is read from `$?` because `set -e` is ignored inside an
/// `if` condition.
fn render_job(script: &mut String, idx: usize, job: &Job, indent: &str) {
    let dir = shell_quote(&job.working_dir.to_string_lossy());
    let _ = writeln!(script, "{}(", indent);
    let _ = writeln!(script, "{}    set -e", indent);
    let _ = writeln!(script, "{}    mkdir -p {}", indent, dir);
    let _ = writeln!(script, "{}    cd {}", indent, dir);
    let _ = writeln!(script, "{}    rm -f {}", indent, SUCCESS_MARKER);
    let _ = writeln!(script, "{}    {} && touch {}", indent, job.command, SUCCESS_MARKER);
    let _ = writeln!(script, "{})", indent);
    let _ = writeln!(script, "{}if [ $? -eq 0 ]; then", indent);
    let _ = writeln!(script, "{}    job_{}=ok", indent, idx);
    let _ = writeln!(script, "{}else", indent);
    let _ = writeln!(script, "{}    job_{}=failed", indent, idx);
    let _ = writeln!(script, "{}    failed=$((failed + 1))", indent);
    let _ = writeln!(
        script,
        "{}    echo {} >&2",
        indent,
        shell_quote(&format!("dagsweep: {} failed", job.id))
    );
    let _ = writeln!(script, "{}fi", indent);
}
