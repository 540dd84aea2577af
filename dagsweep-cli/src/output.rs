// Terminal Output
// Colored status lines for dagsweep commands, all on stderr except job stdout

use sweep_service::JobState;

use std::time::Duration;

fn paint(code: &str, text: &str) -> String {
    format!("\x1b[{}m{}\x1b[0m", code, text)
}

/// Right-aligned verb followed by a message
pub fn status(action: &str, message: &str) {
    eprintln!("{} {}", paint("1;36", &format!("{:>12}", action)), message);
}

pub fn success(message: &str) {
    eprintln!("{} {}", paint("1;32", "  \u{2713}"), message);
}

pub fn failure(message: &str) {
    eprintln!("{} {}", paint("1;31", "  \u{2717}"), message);
}

/// Passed validation step
pub fn check(message: &str) {
    eprintln!("{} {}", paint("32", "  \u{2713}"), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", paint("33", "  !"), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", paint("1;31", "error:"), message);
}

pub fn info(message: &str) {
    eprintln!("{} {}", paint("36", "  i"), message);
}

pub fn dim(message: &str) {
    eprintln!("{}", paint("2", message));
}

/// Section header: "==> message"
pub fn header(message: &str) {
    eprintln!("{}", paint("1", &format!("==> {}", message)));
}

/// Job stdout (indented)
pub fn job_output(line: &str) {
    println!("      | {}", line);
}

/// Job stderr (indented, red)
pub fn job_error(line: &str) {
    eprintln!("{}", paint("31", &format!("      | {}", line)));
}

/// Fixed-width, colored label for a job state
pub fn state_label(state: JobState) -> String {
    let code = match state {
        JobState::Succeeded => "32",
        JobState::Cached => "2;32",
        JobState::Failed | JobState::Blocked => "31",
        JobState::Running | JobState::Dispatched => "36",
        JobState::Pending | JobState::Ready => "33",
    };
    paint(code, &format!("{:<10}", state.to_string()))
}

/// One finished job: "  succeeded  node/key (1.20s)"
pub fn job_line(state: JobState, job: &str, duration: Option<Duration>) {
    match duration {
        Some(duration) => eprintln!(
            "  {} {} {}",
            state_label(state),
            job,
            paint("2", &format!("({:.2}s)", duration.as_secs_f64()))
        ),
        None => eprintln!("  {} {}", state_label(state), job),
    }
}
