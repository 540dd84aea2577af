// Shell Runner
// Executes rendered job commands through a POSIX shell

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// `sh -c`
    Default,
    /// `bash -c`
    Bash,
}

impl Shell {
    /// Prefer bash when it is on the PATH
    pub fn detect() -> Self {
        if which::which("bash").is_ok() {
            Shell::Bash
        } else {
            Shell::Default
        }
    }

    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => ("sh", &["-c"]),
            Shell::Bash => ("bash", &["-c"]),
        }
    }
}

/// Configuration for shell execution
#[derive(Debug, Clone, Default)]
pub struct ShellConfig {
    /// Timeout (None = no timeout)
    pub timeout: Option<Duration>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

/// Output collected during command execution
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (if available)
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Set when the shell could not be started
    pub spawn_error: Option<String>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && self.spawn_error.is_none()
    }

    /// Short human readable reason for a failure
    pub fn failure_reason(&self) -> Option<String> {
        if let Some(err) = &self.spawn_error {
            return Some(err.clone());
        }
        if self.timed_out {
            return Some(self.stderr.clone());
        }
        match self.exit_code {
            Some(0) => None,
            Some(code) => Some(format!("exited with code {}", code)),
            None => Some("terminated by signal".to_string()),
        }
    }
}

/// Callback for handling output lines in real-time
pub type OutputCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Shell runner for executing commands
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: Shell,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellRunner {
    /// Create a runner using the detected shell
    pub fn new() -> Self {
        Self {
            shell: Shell::detect(),
        }
    }

    pub fn with_shell(shell: Shell) -> Self {
        Self { shell }
    }

    pub fn shell(&self) -> Shell {
        self.shell
    }

    /// Run `command` in `working_dir`, optionally streaming lines to `on_output`
    pub async fn run(
        &self,
        command: &str,
        working_dir: &Path,
        config: &ShellConfig,
        on_output: Option<OutputCallback>,
    ) -> ShellOutput {
        let (shell_cmd, shell_args) = self.shell.get_command();

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(command);
        cmd.current_dir(working_dir);
        cmd.envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ShellOutput {
                    spawn_error: Some(format!(
                        "failed to spawn shell process '{}': {}",
                        shell_cmd, e
                    )),
                    ..Default::default()
                };
            }
        };

        let stdout_handle = collect_lines(child.stdout.take(), false, on_output.clone());
        let stderr_handle = collect_lines(child.stderr.take(), true, on_output);

        let wait_result = if let Some(timeout) = config.timeout {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    let _ = child.kill().await;
                    return ShellOutput {
                        stdout: stdout_handle.await.unwrap_or_default(),
                        stderr: format!("process timed out after {:?}", timeout),
                        exit_code: None,
                        timed_out: true,
                        spawn_error: None,
                    };
                }
            }
        } else {
            child.wait().await
        };

        let exit_code = wait_result.ok().and_then(|s| s.code());
        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        ShellOutput {
            stdout,
            stderr,
            exit_code,
            timed_out: false,
            spawn_error: None,
        }
    }
}

fn collect_lines<R>(
    reader: Option<R>,
    is_error: bool,
    on_output: Option<OutputCallback>,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut output = String::new();
        let Some(reader) = reader else {
            return output;
        };
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(callback) = &on_output {
                callback(&line, is_error);
            }
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&line);
        }
        output
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_run_collects_output() {
        let temp = tempfile::tempdir().unwrap();
        let runner = ShellRunner::with_shell(Shell::Default);

        let output = runner
            .run("echo hello && echo oops >&2", temp.path(), &ShellConfig::default(), None)
            .await;

        assert!(output.success());
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr, "oops");
    }

    #[tokio::test]
    async fn test_working_dir_and_env() {
        let temp = tempfile::tempdir().unwrap();
        let runner = ShellRunner::with_shell(Shell::Default);
        let config = ShellConfig {
            env: vec![("SWEEP_VALUE".to_string(), "42".to_string())],
            ..Default::default()
        };

        let output = runner
            .run("echo $SWEEP_VALUE > value.txt", temp.path(), &config, None)
            .await;

        assert!(output.success());
        let written = std::fs::read_to_string(temp.path().join("value.txt")).unwrap();
        assert_eq!(written.trim(), "42");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let temp = tempfile::tempdir().unwrap();
        let output = ShellRunner::with_shell(Shell::Default)
            .run("exit 3", temp.path(), &ShellConfig::default(), None)
            .await;

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.failure_reason().unwrap(), "exited with code 3");
    }

    #[tokio::test]
    async fn test_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let config = ShellConfig {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };

        let output = ShellRunner::with_shell(Shell::Default)
            .run("sleep 5", temp.path(), &config, None)
            .await;

        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_streaming_callback() {
        let temp = tempfile::tempdir().unwrap();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let callback: OutputCallback = Arc::new(move |line, is_error| {
            sink.lock().unwrap().push((line.to_string(), is_error));
        });

        ShellRunner::with_shell(Shell::Default)
            .run("echo a; echo b", temp.path(), &ShellConfig::default(), Some(callback))
            .await;

        let lines = lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![("a".to_string(), false), ("b".to_string(), false)]
        );
    }
}
