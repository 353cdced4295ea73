use crate::error::{DevError, ProcessErrorDetails};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn empty(status_code: i32) -> Self {
        Self {
            status_code,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).to_string();
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        text
    }
}

pub trait ToolRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        env_overrides: &BTreeMap<String, String>,
        capture_output: bool,
    ) -> Result<CommandOutput, io::Error>;
}

pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        env_overrides: &BTreeMap<String, String>,
        capture_output: bool,
    ) -> Result<CommandOutput, io::Error> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd).stdin(Stdio::inherit());
        for (key, value) in env_overrides {
            cmd.env(key, value);
        }
        if capture_output {
            let output = cmd.output()?;
            let status_code =
                output
                    .status
                    .code()
                    .unwrap_or(if output.status.success() { 0 } else { 1 });
            Ok(CommandOutput {
                status_code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            let status = cmd.status()?;
            let status_code = status
                .code()
                .unwrap_or(if status.success() { 0 } else { 1 });
            Ok(CommandOutput::empty(status_code))
        }
    }
}

/// One external program invocation, built up by the backend helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn render(&self) -> String {
        fn shell_quote(part: &str) -> String {
            if part.is_empty() {
                return "\"\"".to_string();
            }
            if part.chars().any(|c| c.is_whitespace()) {
                return format!("\"{}\"", part.replace('"', "\\\""));
            }
            part.to_string()
        }
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|arg| shell_quote(arg)));
        parts.join(" ")
    }
}

fn spawn_error_details(err: &io::Error, program: &str, command: &str) -> ProcessErrorDetails {
    if err.kind() == io::ErrorKind::NotFound {
        return ProcessErrorDetails {
            error_code: "tool_not_found".to_string(),
            hint: Some(format!(
                "Install `{program}` and ensure it is on your PATH, or point k8s-dev.yaml at it."
            )),
            command: Some(command.to_string()),
            exit_code: None,
            raw_output: None,
        };
    }
    ProcessErrorDetails {
        error_code: "process_spawn_failed".to_string(),
        hint: None,
        command: Some(command.to_string()),
        exit_code: None,
        raw_output: None,
    }
}

fn classify_tool_failure(output: &str) -> (String, Option<String>) {
    let lower = output.to_lowercase();

    if lower.contains("unable to connect to the server")
        || lower.contains("connection refused")
        || lower.contains("no route to host")
    {
        return (
            "cluster_unreachable".to_string(),
            Some("The cluster API is unreachable. Check `k8s-dev status` and retry.".to_string()),
        );
    }

    if lower.contains("x509") || lower.contains("certificate signed by unknown authority") {
        return (
            "cluster_tls_rejected".to_string(),
            Some(
                "The kube-config certificates do not match the cluster. Recreate the environment with `k8s-dev create --force`."
                    .to_string(),
            ),
        );
    }

    if lower.contains("a vagrant environment or target machine is required")
        || lower.contains("vagrantfile")
    {
        return (
            "vagrantfile_missing".to_string(),
            Some("Run `k8s-dev init` to generate the Vagrantfile.".to_string()),
        );
    }

    if lower.contains("could not be found")
        && (lower.contains("playbook") || lower.contains("role"))
    {
        return (
            "ansible_content_missing".to_string(),
            Some("Install collections and roles with `ansible-galaxy install -r requirements.yml`.".to_string()),
        );
    }

    ("process_command_failed".to_string(), None)
}

/// Runs one invocation in `cwd`, turning a spawn failure or a non-zero exit into `DevError::Tool`.
pub fn execute<R: ToolRunner>(
    runner: &R,
    cwd: &Path,
    invocation: &Invocation,
    capture_output: bool,
) -> Result<CommandOutput, DevError> {
    let command = invocation.render();
    debug!(command = %command, capture_output, "running external tool");
    let cmd_output = runner
        .run(
            &invocation.program,
            &invocation.args,
            cwd,
            &invocation.env,
            capture_output,
        )
        .map_err(|err| DevError::Tool {
            message: format!("failed to run command `{command}`: {err}"),
            details: spawn_error_details(&err, &invocation.program, &command),
        })?;
    if !cmd_output.success() {
        let captured = cmd_output.combined().trim().to_string();
        let (error_code, hint) = classify_tool_failure(&captured);
        let mut message = format!(
            "command failed with status {} while running `{}`",
            cmd_output.status_code, command
        );
        if !captured.is_empty() {
            message = format!("{message}: {captured}");
        }
        if let Some(ref hint_message) = hint {
            message = format!("{message}\nHint: {hint_message}");
        }
        return Err(DevError::Tool {
            message,
            details: ProcessErrorDetails {
                error_code,
                hint,
                command: Some(command),
                exit_code: Some(cmd_output.status_code),
                raw_output: if captured.is_empty() {
                    None
                } else {
                    Some(captured)
                },
            },
        });
    }
    Ok(cmd_output)
}

/// Runs one invocation without judging its exit status. Only spawn failures are errors.
pub fn probe<R: ToolRunner>(
    runner: &R,
    cwd: &Path,
    invocation: &Invocation,
) -> Result<CommandOutput, io::Error> {
    debug!(command = %invocation.render(), "probing external tool");
    runner.run(
        &invocation.program,
        &invocation.args,
        cwd,
        &invocation.env,
        true,
    )
}
