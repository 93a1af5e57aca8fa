//! The provisioning command boundary.
//!
//! External scripts are opaque: they take positional arguments and
//! report failure through a non-empty error stream. The [`CommandRunner`]
//! trait is the seam tests script instead of spawning real processes.

use std::fmt;

/// One external command invocation: a program and its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Non-empty stderr marks the command failed.
    pub fn failed(&self) -> bool {
        !self.stderr.is_empty()
    }
}

type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Runs provisioning commands. Implementations must await each command
/// to completion; no timeout is imposed here.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> BoxFuture<std::io::Result<CommandOutput>>;
}

/// The real runner: spawns the command and waits for it.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> BoxFuture<std::io::Result<CommandOutput>> {
        let program = spec.program.clone();
        let args = spec.args.clone();
        Box::pin(async move {
            let output = tokio::process::Command::new(&program)
                .args(&args)
                .output()
                .await?;
            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}
