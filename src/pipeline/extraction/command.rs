//! Bounded-time execution of external programs (OCR engine, vendor CLI).

use std::path::Path;
use std::time::Duration;

use super::ExtractionError;

const PATH_PLACEHOLDER: &str = "{path}";

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs commands with a hard deadline.
///
/// Owns a private current-thread runtime so callers stay synchronous. The
/// child is killed if the deadline passes.
pub struct CommandRunner {
    runtime: tokio::runtime::Runtime,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Result<Self, ExtractionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { runtime, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExtractionError> {
        let mut command = tokio::process::Command::new(program);
        command.args(args).kill_on_drop(true);

        let output = self.runtime.block_on(async {
            tokio::time::timeout(self.timeout, command.output()).await
        });

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ExtractionError::CommandSpawn {
                    program: program.to_string(),
                    source,
                })
            }
            Err(_elapsed) => {
                return Err(ExtractionError::CommandTimeout {
                    program: program.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A shell-style command line with an optional `{path}` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    /// Split a template using POSIX shell quoting rules.
    pub fn parse(template: &str) -> Result<Self, ExtractionError> {
        let mut tokens = shlex::split(template)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ExtractionError::InvalidCommand(template.to_string()))?
            .into_iter();
        let program = tokens
            .next()
            .ok_or_else(|| ExtractionError::InvalidCommand(template.to_string()))?;
        Ok(Self {
            program,
            args: tokens.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for one file. Every `{path}` occurrence is substituted;
    /// without any placeholder the path is appended as the last argument.
    pub fn args_for(&self, path: &Path) -> Vec<String> {
        let path_str = path.to_string_lossy();
        let has_placeholder = self.args.iter().any(|a| a.contains(PATH_PLACEHOLDER));
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(PATH_PLACEHOLDER, &path_str))
            .collect();
        if !has_placeholder {
            args.push(path_str.into_owned());
        }
        args
    }
}
