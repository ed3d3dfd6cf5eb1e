use std::{io, process::Command};

use log::trace;
use thiserror::Error;

pub mod linux;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Couldn't run '{}'! Reason: {}", .0, .1)]
    Spawn(String, io::Error),
    #[error("'{}' failed! Reason: {}", .command, .stderr)]
    CommandFailed { command: String, stderr: String },
    #[error("'{}' didn't finish in time!", .0)]
    Timeout(String),
    #[error("Couldn't parse the output of '{}'! Reason: {}", .0, .1)]
    InvalidOutput(String, serde_json::Error),
}

impl KernelError {
    pub fn stderr_contains(&self, needle: &str) -> bool {
        match self {
            KernelError::CommandFailed { stderr, .. } => stderr.contains(needle),
            _ => false,
        }
    }
}

pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_owned();

    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }

    line
}

/// Runs `program` to completion and returns its stdout.
pub fn run(program: &str, args: &[&str]) -> Result<String, KernelError> {
    let command = command_line(program, args);

    trace!("Running '{command}'...");

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| KernelError::Spawn(command.clone(), err))?;

    if !output.status.success() {
        return Err(KernelError::CommandFailed {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
