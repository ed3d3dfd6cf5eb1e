use std::time::Duration;

use log::trace;
use simple_cni_core::os::{command_line, linux::IP_COMMAND, KernelError};
use tokio::{process::Command, time::timeout};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs external tools without blocking the runtime. A command that outlives
/// the deadline is killed.
#[derive(Clone, Copy, Debug)]
pub struct CommandRunner {
    deadline: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandRunner {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub async fn run(&self, program: &str, args: &[&str]) -> Result<String, KernelError> {
        let command = command_line(program, args);

        trace!("Running '{command}'...");

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.deadline, output).await {
            Ok(output) => output.map_err(|err| KernelError::Spawn(command.clone(), err))?,
            Err(_) => return Err(KernelError::Timeout(command)),
        };

        if !output.status.success() {
            return Err(KernelError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn ip(&self, args: &[&str]) -> Result<String, KernelError> {
        self.run(IP_COMMAND, args).await
    }
}
