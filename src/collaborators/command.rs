// src/collaborators/command.rs

//! Helpers for running external tools

use crate::error::{Error, Result};
use std::process::{Command, Output};
use tracing::debug;

/// Render a command line for error messages
pub(crate) fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run a command and capture its output, failing only if it could not be spawned
pub(crate) fn capture(cmd: &mut Command) -> Result<Output> {
    debug!("Running: {}", describe(cmd));
    cmd.output().map_err(|e| Error::CommandFailed {
        command: describe(cmd),
        message: e.to_string(),
    })
}

/// Run a command, capture stdout, and fail on a non-zero exit
pub(crate) fn stdout_of(cmd: &mut Command) -> Result<String> {
    let output = capture(cmd)?;
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: describe(cmd),
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command with inherited stdio (interactive tools), failing on non-zero exit
pub(crate) fn run_inherited(cmd: &mut Command) -> Result<()> {
    debug!("Running: {}", describe(cmd));
    let status = cmd.status().map_err(|e| Error::CommandFailed {
        command: describe(cmd),
        message: e.to_string(),
    })?;

    if !status.success() {
        return Err(Error::CommandFailed {
            command: describe(cmd),
            message: status.to_string(),
        });
    }
    Ok(())
}
