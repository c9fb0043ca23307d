use std::ffi::OsStr;
use std::process::Command;

use tracing::debug;

use crate::error::CharmError;

fn describe<S: AsRef<OsStr>>(cmd: &str, args: &[S]) -> String {
    format!(
        "`{} {}`",
        cmd,
        args.iter()
            .map(|a| a.as_ref().to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    )
}

/// Runs a command to completion, discarding its output
pub fn run<S: AsRef<OsStr>>(cmd: &str, args: &[S]) -> Result<(), CharmError> {
    get_output_with_env(cmd, args, &[]).map(|_| ())
}

/// Runs a command and returns its stdout
pub fn get_output<S: AsRef<OsStr>>(cmd: &str, args: &[S]) -> Result<Vec<u8>, CharmError> {
    get_output_with_env(cmd, args, &[])
}

/// Runs a command with extra environment variables and returns its stdout
///
/// A non-zero exit status is reported as a `SubcommandError` carrying stderr.
pub fn get_output_with_env<S: AsRef<OsStr>>(
    cmd: &str,
    args: &[S],
    env: &[(&str, &OsStr)],
) -> Result<Vec<u8>, CharmError> {
    debug!(command = %describe(cmd, args), "Running subcommand");

    let output = Command::new(cmd)
        .args(args)
        .envs(env.iter().cloned())
        .output()
        .map_err(|err| CharmError::SubcommandError(cmd.to_string(), err.to_string()))?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(CharmError::SubcommandError(
            describe(cmd, args),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}
