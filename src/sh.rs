//! Running external commands from targets.
//!
//! Every helper reports whether the command started and, if it did, the exit
//! code it finished with, see [`ShError::ran`] and [`exit_status`].
use std::collections::HashMap;
use std::process::{Command, ExitStatus, Stdio};

use crate::engine::Engine;
use crate::error::ShError;

/// Runs a command. Its output is shown only when the engine is verbose,
/// errors are always shown.
pub fn run(cmd: &str, args: &[&str]) -> Result<(), ShError> {
    run_with(&HashMap::new(), cmd, args)
}

/// Runs a command, always showing its output.
pub fn run_v(cmd: &str, args: &[&str]) -> Result<(), ShError> {
    exec(&HashMap::new(), Stdio::inherit(), Stdio::inherit(), cmd, args)
}

/// Like [`run`] with additional environment variables.
pub fn run_with(env: &HashMap<String, String>, cmd: &str, args: &[&str]) -> Result<(), ShError> {
    let stdout = if Engine::current().settings().verbose {
        Stdio::inherit()
    } else {
        Stdio::null()
    };

    exec(env, stdout, Stdio::inherit(), cmd, args)
}

/// Runs a command and returns its standard output with surrounding
/// whitespace removed.
pub fn output(cmd: &str, args: &[&str]) -> Result<String, ShError> {
    output_with(&HashMap::new(), cmd, args)
}

/// Like [`output`] with additional environment variables.
pub fn output_with(
    env: &HashMap<String, String>,
    cmd: &str,
    args: &[&str],
) -> Result<String, ShError> {
    let line = command_line(cmd, args);
    log(&line);

    let out = Command::new(cmd)
        .args(args)
        .envs(env)
        .stdin(Stdio::inherit())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|source| ShError::Spawn {
            cmd: line.clone(),
            source,
        })?;

    check(&line, out.status)?;

    let stdout = String::from_utf8(out.stdout).map_err(|source| ShError::Utf8 {
        cmd: line,
        source,
    })?;

    Ok(stdout.trim().to_owned())
}

/// Runs a command with the given environment and output streams, the
/// building block of the other helpers.
pub fn exec(
    env: &HashMap<String, String>,
    stdout: Stdio,
    stderr: Stdio,
    cmd: &str,
    args: &[&str],
) -> Result<(), ShError> {
    let line = command_line(cmd, args);
    log(&line);

    let status = Command::new(cmd)
        .args(args)
        .envs(env)
        .stdin(Stdio::inherit())
        .stdout(stdout)
        .stderr(stderr)
        .status()
        .map_err(|source| ShError::Spawn {
            cmd: line.clone(),
            source,
        })?;

    check(&line, status)
}

/// Exit code of a command's result: 0 on success, the command's own code if
/// it ran and failed, 1 otherwise.
pub fn exit_status<T>(result: &Result<T, ShError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.exit_status(),
    }
}

fn check(line: &str, status: ExitStatus) -> Result<(), ShError> {
    if status.success() {
        return Ok(());
    }

    match status.code() {
        Some(code) => Err(ShError::Exit {
            cmd: line.to_owned(),
            code,
        }),
        None => Err(ShError::Signal {
            cmd: line.to_owned(),
        }),
    }
}

fn command_line(cmd: &str, args: &[&str]) -> String {
    let mut line = cmd.to_owned();
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            line.push_str(&format!("{arg:?}"));
        } else {
            line.push_str(arg);
        }
    }
    line
}

fn log(line: &str) {
    if Engine::current().settings().verbose {
        tracing::info!("exec: {line}");
    } else {
        tracing::debug!("exec: {line}");
    }
}
