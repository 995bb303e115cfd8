use std::{
    io::{self, Read, Write},
    process::{Command, Stdio},
    thread,
};

use anyhow::{anyhow, Context, Result};

use crate::config::DEFAULT_MAX_CAPTURE_BYTES;
use crate::errors::VenvIssue;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs external programs on behalf of an environment.
///
/// A program that could not be started is reported as
/// [`VenvIssue::LaunchFailed`]; a program that ran always yields a
/// [`RunOutput`], whatever its exit code.
pub trait ProcessRunner: Send + Sync {
    fn run_command(&self, program: &str, args: &[String]) -> Result<RunOutput>;
    fn run_command_streaming(&self, program: &str, args: &[String]) -> Result<RunOutput>;
    fn run_command_passthrough(&self, program: &str, args: &[String]) -> Result<RunOutput>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemProcessRunner {
    max_capture_bytes: usize,
}

impl SystemProcessRunner {
    #[must_use]
    pub fn new(max_capture_bytes: usize) -> Self {
        Self { max_capture_bytes }
    }
}

impl Default for SystemProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPTURE_BYTES)
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn run_command(&self, program: &str, args: &[String]) -> Result<RunOutput> {
        run_command(program, args, self.max_capture_bytes)
    }

    fn run_command_streaming(&self, program: &str, args: &[String]) -> Result<RunOutput> {
        run_command_streaming(program, args, self.max_capture_bytes)
    }

    fn run_command_passthrough(&self, program: &str, args: &[String]) -> Result<RunOutput> {
        run_command_passthrough(program, args)
    }
}

fn launch_failed(program: &str, err: &io::Error) -> anyhow::Error {
    anyhow::Error::new(VenvIssue::LaunchFailed {
        program: program.to_string(),
        error: err.to_string(),
    })
}

/// Execute a program and capture stdout/stderr.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or the I/O streams cannot
/// be read entirely.
pub fn run_command(program: &str, args: &[String], limit: usize) -> Result<RunOutput> {
    let mut command = configured_command(program, args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|err| launch_failed(program, &err))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout missing for {program}"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr missing for {program}"))?;
    let stdout_handle = thread::spawn(move || read_to_string_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_to_string_limited(stderr, limit));

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {program}"))?;
    let code = status.code().unwrap_or(-1);
    let (mut stdout, stdout_truncated) = stdout_handle
        .join()
        .map_err(|_| anyhow!("stdout thread panicked"))??;
    let (mut stderr, stderr_truncated) = stderr_handle
        .join()
        .map_err(|_| anyhow!("stderr thread panicked"))??;
    if stdout_truncated {
        stdout.push_str("\n[...truncated...]\n");
    }
    if stderr_truncated {
        stderr.push_str("\n[...truncated...]\n");
    }
    tracing::trace!(program, code, "process finished");
    Ok(RunOutput {
        code,
        stdout,
        stderr,
    })
}

/// Execute a program while streaming stdout/stderr to the parent process.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or its output streams
/// cannot be read.
pub fn run_command_streaming(program: &str, args: &[String], limit: usize) -> Result<RunOutput> {
    let mut command = configured_command(program, args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|err| launch_failed(program, &err))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout missing for {program}"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr missing for {program}"))?;

    let stdout_handle =
        thread::spawn(move || tee_to_string_limited(&mut stdout, io::stdout(), limit));
    let stderr_handle =
        thread::spawn(move || tee_to_string_limited(&mut stderr, io::stderr(), limit));

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {program}"))?;
    let code = status.code().unwrap_or(-1);
    let stdout = stdout_handle
        .join()
        .map_err(|_| anyhow!("stdout thread panicked"))??;
    let stderr = stderr_handle
        .join()
        .map_err(|_| anyhow!("stderr thread panicked"))??;

    Ok(RunOutput {
        code,
        stdout,
        stderr,
    })
}

/// Execute a program with inherited stdio for interactive apps.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned.
pub fn run_command_passthrough(program: &str, args: &[String]) -> Result<RunOutput> {
    let mut command = configured_command(program, args);
    command.stdin(Stdio::inherit());
    command.stdout(Stdio::inherit());
    command.stderr(Stdio::inherit());

    let status = command
        .status()
        .map_err(|err| launch_failed(program, &err))?;
    let code = status.code().unwrap_or(-1);
    Ok(RunOutput {
        code,
        stdout: String::new(),
        stderr: String::new(),
    })
}

fn configured_command(program: &str, args: &[String]) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    // Keep pip from nagging about its own version on every call.
    command.env("PIP_DISABLE_PIP_VERSION_CHECK", "1");
    command
}

fn read_to_string_limited(mut reader: impl Read, limit: usize) -> Result<(String, bool)> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        append_limited(&mut buffer, &chunk[..read], limit, &mut truncated);
    }
    Ok((String::from_utf8_lossy(&buffer).to_string(), truncated))
}

fn tee_to_string_limited(
    reader: &mut dyn Read,
    mut writer: impl Write,
    limit: usize,
) -> Result<String> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        writer.write_all(&chunk[..read])?;
        append_limited(&mut buffer, &chunk[..read], limit, &mut truncated);
    }
    writer.flush().ok();
    let mut text = String::from_utf8_lossy(&buffer).to_string();
    if truncated {
        text.push_str("\n[...truncated...]\n");
    }
    Ok(text)
}

// Keeps the tail of the stream; pip prints the useful error last.
fn append_limited(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize, truncated: &mut bool) {
    if limit == 0 {
        return;
    }
    if buffer.len().saturating_add(chunk.len()) <= limit {
        buffer.extend_from_slice(chunk);
        return;
    }
    *truncated = true;
    let old_len = buffer.len();
    let excess = old_len.saturating_add(chunk.len()).saturating_sub(limit);
    if excess >= old_len {
        buffer.clear();
        let drop_from_chunk = excess.saturating_sub(old_len).min(chunk.len());
        buffer.extend_from_slice(&chunk[drop_from_chunk..]);
    } else {
        buffer.drain(0..excess);
        buffer.extend_from_slice(chunk);
    }
}

/// Renders a command line for logs and error messages.
#[must_use]
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
