//! Child-process execution with line-streamed output.
//!
//! Children are placed in their own process group (`setpgid(0,0)` before
//! exec) so a signal to the negative PID reaches the whole tree.

use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;

use crate::error::{Result, WorkgraphError};

pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn ok(&self) -> bool {
        self.code == 0
    }
}

/// Spawn `program args…` in `cwd`, stream every output line through
/// `on_line(line, is_stderr)`, and return the accumulated buffers with the
/// exit code (-1 when killed by signal).
pub fn run_streamed<F>(
    program: &str,
    args: &[String],
    cwd: &Path,
    mut on_line: F,
) -> Result<ProcessOutput>
where
    F: FnMut(&str, bool),
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|e| {
        WorkgraphError::BuildError(format!("failed to spawn {}: {}", program, e))
    })?;

    let (tx, rx) = mpsc::channel::<(String, bool)>();
    let out_handle = spawn_line_reader(child.stdout.take(), tx.clone(), false);
    let err_handle = spawn_line_reader(child.stderr.take(), tx, true);

    let mut stdout = String::new();
    let mut stderr = String::new();
    // Iteration ends once both reader threads drop their senders.
    for (line, is_stderr) in rx {
        on_line(&line, is_stderr);
        let buf = if is_stderr { &mut stderr } else { &mut stdout };
        buf.push_str(&line);
        buf.push('\n');
    }
    if let Some(h) = out_handle {
        let _ = h.join();
    }
    if let Some(h) = err_handle {
        let _ = h.join();
    }

    let status = child.wait().map_err(|e| {
        WorkgraphError::BuildError(format!("failed to wait for {}: {}", program, e))
    })?;

    Ok(ProcessOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

/// Run a shell command string (generators declare plain shell commands).
pub fn run_shell_streamed<F>(command: &str, cwd: &Path, on_line: F) -> Result<ProcessOutput>
where
    F: FnMut(&str, bool),
{
    let args = vec!["-c".to_string(), command.to_string()];
    run_streamed("/bin/sh", &args, cwd, on_line)
}

fn spawn_line_reader<R>(
    source: Option<R>,
    tx: mpsc::Sender<(String, bool)>,
    is_stderr: bool,
) -> Option<std::thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let source = source?;
    Some(std::thread::spawn(move || {
        let reader = BufReader::new(source);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send((line, is_stderr)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    }))
}
