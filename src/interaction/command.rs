//! Blocking helpers for the external tools the handlers call

use std::ffi::OsStr;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

/// Run a program to completion and return its stdout
pub fn output_of(program: &str, args: &[String], extra: &[&OsStr]) -> Result<String> {
    debug!(program, "running command");
    let output = Command::new(program)
        .args(args)
        .args(extra)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .with_context(|| format!("failed to run {}", program))?;

    if !output.status.success() {
        bail!("{} exited with {}", program, output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a program with `input` on stdin and wait for it
pub fn feed(program: &str, args: &[String], input: &str) -> Result<()> {
    debug!(program, bytes = input.len(), "running command with input");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to run {}", program))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .with_context(|| format!("failed to write to {}", program))?;
    }

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {}", program))?;
    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(())
}

/// Run a program to completion, ignoring its output
pub fn run(program: &str, args: &[String]) -> Result<()> {
    debug!(program, "running command");
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .with_context(|| format!("failed to run {}", program))?;
    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(())
}

/// Start a background program with its output discarded
pub fn spawn(program: &str, args: &[String], extra: &[&OsStr]) -> Result<Child> {
    debug!(program, "spawning command");
    Command::new(program)
        .args(args)
        .args(extra)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start {}", program))
}

/// Kill a background program and reap it, waiting at most `grace`
pub fn stop(mut child: Child, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(%status, "command already exited");
        return;
    }
    if let Err(e) = child.kill() {
        warn!(error = %e, "failed to kill command");
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                warn!(error = %e, "failed to reap command");
                return;
            }
        }
    }
    warn!(pid = child.id(), "command did not exit after kill");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_output_of_appends_extra_args() {
        let out = output_of("echo", &args(&["hello"]), &[OsStr::new("world")]).unwrap();
        assert_eq!(out.trim(), "hello world");
    }

    #[test]
    fn test_failing_command_is_an_error() {
        assert!(output_of("false", &[], &[]).is_err());
        assert!(run("false", &[]).is_err());
        assert!(run("true", &[]).is_ok());
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let err = run("definitely-not-a-real-program", &[]).unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-real-program"));
    }

    #[test]
    fn test_feed_writes_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("spoken.txt");
        let script = format!("cat > {}", out.display());
        feed("sh", &args(&["-c", &script]), "anvil incoming").unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "anvil incoming");
    }

    #[test]
    fn test_stop_kills_long_running_child() {
        let child = spawn("sleep", &args(&["30"]), &[]).unwrap();
        let started = Instant::now();
        stop(child, Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
