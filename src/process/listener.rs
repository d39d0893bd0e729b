//! The supervised speech-to-text listener process

use std::fmt;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::ListenerConfig;

/// Errors that can occur while managing the listener process
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to poll listener: {0}")]
    Poll(#[source] std::io::Error),

    #[error("failed to terminate listener: {0}")]
    Terminate(#[source] std::io::Error),
}

/// Fixed command line for the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ListenerCommand {
    /// Model, capture device, thread count and output file, then any extras
    pub fn from_config(config: &ListenerConfig) -> Self {
        let mut args = vec![
            "-m".to_string(),
            config.model_path.display().to_string(),
            "-c".to_string(),
            config.capture_device.clone(),
            "-t".to_string(),
            config.threads.clone(),
            "-f".to_string(),
            config.transcript_file.display().to_string(),
        ];
        args.extend(config.extra_args.iter().cloned());

        Self {
            program: config.program.clone(),
            args,
        }
    }
}

impl fmt::Display for ListenerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Observed state of a listener process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    /// Exited with this code (`None` when killed by a signal)
    Exited(Option<i32>),
}

/// A launched listener the supervisor can poll and terminate
pub trait ListenerProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness check
    fn poll(&mut self) -> Result<Liveness, ListenerError>;

    /// Request termination without waiting for the process to exit
    fn terminate(&mut self) -> Result<(), ListenerError>;
}

/// Starts listener processes
pub trait Launcher: Send {
    fn launch(&mut self, command: &ListenerCommand) -> Result<Box<dyn ListenerProcess>, ListenerError>;
}

/// Launches real child processes on the tokio runtime
#[derive(Debug, Default)]
pub struct TokioLauncher;

impl Launcher for TokioLauncher {
    fn launch(&mut self, command: &ListenerCommand) -> Result<Box<dyn ListenerProcess>, ListenerError> {
        debug!(%command, "launching listener");
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ListenerError::Launch {
                program: command.program.clone(),
                source,
            })?;
        Ok(Box::new(TokioListener { child }))
    }
}

struct TokioListener {
    child: Child,
}

impl ListenerProcess for TokioListener {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn poll(&mut self) -> Result<Liveness, ListenerError> {
        match self.child.try_wait().map_err(ListenerError::Poll)? {
            Some(status) => Ok(Liveness::Exited(status.code())),
            None => Ok(Liveness::Running),
        }
    }

    fn terminate(&mut self) -> Result<(), ListenerError> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(ListenerError::Terminate(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_command_from_config() {
        let config = ListenerConfig {
            program: "whisper-stream".to_string(),
            model_path: PathBuf::from("/models/base.bin"),
            capture_device: "1".to_string(),
            threads: "4".to_string(),
            transcript_file: PathBuf::from("heard.txt"),
            extra_args: vec!["--keep".to_string(), "85".to_string()],
        };
        let command = ListenerCommand::from_config(&config);

        assert_eq!(command.program, "whisper-stream");
        assert_eq!(
            command.to_string(),
            "whisper-stream -m /models/base.bin -c 1 -t 4 -f heard.txt --keep 85"
        );
    }

    #[tokio::test]
    async fn test_tokio_launcher_observes_exit() {
        let mut launcher = TokioLauncher;
        let command = ListenerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "exit 3".to_string()],
        };
        let mut process = launcher.launch(&command).unwrap();

        let mut liveness = process.poll().unwrap();
        for _ in 0..200 {
            if liveness != Liveness::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            liveness = process.poll().unwrap();
        }
        assert_eq!(liveness, Liveness::Exited(Some(3)));
        // Terminating an exited process is harmless
        process.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_tokio_launcher_terminates_running_process() {
        let mut launcher = TokioLauncher;
        let command = ListenerCommand {
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
        };
        let mut process = launcher.launch(&command).unwrap();
        assert!(process.id().is_some());
        assert_eq!(process.poll().unwrap(), Liveness::Running);

        process.terminate().unwrap();
        let mut liveness = Liveness::Running;
        for _ in 0..200 {
            liveness = process.poll().unwrap();
            if liveness != Liveness::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(liveness, Liveness::Exited(None));
    }

    #[test]
    fn test_missing_program_fails_to_launch() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let result = TokioLauncher.launch(&ListenerCommand {
            program: "no-such-listener-binary".to_string(),
            args: Vec::new(),
        });
        assert!(matches!(result, Err(ListenerError::Launch { .. })));
    }
}
