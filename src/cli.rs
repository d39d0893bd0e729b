//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::CONFIG_ENV;

/// Command-line arguments for `coyote-daemon`
#[derive(Debug, Clone, Parser)]
#[command(
    name = "coyote-daemon",
    version,
    about = "Supervise the appliance's inputs, indicator lights and speech listener.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML); defaults are used when absent
    #[arg(long, value_name = "PATH", env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Logging level; `RUST_LOG` is used when omitted
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the configuration, print it, then exit
    #[arg(long)]
    pub check: bool,
}

/// Log level as exposed on the CLI
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::try_parse_from([
            "coyote-daemon",
            "--config",
            "/etc/coyote.toml",
            "--log-level",
            "debug",
            "--check",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("/etc/coyote.toml")));
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(args.check);
    }

    #[test]
    fn test_rejects_unknown_level() {
        assert!(CliArgs::try_parse_from(["coyote-daemon", "--log-level", "loud"]).is_err());
    }
}
