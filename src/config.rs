//! Configuration loading and management
//!
//! Every tunable lives in [`Config`] and is handed to constructors
//! explicitly. Values come from an optional TOML file layered over the
//! defaults below; `COYOTE_DATA_DIR` overrides the data directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "COYOTE_CONFIG";
/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "COYOTE_DATA_DIR";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that relative paths below are resolved against
    pub data_dir: PathBuf,
    pub inputs: InputConfig,
    pub indicators: IndicatorConfig,
    pub supervisor: SupervisorConfig,
    pub listener: ListenerConfig,
    pub conversation: ConversationConfig,
    pub interactions: InteractionConfig,
}

/// Physical switch and button lines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// sysfs GPIO root
    pub gpio_root: PathBuf,
    pub wake_line: u32,
    pub television_line: u32,
    pub person_line: u32,
    pub debounce_ms: u64,
    /// Treat a low electrical level as "pressed"
    pub active_low: bool,
    pub sample_period_ms: u64,
}

/// Indicator light outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub gpio_root: PathBuf,
    pub pwm_root: PathBuf,
    /// Binary output line
    pub dynamite_line: u32,
    /// PWM chip and channel for the dimmable output
    pub intercom_pwm_chip: u32,
    pub intercom_pwm_channel: u32,
    pub pwm_period_ns: u64,
}

/// Poll cadence and restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Interaction poll tick
    pub poll_ms: u64,
    /// Listener liveness check tick
    pub watch_ms: u64,
    /// Listener exits tolerated before giving up
    pub restart_ceiling: u32,
    /// Upper bound on waiting for the interaction task at shutdown
    pub join_timeout_ms: u64,
}

/// Continuous speech-to-text listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub program: String,
    pub model_path: PathBuf,
    pub capture_device: String,
    pub threads: String,
    /// File the listener appends transcribed lines to
    pub transcript_file: PathBuf,
    pub extra_args: Vec<String>,
}

/// Persisted conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub directory: PathBuf,
    pub file_name: String,
    pub system_message: String,
}

/// External commands run by the interaction handlers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Receives the conversation file path as its last argument and prints
    /// the reply on stdout
    pub respond_program: String,
    pub respond_args: Vec<String>,
    /// Receives the text to speak on stdin
    pub speak_program: String,
    pub speak_args: Vec<String>,
    pub boom_program: String,
    pub boom_args: Vec<String>,
    /// Records the person speaking; `-f <capture_file>` is appended to its
    /// arguments
    pub capture_program: String,
    pub capture_args: Vec<String>,
    pub capture_file: PathBuf,
    pub capture_initial_ms: u64,
    pub capture_max_ms: u64,
    /// Transcript lines fed into a television prompt
    pub transcript_lines: usize,
    pub television_prompt_prefix: String,
    pub television_prompt_suffix: String,
    pub television_prompt_empty: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            inputs: InputConfig::default(),
            indicators: IndicatorConfig::default(),
            supervisor: SupervisorConfig::default(),
            listener: ListenerConfig::default(),
            conversation: ConversationConfig::default(),
            interactions: InteractionConfig::default(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            gpio_root: PathBuf::from("/sys/class/gpio"),
            wake_line: 17,
            television_line: 22,
            person_line: 27,
            debounce_ms: 50,
            active_low: false,
            sample_period_ms: 5,
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            gpio_root: PathBuf::from("/sys/class/gpio"),
            pwm_root: PathBuf::from("/sys/class/pwm"),
            dynamite_line: 23,
            intercom_pwm_chip: 0,
            intercom_pwm_channel: 0,
            pwm_period_ns: 1_000_000,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_ms: 100,
            watch_ms: 1000,
            restart_ceiling: 20,
            join_timeout_ms: 5000,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            program: "whisper-stream".to_string(),
            model_path: PathBuf::from("/usr/share/whisper/models/ggml-base.en.bin"),
            capture_device: "0".to_string(),
            threads: "2".to_string(),
            transcript_file: PathBuf::from("audio_to_text/transcription.txt"),
            extra_args: ["--step", "4500", "--length", "5000", "-ac", "512", "--keep", "85"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("conversation_data"),
            file_name: "conversation.json".to_string(),
            system_message: "You are a talkative companion watching television.".to_string(),
        }
    }
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            respond_program: "coyote-respond".to_string(),
            respond_args: Vec::new(),
            speak_program: "coyote-speak".to_string(),
            speak_args: Vec::new(),
            boom_program: "aplay".to_string(),
            boom_args: vec!["sound_effects/boom.wav".to_string()],
            capture_program: "whisper-stream".to_string(),
            capture_args: [
                "-m",
                "/usr/share/whisper/models/ggml-tiny.en.bin",
                "--step",
                "4000",
                "--length",
                "8000",
                "-c",
                "1",
                "-t",
                "1",
                "-ac",
                "512",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            capture_file: PathBuf::from("person_questions.txt"),
            capture_initial_ms: 12_000,
            capture_max_ms: 30_000,
            transcript_lines: 5,
            television_prompt_prefix: "Here is what you just heard on television: ```".to_string(),
            television_prompt_suffix: "``` Comment on it.".to_string(),
            television_prompt_empty: "You have not heard anything on television yet.".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the environment
    ///
    /// With no explicit path, `COYOTE_CONFIG` is consulted; with neither,
    /// the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file at {:?}", path))?;
                Self::from_toml_str(&contents)
                    .with_context(|| format!("parsing TOML config from {:?}", path))?
            }
            None => Self::default(),
        };

        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, filling gaps with defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reject values that would make a loop spin or never start
    pub fn validate(&self) -> Result<()> {
        if self.inputs.debounce_ms == 0 || self.inputs.sample_period_ms == 0 {
            bail!("input debounce and sample period must be non-zero");
        }
        if self.supervisor.poll_ms == 0 || self.supervisor.watch_ms == 0 {
            bail!("supervisor ticks must be non-zero");
        }
        if self.supervisor.restart_ceiling == 0 {
            bail!("restart_ceiling must be at least 1");
        }
        if self.listener.program.trim().is_empty() {
            bail!("listener program must not be empty");
        }
        if self.conversation.file_name.trim().is_empty() {
            bail!("conversation file name must not be empty");
        }
        Ok(())
    }

    /// Resolve a possibly relative path against the data directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data directory {:?}", self.data_dir))?;
        Ok(())
    }
}

impl InputConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }
}

impl SupervisorConfig {
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn watch(&self) -> Duration {
        Duration::from_millis(self.watch_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl InteractionConfig {
    pub fn capture_initial(&self) -> Duration {
        Duration::from_millis(self.capture_initial_ms)
    }

    pub fn capture_max(&self) -> Duration {
        Duration::from_millis(self.capture_max_ms)
    }
}

fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("coyote"),
        None => PathBuf::from("."),
    }
}
