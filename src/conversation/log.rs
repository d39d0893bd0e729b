//! JSON conversation log shared by the interaction handlers
//!
//! The log is a single JSON array of role/content records. Only the one
//! active handler touches it, so reads and writes are plain
//! read-modify-write without locking.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ConversationConfig;

/// Errors that can occur while maintaining the conversation log
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("conversation log {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode conversation: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Location and seed of the conversation log
#[derive(Debug, Clone)]
pub struct ConversationLog {
    directory: PathBuf,
    file_name: String,
    system_message: String,
}

impl ConversationLog {
    pub fn new(directory: PathBuf, config: &ConversationConfig) -> Self {
        Self {
            directory,
            file_name: config.file_name.clone(),
            system_message: config.system_message.clone(),
        }
    }

    /// Path of the live log
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// Create the directory and a starter log holding the system message
    ///
    /// An existing log is left untouched.
    pub fn setup(&self) -> Result<PathBuf, ConversationError> {
        fs::create_dir_all(&self.directory).map_err(|source| ConversationError::Io {
            path: self.directory.clone(),
            source,
        })?;

        let path = self.path();
        if !path.exists() {
            info!(?path, "starting new conversation log");
            self.save(&[Message::new(Role::System, self.system_message.as_str())])?;
        }
        Ok(path)
    }

    /// Read all messages; a missing or unreadable log reads as empty
    pub fn load(&self) -> Vec<Message> {
        let path = self.path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(?path, error = %e, "failed to read conversation log");
                return Vec::new();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(?path, error = %e, "conversation log is not valid JSON; starting over");
            Vec::new()
        })
    }

    /// Append one message
    pub fn append(&self, role: Role, content: &str) -> Result<(), ConversationError> {
        let mut messages = self.load();
        messages.push(Message::new(role, content));
        debug!(?role, total = messages.len(), "appending to conversation");
        self.save(&messages)
    }

    /// Rename the log with a timestamp suffix and start a fresh one
    ///
    /// Returns the archived path, or `None` when there was nothing beyond
    /// the system message to keep.
    pub fn archive(&self) -> Result<Option<PathBuf>, ConversationError> {
        let archived = self.archive_at(Local::now().naive_local())?;
        if archived.is_some() {
            self.setup()?;
        }
        Ok(archived)
    }

    /// Rename the log to `<stem>_YYYYMMDD_HHMMSS<.ext>` for the given time
    ///
    /// An existing archive is never replaced; a numbered suffix is added
    /// until the name is free.
    pub fn archive_at(&self, now: NaiveDateTime) -> Result<Option<PathBuf>, ConversationError> {
        let path = self.path();
        if !path.exists() {
            debug!(?path, "no conversation to archive");
            return Ok(None);
        }
        if !self.load().iter().any(|m| m.role != Role::System) {
            debug!(?path, "conversation has no turns; not archiving");
            return Ok(None);
        }

        let mut attempt = 0;
        let archived = loop {
            let candidate = self
                .directory
                .join(archived_name(&self.file_name, now, attempt));
            if !candidate.exists() {
                break candidate;
            }
            attempt += 1;
        };

        fs::rename(&path, &archived).map_err(|source| ConversationError::Io {
            path: path.clone(),
            source,
        })?;
        info!(from = ?path, to = ?archived, "conversation archived");
        Ok(Some(archived))
    }

    fn save(&self, messages: &[Message]) -> Result<(), ConversationError> {
        let path = self.path();
        let json = serde_json::to_string_pretty(messages)?;
        fs::write(&path, json).map_err(|source| ConversationError::Io { path, source })
    }
}

fn archived_name(file_name: &str, now: NaiveDateTime, attempt: u32) -> String {
    let stamp = match attempt {
        0 => now.format("%Y%m%d_%H%M%S").to_string(),
        n => format!("{}_{}", now.format("%Y%m%d_%H%M%S"), n),
    };
    let name = Path::new(file_name);
    match (
        name.file_stem().and_then(|s| s.to_str()),
        name.extension().and_then(|s| s.to_str()),
    ) {
        (Some(stem), Some(ext)) => format!("{}_{}.{}", stem, stamp, ext),
        _ => format!("{}_{}", file_name, stamp),
    }
}
