//! Events emitted by the supervisors
//!
//! Both supervisors publish onto one broadcast channel; `main` subscribes
//! and logs them. Sends never block and are dropped when nobody listens.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::Mode;

/// Something observable happened in the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// A handler is about to run for this mode
    ModeDispatched { mode: Mode },

    /// A handler returned an error or panicked
    HandlerFailed { mode: Mode, error: String },

    /// The conversation log was moved aside
    ConversationArchived { path: PathBuf },

    /// The interaction loop observed cancellation and returned
    InteractionStopped,

    /// The listener process was (re)started
    ListenerStarted { pid: Option<u32> },

    /// The listener process exited
    ListenerExited {
        code: Option<i32>,
        /// Exits counted so far
        restarts: u32,
    },

    /// The restart ceiling was exceeded
    ListenerFailed { restarts: u32, ceiling: u32 },
}

impl std::fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::ModeDispatched { mode } => write!(f, "MODE_DISPATCHED ({})", mode),
            DeviceEvent::HandlerFailed { mode, error } => {
                write!(f, "HANDLER_FAILED ({}: {})", mode, error)
            }
            DeviceEvent::ConversationArchived { path } => {
                write!(f, "CONVERSATION_ARCHIVED ({})", path.display())
            }
            DeviceEvent::InteractionStopped => write!(f, "INTERACTION_STOPPED"),
            DeviceEvent::ListenerStarted { pid } => match pid {
                Some(pid) => write!(f, "LISTENER_STARTED (pid {})", pid),
                None => write!(f, "LISTENER_STARTED"),
            },
            DeviceEvent::ListenerExited { code, restarts } => {
                write!(f, "LISTENER_EXITED (code {:?}, restart {})", code, restarts)
            }
            DeviceEvent::ListenerFailed { restarts, ceiling } => {
                write!(f, "LISTENER_FAILED ({} exits > {})", restarts, ceiling)
            }
        }
    }
}
