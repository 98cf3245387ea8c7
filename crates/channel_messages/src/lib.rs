//! Messages passed between the bot, the job loop and the notifier.
#![allow(missing_docs, clippy::missing_docs_in_private_items)]

use inventory::DeviceSelection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Goes to every registered chat.
    Broadcast { text: String },
    /// Goes to a single chat, e.g. the one that asked for a job.
    Direct { chat_id: i64, text: String },
}

impl Notification {
    pub fn broadcast(text: impl Into<String>) -> Self {
        Notification::Broadcast { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Notification::Broadcast { text } | Notification::Direct { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    Backup { with_update: bool },
    CheckUpdates,
    Upgrade,
    RouterboardUpgrade,
    ListDevices { refresh: bool },
}

impl JobKind {
    pub fn title(&self) -> &'static str {
        match self {
            JobKind::Backup { with_update: false } => "backup",
            JobKind::Backup { with_update: true } => "backup with update",
            JobKind::CheckUpdates => "update check",
            JobKind::Upgrade => "upgrade",
            JobKind::RouterboardUpgrade => "RouterBoard upgrade",
            JobKind::ListDevices { .. } => "device list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub kind: JobKind,
    pub selection: DeviceSelection,
    /// Chat that asked for the job; `None` for the command line.
    pub requested_by: Option<i64>,
}

/// A chat that sent `/start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatRegistration {
    pub chat_id: i64,
}

/// Asks the job loop to stop the running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRequest {
    pub chat_id: i64,
}
