//! Sync results reported back to the host.

use serde::{Deserialize, Serialize};

pub const STATUS_VERSION: &str = "3.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    Success,
    /// Success, but message and details go to the event log.
    Info,
    /// This resource is aborted; sync continues with the next one.
    Warning,
    /// The whole account sync is aborted.
    Error,
    AccountRerun,
    FolderRerun,
}

/// Return value of `syncFolderList` and `syncFolder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    pub version: String,
    #[serde(rename = "type")]
    pub kind: StatusType,
    pub message: String,
    pub details: String,
}

impl StatusData {
    pub fn new(kind: StatusType, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            version: STATUS_VERSION.to_owned(),
            kind,
            message: message.into(),
            details: details.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(StatusType::Success, "", "")
    }
}

impl Default for StatusData {
    fn default() -> Self {
        Self::success()
    }
}
