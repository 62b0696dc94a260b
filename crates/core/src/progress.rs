//! Progress wire envelope emitted by every operation task list.
//!
//! The CLI layer relays these verbatim; the JSON shape is part of the
//! external contract and must stay stable.

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// One event on a task list's progress stream. A stream yields any number of
/// `progress` events and terminates with exactly one of `done`, `error` or
/// `aborted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress {
        #[serde(skip_serializing_if = "Option::is_none")]
        persist: Option<bool>,
        message: String,
    },
    Done,
    Error {
        code: String,
        message: String,
    },
    Aborted,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        ProgressEvent::Progress {
            persist: None,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }
}

impl From<&TaskError> for ProgressEvent {
    fn from(err: &TaskError) -> Self {
        match err {
            TaskError::Aborted => ProgressEvent::Aborted,
            TaskError::Failed { code, message } => ProgressEvent::Error {
                code: code.clone(),
                message: message.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_json_shape() {
        let event = ProgressEvent::message("Create node alice");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "progress", "message": "Create node alice"})
        );
    }

    #[test]
    fn error_json_shape() {
        let event = ProgressEvent::Error {
            code: "io".to_string(),
            message: "disk full".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "error", "code": "io", "message": "disk full"})
        );
    }

    #[test]
    fn terminal_classification() {
        assert!(!ProgressEvent::message("x").is_terminal());
        assert!(ProgressEvent::Done.is_terminal());
        assert!(ProgressEvent::Aborted.is_terminal());
    }
}
