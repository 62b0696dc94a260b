//! Error taxonomy shared across the workspace.
//!
//! Two families, mirroring how failures travel:
//!
//! - [`ResourceError`] — synchronous precondition and lookup failures raised
//!   directly by manager methods.
//! - [`TaskError`] — asynchronous failures carried through a task list and
//!   surfaced on the progress envelope.
//!
//! [`InitError`] is neither: per-resource init failures are collected and
//! returned, never thrown.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Synchronous failures from manager operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ResourceError {
    /// The resource type does not declare a start operation.
    #[error("resource type '{resource_type}' of plugin '{plugin}' does not support start")]
    NoStart {
        plugin: String,
        resource_type: String,
    },

    /// The resource type does not declare a stop operation.
    #[error("resource type '{resource_type}' of plugin '{plugin}' does not support stop")]
    NoStop {
        plugin: String,
        resource_type: String,
    },

    /// No adapter is registered under the given name.
    #[error("resource '{name}' does not exist")]
    NotFound { name: String },

    /// Two ready markers decoded to the same compound name; the on-disk
    /// state is incoherent and init refuses to proceed.
    #[error("duplicate resource name '{name}' in ready registry")]
    DuplicateResourceName { name: String },

    /// No manager is registered for the `(plugin, resourceType)` pair.
    #[error("no resources manager for plugin '{plugin}', resource type '{resource_type}'")]
    UnknownManager {
        plugin: String,
        resource_type: String,
    },
}

impl ResourceError {
    /// Stable snake_case identifier for the wire envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ResourceError::NoStart { .. } => "resource_no_start",
            ResourceError::NoStop { .. } => "resource_no_stop",
            ResourceError::NotFound { .. } => "resource_not_found",
            ResourceError::DuplicateResourceName { .. } => "duplicate_resource_name",
            ResourceError::UnknownManager { .. } => "unknown_manager",
        }
    }
}

/// Failures delivered through a task list.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The list was aborted. A distinguished completion rather than a true
    /// error, but it still fails the surrounding list.
    #[error("aborted")]
    Aborted,

    /// A task failed. `code` is a stable identifier for the error kind;
    /// `message` is free-form.
    #[error("{message}")]
    Failed { code: String, message: String },
}

impl TaskError {
    pub fn failed(code: impl Into<String>, message: impl ToString) -> Self {
        TaskError::Failed {
            code: code.into(),
            message: message.to_string(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            TaskError::Aborted => "aborted",
            TaskError::Failed { code, .. } => code,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TaskError::Aborted)
    }
}

impl From<ResourceError> for TaskError {
    fn from(err: ResourceError) -> Self {
        TaskError::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::failed("io", err)
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::failed("json", err)
    }
}

/// A per-resource failure collected during manager init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitError {
    pub plugin: String,
    pub resource_type: String,
    pub name: String,
    pub message: String,
}
