//! Messages exchanged on a connection once its session is registered.

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Correlates an [InvokeResult] with the [Invocation] it answers.
pub type InvocationId = u64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub id: InvocationId,
    pub operation: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InvokeResult {
    pub id: InvocationId,
    pub result: Result<serde_json::Value, InvokeError>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvokeError {
    /// The operation is not in the session's invocation group.
    #[error("operation {operation:?} is not permitted in group {group:?}")]
    NotPermitted { operation: String, group: String },
    /// The operation is permitted, but nothing handles it.
    #[error("no handler for operation {operation:?}")]
    Unhandled { operation: String },
    #[error("{message}")]
    Failed { message: String },
}
