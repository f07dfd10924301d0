//! The seam between the server and whatever serves invocations once a session is registered.

use async_trait::async_trait;
use serde_json::Value;
use slink_utils::net_protocol::invoke::{Invocation, InvokeError};

use crate::session::Session;

/// Receives registered sessions and serves their invocations.
///
/// The server checks every invocation against the session's group before calling
/// [InvocationDispatcher::invoke], so a dispatcher only ever sees operations the group allows.
#[async_trait]
pub trait InvocationDispatcher: Send + Sync {
    /// Called once, when a session is handed off after a successful handshake.
    async fn on_session(&self, _session: &Session) {}

    async fn invoke(&self, session: &Session, invocation: &Invocation)
        -> Result<Value, InvokeError>;
}

/// Accepts sessions and answers every invocation with [InvokeError::Unhandled].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

#[async_trait]
impl InvocationDispatcher for NoopDispatcher {
    async fn invoke(
        &self,
        _session: &Session,
        invocation: &Invocation,
    ) -> Result<Value, InvokeError> {
        Err(InvokeError::Unhandled {
            operation: invocation.operation.clone(),
        })
    }
}
