//! Operations the `slink serve` process answers itself.

use async_trait::async_trait;
use serde_json::{json, Value};
use slink_server::dispatch::InvocationDispatcher;
use slink_server::session::Session;
use slink_utils::net_protocol::invoke::{Invocation, InvokeError};

/// Answers `ping`, `echo` and `whoami`. Whether a session may call them at all is decided by its
/// invocation group.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BuiltinDispatcher;

#[async_trait]
impl InvocationDispatcher for BuiltinDispatcher {
    async fn on_session(&self, session: &Session) {
        tracing::debug!(
            client_id = %session.identity(),
            group = session.group().name(),
            "session handed to builtin operations"
        );
    }

    async fn invoke(
        &self,
        session: &Session,
        invocation: &Invocation,
    ) -> Result<Value, InvokeError> {
        match invocation.operation.as_str() {
            "ping" => Ok(json!("pong")),
            "echo" => Ok(invocation.args.clone()),
            "whoami" => Ok(json!({
                "client_id": session.identity().client_id(),
                "group": session.group().name(),
            })),
            other => Err(InvokeError::Unhandled {
                operation: other.to_owned(),
            }),
        }
    }
}
