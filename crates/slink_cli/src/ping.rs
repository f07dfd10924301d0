use std::time::Duration;

use serde_json::Value;
use slink_client::{ClientError, GameHost, ServiceClient};
use slink_utils::retry::async_retry_n;

const RETRY_DELAY: Duration = Duration::from_secs(1);

pub(crate) struct PingArgs {
    pub server: GameHost,
    pub client_id: String,
    pub secret: String,
    pub group: String,
    pub operation: String,
    pub args: Value,
    pub attempts: usize,
}

/// Logs in, invokes one operation, and logs off. Connection failures are retried; rejections are
/// not.
pub(crate) async fn ping(args: PingArgs) -> Result<Value, ClientError> {
    let PingArgs {
        server,
        client_id,
        secret,
        group,
        operation,
        args,
        attempts,
    } = args;

    let client = ServiceClient::create(client_id, secret, group)?;

    let mut conn = async_retry_n(
        attempts.max(1),
        RETRY_DELAY,
        |attempt| {
            let (client, server) = (&client, &server);
            async move {
                tracing::debug!(attempt, %server, "logging in");
                let addr = server.resolve().await?;
                client.login(addr).await
            }
        },
        ClientError::is_retryable,
    )
    .await?;

    let result = conn.invoke(operation, args).await;
    conn.logoff().await;
    result
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use serde_json::json;
    use slink_client::{ClientError, GameHost};
    use slink_server::registry::GroupRegistry;
    use slink_server::secret_store::SharedSecretStore;
    use slink_server::server::Server;
    use slink_utils::net_async::{tcp, ServerListener};
    use slink_utils::net_protocol::auth::RejectReason;
    use slink_utils::server_shutdown::ShutdownManager;

    use super::{ping, PingArgs};
    use crate::dispatcher::BuiltinDispatcher;

    fn args(server: GameHost, secret: &str, operation: &str) -> PingArgs {
        PingArgs {
            server,
            client_id: "svc-42".to_owned(),
            secret: secret.to_owned(),
            group: "slink".to_owned(),
            operation: operation.to_owned(),
            args: json!(["hello"]),
            attempts: 1,
        }
    }

    async fn start_server() -> (GameHost, ShutdownManager) {
        let registry = GroupRegistry::build([("slink", ["ping", "echo"])]).unwrap();
        let server = Server::builder(registry, Arc::new(SharedSecretStore::new("hunter2")))
            .dispatcher(Arc::new(BuiltinDispatcher))
            .build();
        let listener = tcp::ServerListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = ShutdownManager::new_pair();
        tokio::spawn(server.start(Box::new(listener), rx));
        (GameHost::new("127.0.0.1", addr.port()), shutdown)
    }

    #[tokio::test]
    async fn ping_and_echo() {
        let (host, mut shutdown) = start_server().await;

        let pong = ping(args(host.clone(), "hunter2", "ping")).await.unwrap();
        assert_eq!(pong, json!("pong"));

        let echo = ping(args(host, "hunter2", "echo")).await.unwrap();
        assert_eq!(echo, json!(["hello"]));

        shutdown.shutdown_immediately().unwrap();
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let (host, mut shutdown) = start_server().await;

        let mut ping_args = args(host, "letmein", "ping");
        ping_args.attempts = 5;
        let started = tokio::time::Instant::now();
        let err = ping(ping_args).await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::Rejected(RejectReason::AuthenticationFailed)
        ));
        assert!(started.elapsed() < super::RETRY_DELAY);

        shutdown.shutdown_immediately().unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_an_io_error() {
        // Bind and drop to find a port nothing listens on.
        let listener = tcp::ServerListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = ping(args(GameHost::new("127.0.0.1", port), "hunter2", "ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn empty_secret_fails_before_dialing() {
        let err = ping(args(GameHost::new("127.0.0.1", 1), "", "ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidCredential(_)));
    }
}
