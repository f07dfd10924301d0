//! End-to-end logins over loopback TCP, with the service side driven by slink_client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ntest::timeout;
use parking_lot::Mutex;
use serde_json::{json, Value};
use slink_client::{ClientError, GameHost, LoginConfig, LoginManager, ServiceClient, StaticHosts};
use slink_server::dispatch::InvocationDispatcher;
use slink_server::handshake::{AuthFailure, HandshakeError};
use slink_server::observer::AuthObserver;
use slink_server::registry::GroupRegistry;
use slink_server::secret_store::{MapSecretStore, SecretStore};
use slink_server::server::Server;
use slink_server::session::Session;
use slink_utils::auth::{CredentialBundle, Identity};
use slink_utils::net_async::{tcp, ClientStream, ConfiguredClient, ServerListener};
use slink_utils::net_protocol::auth::RejectReason;
use slink_utils::net_protocol::invoke::{Invocation, InvokeError};
use slink_utils::net_protocol::{self, ClientMessage, ServerMessage};
use tokio::sync::Semaphore;
use slink_utils::server_shutdown::ShutdownManager;

struct Echo;

#[async_trait]
impl InvocationDispatcher for Echo {
    async fn invoke(
        &self,
        session: &Session,
        invocation: &Invocation,
    ) -> Result<Value, InvokeError> {
        Ok(json!({
            "client_id": session.identity().client_id(),
            "args": invocation.args,
        }))
    }
}

/// Blocks every invocation until a permit is released, counting the invocations it was handed.
struct Gate {
    dispatched: AtomicUsize,
    permits: Semaphore,
}

impl Gate {
    fn closed() -> Arc<Self> {
        Arc::new(Self {
            dispatched: AtomicUsize::new(0),
            permits: Semaphore::new(0),
        })
    }
}

#[async_trait]
impl InvocationDispatcher for Gate {
    async fn invoke(
        &self,
        _session: &Session,
        _invocation: &Invocation,
    ) -> Result<Value, InvokeError> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let _permit = self.permits.acquire().await;
        Ok(Value::Null)
    }
}

#[derive(Default)]
struct Recorder {
    rejected: Mutex<Vec<HandshakeError>>,
    registered: Mutex<Vec<Identity>>,
}

impl AuthObserver for Recorder {
    fn on_rejected(
        &self,
        _peer: Option<SocketAddr>,
        _identity: Option<&Identity>,
        error: &HandshakeError,
    ) {
        self.rejected.lock().push(error.clone());
    }

    fn on_registered(&self, session: &Session) {
        self.registered.lock().push(session.identity().clone());
    }
}

struct Harness {
    server: Server,
    addr: SocketAddr,
    recorder: Arc<Recorder>,
    shutdown: ShutdownManager,
}

impl Harness {
    async fn start(timeout: Duration) -> Self {
        Self::with_dispatcher(timeout, Arc::new(Echo)).await
    }

    async fn with_dispatcher(
        timeout: Duration,
        dispatcher: Arc<dyn InvocationDispatcher>,
    ) -> Self {
        let registry =
            GroupRegistry::build([("slink", vec!["ping", "echo"]), ("admin", vec!["kick_player"])])
                .unwrap();
        let mut secrets = MapSecretStore::new();
        secrets.insert(Identity::new("svc-42").unwrap(), "hunter2");
        secrets.insert(Identity::new("svc-7").unwrap(), "swordfish");
        let secrets: Arc<dyn SecretStore> = Arc::new(secrets);

        let recorder = Arc::new(Recorder::default());
        let server = Server::builder(registry, secrets)
            .dispatcher(dispatcher)
            .observer(recorder.clone())
            .handshake_timeout(timeout)
            .build();

        let listener = tcp::ServerListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, shutdown_rx) = ShutdownManager::new_pair();
        tokio::spawn(server.clone().start(Box::new(listener), shutdown_rx));

        Self {
            server,
            addr,
            recorder,
            shutdown,
        }
    }

    fn rejections(&self) -> Vec<HandshakeError> {
        self.recorder.rejected.lock().clone()
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

fn client(client_id: &str, secret: &str, group: &str) -> ServiceClient {
    ServiceClient::create(client_id, secret, group).unwrap()
}

#[tokio::test]
#[timeout(10000)]
async fn valid_login_registers_session_with_identity_and_group() {
    let harness = Harness::start(Duration::from_secs(5)).await;

    let mut conn = client("svc-42", "hunter2", "slink")
        .login(harness.addr)
        .await
        .unwrap();

    let identity = Identity::new("svc-42").unwrap();
    wait_for(|| harness.server.sessions_for(&identity).len() == 1).await;
    let sessions = harness.server.sessions_for(&identity);
    assert_eq!(sessions[0].identity(), &identity);
    assert_eq!(sessions[0].group().name(), "slink");
    assert!(sessions[0].group().allows("ping"));
    assert_eq!(harness.recorder.registered.lock().as_slice(), &[identity]);

    let result = conn.invoke("echo", json!([1])).await.unwrap();
    assert_eq!(result, json!({"client_id": "svc-42", "args": [1]}));
}

#[tokio::test]
#[timeout(10000)]
async fn unknown_group_registers_nothing() {
    let harness = Harness::start(Duration::from_secs(5)).await;

    let err = client("svc-42", "hunter2", "billing")
        .login(harness.addr)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Rejected(RejectReason::GroupNotFound)
    ));
    assert_eq!(harness.server.live_sessions(), 0);
    assert_eq!(
        harness.rejections(),
        vec![HandshakeError::GroupNotFound("billing".to_owned())]
    );
}

#[tokio::test]
#[timeout(10000)]
async fn unknown_client_and_wrong_secret_look_the_same_remotely() {
    let harness = Harness::start(Duration::from_secs(5)).await;

    let unknown = client("svc-999", "hunter2", "slink")
        .login(harness.addr)
        .await
        .unwrap_err();
    let wrong = client("svc-42", "letmein", "slink")
        .login(harness.addr)
        .await
        .unwrap_err();

    for err in [&unknown, &wrong] {
        assert!(
            matches!(
                err,
                ClientError::Rejected(RejectReason::AuthenticationFailed)
            ),
            "{:?}",
            err
        );
    }
    assert_eq!(unknown.to_string(), wrong.to_string());

    // Locally, the cause is still distinguishable.
    assert_eq!(
        harness.rejections(),
        vec![
            HandshakeError::AuthenticationFailed(AuthFailure::UnknownClient),
            HandshakeError::AuthenticationFailed(AuthFailure::WrongProof),
        ]
    );
    assert_eq!(harness.server.live_sessions(), 0);
}

#[tokio::test]
#[timeout(10000)]
async fn silent_peer_times_out_without_leaking_handshakes() {
    let harness = Harness::start(Duration::from_millis(200)).await;

    let _silent = tcp::ConfiguredClient::new(Duration::from_secs(5))
        .connect(harness.addr)
        .await
        .unwrap();

    wait_for(|| harness.server.active_handshakes() == 1).await;
    wait_for(|| harness.server.active_handshakes() == 0).await;

    assert_eq!(harness.rejections(), vec![HandshakeError::Timeout]);
    assert_eq!(harness.server.live_sessions(), 0);
}

#[tokio::test]
#[timeout(10000)]
async fn operations_are_confined_to_the_granted_group() {
    let harness = Harness::start(Duration::from_secs(5)).await;
    let mut conn = client("svc-42", "hunter2", "slink")
        .login(harness.addr)
        .await
        .unwrap();

    let err = conn.invoke("kick_player", Value::Null).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Invoke(InvokeError::NotPermitted { ref operation, ref group })
            if operation == "kick_player" && group == "slink"
    ));
    assert!(!err.is_link_failure());

    assert!(conn.invoke("ping", Value::Null).await.is_ok());
}

#[tokio::test]
#[timeout(10000)]
async fn revoked_sessions_lose_their_connection() {
    let harness = Harness::start(Duration::from_secs(5)).await;
    let mut revoked = client("svc-42", "hunter2", "slink")
        .login(harness.addr)
        .await
        .unwrap();
    let mut other = client("svc-7", "swordfish", "admin")
        .login(harness.addr)
        .await
        .unwrap();

    let identity = Identity::new("svc-42").unwrap();
    wait_for(|| harness.server.live_sessions() == 2).await;
    assert_eq!(harness.server.revoke(&identity), 1);
    wait_for(|| harness.server.sessions_for(&identity).is_empty()).await;

    let err = revoked.invoke("ping", Value::Null).await.unwrap_err();
    assert!(err.is_link_failure(), "{:?}", err);

    assert!(other.invoke("kick_player", Value::Null).await.is_ok());
}

#[tokio::test]
#[timeout(10000)]
async fn concurrent_logins_of_one_client_are_independent_sessions() {
    let harness = Harness::start(Duration::from_secs(5)).await;
    let service = client("svc-42", "hunter2", "slink");

    let (first, second) = tokio::join!(service.login(harness.addr), service.login(harness.addr));
    let (mut first, second) = (first.unwrap(), second.unwrap());

    let identity = Identity::new("svc-42").unwrap();
    wait_for(|| harness.server.sessions_for(&identity).len() == 2).await;
    let sessions = harness.server.sessions_for(&identity);
    assert!(!sessions[0].ptr_eq(&sessions[1]));

    // Logging off one leaves the other registered.
    second.logoff().await;
    wait_for(|| harness.server.sessions_for(&identity).len() == 1).await;
    assert!(first.invoke("ping", Value::Null).await.is_ok());
}

#[tokio::test]
#[timeout(10000)]
async fn shutdown_closes_live_sessions() {
    let mut harness = Harness::start(Duration::from_secs(5)).await;
    let mut conn = client("svc-42", "hunter2", "slink")
        .login(harness.addr)
        .await
        .unwrap();
    wait_for(|| harness.server.live_sessions() == 1).await;

    harness.shutdown.shutdown_immediately().unwrap();
    wait_for(|| harness.server.live_sessions() == 0).await;

    let err = conn.invoke("ping", Value::Null).await.unwrap_err();
    assert!(err.is_link_failure(), "{:?}", err);
}

#[tokio::test]
#[timeout(10000)]
async fn login_manager_logs_on_and_invokes() {
    let harness = Harness::start(Duration::from_secs(5)).await;

    let hosts = StaticHosts::single(GameHost::new("127.0.0.1", harness.addr.port()));
    let mut config = LoginConfig::new(Arc::new(hosts), "hunter2");
    config.client_id = "svc-42".to_owned();
    config.logoff_wait = Duration::from_millis(50);
    let manager = LoginManager::start(config).unwrap();

    wait_for(|| manager.is_logged_on()).await;
    assert_eq!(
        manager.current_host(),
        Some(GameHost::new("127.0.0.1", harness.addr.port()))
    );

    let result = manager.invoke("echo", json!("hi")).await.unwrap();
    assert_eq!(result, json!({"client_id": "svc-42", "args": "hi"}));

    manager.shutdown().await;
    wait_for(|| harness.server.live_sessions() == 0).await;
}

/// Logs in on a raw stream, so invocations can be pipelined without waiting for results.
async fn raw_login(addr: SocketAddr) -> Box<dyn ClientStream> {
    let mut stream = tcp::ConfiguredClient::new(Duration::from_secs(5))
        .connect(addr)
        .await
        .unwrap();
    let credentials = CredentialBundle::create("svc-42", "hunter2").unwrap();
    slink_client::connection::handshake(&mut stream, &credentials, "slink")
        .await
        .unwrap();
    stream
}

async fn send_invocation(stream: &mut Box<dyn ClientStream>, id: u64) {
    let invocation = ClientMessage::Invoke(Invocation {
        id,
        operation: "ping".to_owned(),
        args: Value::Null,
    });
    net_protocol::async_write(stream, &invocation).await.unwrap();
}

#[tokio::test]
#[timeout(20000)]
async fn revoked_session_dispatches_no_pipelined_invocations() {
    for _ in 0..20 {
        let gate = Gate::closed();
        let harness = Harness::with_dispatcher(Duration::from_secs(5), gate.clone()).await;
        let mut stream = raw_login(harness.addr).await;

        send_invocation(&mut stream, 0).await;
        send_invocation(&mut stream, 1).await;
        wait_for(|| gate.dispatched.load(Ordering::SeqCst) == 1).await;

        let identity = Identity::new("svc-42").unwrap();
        assert_eq!(harness.server.revoke(&identity), 1);
        gate.permits.add_permits(2);

        wait_for(|| harness.server.live_sessions() == 0).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.dispatched.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
#[timeout(10000)]
async fn revoke_does_not_wait_for_a_stuck_invocation() {
    let gate = Gate::closed();
    let harness = Harness::with_dispatcher(Duration::from_secs(5), gate.clone()).await;
    let mut stream = raw_login(harness.addr).await;

    send_invocation(&mut stream, 0).await;
    wait_for(|| gate.dispatched.load(Ordering::SeqCst) == 1).await;

    // The gate is never opened.
    harness.server.revoke(&Identity::new("svc-42").unwrap());
    wait_for(|| harness.server.live_sessions() == 0).await;

    let response = net_protocol::async_read::<_, ServerMessage>(&mut stream).await;
    assert!(response.is_err(), "{:?}", response);
}
