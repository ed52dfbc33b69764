use crate::{
    ConnectivityFlag, Endpoint, Error, ListenerHandle, NetClient, NetConfig, Packet,
    RequestDescriptor, RequestListener, Result, Transport, TransportResponse, UdpConnection,
    UdpListener, WorkerPool, home_context,
};
use async_trait::async_trait;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Instant;
use tokio::net::UdpSocket;

const HOME: &str = "home";
const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Event {
    Success(Value),
    Rejected(Value, StatusCode),
    Failure(Error),
    Connect(UdpConnection),
    UdpError(Error),
    Receive(Packet),
}

/// Forwards every callback, tagged with the thread it ran on.
struct Recorder {
    tx: Mutex<mpsc::Sender<(Event, Option<String>)>>,
}

impl Recorder {
    fn new() -> (Arc<Self>, mpsc::Receiver<(Event, Option<String>)>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx: Mutex::new(tx) }), rx)
    }

    fn record(&self, event: Event) {
        let thread = thread::current().name().map(String::from);
        let _ = self.tx.lock().send((event, thread));
    }
}

impl RequestListener for Recorder {
    fn on_success(&self, body: Value) {
        self.record(Event::Success(body));
    }

    fn on_error(&self, body: Value, status: StatusCode) {
        self.record(Event::Rejected(body, status));
    }

    fn on_failure(&self, error: Error) {
        self.record(Event::Failure(error));
    }
}

impl UdpListener for Recorder {
    fn on_connect(&self, connection: UdpConnection) {
        self.record(Event::Connect(connection));
    }

    fn on_error(&self, error: Error) {
        self.record(Event::UdpError(error));
    }

    fn on_receive(&self, packet: Packet) {
        self.record(Event::Receive(packet));
    }
}

fn next_event(rx: &mpsc::Receiver<(Event, Option<String>)>) -> (Event, Option<String>) {
    rx.recv_timeout(WAIT).expect("callback was not delivered")
}

fn assert_quiet(rx: &mpsc::Receiver<(Event, Option<String>)>) {
    if let Ok(event) = rx.recv_timeout(Duration::from_millis(200)) {
        panic!("unexpected callback: {event:?}");
    }
}

/// Blocks until the loop behind `handle` has exited.
fn wait_finished(handle: &ListenerHandle) {
    let deadline = Instant::now() + WAIT;
    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "loop did not exit");
        thread::sleep(Duration::from_millis(10));
    }
}

enum Script {
    Respond(u16, &'static str),
    /// Responds after holding the worker for a while.
    Slow(Duration, u16, &'static str),
    Fail,
}

struct ScriptedTransport {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<RequestDescriptor>>,
}

impl ScriptedTransport {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let (status, body) = match self.script {
            Script::Respond(status, body) => (status, body),
            Script::Slow(delay, status, body) => {
                tokio::time::sleep(delay).await;
                (status, body)
            }
            Script::Fail => return Err(Error::transport("connection refused")),
        };
        Ok(TransportResponse {
            status: StatusCode::from_u16(status).expect("valid status"),
            body: body.to_string(),
        })
    }
}

struct Harness {
    client: NetClient,
    flag: ConnectivityFlag,
}

fn harness(transport: Arc<ScriptedTransport>) -> Harness {
    harness_with(
        transport,
        NetConfig {
            worker_threads: 2,
            ..NetConfig::default()
        },
    )
}

fn harness_with(transport: Arc<ScriptedTransport>, config: NetConfig) -> Harness {
    let (home, home_loop) = home_context();
    home_loop.spawn(HOME).expect("spawn home loop");

    let flag = ConnectivityFlag::new(true);
    let client = NetClient::builder()
        .config(config)
        .transport(transport)
        .connectivity(flag.clone())
        .home(home)
        .build()
        .expect("client");

    Harness { client, flag }
}

fn udp_harness() -> Harness {
    harness(ScriptedTransport::new(Script::Fail))
}

/// Echoes every datagram back to its sender until the runtime stops.
async fn echo_peer() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind echo");
    let port = socket.local_addr().expect("echo addr").port();
    tokio::spawn(async move {
        let mut buf = [0_u8; 2048];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..len], from).await;
        }
    });
    port
}

#[test]
fn success_is_delivered_once_on_the_home_thread() {
    let transport = ScriptedTransport::new(Script::Respond(200, r#"{"items":[1,2]}"#));
    let h = harness(Arc::clone(&transport));
    let (recorder, rx) = Recorder::new();

    h.client.dispatcher().send_get(
        &Endpoint::new("http://example.com/items").query("page", "2"),
        recorder,
    );

    let (event, thread) = next_event(&rx);
    assert!(matches!(event, Event::Success(body) if body == json!({"items": [1, 2]})));
    assert_eq!(thread.as_deref(), Some(HOME));
    assert_quiet(&rx);

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    let requests = transport.requests.lock();
    assert_eq!(requests[0].url().as_str(), "http://example.com/items?page=2");
}

#[test]
fn failure_status_goes_to_on_error_with_decoded_body() {
    let h = harness(ScriptedTransport::new(Script::Respond(404, r#"{"error":"gone"}"#)));
    let (recorder, rx) = Recorder::new();

    h.client
        .dispatcher()
        .send_post_json(&Endpoint::new("http://example.com/x"), None, recorder);

    let (event, thread) = next_event(&rx);
    match event {
        Event::Rejected(body, status) => {
            assert_eq!(body, json!({"error": "gone"}));
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        other => panic!("expected on_error, got {other:?}"),
    }
    assert_eq!(thread.as_deref(), Some(HOME));
    assert_quiet(&rx);
}

#[test]
fn malformed_body_and_transport_errors_go_to_on_failure() {
    for script in [Script::Respond(200, "not json"), Script::Fail] {
        let h = harness(ScriptedTransport::new(script));
        let (recorder, rx) = Recorder::new();

        h.client.dispatcher().send_post_form(
            &Endpoint::new("https://example.com/form"),
            [("name", "value")],
            recorder,
        );

        let (event, thread) = next_event(&rx);
        assert!(matches!(event, Event::Failure(Error::Transport { .. })));
        assert_eq!(thread.as_deref(), Some(HOME));
        assert_quiet(&rx);
    }
}

#[test]
fn invalid_address_fails_synchronously_without_touching_the_pool() {
    let transport = ScriptedTransport::new(Script::Respond(200, "{}"));
    let h = harness(Arc::clone(&transport));
    let (recorder, rx) = Recorder::new();

    h.client
        .dispatcher()
        .send_get(&Endpoint::new(""), Arc::clone(&recorder) as Arc<dyn RequestListener>);

    // Already delivered, on this thread.
    let (event, thread) = rx.try_recv().expect("synchronous on_failure");
    assert!(matches!(event, Event::Failure(Error::InvalidArgument { .. })));
    assert_eq!(thread.as_deref(), thread::current().name());

    h.client
        .dispatcher()
        .send_post_json(&Endpoint::new("not a url"), Some(&json!({})), recorder);
    let (event, _) = rx.try_recv().expect("synchronous on_failure");
    assert!(matches!(event, Event::Failure(Error::InvalidArgument { .. })));

    assert_eq!(h.client.worker_pool().submitted(), 0);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    assert_quiet(&rx);
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnected_gate_never_reaches_the_pool() {
    let transport = ScriptedTransport::new(Script::Respond(200, "{}"));
    let h = harness(Arc::clone(&transport));
    h.flag.set(false);
    assert_eq!(h.client.is_connected(), Ok(false));

    let (recorder, rx) = Recorder::new();
    h.client.dispatcher().send_get(
        &Endpoint::new("http://example.com"),
        Arc::clone(&recorder) as Arc<dyn RequestListener>,
    );
    let (event, thread) = next_event(&rx);
    assert!(matches!(event, Event::Failure(Error::NoConnectivity)));
    assert_eq!(thread.as_deref(), Some(HOME));

    h.client
        .udp()
        .open("127.0.0.1", 9, recorder, true)
        .expect("open is accepted");
    let (event, thread) = next_event(&rx);
    assert!(matches!(event, Event::UdpError(Error::NoConnectivity)));
    assert_eq!(thread.as_deref(), Some(HOME));

    assert_eq!(h.client.worker_pool().submitted(), 0);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    assert_quiet(&rx);
}

#[test]
fn builder_requires_gate_and_home() {
    let (home, _home_loop) = home_context();
    assert!(matches!(
        NetClient::builder().home(home).build(),
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
        NetClient::builder()
            .connectivity(ConnectivityFlag::default())
            .build(),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn replacing_the_pool_routes_new_work_and_retires_the_old_one() {
    let h = harness(ScriptedTransport::new(Script::Respond(200, "{}")));
    let old = h.client.worker_pool();

    h.client.set_worker_pool(WorkerPool::new(1, None).expect("pool"));
    assert!(old.is_shutdown());

    let (recorder, rx) = Recorder::new();
    h.client
        .dispatcher()
        .send_get(&Endpoint::new("http://example.com"), recorder);
    assert!(matches!(next_event(&rx).0, Event::Success(_)));

    assert_eq!(old.submitted(), 0);
    assert_eq!(h.client.worker_pool().submitted(), 1);
}

#[test]
fn builder_rejects_zero_sizes() {
    for config in [
        NetConfig {
            recv_buffer_size: 0,
            ..NetConfig::default()
        },
        NetConfig {
            id_length: 0,
            ..NetConfig::default()
        },
    ] {
        let (home, _home_loop) = home_context();
        assert!(matches!(
            NetClient::builder()
                .config(config)
                .connectivity(ConnectivityFlag::default())
                .home(home)
                .build(),
            Err(Error::InvalidArgument { .. })
        ));
    }
}

#[test]
fn in_flight_request_finishes_after_its_pool_is_replaced() {
    let transport = ScriptedTransport::new(Script::Slow(
        Duration::from_millis(800),
        200,
        r#"{"late":true}"#,
    ));
    let h = harness_with(
        Arc::clone(&transport),
        NetConfig {
            worker_threads: 1,
            ..NetConfig::default()
        },
    );
    let (recorder, rx) = Recorder::new();

    h.client
        .dispatcher()
        .send_get(&Endpoint::new("http://example.com/slow"), recorder);
    while transport.calls.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    h.client.set_worker_pool(WorkerPool::new(1, None).expect("pool"));

    let (event, thread) = next_event(&rx);
    assert!(matches!(event, Event::Success(body) if body == json!({"late": true})));
    assert_eq!(thread.as_deref(), Some(HOME));
    assert_quiet(&rx);
}

#[test]
fn request_dropped_by_an_expired_grace_reports_pool_shutdown() {
    let transport = ScriptedTransport::new(Script::Slow(Duration::from_millis(800), 200, "{}"));
    let h = harness_with(
        Arc::clone(&transport),
        NetConfig {
            worker_threads: 1,
            shutdown_grace: Some(Duration::from_millis(100)),
            ..NetConfig::default()
        },
    );
    let (recorder, rx) = Recorder::new();

    h.client
        .dispatcher()
        .send_get(&Endpoint::new("http://example.com/slow"), recorder);
    while transport.calls.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    h.client.set_worker_pool(WorkerPool::new(1, None).expect("pool"));

    let (event, thread) = next_event(&rx);
    assert!(matches!(event, Event::Failure(Error::PoolShutdown)));
    assert_eq!(thread.as_deref(), Some(HOME));

    // The dropped attempt never reports a late success.
    thread::sleep(Duration::from_millis(1_000));
    assert_quiet(&rx);
}

#[tokio::test(flavor = "multi_thread")]
async fn receive_loop_keeps_running_after_its_pool_is_replaced() {
    let port = echo_peer().await;
    let h = udp_harness();
    let (recorder, rx) = Recorder::new();

    let connection = UdpConnection::connect("127.0.0.1", port)
        .await
        .expect("connect");
    let handle = h
        .client
        .udp()
        .listen(connection.clone(), recorder)
        .expect("listen");
    h.client.set_worker_pool(WorkerPool::new(1, None).expect("pool"));

    connection.send(b"still here").await.expect("send");
    let (event, thread) = next_event(&rx);
    assert!(matches!(event, Event::Receive(packet) if packet.data() == b"still here"));
    assert_eq!(thread.as_deref(), Some(HOME));

    handle.cancel();
    tokio::time::timeout(WAIT, handle.finished())
        .await
        .expect("loop exited");
    assert!(connection.is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn receive_loop_dropped_by_an_expired_grace_closes_and_reports() {
    let port = echo_peer().await;
    let h = harness_with(
        ScriptedTransport::new(Script::Fail),
        NetConfig {
            worker_threads: 1,
            shutdown_grace: Some(Duration::from_millis(100)),
            ..NetConfig::default()
        },
    );
    let (recorder, rx) = Recorder::new();

    let connection = UdpConnection::connect("127.0.0.1", port)
        .await
        .expect("connect");
    let handle = h
        .client
        .udp()
        .listen(connection.clone(), recorder)
        .expect("listen");
    h.client.set_worker_pool(WorkerPool::new(1, None).expect("pool"));

    let (event, thread) = next_event(&rx);
    assert!(matches!(event, Event::UdpError(Error::PoolShutdown)));
    assert_eq!(thread.as_deref(), Some(HOME));

    tokio::time::timeout(WAIT, handle.finished())
        .await
        .expect("loop exited");
    assert!(connection.is_closed());
    assert!(!handle.is_cancelled());
    assert!(h.client.udp().registry().is_empty());
    assert_quiet(&rx);
}

#[test]
fn socket_whose_runtime_stopped_ends_the_loop_with_one_error() {
    let peer = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind peer");
    let port = peer.local_addr().expect("peer addr").port();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .expect("runtime");
    let connection = runtime
        .block_on(UdpConnection::connect("127.0.0.1", port))
        .expect("connect");
    drop(runtime);

    let h = udp_harness();
    let (recorder, rx) = Recorder::new();
    let handle = h
        .client
        .udp()
        .listen(connection.clone(), recorder)
        .expect("listen");

    let (event, thread) = next_event(&rx);
    assert!(
        matches!(event, Event::UdpError(Error::Socket { kind: io::ErrorKind::Other, .. })),
        "got {event:?}"
    );
    assert_eq!(thread.as_deref(), Some(HOME));

    wait_finished(&handle);
    assert!(connection.is_closed());
    assert!(h.client.udp().registry().is_empty());
    assert_quiet(&rx);
}

#[test]
fn open_failure_is_reported_once_through_on_error() {
    let h = udp_harness();
    let (recorder, rx) = Recorder::new();

    h.client
        .udp()
        .open("nonexistent.invalid", 9, recorder, true)
        .expect("open is accepted");

    // Name resolution may take a while to give up.
    let (event, thread) = rx
        .recv_timeout(Duration::from_secs(30))
        .expect("callback was not delivered");
    assert!(matches!(event, Event::UdpError(Error::Socket { .. })), "got {event:?}");
    assert_eq!(thread.as_deref(), Some(HOME));
    assert_quiet(&rx);
    assert!(h.client.udp().registry().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_one_handle_leaves_the_others_running() {
    let port = echo_peer().await;
    let h = udp_harness();
    let (stopped, stopped_rx) = Recorder::new();
    let (running, running_rx) = Recorder::new();

    let first = UdpConnection::connect("127.0.0.1", port)
        .await
        .expect("connect");
    let second = UdpConnection::connect("127.0.0.1", port)
        .await
        .expect("connect");
    let first_handle = h
        .client
        .udp()
        .listen(first.clone(), stopped)
        .expect("listen");
    let second_handle = h
        .client
        .udp()
        .listen(second.clone(), running)
        .expect("listen");

    first_handle.cancel();
    first_handle.cancel();
    tokio::time::timeout(WAIT, first_handle.finished())
        .await
        .expect("loop exited");
    assert!(first_handle.is_cancelled());
    assert!(first.is_closed());
    assert!(!second_handle.is_finished());
    assert_eq!(h.client.udp().registry().len(), 1);

    second.send(b"ping").await.expect("send");
    let (event, _) = next_event(&running_rx);
    assert!(matches!(event, Event::Receive(packet) if packet.data() == b"ping"));
    assert_quiet(&stopped_rx);

    assert_eq!(h.client.udp().halt_all(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn open_with_auto_listen_connects_once_then_receives_in_order() {
    let port = echo_peer().await;
    let h = udp_harness();
    let (recorder, rx) = Recorder::new();

    h.client
        .udp()
        .open("127.0.0.1", port, recorder, true)
        .expect("open");

    let (event, thread) = next_event(&rx);
    let Event::Connect(connection) = event else {
        panic!("expected on_connect, got {event:?}");
    };
    assert_eq!(thread.as_deref(), Some(HOME));
    assert_eq!(connection.peer_addr().port(), port);

    for i in 0..5_u8 {
        connection.send(&[b'p', i]).await.expect("send");
    }

    for i in 0..5_u8 {
        let (event, thread) = next_event(&rx);
        let Event::Receive(packet) = event else {
            panic!("expected on_receive, got {event:?}");
        };
        assert_eq!(packet.data(), [b'p', i]);
        assert_eq!(packet.peer().port(), port);
        assert_eq!(thread.as_deref(), Some(HOME));
    }

    assert_eq!(h.client.udp().registry().len(), 1);
    assert_eq!(h.client.udp().halt_all(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn halt_all_stops_every_loop_and_is_then_a_no_op() {
    let port = echo_peer().await;
    let h = udp_harness();
    let (recorder, rx) = Recorder::new();

    let mut loops = Vec::new();
    for _ in 0..4 {
        let connection = UdpConnection::connect("127.0.0.1", port)
            .await
            .expect("connect");
        let handle = h
            .client
            .udp()
            .listen(connection.clone(), Arc::clone(&recorder) as Arc<dyn UdpListener>)
            .expect("listen");
        loops.push((connection, handle));
    }
    assert_eq!(h.client.udp().registry().len(), 4);

    assert_eq!(h.client.udp().halt_all(), 4);
    for (connection, handle) in &loops {
        tokio::time::timeout(WAIT, handle.finished())
            .await
            .expect("loop exited");
        assert!(handle.is_cancelled());
        assert!(connection.is_closed());
    }

    assert!(h.client.udp().registry().is_empty());
    assert_eq!(h.client.udp().halt_all(), 0);
    assert_quiet(&rx);
}

#[tokio::test(flavor = "multi_thread")]
async fn caller_close_ends_the_loop_silently() {
    let port = echo_peer().await;
    let h = udp_harness();
    let (recorder, rx) = Recorder::new();

    let connection = UdpConnection::connect("127.0.0.1", port)
        .await
        .expect("connect");
    let handle = h
        .client
        .udp()
        .listen(connection.clone(), recorder)
        .expect("listen");

    assert!(connection.close());
    assert!(!connection.close());
    tokio::time::timeout(WAIT, handle.finished())
        .await
        .expect("loop exited");

    assert!(!handle.is_cancelled());
    assert!(h.client.udp().registry().is_empty());
    assert!(matches!(
        connection.send(b"late").await,
        Err(Error::Socket { .. })
    ));
    assert_quiet(&rx);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_udp_arguments_fail_synchronously() {
    let port = echo_peer().await;
    let h = udp_harness();
    let (recorder, rx) = Recorder::new();

    assert!(matches!(
        h.client
            .udp()
            .open("", port, Arc::clone(&recorder) as Arc<dyn UdpListener>, false),
        Err(Error::InvalidArgument { .. })
    ));

    let connection = UdpConnection::connect("127.0.0.1", port)
        .await
        .expect("connect");
    connection.close();
    assert!(matches!(
        h.client.udp().listen(connection, recorder),
        Err(Error::InvalidArgument { .. })
    ));

    assert_eq!(h.client.worker_pool().submitted(), 0);
    assert_quiet(&rx);
}
