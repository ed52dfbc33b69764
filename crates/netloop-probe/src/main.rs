#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use clap::Parser;
use config::{CliArgs, Mode, ProbeConfig};
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use netloop::{
    ConnectivityFlag, Endpoint, Error, HomeLoop, NetClient, NetConfig, Packet, RequestListener,
    StatusCode, UdpConnection, UdpListener, WorkerPool, home_context,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use telemetry::init_telemetry;

// How often the UDP mode pumps the home queue.
const FRAME: Duration = Duration::from_millis(16);

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ProbeConfig::try_from(args)?;

    init_telemetry()?;

    // The main thread is the home context; every listener call lands here.
    let (home, home_loop) = home_context();
    let client = NetClient::builder()
        .config(NetConfig {
            worker_threads: config.num_workers,
            ..NetConfig::default()
        })
        .connectivity(ConnectivityFlag::new(!config.offline))
        .home(home)
        .build()?;

    tracing::info!(
        mode = ?config.mode,
        workers = config.num_workers,
        offline = config.offline,
        "Starting probe"
    );

    match config.mode {
        Mode::Get | Mode::PostJson | Mode::PostForm => run_http(client, home_loop, &config),
        Mode::Udp => run_udp(&client, home_loop, &config),
    }
}

/// Dispatches one request, then drains the home context until the outcome
/// has been delivered.
fn run_http(client: NetClient, home_loop: HomeLoop, config: &ProbeConfig) -> anyhow::Result<()> {
    let endpoint = config
        .query
        .iter()
        .fold(Endpoint::new(config.url.as_str()), |e, (k, v)| e.query(k, v));
    let endpoint = config
        .headers
        .iter()
        .fold(endpoint, |e, (name, value)| e.header(name, value));

    let listener = Arc::new(HttpReport::default());
    let dispatcher = client.dispatcher();
    match config.mode {
        Mode::PostJson => {
            dispatcher.send_post_json(&endpoint, config.body.as_ref(), listener.clone());
        }
        Mode::PostForm => dispatcher.send_post_form(
            &endpoint,
            config.fields.iter().map(|(k, v)| (k, v)),
            listener.clone(),
        ),
        Mode::Get | Mode::Udp => dispatcher.send_get(&endpoint, listener.clone()),
    }

    // The loop ends once the in-flight request has released its callback.
    drop(client);
    home_loop.run();

    match listener.outcome.load(Ordering::SeqCst) {
        OUTCOME_SUCCESS => Ok(()),
        OUTCOME_ERROR => anyhow::bail!("server answered with a failure status"),
        _ => anyhow::bail!("request failed"),
    }
}

/// Opens a connection, sends a few datagrams, and prints replies until the
/// listen window closes.
fn run_udp(client: &NetClient, mut home_loop: HomeLoop, config: &ProbeConfig) -> anyhow::Result<()> {
    let listener = Arc::new(UdpReport {
        pool: client.worker_pool(),
        message: config.message.clone(),
        count: config.count,
        received: AtomicUsize::new(0),
        errors: AtomicUsize::new(0),
    });

    client
        .udp()
        .open(&config.host, config.port, listener.clone(), true)?;

    let deadline = Instant::now() + config.listen_for;
    while Instant::now() < deadline {
        if home_loop.run_until_idle() == 0 {
            std::thread::sleep(FRAME);
        }
    }

    let halted = client.udp().halt_all();
    home_loop.run_until_idle();

    let received = listener.received.load(Ordering::SeqCst);
    tracing::info!(
        halted,
        sent = config.count,
        received,
        errors = listener.errors.load(Ordering::SeqCst),
        "UDP probe finished"
    );

    if received == 0 {
        anyhow::bail!("no reply from {}:{}", config.host, config.port);
    }
    Ok(())
}

const OUTCOME_PENDING: usize = 0;
const OUTCOME_SUCCESS: usize = 1;
const OUTCOME_ERROR: usize = 2;
const OUTCOME_FAILURE: usize = 3;

struct HttpReport {
    outcome: AtomicUsize,
}

impl Default for HttpReport {
    fn default() -> Self {
        Self {
            outcome: AtomicUsize::new(OUTCOME_PENDING),
        }
    }
}

impl RequestListener for HttpReport {
    fn on_success(&self, body: Value) {
        tracing::info!(%body, "Request succeeded");
        self.outcome.store(OUTCOME_SUCCESS, Ordering::SeqCst);
    }

    fn on_error(&self, body: Value, status: StatusCode) {
        tracing::warn!(%status, %body, "Server answered with an error");
        self.outcome.store(OUTCOME_ERROR, Ordering::SeqCst);
    }

    fn on_failure(&self, error: Error) {
        tracing::error!("Request failed: {error}");
        self.outcome.store(OUTCOME_FAILURE, Ordering::SeqCst);
    }
}

struct UdpReport {
    pool: Arc<WorkerPool>,
    message: String,
    count: usize,
    received: AtomicUsize,
    errors: AtomicUsize,
}

impl UdpListener for UdpReport {
    fn on_connect(&self, connection: UdpConnection) {
        tracing::info!(
            local = %connection.local_addr(),
            peer = %connection.peer_addr(),
            "Connected"
        );

        let message = self.message.clone();
        let count = self.count;
        let sending = self.pool.spawn(async move {
            for i in 0..count {
                let payload = format!("{message} {i}");
                if let Err(e) = connection.send(payload.as_bytes()).await {
                    tracing::warn!("Send failed: {e}");
                    break;
                }
            }
        });
        if let Err(e) = sending {
            tracing::error!("Could not schedule sends: {e}");
        }
    }

    fn on_error(&self, error: Error) {
        tracing::warn!("UDP error: {error}");
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_receive(&self, packet: Packet) {
        tracing::info!(
            peer = %packet.peer(),
            bytes = packet.len(),
            payload = %String::from_utf8_lossy(packet.data()),
            "Received"
        );
        self.received.fetch_add(1, Ordering::SeqCst);
    }
}
