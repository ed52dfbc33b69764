use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use serde_json::Value;

/// What the probe exercises.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// GET `--url` with `--query` arguments.
    Get,
    /// POST `--body` as JSON to `--url`.
    PostJson,
    /// POST `--field` pairs form-encoded to `--url`.
    PostForm,
    /// Open a UDP connection to `--host:--port`, send `--count` datagrams and
    /// print the replies.
    Udp,
}

/// Command line of the `netloop-probe` binary.
///
/// Every option can also be set through the environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "netloop-probe",
    version,
    about = "Drive netloop against a live HTTP endpoint or UDP echo peer"
)]
pub struct CliArgs {
    /// Operation to run.
    ///
    /// Environment variable: `PROBE_MODE`
    #[arg(long, env = "PROBE_MODE", value_enum, default_value_t = Mode::Get)]
    pub mode: Mode,

    /// Target of the HTTP modes.
    ///
    /// Environment variable: `PROBE_URL`
    #[arg(long, env = "PROBE_URL", default_value_t = String::from("https://httpbin.org/get"))]
    pub url: String,

    /// Query argument appended to the URL, as `key=value`. Repeatable.
    #[arg(long = "query", value_name = "KEY=VALUE")]
    pub query: Vec<String>,

    /// Extra request header, as `name=value`. Repeatable.
    #[arg(long = "header", value_name = "NAME=VALUE")]
    pub headers: Vec<String>,

    /// Form field of `post-form`, as `key=value`. Repeatable.
    #[arg(long = "field", value_name = "KEY=VALUE")]
    pub fields: Vec<String>,

    /// JSON document sent by `post-json`. Omitted means `{}`.
    #[arg(long)]
    pub body: Option<String>,

    /// UDP peer host.
    ///
    /// Environment variable: `PROBE_HOST`
    #[arg(long, env = "PROBE_HOST", default_value_t = String::from("127.0.0.1"))]
    pub host: String,

    /// UDP peer port.
    ///
    /// Environment variable: `PROBE_PORT`
    #[arg(long, env = "PROBE_PORT", default_value_t = 7)]
    pub port: u16,

    /// Payload prefix of each datagram.
    #[arg(long, default_value_t = String::from("ping"))]
    pub message: String,

    /// Number of datagrams to send.
    #[arg(long, default_value_t = 3)]
    pub count: usize,

    /// How long to listen for replies before halting the receive loop.
    ///
    /// Environment variable: `PROBE_LISTEN_MS`
    #[arg(long, env = "PROBE_LISTEN_MS", default_value_t = 2_000)]
    pub listen_ms: u64,

    /// Threads in the worker pool.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 2)]
    pub num_workers: usize,

    /// Pretend the network is down, to watch the no-connectivity path.
    #[arg(long, default_value_t = false)]
    pub offline: bool,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub mode: Mode,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub fields: Vec<(String, String)>,
    pub body: Option<Value>,
    pub host: String,
    pub port: u16,
    pub message: String,
    pub count: usize,
    pub listen_for: Duration,
    pub num_workers: usize,
    pub offline: bool,
}

impl TryFrom<CliArgs> for ProbeConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.mode == Mode::Udp {
            if args.host.trim().is_empty() {
                bail!("PROBE_HOST cannot be empty in udp mode");
            }
            if args.count == 0 {
                bail!("--count must be greater than 0");
            }
        }

        let body = args
            .body
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("--body is not valid JSON")?;

        Ok(Self {
            mode: args.mode,
            url: args.url,
            query: parse_pairs(&args.query, "--query")?,
            headers: parse_pairs(&args.headers, "--header")?,
            fields: parse_pairs(&args.fields, "--field")?,
            body,
            host: args.host,
            port: args.port,
            message: args.message,
            count: args.count,
            listen_for: Duration::from_millis(args.listen_ms),
            num_workers: args.num_workers,
            offline: args.offline,
        })
    }
}

fn parse_pairs(raw: &[String], flag: &str) -> anyhow::Result<Vec<(String, String)>> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("{flag} expects KEY=VALUE, got '{pair}'"),
        })
        .collect()
}
