//! Console logging for the probe.
//!
//! Events from `netloop` (built with its `tracing` feature) and from the probe
//! itself are printed with thread names, which makes it easy to see that every
//! listener callback runs on the `main` thread while I/O happens on
//! `netloop-worker` threads. Filtering follows `RUST_LOG` and defaults to
//! `info`; try `RUST_LOG=netloop=debug,info`.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_target(true),
        )
        .try_init()?;
    Ok(())
}
