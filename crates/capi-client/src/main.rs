//! Tracking client demo entry point.
//!
//! Wires together configuration, a transport, the Combined API engine, and
//! the polling loop, then prints every sample until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_or_default()        -- capi-client.toml, argv[1] overrides target
//!  └─ for_target()             -- serial or TCP transport
//!  └─ CombinedApi::connect()
//!  └─ setup::bring_up()        -- INIT, free stale, upload .rom, enable
//!  └─ tracking::poll_loop()    -- spawned; samples over an mpsc channel
//!       └─ print loop          -- one CSV line per tool per frame
//! ```
//!
//! Output format, one line per tool per sample:
//!
//! ```text
//! frame,handle,q0,qx,qy,qz,tx,ty,tz,error,freshness
//! ```
//!
//! with `MISSING` in place of the pose when the tool is out of volume.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use capi_client::application::combined_api::CombinedApi;
use capi_client::application::setup::{bring_up, BringUpPlan};
use capi_client::application::tracking::{poll_loop, PollSettings};
use capi_client::infrastructure::config::{load_or_default, CONFIG_FILE};
use capi_client::infrastructure::transport::for_target;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = CombinedApi::version(), "tracking client starting");

    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = load_or_default(Path::new(CONFIG_FILE))?;
    if let Some(target) = std::env::args().nth(1) {
        config.device.target = target;
    }
    let plan = BringUpPlan::from_config(&config)?;

    // ── Connect and bring up ──────────────────────────────────────────────────
    let transport = for_target(&config.device.target, config.device.read_timeout());
    let mut api = CombinedApi::new(transport);
    api.connect().await?;
    info!(device = %api.device_name(), "device attached");

    let enabled = bring_up(&mut api, &plan).await?;
    for tool in &enabled {
        info!(tool = %tool, "enabled");
    }
    if enabled.is_empty() {
        api.disconnect().await?;
        return Ok(());
    }

    let handles = enabled
        .iter()
        .map(|tool| tool.port_handle().to_string())
        .collect();
    let settings = PollSettings::from_config(&config.tracking, handles)?;

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            flag.store(true, Ordering::Relaxed);
        }
    });

    // ── Poll and print ────────────────────────────────────────────────────────
    let (sender, mut receiver) = mpsc::channel(32);
    let poller = tokio::spawn(poll_loop(api, settings, sender, Arc::clone(&shutdown)));

    while let Some(sample) = receiver.recv().await {
        for tool in &sample {
            println!(
                "{},{:02X},{},{}",
                tool.frame_number,
                tool.tool_handle(),
                tool.transform,
                if tool.data_is_new { "fresh" } else { "stale" }
            );
        }
    }

    let (mut api, outcome) = poller.await?;
    if let Err(error) = outcome {
        warn!(%error, "tracking ended early");
    }
    api.disconnect().await?;
    info!("tracking client stopped");
    Ok(())
}
