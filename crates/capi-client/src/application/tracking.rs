//! Tracking use case: a fixed-rate polling loop that turns the device's
//! request/reply tracking commands into a stream of samples.
//!
//! ```text
//!            ┌──────────── every tick ────────────┐
//! TSTART ──► │ TX / BX / BX2 request ── decode ── │ ──► mpsc samples
//!            └──────── shutdown flag set? ────────┘
//!                            │
//!                          TSTOP
//! ```
//!
//! The device has no push mode in this client; each sample is one command
//! turnaround. A tick that fails with a device or protocol error is logged
//! and skipped, because a single garbled reply does not invalidate the
//! session. A transport error does, and ends the loop.
//!
//! BX2 replies only carry tools the device saw, so the loop keeps a cache
//! of the last record per handle and re-emits absent tools with
//! `data_is_new` false. Consumers always see the full tool roster.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use capi_core::protocol::reply::revision_supports_gbf;
use capi_core::protocol::tx::{self, TxPose};
use capi_core::protocol::ProtocolError;
use capi_core::ToolData;

use crate::application::combined_api::{CapiError, CombinedApi};
use crate::infrastructure::config::{ConfigError, TrackingConfig, TrackingFormat};

/// Everything one polling run needs beyond the engine itself.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Wire format to poll with. `Auto` is resolved against the firmware
    /// revision when the loop starts.
    pub format: TrackingFormat,
    /// Time between polls.
    pub interval: Duration,
    /// Reply option bits for `TX` and `BX`.
    pub bx_options: u16,
    /// Option string for `BX2`.
    pub bx2_options: String,
    /// Enabled handles, needed to pull poses out of `TX` text replies.
    pub handles: Vec<String>,
}

impl PollSettings {
    /// Resolves settings from configuration plus the handles bring-up
    /// enabled.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] when the format field does not name a
    /// supported value.
    pub fn from_config(config: &TrackingConfig, handles: Vec<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            format: config.format()?,
            interval: config.poll_interval(),
            bx_options: config.bx_options,
            bx2_options: config.bx2_options.clone(),
            handles,
        })
    }
}

/// Probes the firmware revision and picks the newer BX2 format when the
/// device serves it, else BX.
pub async fn resolve_format(api: &mut CombinedApi) -> Result<TrackingFormat, CapiError> {
    let revision = api.api_revision().await?;
    let format = if revision_supports_gbf(&revision) {
        TrackingFormat::Bx2
    } else {
        TrackingFormat::Bx
    };
    info!(%revision, ?format, "selected tracking format");
    Ok(format)
}

/// Starts tracking, polls at the configured rate until `shutdown` is set,
/// then stops tracking.
///
/// Samples go out over `samples`; a dropped receiver counts as a shutdown
/// request. The engine is handed back so the caller can keep using the
/// session, together with how the run ended. Device and protocol errors
/// skip the tick; transport errors end the run without attempting `TSTOP`,
/// since the link they would travel over is gone.
pub async fn poll_loop(
    mut api: CombinedApi,
    settings: PollSettings,
    samples: mpsc::Sender<Vec<ToolData>>,
    shutdown: Arc<AtomicBool>,
) -> (CombinedApi, Result<(), CapiError>) {
    let format = match settings.format {
        TrackingFormat::Auto => match resolve_format(&mut api).await {
            Ok(format) => format,
            Err(error) => return (api, Err(error)),
        },
        format => format,
    };

    if let Err(error) = api.start_tracking().await {
        return (api, Err(error));
    }
    info!(?format, interval = ?settings.interval, "tracking started");

    let mut cache = BTreeMap::new();
    let mut interval = time::interval(settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested; stopping tracking");
            break;
        }
        match poll_once(&mut api, format, &settings, &mut cache).await {
            Ok(sample) => {
                if samples.send(sample).await.is_err() {
                    info!("sample receiver dropped; stopping tracking");
                    break;
                }
            }
            Err(CapiError::Transport(error)) => {
                error!(%error, "transport failed; tracking ends");
                return (api, Err(error.into()));
            }
            Err(error) => {
                warn!(%error, "tracking poll failed; tick skipped");
            }
        }
    }

    let outcome = api.stop_tracking().await;
    (api, outcome)
}

/// One command turnaround in the selected format.
async fn poll_once(
    api: &mut CombinedApi,
    format: TrackingFormat,
    settings: &PollSettings,
    cache: &mut BTreeMap<u16, ToolData>,
) -> Result<Vec<ToolData>, CapiError> {
    match format {
        TrackingFormat::Tx => {
            let reply = api.tracking_data_tx(settings.bx_options).await?;
            Ok(tx_sample(&reply, &settings.handles)?)
        }
        TrackingFormat::Bx => api.tracking_data_bx(settings.bx_options).await,
        TrackingFormat::Bx2 | TrackingFormat::Auto => {
            let fresh = api.tracking_data_bx2(&settings.bx2_options).await?;
            Ok(merge_stale(cache, fresh))
        }
    }
}

/// Pulls one [`ToolData`] per known handle out of a text reply. Handles the
/// reply does not mention are left out entirely; `MISSING` tools keep their
/// sentinel pose.
fn tx_sample(reply: &str, handles: &[String]) -> Result<Vec<ToolData>, ProtocolError> {
    let mut tools = Vec::with_capacity(handles.len());
    for handle in handles {
        match tx::extract_pose(reply, handle)? {
            TxPose::Absent => debug!(handle, "handle absent from text reply"),
            TxPose::Missing => {
                // A fresh snapshot for the handle is already marked missing.
                let number = u16::from_str_radix(handle, 16)
                    .map_err(|_| ProtocolError::InvalidHex(handle.clone()))?;
                let mut tool = ToolData::for_handle(number);
                tool.data_is_new = true;
                tools.push(tool);
            }
            TxPose::Pose(transform) => {
                let mut tool = ToolData::for_handle(transform.tool_handle);
                tool.transform = transform;
                tool.data_is_new = true;
                tools.push(tool);
            }
        }
    }
    Ok(tools)
}

/// Folds a fresh BX2 sample into the cache and returns the full roster,
/// with tools absent from this sample re-emitted as stale.
fn merge_stale(cache: &mut BTreeMap<u16, ToolData>, fresh: Vec<ToolData>) -> Vec<ToolData> {
    let seen: Vec<u16> = fresh.iter().map(ToolData::tool_handle).collect();
    for tool in fresh {
        cache.insert(tool.tool_handle(), tool);
    }
    for (handle, tool) in cache.iter_mut() {
        if !seen.contains(handle) {
            tool.data_is_new = false;
        }
    }
    cache.values().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use capi_core::protocol::crc::crc16;
    use capi_core::protocol::{bx, command};
    use capi_core::SessionState;

    use crate::infrastructure::transport::mock::MockTransport;
    use crate::infrastructure::transport::TransportError;

    fn bx_envelope(payload: &[u8]) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(&bx::START_SEQUENCE.to_le_bytes());
        header.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        let mut frame = header.clone();
        frame.extend_from_slice(&crc16(&header).to_le_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&crc16(payload).to_le_bytes());
        frame
    }

    fn one_tool_payload(handle: u8, frame_number: u32) -> Vec<u8> {
        let mut payload = vec![0x01, handle, 0x01];
        for value in [1.0f32, 0.0, 0.0, 0.0, 10.0, 20.0, 30.0, 0.1] {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        payload.extend_from_slice(&0x0000_0031u32.to_le_bytes());
        payload.extend_from_slice(&frame_number.to_le_bytes());
        payload.extend_from_slice(&0x0000u16.to_le_bytes());
        payload
    }

    /// Replies for the walk to `PortsEnabled`, queued first because the
    /// script is consumed in order.
    fn queue_bring_up(mock: &MockTransport) {
        mock.queue_reply("OKAY"); // INIT
        mock.queue_reply("010A"); // PHSR
        mock.queue_reply("OKAY"); // PINIT
        mock.queue_reply("OKAY"); // PENA
    }

    /// Walks a scripted engine to the `PortsEnabled` state.
    async fn enabled_engine(mock: MockTransport) -> CombinedApi {
        let mut api = CombinedApi::new(Box::new(mock));
        api.connect().await.expect("connect");
        api.initialize().await.expect("init");
        api.port_handle_search(capi_core::SearchFilter::NotInit)
            .await
            .expect("search");
        api.port_handle_initialize("0A").await.expect("pinit");
        api.port_handle_enable("0A", capi_core::TrackingPriority::Dynamic)
            .await
            .expect("pena");
        api
    }

    fn bx_settings(interval: Duration) -> PollSettings {
        PollSettings {
            format: TrackingFormat::Bx,
            interval,
            bx_options: command::reply_option::DEFAULT,
            bx2_options: command::DEFAULT_BX2_OPTIONS.to_string(),
            handles: vec!["0A".to_string()],
        }
    }

    #[tokio::test]
    async fn test_resolve_format_probes_firmware_revision() {
        // Arrange: a revision in the family that serves GBF.
        let mock = MockTransport::new();
        mock.queue_reply("G.003.001");
        let mut api = CombinedApi::new(Box::new(mock));
        api.connect().await.expect("connect");

        // Act / Assert
        assert_eq!(resolve_format(&mut api).await.expect("resolve"), TrackingFormat::Bx2);

        // An older revision falls back to BX.
        let mock = MockTransport::new();
        mock.queue_reply("D.001.003");
        let mut api = CombinedApi::new(Box::new(mock));
        api.connect().await.expect("connect");
        assert_eq!(resolve_format(&mut api).await.expect("resolve"), TrackingFormat::Bx);
    }

    #[tokio::test]
    async fn test_poll_loop_brackets_run_with_tstart_and_tstop() {
        // Arrange: shutdown is already requested, so the loop starts and
        // stops without polling once.
        let mock = MockTransport::new();
        let written = mock.written_handle();
        queue_bring_up(&mock);
        mock.queue_reply("OKAY"); // TSTART
        mock.queue_reply("OKAY"); // TSTOP
        let api = enabled_engine(mock).await;
        let shutdown = Arc::new(AtomicBool::new(true));
        let (sender, mut receiver) = mpsc::channel(8);

        // Act
        let (api, outcome) = poll_loop(
            api,
            bx_settings(Duration::from_millis(1)),
            sender,
            shutdown,
        )
        .await;

        // Assert
        outcome.expect("clean shutdown");
        assert_eq!(api.state(), SessionState::PortsEnabled);
        assert!(receiver.recv().await.is_none());
        let frames = written.lock().expect("lock");
        let count = frames.len();
        assert_eq!(frames[count - 2], b"TSTART:5423\r".to_vec());
        assert_eq!(frames[count - 1], b"TSTOP:2C14\r".to_vec());
    }

    #[tokio::test]
    async fn test_poll_loop_forwards_samples_until_transport_dies() {
        // Arrange: one scripted sample; the next read runs off the script
        // and times out like a dead link.
        let mock = MockTransport::new();
        queue_bring_up(&mock);
        mock.queue_reply("OKAY"); // TSTART
        mock.queue_bytes(&bx_envelope(&one_tool_payload(0x0A, 42)));
        let api = enabled_engine(mock).await;
        let shutdown = Arc::new(AtomicBool::new(false));
        let (sender, mut receiver) = mpsc::channel(8);

        // Act
        let (_api, outcome) = poll_loop(
            api,
            bx_settings(Duration::from_millis(1)),
            sender,
            shutdown,
        )
        .await;

        // Assert
        let sample = receiver.recv().await.expect("one sample");
        assert_eq!(sample.len(), 1);
        assert_eq!(sample[0].frame_number, 42);
        match outcome {
            Err(CapiError::Transport(TransportError::TimedOut { .. })) => {}
            other => panic!("expected transport timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_device_error_skips_tick_without_ending_session() {
        // Arrange: the first poll is refused, the second delivers.
        let mock = MockTransport::new();
        queue_bring_up(&mock);
        mock.queue_reply("OKAY"); // TSTART
        mock.queue_reply("ERROR0C"); // first poll refused
        mock.queue_bytes(&bx_envelope(&one_tool_payload(0x0A, 7)));
        let mut api = enabled_engine(mock).await;
        api.start_tracking().await.expect("tstart");
        let settings = bx_settings(Duration::from_millis(1));
        let mut cache = BTreeMap::new();

        // Act
        let refused = poll_once(&mut api, TrackingFormat::Bx, &settings, &mut cache).await;
        let sample = poll_once(&mut api, TrackingFormat::Bx, &settings, &mut cache)
            .await
            .expect("second poll");

        // Assert: the refusal left the session in tracking mode.
        assert!(matches!(refused, Err(CapiError::Device(_))));
        assert_eq!(sample[0].frame_number, 7);
        assert_eq!(api.state(), SessionState::Tracking);
    }

    #[test]
    fn test_merge_stale_re_emits_absent_tools() {
        // Arrange
        let mut cache = BTreeMap::new();
        let fresh = |handle: u16, frame: u32| {
            let mut tool = ToolData::for_handle(handle);
            tool.frame_number = frame;
            tool.data_is_new = true;
            tool
        };

        // Act: both tools report, then only one.
        let first = merge_stale(&mut cache, vec![fresh(0x0A, 1), fresh(0x0B, 1)]);
        let second = merge_stale(&mut cache, vec![fresh(0x0A, 2)]);

        // Assert
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|tool| tool.data_is_new));
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].tool_handle(), 0x0A);
        assert!(second[0].data_is_new);
        assert_eq!(second[0].frame_number, 2);
        assert!(!second[1].data_is_new);
        assert_eq!(second[1].frame_number, 1);
    }

    #[test]
    fn test_tx_sample_extracts_present_and_missing_tools() {
        // Arrange: one posed tool, one missing, trailing status text.
        let reply = "020A+10000+00000+00000+00000+010025-005050+12000000000031000003E8\n0BMISSING\n0000";
        let handles = vec!["0A".to_string(), "0B".to_string()];

        // Act
        let tools = tx_sample(reply, &handles).expect("extract");

        // Assert
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].tool_handle(), 0x0A);
        assert!((tools[0].transform.tx - 100.25).abs() < 1e-9);
        assert!((tools[0].transform.tz - 1200.0).abs() < 1e-9);
        assert!(!tools[0].transform.is_missing());
        assert_eq!(tools[1].tool_handle(), 0x0B);
        assert!(tools[1].transform.is_missing());
        assert!(tools[1].data_is_new);
    }
}
