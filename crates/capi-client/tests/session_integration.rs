//! Integration tests for the full Combined API session lifecycle.
//!
//! # Purpose
//!
//! These tests drive the engine and the use cases through their *public*
//! API against a scripted transport, the way `main.rs` drives a live
//! device. They verify:
//!
//! - The happy path: bring-up, tracking, stop, reset, disconnect, with the
//!   exact command sequence on the wire and the session state at every
//!   checkpoint.
//! - The polling loop end to end in the newer binary format, including the
//!   stale-roster merge across frames.
//! - The ordering guard: an illegal command is rejected locally and never
//!   reaches the wire.
//!
//! # What is the session lifecycle?
//!
//! The device is strict about command order, so the client tracks where the
//! session stands and refuses anything the device would reject:
//!
//! ```text
//! Disconnected ─► Connected ─► Initialized ─► PortsSearched ─► PortsEnabled
//!                     ▲                                             │
//!                     │ serial break                         TSTART │ TSTOP
//!                     └─────────────────────── Tracking ◄───────────┘
//! ```
//!
//! Replies are scripted byte-for-byte, checksum included, because the
//! engine verifies every frame before acting on it.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use capi_client::application::combined_api::{CapiError, CombinedApi};
use capi_client::application::setup::{bring_up, BringUpPlan};
use capi_client::application::tracking::{poll_loop, PollSettings};
use capi_client::infrastructure::config::TrackingFormat;
use capi_client::infrastructure::transport::{MockTransport, TransportError};
use capi_core::protocol::command::{self, CommSettings};
use capi_core::protocol::crc::crc16;
use capi_core::protocol::{bx, gbf};
use capi_core::{Operation, SearchFilter, SessionState, TrackingPriority};

// ── Fixture builders ──────────────────────────────────────────────────────────

/// Decodes recorded frames back into command text, checksum and terminator
/// stripped.
fn commands(written: &Arc<Mutex<Vec<Vec<u8>>>>) -> Vec<String> {
    written
        .lock()
        .expect("lock")
        .iter()
        .map(|frame| {
            let text = String::from_utf8_lossy(frame);
            let text = text.strip_suffix('\r').unwrap_or(&text);
            text[..text.len().saturating_sub(4)].to_string()
        })
        .collect()
}

/// Wraps a payload in the binary envelope: start sequence, length, header
/// CRC, payload, data CRC.
fn bx_envelope(payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(bx::ENVELOPE_HEADER_BYTES + payload.len() + 2);
    bytes.extend_from_slice(&bx::START_SEQUENCE.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&crc16(&bytes[0..4]).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&crc16(payload).to_le_bytes());
    bytes
}

/// BX payload with one valid tool.
fn bx_payload(handle: u8, frame_number: u32) -> Vec<u8> {
    let mut payload = vec![0x01, handle, 0x01];
    for value in [1.0f32, 0.0, 0.0, 0.0, 100.25, -50.5, 1200.0, 0.125] {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    payload.extend_from_slice(&0x0000_0031u32.to_le_bytes()); // port status
    payload.extend_from_slice(&frame_number.to_le_bytes());
    payload.extend_from_slice(&0x0000u16.to_le_bytes()); // system status
    payload
}

fn gbf_component(component_type: u16, item_count: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&component_type.to_le_bytes());
    bytes.extend_from_slice(&((gbf::COMPONENT_HEADER_BYTES + payload.len()) as u32).to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&item_count.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn gbf_container(components: &[Vec<u8>]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&(components.len() as u16).to_le_bytes());
    for component in components {
        bytes.extend_from_slice(component);
    }
    bytes
}

fn gbf_pose_item(handle: u16, status: u16, values: [f32; 8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&handle.to_le_bytes());
    bytes.extend_from_slice(&status.to_le_bytes());
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// BX2 payload: one frame component whose item nests a container of poses.
fn bx2_payload(frame_number: u32, poses: &[Vec<u8>]) -> Vec<u8> {
    let mut pose_items = Vec::new();
    for pose in poses {
        pose_items.extend_from_slice(pose);
    }
    let inner = gbf_container(&[gbf_component(0x0002, poses.len() as u32, &pose_items)]);

    let mut frame_item = Vec::new();
    frame_item.push(0x07); // magnetic frame
    frame_item.push(0x00);
    frame_item.extend_from_slice(&0u16.to_le_bytes());
    frame_item.extend_from_slice(&frame_number.to_le_bytes());
    frame_item.extend_from_slice(&1_000u32.to_le_bytes());
    frame_item.extend_from_slice(&500u32.to_le_bytes());
    frame_item.extend_from_slice(&inner);

    gbf_container(&[gbf_component(0x0001, 1, &frame_item)])
}

/// A `PHINF` reply body: tool type (8), tool id (12), revision (3), serial
/// number (8), status (2 hex).
fn info_body(serial: &str) -> String {
    format!("08000000NDI-AURORA  001{serial:>8}31")
}

fn plain_plan() -> BringUpPlan {
    BringUpPlan {
        comm_settings: None,
        srom_files: Vec::new(),
        priority: TrackingPriority::Dynamic,
    }
}

// ── Lifecycle tests ───────────────────────────────────────────────────────────

/// Tests the complete happy path: connect, bring-up, one tracked frame,
/// stop, hard reset over a serial break, disconnect.
///
/// The script is consumed strictly in order, so the assertion on the wire
/// commands also proves nothing was sent out of turn.
#[tokio::test]
async fn test_full_session_lifecycle() {
    // Arrange: script every reply the device would give.
    let mock = MockTransport::new();
    let written = mock.written_handle();
    let breaks = mock.breaks_handle();
    let reconfigurations = mock.reconfigurations_handle();
    mock.queue_reply("OKAY"); // INIT
    mock.queue_reply("00"); // PHSR 01: nothing stale
    mock.queue_reply("010A"); // PHSR 02: one tool
    mock.queue_reply("OKAY"); // PINIT
    mock.queue_reply("OKAY"); // PENA
    mock.queue_reply("010A"); // PHSR 04
    mock.queue_reply(&info_body("00001234")); // PHINF
    mock.queue_reply("OKAY"); // TSTART
    mock.queue_bytes(&bx_envelope(&bx_payload(0x0A, 1234))); // BX
    mock.queue_reply("OKAY"); // TSTOP
    mock.queue_reply("RESET"); // serial break banner
    let mut api = CombinedApi::new(Box::new(mock));

    // Act / Assert: walk the whole session.
    api.connect().await.expect("connect");
    assert_eq!(api.state(), SessionState::Connected);

    let enabled = bring_up(&mut api, &plain_plan()).await.expect("bring up");
    assert_eq!(api.state(), SessionState::PortsEnabled);
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].port_handle(), "0A");
    assert_eq!(enabled[0].serial_number(), "00001234");

    api.start_tracking().await.expect("tstart");
    assert_eq!(api.state(), SessionState::Tracking);

    let tools = api
        .tracking_data_bx(command::reply_option::DEFAULT)
        .await
        .expect("bx");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].frame_number, 1234);
    assert!((tools[0].transform.tx - 100.25).abs() < 1e-6);

    api.stop_tracking().await.expect("tstop");
    assert_eq!(api.state(), SessionState::PortsEnabled);

    api.serial_break_reset().await.expect("reset");
    assert_eq!(api.state(), SessionState::Connected);
    assert_eq!(*breaks.lock().expect("lock"), 1);
    assert_eq!(
        *reconfigurations.lock().expect("lock"),
        vec![CommSettings::default()]
    );

    api.disconnect().await.expect("disconnect");
    assert_eq!(api.state(), SessionState::Disconnected);

    // The wire saw exactly the lifecycle, in order.
    assert_eq!(
        commands(&written),
        vec![
            "INIT:", "PHSR:01", "PHSR:02", "PINIT:0A", "PENA:0AD", "PHSR:04", "PHINF:0A",
            "TSTART:", "BX:0801", "TSTOP:",
        ]
    );
}

/// Tests the polling loop end to end in the BX2 format: two scripted
/// frames, the second missing one tool, then a dead link.
///
/// The second sample must still carry the full roster, with the absent
/// tool re-emitted from cache and flagged stale.
#[tokio::test]
async fn test_poll_loop_merges_bx2_roster_across_frames() {
    // Arrange
    let mock = MockTransport::new();
    mock.queue_reply("OKAY"); // INIT
    mock.queue_reply("020A0B"); // PHSR 02
    mock.queue_reply("OKAY"); // PINIT 0A
    mock.queue_reply("OKAY"); // PENA 0A
    mock.queue_reply("OKAY"); // PINIT 0B
    mock.queue_reply("OKAY"); // PENA 0B
    mock.queue_reply("OKAY"); // TSTART
    let both = bx2_payload(
        1,
        &[
            gbf_pose_item(0x000A, 0x0000, [1.0, 0.0, 0.0, 0.0, 10.0, 20.0, 30.0, 0.1]),
            gbf_pose_item(0x000B, 0x0000, [1.0, 0.0, 0.0, 0.0, 40.0, 50.0, 60.0, 0.2]),
        ],
    );
    let only_first = bx2_payload(
        2,
        &[gbf_pose_item(
            0x000A,
            0x0000,
            [1.0, 0.0, 0.0, 0.0, 11.0, 21.0, 31.0, 0.1],
        )],
    );
    mock.queue_bytes(&bx_envelope(&both));
    mock.queue_bytes(&bx_envelope(&only_first));

    let mut api = CombinedApi::new(Box::new(mock));
    api.connect().await.expect("connect");
    api.initialize().await.expect("init");
    let found = api
        .port_handle_search(SearchFilter::NotInit)
        .await
        .expect("search");
    for info in &found {
        api.port_handle_initialize(info.port_handle()).await.expect("pinit");
        api.port_handle_enable(info.port_handle(), TrackingPriority::Dynamic)
            .await
            .expect("pena");
    }

    let settings = PollSettings {
        format: TrackingFormat::Bx2,
        interval: Duration::from_millis(1),
        bx_options: command::reply_option::DEFAULT,
        bx2_options: command::DEFAULT_BX2_OPTIONS.to_string(),
        handles: found.iter().map(|info| info.port_handle().to_string()).collect(),
    };
    let shutdown = Arc::new(AtomicBool::new(false));
    let (sender, mut receiver) = mpsc::channel(8);

    // Act
    let (_api, outcome) = poll_loop(api, settings, sender, shutdown).await;

    // Assert: first sample has both tools fresh.
    let first = receiver.recv().await.expect("first sample");
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|tool| tool.data_is_new));
    assert_eq!(first[0].frame_number, 1);

    // Second sample keeps the roster: 0A fresh, 0B stale from cache.
    let second = receiver.recv().await.expect("second sample");
    assert_eq!(second.len(), 2);
    assert_eq!(second[0].tool_handle(), 0x0A);
    assert!(second[0].data_is_new);
    assert_eq!(second[0].frame_number, 2);
    assert_eq!(second[1].tool_handle(), 0x0B);
    assert!(!second[1].data_is_new);
    assert_eq!(second[1].frame_number, 1);

    // The run ended because the link died, not cleanly.
    match outcome {
        Err(CapiError::Transport(TransportError::TimedOut { .. })) => {}
        other => panic!("expected transport timeout, got {other:?}"),
    }
}

/// Tests that out-of-order commands are rejected locally: the state guard
/// fires before anything reaches the transport.
#[tokio::test]
async fn test_out_of_order_commands_never_reach_the_wire() {
    // Arrange
    let mock = MockTransport::new();
    let written = mock.written_handle();
    mock.queue_reply("OKAY"); // INIT
    let mut api = CombinedApi::new(Box::new(mock));

    // Act / Assert: searching before connecting is refused.
    let early = api.port_handle_search(SearchFilter::All).await;
    assert!(matches!(
        early,
        Err(CapiError::OutOfOrder {
            operation: Operation::PortHandleSearch,
            state: SessionState::Disconnected,
        })
    ));

    // Tracking data before tracking started is refused too.
    api.connect().await.expect("connect");
    api.initialize().await.expect("init");
    let too_soon = api.tracking_data_bx(command::reply_option::DEFAULT).await;
    assert!(matches!(
        too_soon,
        Err(CapiError::OutOfOrder {
            operation: Operation::TrackingData,
            state: SessionState::Initialized,
        })
    ));

    // Only the one legal command ever hit the wire.
    assert_eq!(commands(&written), vec!["INIT:"]);
}
