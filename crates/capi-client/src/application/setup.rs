//! Bring-up use case: walks a freshly connected device to the point where
//! tracking can start.
//!
//! ```text
//! INIT ─► [COMM] ─► free stale handles ─► upload tool definitions
//!                   (PHSR 01 → PHF)       (PHRQ + PVWR)
//!                                               │
//!     PHINF each ◄── PENA each ◄── PINIT each ◄─┘ (PHSR 02)
//! ```
//!
//! The stage order follows the device manual: stale handles must be freed
//! before new ones are requested, and an occupied handle must be initialized
//! before it can be enabled. Handles that already carry a tool (wired ports,
//! auto-detected wireless tools) surface in the same `PHSR` search as the
//! definitions uploaded here, so one pass enables everything.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use capi_core::protocol::command::CommSettings;
use capi_core::{PortHandleInfo, PortHandleRequest, SearchFilter, TrackingPriority};

use crate::application::combined_api::{CapiError, CombinedApi};
use crate::infrastructure::config::{AppConfig, ConfigError};
use crate::infrastructure::transport::is_serial_target;

/// Everything the bring-up sequence needs, resolved from configuration
/// up front so validation failures surface before any command is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct BringUpPlan {
    /// Serial parameters to negotiate with `COMM`, when they differ from
    /// the power-up defaults. Always `None` for network targets.
    pub comm_settings: Option<CommSettings>,
    /// Tool definition files to upload before the search.
    pub srom_files: Vec<PathBuf>,
    /// Priority assigned to every enabled handle.
    pub priority: TrackingPriority,
}

impl BringUpPlan {
    /// Resolves a plan from the loaded configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] when the serial or priority fields do
    /// not name a supported value.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let settings = config.serial.comm_settings()?;
        let comm_settings = (is_serial_target(&config.device.target)
            && settings != CommSettings::default())
        .then_some(settings);
        Ok(Self {
            comm_settings,
            srom_files: config.tracking.srom_files.iter().map(PathBuf::from).collect(),
            priority: config.tracking.priority()?,
        })
    }
}

/// Runs the full bring-up sequence and returns the enabled tools, enriched
/// with their `PHINF` details.
///
/// An empty result is not an error: a system with no tools attached and no
/// definitions configured simply has nothing to enable, and the session
/// stays short of the state tracking requires.
pub async fn bring_up(
    api: &mut CombinedApi,
    plan: &BringUpPlan,
) -> Result<Vec<PortHandleInfo>, CapiError> {
    api.initialize().await?;

    if let Some(settings) = &plan.comm_settings {
        info!(digits = %settings.command_digits(), "negotiating serial parameters");
        api.set_comm_params(settings).await?;
    }

    free_stale_handles(api).await?;

    for path in &plan.srom_files {
        let handle = api.port_handle_request(&PortHandleRequest::default()).await?;
        api.load_tool_definition(&handle, path).await?;
    }

    let found = api.port_handle_search(SearchFilter::NotInit).await?;
    for info in &found {
        api.port_handle_initialize(info.port_handle()).await?;
        api.port_handle_enable(info.port_handle(), plan.priority).await?;
    }

    let enabled = describe_enabled_tools(api).await?;
    if enabled.is_empty() {
        warn!("no tools enabled; tracking cannot start");
    } else {
        info!(tools = enabled.len(), "bring-up complete");
    }
    Ok(enabled)
}

/// Frees handles the device wants released, typically left over from a
/// previous session or an unplugged tool.
async fn free_stale_handles(api: &mut CombinedApi) -> Result<(), CapiError> {
    let stale = api.port_handle_search(SearchFilter::PortsToFree).await?;
    for info in &stale {
        debug!(handle = info.port_handle(), "freeing stale handle");
        api.port_handle_free(info.port_handle()).await?;
    }
    Ok(())
}

async fn describe_enabled_tools(api: &mut CombinedApi) -> Result<Vec<PortHandleInfo>, CapiError> {
    let enabled = api.port_handle_search(SearchFilter::Enabled).await?;
    let mut described = Vec::with_capacity(enabled.len());
    for info in &enabled {
        described.push(api.port_handle_info(info.port_handle()).await?);
    }
    Ok(described)
}
