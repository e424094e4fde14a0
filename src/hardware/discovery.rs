//! Device discovery
//!
//! Locates the two endpoints a run needs:
//!
//! - the **wavelength source**: every VISA channel is asked for its identity
//!   string; the first one containing the source model marker wins.
//! - the **trigger**: every serial port whose description (product or
//!   manufacturer string) contains one of the trigger vendor markers.
//!
//! Run this once before a sequence, never during one: identification queries
//! go out to every attached instrument.
//!
//! The matching rules are plain predicates ([`is_source_identity`],
//! [`is_trigger_port`]) so they can be tested without hardware.

use crate::config::DeviceConfig;
use crate::error::{AppResult, EndpointKind, SnapError};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Model marker expected in the light source identity string.
pub const DEFAULT_SOURCE_MARKER: &str = "TLS";

/// Description markers of the trigger board: genuine Arduino boards report
/// "Arduino", common clones report their USB-serial bridge "CH340".
pub const DEFAULT_TRIGGER_MARKERS: [&str; 2] = ["Arduino", "CH340"];

/// A VISA channel that may host the light source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// VISA resource string
    pub address: String,
}

/// A serial port that may host the trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    /// OS port name
    pub port_name: String,
    /// Product / manufacturer text reported by the OS
    pub description: String,
}

/// A located and validated endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    /// Which role this endpoint plays
    pub kind: EndpointKind,
    /// Opaque locator: VISA resource or serial port name
    pub address: String,
    /// Identity or description text that matched
    pub identity: String,
}

/// Both endpoints of a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEndpoints {
    /// Tunable light source
    pub source: DeviceEndpoint,
    /// Camera trigger
    pub trigger: DeviceEndpoint,
}

/// Markers used to accept endpoints.
#[derive(Debug, Clone)]
pub struct Markers {
    /// Required substring of the source identity
    pub source: String,
    /// Accepted substrings of the trigger description
    pub trigger: Vec<String>,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE_MARKER.to_string(),
            trigger: DEFAULT_TRIGGER_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl From<&DeviceConfig> for Markers {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            source: config.source_marker.clone(),
            trigger: config.trigger_markers.clone(),
        }
    }
}

/// Whether an identity string belongs to the light source.
pub fn is_source_identity(identity: &str, marker: &str) -> bool {
    !marker.is_empty() && identity.contains(marker)
}

/// Whether a port description belongs to the trigger board.
pub fn is_trigger_port<S: AsRef<str>>(description: &str, markers: &[S]) -> bool {
    markers
        .iter()
        .map(AsRef::as_ref)
        .any(|m| !m.is_empty() && description.contains(m))
}

/// Enumerates hardware channels.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// All channels that could host the light source
    async fn list_source_channels(&self) -> Result<Vec<ChannelDescriptor>>;

    /// Ask a channel for its identity string
    async fn identify(&self, channel: &ChannelDescriptor) -> Result<String>;

    /// All serial ports that could host the trigger
    async fn list_trigger_ports(&self) -> Result<Vec<PortDescriptor>>;
}

/// Locate both endpoints, failing with `DeviceNotFound` for the first one
/// missing.
///
/// Channels that fail to identify are logged and skipped.
pub async fn discover(
    backend: &dyn DiscoveryBackend,
    markers: &Markers,
) -> AppResult<DiscoveredEndpoints> {
    let source = find_source(backend, markers).await?;
    let trigger = find_trigger(backend, markers).await?;
    info!(
        source = %source.address,
        trigger = %trigger.address,
        "Discovered endpoints"
    );
    Ok(DiscoveredEndpoints { source, trigger })
}

async fn find_source(
    backend: &dyn DiscoveryBackend,
    markers: &Markers,
) -> AppResult<DeviceEndpoint> {
    let channels = backend.list_source_channels().await.map_err(|e| {
        warn!(error = %e, "Could not enumerate source channels");
        SnapError::DeviceNotFound(EndpointKind::Source)
    })?;

    for channel in channels {
        match backend.identify(&channel).await {
            Ok(identity) if is_source_identity(&identity, &markers.source) => {
                return Ok(DeviceEndpoint {
                    kind: EndpointKind::Source,
                    address: channel.address,
                    identity,
                });
            }
            Ok(identity) => {
                debug!(channel = %channel.address, identity = %identity, "Not the light source")
            }
            Err(e) => warn!(channel = %channel.address, error = %e, "Identification failed"),
        }
    }
    Err(SnapError::DeviceNotFound(EndpointKind::Source))
}

async fn find_trigger(
    backend: &dyn DiscoveryBackend,
    markers: &Markers,
) -> AppResult<DeviceEndpoint> {
    let ports = backend.list_trigger_ports().await.map_err(|e| {
        warn!(error = %e, "Could not enumerate serial ports");
        SnapError::DeviceNotFound(EndpointKind::Trigger)
    })?;

    ports
        .into_iter()
        .find(|p| is_trigger_port(&p.description, &markers.trigger))
        .map(|p| DeviceEndpoint {
            kind: EndpointKind::Trigger,
            address: p.port_name,
            identity: p.description,
        })
        .ok_or(SnapError::DeviceNotFound(EndpointKind::Trigger))
}

/// Discovery against the machine's real serial ports and VISA resources.
#[derive(Debug, Clone, Default)]
pub struct SystemDiscovery {
    /// Timeout used for identity queries
    pub query_timeout: std::time::Duration,
}

impl SystemDiscovery {
    /// Create a backend with the given identity query timeout
    pub fn new(query_timeout: std::time::Duration) -> Self {
        Self { query_timeout }
    }
}

#[async_trait]
impl DiscoveryBackend for SystemDiscovery {
    #[cfg(feature = "instrument_visa")]
    async fn list_source_channels(&self) -> Result<Vec<ChannelDescriptor>> {
        use anyhow::{anyhow, Context};

        tokio::task::spawn_blocking(|| {
            use std::ffi::CString;
            use visa_rs::prelude::*;

            let rm = DefaultRM::new().map_err(|e| anyhow!("VISA resource manager: {e:?}"))?;
            let expr = CString::new("?*INSTR").context("Invalid VISA expression")?;
            let mut list = rm
                .find_res_list(&expr.into())
                .map_err(|e| anyhow!("VISA resource search failed: {e:?}"))?;
            let mut channels = Vec::new();
            while let Some(resource) = list
                .find_next()
                .map_err(|e| anyhow!("VISA resource search failed: {e:?}"))?
            {
                channels.push(ChannelDescriptor {
                    address: resource.to_string(),
                });
            }
            Ok(channels)
        })
        .await
        .context("VISA I/O task panicked")?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn list_source_channels(&self) -> Result<Vec<ChannelDescriptor>> {
        Err(SnapError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    #[cfg(feature = "instrument_visa")]
    async fn identify(&self, channel: &ChannelDescriptor) -> Result<String> {
        use anyhow::{anyhow, Context};

        let address = channel.address.clone();
        let timeout = self.query_timeout;
        tokio::task::spawn_blocking(move || {
            use std::ffi::CString;
            use std::io::{BufRead, BufReader, Write};
            use visa_rs::prelude::*;

            let rm = DefaultRM::new().map_err(|e| anyhow!("VISA resource manager: {e:?}"))?;
            let resource = CString::new(address.as_str())
                .with_context(|| format!("Invalid VISA resource '{address}'"))?;
            let mut instrument = rm
                .open(&resource.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| anyhow!("Failed to open '{address}': {e:?}"))?;
            instrument
                .write_all(b"*IDN?\n")
                .with_context(|| format!("Failed to query '{address}'"))?;
            let mut identity = String::new();
            BufReader::new(&instrument)
                .read_line(&mut identity)
                .with_context(|| format!("Failed to read identity of '{address}'"))?;
            Ok(identity.trim().to_string())
        })
        .await
        .context("VISA I/O task panicked")?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn identify(&self, _channel: &ChannelDescriptor) -> Result<String> {
        Err(SnapError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    #[cfg(feature = "instrument_serial")]
    async fn list_trigger_ports(&self) -> Result<Vec<PortDescriptor>> {
        use anyhow::Context;
        use serialport::SerialPortType;

        let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let description = match &p.port_type {
                    SerialPortType::UsbPort(usb) => [usb.product.as_deref(), usb.manufacturer.as_deref()]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" "),
                    SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                    SerialPortType::PciPort => "PCI".to_string(),
                    SerialPortType::Unknown => String::new(),
                };
                PortDescriptor {
                    port_name: p.port_name,
                    description,
                }
            })
            .collect())
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn list_trigger_ports(&self) -> Result<Vec<PortDescriptor>> {
        Err(SnapError::FeatureNotEnabled("instrument_serial".to_string()).into())
    }
}
