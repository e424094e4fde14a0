//! Hardware layer
//!
//! Capability traits for the two bench endpoints, their real drivers, device
//! discovery, and mocks.
//!
//! # Modules
//!
//! - `capabilities`: `WavelengthSource` and `ShotTrigger`
//! - `transport`: line-oriented command transports (VISA)
//! - `tls`: the tunable light source driver
//! - `trigger`: the serial camera trigger
//! - `discovery`: locating both endpoints
//! - `mock`: simulated endpoints and instrument

pub mod capabilities;
pub mod discovery;
pub mod mock;
pub mod tls;
pub mod transport;
pub mod trigger;

pub use capabilities::{ShotTrigger, WavelengthSource};
pub use discovery::{discover, DeviceEndpoint, DiscoveredEndpoints, DiscoveryBackend};

use crate::config::DeviceConfig;
use crate::error::{AppResult, EndpointKind, SnapError};
use std::time::Duration;
use tls::TlsSource;
use transport::VisaTransport;
use trigger::SerialTrigger;

/// Opened drivers for a discovered station.
pub struct Endpoints {
    /// Light source driver
    pub source: Box<dyn WavelengthSource>,
    /// Trigger driver
    pub trigger: Box<dyn ShotTrigger>,
}

impl std::fmt::Debug for Endpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoints")
            .field("source", &self.source.describe())
            .field("trigger", &self.trigger.describe())
            .finish()
    }
}

/// Open the real drivers for `discovered`.
///
/// The light source session is opened immediately; the trigger port is only
/// opened per shot.
pub fn connect(discovered: &DiscoveredEndpoints, devices: &DeviceConfig) -> AppResult<Endpoints> {
    let transport = VisaTransport::open(
        &discovered.source.address,
        Duration::from_millis(devices.source_timeout_ms),
    )
    .map_err(|e| SnapError::Transport {
        kind: EndpointKind::Source,
        message: format!("{e:#}"),
    })?;

    let trigger = SerialTrigger::new(discovered.trigger.address.clone(), devices.trigger_baud_rate)
        .with_settle(Duration::from_millis(devices.trigger_settle_ms));

    Ok(Endpoints {
        source: Box::new(TlsSource::new(transport)),
        trigger: Box::new(trigger),
    })
}
