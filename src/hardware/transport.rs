//! Line-oriented command transports.
//!
//! The light source speaks a write-only text protocol: one command per line,
//! no acknowledgement beyond the absence of a transport error. A
//! [`CommandTransport`] hides whether that line travels over VISA or a test
//! double.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use anyhow::{anyhow, Context};
#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tracing::debug;

/// Write-only, line-oriented transport.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Send `command`; the transport appends its own terminator.
    async fn write_line(&self, command: &str) -> Result<()>;

    /// Short description for logs.
    fn info(&self) -> String;
}

/// VISA session to a GPIB/USB/Ethernet instrument
///
/// Supports resource strings like:
/// - "GPIB0::1::INSTR" (GPIB interface)
/// - "USB0::0x1234::0x5678::SERIAL::INSTR" (USB)
/// - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
///
/// Blocking VISA calls run on Tokio's blocking pool.
pub struct VisaTransport {
    resource_string: String,
    timeout: Duration,
    #[cfg(feature = "instrument_visa")]
    session: Arc<std::sync::Mutex<VisaSession>>,
}

/// The resource manager must outlive the instrument session; closing the
/// default RM closes every session opened through it.
#[cfg(feature = "instrument_visa")]
struct VisaSession {
    _rm: visa_rs::DefaultRM,
    instrument: visa_rs::Instrument,
}

impl VisaTransport {
    /// Open a VISA session to `resource_string`.
    #[cfg(feature = "instrument_visa")]
    pub fn open(resource_string: &str, timeout: Duration) -> Result<Self> {
        use std::ffi::CString;
        use visa_rs::prelude::*;

        let rm = DefaultRM::new().map_err(|e| anyhow!("VISA resource manager: {e:?}"))?;
        let resource = CString::new(resource_string)
            .with_context(|| format!("Invalid VISA resource '{resource_string}'"))?;
        let instrument = rm
            .open(&resource.into(), AccessMode::NO_LOCK, timeout)
            .map_err(|e| anyhow!("Failed to open '{resource_string}': {e:?}"))?;

        debug!(resource = resource_string, "VISA session opened");
        Ok(Self {
            resource_string: resource_string.to_string(),
            timeout,
            session: Arc::new(std::sync::Mutex::new(VisaSession {
                _rm: rm,
                instrument,
            })),
        })
    }

    /// Open a VISA session to `resource_string`.
    #[cfg(not(feature = "instrument_visa"))]
    pub fn open(resource_string: &str, timeout: Duration) -> Result<Self> {
        let _ = (resource_string, timeout);
        Err(crate::error::SnapError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }
}

#[async_trait]
impl CommandTransport for VisaTransport {
    #[cfg(feature = "instrument_visa")]
    async fn write_line(&self, command: &str) -> Result<()> {
        use std::io::Write;

        let payload = format!("{command}\n");
        let session = self.session.clone();
        let resource = self.resource_string.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| anyhow!("VISA session lock poisoned"))?;
            guard
                .instrument
                .write_all(payload.as_bytes())
                .with_context(|| format!("Failed to write to '{resource}'"))?;
            debug!(resource = %resource, command = payload.trim_end(), "VISA write");
            Ok(())
        })
        .await
        .context("VISA I/O task panicked")?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn write_line(&self, _command: &str) -> Result<()> {
        Err(crate::error::SnapError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    fn info(&self) -> String {
        format!(
            "VisaTransport({} @ {}ms timeout)",
            self.resource_string,
            self.timeout.as_millis()
        )
    }
}

#[cfg(test)]
mod tests {
    #[cfg(not(feature = "instrument_visa"))]
    #[test]
    fn open_without_feature_reports_it() {
        let err = super::VisaTransport::open("GPIB0::1::INSTR", std::time::Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("instrument_visa"));
    }
}
