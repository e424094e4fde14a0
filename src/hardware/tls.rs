//! Tunable light source driver.
//!
//! Protocol: a single text command `gowave {wavelength}` per step. The source
//! sends no acknowledgement; a successful write is all the confirmation there
//! is.

use super::capabilities::WavelengthSource;
use super::transport::CommandTransport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

/// Command verb understood by the light source.
pub const GOWAVE_COMMAND: &str = "gowave";

/// Format the wavelength command for `wavelength`.
pub fn gowave_command(wavelength: &str) -> String {
    format!("{} {}", GOWAVE_COMMAND, wavelength)
}

/// Tunable light source reachable through any [`CommandTransport`].
pub struct TlsSource<T: CommandTransport> {
    transport: T,
}

impl<T: CommandTransport> TlsSource<T> {
    /// Wrap an opened transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: CommandTransport> WavelengthSource for TlsSource<T> {
    async fn set_wavelength(&self, wavelength: &str) -> Result<()> {
        let command = gowave_command(wavelength);
        self.transport
            .write_line(&command)
            .await
            .with_context(|| format!("Failed to send '{}'", command))?;
        info!(wavelength, "Light source tuned");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("TLS via {}", self.transport.info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::RecordingTransport;

    #[test]
    fn formats_gowave() {
        assert_eq!(gowave_command("532"), "gowave 532");
        assert_eq!(gowave_command("612.5"), "gowave 612.5");
    }

    #[tokio::test]
    async fn writes_one_line_per_wavelength() {
        let transport = RecordingTransport::new();
        let source = TlsSource::new(transport.clone());

        source.set_wavelength("500").await.unwrap();
        source.set_wavelength("550").await.unwrap();

        assert_eq!(transport.lines().await, vec!["gowave 500", "gowave 550"]);
        assert!(source.describe().starts_with("TLS via"));
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let transport = RecordingTransport::new().failing_after(0);
        let source = TlsSource::new(transport);
        let err = source.set_wavelength("500").await.unwrap_err();
        assert!(err.to_string().contains("gowave 500"));
    }
}
