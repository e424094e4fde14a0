//! Serial camera trigger (Arduino-style microcontroller).
//!
//! The board resets whenever its port is opened, so every shot opens the port
//! fresh, waits for the board to come up, writes the trigger payload and
//! closes the port again.

use super::capabilities::ShotTrigger;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use anyhow::Context;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Literal payload the trigger firmware listens for.
pub const TRIGGER_PAYLOAD: &[u8] = b"trigger\n";

/// Serial trigger endpoint
#[derive(Debug, Clone)]
pub struct SerialTrigger {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Wait between opening the port and writing
    settle: Duration,

    /// Write timeout
    timeout: Duration,
}

impl SerialTrigger {
    /// Create a trigger with default timing
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            settle: Duration::from_secs(2),
            timeout: Duration::from_millis(500),
        }
    }

    /// Set the delay between opening the port and writing the payload
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Set write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Port this trigger writes to
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl ShotTrigger for SerialTrigger {
    #[cfg(feature = "instrument_serial")]
    async fn fire(&self) -> Result<()> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;
        let timeout = self.timeout;

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .timeout(timeout)
                .open()
                .with_context(|| {
                    format!(
                        "Failed to open serial port '{}' at {} baud",
                        port_name, baud_rate
                    )
                })
        })
        .await
        .context("Serial I/O task panicked")??;

        tokio::time::sleep(self.settle).await;

        let port_name = self.port_name.clone();
        tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut port = port;
            port.write_all(TRIGGER_PAYLOAD)
                .with_context(|| format!("Failed to write trigger to '{}'", port_name))?;
            port.flush().context("Failed to flush serial port")?;
            debug!(port = %port_name, "Trigger sent");
            // Dropping the handle closes the port.
            Ok(())
        })
        .await
        .context("Serial I/O task panicked")?
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn fire(&self) -> Result<()> {
        Err(crate::error::SnapError::FeatureNotEnabled("instrument_serial".to_string()).into())
    }

    fn describe(&self) -> String {
        format!("SerialTrigger({} @ {} baud)", self.port_name, self.baud_rate)
    }
}
