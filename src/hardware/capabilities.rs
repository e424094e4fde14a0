//! Hardware Capabilities
//!
//! The sequencer only needs two things from the bench: something that tunes
//! to a wavelength and something that fires the camera. Each is a small,
//! async, thread-safe trait so real drivers and mocks are interchangeable.
//!
//! # Design
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn one_shot<S, T>(source: &S, trigger: &T) -> anyhow::Result<()>
//! where
//!     S: WavelengthSource,
//!     T: ShotTrigger,
//! {
//!     source.set_wavelength("550").await?;
//!     trigger.fire().await?;
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Wavelength Selection
///
/// Devices that tune their output to a requested wavelength (tunable light
/// sources, monochromators).
///
/// # Contract
/// - The wavelength token is forwarded verbatim; units are the device's
/// - `Ok(())` means the command was accepted by the transport, not that the
///   optics have settled. Callers wait the settle delay themselves.
#[async_trait]
pub trait WavelengthSource: Send + Sync {
    /// Command the source to a wavelength
    async fn set_wavelength(&self, wavelength: &str) -> Result<()>;

    /// Human readable description (address, model)
    fn describe(&self) -> String {
        "wavelength source".to_string()
    }
}

/// Capability: Shot Triggering
///
/// Devices that start one camera exposure per call (microcontroller trigger
/// lines, pulse generators).
///
/// # Contract
/// - Every successful `fire()` produces exactly one capture on the
///   instrument side
/// - No arming step; the device is ready between calls
#[async_trait]
pub trait ShotTrigger: Send + Sync {
    /// Fire one trigger pulse
    async fn fire(&self) -> Result<()>;

    /// Human readable description (port, board)
    fn describe(&self) -> String {
        "shot trigger".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTrigger {
        fired: AtomicUsize,
    }

    #[async_trait]
    impl ShotTrigger for CountingTrigger {
        async fn fire(&self) -> Result<()> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct EchoSource;

    #[async_trait]
    impl WavelengthSource for EchoSource {
        async fn set_wavelength(&self, wavelength: &str) -> Result<()> {
            if wavelength.is_empty() {
                anyhow::bail!("empty wavelength");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn trait_objects_are_usable() {
        let trigger: Box<dyn ShotTrigger> = Box::new(CountingTrigger {
            fired: AtomicUsize::new(0),
        });
        trigger.fire().await.unwrap();
        trigger.fire().await.unwrap();
        assert_eq!(trigger.describe(), "shot trigger");

        let source: Box<dyn WavelengthSource> = Box::new(EchoSource);
        assert!(source.set_wavelength("500").await.is_ok());
        assert!(source.set_wavelength("").await.is_err());
    }
}
