//! Mock Hardware Implementations
//!
//! Simulated endpoints for tests and dry runs without a bench attached.
//! All mocks are async-safe (tokio locks, no blocking sleeps).
//!
//! # Available Mocks
//!
//! - `MockSource` / `MockTrigger` - record every command into a shared
//!   [`CommandLog`] with a tokio timestamp, so tests can check both order and
//!   spacing of commands. Both support failure injection.
//! - `SimulatedInstrument` - attached to a `MockTrigger`, writes one shot
//!   folder with a cube per trigger, like the imaging instrument does.
//! - `RecordingTransport` - line transport that keeps what was written.
//! - `MockDiscovery` - scripted channels and ports.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CubeConfig;
use crate::cube::{envi, HyperspectralCube};
use crate::error::AppResult;
use crate::hardware::capabilities::{ShotTrigger, WavelengthSource};
use crate::hardware::discovery::{ChannelDescriptor, DiscoveryBackend, PortDescriptor};
use crate::hardware::tls::gowave_command;
use crate::hardware::transport::CommandTransport;

// =============================================================================
// Command log shared by the mock endpoints
// =============================================================================

/// A command as seen by the bench.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BenchCommand {
    /// `gowave {wavelength}` reached the light source
    GoWave(String),
    /// One trigger pulse
    Trigger,
}

/// A command with the (tokio) time it was received.
#[derive(Debug, Clone)]
pub struct LoggedCommand {
    /// What was sent
    pub command: BenchCommand,
    /// When it was received
    pub at: Instant,
}

/// Shared, ordered record of bench commands.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    entries: Arc<Mutex<Vec<LoggedCommand>>>,
}

impl CommandLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, command: BenchCommand) {
        self.entries.lock().await.push(LoggedCommand {
            command,
            at: Instant::now(),
        });
    }

    /// Every logged command with its timestamp
    pub async fn entries(&self) -> Vec<LoggedCommand> {
        self.entries.lock().await.clone()
    }

    /// Commands without timestamps
    pub async fn commands(&self) -> Vec<BenchCommand> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.command.clone())
            .collect()
    }

    /// Number of trigger pulses received
    pub async fn fire_count(&self) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.command == BenchCommand::Trigger)
            .count()
    }
}

// =============================================================================
// MockSource - Simulated tunable light source
// =============================================================================

/// Mock light source
///
/// Logs `GoWave` for each accepted command. With `failing_on(n)` the n-th
/// call (0-based) fails as a transport error would.
#[derive(Debug)]
pub struct MockSource {
    log: CommandLog,
    calls: AtomicUsize,
    fail_on: Option<usize>,
}

impl MockSource {
    /// Create a source logging into `log`
    pub fn new(log: CommandLog) -> Self {
        Self {
            log,
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    /// Fail the `call`-th command (0-based)
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }
}

#[async_trait]
impl WavelengthSource for MockSource {
    async fn set_wavelength(&self, wavelength: &str) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(call) {
            return Err(anyhow!("MockSource: injected failure on '{}'", gowave_command(wavelength)));
        }
        self.log
            .record(BenchCommand::GoWave(wavelength.to_string()))
            .await;
        debug!(wavelength, "MockSource: tuned");
        Ok(())
    }

    fn describe(&self) -> String {
        "MockSource".to_string()
    }
}

// =============================================================================
// MockTrigger - Simulated camera trigger
// =============================================================================

/// Mock trigger
///
/// Logs `Trigger` for each pulse and, when an instrument is attached, lets it
/// write the shot folder the pulse would produce.
#[derive(Debug)]
pub struct MockTrigger {
    log: CommandLog,
    calls: AtomicUsize,
    fail_on: Option<usize>,
    instrument: Option<SimulatedInstrument>,
}

impl MockTrigger {
    /// Create a trigger logging into `log`
    pub fn new(log: CommandLog) -> Self {
        Self {
            log,
            calls: AtomicUsize::new(0),
            fail_on: None,
            instrument: None,
        }
    }

    /// Fail the `call`-th pulse (0-based)
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }

    /// Write a shot folder through `instrument` for every pulse
    pub fn with_instrument(mut self, instrument: SimulatedInstrument) -> Self {
        self.instrument = Some(instrument);
        self
    }
}

#[async_trait]
impl ShotTrigger for MockTrigger {
    async fn fire(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(call) {
            return Err(anyhow!("MockTrigger: injected failure on pulse {}", call + 1));
        }
        self.log.record(BenchCommand::Trigger).await;
        if let Some(instrument) = &self.instrument {
            instrument.capture()?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "MockTrigger".to_string()
    }
}

// =============================================================================
// SimulatedInstrument - writes one folder per shot
// =============================================================================

/// Stand-in for the imaging instrument
///
/// Each capture creates `{watch_dir}/{index:04}/{subdir}/REFLECTANCE_{index:04}.hdr`
/// plus its `.dat`, holding a cube whose samples all equal the capture number
/// (1 for the first capture, 2 for the second, ...).
#[derive(Debug)]
pub struct SimulatedInstrument {
    watch_dir: PathBuf,
    subdir: PathBuf,
    shape: (usize, usize, usize),
    first_index: usize,
    captures: AtomicUsize,
}

impl SimulatedInstrument {
    /// Instrument writing into `watch_dir` with the cube layout of `config`
    pub fn new(watch_dir: impl Into<PathBuf>, config: &CubeConfig) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            subdir: config.subdir.clone(),
            shape: (4, 4, 32),
            first_index: 1,
            captures: AtomicUsize::new(0),
        }
    }

    /// Cube shape `(rows, cols, bands)` of every capture
    pub fn with_shape(mut self, rows: usize, cols: usize, bands: usize) -> Self {
        self.shape = (rows, cols, bands);
        self
    }

    /// Folder index of the first capture
    pub fn with_first_index(mut self, index: usize) -> Self {
        self.first_index = index;
        self
    }

    /// Directory the instrument writes into
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Write the next shot folder and return its path
    pub fn capture(&self) -> AppResult<PathBuf> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        let index = self.first_index + n;
        let folder = self.watch_dir.join(format!("{index:04}"));
        let results = folder.join(&self.subdir);
        std::fs::create_dir_all(&results)?;

        let (rows, cols, bands) = self.shape;
        let cube = HyperspectralCube::filled(rows, cols, bands, (n + 1) as f64);
        let stem = format!("REFLECTANCE_{index:04}");
        envi::write_cube(
            &results.join(format!("{stem}.hdr")),
            &results.join(format!("{stem}.dat")),
            &cube,
        )?;
        debug!(folder = %folder.display(), "SimulatedInstrument: shot written");
        Ok(folder)
    }
}

// =============================================================================
// RecordingTransport - line transport double
// =============================================================================

/// Transport that keeps every line written to it
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    lines: Arc<Mutex<Vec<String>>>,
    fail_after: Option<usize>,
}

impl RecordingTransport {
    /// Transport that accepts every write
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `count` writes, then fail every following one
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Lines written so far
    pub async fn lines(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }
}

#[async_trait]
impl CommandTransport for RecordingTransport {
    async fn write_line(&self, command: &str) -> Result<()> {
        let mut lines = self.lines.lock().await;
        if self.fail_after.is_some_and(|limit| lines.len() >= limit) {
            return Err(anyhow!("RecordingTransport: write refused"));
        }
        lines.push(command.to_string());
        Ok(())
    }

    fn info(&self) -> String {
        "RecordingTransport".to_string()
    }
}

// =============================================================================
// MockDiscovery - scripted hardware inventory
// =============================================================================

/// Discovery backend answering from a fixed inventory
#[derive(Debug, Clone, Default)]
pub struct MockDiscovery {
    channels: Vec<(String, std::result::Result<String, String>)>,
    ports: Vec<PortDescriptor>,
}

impl MockDiscovery {
    /// Empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a VISA channel answering `*IDN?` with `identity` (or failing)
    pub fn with_channel(
        mut self,
        address: &str,
        identity: std::result::Result<&str, &str>,
    ) -> Self {
        self.channels.push((
            address.to_string(),
            identity.map(str::to_string).map_err(str::to_string),
        ));
        self
    }

    /// Add a serial port with the given description
    pub fn with_port(mut self, port_name: &str, description: &str) -> Self {
        self.ports.push(PortDescriptor {
            port_name: port_name.to_string(),
            description: description.to_string(),
        });
        self
    }

    /// Inventory of a working station: one light source and one trigger
    pub fn station() -> Self {
        Self::new()
            .with_channel("USB0::0x1313::0x8078::M00001::INSTR", Ok("Mock TLS-1000"))
            .with_port("/dev/ttyACM0", "Arduino Uno")
    }
}

#[async_trait]
impl DiscoveryBackend for MockDiscovery {
    async fn list_source_channels(&self) -> Result<Vec<ChannelDescriptor>> {
        Ok(self
            .channels
            .iter()
            .map(|(address, _)| ChannelDescriptor {
                address: address.clone(),
            })
            .collect())
    }

    async fn identify(&self, channel: &ChannelDescriptor) -> Result<String> {
        match self.channels.iter().find(|(a, _)| *a == channel.address) {
            Some((_, Ok(identity))) => Ok(identity.clone()),
            Some((_, Err(message))) => Err(anyhow!("{}", message)),
            None => Err(anyhow!("unknown channel '{}'", channel.address)),
        }
    }

    async fn list_trigger_ports(&self) -> Result<Vec<PortDescriptor>> {
        Ok(self.ports.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_and_trigger_share_log() {
        let log = CommandLog::new();
        let source = MockSource::new(log.clone());
        let trigger = MockTrigger::new(log.clone());

        source.set_wavelength("500").await.unwrap();
        trigger.fire().await.unwrap();
        trigger.fire().await.unwrap();

        assert_eq!(
            log.commands().await,
            vec![
                BenchCommand::GoWave("500".into()),
                BenchCommand::Trigger,
                BenchCommand::Trigger
            ]
        );
        assert_eq!(log.fire_count().await, 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let log = CommandLog::new();
        let trigger = MockTrigger::new(log.clone()).failing_on(1);

        trigger.fire().await.unwrap();
        assert!(trigger.fire().await.is_err());
        trigger.fire().await.unwrap();
        assert_eq!(log.fire_count().await, 2);

        let source = MockSource::new(log).failing_on(0);
        assert!(source.set_wavelength("500").await.is_err());
    }

    #[tokio::test]
    async fn test_instrument_writes_numbered_folders() {
        let dir = tempfile::tempdir().unwrap();
        let config = CubeConfig::default();
        let trigger = MockTrigger::new(CommandLog::new())
            .with_instrument(SimulatedInstrument::new(dir.path(), &config).with_shape(2, 2, 3));

        trigger.fire().await.unwrap();
        trigger.fire().await.unwrap();

        let second = dir.path().join("0002");
        let cube = crate::cube::load_from_folder(&second, &config).unwrap();
        assert_eq!(cube.shape(), (2, 2, 3));
        assert!(cube.data().iter().all(|&v| v == 2.0));
    }

    #[tokio::test]
    async fn test_recording_transport_limit() {
        let transport = RecordingTransport::new().failing_after(1);
        transport.write_line("gowave 500").await.unwrap();
        assert!(transport.write_line("gowave 550").await.is_err());
        assert_eq!(transport.lines().await, vec!["gowave 500"]);
    }
}
