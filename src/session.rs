//! Acquisition session
//!
//! One `AcquisitionSession` carries everything a single operator run needs:
//! the project, the recipe, the discovered endpoints (owned by the sequencer),
//! the pre-run folder snapshot and the diff it produced. Nothing is global,
//! and only one run can be active per session because every driving method
//! takes `&mut self`.
//!
//! # State Machine
//!
//! ```text
//! Idle ──> Discovering ──> Ready ──> Running ──> Finished ──> Aggregating ──> Done
//!               │                       │            │             │
//!               └───────────────────────┴────────────┴─────────────┴──> Aborted
//! ```
//!
//! `Done` and `Aborted` return to `Idle` through [`AcquisitionSession::reset`];
//! `Aborted` may also go straight back to `Discovering`. Aggregation requires
//! `Finished` and a folder count that matches the recipe.

use crate::config::Settings;
use crate::cube::aggregate::{AggregationReport, Aggregator};
use crate::error::{AppResult, SnapError};
use crate::hardware::{self, DiscoveredEndpoints, DiscoveryBackend, Endpoints};
use crate::naming::Project;
use crate::recipe::Recipe;
use crate::sequencer::{RunProgress, RunResult, Sequencer};
use crate::snapshot::{diff, verify_count, FolderSnapshot, OutputFolder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Lifecycle of an acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing discovered yet
    Idle,
    /// Looking for the endpoints
    Discovering,
    /// Endpoints found; a run may start
    Ready,
    /// Sequencer executing
    Running,
    /// Run completed and new folders collected
    Finished,
    /// Copying and summing cubes
    Aggregating,
    /// Outputs written
    Done,
    /// Something failed; see the returned error
    Aborted,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Discovering => "Discovering",
            SessionState::Ready => "Ready",
            SessionState::Running => "Running",
            SessionState::Finished => "Finished",
            SessionState::Aggregating => "Aggregating",
            SessionState::Done => "Done",
            SessionState::Aborted => "Aborted",
        };
        write!(f, "{name}")
    }
}

impl SessionState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, next),
            (Idle, Discovering)
                | (Discovering, Ready)
                | (Discovering, Aborted)
                | (Ready, Running)
                | (Ready, Discovering)
                | (Running, Finished)
                | (Running, Aborted)
                | (Finished, Aggregating)
                | (Finished, Aborted)
                | (Aggregating, Done)
                | (Aggregating, Aborted)
                | (Done, Idle)
                | (Aborted, Idle)
                | (Aborted, Discovering)
        )
    }

    /// Whether a run may start.
    pub fn can_run(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// Whether aggregation may start.
    pub fn can_aggregate(&self) -> bool {
        matches!(self, SessionState::Finished)
    }
}

/// Requests cancellation of a running sequence from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Abort before the next trigger pulse.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// State and resources of one operator session.
pub struct AcquisitionSession {
    id: Uuid,
    state: SessionState,
    settings: Settings,
    project: Project,
    recipe: Recipe,
    discovered: Option<DiscoveredEndpoints>,
    sequencer: Option<Sequencer>,
    progress_rx: Option<watch::Receiver<RunProgress>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    before: Option<FolderSnapshot>,
    new_folders: Vec<OutputFolder>,
    last_run: Option<RunResult>,
}

impl AcquisitionSession {
    /// New idle session.
    pub fn new(settings: Settings, project: Project, recipe: Recipe) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            settings,
            project,
            recipe,
            discovered: None,
            sequencer: None,
            progress_rx: None,
            cancel_tx: Arc::new(cancel_tx),
            before: None,
            new_folders: Vec::new(),
            last_run: None,
        }
    }

    /// Session identifier used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Project of this session.
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Recipe to run.
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Edit the recipe. Not available once a run has started.
    pub fn recipe_mut(&mut self) -> AppResult<&mut Recipe> {
        match self.state {
            SessionState::Idle | SessionState::Discovering | SessionState::Ready => {
                Ok(&mut self.recipe)
            }
            other => Err(SnapError::NotReady(format!(
                "recipe is locked while the session is {other}"
            ))),
        }
    }

    /// Endpoints found by the last discovery.
    pub fn discovered(&self) -> Option<&DiscoveredEndpoints> {
        self.discovered.as_ref()
    }

    /// Folders produced by the last run, oldest first.
    pub fn new_folders(&self) -> &[OutputFolder] {
        &self.new_folders
    }

    /// Watch directory listing taken before the last run.
    pub fn pre_run_snapshot(&self) -> Option<&FolderSnapshot> {
        self.before.as_ref()
    }

    /// Result of the last completed run.
    pub fn last_run(&self) -> Option<&RunResult> {
        self.last_run.as_ref()
    }

    /// Progress of the current or last run.
    pub fn progress(&self) -> Option<watch::Receiver<RunProgress>> {
        self.progress_rx.clone()
    }

    /// Handle for cancelling a run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    fn transition(&mut self, next: SessionState) -> AppResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SnapError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!(session = %self.id, from = %self.state, to = %next, "Session state");
        self.state = next;
        Ok(())
    }

    fn abort(&mut self, error: SnapError) -> SnapError {
        warn!(session = %self.id, from = %self.state, error = %error, "Session aborted");
        self.state = SessionState::Aborted;
        error
    }

    /// Locate both endpoints. On success the session is `Ready` but has no
    /// drivers yet; see [`connect`](Self::connect) and
    /// [`use_endpoints`](Self::use_endpoints).
    pub async fn discover(
        &mut self,
        backend: &dyn DiscoveryBackend,
    ) -> AppResult<&DiscoveredEndpoints> {
        self.transition(SessionState::Discovering)?;
        self.sequencer = None;
        self.progress_rx = None;
        let markers = (&self.settings.devices).into();
        match hardware::discover(backend, &markers).await {
            Ok(found) => {
                self.transition(SessionState::Ready)?;
                Ok(self.discovered.insert(found))
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Open the real drivers for the discovered endpoints.
    pub fn connect(&mut self) -> AppResult<()> {
        let discovered = self
            .discovered
            .as_ref()
            .ok_or_else(|| SnapError::NotReady("no endpoints discovered".to_string()))?;
        let endpoints = hardware::connect(discovered, &self.settings.devices)?;
        self.use_endpoints(endpoints)
    }

    /// Hand `endpoints` to the sequencer. Requires `Ready`.
    pub fn use_endpoints(&mut self, endpoints: Endpoints) -> AppResult<()> {
        if !self.state.can_run() {
            return Err(SnapError::NotReady(format!(
                "endpoints can only be attached when Ready, session is {}",
                self.state
            )));
        }
        let (sequencer, progress_rx) = Sequencer::new(endpoints);
        info!(session = %self.id, endpoints = %sequencer.describe(), "Endpoints attached");
        self.sequencer = Some(sequencer.with_cancel(self.cancel_tx.subscribe()));
        self.progress_rx = Some(progress_rx);
        Ok(())
    }

    /// Snapshot the watch directory, execute the recipe and collect the new
    /// folders.
    pub async fn start_run(&mut self) -> AppResult<&RunResult> {
        if !self.state.can_run() {
            return Err(SnapError::NotReady(format!("cannot run while {}", self.state)));
        }
        self.recipe.validate()?;
        if self.sequencer.is_none() {
            return Err(SnapError::NotReady("no endpoints attached".to_string()));
        }

        let watch_dir = self.settings.storage.watch_dir.clone();
        let before = FolderSnapshot::take(&watch_dir)?;
        self.new_folders.clear();
        self.last_run = None;
        self.cancel_tx.send_replace(false);
        self.transition(SessionState::Running)?;

        let span = info_span!("run", session = %self.id, project = %self.project.name);
        let outcome = match &self.sequencer {
            Some(sequencer) => sequencer.run(&self.recipe).instrument(span).await,
            None => Err(SnapError::NotReady("no endpoints attached".to_string())),
        };
        let result = match outcome {
            Ok(result) => result,
            Err(e) => return Err(self.abort(e)),
        };

        let after = match FolderSnapshot::take(&watch_dir) {
            Ok(after) => after,
            Err(e) => return Err(self.abort(e)),
        };
        self.new_folders = diff(&before, &after);
        self.before = Some(before);
        info!(
            session = %self.id,
            new_folders = self.new_folders.len(),
            expected = self.recipe.total_shots(),
            "Run collected"
        );
        self.transition(SessionState::Finished)?;
        Ok(self.last_run.insert(result))
    }

    /// Copy, group, sum and write the run's cubes.
    pub async fn aggregate(&mut self) -> AppResult<AggregationReport> {
        if !self.state.can_aggregate() {
            return Err(SnapError::NotReady(format!(
                "aggregation needs a finished run, session is {}",
                self.state
            )));
        }
        if let Err(e) = verify_count(&self.new_folders, self.recipe.total_shots()) {
            return Err(self.abort(e));
        }
        self.transition(SessionState::Aggregating)?;

        let aggregator = match Aggregator::new(self.project.clone(), self.settings.cube.clone()) {
            Ok(aggregator) => aggregator,
            Err(e) => return Err(self.abort(e)),
        };
        let recipe = self.recipe.clone();
        let folders = self.new_folders.clone();
        let joined = tokio::task::spawn_blocking(move || aggregator.aggregate(&recipe, &folders))
            .await
            .map_err(|e| SnapError::Io(std::io::Error::other(e)));

        match joined.and_then(|report| report) {
            Ok(report) => {
                self.transition(SessionState::Done)?;
                Ok(report)
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Clear run artifacts and endpoints; back to `Idle`.
    pub fn reset(&mut self) -> AppResult<()> {
        self.transition(SessionState::Idle)?;
        self.discovered = None;
        self.sequencer = None;
        self.progress_rx = None;
        self.before = None;
        self.new_folders.clear();
        self.last_run = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::hardware::mock::{CommandLog, MockDiscovery, MockSource, MockTrigger, SimulatedInstrument};
    use crate::recipe::RecipeStep;
    use std::path::Path;

    fn settings(root: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.storage.watch_dir = root.join("capture");
        settings.storage.output_dir = root.join("out");
        settings
    }

    fn session(root: &Path) -> AcquisitionSession {
        let settings = settings(root);
        let project = Project::new("leaf", &settings.storage.output_dir).unwrap();
        let recipe = Recipe::from_steps(vec![RecipeStep::new("500", 2), RecipeStep::new("550", 1)]);
        AcquisitionSession::new(settings, project, recipe)
    }

    fn endpoints(root: &Path, log: &CommandLog, capture: bool) -> Endpoints {
        let settings = settings(root);
        let mut trigger = MockTrigger::new(log.clone());
        if capture {
            trigger = trigger.with_instrument(
                SimulatedInstrument::new(&settings.storage.watch_dir, &settings.cube),
            );
        }
        Endpoints {
            source: Box::new(MockSource::new(log.clone())),
            trigger: Box::new(trigger),
        }
    }

    #[test]
    fn transitions() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Discovering));
        assert!(Running.can_transition_to(Finished));
        assert!(Finished.can_transition_to(Aggregating));
        assert!(!Running.can_transition_to(Aggregating));
        assert!(!Idle.can_transition_to(Running));
        assert!(!Done.can_transition_to(Running));
        assert!(Aborted.can_transition_to(Discovering));
    }

    #[tokio::test(start_paused = true)]
    async fn full_session() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandLog::new();
        let mut session = session(dir.path());

        session.discover(&MockDiscovery::station()).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        session.use_endpoints(endpoints(dir.path(), &log, true)).unwrap();

        let run = session.start_run().await.unwrap();
        assert_eq!(run.shots_fired, 3);
        assert_eq!(session.state(), SessionState::Finished);
        assert_eq!(session.new_folders().len(), 3);
        assert!(session.recipe_mut().is_err());

        let report = session.aggregate().await.unwrap();
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(report.written.len(), 2);

        session.reset().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.discovered().is_none());
    }

    #[tokio::test]
    async fn aggregate_before_run_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(matches!(
            session.aggregate().await,
            Err(SnapError::NotReady(_))
        ));
        assert!(matches!(
            session.start_run().await,
            Err(SnapError::NotReady(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn failed_discovery_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let err = session
            .discover(&MockDiscovery::new().with_port("COM3", "Arduino"))
            .await
            .unwrap_err();
        assert!(matches!(err, SnapError::DeviceNotFound(_)));
        assert_eq!(session.state(), SessionState::Aborted);
        // retry is allowed
        session.discover(&MockDiscovery::station()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_folders_abort_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandLog::new();
        let mut session = session(dir.path());
        session.discover(&MockDiscovery::station()).await.unwrap();
        session.use_endpoints(endpoints(dir.path(), &log, false)).unwrap();

        session.start_run().await.unwrap();
        let err = session.aggregate().await.unwrap_err();
        assert!(matches!(
            err,
            SnapError::CountMismatch {
                expected: 3,
                found: 0
            }
        ));
        assert_eq!(session.state(), SessionState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_aborts_session() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandLog::new();
        let mut session = session(dir.path());
        session.discover(&MockDiscovery::station()).await.unwrap();
        session.use_endpoints(endpoints(dir.path(), &log, false)).unwrap();

        let cancel = session.cancel_handle();
        cancel.cancel();
        // the flag is reset when a run starts, so cancel mid-run instead
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(7)).await;
            cancel.cancel();
        });
        let err = session.start_run().await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, SnapError::Cancelled { shots_fired: 1 }));
        assert_eq!(session.state(), SessionState::Aborted);
    }
}
