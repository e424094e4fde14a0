//! Acquisition sequencer
//!
//! Drives the recipe against the two endpoints, strictly one operation at a
//! time:
//!
//! ```text
//! for step in recipe:
//!     gowave {step.wavelength}
//!     wait WAVELENGTH_SETTLE_DELAY
//!     repeat step.shots:
//!         (cancellation check)
//!         trigger
//!         wait SHOT_INTERVAL
//! ```
//!
//! Any endpoint failure aborts the whole run; there is no resume-from-step.
//! Cancellation is observed before every trigger pulse. A pending delay is
//! cut short by a cancel request, so the abort is reported promptly.

use crate::error::{AppResult, EndpointKind, SnapError};
use crate::hardware::{Endpoints, ShotTrigger, WavelengthSource};
use crate::recipe::Recipe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};

/// Wait after tuning the light source before the first shot of a step.
pub const WAVELENGTH_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Wait after every trigger pulse for the instrument to capture and save.
pub const SHOT_INTERVAL: Duration = Duration::from_secs(10);

/// Progress snapshot published while a run executes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    /// 1-based index of the current step (0 before the first)
    pub step: usize,
    /// Steps in the recipe
    pub total_steps: usize,
    /// Pulses fired so far
    pub shots_fired: usize,
    /// Pulses the recipe fires in total
    pub total_shots: usize,
    /// Wavelength of the current step
    pub wavelength: Option<String>,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Steps fully executed
    pub steps_completed: usize,
    /// Trigger pulses sent
    pub shots_fired: usize,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub finished_at: DateTime<Utc>,
}

/// Executes recipes against an exclusively owned pair of endpoints.
pub struct Sequencer {
    endpoints: Endpoints,
    cancel_rx: watch::Receiver<bool>,
    progress_tx: watch::Sender<RunProgress>,
}

impl Sequencer {
    /// Take ownership of the endpoints for the lifetime of the sequencer.
    ///
    /// Returns the sequencer and a progress receiver.
    pub fn new(endpoints: Endpoints) -> (Self, watch::Receiver<RunProgress>) {
        let (progress_tx, progress_rx) = watch::channel(RunProgress::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        (
            Self {
                endpoints,
                cancel_rx,
                progress_tx,
            },
            progress_rx,
        )
    }

    /// Observe `cancel_rx`; setting it to `true` aborts before the next pulse.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = cancel_rx;
        self
    }

    /// Describe the endpoints in use.
    pub fn describe(&self) -> String {
        format!(
            "{} / {}",
            self.endpoints.source.describe(),
            self.endpoints.trigger.describe()
        )
    }

    /// Run `recipe` to completion.
    pub async fn run(&self, recipe: &Recipe) -> AppResult<RunResult> {
        recipe.validate()?;
        let span = info_span!(
            "sequence",
            steps = recipe.len(),
            shots = recipe.total_shots()
        );
        self.execute(recipe).instrument(span).await
    }

    async fn execute(&self, recipe: &Recipe) -> AppResult<RunResult> {
        let started_at = Utc::now();
        let source: &dyn WavelengthSource = self.endpoints.source.as_ref();
        let trigger: &dyn ShotTrigger = self.endpoints.trigger.as_ref();

        let mut progress = RunProgress {
            total_steps: recipe.len(),
            total_shots: recipe.total_shots(),
            ..RunProgress::default()
        };
        self.publish(&progress);
        info!(source = %source.describe(), trigger = %trigger.describe(), "Run started");

        let mut steps_completed = 0;
        for (i, step) in recipe.steps().iter().enumerate() {
            progress.step = i + 1;
            progress.wavelength = Some(step.wavelength.clone());
            self.publish(&progress);

            info!(step = i + 1, wavelength = %step.wavelength, shots = step.shots, "Step");
            source
                .set_wavelength(&step.wavelength)
                .await
                .map_err(|e| abort(EndpointKind::Source, &e, progress.shots_fired))?;
            self.pause(WAVELENGTH_SETTLE_DELAY).await;

            for shot in 1..=step.shots {
                if *self.cancel_rx.borrow() {
                    warn!(shots_fired = progress.shots_fired, "Run cancelled");
                    return Err(SnapError::Cancelled {
                        shots_fired: progress.shots_fired,
                    });
                }
                trigger
                    .fire()
                    .await
                    .map_err(|e| abort(EndpointKind::Trigger, &e, progress.shots_fired))?;
                progress.shots_fired += 1;
                self.publish(&progress);
                info!(shot, of = step.shots, total = progress.shots_fired, "Shot fired");
                self.pause(SHOT_INTERVAL).await;
            }
            steps_completed += 1;
        }

        let finished_at = Utc::now();
        info!(
            shots = progress.shots_fired,
            elapsed_s = (finished_at - started_at).num_seconds(),
            "Run finished"
        );
        Ok(RunResult {
            steps_completed,
            shots_fired: progress.shots_fired,
            started_at,
            finished_at,
        })
    }

    async fn pause(&self, delay: Duration) {
        let mut cancel = self.cancel_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Ok(_) = cancel.wait_for(|cancelled| *cancelled) => {}
        }
    }

    fn publish(&self, progress: &RunProgress) {
        self.progress_tx.send_replace(progress.clone());
    }
}

fn abort(kind: EndpointKind, e: &anyhow::Error, shots_fired: usize) -> SnapError {
    error!(endpoint = %kind, shots_fired, error = %e, "Run aborted");
    SnapError::Transport {
        kind,
        message: format!("{e:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{BenchCommand, CommandLog, MockSource, MockTrigger};
    use crate::recipe::RecipeStep;

    fn mock_endpoints(log: &CommandLog) -> Endpoints {
        Endpoints {
            source: Box::new(MockSource::new(log.clone())),
            trigger: Box::new(MockTrigger::new(log.clone())),
        }
    }

    fn recipe(steps: &[(&str, u32)]) -> Recipe {
        steps
            .iter()
            .map(|(wl, shots)| RecipeStep::new(*wl, *shots))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn two_steps_follow_the_timing_contract() {
        let log = CommandLog::new();
        let (sequencer, progress) = Sequencer::new(mock_endpoints(&log));
        let start = tokio::time::Instant::now();

        let result = sequencer
            .run(&recipe(&[("500", 2), ("550", 1)]))
            .await
            .unwrap();
        assert_eq!(result.shots_fired, 3);
        assert_eq!(result.steps_completed, 2);

        let entries = log.entries().await;
        let commands: Vec<_> = entries.iter().map(|e| e.command.clone()).collect();
        assert_eq!(
            commands,
            vec![
                BenchCommand::GoWave("500".into()),
                BenchCommand::Trigger,
                BenchCommand::Trigger,
                BenchCommand::GoWave("550".into()),
                BenchCommand::Trigger,
            ]
        );
        let offsets: Vec<u64> = entries
            .iter()
            .map(|e| (e.at - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 5, 15, 25, 30]);
        assert_eq!(start.elapsed().as_secs(), 40);

        let last = progress.borrow().clone();
        assert_eq!(last.shots_fired, 3);
        assert_eq!(last.step, 2);
        assert_eq!(last.wavelength.as_deref(), Some("550"));
    }

    #[tokio::test(start_paused = true)]
    async fn fire_count_equals_total_shots() {
        for steps in [
            vec![("400", 1)],
            vec![("400", 3), ("450", 2), ("500", 4)],
            vec![("700", 1), ("700", 1)],
        ] {
            let log = CommandLog::new();
            let (sequencer, _) = Sequencer::new(mock_endpoints(&log));
            let recipe = recipe(&steps);
            sequencer.run(&recipe).await.unwrap();
            assert_eq!(log.fire_count().await, recipe.total_shots());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_failure_aborts_the_run() {
        let log = CommandLog::new();
        let endpoints = Endpoints {
            source: Box::new(MockSource::new(log.clone())),
            trigger: Box::new(MockTrigger::new(log.clone()).failing_on(1)),
        };
        let (sequencer, _) = Sequencer::new(endpoints);

        let err = sequencer
            .run(&recipe(&[("500", 2), ("550", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SnapError::Transport {
                kind: EndpointKind::Trigger,
                ..
            }
        ));
        // nothing after the failing pulse
        assert_eq!(
            log.commands().await,
            vec![BenchCommand::GoWave("500".into()), BenchCommand::Trigger]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn source_failure_is_tagged() {
        let log = CommandLog::new();
        let endpoints = Endpoints {
            source: Box::new(MockSource::new(log.clone()).failing_on(1)),
            trigger: Box::new(MockTrigger::new(log.clone())),
        };
        let (sequencer, _) = Sequencer::new(endpoints);
        let err = sequencer
            .run(&recipe(&[("500", 1), ("550", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SnapError::Transport {
                kind: EndpointKind::Source,
                ..
            }
        ));
        assert_eq!(log.fire_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_before_next_pulse() {
        let log = CommandLog::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (sequencer, _) = Sequencer::new(mock_endpoints(&log));
        let sequencer = sequencer.with_cancel(cancel_rx);

        let canceller = tokio::spawn(async move {
            // after the first pulse (t=5s), during its interval
            tokio::time::sleep(Duration::from_secs(8)).await;
            cancel_tx.send_replace(true);
        });

        let err = sequencer.run(&recipe(&[("500", 3)])).await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, SnapError::Cancelled { shots_fired: 1 }));
        assert_eq!(log.fire_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_recipe_is_rejected() {
        let log = CommandLog::new();
        let (sequencer, _) = Sequencer::new(mock_endpoints(&log));
        let err = sequencer.run(&Recipe::new()).await.unwrap_err();
        assert!(matches!(err, SnapError::InvalidRecipe(_)));
        assert!(log.commands().await.is_empty());
    }
}
