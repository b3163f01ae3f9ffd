//! Breach detection with hysteresis.
//!
//! A single over-threshold sample never triggers scaling. The detector
//! remembers when the current run of breaching samples started and signals
//! once that run has lasted for the sustain period. Any sample back under
//! threshold ends the run.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use cloudburst_core::config::ThresholdsConfig;
use cloudburst_core::{Metric, MetricsSnapshot};

/// Result of evaluating one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachSignal {
    Ok,
    /// The breach has been sustained; scale up.
    Breach,
}

/// The current run of over-threshold samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreachWindow {
    pub first_breach_at: Option<Instant>,
}

impl BreachWindow {
    pub fn is_open(&self) -> bool {
        self.first_breach_at.is_some()
    }

    fn clear(&mut self) {
        self.first_breach_at = None;
    }
}

#[derive(Debug, Clone)]
pub struct BreachDetector {
    limits: Vec<(Metric, f64)>,
    sustain: Duration,
    window: BreachWindow,
    /// Set once the current run has signalled; cleared by a calm sample.
    signalled: bool,
}

impl BreachDetector {
    /// Detector over `(metric, limit)` pairs; untracked metrics are absent.
    pub fn new(limits: Vec<(Metric, f64)>, sustain: Duration) -> Self {
        Self {
            limits,
            sustain,
            window: BreachWindow::default(),
            signalled: false,
        }
    }

    pub fn from_config(config: &ThresholdsConfig) -> Self {
        let limits = Metric::ALL
            .into_iter()
            .filter_map(|m| config.limit(m).map(|limit| (m, limit)))
            .collect();
        Self::new(limits, config.sustain)
    }

    pub fn window(&self) -> BreachWindow {
        self.window
    }

    /// Tracked metrics strictly above their limit in `snapshot`.
    pub fn breaching_metrics(&self, snapshot: &MetricsSnapshot) -> Vec<Metric> {
        self.limits
            .iter()
            .filter(|(metric, limit)| snapshot.value(*metric) > *limit)
            .map(|(metric, _)| *metric)
            .collect()
    }

    pub fn evaluate(&mut self, snapshot: &MetricsSnapshot) -> BreachSignal {
        if self.breaching_metrics(snapshot).is_empty() {
            if self.window.is_open() || self.signalled {
                debug!("utilization back under threshold, breach window cleared");
            }
            self.reset();
            return BreachSignal::Ok;
        }

        if self.signalled {
            return BreachSignal::Ok;
        }

        let started = *self
            .window
            .first_breach_at
            .get_or_insert(snapshot.observed_at);
        let elapsed = snapshot.observed_at.saturating_duration_since(started);

        if elapsed >= self.sustain {
            self.window.clear();
            self.signalled = true;
            return BreachSignal::Breach;
        }

        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            sustain_ms = self.sustain.as_millis() as u64,
            "breach window open"
        );
        BreachSignal::Ok
    }

    /// Forget any open window and re-arm the detector.
    pub fn reset(&mut self) {
        self.window.clear();
        self.signalled = false;
    }
}
