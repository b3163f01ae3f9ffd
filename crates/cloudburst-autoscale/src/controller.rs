//! ScalingController — owns the scaling state and drives it one tick at a
//! time.
//!
//! Each tick performs at most one step and awaits it to completion, so a
//! second provisioning can never start while one is in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use cloudburst_core::{BurstConfig, InstanceHandle, ScalingState, epoch_secs};
use cloudburst_health::HealthProbe;
use cloudburst_metrics::MetricsSource;
use cloudburst_provision::{
    BackendError, Deprovisioner, ProvisioningBackend, Provisioner, Stage,
};

use crate::breach::{BreachDetector, BreachSignal};

/// Deadline used when `now + cooldown` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The metrics source failed; nothing changed.
    NoData,
    /// Idle, but a new scale-up is not allowed yet.
    CoolingDown { remaining: Duration },
    /// Sampled, no sustained breach.
    Steady,
    ScaledUp { instance: String },
    ScaleUpFailed { stage: Stage },
    /// Scaled, waiting for the cooldown before scaling down.
    Holding { remaining: Duration },
    ScaledDown,
    /// The instance could not be deleted and may be orphaned.
    ScaleDownFailed,
    /// A previous tick was abandoned mid-step.
    Interrupted,
}

pub struct ScalingController<S, B, P> {
    state: ScalingState,
    instance: Option<InstanceHandle>,
    cooldown_deadline: Option<Instant>,
    detector: BreachDetector,
    source: S,
    backend: Arc<B>,
    provisioner: Provisioner<B, P>,
    deprovisioner: Deprovisioner<B>,
    cooldown: Duration,
    cleanup_attempts: u32,
    cleanup_interval: Duration,
    access_rule: Option<String>,
}

impl<S, B, P> ScalingController<S, B, P>
where
    S: MetricsSource,
    B: ProvisioningBackend,
    P: HealthProbe,
{
    pub fn new(config: &BurstConfig, source: S, backend: Arc<B>, probe: P) -> Self {
        Self {
            state: ScalingState::Idle,
            instance: None,
            cooldown_deadline: None,
            detector: BreachDetector::from_config(&config.thresholds),
            source,
            provisioner: Provisioner::new(Arc::clone(&backend), probe, config),
            deprovisioner: Deprovisioner::new(Arc::clone(&backend)),
            backend,
            cooldown: config.controller.cooldown,
            cleanup_attempts: config.controller.cleanup_attempts.max(1),
            cleanup_interval: config.controller.cleanup_interval,
            access_rule: config.access_rule.rule_name(&config.instance.name),
        }
    }

    pub fn state(&self) -> ScalingState {
        self.state
    }

    pub fn instance(&self) -> Option<&InstanceHandle> {
        self.instance.as_ref()
    }

    pub fn cooldown_deadline(&self) -> Option<Instant> {
        self.cooldown_deadline
    }

    /// Adopt an instance left behind by a previous run.
    ///
    /// Looks up the configured instance name. If the backend still has it
    /// the controller starts in `Scaled` with a fresh cooldown, otherwise it
    /// stays `Idle`. Returns whether an instance was adopted.
    pub async fn resync(&mut self) -> Result<bool, BackendError> {
        let name = self.provisioner.instance_name().to_string();
        let Some(desc) = self.backend.describe_instance(&name).await? else {
            info!(instance = %name, "no existing instance, starting idle");
            return Ok(false);
        };

        info!(
            instance = %name,
            status = %desc.status,
            address = desc.external_address.as_deref().unwrap_or("-"),
            "adopting existing instance"
        );
        self.instance = Some(InstanceHandle {
            ready: desc.is_running(),
            external_address: desc.external_address,
            access_rule: self.access_rule.clone(),
            created_at: epoch_secs(),
            name,
        });
        self.state = ScalingState::Scaled;
        self.start_cooldown();
        self.detector.reset();
        Ok(true)
    }

    /// Run one control-loop step.
    pub async fn tick(&mut self) -> TickOutcome {
        match self.state {
            ScalingState::Idle => self.tick_idle().await,
            ScalingState::Scaled => self.tick_scaled().await,
            state @ (ScalingState::Provisioning | ScalingState::Deprovisioning) => {
                warn!(%state, "found a step in flight at tick start");
                TickOutcome::Interrupted
            }
        }
    }

    async fn tick_idle(&mut self) -> TickOutcome {
        if let Some(remaining) = self.cooldown_remaining() {
            self.detector.reset();
            debug!(remaining_secs = remaining.as_secs(), "cooling down");
            return TickOutcome::CoolingDown { remaining };
        }

        let snapshot = match self.source.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "metrics unavailable, skipping cycle");
                return TickOutcome::NoData;
            }
        };
        debug!(
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_percent,
            disk = snapshot.disk_percent,
            "sampled utilization"
        );

        let breaching = self.detector.breaching_metrics(&snapshot);
        match self.detector.evaluate(&snapshot) {
            BreachSignal::Ok => TickOutcome::Steady,
            BreachSignal::Breach => {
                info!(metrics = ?breaching, "sustained breach, scaling up");
                self.scale_up().await
            }
        }
    }

    async fn scale_up(&mut self) -> TickOutcome {
        self.transition(ScalingState::Provisioning);

        match self.provisioner.provision().await {
            Ok(instance) => {
                let name = instance.name.clone();
                self.instance = Some(instance);
                self.transition(ScalingState::Scaled);
                self.start_cooldown();
                TickOutcome::ScaledUp { instance: name }
            }
            Err(failure) => {
                let stage = failure.stage();
                error!(%stage, error = %failure, "scale-up failed");
                if let Some(partial) = failure.partial_instance() {
                    self.cleanup(partial).await;
                }
                self.instance = None;
                self.transition(ScalingState::Idle);
                self.start_cooldown();
                TickOutcome::ScaleUpFailed { stage }
            }
        }
    }

    /// Delete a half-provisioned instance, retrying a bounded number of
    /// times.
    async fn cleanup(&self, instance: &InstanceHandle) {
        for attempt in 1..=self.cleanup_attempts {
            match self.deprovisioner.deprovision(instance).await {
                Ok(()) => {
                    info!(instance = %instance.name, "partial instance cleaned up");
                    return;
                }
                Err(e) => warn!(
                    instance = %instance.name,
                    attempt,
                    max_attempts = self.cleanup_attempts,
                    error = %e,
                    "cleanup failed"
                ),
            }
            if attempt < self.cleanup_attempts {
                tokio::time::sleep(self.cleanup_interval).await;
            }
        }
        error!(instance = %instance.name, "cleanup gave up, instance may be orphaned");
    }

    async fn tick_scaled(&mut self) -> TickOutcome {
        if let Some(remaining) = self.cooldown_remaining() {
            debug!(remaining_secs = remaining.as_secs(), "holding scaled instance");
            return TickOutcome::Holding { remaining };
        }

        info!("cooldown elapsed, scaling down");
        self.transition(ScalingState::Deprovisioning);

        let result = match &self.instance {
            Some(instance) => self.deprovisioner.deprovision(instance).await,
            None => {
                warn!("scaled without an instance handle");
                Ok(())
            }
        };

        self.instance = None;
        self.transition(ScalingState::Idle);
        self.start_cooldown();

        match result {
            Ok(()) => TickOutcome::ScaledDown,
            Err(e) => {
                error!(error = %e, "scale-down failed, instance may be orphaned");
                TickOutcome::ScaleDownFailed
            }
        }
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let deadline = self.cooldown_deadline?;
        let now = Instant::now();
        (now < deadline).then(|| deadline - now)
    }

    /// Push the deadline to `now + cooldown`, saturating far in the future.
    fn start_cooldown(&mut self) {
        let now = Instant::now();
        let deadline = now
            .checked_add(self.cooldown)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        self.cooldown_deadline = Some(deadline);
    }

    fn transition(&mut self, next: ScalingState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "unexpected state transition");
        }
        info!(from = %self.state, to = %next, "state transition");
        self.state = next;
        debug_assert!(self.state.holds_instance() || self.instance.is_none());
    }

    /// Tick every `interval` until `shutdown` fires.
    ///
    /// Shutdown is only observed between ticks; a tick that has started
    /// always completes.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            cooldown_secs = self.cooldown.as_secs(),
            state = %self.state,
            "scaling controller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let outcome = self.tick().await;
            debug!(?outcome, state = %self.state, "tick complete");

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(state = %self.state, "scaling controller shutting down");
        if let Some(instance) = &self.instance {
            warn!(instance = %instance.name, "leaving instance running; it will be adopted on restart");
        }
    }
}
