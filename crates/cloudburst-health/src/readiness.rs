//! Bounded readiness polling.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::checker::HealthProbe;

/// How hard to try before declaring a workload not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub attempts: u32,
    /// Delay between consecutive probes.
    pub interval: Duration,
}

/// The workload never answered 200 within the policy's attempts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{address}{path} not ready after {attempts} attempts")]
pub struct ReadinessTimeout {
    pub address: String,
    pub path: String,
    pub attempts: u32,
}

/// Probe `address` until it reports healthy or the attempts run out.
///
/// Returns the 1-based attempt that succeeded. Sleeps `policy.interval`
/// between attempts, never after the last one.
pub async fn wait_until_ready<P: HealthProbe>(
    probe: &P,
    address: &str,
    path: &str,
    policy: ReadinessPolicy,
) -> Result<u32, ReadinessTimeout> {
    for attempt in 1..=policy.attempts {
        let result = probe.probe(address, path).await;
        if result.is_healthy() {
            info!(%address, attempt, "workload ready");
            return Ok(attempt);
        }

        debug!(
            %address,
            attempt,
            max_attempts = policy.attempts,
            ?result,
            "waiting for workload to start"
        );

        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(ReadinessTimeout {
        address: address.to_string(),
        path: path.to_string(),
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::ProbeResult;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays a fixed script of results, then repeats the last one.
    struct ScriptedProbe {
        script: Mutex<Vec<ProbeResult>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedProbe {
        fn new(mut script: Vec<ProbeResult>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, _address: &str, _path: &str) -> ProbeResult {
            self.calls.lock().unwrap().push(Instant::now());
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop().unwrap()
            } else {
                script.last().copied().unwrap_or(ProbeResult::Failed)
            }
        }
    }

    fn policy(attempts: u32, secs: u64) -> ReadinessPolicy {
        ReadinessPolicy {
            attempts,
            interval: Duration::from_secs(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_attempt() {
        let probe = ScriptedProbe::new(vec![ProbeResult::Healthy]);
        let attempt = wait_until_ready(&probe, "10.0.0.5:5000", "/", policy(3, 5))
            .await
            .unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(probe.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_after_misses() {
        let probe = ScriptedProbe::new(vec![
            ProbeResult::Failed,
            ProbeResult::Unhealthy,
            ProbeResult::Healthy,
        ]);
        let attempt = wait_until_ready(&probe, "10.0.0.5:5000", "/", policy(5, 5))
            .await
            .unwrap();
        assert_eq!(attempt, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out_after_bounded_attempts() {
        let probe = ScriptedProbe::new(vec![ProbeResult::Unhealthy]);
        let start = Instant::now();

        let err = wait_until_ready(&probe, "10.0.0.5:5000", "/api/metrics", policy(3, 5))
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.address, "10.0.0.5:5000");
        let calls = probe.call_times();
        assert_eq!(calls.len(), 3);
        // Probes 5s apart, no trailing sleep after the last miss.
        assert_eq!(calls[1] - calls[0], Duration::from_secs(5));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(5));
        assert_eq!(Instant::now() - start, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_fails_without_probing() {
        let probe = ScriptedProbe::new(vec![ProbeResult::Healthy]);
        let err = wait_until_ready(&probe, "h:1", "/", policy(0, 5)).await.unwrap_err();
        assert_eq!(err.attempts, 0);
        assert!(probe.call_times().is_empty());
    }
}
