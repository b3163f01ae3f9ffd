//! Wiring for `burstd run`: build the controller, resync, loop until
//! Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cloudburst_autoscale::ScalingController;
use cloudburst_core::BurstConfig;
use cloudburst_health::HttpProbe;
use cloudburst_metrics::ConfiguredSource;
use cloudburst_provision::{GcloudBackend, InMemoryBackend, ProvisioningBackend};

pub async fn run(config: BurstConfig, dry_run: bool) -> anyhow::Result<()> {
    let source = ConfiguredSource::from_config(&config.metrics)
        .context("failed to set up metrics source")?;
    let probe = HttpProbe::new(config.readiness.timeout);

    if dry_run {
        // The "remote" instance resolves to this host, so readiness probes
        // hit the local workload.
        info!("dry run, provisioning against an in-memory backend");
        let backend = InMemoryBackend::new().with_address("127.0.0.1");
        drive(config, source, backend, probe).await
    } else {
        let backend = GcloudBackend::new(&config.instance, &config.deploy);
        drive(config, source, backend, probe).await
    }
}

async fn drive<B>(
    config: BurstConfig,
    source: ConfiguredSource,
    backend: B,
    probe: HttpProbe,
) -> anyhow::Result<()>
where
    B: ProvisioningBackend + 'static,
{
    info!(
        instance = %config.instance.name,
        zone = %config.instance.zone,
        metrics = ?config.metrics.backend,
        "cloudburst daemon starting"
    );

    let mut controller = ScalingController::new(&config, source, Arc::new(backend), probe);
    match controller.resync().await {
        Ok(true) => info!(state = %controller.state(), "resumed with existing instance"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "could not check for an existing instance, starting idle"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = config.controller.poll_interval;
    let handle = tokio::spawn(async move {
        controller.run(interval, shutdown_rx).await;
    });

    supervise(handle, shutdown_tx, tokio::signal::ctrl_c()).await?;
    info!("cloudburst daemon stopped");
    Ok(())
}

/// Wait for `signal` or for the controller task to end on its own.
///
/// The controller only returns after shutdown is requested, so an early exit
/// (including a panic) is an error.
async fn supervise(
    mut handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    signal: impl Future<Output = std::io::Result<()>>,
) -> anyhow::Result<()> {
    tokio::select! {
        res = signal => {
            match res {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(error = %e, "failed to listen for Ctrl-C, shutting down"),
            }
            let _ = shutdown_tx.send(true);
            handle.await.context("controller task failed")
        }
        res = &mut handle => {
            error!("controller stopped unexpectedly");
            res.context("controller task panicked")?;
            anyhow::bail!("controller stopped unexpectedly")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn panicked_controller_is_an_error() {
        let (tx, _rx) = watch::channel(false);
        let handle: JoinHandle<()> = tokio::spawn(async { panic!("cooldown overflow") });

        let err = supervise(handle, tx, std::future::pending()).await.unwrap_err();
        assert!(format!("{err:#}").contains("controller task panicked"));
    }

    #[tokio::test]
    async fn controller_exiting_early_is_an_error() {
        let (tx, _rx) = watch::channel(false);
        let handle = tokio::spawn(async {});

        let err = supervise(handle, tx, std::future::pending()).await.unwrap_err();
        assert!(err.to_string().contains("stopped unexpectedly"));
    }

    #[tokio::test(start_paused = true)]
    async fn signal_stops_controller() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let _ = rx.wait_for(|stop| *stop).await;
        });
        let signal = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };

        supervise(handle, tx, signal).await.unwrap();
    }
}
