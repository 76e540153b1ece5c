//! Periodic pruning of the history database.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use netmend_state::{HistoryStore, epoch_secs};

pub const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Delete history older than `retention` every `interval` until shutdown.
pub async fn run_retention(
    history: HistoryStore,
    retention: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let cutoff = epoch_secs().saturating_sub(retention.as_secs());
        match history.prune_before(cutoff) {
            Ok(0) => debug!(cutoff, "retention sweep found nothing to prune"),
            Ok(removed) => info!(removed, cutoff, "pruned expired history"),
            Err(e) => warn!(error = %e, "retention sweep failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!("retention task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmend_state::{DeviceStatus, ProbeSample};

    #[tokio::test]
    async fn sweep_prunes_then_stops() {
        let history = HistoryStore::open_in_memory().unwrap();
        let status = DeviceStatus::new("10.0.0.1", "pc", "lab_1");
        let now = epoch_secs();
        history.record_probe(&ProbeSample::from_status(&status, now - 7200)).unwrap();
        history.record_probe(&ProbeSample::from_status(&status, now)).unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_retention(
            history.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        let remaining = history.list_probe_samples("10.0.0.1", 0, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].timestamp, now);
    }
}
