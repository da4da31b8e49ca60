//! Background refresh timer for a `TelemetryViewModel`.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::view_model::TelemetryViewModel;

// ---

/// Handle to a running poll loop. Dropping it cancels the loop.
pub struct Poller {
    handle: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
    period: Duration,
}

impl Poller {
    // ---
    /// Spawn a loop calling `refresh()` every `period`, first tick one period
    /// from now. Only a weak reference is held, so the loop ends on its own
    /// once the view model is gone.
    pub fn spawn(target: Weak<TelemetryViewModel>, period: Duration) -> Self {
        // ---
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        // Measured here, not when the task first runs
        let first_tick = Instant::now() + period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_ms = period.as_millis() as u64, "Polling started");

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        debug!("Polling received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(view_model) = target.upgrade() else {
                            debug!("View model dropped, polling ends");
                            break;
                        };
                        let outcome = view_model.refresh().await;
                        debug!(?outcome, "Poll tick complete");
                    }
                }
            }
            info!("Polling stopped");
        });

        Poller {
            handle,
            shutdown: Some(shutdown_tx),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Signal the loop and abort whatever refresh it is awaiting.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
