//! Background sweep of the consumed ad-token set.
//!
//! Spawns a tokio task that wakes every [`SWEEP_INTERVAL`] and drops consumed
//! tokens older than the expiry window, which bounds the set to roughly the
//! tokens seen in one interval plus one window.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ad_token::{now_millis, ConsumedTokens};

/// Production sweep cadence: every 5 minutes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Handle for the background sweep task.
///
/// Stops the task on `shutdown()` or when dropped.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Request the task to stop. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::debug!("Token sweeper shutdown signal sent");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start the periodic sweep. Must be called inside a tokio runtime.
pub fn start_token_sweeper(
    tokens: Arc<Mutex<ConsumedTokens>>,
    interval: Duration,
) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Token sweeper started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; nothing to sweep at startup
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    sweep_once(&tokens, now_millis());
                }
            }
        }

        tracing::info!("Token sweeper stopped");
    });

    SweeperHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

/// Run one sweep cycle against the shared set. Returns the removed count.
pub fn sweep_once(tokens: &Mutex<ConsumedTokens>, now_millis: i64) -> usize {
    let (removed, remaining) = match tokens.lock() {
        Ok(mut set) => {
            let removed = set.sweep(now_millis);
            (removed, set.len())
        }
        Err(_) => {
            tracing::error!("Consumed token set lock poisoned, sweep skipped");
            return 0;
        }
    };

    if removed > 0 {
        tracing::info!(removed, remaining, "Cleaned up expired ad tokens");
    }
    removed
}
