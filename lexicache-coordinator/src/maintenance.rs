//! Background cache maintenance.
//!
//! Expired envelopes are never deleted at read time; a periodic prune
//! task walks the backend in bounded batches and removes entries past
//! their per-category age thresholds. The task runs until its shutdown
//! signal flips and returns the metrics it collected.

use crate::constants::DEFAULT_PRUNE_INTERVAL_SECS;
use lexicache_storage::{CacheStore, PrunePolicy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for the background prune task.
#[derive(Debug, Clone)]
pub struct PruneTaskConfig {
    /// How often a prune pass runs (default: 1 hour).
    pub interval: Duration,

    /// Age thresholds and batch bound for each pass.
    pub policy: PrunePolicy,
}

impl Default for PruneTaskConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_PRUNE_INTERVAL_SECS),
            policy: PrunePolicy::default(),
        }
    }
}

impl PruneTaskConfig {
    /// Create a PruneTaskConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEXICACHE_PRUNE_INTERVAL_SECS`: Seconds between passes (default: 3600)
    pub fn from_env() -> Self {
        let interval = Duration::from_secs(
            std::env::var("LEXICACHE_PRUNE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PRUNE_INTERVAL_SECS),
        );

        Self {
            interval,
            policy: PrunePolicy::default(),
        }
    }

    /// Configuration for development/testing with a short interval.
    pub fn development() -> Self {
        Self {
            interval: Duration::from_secs(5),
            policy: PrunePolicy::default(),
        }
    }
}

// =============================================================================
// METRICS
// =============================================================================

/// Counters for prune task activity.
#[derive(Debug, Default)]
pub struct PruneMetrics {
    /// Prune passes completed since startup.
    pub passes: AtomicU64,

    /// Entries deleted across all passes.
    pub entries_deleted: AtomicU64,

    /// Passes that ended with a backend error.
    pub errors: AtomicU64,
}

impl PruneMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of all counters.
    pub fn snapshot(&self) -> PruneSnapshot {
        PruneSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            entries_deleted: self.entries_deleted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of prune metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneSnapshot {
    pub passes: u64,
    pub entries_deleted: u64,
    pub errors: u64,
}

// =============================================================================
// BACKGROUND TASK
// =============================================================================

/// Periodically prune the cache until shutdown is signalled.
///
/// Missed ticks are skipped rather than queued, so a slow pass never
/// causes a burst of catch-up passes.
pub async fn prune_task(
    store: CacheStore,
    config: PruneTaskConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<PruneMetrics> {
    let metrics = Arc::new(PruneMetrics::new());

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        batch_size = config.policy.batch_size,
        "Prune task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Prune task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                prune_once(&store, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        passes = snapshot.passes,
        entries_deleted = snapshot.entries_deleted,
        errors = snapshot.errors,
        "Prune task completed"
    );

    metrics
}

/// Run a single prune pass and record its outcome.
async fn prune_once(store: &CacheStore, config: &PruneTaskConfig, metrics: &PruneMetrics) {
    metrics.passes.fetch_add(1, Ordering::Relaxed);

    match store.prune(&config.policy).await {
        Ok(report) => {
            let deleted = report.deleted.total();
            if deleted > 0 {
                metrics
                    .entries_deleted
                    .fetch_add(deleted, Ordering::Relaxed);
                tracing::info!(
                    scanned = report.scanned,
                    deleted,
                    truncated = report.truncated,
                    "Prune pass completed"
                );
            } else {
                tracing::trace!(scanned = report.scanned, "Prune pass found nothing to delete");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Prune pass failed");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
