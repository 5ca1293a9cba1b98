//! Health verifier: periodic license and session re-validation.
//!
//! Probes one worker per tick, round-robin over a fresh pool snapshot. A
//! probe checks the owner's license entitlement first, then asks the
//! purchase API for the marketplace's test product. Failures go through the
//! worker's regular failure path, so evicting kinds remove the worker. A probe
//! that never got a response decides nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dropfleet_domain::TierPolicy;
use dropfleet_engine::{ErrorKind, Failure};
use dropfleet_exec::{LicenseAuthority, Worker};

use crate::pool::WorkerPool;

/// Result of verifying one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    /// License valid and probe passed
    Healthy,
    /// Failure path ran; the worker may have been evicted
    Failed,
    /// Nothing decided this round (authority or purchase API unreachable)
    Skipped,
}

/// Round-robin health verifier.
pub struct HealthVerifier {
    pool: Arc<WorkerPool>,
    license: Arc<dyn LicenseAuthority>,
    tiers: TierPolicy,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl HealthVerifier {
    /// Create a new verifier.
    pub fn new(
        pool: Arc<WorkerPool>,
        license: Arc<dyn LicenseAuthority>,
        tiers: TierPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            license,
            tiers,
            interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the background loop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the verifier in the background.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "Health verifier started");
            let mut index = 0usize;

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        info!("Health verifier received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        index = self.tick(index).await;
                    }
                }
            }

            info!("Health verifier stopped");
        })
    }

    /// Verify the worker at `index` (wrapped) and return the next index.
    pub async fn tick(&self, index: usize) -> usize {
        let workers = self.pool.snapshot();
        if workers.is_empty() {
            warn!("No accounts to health check");
            return 0;
        }

        let worker = &workers[index % workers.len()];
        self.verify(worker).await;
        (index + 1) % workers.len()
    }

    /// License check, then purchase API probe.
    pub async fn verify(&self, worker: &Arc<Worker>) -> HealthOutcome {
        match self.check_license(worker).await {
            HealthOutcome::Healthy => {},
            other => return other,
        }

        match worker.check_health().await {
            Ok(true) => HealthOutcome::Healthy,
            Ok(false) => HealthOutcome::Failed,
            Err(e) if e.is_interruption() => {
                debug!(account = %worker.key(), error = %e, "Health probe interrupted");
                worker.rotate_identity();
                HealthOutcome::Skipped
            },
            Err(e) => {
                error!(account = %worker.key(), error = %e, "Error while performing health check");
                HealthOutcome::Skipped
            },
        }
    }

    async fn check_license(&self, worker: &Arc<Worker>) -> HealthOutcome {
        let entitlement = match self.license.entitlement(worker.license_key()).await {
            Ok(Some(entitlement)) => entitlement,
            Ok(None) => {
                warn!(account = %worker.key(), "License not found");
                worker.fail(&Failure::local(ErrorKind::InvalidLicense)).await;
                return HealthOutcome::Failed;
            },
            Err(e) => {
                error!(account = %worker.key(), error = %e, "Error while performing health check");
                return HealthOutcome::Skipped;
            },
        };

        let tier = self.tiers.tier_of(&worker.subscriptions());
        let count = self
            .pool
            .workers_for_owner(worker.owner())
            .iter()
            .filter(|w| self.tiers.tier_of(&w.subscriptions()) == tier)
            .count();

        if entitlement.is_exceeded(tier, count) {
            warn!(
                account = %worker.key(),
                ?tier,
                allowed = entitlement.limit(tier),
                found = count,
                "License allowance exceeded"
            );
            worker.fail(&Failure::local(ErrorKind::InvalidLicense)).await;
            return HealthOutcome::Failed;
        }

        HealthOutcome::Healthy
    }
}

// =============================================================================
// Tests
// =============================================================================
