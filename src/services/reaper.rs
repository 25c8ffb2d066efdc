//! Abandoned-entry reaper.
//!
//! Scheduled sweep reclaiming state the forward flow failed to clean up:
//! expired holds, stale drafts, holds orphaned by dead registrations. Three
//! independent steps; a failure in one is logged and the others still run,
//! so a partial failure is safe to re-run. Single-writer by assumption.

use std::sync::Arc;

use chrono::{Datelike, Duration};
use tracing::{info, warn};

use crate::repository::{CouponRepository, RegistrationRepository, ReservationRepository};
use crate::services::Clock;

pub const DEFAULT_DRAFT_TTL_HOURS: i64 = 24;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReaperReport {
    pub expired_reservations: u64,
    pub abandoned_registrations: u64,
    pub released_reservations: u64,
}

pub struct Reaper<C, R, G> {
    coupons: C,
    reservations: R,
    registrations: G,
    clock: Arc<dyn Clock>,
    draft_ttl: Duration,
}

impl<C, R, G> Reaper<C, R, G>
where
    C: CouponRepository,
    R: ReservationRepository,
    G: RegistrationRepository,
{
    pub fn new(
        coupons: C,
        reservations: R,
        registrations: G,
        clock: Arc<dyn Clock>,
        draft_ttl: Duration,
    ) -> Self {
        Self {
            coupons,
            reservations,
            registrations,
            clock,
            draft_ttl,
        }
    }

    /// One sweep. Counts per step; a failed step reports zero for itself.
    pub async fn run(&self) -> ReaperReport {
        let now = self.clock.now();
        let mut report = ReaperReport::default();

        match self.reservations.expire_due(now).await {
            Ok(count) => report.expired_reservations = count,
            Err(e) => warn!(error = %e, "reaper: expiring due reservations failed"),
        }

        match self
            .registrations
            .abandon_stale(now - self.draft_ttl, now)
            .await
        {
            Ok(count) => report.abandoned_registrations = count,
            Err(e) => warn!(error = %e, "reaper: abandoning stale registrations failed"),
        }

        match self.reservations.release_for_dead_registrations(now).await {
            Ok(count) => report.released_reservations = count,
            Err(e) => warn!(error = %e, "reaper: releasing orphaned reservations failed"),
        }

        if report != ReaperReport::default() {
            info!(
                expired_reservations = report.expired_reservations,
                abandoned_registrations = report.abandoned_registrations,
                released_reservations = report.released_reservations,
                "reaper sweep finished"
            );
        }
        report
    }

    /// Year-rollover job: deactivate coupons whose expiry year has passed.
    pub async fn run_year_rollover(&self) -> u64 {
        let now = self.clock.now();
        match self.coupons.deactivate_expired_years(now.year(), now).await {
            Ok(count) => {
                if count > 0 {
                    info!(deactivated = count, "year rollover deactivated expired coupons");
                }
                count
            }
            Err(e) => {
                warn!(error = %e, "year rollover failed");
                0
            }
        }
    }
}
