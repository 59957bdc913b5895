use crate::clock::Clock;
use crate::sync::models::{SyncOutcome, SyncTrigger};
use crate::sync::service::SyncService;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Upper bound on how far a DST gap can push the target forward.
const MAX_GAP_MINUTES: i64 = 3 * 60;

/// Background scheduler for the daily sync pass.
///
/// Fires once per local day at `daily_at`. A missed or failed day is not retried;
/// the next day's run picks up from the stored cursor.
pub struct DailySyncScheduler {
    service: SyncService,
    clock: Arc<dyn Clock>,
    daily_at: NaiveTime,
}

impl DailySyncScheduler {
    #[tracing::instrument(level = "debug", skip(service, clock))]
    pub fn new(service: SyncService, clock: Arc<dyn Clock>, daily_at: NaiveTime) -> Self {
        Self {
            service,
            clock,
            daily_at,
        }
    }

    /// Run until `cancel` fires. Sleeping is the only thing interrupted; a pass that
    /// already started observes the same token between pages.
    #[tracing::instrument(level = "info", skip(self, cancel), fields(daily_at = %self.daily_at))]
    pub async fn run(&self, cancel: CancellationToken) {
        let mut previous: Option<DateTime<chrono::Local>> = None;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let now = self.clock.now().with_timezone(&chrono::Local);
            // Never schedule at or before the target that just fired.
            let from = match previous {
                Some(prev) if prev >= now => prev,
                _ => now,
            };
            let next = next_daily_run(&from, self.daily_at);
            let wait = next
                .signed_duration_since(now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tracing::info!(
                next_run_at = %next.to_rfc3339(),
                wait_secs = wait.as_secs(),
                "next sync scheduled"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            previous = Some(next);
            self.tick(&cancel).await;
        }
        tracing::info!("sync scheduler stopped");
    }

    /// One scheduled attempt through the gate. The outcome is logged, never propagated.
    #[tracing::instrument(level = "debug", skip(self, cancel))]
    pub async fn tick(&self, cancel: &CancellationToken) -> SyncOutcome {
        let outcome = self.service.trigger(SyncTrigger::Scheduled, cancel).await;
        if !outcome.succeeded {
            tracing::warn!(error = ?outcome.error, "scheduled sync pass failed");
        } else if outcome.skipped {
            tracing::info!(reason = ?outcome.error, "scheduled sync pass skipped");
        } else {
            tracing::info!(
                items_fetched = outcome.items_fetched,
                items_upserted = outcome.items_upserted,
                "scheduled sync pass finished"
            );
        }
        outcome
    }
}

/// First occurrence of local wall-clock `at` strictly after `now`.
///
/// Today's target if it is still ahead, otherwise tomorrow's. A target inside a DST gap
/// moves forward to the first valid local time; a repeated local time takes the earlier
/// instant.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    // Two days covers "today is past" plus one DST-skipped candidate.
    for _ in 0..3 {
        if let Some(candidate) = resolve_local(&tz, date, at) {
            if candidate > *now {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(d) => date = d,
            None => break,
        }
    }
    now.clone() + Duration::days(1)
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, date: NaiveDate, at: NaiveTime) -> Option<DateTime<Tz>> {
    let target = date.and_time(at);
    match tz.from_local_datetime(&target) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => (1..=MAX_GAP_MINUTES).find_map(|m| {
            match tz.from_local_datetime(&(target + Duration::minutes(m))) {
                LocalResult::Single(t) => Some(t),
                LocalResult::Ambiguous(earliest, _) => Some(earliest),
                LocalResult::None => None,
            }
        }),
    }
}
