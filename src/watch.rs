//! Scheduler: drives one observe → diff → persist → notify cycle per tick,
//! inside an operating window, with runs strictly serialized.

use crate::actions::ActionRegistry;
use crate::collector::{Collector, CollectorError};
use crate::config::Config;
use crate::db::{self, Pool};
use crate::diff;
use crate::fanout;
use crate::messenger::Messenger;
use crate::model::{Item, RunSummary};
use anyhow::{anyhow, Context, Result};
use chrono::{Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

type ObserveHandle = JoinHandle<Result<Vec<Item>, CollectorError>>;

pub struct Watcher {
    pool: Pool,
    collector: Arc<dyn Collector>,
    messenger: Arc<dyn Messenger>,
    registry: Arc<Mutex<ActionRegistry>>,
    tz: Tz,
    start_hour: u32,
    end_hour: u32,
    period: Duration,
    send_delay: Duration,
    observe_timeout: Duration,
    run_guard: Mutex<()>,
    // A timed-out observation worker cannot be cancelled; its handle is
    // parked here so no second observation starts while it drains.
    abandoned: Mutex<Option<ObserveHandle>>,
}

impl Watcher {
    pub fn new(
        pool: Pool,
        collector: Arc<dyn Collector>,
        messenger: Arc<dyn Messenger>,
        registry: Arc<Mutex<ActionRegistry>>,
        cfg: &Config,
    ) -> Result<Self> {
        let tz: Tz = cfg
            .window
            .timezone
            .parse()
            .map_err(|_| anyhow!("invalid time zone {}", cfg.window.timezone))?;
        Ok(Self {
            pool,
            collector,
            messenger,
            registry,
            tz,
            start_hour: cfg.window.start_hour,
            end_hour: cfg.window.end_hour,
            period: Duration::from_secs(cfg.app.scrape_interval_secs),
            send_delay: Duration::from_millis(cfg.app.send_delay_ms),
            observe_timeout: Duration::from_secs(cfg.collector.observe_timeout_secs),
            run_guard: Mutex::new(()),
            abandoned: Mutex::new(None),
        })
    }

    /// Scheduler loop; never returns. A failed run yields to the next tick.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One scheduled tick: operating-window check, run serialization, error
    /// reporting. Outside the window the tick is a silent no-op.
    pub async fn tick(&self) {
        let local_hour = Utc::now().with_timezone(&self.tz).hour();
        if !within_window(local_hour, self.start_hour, self.end_hour) {
            debug!(local_hour, "outside operating window; skipping run");
            return;
        }

        // A tick firing while a run is still in flight is dropped, never
        // queued. An abandoned observation worker counts as a run in flight.
        let Ok(_guard) = self.run_guard.try_lock() else {
            info!("previous run still in progress; dropping tick");
            return;
        };
        if self.observation_in_flight().await {
            info!("timed-out observation still draining; dropping tick");
            return;
        }

        match self.run_once().await {
            Ok(summary) => {
                info!(observed = summary.observed, new = summary.new, "run completed")
            }
            Err(err) => {
                error!(?err, "run failed");
                if let Err(notice_err) = self
                    .messenger
                    .notice(&format!("Watch run failed: {err:#}"))
                    .await
                {
                    error!(?notice_err, "failed to report run failure to the channel");
                }
            }
        }
    }

    /// One full observe → diff → persist → notify cycle.
    ///
    /// Observation runs on the blocking pool; the worker owns its inputs and
    /// hands back pure data, so no store or bot handle crosses the boundary.
    /// Any observation failure aborts before a store is touched — the next
    /// successful run diffs against an intact snapshot.
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> Result<RunSummary> {
        if self.observation_in_flight().await {
            return Err(anyhow!("a timed-out observation is still in flight"));
        }

        let collector = Arc::clone(&self.collector);
        let mut worker = tokio::task::spawn_blocking(move || collector.observe());
        let observed = match tokio::time::timeout(self.observe_timeout, &mut worker).await {
            Ok(joined) => joined
                .context("observation worker panicked")?
                .context("observation failed")?,
            Err(_) => {
                *self.abandoned.lock().await = Some(worker);
                return Err(anyhow!(
                    "observation timed out after {}s",
                    self.observe_timeout.as_secs()
                ));
            }
        };

        let existing = db::snapshot_ids(&self.pool).await?;
        let new_items = diff::compute_new(&observed, &existing);

        // Catalog append is best-effort; the snapshot replace is the gate
        // for notification.
        if let Err(err) = db::append_catalog(&self.pool, &observed).await {
            error!(?err, "failed to append to the all-time catalog");
        }
        db::replace_snapshot(&self.pool, &observed)
            .await
            .context("failed to replace snapshot")?;

        fanout::notify_new_items(
            &self.pool,
            self.messenger.as_ref(),
            &self.registry,
            &new_items,
            self.send_delay,
        )
        .await?;

        Ok(RunSummary {
            observed: observed.len(),
            new: new_items.len(),
        })
    }

    /// True while a timed-out observation worker is still running. A finished
    /// handle is reaped and its stale result discarded; the run that started
    /// it has already reported failure.
    async fn observation_in_flight(&self) -> bool {
        let mut abandoned = self.abandoned.lock().await;
        match abandoned.as_ref() {
            Some(handle) if !handle.is_finished() => true,
            Some(_) => {
                warn!("abandoned observation worker finished; discarding its result");
                *abandoned = None;
                false
            }
            None => false,
        }
    }
}

/// True when `hour` falls inside `[start, end)`. `start > end` wraps past
/// midnight.
pub fn within_window(hour: u32, start: u32, end: u32) -> bool {
    if start < end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daytime_window() {
        assert!(!within_window(7, 8, 17));
        assert!(within_window(8, 8, 17));
        assert!(within_window(16, 8, 17));
        assert!(!within_window(17, 8, 17));
        assert!(!within_window(23, 8, 17));
    }

    #[test]
    fn overnight_window_wraps_past_midnight() {
        assert!(within_window(22, 22, 6));
        assert!(within_window(23, 22, 6));
        assert!(within_window(0, 22, 6));
        assert!(within_window(5, 22, 6));
        assert!(!within_window(6, 22, 6));
        assert!(!within_window(12, 22, 6));
    }

    #[test]
    fn full_day_window() {
        for hour in 0..24 {
            assert!(within_window(hour, 0, 24));
        }
    }
}
