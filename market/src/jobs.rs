//! Background jobs: the unassigned-order watchdog, the scheduled-order
//! initiator and the daily template materializer.
//!
//! Each job exposes a `run_once` (the unit the tests drive) and a `run`
//! loop the scheduler binary spawns. A failed pass is logged and the loop
//! carries on; one bad template or order never stalls the cadence.

use std::time::Duration;

use chrono::{Timelike, Utc};
use log::{error, info, warn};

use crate::error::MarketResult;
use crate::lifecycle::Lifecycle;
use crate::model::{
    OrderStatus, SCHEDULED_ACTIVATION_SECS, SM_ASSIGN_TIMEOUT_SECS,
};
use crate::notify::dispatch_status_update;

/// Declines `processing` orders nobody accepted within the assignment
/// window and tells their owners.
pub struct Watchdog {
    lifecycle: Lifecycle,
    interval: Duration,
}

impl Watchdog {
    pub fn new(lifecycle: Lifecycle, interval_secs: u64) -> Self {
        Self {
            lifecycle,
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub async fn run_once(&self) -> MarketResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(SM_ASSIGN_TIMEOUT_SECS);
        let declined = self.lifecycle.orders().decline_overdue(cutoff).await?;
        for (order_id, user_id) in &declined {
            warn!("order {order_id} declined: no staff accepted in time");
            dispatch_status_update(
                self.lifecycle.notifier(),
                *user_id,
                *order_id,
                OrderStatus::Declined,
            );
        }
        Ok(declined.len())
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!("watchdog pass failed: {e}");
            }
        }
    }
}

/// Moves materialized `scheduled` orders into `processing` once their
/// delivery time comes within the activation window, and fans each out to
/// nearby staff.
pub struct Initiator {
    lifecycle: Lifecycle,
    interval: Duration,
}

impl Initiator {
    pub fn new(lifecycle: Lifecycle, interval_secs: u64) -> Self {
        Self {
            lifecycle,
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub async fn run_once(&self) -> MarketResult<usize> {
        let horizon = Utc::now() + chrono::Duration::seconds(SCHEDULED_ACTIVATION_SECS);
        let due = self.lifecycle.orders().scheduled_due(horizon).await?;
        let mut activated = 0;
        for (order_id, user_id, address_id, mode) in due {
            if !self
                .lifecycle
                .orders()
                .try_activate(order_id, user_id)
                .await?
            {
                warn!("scheduled order {order_id} vanished before activation");
                continue;
            }
            activated += 1;
            info!("scheduled order {order_id} activated");

            let lifecycle = self.lifecycle.clone();
            tokio::spawn(async move {
                if let Err(e) = lifecycle
                    .find_and_ping(mode, user_id, address_id, order_id)
                    .await
                {
                    error!("staff fan-out for scheduled order {order_id} failed: {e}");
                }
            });
        }
        Ok(activated)
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!("initiator pass failed: {e}");
            }
        }
    }
}

/// Once a day, stamps an order out of every template due on the current
/// weekday. Re-running a pass is harmless: the occurrence-date guard makes
/// the copy idempotent.
pub struct Materializer {
    lifecycle: Lifecycle,
    hour: u32,
}

impl Materializer {
    pub fn new(lifecycle: Lifecycle, hour: u32) -> Self {
        Self { lifecycle, hour }
    }

    /// Materializes every template due on the given date. Failures are
    /// per-template: one broken template is logged and skipped.
    pub async fn run_for(&self, today: chrono::NaiveDate) -> MarketResult<usize> {
        let due = self.lifecycle.scheduled().due_on(today).await?;
        let mut created = 0;
        for template in due {
            match self.lifecycle.users().flag_state(template.user_id).await {
                Ok(state) if state.is_blocked() => {
                    warn!(
                        "materializing template {} for blocked user {}",
                        template.id, template.user_id
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("flag lookup for template {} failed: {e}", template.id);
                }
            }
            match self.lifecycle.scheduled().materialize(&template, today).await {
                Ok(Some(order_id)) => {
                    created += 1;
                    info!("template {} materialized as order {order_id}", template.id);
                }
                Ok(None) => {
                    info!("template {} already materialized for {today}", template.id);
                }
                Err(e) => {
                    error!("materializing template {} failed: {e}", template.id);
                }
            }
        }
        Ok(created)
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        let mut last_run: Option<chrono::NaiveDate> = None;
        loop {
            ticker.tick().await;
            let now = Utc::now();
            let today = now.date_naive();
            if now.hour() != self.hour || last_run == Some(today) {
                continue;
            }
            match self.run_for(today).await {
                Ok(created) => {
                    info!("materializer created {created} orders for {today}");
                    last_run = Some(today);
                }
                Err(e) => error!("materializer pass failed: {e}"),
            }
        }
    }
}
