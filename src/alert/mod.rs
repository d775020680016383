//! Alert throttle — at most one rate-limit notification per calendar day.
//!
//! `maybe_alert` serialises check-then-set behind an async mutex inside
//! the process and finishes with the store's atomic `claim`, so racing
//! requests (or a second proxy process sharing the database) still
//! produce a single notification.
//!
//! Policy when the store cannot be read is explicit: fail-open notifies,
//! fail-closed stays quiet.

use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::UnreadableStorePolicy;

pub mod channel;
pub mod store;

use channel::{AlertChannel, Incident};
use store::{AlertState, AlertStateStore};

// ── Clock ───────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    /// The calendar day alerts are throttled on.
    fn today(&self) -> NaiveDate;
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock; days roll over at local midnight.
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ── Throttle ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// A notification was dispatched to the channel.
    Sent,
    /// Today's alert already went out (or policy said no).
    Suppressed,
}

pub struct AlertThrottle {
    store: Arc<dyn AlertStateStore>,
    channel: Arc<dyn AlertChannel>,
    clock: Arc<dyn Clock>,
    policy: UnreadableStorePolicy,
    /// Serialises check-then-set within this process.
    gate: Mutex<()>,
}

impl AlertThrottle {
    pub fn new(
        store: Arc<dyn AlertStateStore>,
        channel: Arc<dyn AlertChannel>,
        policy: UnreadableStorePolicy,
    ) -> Self {
        Self::with_clock(store, channel, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn AlertStateStore>,
        channel: Arc<dyn AlertChannel>,
        policy: UnreadableStorePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, channel, clock, policy, gate: Mutex::new(()) }
    }

    /// True when no alert is recorded for today. Read failures follow
    /// the configured policy.
    pub fn should_alert(&self) -> bool {
        self.should_alert_on(self.clock.today())
    }

    fn should_alert_on(&self, today: NaiveDate) -> bool {
        match self.store.load() {
            Ok(Some(state)) => !state.alerted_on(today),
            Ok(None) => true,
            Err(e) => {
                warn!(policy = ?self.policy, "Alert state unreadable: {:#}", e);
                self.policy == UnreadableStorePolicy::FailOpen
            }
        }
    }

    /// Record today's alert, overwriting whatever was stored.
    pub fn mark_alerted(&self) -> anyhow::Result<()> {
        self.store.store(AlertState { date: self.clock.today(), alerted: true })
    }

    /// Whether today's alert has been sent, for health reporting.
    pub fn alerted_today(&self) -> Option<bool> {
        let today = self.clock.today();
        self.store.load().ok().map(|s| s.is_some_and(|s| s.alerted_on(today)))
    }

    /// Notify the operator unless today's alert already went out.
    ///
    /// Delivery runs on a detached task; its failure is logged and never
    /// reaches the caller.
    pub async fn maybe_alert(&self, description: &str) -> AlertDecision {
        let _gate = self.gate.lock().await;
        let today = self.clock.today();

        if !self.should_alert_on(today) {
            return AlertDecision::Suppressed;
        }

        match self.store.claim(today) {
            Ok(true) => {}
            Ok(false) => {
                info!("Alert already claimed for {} by another writer", today);
                return AlertDecision::Suppressed;
            }
            Err(e) => {
                warn!(policy = ?self.policy, "Alert state write failed: {:#}", e);
                if self.policy == UnreadableStorePolicy::FailClosed {
                    return AlertDecision::Suppressed;
                }
            }
        }

        let incident = Incident {
            description: description.to_string(),
            occurred_at: self.clock.now(),
        };
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            if let Err(e) = channel.notify(&incident).await {
                warn!("Alert delivery failed: {:#}", e);
            }
        });

        info!(day = %today, "🚨 Rate-limit alert dispatched");
        AlertDecision::Sent
    }
}
