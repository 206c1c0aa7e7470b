//! Session Maintenance
//!
//! Two independent sweeps: in-memory eviction of idle sessions (short
//! timeout) and deletion of durable records past the retention window.

use crate::error::PipelineError;
use crate::memory::SessionStore;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub evicted: usize,
    pub deleted: usize,
}

pub struct SessionMaintenance {
    store: Arc<dyn SessionStore>,
    idle_timeout: Duration,
    retention: Duration,
    cadence: Duration,
    last_eviction: Mutex<Option<DateTime<Utc>>>,
}

impl SessionMaintenance {
    pub fn new(
        store: Arc<dyn SessionStore>,
        idle_timeout: Duration,
        retention: Duration,
        cadence: Duration,
    ) -> Self {
        Self {
            store,
            idle_timeout,
            retention,
            cadence,
            last_eviction: Mutex::new(None),
        }
    }

    /// Called per request; evicts idle cache entries at most once per cadence
    pub fn on_request(&self) {
        let now = Utc::now();
        {
            let mut last = self
                .last_eviction
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if matches!(*last, Some(at) if now - at < self.cadence) {
                return;
            }
            *last = Some(now);
        }

        let store = Arc::clone(&self.store);
        let timeout = self.idle_timeout;
        tokio::spawn(async move {
            let evicted = store.evict_idle(timeout);
            if evicted > 0 {
                info!(evicted, "Evicted idle sessions from memory");
            }
        });
    }

    /// Both sweeps; `max_age_days` overrides the retention window
    pub fn run(&self, max_age_days: Option<i64>) -> Result<MaintenanceReport> {
        let evicted = self.store.evict_idle(self.idle_timeout);
        let retention = match max_age_days {
            Some(days) => Duration::try_days(days).ok_or_else(|| {
                PipelineError::InvalidInput(format!("max_age_days out of range: {}", days))
            })?,
            None => self.retention,
        };
        let deleted = self.store.sweep(retention)?;

        info!(evicted, deleted, "Session maintenance completed");
        Ok(MaintenanceReport { evicted, deleted })
    }

    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let period = self
            .cadence
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(crate::config::MAINTENANCE_INTERVAL_SECS));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = self.run(None) {
                    error!(error = %e, "Periodic session maintenance failed");
                }
            }
        })
    }
}
