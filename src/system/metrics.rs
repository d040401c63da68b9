//! Metrics collection for the synchronization engine
//!
//! Every manager owns its own Prometheus registry so several managers (and
//! parallel tests) never collide on metric names.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use crate::core::error::Result;

/// Counters and gauges describing sync activity
#[derive(Clone)]
pub struct SyncMetrics {
    registry: Registry,
    /// Persistence writes handed to the adapter
    pub writes_issued: IntCounter,
    /// Persistence writes that failed and were re-queued
    pub writes_failed: IntCounter,
    /// Ticks that skipped a dirty entry because its previous write was still running
    pub writes_deferred: IntCounter,
    /// Initial loads that failed
    pub loads_failed: IntCounter,
    /// External snapshots discarded as probable echoes
    pub echoes_suppressed: IntCounter,
    /// External snapshots applied to the cache
    pub external_applied: IntCounter,
    /// Listener callbacks invoked
    pub notifications: IntCounter,
    /// Local updates ignored because the value was unchanged
    pub redundant_updates: IntCounter,
    /// Writes rejected by the reentrancy guard
    pub cycles_broken: IntCounter,
    /// Dirty entries dropped on eviction
    pub evictions_discarded: IntCounter,
    /// Completed ticks
    pub ticks: IntCounter,
    /// Live cache entries
    pub entries: IntGauge,
}

impl SyncMetrics {
    /// Create and register all metrics on a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("fms".to_string()), None)?;

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let writes_issued = counter("writes_issued_total", "Persistence writes handed to the adapter")?;
        let writes_failed = counter("writes_failed_total", "Persistence writes that failed")?;
        let writes_deferred = counter("writes_deferred_total", "Dirty entries skipped because a write was in flight")?;
        let loads_failed = counter("loads_failed_total", "Initial document loads that failed")?;
        let echoes_suppressed = counter("echoes_suppressed_total", "External snapshots discarded as echoes")?;
        let external_applied = counter("external_applied_total", "External snapshots applied")?;
        let notifications = counter("notifications_total", "Listener callbacks invoked")?;
        let redundant_updates = counter("redundant_updates_total", "Updates suppressed as unchanged")?;
        let cycles_broken = counter("cycles_broken_total", "Writes rejected by the reentrancy guard")?;
        let evictions_discarded = counter("evictions_discarded_total", "Dirty entries dropped on eviction")?;
        let ticks = counter("ticks_total", "Completed ticks")?;

        let entries = IntGauge::new("entries", "Live cache entries")?;
        registry.register(Box::new(entries.clone()))?;

        Ok(Self {
            registry,
            writes_issued,
            writes_failed,
            writes_deferred,
            loads_failed,
            echoes_suppressed,
            external_applied,
            notifications,
            redundant_updates,
            cycles_broken,
            evictions_discarded,
            ticks,
            entries,
        })
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn gather_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_registries_do_not_collide() {
        let a = SyncMetrics::new().unwrap();
        let b = SyncMetrics::new().unwrap();
        a.writes_issued.inc();
        assert_eq!(a.writes_issued.get(), 1);
        assert_eq!(b.writes_issued.get(), 0);
    }

    #[test]
    fn text_output_uses_prefix() {
        let metrics = SyncMetrics::new().unwrap();
        metrics.echoes_suppressed.inc_by(2);
        let text = metrics.gather_text().unwrap();
        assert!(text.contains("fms_echoes_suppressed_total 2"));
    }
}
