//! Process-wide counters for the release train.
//!
//! Incremented at the call site; [`Metrics::flush`] emits the current values
//! as a single `info!` event (the queue loop calls it after each message).

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    events_received: AtomicU64,
    events_ignored: AtomicU64,
    managers_dispatched: AtomicU64,
    manager_failures: AtomicU64,
    notifications_sent: AtomicU64,
    notification_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_ignored: AtomicU64::new(0),
            managers_dispatched: AtomicU64::new(0),
            manager_failures: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notification_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_managers_dispatched(&self, n: u64) {
        self.managers_dispatched.fetch_add(n, Ordering::Relaxed);
    }

    /// Counts results in the client- or server-error range.
    pub fn inc_manager_failures(&self) {
        self.manager_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notification_failures(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            events_received = self.events_received(),
            events_ignored = self.events_ignored(),
            managers_dispatched = self.managers_dispatched(),
            manager_failures = self.manager_failures(),
            notifications_sent = self.notifications_sent(),
            notification_failures = self.notification_failures(),
        );
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    pub fn events_ignored(&self) -> u64 {
        self.events_ignored.load(Ordering::Relaxed)
    }

    pub fn managers_dispatched(&self) -> u64 {
        self.managers_dispatched.load(Ordering::Relaxed)
    }

    pub fn manager_failures(&self) -> u64 {
        self.manager_failures.load(Ordering::Relaxed)
    }

    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    pub fn notification_failures(&self) -> u64 {
        self.notification_failures.load(Ordering::Relaxed)
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.events_received,
            &self.events_ignored,
            &self.managers_dispatched,
            &self.manager_failures,
            &self.notifications_sent,
            &self.notification_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_events_received();
        m.inc_events_received();
        m.inc_events_ignored();
        m.add_managers_dispatched(3);
        m.inc_manager_failures();
        assert_eq!(m.events_received(), 2);
        assert_eq!(m.events_ignored(), 1);
        assert_eq!(m.managers_dispatched(), 3);
        assert_eq!(m.manager_failures(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_notifications_sent();
        m.inc_notification_failures();
        m.reset();
        assert_eq!(m.notifications_sent(), 0);
        assert_eq!(m.notification_failures(), 0);
    }
}
