//! Structured lifecycle events for webhook processing.
//!
//! Every delivery runs inside a [`webhook_span`]; the `emit_*` functions log
//! one `info!` (or `warn!`) line per lifecycle step with an `event` field.

use tracing::{info, warn};

/// Span carrying the delivery id; attach it with `Instrument::instrument`.
///
/// ```ignore
/// service.handle(&payload).instrument(obs::webhook_span("5f0c...")).await
/// ```
pub fn webhook_span(delivery_id: &str) -> tracing::Span {
    tracing::info_span!("train.webhook", delivery_id = %delivery_id)
}

pub fn emit_webhook_received(shape: &str, repo: &str) {
    info!(event = "webhook.received", shape = %shape, repo = %repo);
}

/// Nothing matched; the delivery is acknowledged without work.
pub fn emit_webhook_ignored(reason: &str) {
    info!(event = "webhook.ignored", reason = %reason);
}

pub fn emit_dispatch_started(shape: &str, managers: usize) {
    info!(event = "dispatch.started", shape = %shape, managers = managers);
}

pub fn emit_manager_finished(manager: &str, code: u16, duration_ms: u64) {
    info!(
        event = "manager.finished",
        manager = %manager,
        code = code,
        duration_ms = duration_ms,
    );
}

/// A handler returned an error or panicked.
pub fn emit_manager_rejected(manager: &str, error: &dyn std::fmt::Display) {
    warn!(event = "manager.rejected", manager = %manager, error = %error);
}

pub fn emit_webhook_concluded(code: u16, status: &str, results: usize) {
    info!(
        event = "webhook.concluded",
        code = code,
        status = %status,
        results = results,
    );
}

pub fn emit_notifications_sent(delivered: usize, failed: usize) {
    info!(event = "notifications.sent", delivered = delivered, failed = failed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_span_create() {
        let _entered = webhook_span("delivery-1").entered();
        emit_webhook_ignored("no matching shape");
    }
}
