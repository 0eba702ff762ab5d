//! Concurrent fan-out of one delivery to every summoned manager.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::error::{ContractViolation, Result};
use crate::metrics::METRICS;
use crate::obs;

use super::registry::ManagerRegistry;
use super::{status, ManagerResult};

/// Whether contract violations are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Malformed results fail the dispatch so they are caught before deployment.
    Verify,
    /// Malformed results are logged and kept.
    #[default]
    Production,
}

/// How a single manager invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Resolved(ManagerResult),
    /// The handler returned an error or panicked.
    Rejected { manager: String, error: String },
}

impl Settled {
    pub fn manager(&self) -> &str {
        match self {
            Settled::Resolved(result) => &result.manager,
            Settled::Rejected { manager, .. } => manager,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settled::Rejected { .. })
    }

    /// Rejections become 500 results carrying the error text.
    pub fn into_result(self) -> ManagerResult {
        match self {
            Settled::Resolved(result) => result,
            Settled::Rejected { manager, error } => {
                let text = format!("`{manager}` failed unexpectedly: {error}");
                ManagerResult::new(manager, status::INTERNAL_ERROR).with_slack(text)
            }
        }
    }
}

/// Check a resolved result against the contract for `expected`.
pub fn validate_result(
    expected: &str,
    result: &ManagerResult,
) -> std::result::Result<(), ContractViolation> {
    if result.manager != expected {
        return Err(ContractViolation::ManagerMismatch {
            expected: expected.to_string(),
            actual: result.manager.clone(),
        });
    }
    if !status::is_recognised(result.code) {
        return Err(ContractViolation::UnknownStatusCode {
            manager: expected.to_string(),
            code: result.code,
        });
    }
    if let Some(notifications) = &result.notifications {
        for (channel, text) in notifications {
            if text.trim().is_empty() {
                return Err(ContractViolation::EmptyNotification {
                    manager: expected.to_string(),
                    channel: channel.to_string(),
                });
            }
        }
    }
    Ok(())
}

pub struct Dispatcher {
    registry: Arc<ManagerRegistry>,
    mode: DispatchMode,
}

impl Dispatcher {
    pub fn new(registry: Arc<ManagerRegistry>, mode: DispatchMode) -> Self {
        Self { registry, mode }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn registry(&self) -> &ManagerRegistry {
        &self.registry
    }

    /// Run every manager whose shapes match `payload` and wait for all of them.
    ///
    /// The returned list has one entry per summoned manager, in registration
    /// order. An empty list means nothing was summoned. Only a contract
    /// violation in [`DispatchMode::Verify`] makes this fail.
    pub async fn dispatch(&self, payload: &Value) -> Result<Vec<Settled>> {
        let summoned: Vec<_> = self
            .registry
            .descriptors()
            .iter()
            .filter_map(|d| d.summon(payload).map(|event| (d, event)))
            .collect();

        if summoned.is_empty() {
            return Ok(Vec::new());
        }

        let shape = summoned[0].1.shape();
        obs::emit_dispatch_started(shape.name(), summoned.len());
        METRICS.add_managers_dispatched(summoned.len() as u64);

        let names: Vec<String> = summoned.iter().map(|(d, _)| d.name().to_string()).collect();
        let mut join_set = JoinSet::new();
        for (idx, (descriptor, event)) in summoned.into_iter().enumerate() {
            let manager = descriptor.manager();
            let name = descriptor.name().to_string();
            join_set.spawn(async move {
                let started = Instant::now();
                let outcome = AssertUnwindSafe(manager.handle(&event)).catch_unwind().await;
                let settled = match outcome {
                    Ok(Ok(result)) => {
                        obs::emit_manager_finished(
                            &name,
                            result.code,
                            started.elapsed().as_millis() as u64,
                        );
                        Settled::Resolved(result)
                    }
                    Ok(Err(err)) => {
                        obs::emit_manager_rejected(&name, &err);
                        Settled::Rejected {
                            manager: name,
                            error: err.to_string(),
                        }
                    }
                    Err(panic) => {
                        let error = panic_message(&*panic);
                        obs::emit_manager_rejected(&name, &error);
                        Settled::Rejected {
                            manager: name,
                            error,
                        }
                    }
                };
                (idx, settled)
            });
        }

        let mut slots: Vec<Option<Settled>> = vec![None; names.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, settled)) => slots[idx] = Some(settled),
                Err(err) => tracing::warn!(error = %err, "manager task join error"),
            }
        }

        let mut settled = Vec::with_capacity(slots.len());
        for (name, slot) in names.into_iter().zip(slots) {
            let outcome = slot.unwrap_or_else(|| Settled::Rejected {
                error: "manager task was aborted".to_string(),
                manager: name.clone(),
            });
            if let Settled::Resolved(result) = &outcome {
                if let Err(violation) = validate_result(&name, result) {
                    match self.mode {
                        DispatchMode::Verify => return Err(violation.into()),
                        DispatchMode::Production => {
                            tracing::warn!(
                                manager = %name,
                                error = %violation,
                                "malformed manager result"
                            );
                        }
                    }
                }
            }
            if outcome.is_rejected() || matches!(&outcome, Settled::Resolved(r) if r.is_failure()) {
                METRICS.inc_manager_failures();
            }
            settled.push(outcome);
        }

        Ok(settled)
    }

    /// [`Dispatcher::dispatch`] with rejections converted to results.
    pub async fn dispatch_results(&self, payload: &Value) -> Result<Vec<ManagerResult>> {
        Ok(self
            .dispatch(payload)
            .await?
            .into_iter()
            .map(Settled::into_result)
            .collect())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, TrainError};
    use crate::event::{EventShape, WebhookEvent};
    use crate::manager::{Channel, Manager};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;

    enum Behaviour {
        Succeed(u16),
        Fail,
        Panic,
        Mislabel,
    }

    struct Scripted {
        name: &'static str,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Manager for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, _event: &WebhookEvent) -> Result<ManagerResult> {
            match self.behaviour {
                Behaviour::Succeed(code) => Ok(ManagerResult::new(self.name, code)),
                Behaviour::Fail => Err(TrainError::Api(ApiError::new(502, "bad gateway"))),
                Behaviour::Panic => panic!("boom"),
                Behaviour::Mislabel => Ok(ManagerResult::ok("someoneElse")),
            }
        }
    }

    fn scripted(name: &'static str, behaviour: Behaviour) -> Arc<dyn Manager> {
        Arc::new(Scripted { name, behaviour })
    }

    fn push() -> Value {
        json!({
            "ref": "refs/heads/beta",
            "commits": [{ "id": "abc" }],
            "head_commit": { "id": "abc" },
            "repository": { "name": "web", "owner": { "login": "acme" } },
            "sender": { "login": "octocat" },
            "installation": { "id": 1 }
        })
    }

    fn dispatcher(managers: Vec<(&'static str, Behaviour)>, mode: DispatchMode) -> Dispatcher {
        let mut builder = ManagerRegistry::builder();
        for (name, behaviour) in managers {
            builder = builder.register(name, [EventShape::Push], scripted(name, behaviour));
        }
        Dispatcher::new(Arc::new(builder.build().unwrap()), mode)
    }

    #[tokio::test]
    async fn test_no_summoned_managers_is_empty() {
        let d = dispatcher(vec![("a", Behaviour::Succeed(200))], DispatchMode::Verify);
        let settled = d.dispatch(&json!({ "zen": "hi" })).await.unwrap();
        assert!(settled.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_ordered() {
        let d = dispatcher(
            vec![
                ("a", Behaviour::Succeed(200)),
                ("b", Behaviour::Fail),
                ("c", Behaviour::Panic),
                ("d", Behaviour::Succeed(202)),
            ],
            DispatchMode::Verify,
        );
        let settled = d.dispatch(&push()).await.unwrap();
        let managers: Vec<&str> = settled.iter().map(Settled::manager).collect();
        assert_eq!(managers, vec!["a", "b", "c", "d"]);
        assert!(!settled[0].is_rejected());
        assert!(settled[1].is_rejected());
        assert!(settled[2].is_rejected());
        assert!(!settled[3].is_rejected());
    }

    #[tokio::test]
    async fn test_rejection_becomes_server_error() {
        let d = dispatcher(vec![("b", Behaviour::Fail)], DispatchMode::Production);
        let results = d.dispatch_results(&push()).await.unwrap();
        assert_eq!(results[0].code, 500);
        assert!(results[0]
            .notification(Channel::Slack)
            .unwrap()
            .contains("bad gateway"));
    }

    #[tokio::test]
    async fn test_verify_mode_rejects_mislabelled_result() {
        let d = dispatcher(vec![("a", Behaviour::Mislabel)], DispatchMode::Verify);
        let err = d.dispatch(&push()).await.unwrap_err();
        assert!(matches!(
            err,
            TrainError::Contract(ContractViolation::ManagerMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_production_mode_keeps_malformed_results() {
        let d = dispatcher(
            vec![("a", Behaviour::Mislabel), ("b", Behaviour::Succeed(418))],
            DispatchMode::Production,
        );
        let settled = d.dispatch(&push()).await.unwrap();
        assert_eq!(settled.len(), 2);
    }

    #[test]
    fn test_validate_result_rules() {
        assert!(validate_result("a", &ManagerResult::ok("a")).is_ok());
        assert!(matches!(
            validate_result("a", &ManagerResult::new("a", 418)),
            Err(ContractViolation::UnknownStatusCode { code: 418, .. })
        ));
        let empty = ManagerResult {
            notifications: Some(BTreeMap::from([(Channel::Slack, "  ".to_string())])),
            ..ManagerResult::ok("a")
        };
        assert!(matches!(
            validate_result("a", &empty),
            Err(ContractViolation::EmptyNotification { .. })
        ));
    }
}
