//! One webhook delivery, end to end.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::event::{classify, EventShape};
use crate::manager::{
    default_registry, status, DispatchMode, Dispatcher, HttpCategories, ManagerContext,
    ManagerResult, VerdictStatus,
};
use crate::metrics::METRICS;
use crate::notify::{DeliveryReport, NotificationRouter};
use crate::obs;

/// What the webhook endpoint answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookResponse {
    pub code: u16,
    /// Aggregated verdict; absent when nothing was dispatched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VerdictStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<EventShape>,
    pub results: Vec<ManagerResult>,
    pub notifications: DeliveryReport,
}

impl WebhookResponse {
    fn acknowledged(shape: Option<EventShape>) -> Self {
        Self {
            code: status::ACCEPTED,
            status: None,
            shape,
            results: Vec::new(),
            notifications: DeliveryReport::default(),
        }
    }
}

pub struct WebhookService {
    dispatcher: Dispatcher,
    router: NotificationRouter,
}

impl WebhookService {
    pub fn new(dispatcher: Dispatcher, router: NotificationRouter) -> Self {
        Self { dispatcher, router }
    }

    /// Built-in managers over `ctx`; development mode verifies manager results.
    pub fn from_context(ctx: ManagerContext, router: NotificationRouter) -> Result<Self> {
        let mode = if ctx.config.env.is_development() {
            DispatchMode::Verify
        } else {
            DispatchMode::Production
        };
        let registry = default_registry(&ctx)?;
        Ok(Self::new(
            Dispatcher::new(std::sync::Arc::new(registry), mode),
            router,
        ))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Classify, dispatch, aggregate and notify.
    ///
    /// Errors only on a contract violation in verification mode; every other
    /// failure is folded into the response.
    pub async fn handle(&self, payload: &Value) -> Result<WebhookResponse> {
        METRICS.inc_events_received();

        let Some(event) = classify(payload) else {
            METRICS.inc_events_ignored();
            obs::emit_webhook_ignored("no known event shape");
            return Ok(WebhookResponse::acknowledged(None));
        };
        let shape = event.shape();
        obs::emit_webhook_received(shape.name(), &event.repository().name);

        let results = self.dispatcher.dispatch_results(payload).await?;
        if results.is_empty() {
            METRICS.inc_events_ignored();
            obs::emit_webhook_ignored("no manager accepts this shape");
            return Ok(WebhookResponse::acknowledged(Some(shape)));
        }

        let categories = HttpCategories::from_results(&results);
        let verdict = categories.status();
        let notifications = self.router.deliver(&categories).await;
        obs::emit_webhook_concluded(verdict.code, verdict.status.as_str(), results.len());

        Ok(WebhookResponse {
            code: verdict.code,
            status: Some(verdict.status),
            shape: Some(shape),
            results,
            notifications,
        })
    }
}
