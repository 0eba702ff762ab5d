//! Inbound webhook events.
//!
//! Raw deliveries are classified once at the boundary into a closed set of
//! [`WebhookEvent`] variants; managers only ever see the typed records.

pub mod payload;
pub mod refs;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use payload::{
    CheckRunEvent, Installation, PullRequestEvent, PushCommit, PushEvent, Repository,
};

/// The event shapes the classifier knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventShape {
    PullRequest,
    Push,
    CheckRun,
}

impl EventShape {
    /// Classification order; the first shape that validates wins.
    pub const ALL: [EventShape; 3] = [
        EventShape::PullRequest,
        EventShape::Push,
        EventShape::CheckRun,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventShape::PullRequest => "pullRequest",
            EventShape::Push => "push",
            EventShape::CheckRun => "checkRun",
        }
    }

    /// Validate `payload` against this shape.
    pub fn parse(self, payload: &Value) -> Result<WebhookEvent, serde_json::Error> {
        Ok(match self {
            EventShape::PullRequest => {
                WebhookEvent::PullRequest(PullRequestEvent::deserialize(payload)?)
            }
            EventShape::Push => WebhookEvent::Push(PushEvent::deserialize(payload)?),
            EventShape::CheckRun => WebhookEvent::CheckRun(CheckRunEvent::deserialize(payload)?),
        })
    }

    pub fn matches(self, payload: &Value) -> bool {
        self.parse(payload).is_ok()
    }
}

impl fmt::Display for EventShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PullRequest(PullRequestEvent),
    Push(PushEvent),
    CheckRun(CheckRunEvent),
}

impl WebhookEvent {
    pub fn shape(&self) -> EventShape {
        match self {
            WebhookEvent::PullRequest(_) => EventShape::PullRequest,
            WebhookEvent::Push(_) => EventShape::Push,
            WebhookEvent::CheckRun(_) => EventShape::CheckRun,
        }
    }

    pub fn repository(&self) -> &Repository {
        match self {
            WebhookEvent::PullRequest(e) => &e.repository,
            WebhookEvent::Push(e) => &e.repository,
            WebhookEvent::CheckRun(e) => &e.repository,
        }
    }

    pub fn installation(&self) -> &Installation {
        match self {
            WebhookEvent::PullRequest(e) => &e.installation,
            WebhookEvent::Push(e) => &e.installation,
            WebhookEvent::CheckRun(e) => &e.installation,
        }
    }
}

/// Classify `payload` into the first matching shape, or `None` when the
/// delivery is not one we care about.
pub fn classify(payload: &Value) -> Option<WebhookEvent> {
    EventShape::ALL
        .iter()
        .find_map(|shape| shape.parse(payload).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pull_request_payload() -> Value {
        json!({
            "action": "closed",
            "pull_request": {
                "number": 12,
                "head": { "ref": "beta", "sha": "aaaaaaa1111" },
                "base": { "ref": "stable" },
                "merged": true
            },
            "repository": { "name": "platform", "owner": { "login": "acme" } },
            "installation": { "id": 7 },
            "sender": { "login": "octocat" }
        })
    }

    fn push_payload() -> Value {
        json!({
            "ref": "refs/heads/beta",
            "after": "bbbbbbb2222",
            "commits": [{ "id": "bbbbbbb2222", "message": "fix login" }],
            "head_commit": { "id": "bbbbbbb2222" },
            "repository": { "name": "web", "owner": { "login": "acme" } },
            "sender": { "login": "octocat" },
            "installation": { "id": 7 }
        })
    }

    fn check_run_payload() -> Value {
        json!({
            "action": "requested_action",
            "check_run": {
                "head_sha": "ccccccc3333",
                "pull_requests": [{ "base": { "ref": "release-beta" } }]
            },
            "repository": { "name": "platform", "owner": { "login": "acme" } },
            "requested_action": { "identifier": "rerequested" },
            "installation": { "id": 7 }
        })
    }

    #[test]
    fn test_classify_pull_request() {
        let event = classify(&pull_request_payload()).expect("pull request");
        assert_eq!(event.shape(), EventShape::PullRequest);
        assert_eq!(event.repository().name, "platform");
    }

    #[test]
    fn test_classify_push() {
        let event = classify(&push_payload()).expect("push");
        assert_eq!(event.shape(), EventShape::Push);
        match event {
            WebhookEvent::Push(push) => assert_eq!(push.commits.len(), 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_classify_check_run() {
        let event = classify(&check_run_payload()).expect("check run");
        assert_eq!(event.shape(), EventShape::CheckRun);
        assert_eq!(event.installation().id, 7);
    }

    #[test]
    fn test_classify_unknown_payload() {
        assert!(classify(&json!({ "zen": "Keep it logically awesome." })).is_none());
        assert!(classify(&json!([1, 2, 3])).is_none());
    }

    #[test]
    fn test_push_with_null_head_commit_is_not_a_push() {
        let mut payload = push_payload();
        payload["head_commit"] = Value::Null;
        assert!(!EventShape::Push.matches(&payload));
    }

    #[test]
    fn test_missing_installation_fails_every_shape() {
        let mut payload = pull_request_payload();
        payload.as_object_mut().unwrap().remove("installation");
        assert!(classify(&payload).is_none());
    }

    #[test]
    fn test_shape_names() {
        assert_eq!(EventShape::PullRequest.to_string(), "pullRequest");
        assert_eq!(EventShape::CheckRun.name(), "checkRun");
    }
}
