//! Slack `chat.postMessage` notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use train_core::config::SlackConfig;
use train_core::{Channel, ChatMessage, Notifier, NotifyError};

use crate::error::{ClientError, Result};
use crate::USER_AGENT;

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    color: &'a str,
    title: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    attachments: [Attachment<'a>; 1],
}

impl<'a> From<&'a ChatMessage> for PostMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        PostMessage {
            channel: &message.channel,
            text: "",
            attachments: [Attachment {
                color: &message.color,
                title: &message.title,
                text: &message.text,
            }],
        }
    }
}

/// Slack answers 200 even for rejected posts; `ok` tells them apart.
#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackNotifier {
    http: Client,
    api_url: String,
    token: String,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .ok_or(ClientError::MissingCredential("slack.token"))?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    async fn post(&self, message: &ChatMessage) -> std::result::Result<(), NotifyError> {
        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.api_url))
            .bearer_auth(&self.token)
            .json(&PostMessage::from(message))
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                channel: message.channel.clone(),
                reason: format!("http {}", status.as_u16()),
            });
        }
        let body: SlackResponse = response
            .json()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        if body.ok {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                channel: message.channel.clone(),
                reason: body.error.unwrap_or_else(|| "unknown_error".to_string()),
            })
        }
    }
}
