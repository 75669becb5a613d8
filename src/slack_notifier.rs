use anyhow::{Context, Result};
use log::{error, info};
use slack_morphism::prelude::*;
use uuid::Uuid;

use crate::config::SlackConfig;
use crate::email::InboundEmail;

pub struct SlackNotifier {
    client: SlackClient<SlackClientHyperHttpsConnector>,
    token: SlackApiToken,
    channel_id: SlackChannelId,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        info!("Initializing Slack notifier");

        let client = SlackClient::new(SlackClientHyperHttpsConnector::new()?);
        let token = SlackApiToken::new(config.bot_token.clone().into());
        let channel_id = SlackChannelId::new(config.channel_id.clone());

        Ok(SlackNotifier {
            client,
            token,
            channel_id,
        })
    }

    pub async fn send_message(&self, text: &str) -> Result<()> {
        let post_chat_req = SlackApiChatPostMessageRequest::new(
            self.channel_id.clone(),
            SlackMessageContent::new().with_text(text.to_string()),
        );

        let session = self.client.open_session(&self.token);

        match session.chat_post_message(&post_chat_req).await {
            Ok(response) => {
                info!("✅ Slack message sent: {:?}", response.ts);
                Ok(())
            }
            Err(e) => {
                error!("❌ Error sending Slack message: {}", e);
                Err(anyhow::anyhow!("Unable to send Slack message: {}", e))
            }
        }
    }

    /// Notify that an e-mail became a vendor bill
    pub async fn notify_bill_created(&self, message_id: &str, email: &InboundEmail, bill_id: Uuid) -> Result<()> {
        info!("Sending Slack notification for email {}", message_id);

        let message_text = format!(
            "✅ *Supplier bill imported*\n\n\
             • Email ID: `{}`\n\
             • Subject: {}\n\
             • From: {}\n\
             • Date: {}\n\
             • Bill: `{}`\n",
            message_id,
            email.subject_or_default(),
            email.from.as_deref().unwrap_or("unknown sender"),
            email
                .date
                .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            bill_id
        );

        self.send_message(&message_text).await
    }

    pub async fn notify_error(&self, message_id: &str, error_message: &str) -> Result<()> {
        info!("Sending Slack error notification for email {}", message_id);

        let message_text = format!(
            "❌ *Error importing supplier XML e-mail*\n\n\
             • Email ID: `{}`\n\
             • Error: ```{}```",
            message_id, error_message
        );

        self.send_message(&message_text)
            .await
            .context("Unable to send Slack error message")
    }
}
