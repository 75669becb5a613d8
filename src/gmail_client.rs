use anyhow::{Context, Result};
use google_gmail1::Gmail;
use yup_oauth2 as oauth2;
use log::{debug, info, warn};

use crate::config::GmailConfig;

/// Label a processed message is moved to: `<label>-done`.
pub fn done_label(label: &str) -> String {
    format!("{}-done", label.trim_end_matches('/'))
}

pub struct GmailClient {
    hub: Gmail<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>,
}

impl GmailClient {
    pub async fn new(config: &GmailConfig) -> Result<Self> {
        info!("Connecting to Gmail API via OAuth2");

        // Read OAuth2 client credentials from file
        let secret = oauth2::read_application_secret(&config.credentials_path)
            .await
            .context("Unable to read OAuth2 client credentials file")?;

        // Scope::Modify covers reading messages and changing their labels
        let auth = oauth2::InstalledFlowAuthenticator::builder(
            secret,
            oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(&config.token_cache_path)
        .build()
        .await
        .context("Unable to create OAuth2 authenticator")?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .build();

        let client = hyper::Client::builder().build(connector);
        let hub = Gmail::new(client, auth);

        info!("✅ Gmail API connection established successfully");

        Ok(GmailClient { hub })
    }

    /// IDs of the messages currently carrying `label`.
    pub async fn search_messages(&self, label: &str) -> Result<Vec<String>> {
        info!("Searching for emails with label '{}'", label);

        let query = format!("label:{}", label.replace(' ', "-"));
        debug!("Search criteria: {}", query);

        let result = self
            .hub
            .users()
            .messages_list("me")
            .q(&query)
            .add_scope(google_gmail1::api::Scope::Modify)
            .doit()
            .await
            .context("Error searching for emails")?;

        let message_ids: Vec<String> = result
            .1
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|msg| msg.id)
            .collect();

        info!("Found {} email(s) with label '{}'", message_ids.len(), label);

        Ok(message_ids)
    }

    /// List all Gmail labels, the supplier mailbox ones first.
    pub async fn list_labels(&self, highlight_prefix: &str) -> Result<()> {
        info!("Retrieving Gmail labels list");

        let result = self
            .hub
            .users()
            .labels_list("me")
            .add_scope(google_gmail1::api::Scope::Modify)
            .doit()
            .await
            .context("Unable to list labels")?;

        let mut labels = result.1.labels.unwrap_or_default();

        if labels.is_empty() {
            println!("No labels found.");
            return Ok(());
        }

        println!("Found {} label(s):\n", labels.len());
        println!("{:<40} {:<30} {:<15}", "Label Name", "Label ID", "Type");
        println!("{}", "=".repeat(85));

        labels.sort_by_key(|label| {
            let name = label.name.clone().unwrap_or_default();
            (!name.starts_with(highlight_prefix), name)
        });

        for label in labels {
            let name = label.name.unwrap_or_else(|| "Unknown".to_string());
            let id = label.id.unwrap_or_else(|| "Unknown".to_string());
            let label_type = label.type_.unwrap_or_else(|| "Unknown".to_string());

            if name.starts_with(highlight_prefix) {
                println!("✨ {:<38} {:<30} {:<15}", name, id, label_type);
            } else {
                println!("{:<40} {:<30} {:<15}", name, id, label_type);
            }
        }

        Ok(())
    }

    /// The message as raw RFC 822 bytes.
    pub async fn fetch_raw(&self, message_id: &str) -> Result<Vec<u8>> {
        debug!("Complete email retrieval for ID: {}", message_id);

        let (_, message) = self
            .hub
            .users()
            .messages_get("me", message_id)
            .format("raw")
            .add_scope(google_gmail1::api::Scope::Modify)
            .doit()
            .await
            .with_context(|| format!("Unable to retrieve email {}", message_id))?;

        // The API client already decodes the base64url payload
        let raw = message.raw.context("No raw content in email")?;

        debug!("Email retrieved, size: {} bytes", raw.len());
        Ok(raw)
    }

    /// Move the message from `label` to `<label>-done` and mark it read.
    pub async fn mark_processed(&self, message_id: &str, label: &str) -> Result<()> {
        info!("Marking email {} as processed", message_id);

        let labels_result = self
            .hub
            .users()
            .labels_list("me")
            .add_scope(google_gmail1::api::Scope::Modify)
            .doit()
            .await
            .context("Unable to list labels")?;

        let labels = labels_result.1.labels.unwrap_or_default();
        let done = done_label(label);
        let label_id = |name: &str| {
            labels
                .iter()
                .find(|l| l.name.as_deref() == Some(name))
                .and_then(|l| l.id.clone())
        };

        let mut remove_labels = Vec::new();
        let mut add_labels = Vec::new();

        match label_id(label) {
            Some(id) => remove_labels.push(id),
            None => warn!("Label '{}' not found", label),
        }

        if let Some(unread_id) = label_id("UNREAD") {
            remove_labels.push(unread_id);
        }

        match label_id(done.as_str()) {
            Some(id) => add_labels.push(id),
            None => warn!("Label '{}' not found, it will need to be created in Gmail", done),
        }

        let mut modify_request = google_gmail1::api::ModifyMessageRequest::default();
        modify_request.add_label_ids = Some(add_labels);
        modify_request.remove_label_ids = Some(remove_labels);

        self.hub
            .users()
            .messages_modify(modify_request, "me", message_id)
            .add_scope(google_gmail1::api::Scope::Modify)
            .doit()
            .await
            .context("Unable to modify email labels")?;

        info!("✅ Email {} marked as processed with label '{}'", message_id, done);
        Ok(())
    }
}
