use anyhow::Result;
use chrono::NaiveDate;
use log::warn;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub import: ImportSettings,
    pub database: DatabaseConfig,
    pub gmail: Option<GmailConfig>,
    pub scheduler: SchedulerConfig,
    pub slack: Option<SlackConfig>,
    /// Gateway mailbox that e-mails fetched from Gmail are delivered to
    pub gateway_id: Option<Uuid>,
}

/// Settings read by the mapper and the ingestion handlers.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ImportSettings {
    pub default_purchase_journal_id: Option<Uuid>,
    /// E-mails dated before this day are not processed
    pub process_emails_from: Option<NaiveDate>,
    /// Gmail label of the supplier mailbox, e.g. "facturas/proveedores"
    pub mail_server: Option<String>,
    /// Company used when a caller does not name one
    pub default_company_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub schedule_times: Vec<String>, // Format: "HH:MM" (e.g., ["02:00", "14:00"])
}

#[derive(Debug, Deserialize, Clone)]
pub struct GmailConfig {
    pub credentials_path: String,
    pub token_cache_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    pub channel_id: String,
}

impl Config {
    pub fn new() -> Result<Self> {
        Self::check_required_env_vars()?;

        Ok(Config {
            import: ImportSettings::from_env(),
            database: DatabaseConfig {
                host: std::env::var("DB_HOST")
                    .unwrap_or_else(|_| "localhost".to_string()),
                port: std::env::var("DB_PORT")
                    .unwrap_or_else(|_| "5432".to_string())
                    .parse()
                    .unwrap_or(5432),
                database: std::env::var("DB_NAME")
                    .unwrap_or_else(|_| "supplier_xml".to_string()),
                username: std::env::var("DB_USERNAME")
                    .unwrap_or_else(|_| "postgres".to_string()),
                password: std::env::var("DB_PASSWORD").unwrap_or_default(),
            },
            gmail: env_non_empty("GMAIL_CREDENTIALS_PATH")
                .map(|credentials_path| GmailConfig {
                    credentials_path,
                    token_cache_path: std::env::var("GMAIL_TOKEN_CACHE_PATH")
                        .unwrap_or_else(|_| "./gmail-token-cache.json".to_string()),
                }),
            scheduler: SchedulerConfig {
                enabled: std::env::var("SCHEDULER_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
                schedule_times: std::env::var("SCHEDULER_TIMES")
                    .unwrap_or_else(|_| "02:00".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            slack: match (env_non_empty("SLACK_BOT_TOKEN"), env_non_empty("SLACK_CHANNEL_ID")) {
                (Some(bot_token), Some(channel_id)) => Some(SlackConfig {
                    bot_token,
                    channel_id,
                }),
                _ => {
                    log::info!("SLACK_BOT_TOKEN or SLACK_CHANNEL_ID not set - Slack notifications disabled");
                    None
                }
            },
            gateway_id: env_uuid("SUPPLIER_XML_GATEWAY_ID"),
        })
    }

    fn check_required_env_vars() -> Result<()> {
        let required_vars = ["DB_PASSWORD"];

        let missing_vars: Vec<&str> = required_vars
            .iter()
            .copied()
            .filter(|var| std::env::var(var).is_err())
            .collect();

        if !missing_vars.is_empty() {
            anyhow::bail!(
                "Missing environment variables: {}\n\
                 \n\
                 💡 Solutions:\n\
                 1. Create a .env file with your settings:\n\
                    cp .env.example .env\n\
                 \n\
                 2. Or export them manually:\n\
                    export DB_PASSWORD=...\n\
                    export SUPPLIER_XML_DEFAULT_JOURNAL_ID=<uuid>   # optional\n\
                    export SUPPLIER_XML_PROCESS_EMAILS_FROM=2024-01-01   # optional\n\
                    export SUPPLIER_XML_MAIL_SERVER=facturas/proveedores   # Gmail label, optional",
                missing_vars.join(", ")
            );
        }

        Ok(())
    }
}

impl ImportSettings {
    pub fn from_env() -> Self {
        ImportSettings {
            default_purchase_journal_id: env_uuid("SUPPLIER_XML_DEFAULT_JOURNAL_ID"),
            process_emails_from: env_date("SUPPLIER_XML_PROCESS_EMAILS_FROM"),
            mail_server: env_non_empty("SUPPLIER_XML_MAIL_SERVER"),
            default_company_id: env_uuid("SUPPLIER_XML_COMPANY_ID"),
        }
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Unset or blank gives `None`; garbage is reported and ignored.
fn env_uuid(var: &str) -> Option<Uuid> {
    let value = std::env::var(var).ok()?;
    parse_optional(var, &value, |v| Uuid::parse_str(v).ok())
}

fn env_date(var: &str) -> Option<NaiveDate> {
    let value = std::env::var(var).ok()?;
    parse_optional(var, &value, |v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
}

fn parse_optional<T>(var: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let parsed = parse(value);
    if parsed.is_none() {
        warn!("{}='{}' is not valid, ignoring it", var, value);
    }
    parsed
}
