use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use uuid::Uuid;

use cr_supplier_xml::attachment_parser::{Attachment, AttachmentParser};
use cr_supplier_xml::config::Config;
use cr_supplier_xml::database::PgLedger;
use cr_supplier_xml::email::MailboxProcessor;
use cr_supplier_xml::gmail_client::GmailClient;
use cr_supplier_xml::ingest::{handle_inbound_email, import_file, rescan_bill, UploadRequest};
use cr_supplier_xml::ledger::{Ledger, MemoryLedger, StoredAttachment};
use cr_supplier_xml::payload::discover;
use cr_supplier_xml::slack_notifier::SlackNotifier;
use cr_supplier_xml::xml::SupplierDocument;

#[derive(Parser)]
#[command(name = "cr-supplier-xml")]
#[command(about = "Import Costa Rica supplier e-invoice XML as vendor bills")]
#[command(version = "0.1.0")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import an XML, base64 or ZIP file as a vendor bill
    Import {
        file: PathBuf,
        /// Purchase journal to use instead of the configured one
        #[arg(long)]
        journal: Option<Uuid>,
        /// Receiving company (defaults to SUPPLIER_XML_COMPANY_ID or the first company)
        #[arg(long)]
        company: Option<Uuid>,
        /// Only print the documents found, without database access
        #[arg(short, long)]
        dry_run: bool,
    },
    /// Print the supplier documents found in a file as JSON
    Inspect { file: PathBuf },
    /// Deliver a saved .eml message to a bill, or create one from it
    ImportEml {
        file: PathBuf,
        #[arg(long)]
        bill: Option<Uuid>,
    },
    /// Read the XML back out of a bill's attachments and refill it
    Rescan { bill: Uuid },
    /// Poll the supplier mailbox label on Gmail once
    FetchMail {
        /// Limit the number of e-mails processed (unlimited by default)
        #[arg(short = 'l', long)]
        limit: Option<usize>,
        /// Analyze e-mails without writing to the database
        #[arg(short, long)]
        dry_run: bool,
    },
    /// Poll the mailbox at SCHEDULER_TIMES
    Daemon {
        #[arg(short = 'l', long)]
        limit: Option<usize>,
    },
    /// List the bills received by a gateway
    GatewayBills {
        /// Defaults to SUPPLIER_XML_GATEWAY_ID
        #[arg(long)]
        gateway: Option<Uuid>,
    },
    /// List Gmail labels
    Labels,
    /// Check the configuration without connecting
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load the .env file if present
    dotenv::dotenv().ok();

    let args = Args::parse();

    env_logger::init();

    let result = match args.command {
        Command::Inspect { file } => inspect(&file),
        Command::Import {
            file,
            dry_run: true,
            ..
        } => inspect(&file),
        Command::Import {
            file,
            journal,
            company,
            dry_run: false,
        } => run_import(&file, journal, company).await,
        Command::ImportEml { file, bill } => run_import_eml(&file, bill).await,
        Command::Rescan { bill } => run_rescan(bill).await,
        Command::FetchMail { limit, dry_run } => run_fetch_mail(&Config::new()?, limit, dry_run).await.map(|_| ()),
        Command::Daemon { limit } => {
            info!("🔄 Starting in daemon mode");
            run_daemon_mode(Config::new()?, limit).await
        }
        Command::GatewayBills { gateway } => run_gateway_bills(gateway).await,
        Command::Labels => run_labels().await,
        Command::CheckConfig => check_config(),
    };

    if let Err(e) = &result {
        error!("❌ {:#}", e);
    }
    result
}

fn read_upload(path: &Path) -> Result<(String, Vec<u8>)> {
    let content = std::fs::read(path).with_context(|| format!("Unable to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((filename, content))
}

fn inspect(path: &Path) -> Result<()> {
    let (filename, content) = read_upload(path)?;

    let mut found = 0;
    for candidate in discover(&content, &filename) {
        match SupplierDocument::parse(&candidate.content) {
            Ok(document) => {
                found += 1;
                println!("📄 {}", candidate.name);
                println!("{}", serde_json::to_string_pretty(&document)?);
            }
            Err(e) => warn!("{}: {}", candidate.name, e),
        }
    }

    if found == 0 {
        anyhow::bail!("No supplier invoice or credit note found in {}", filename);
    }
    Ok(())
}

async fn connect(config: &Config) -> Result<PgLedger> {
    PgLedger::new(&config.database, config.import.default_company_id)
        .await
        .context("Unable to initialize database")
}

async fn run_import(path: &Path, journal_id: Option<Uuid>, company_id: Option<Uuid>) -> Result<()> {
    let config = Config::new()?;
    let ledger = connect(&config).await?;
    let (filename, content) = read_upload(path)?;

    let request = UploadRequest {
        filename,
        content,
        journal_id,
        company_id,
    };
    let bill_id = import_file(&ledger, &config.import, &request).await?;
    println!("✅ Bill {} created from {}", bill_id, request.filename);
    ledger.close().await
}

async fn run_import_eml(path: &Path, bill: Option<Uuid>) -> Result<()> {
    let config = Config::new()?;
    let ledger = connect(&config).await?;
    let (_, raw) = read_upload(path)?;
    let email = AttachmentParser::parse_email(&raw)?;

    for attachment in &email.attachments {
        display_attachment_info(attachment);
    }

    let bill_id = handle_inbound_email(&ledger, &config.import, &email, bill).await?;
    // Keep the e-mail files on the bill thread so a later rescan sees them
    for attachment in &email.attachments {
        let mut stored = StoredAttachment::raw(&attachment.filename, &attachment.content);
        stored.mimetype = attachment.content_type.clone();
        ledger.add_attachment(bill_id, &stored, true).await?;
    }
    println!("✅ Bill {} filled from e-mail '{}'", bill_id, email.subject_or_default());
    ledger.close().await
}

fn display_attachment_info(attachment: &Attachment) {
    println!("📎 Attachment: {}", attachment.filename);
    println!("   Type: {}", attachment.content_type.as_deref().unwrap_or("unknown"));
    println!("   Size: {} bytes", attachment.content.len());
}

async fn run_rescan(bill: Uuid) -> Result<()> {
    let config = Config::new()?;
    let ledger = connect(&config).await?;
    rescan_bill(&ledger, &config.import, bill).await?;
    println!("✅ Bill {} refilled from its attachments", bill);
    ledger.close().await
}

async fn run_gateway_bills(gateway: Option<Uuid>) -> Result<()> {
    let config = Config::new()?;
    let gateway_id = gateway
        .or(config.gateway_id)
        .context("No gateway given and SUPPLIER_XML_GATEWAY_ID is not set")?;
    let ledger = connect(&config).await?;
    let bills = ledger.gateway_bills(gateway_id).await?;
    println!("{}", serde_json::to_string_pretty(&bills)?);
    ledger.close().await
}

async fn run_labels() -> Result<()> {
    let config = Config::new()?;
    let gmail_config = config.gmail.as_ref().context("GMAIL_CREDENTIALS_PATH is not set")?;
    let gmail = GmailClient::new(gmail_config).await?;
    let prefix = config.import.mail_server.as_deref().unwrap_or("");
    gmail.list_labels(prefix).await
}

fn check_config() -> Result<()> {
    let config = Config::new()?;
    println!("✅ Configuration valid!");
    println!(
        "🗄️  Database: {}@{}:{}/{}",
        config.database.username, config.database.host, config.database.port, config.database.database
    );
    match &config.gmail {
        Some(gmail) => {
            println!("📧 Gmail API OAuth2");
            println!("🔑 Credentials: {}", gmail.credentials_path);
            println!("💾 Token cache: {}", gmail.token_cache_path);
        }
        None => println!("📧 Gmail not configured"),
    }
    println!("🏷️  Mailbox label: {}", config.import.mail_server.as_deref().unwrap_or("(not set)"));
    println!("📮 Gateway: {}", display_option(config.gateway_id));
    println!("📒 Default purchase journal: {}", display_option(config.import.default_purchase_journal_id));
    println!("🏢 Company: {}", display_option(config.import.default_company_id));
    println!("📅 Process e-mails from: {}", display_option(config.import.process_emails_from));
    println!("💬 Slack: {}", if config.slack.is_some() { "enabled" } else { "disabled" });
    Ok(())
}

fn display_option<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "(not set)".to_string())
}

async fn run_fetch_mail(config: &Config, limit: Option<usize>, dry_run: bool) -> Result<usize> {
    let label = config
        .import
        .mail_server
        .clone()
        .context("SUPPLIER_XML_MAIL_SERVER (the Gmail label to poll) is not set")?;
    let gmail_config = config.gmail.as_ref().context("GMAIL_CREDENTIALS_PATH is not set")?;
    let gmail = GmailClient::new(gmail_config).await.context("Unable to connect to Gmail API")?;

    if dry_run {
        info!("🧪 Starting supplier mailbox analysis in DRY-RUN mode");
        let ledger = MemoryLedger::new();
        let processor = MailboxProcessor::new(&ledger, &config.import, Uuid::nil(), label);
        let result = processor.process_emails_dry_run(&gmail, limit).await?;
        return Ok(result.emails_processed);
    }

    let gateway_id = config
        .gateway_id
        .context("SUPPLIER_XML_GATEWAY_ID is not set")?;
    let ledger = connect(config).await?;

    let slack = match &config.slack {
        Some(slack_config) => match SlackNotifier::new(slack_config) {
            Ok(notifier) => {
                info!("✅ Slack notifications enabled");
                Some(notifier)
            }
            Err(e) => {
                warn!("⚠️  Unable to initialize Slack notifier: {} - notifications disabled", e);
                None
            }
        },
        None => None,
    };

    let processor = MailboxProcessor::new(&ledger, &config.import, gateway_id, label).with_slack(slack.as_ref());
    let result = processor.process_emails(&gmail, limit).await?;
    info!(
        "✅ Processing finished: {} e-mails, {} bills, {} skipped, {} failed",
        result.emails_processed, result.bills_created, result.emails_skipped, result.emails_failed
    );
    ledger.close().await?;
    Ok(result.emails_processed)
}

async fn run_daemon_mode(config: Config, limit: Option<usize>) -> Result<()> {
    use chrono::{Local, Timelike};
    use tokio::sync::mpsc;
    use tokio_cron_scheduler::{Job, JobScheduler};

    if !config.scheduler.enabled {
        error!("❌ Daemon mode requires SCHEDULER_ENABLED=true");
        anyhow::bail!("Scheduler not enabled in configuration");
    }

    if config.scheduler.schedule_times.is_empty() {
        error!("❌ No schedule times defined (SCHEDULER_TIMES)");
        anyhow::bail!("No schedule times defined");
    }

    info!("📅 Configured fetch times: {:?}", config.scheduler.schedule_times);

    let scheduler = JobScheduler::new().await?;
    // Jobs only signal the schedule; the polling itself runs on the daemon loop
    let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<String>();

    for schedule_time in &config.scheduler.schedule_times {
        let Some((hour, minute)) = schedule_time.split_once(':') else {
            error!("❌ Invalid schedule time: {}. Use the HH:MM format", schedule_time);
            continue;
        };

        // Cron format: "0 minute hour * * *" (every day)
        let cron_expr = format!("0 {} {} * * *", minute, hour);
        info!("📆 Adding scheduled job: {} (cron: {})", schedule_time, cron_expr);

        let tick_tx = tick_tx.clone();
        let schedule_time_clone = schedule_time.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
            let tick_tx = tick_tx.clone();
            let schedule_time = schedule_time_clone.clone();

            Box::pin(async move {
                if tick_tx.send(schedule_time).is_err() {
                    error!("❌ Daemon loop is gone, scheduled run dropped");
                }
            })
        })?;

        scheduler.add(job).await?;
    }

    scheduler.start().await?;

    info!("✅ Daemon mode started. Waiting for scheduled times...");
    info!("⏸️  Press Ctrl+C to stop the daemon");

    let mut heartbeat = tokio::time::interval(tokio::time::Duration::from_secs(60));
    loop {
        tokio::select! {
            Some(schedule_time) = tick_rx.recv() => {
                info!("⏰ Scheduled run at {} - polling supplier mailbox...", schedule_time);

                match run_fetch_mail(&config, limit, false).await {
                    Ok(count) => {
                        info!("✅ Scheduled run finished. {} e-mails processed at {}", count, schedule_time);
                    }
                    Err(e) => {
                        error!("❌ Error during scheduled run at {}: {:#}", schedule_time, e);
                    }
                }
            }
            _ = heartbeat.tick() => {
                let now = Local::now();
                if now.minute() == 0 {
                    info!("💓 Daemon alive - {}", now.format("%Y-%m-%d %H:%M"));
                }
            }
        }
    }
}
