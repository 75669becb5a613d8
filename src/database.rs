use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::ledger::{
    Account, AttachmentData, BillOrigin, BillSummary, Company, Gateway, Journal, JournalType,
    Ledger, LedgerFuture, NewPartner, Partner, StoredAttachment, TaxCodeScheme, TaxUse, Thread,
};
use crate::mapper::{LineCommand, ResolvedBillPayload};

/// [`Ledger`] kept in PostgreSQL.
pub struct PgLedger {
    pool: PgPool,
    default_company: Option<Uuid>,
}

impl PgLedger {
    pub async fn new(config: &DatabaseConfig, default_company: Option<Uuid>) -> Result<Self> {
        info!("Connecting to PostgreSQL database {}@{}", config.database, config.host);

        let pool = PgPool::connect(&config.url())
            .await
            .context("Unable to connect to the database")?;

        info!("Database connection established");

        let db = PgLedger {
            pool,
            default_company,
        };

        // Create tables if they don't exist
        db.create_tables_if_not_exists().await?;

        Ok(db)
    }

    async fn create_tables_if_not_exists(&self) -> Result<()> {
        info!("Checking/creating database tables");

        let statements: [(&str, &str); 12] = [
            (
                "companies",
                r#"
                CREATE TABLE IF NOT EXISTS companies (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    name VARCHAR(255) NOT NULL,
                    vat VARCHAR(64),
                    created_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            ),
            (
                "partners",
                r#"
                CREATE TABLE IF NOT EXISTS partners (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    name VARCHAR(255) NOT NULL,
                    vat VARCHAR(64) NOT NULL,
                    supplier_rank INTEGER NOT NULL DEFAULT 0,
                    company_type VARCHAR(16) NOT NULL DEFAULT 'company',
                    created_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            ),
            (
                "journals",
                r#"
                CREATE TABLE IF NOT EXISTS journals (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    company_id UUID NOT NULL REFERENCES companies(id),
                    name VARCHAR(255) NOT NULL,
                    journal_type VARCHAR(16) NOT NULL,
                    created_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            ),
            (
                "accounts",
                r#"
                CREATE TABLE IF NOT EXISTS accounts (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    company_id UUID NOT NULL REFERENCES companies(id),
                    code VARCHAR(64) NOT NULL,
                    name VARCHAR(255) NOT NULL,
                    account_type VARCHAR(32) NOT NULL DEFAULT 'expense',
                    created_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            ),
            (
                "taxes",
                r#"
                CREATE TABLE IF NOT EXISTS taxes (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    company_id UUID NOT NULL REFERENCES companies(id),
                    name VARCHAR(255) NOT NULL,
                    type_tax_use VARCHAR(16) NOT NULL DEFAULT 'purchase',
                    l10n_cr_edi_code VARCHAR(16),
                    tax_code VARCHAR(16),
                    code VARCHAR(16),
                    created_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            ),
            (
                "gateways",
                r#"
                CREATE TABLE IF NOT EXISTS gateways (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    name VARCHAR(255) NOT NULL,
                    company_id UUID NOT NULL REFERENCES companies(id),
                    journal_id UUID REFERENCES journals(id),
                    process_emails_from DATE,
                    created_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            ),
            (
                "bills",
                r#"
                CREATE TABLE IF NOT EXISTS bills (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    move_type VARCHAR(16),
                    company_id UUID REFERENCES companies(id),
                    journal_id UUID REFERENCES journals(id),
                    partner_id UUID REFERENCES partners(id),
                    ref VARCHAR(255),
                    invoice_date DATE,
                    supplier_xml_key VARCHAR(64),
                    supplier_xml_filename VARCHAR(255),
                    supplier_xml_gateway_id UUID REFERENCES gateways(id),
                    created_at TIMESTAMPTZ DEFAULT NOW(),
                    updated_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            ),
            (
                "bill_lines",
                r#"
                CREATE TABLE IF NOT EXISTS bill_lines (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    bill_id UUID NOT NULL REFERENCES bills(id) ON DELETE CASCADE,
                    sequence INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    quantity DOUBLE PRECISION NOT NULL,
                    price_unit DOUBLE PRECISION NOT NULL,
                    account_id UUID NOT NULL REFERENCES accounts(id)
                )
                "#,
            ),
            (
                "bill_line_taxes",
                r#"
                CREATE TABLE IF NOT EXISTS bill_line_taxes (
                    line_id UUID NOT NULL REFERENCES bill_lines(id) ON DELETE CASCADE,
                    tax_id UUID NOT NULL REFERENCES taxes(id),
                    PRIMARY KEY (line_id, tax_id)
                )
                "#,
            ),
            (
                "attachments",
                r#"
                CREATE TABLE IF NOT EXISTS attachments (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    bill_id UUID NOT NULL REFERENCES bills(id) ON DELETE CASCADE,
                    name VARCHAR(255) NOT NULL,
                    mimetype VARCHAR(128),
                    raw BYTEA,
                    datas TEXT,
                    via_message BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            ),
            (
                "messages",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    thread_kind VARCHAR(16) NOT NULL,
                    thread_id UUID NOT NULL,
                    body TEXT NOT NULL,
                    created_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            ),
            (
                "partners vat index",
                "CREATE INDEX IF NOT EXISTS idx_partners_vat ON partners (vat)",
            ),
        ];

        for (name, statement) in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Unable to create {}", name))?;
        }

        info!("Database tables checked/created successfully");
        Ok(())
    }

    async fn fetch_company(&self, id: Option<Uuid>) -> Result<Company> {
        let row = match id.or(self.default_company) {
            Some(id) => sqlx::query("SELECT id, name, vat FROM companies WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Error retrieving company")?,
            None => sqlx::query("SELECT id, name, vat FROM companies ORDER BY created_at, id LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .context("Error retrieving default company")?,
        };

        match row {
            Some(row) => Ok(Company {
                id: row.get("id"),
                name: row.get("name"),
                vat: row.get("vat"),
            }),
            None => bail!("Company not found ({:?})", id.or(self.default_company)),
        }
    }

    async fn fetch_partner_by_vat(&self, vat: &str) -> Result<Option<Partner>> {
        let row = sqlx::query(
            "SELECT id, name, vat, supplier_rank FROM partners WHERE vat = $1 ORDER BY created_at, id LIMIT 1",
        )
        .bind(vat)
        .fetch_optional(&self.pool)
        .await
        .context("Error searching partner")?;

        Ok(row.map(|row| Partner {
            id: row.get("id"),
            name: row.get("name"),
            vat: row.get("vat"),
            supplier_rank: row.get("supplier_rank"),
        }))
    }

    async fn insert_partner(&self, partner: &NewPartner) -> Result<Partner> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO partners (name, vat, supplier_rank, company_type) VALUES ($1, $2, 1, 'company') RETURNING id",
        )
        .bind(&partner.name)
        .bind(&partner.vat)
        .fetch_one(&self.pool)
        .await
        .context("Error inserting partner")?;

        debug!("New partner created: {} ({})", partner.name, partner.vat);
        Ok(Partner {
            id,
            name: partner.name.clone(),
            vat: partner.vat.clone(),
            supplier_rank: 1,
        })
    }

    fn journal_from_row(row: &PgRow) -> Journal {
        let raw_type: String = row.get("journal_type");
        let journal_type = JournalType::parse(&raw_type).unwrap_or_else(|| {
            warn!("Unknown journal type '{}', read as general", raw_type);
            JournalType::General
        });
        Journal {
            id: row.get("id"),
            company_id: row.get("company_id"),
            name: row.get("name"),
            journal_type,
        }
    }

    async fn fetch_journal(&self, id: Uuid) -> Result<Option<Journal>> {
        let row = sqlx::query("SELECT id, company_id, name, journal_type FROM journals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Error retrieving journal")?;
        Ok(row.as_ref().map(Self::journal_from_row))
    }

    async fn fetch_first_purchase_journal(&self, company_id: Uuid) -> Result<Option<Journal>> {
        let row = sqlx::query(
            r#"
            SELECT id, company_id, name, journal_type
            FROM journals
            WHERE company_id = $1 AND journal_type = $2
            ORDER BY created_at, id
            LIMIT 1
            "#,
        )
        .bind(company_id)
        .bind(JournalType::Purchase.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Error searching purchase journal")?;
        Ok(row.as_ref().map(Self::journal_from_row))
    }

    async fn fetch_default_expense_account(&self, company_id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, company_id, code, name
            FROM accounts
            WHERE company_id = $1 AND account_type = 'expense'
            ORDER BY code, id
            LIMIT 1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
        .context("Error searching expense account")?;

        Ok(row.map(|row| Account {
            id: row.get("id"),
            company_id: row.get("company_id"),
            code: row.get("code"),
            name: row.get("name"),
        }))
    }

    async fn fetch_purchase_tax(&self, company_id: Uuid, scheme: TaxCodeScheme, code: &str) -> Result<Option<Uuid>> {
        let query = format!(
            r#"
            SELECT id FROM taxes
            WHERE company_id = $1 AND type_tax_use IN ($2, $3) AND {} = $4
            ORDER BY created_at, id
            LIMIT 1
            "#,
            scheme.column()
        );
        let id = sqlx::query_scalar(&query)
            .bind(company_id)
            .bind(TaxUse::Purchase.as_str())
            .bind(TaxUse::None.as_str())
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Error searching tax by {}", scheme.column()))?;
        Ok(id)
    }

    async fn insert_lines(
        transaction: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bill_id: Uuid,
        lines: &[LineCommand],
    ) -> Result<()> {
        for (sequence, line) in lines.iter().enumerate() {
            let line_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO bill_lines (bill_id, sequence, name, quantity, price_unit, account_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                "#,
            )
            .bind(bill_id)
            .bind(sequence as i32)
            .bind(&line.name)
            .bind(line.quantity)
            .bind(line.price_unit)
            .bind(line.account_id)
            .fetch_one(&mut **transaction)
            .await
            .context("Error inserting bill line")?;

            for tax_id in &line.tax_ids {
                sqlx::query("INSERT INTO bill_line_taxes (line_id, tax_id) VALUES ($1, $2)")
                    .bind(line_id)
                    .bind(tax_id)
                    .execute(&mut **transaction)
                    .await
                    .context("Error linking tax to bill line")?;
            }
        }
        Ok(())
    }

    async fn insert_bill(&self, payload: &ResolvedBillPayload, origin: &BillOrigin) -> Result<Uuid> {
        let mut transaction = self.pool.begin().await.context("Unable to start transaction")?;

        let bill_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO bills
            (move_type, company_id, journal_id, partner_id, ref, invoice_date,
             supplier_xml_key, supplier_xml_filename, supplier_xml_gateway_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(payload.move_type().as_str())
        .bind(payload.company_id())
        .bind(payload.journal_id())
        .bind(payload.partner_id())
        .bind(payload.reference())
        .bind(payload.invoice_date())
        .bind(payload.document_key())
        .bind(&origin.filename)
        .bind(origin.gateway_id)
        .fetch_one(&mut *transaction)
        .await
        .context("Error inserting bill")?;

        Self::insert_lines(&mut transaction, bill_id, payload.lines()).await?;

        transaction.commit().await.context("Error committing transaction")?;

        info!("Bill {} saved with {} line(s)", bill_id, payload.lines().len());
        Ok(bill_id)
    }

    async fn replace_bill(&self, bill_id: Uuid, payload: &ResolvedBillPayload, origin: &BillOrigin) -> Result<()> {
        let mut transaction = self.pool.begin().await.context("Unable to start transaction")?;

        let updated = sqlx::query(
            r#"
            UPDATE bills SET
                move_type = $2, company_id = $3, journal_id = $4, partner_id = $5,
                ref = $6, invoice_date = $7, supplier_xml_key = $8,
                supplier_xml_filename = COALESCE($9, supplier_xml_filename),
                supplier_xml_gateway_id = COALESCE($10, supplier_xml_gateway_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(bill_id)
        .bind(payload.move_type().as_str())
        .bind(payload.company_id())
        .bind(payload.journal_id())
        .bind(payload.partner_id())
        .bind(payload.reference())
        .bind(payload.invoice_date())
        .bind(payload.document_key())
        .bind(&origin.filename)
        .bind(origin.gateway_id)
        .execute(&mut *transaction)
        .await
        .context("Error updating bill")?;

        if updated.rows_affected() == 0 {
            bail!("Bill {} not found", bill_id);
        }

        sqlx::query("DELETE FROM bill_lines WHERE bill_id = $1")
            .bind(bill_id)
            .execute(&mut *transaction)
            .await
            .context("Error removing previous bill lines")?;

        Self::insert_lines(&mut transaction, bill_id, payload.lines()).await?;

        transaction.commit().await.context("Error committing transaction")?;

        info!("Bill {} refilled with {} line(s)", bill_id, payload.lines().len());
        Ok(())
    }

    async fn fetch_bill_attachments(&self, bill_id: Uuid) -> Result<Vec<StoredAttachment>> {
        let rows = sqlx::query(
            r#"
            SELECT name, mimetype, raw, datas
            FROM attachments
            WHERE bill_id = $1
            ORDER BY via_message, created_at, id
            "#,
        )
        .bind(bill_id)
        .fetch_all(&self.pool)
        .await
        .context("Error retrieving attachments")?;

        let attachments = rows
            .into_iter()
            .map(|row| {
                let raw: Option<Vec<u8>> = row.get("raw");
                let datas: Option<String> = row.get("datas");
                let data = match (raw, datas) {
                    (Some(bytes), _) => AttachmentData::Raw(bytes),
                    (None, Some(text)) => AttachmentData::Base64(text),
                    (None, None) => AttachmentData::Raw(Vec::new()),
                };
                StoredAttachment {
                    name: row.get("name"),
                    data,
                    mimetype: row.get("mimetype"),
                }
            })
            .collect();
        Ok(attachments)
    }

    /// Store a file on a bill, directly or as part of its message thread.
    pub async fn add_attachment(&self, bill_id: Uuid, attachment: &StoredAttachment, via_message: bool) -> Result<()> {
        let (raw, datas) = match &attachment.data {
            AttachmentData::Raw(bytes) => (Some(bytes.as_slice()), None),
            AttachmentData::Base64(text) => (None, Some(text.as_str())),
        };
        sqlx::query(
            "INSERT INTO attachments (bill_id, name, mimetype, raw, datas, via_message) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(bill_id)
        .bind(&attachment.name)
        .bind(&attachment.mimetype)
        .bind(raw)
        .bind(datas)
        .bind(via_message)
        .execute(&self.pool)
        .await
        .context("Error inserting attachment")?;
        Ok(())
    }

    async fn insert_message(&self, thread: Thread, body: &str) -> Result<()> {
        let (kind, id) = match thread {
            Thread::Bill(id) => ("bill", id),
            Thread::Gateway(id) => ("gateway", id),
        };
        sqlx::query("INSERT INTO messages (thread_kind, thread_id, body) VALUES ($1, $2, $3)")
            .bind(kind)
            .bind(id)
            .bind(body)
            .execute(&self.pool)
            .await
            .context("Error posting message")?;
        Ok(())
    }

    async fn fetch_gateway(&self, id: Uuid) -> Result<Option<Gateway>> {
        let row = sqlx::query(
            "SELECT id, name, company_id, journal_id, process_emails_from FROM gateways WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Error retrieving gateway")?;

        Ok(row.map(|row| Gateway {
            id: row.get("id"),
            name: row.get("name"),
            company_id: row.get("company_id"),
            journal_id: row.get("journal_id"),
            process_emails_from: row.get("process_emails_from"),
        }))
    }

    async fn fetch_gateway_bills(&self, gateway_id: Uuid) -> Result<Vec<BillSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, move_type, ref, invoice_date, partner_id, supplier_xml_filename
            FROM bills
            WHERE supplier_xml_gateway_id = $1 AND partner_id IS NOT NULL
            ORDER BY created_at DESC
            "#,
        )
        .bind(gateway_id)
        .fetch_all(&self.pool)
        .await
        .context("Error retrieving gateway bills")?;

        let mut bills = Vec::new();
        for row in rows {
            bills.push(BillSummary {
                id: row.get("id"),
                move_type: row.get::<Option<String>, _>("move_type").unwrap_or_default(),
                reference: row.get("ref"),
                invoice_date: row.get("invoice_date"),
                partner_id: row.get("partner_id"),
                filename: row.get("supplier_xml_filename"),
            });
        }
        Ok(bills)
    }

    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");
        self.pool.close().await;
        Ok(())
    }
}

impl Ledger for PgLedger {
    fn company<'a>(&'a self, id: Option<Uuid>) -> LedgerFuture<'a, Company> {
        Box::pin(self.fetch_company(id))
    }

    fn find_partner_by_vat<'a>(&'a self, vat: &'a str) -> LedgerFuture<'a, Option<Partner>> {
        Box::pin(self.fetch_partner_by_vat(vat))
    }

    fn create_partner<'a>(&'a self, partner: &'a NewPartner) -> LedgerFuture<'a, Partner> {
        Box::pin(self.insert_partner(partner))
    }

    fn journal<'a>(&'a self, id: Uuid) -> LedgerFuture<'a, Option<Journal>> {
        Box::pin(self.fetch_journal(id))
    }

    fn first_purchase_journal<'a>(&'a self, company_id: Uuid) -> LedgerFuture<'a, Option<Journal>> {
        Box::pin(self.fetch_first_purchase_journal(company_id))
    }

    fn default_expense_account<'a>(&'a self, company_id: Uuid) -> LedgerFuture<'a, Option<Account>> {
        Box::pin(self.fetch_default_expense_account(company_id))
    }

    fn find_purchase_tax<'a>(
        &'a self,
        company_id: Uuid,
        scheme: TaxCodeScheme,
        code: &'a str,
    ) -> LedgerFuture<'a, Option<Uuid>> {
        Box::pin(self.fetch_purchase_tax(company_id, scheme, code))
    }

    fn create_bill<'a>(
        &'a self,
        payload: &'a ResolvedBillPayload,
        origin: &'a BillOrigin,
    ) -> LedgerFuture<'a, Uuid> {
        Box::pin(self.insert_bill(payload, origin))
    }

    fn update_bill<'a>(
        &'a self,
        bill_id: Uuid,
        payload: &'a ResolvedBillPayload,
        origin: &'a BillOrigin,
    ) -> LedgerFuture<'a, ()> {
        Box::pin(self.replace_bill(bill_id, payload, origin))
    }

    fn bill_attachments<'a>(&'a self, bill_id: Uuid) -> LedgerFuture<'a, Vec<StoredAttachment>> {
        Box::pin(self.fetch_bill_attachments(bill_id))
    }

    fn post_message<'a>(&'a self, thread: Thread, body: &'a str) -> LedgerFuture<'a, ()> {
        Box::pin(self.insert_message(thread, body))
    }

    fn gateway<'a>(&'a self, id: Uuid) -> LedgerFuture<'a, Option<Gateway>> {
        Box::pin(self.fetch_gateway(id))
    }

    fn gateway_bills<'a>(&'a self, gateway_id: Uuid) -> LedgerFuture<'a, Vec<BillSummary>> {
        Box::pin(self.fetch_gateway_bills(gateway_id))
    }
}
