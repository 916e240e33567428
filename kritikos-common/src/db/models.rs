//! Source-data row models
//!
//! Legislators, proposals, authorships, expenses and earmarks are loaded by
//! the ETL collectors. The upsert helpers here are what those loaders (and
//! the test fixtures) call; they are keyed on the Chamber's own ids so a
//! re-run of a collector never duplicates rows.

use crate::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Legislator (deputado)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Legislator {
    pub id: i64,
    pub camara_id: i64,
    pub name: String,
    pub party: Option<String>,
    pub state_uf: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub status: Option<String>,
}

/// Legislative proposal (proposição)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: i64,
    pub camara_id: i64,
    /// Proposal type acronym (PL, PEC, PLP, ...)
    pub kind: String,
    pub number: Option<i64>,
    pub year: Option<i64>,
    /// Official one-paragraph description (ementa)
    pub summary_line: Option<String>,
    pub explanation: Option<String>,
    /// Presentation date (ISO 8601)
    pub presented_at: Option<String>,
    /// Chamber "inteiro teor" document URL
    pub full_text_url: Option<String>,
    /// Object storage location of the extracted text, when already mirrored
    pub storage_url: Option<String>,
}

impl Proposal {
    /// Human label such as "PL 1234/2025"
    pub fn label(&self) -> String {
        match (self.number, self.year) {
            (Some(number), Some(year)) => format!("{} {}/{}", self.kind, number, year),
            _ => format!("{} (camara id {})", self.kind, self.camara_id),
        }
    }

    pub(crate) fn from_row(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            camara_id: row.try_get("camara_id")?,
            kind: row.try_get("kind")?,
            number: row.try_get("number")?,
            year: row.try_get("year")?,
            summary_line: row.try_get("summary_line")?,
            explanation: row.try_get("explanation")?,
            presented_at: row.try_get("presented_at")?,
            full_text_url: row.try_get("full_text_url")?,
            storage_url: row.try_get("storage_url")?,
        })
    }
}

/// Column list matching [`Proposal::from_row`]
pub const PROPOSAL_COLUMNS: &str = "p.id, p.camara_id, p.kind, p.number, p.year, p.summary_line, \
     p.explanation, p.presented_at, p.full_text_url, p.storage_url";

/// Load one proposal by primary key
pub async fn load_proposal(pool: &SqlitePool, id: i64) -> Result<Option<Proposal>> {
    let sql = format!("SELECT {} FROM proposals p WHERE p.id = ?", PROPOSAL_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    Ok(row.map(|r| Proposal::from_row(&r)).transpose()?)
}

/// Decode a row selected with [`PROPOSAL_COLUMNS`]
pub fn proposal_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Proposal> {
    Ok(Proposal::from_row(row)?)
}

/// Insert or update a legislator keyed by Chamber id; returns the row id
///
/// An `id` of 0 lets SQLite assign the row id.
pub async fn upsert_legislator(pool: &SqlitePool, legislator: &Legislator) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO legislators (id, camara_id, name, party, state_uf, email, photo_url, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(camara_id) DO UPDATE SET
            name = excluded.name,
            party = excluded.party,
            state_uf = excluded.state_uf,
            email = excluded.email,
            photo_url = excluded.photo_url,
            status = excluded.status
        RETURNING id
        "#,
    )
    .bind((legislator.id > 0).then_some(legislator.id))
    .bind(legislator.camara_id)
    .bind(&legislator.name)
    .bind(&legislator.party)
    .bind(&legislator.state_uf)
    .bind(&legislator.email)
    .bind(&legislator.photo_url)
    .bind(&legislator.status)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Insert or update a proposal keyed by Chamber id; returns the row id
///
/// An `id` of 0 lets SQLite assign the row id.
pub async fn upsert_proposal(pool: &SqlitePool, proposal: &Proposal) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO proposals (id, camara_id, kind, number, year, summary_line, explanation,
                               presented_at, full_text_url, storage_url)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(camara_id) DO UPDATE SET
            kind = excluded.kind,
            number = excluded.number,
            year = excluded.year,
            summary_line = excluded.summary_line,
            explanation = excluded.explanation,
            presented_at = excluded.presented_at,
            full_text_url = excluded.full_text_url,
            storage_url = excluded.storage_url
        RETURNING id
        "#,
    )
    .bind((proposal.id > 0).then_some(proposal.id))
    .bind(proposal.camara_id)
    .bind(&proposal.kind)
    .bind(proposal.number)
    .bind(proposal.year)
    .bind(&proposal.summary_line)
    .bind(&proposal.explanation)
    .bind(&proposal.presented_at)
    .bind(&proposal.full_text_url)
    .bind(&proposal.storage_url)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Link a proposal to one of its authors (idempotent)
pub async fn upsert_authorship(
    pool: &SqlitePool,
    proposal_id: i64,
    legislator_id: i64,
    authorship_kind: Option<&str>,
    position: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO authorships (proposal_id, legislator_id, authorship_kind, position)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(proposal_id, legislator_id) DO UPDATE SET
            authorship_kind = excluded.authorship_kind,
            position = excluded.position
        "#,
    )
    .bind(proposal_id)
    .bind(legislator_id)
    .bind(authorship_kind)
    .bind(position)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record one expense (cota parlamentar) entry
pub async fn insert_expense(
    pool: &SqlitePool,
    legislator_id: i64,
    year: i64,
    month: i64,
    expense_kind: &str,
    net_value: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO expenses (legislator_id, year, month, expense_kind, document_value, net_value)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(legislator_id)
    .bind(year)
    .bind(month)
    .bind(expense_kind)
    .bind(net_value)
    .bind(net_value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record one earmark (emenda parlamentar)
pub async fn insert_earmark(
    pool: &SqlitePool,
    legislator_id: i64,
    year: i64,
    committed_value: f64,
    paid_value: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO earmarks (legislator_id, year, kind, committed_value, paid_value)
        VALUES (?, ?, 'individual', ?, ?)
        "#,
    )
    .bind(legislator_id)
    .bind(year)
    .bind(committed_value)
    .bind(paid_value)
    .execute(pool)
    .await?;

    Ok(())
}
