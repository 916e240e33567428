//! legislator_scores persistence and ranking queries

use chrono::{DateTime, Utc};
use kritikos_common::time::to_db_timestamp;
use kritikos_common::{Error, Result};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::pagination::{calculate_pagination, Pagination};
use crate::scoring::AxisScores;
use crate::utils::retry_on_lock;

/// Computed index of one legislator under one methodology
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegislatorScore {
    pub legislator_id: i64,
    pub methodology_version: String,
    pub reference_year: Option<i64>,
    #[serde(flatten)]
    pub scores: AxisScores,
    pub total_proposals: i64,
    pub analyzed_proposals: i64,
    pub trivial_proposals: i64,
    pub relevant_proposals: i64,
    pub total_expenses: f64,
    pub earmarks_committed: f64,
    pub earmarks_paid: f64,
    pub computed_at: DateTime<Utc>,
}

/// Insert or replace the score for (legislator, methodology)
pub async fn upsert_score(pool: &SqlitePool, score: &LegislatorScore, max_wait_ms: u64) -> Result<()> {
    let computed_at = to_db_timestamp(score.computed_at);

    retry_on_lock("upsert_legislator_score", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO legislator_scores (
                legislator_id, methodology_version, reference_year,
                performance_score, relevance_score, responsibility_score, ethics_score, final_score,
                total_proposals, analyzed_proposals, trivial_proposals, relevant_proposals,
                total_expenses, earmarks_committed, earmarks_paid, computed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(legislator_id, methodology_version) DO UPDATE SET
                reference_year = excluded.reference_year,
                performance_score = excluded.performance_score,
                relevance_score = excluded.relevance_score,
                responsibility_score = excluded.responsibility_score,
                ethics_score = excluded.ethics_score,
                final_score = excluded.final_score,
                total_proposals = excluded.total_proposals,
                analyzed_proposals = excluded.analyzed_proposals,
                trivial_proposals = excluded.trivial_proposals,
                relevant_proposals = excluded.relevant_proposals,
                total_expenses = excluded.total_expenses,
                earmarks_committed = excluded.earmarks_committed,
                earmarks_paid = excluded.earmarks_paid,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(score.legislator_id)
        .bind(&score.methodology_version)
        .bind(score.reference_year)
        .bind(score.scores.performance)
        .bind(score.scores.relevance)
        .bind(score.scores.responsibility)
        .bind(score.scores.ethics)
        .bind(score.scores.final_score)
        .bind(score.total_proposals)
        .bind(score.analyzed_proposals)
        .bind(score.trivial_proposals)
        .bind(score.relevant_proposals)
        .bind(score.total_expenses)
        .bind(score.earmarks_committed)
        .bind(score.earmarks_paid)
        .bind(&computed_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

/// Delete the methodology's rows for legislators not in `keep`
///
/// Leaves the table holding only the latest recomputation, so a ranking
/// never mixes reference years.
pub async fn prune_scores(pool: &SqlitePool, methodology_version: &str, keep: &[i64], max_wait_ms: u64) -> Result<u64> {
    let keep = serde_json::to_string(keep)?;

    retry_on_lock("prune_legislator_scores", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            DELETE FROM legislator_scores
            WHERE methodology_version = ?1
              AND legislator_id NOT IN (SELECT value FROM json_each(?2))
            "#,
        )
        .bind(methodology_version)
        .bind(&keep)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    })
    .await
}

/// Ranking filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingFilter {
    pub methodology_version: String,
    pub party: Option<String>,
    pub state_uf: Option<String>,
}

/// One line of the ranking
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct RankingEntry {
    #[sqlx(skip)]
    pub position: i64,
    pub legislator_id: i64,
    pub name: String,
    pub party: Option<String>,
    pub state_uf: Option<String>,
    pub photo_url: Option<String>,
    pub performance_score: f64,
    pub relevance_score: f64,
    pub responsibility_score: f64,
    pub ethics_score: Option<f64>,
    pub final_score: f64,
    pub total_proposals: i64,
    pub analyzed_proposals: i64,
    pub relevant_proposals: i64,
    pub computed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingPage {
    pub methodology_version: String,
    pub total: i64,
    #[serde(flatten)]
    pub pagination: Pagination,
    pub entries: Vec<RankingEntry>,
}

/// Legislators ordered by final score, best first
///
/// Party and UF filters compare case-insensitively.
pub async fn fetch_ranking(pool: &SqlitePool, filter: &RankingFilter, page: i64, per_page: i64) -> Result<RankingPage> {
    const FILTER: &str = r#"
        s.methodology_version = ?1
        AND (?2 IS NULL OR UPPER(l.party) = UPPER(?2))
        AND (?3 IS NULL OR UPPER(l.state_uf) = UPPER(?3))
    "#;

    let count_sql = format!(
        "SELECT COUNT(*) FROM legislator_scores s JOIN legislators l ON l.id = s.legislator_id WHERE {}",
        FILTER
    );
    let total: i64 = sqlx::query_scalar(&count_sql)
        .bind(&filter.methodology_version)
        .bind(&filter.party)
        .bind(&filter.state_uf)
        .fetch_one(pool)
        .await?;

    let pagination = calculate_pagination(total, page, per_page);

    let sql = format!(
        r#"
        SELECT s.legislator_id, l.name, l.party, l.state_uf, l.photo_url,
               s.performance_score, s.relevance_score, s.responsibility_score, s.ethics_score,
               s.final_score, s.total_proposals, s.analyzed_proposals, s.relevant_proposals,
               s.computed_at
        FROM legislator_scores s
        JOIN legislators l ON l.id = s.legislator_id
        WHERE {}
        ORDER BY s.final_score DESC, l.name ASC
        LIMIT ?4 OFFSET ?5
        "#,
        FILTER
    );
    let mut entries: Vec<RankingEntry> = sqlx::query_as(&sql)
        .bind(&filter.methodology_version)
        .bind(&filter.party)
        .bind(&filter.state_uf)
        .bind(pagination.per_page)
        .bind(pagination.offset)
        .fetch_all(pool)
        .await?;

    for (index, entry) in entries.iter_mut().enumerate() {
        entry.position = pagination.offset + index as i64 + 1;
    }

    Ok(RankingPage {
        methodology_version: filter.methodology_version.clone(),
        total,
        pagination,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kritikos_common::db::{upsert_legislator, Legislator};

    async fn legislator(pool: &SqlitePool, camara_id: i64, name: &str, party: &str, uf: &str) -> i64 {
        upsert_legislator(
            pool,
            &Legislator {
                id: 0,
                camara_id,
                name: name.to_string(),
                party: Some(party.to_string()),
                state_uf: Some(uf.to_string()),
                email: None,
                photo_url: None,
                status: None,
            },
        )
        .await
        .unwrap()
    }

    fn score(legislator_id: i64, final_score: f64) -> LegislatorScore {
        LegislatorScore {
            legislator_id,
            methodology_version: "1.0".to_string(),
            reference_year: None,
            scores: AxisScores {
                performance: final_score,
                relevance: final_score,
                responsibility: final_score,
                ethics: Some(final_score),
                final_score,
            },
            total_proposals: 1,
            analyzed_proposals: 1,
            trivial_proposals: 0,
            relevant_proposals: 1,
            total_expenses: 0.0,
            earmarks_committed: 0.0,
            earmarks_paid: 0.0,
            computed_at: kritikos_common::time::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_methodology() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let id = legislator(&pool, 1, "Ana", "ABC", "SP").await;

        upsert_score(&pool, &score(id, 40.0), 1000).await.unwrap();
        upsert_score(&pool, &score(id, 55.0), 1000).await.unwrap();

        let mut v2 = score(id, 70.0);
        v2.methodology_version = "2.0".to_string();
        upsert_score(&pool, &v2, 1000).await.unwrap();

        let rows: Vec<(String, f64)> =
            sqlx::query_as("SELECT methodology_version, final_score FROM legislator_scores ORDER BY methodology_version")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(rows, vec![("1.0".to_string(), 55.0), ("2.0".to_string(), 70.0)]);
    }

    #[tokio::test]
    async fn test_ranking_order_filters_and_pages() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let a = legislator(&pool, 1, "Ana", "ABC", "SP").await;
        let b = legislator(&pool, 2, "Bruno", "XYZ", "RJ").await;
        let c = legislator(&pool, 3, "Carla", "ABC", "RJ").await;
        upsert_score(&pool, &score(a, 40.0), 1000).await.unwrap();
        upsert_score(&pool, &score(b, 80.0), 1000).await.unwrap();
        upsert_score(&pool, &score(c, 60.0), 1000).await.unwrap();

        let filter = RankingFilter {
            methodology_version: "1.0".to_string(),
            ..Default::default()
        };
        let page = fetch_ranking(&pool, &filter, 1, 20).await.unwrap();
        let ids: Vec<i64> = page.entries.iter().map(|e| e.legislator_id).collect();
        assert_eq!(ids, vec![b, c, a]);
        assert_eq!(page.entries[0].position, 1);
        assert_eq!(page.total, 3);

        let page = fetch_ranking(&pool, &filter, 2, 2).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].legislator_id, a);
        assert_eq!(page.entries[0].position, 3);

        let filter = RankingFilter {
            methodology_version: "1.0".to_string(),
            party: Some("abc".to_string()),
            state_uf: Some("RJ".to_string()),
        };
        let page = fetch_ranking(&pool, &filter, 1, 20).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].legislator_id, c);

        let filter = RankingFilter {
            methodology_version: "2.0".to_string(),
            ..Default::default()
        };
        assert_eq!(fetch_ranking(&pool, &filter, 1, 20).await.unwrap().total, 0);
    }
}
