//! IDP recomputation against a seeded database

use kritikos_analysis::db::analyses::{save_checkpoint, AnalysisRecord};
use kritikos_analysis::db::scores::{fetch_ranking, RankingFilter};
use kritikos_analysis::models::{AnalysisStage, ParScore};
use kritikos_analysis::scoring::aggregator::{recompute_all, RecomputeOptions};
use kritikos_analysis::scoring::Methodology;
use kritikos_common::db::{insert_earmark, insert_expense, upsert_authorship, upsert_legislator, upsert_proposal};
use kritikos_common::db::{Legislator, Proposal};
use kritikos_common::events::{EventBus, KritikosEvent};
use sqlx::SqlitePool;

const WAIT_MS: u64 = 1000;

async fn setup_pool() -> SqlitePool {
    kritikos_analysis::db::init_memory_pool()
        .await
        .expect("Failed to create in-memory database")
}

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
            status: Some("Exercício".to_string()),
        },
    )
    .await
    .unwrap()
}

async fn authored(pool: &SqlitePool, legislator_id: i64, camara_id: i64, kind: &str, presented_at: &str) -> i64 {
    let year = presented_at[..4].parse().unwrap();
    let id = upsert_proposal(
        pool,
        &Proposal {
            id: 0,
            camara_id,
            kind: kind.to_string(),
            number: Some(camara_id),
            year: Some(year),
            summary_line: Some("Dispõe sobre políticas públicas".to_string()),
            explanation: None,
            presented_at: Some(presented_at.to_string()),
            full_text_url: None,
            storage_url: None,
        },
    )
    .await
    .unwrap();
    upsert_authorship(pool, id, legislator_id, Some("Deputado"), Some(1))
        .await
        .unwrap();
    id
}

fn par(par_final: f64, fiscal: f64, penalty: f64) -> ParScore {
    ParScore {
        scope_impact: 25.0,
        sdg_alignment: 20.0,
        innovation_efficiency: 10.0,
        fiscal_sustainability: fiscal,
        burden_penalty: penalty,
        par_final,
        sdg_goals: vec![4],
        notes: String::new(),
    }
}

async fn analysis(pool: &SqlitePool, proposal_id: i64, stage: AnalysisStage, is_trivial: bool, score: Option<ParScore>) {
    let mut record = AnalysisRecord::new(proposal_id, "1.0");
    record.stage = stage;
    record.summary = Some("Resumo".to_string());
    record.is_trivial = Some(is_trivial);
    record.par = score;
    if stage == AnalysisStage::Persisted {
        record.analyzed_at = Some(kritikos_common::time::now());
    }
    save_checkpoint(pool, &mut record, WAIT_MS).await.unwrap();
}

/// Two legislators: one with a scored relevant bill (plus an unfinished
/// analysis), one with a single trivial bill
async fn seed(pool: &SqlitePool) -> (i64, i64) {
    let ana = legislator(pool, 204_501, "Ana Souza", "PSB", "PE").await;
    let bruno = legislator(pool, 204_502, "Bruno Lima", "PL", "SP").await;

    let scored = authored(pool, ana, 2_500_001, "PL", "2025-03-10").await;
    analysis(pool, scored, AnalysisStage::Persisted, false, Some(par(72.0, 14.0, 3.0))).await;

    let unfinished = authored(pool, ana, 2_500_002, "PEC", "2024-06-02").await;
    analysis(pool, unfinished, AnalysisStage::Scored, false, Some(par(90.0, 15.0, 0.0))).await;

    let trivial = authored(pool, bruno, 2_500_003, "PL", "2025-04-22").await;
    analysis(pool, trivial, AnalysisStage::Persisted, true, None).await;

    insert_expense(pool, ana, 2025, 3, "COMBUSTÍVEIS", 1_000.0).await.unwrap();
    insert_expense(pool, bruno, 2025, 3, "PASSAGENS AÉREAS", 3_000.0).await.unwrap();
    insert_earmark(pool, ana, 2025, 100_000.0, 80_000.0).await.unwrap();

    (ana, bruno)
}

async fn stored(pool: &SqlitePool, legislator_id: i64, version: &str) -> (f64, f64, Option<f64>, f64, i64, i64) {
    sqlx::query_as(
        r#"
        SELECT relevance_score, responsibility_score, ethics_score, final_score,
               total_proposals, analyzed_proposals
        FROM legislator_scores
        WHERE legislator_id = ?1 AND methodology_version = ?2
        "#,
    )
    .bind(legislator_id)
    .bind(version)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_recompute_uses_only_finished_analyses() {
    let pool = setup_pool().await;
    let (ana, bruno) = seed(&pool).await;

    let summary = recompute_all(&pool, RecomputeOptions::default(), WAIT_MS, None)
        .await
        .unwrap();

    assert_eq!(summary.methodology_version, "1.0");
    assert_eq!(summary.legislators, 2);
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.failures, 0);

    let (relevance, responsibility, ethics, final_score, total, analyzed) = stored(&pool, ana, "1.0").await;
    // The SCORED-only analysis (PAR 90) does not count
    assert_eq!(relevance, 72.0);
    assert_eq!(responsibility, 11.0);
    assert_eq!(ethics, Some(70.0));
    assert!((final_score - 42.56).abs() < 1e-9, "got {}", final_score);
    assert_eq!(total, 2);
    assert_eq!(analyzed, 1);

    let (relevance, responsibility, ethics, _, total, analyzed) = stored(&pool, bruno, "1.0").await;
    assert_eq!(relevance, 0.0);
    assert_eq!(responsibility, 50.0);
    assert_eq!(ethics, Some(0.0));
    assert_eq!((total, analyzed), (1, 1));
}

#[tokio::test]
async fn test_recompute_logs_one_row_per_legislator() {
    let pool = setup_pool().await;
    let (ana, bruno) = seed(&pool).await;

    recompute_all(&pool, RecomputeOptions::default(), WAIT_MS, None)
        .await
        .unwrap();

    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT legislator_id, status FROM processing_logs WHERE process_kind = 'score' ORDER BY legislator_id",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows, vec![(ana, "success".to_string()), (bruno, "success".to_string())]);
}

#[tokio::test]
async fn test_recompute_is_an_upsert() {
    let pool = setup_pool().await;
    seed(&pool).await;

    recompute_all(&pool, RecomputeOptions::default(), WAIT_MS, None)
        .await
        .unwrap();
    recompute_all(&pool, RecomputeOptions::default(), WAIT_MS, None)
        .await
        .unwrap();

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM legislator_scores")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn test_reference_year_restricts_counted_data() {
    let pool = setup_pool().await;
    let (ana, _) = seed(&pool).await;

    let options = RecomputeOptions {
        methodology: Methodology::V1,
        reference_year: Some(2025),
    };
    let summary = recompute_all(&pool, options, WAIT_MS, None).await.unwrap();
    assert_eq!(summary.reference_year, Some(2025));

    let (_, _, _, _, total, analyzed) = stored(&pool, ana, "1.0").await;
    assert_eq!((total, analyzed), (1, 1));

    let year: Option<i64> = sqlx::query_scalar("SELECT reference_year FROM legislator_scores WHERE legislator_id = ?1")
        .bind(ana)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(year, Some(2025));
}

#[tokio::test]
async fn test_recompute_replaces_rows_of_other_years() {
    let pool = setup_pool().await;
    let (ana, _) = seed(&pool).await;

    let summary = recompute_all(&pool, RecomputeOptions::default(), WAIT_MS, None)
        .await
        .unwrap();
    assert_eq!((summary.updated, summary.pruned), (2, 0));

    // Only Ana authored anything in 2024
    let options = RecomputeOptions {
        methodology: Methodology::V1,
        reference_year: Some(2024),
    };
    let summary = recompute_all(&pool, options, WAIT_MS, None).await.unwrap();
    assert_eq!((summary.updated, summary.pruned), (1, 1));

    let rows: Vec<(i64, Option<i64>)> =
        sqlx::query_as("SELECT legislator_id, reference_year FROM legislator_scores WHERE methodology_version = '1.0'")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(rows, vec![(ana, Some(2024))]);

    let filter = RankingFilter {
        methodology_version: "1.0".to_string(),
        party: None,
        state_uf: None,
    };
    let page = fetch_ranking(&pool, &filter, 1, 20).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.entries[0].legislator_id, ana);
}

#[tokio::test]
async fn test_methodology_two_has_no_ethics_axis() {
    let pool = setup_pool().await;
    let (ana, _) = seed(&pool).await;

    let options = RecomputeOptions {
        methodology: Methodology::V2,
        reference_year: None,
    };
    recompute_all(&pool, options, WAIT_MS, None).await.unwrap();

    let (relevance, _, ethics, _, _, _) = stored(&pool, ana, "2.0").await;
    assert_eq!(relevance, 72.0);
    assert_eq!(ethics, None);

    let v1_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM legislator_scores WHERE methodology_version = '1.0'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(v1_rows, 0);
}

#[tokio::test]
async fn test_ranking_after_recompute() {
    let pool = setup_pool().await;
    let (ana, bruno) = seed(&pool).await;
    let bus = EventBus::new(8);
    let mut rx = bus.subscribe();

    recompute_all(&pool, RecomputeOptions::default(), WAIT_MS, Some(&bus))
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        KritikosEvent::IdpRecomputed {
            methodology_version,
            legislators,
            failures,
            ..
        } => {
            assert_eq!(methodology_version, "1.0");
            assert_eq!(legislators, 2);
            assert_eq!(failures, 0);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let filter = RankingFilter {
        methodology_version: "1.0".to_string(),
        party: None,
        state_uf: None,
    };
    let page = fetch_ranking(&pool, &filter, 1, 20).await.unwrap();
    assert_eq!(page.total, 2);
    let ids: Vec<i64> = page.entries.iter().map(|e| e.legislator_id).collect();
    assert_eq!(ids, vec![ana, bruno]);
    assert_eq!(page.entries[0].position, 1);
    assert_eq!(page.entries[0].name, "Ana Souza");

    let filter = RankingFilter {
        party: Some("pl".to_string()),
        ..filter
    };
    let page = fetch_ranking(&pool, &filter, 1, 20).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.entries[0].legislator_id, bruno);
}
