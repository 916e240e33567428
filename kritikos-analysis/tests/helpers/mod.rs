//! Test Helper Utilities
//!
//! Scripted LLM and text source fakes plus database fixtures shared by the
//! kritikos-analysis integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kritikos_analysis::config::PipelineSettings;
use kritikos_analysis::llm::{LlmClient, LlmError};
use kritikos_analysis::services::{FetchError, ProposalFetcher, TextSource};
use kritikos_analysis::workflow::{AnalysisPipeline, BatchDriver};
use kritikos_common::db::{load_proposal, upsert_proposal, Proposal};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SUMMARY_REPLY: &str = "Objetivo: ampliar o acesso à educação básica em tempo integral. \
     Escopo: redes municipais e estaduais de ensino. Mecanismo: transferências condicionadas \
     a metas de matrícula. Sustentabilidade fiscal: custeio pelo orçamento do Ministério da Educação.";

pub const RELEVANT_VERDICT: &str = r#"{"trivial": false, "motivo": "altera política educacional"}"#;
pub const TRIVIAL_VERDICT: &str = r#"{"trivial": true, "motivo": "caráter simbólico"}"#;

pub const PAR_REPLY: &str = r#"Segue a avaliação:
```json
{"escopo_impacto": 25, "alinhamento_ods": 24, "inovacao_eficiencia": 12,
 "sustentabilidade_fiscal": 14, "penalidade_oneracao": 3, "par_final": 72,
 "resumo_analise": "Amplo alcance e custeio definido.", "ods_identificados": [4, "ODS 10"]}
```"#;

/// Prompt families recognized by [`FakeLlm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prompt {
    Summary,
    Filter,
    Par,
}

impl Prompt {
    fn classify(prompt: &str) -> Option<Self> {
        if prompt.contains("Resuma a proposição") {
            Some(Prompt::Summary)
        } else if prompt.contains("classifica proposições") {
            Some(Prompt::Filter)
        } else if prompt.contains("índice PAR") {
            Some(Prompt::Par)
        } else {
            None
        }
    }
}

/// LLM answering each stage prompt with a scripted reply
pub struct FakeLlm {
    replies: Mutex<HashMap<Prompt, String>>,
    failing: Mutex<HashSet<Prompt>>,
    calls: Mutex<Vec<Prompt>>,
}

impl FakeLlm {
    /// Summarizes, classifies as relevant and scores 72
    pub fn relevant() -> Self {
        let mut replies = HashMap::new();
        replies.insert(Prompt::Summary, SUMMARY_REPLY.to_string());
        replies.insert(Prompt::Filter, RELEVANT_VERDICT.to_string());
        replies.insert(Prompt::Par, PAR_REPLY.to_string());
        Self {
            replies: Mutex::new(replies),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, prompt: Prompt, reply: &str) {
        self.replies.lock().unwrap().insert(prompt, reply.to_string());
    }

    /// Make `prompt` answer with a non-retryable API error
    pub fn fail(&self, prompt: Prompt) {
        self.failing.lock().unwrap().insert(prompt);
    }

    pub fn heal(&self, prompt: Prompt) {
        self.failing.lock().unwrap().remove(&prompt);
    }

    pub fn calls(&self, prompt: Prompt) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| **p == prompt).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let kind = Prompt::classify(prompt).ok_or_else(|| LlmError::Parse("unexpected prompt".to_string()))?;
        self.calls.lock().unwrap().push(kind);

        if self.failing.lock().unwrap().contains(&kind) {
            return Err(LlmError::Api {
                status: 400,
                body: format!("scripted {:?} failure", kind),
            });
        }

        self.replies
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }
}

/// Text source serving the same bill text for every proposal
pub struct FakeTextSource {
    text: Mutex<Option<String>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeTextSource {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: Mutex::new(Some(text.to_string())),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            text: Mutex::new(None),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextSource for FakeTextSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(&self, _proposal: &Proposal) -> Result<Option<String>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection reset".to_string()));
        }
        Ok(self.text.lock().unwrap().clone())
    }
}

/// Bill text long enough to be analyzed
pub fn bill_text() -> String {
    "Art. 1º Fica instituído o Programa de Educação Integral, destinado a ampliar a jornada escolar \
     nas redes públicas de ensino. Art. 2º A União transferirá recursos aos entes que cumprirem \
     metas anuais de matrícula em tempo integral. Art. 3º As despesas correrão à conta das dotações \
     orçamentárias do Ministério da Educação."
        .to_string()
}

/// Settings with no delays, so tests run fast
pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        item_delay: Duration::ZERO,
        lot_pause: Duration::ZERO,
        max_lock_wait_ms: 1000,
        ..Default::default()
    }
}

pub async fn setup_pool() -> SqlitePool {
    kritikos_analysis::db::init_memory_pool()
        .await
        .expect("Failed to create in-memory database")
}

/// Insert a proposal and return it with its assigned id
pub async fn insert_proposal(pool: &SqlitePool, camara_id: i64, ementa: &str) -> Proposal {
    let proposal = Proposal {
        id: 0,
        camara_id,
        kind: "PL".to_string(),
        number: Some(camara_id % 10_000),
        year: Some(2025),
        summary_line: Some(ementa.to_string()),
        explanation: None,
        presented_at: Some("2025-03-10".to_string()),
        full_text_url: None,
        storage_url: None,
    };
    let id = upsert_proposal(pool, &proposal).await.expect("Failed to insert proposal");
    load_proposal(pool, id)
        .await
        .expect("Failed to load proposal")
        .expect("Proposal missing after insert")
}

pub fn build_pipeline(
    pool: &SqlitePool,
    llm: Arc<FakeLlm>,
    source: Arc<FakeTextSource>,
    settings: PipelineSettings,
) -> AnalysisPipeline {
    let fetcher = ProposalFetcher::new(vec![source as Arc<dyn TextSource>]);
    AnalysisPipeline::new(pool.clone(), llm as Arc<dyn LlmClient>, Arc::new(fetcher), settings)
}

pub fn build_driver(
    pool: &SqlitePool,
    llm: Arc<FakeLlm>,
    source: Arc<FakeTextSource>,
    settings: PipelineSettings,
) -> BatchDriver {
    BatchDriver::new(Arc::new(build_pipeline(pool, llm, source, settings)))
}

/// processing_logs rows as (kind, status), oldest first
pub async fn log_rows(pool: &SqlitePool) -> Vec<(String, String)> {
    sqlx::query_as("SELECT process_kind, status FROM processing_logs ORDER BY id")
        .fetch_all(pool)
        .await
        .expect("Failed to read processing_logs")
}
