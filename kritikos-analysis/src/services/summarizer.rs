//! Summarizer stage
//!
//! Condenses the full bill text into a bounded summary covering purpose,
//! scope, mechanism and fiscal sustainability. Later stages only see this
//! summary, never the full text.

use kritikos_common::db::Proposal;
use std::sync::Arc;

use crate::llm::{LlmClient, LlmError};
use crate::utils::text::{limit_words, truncate_chars};

pub const DEFAULT_MAX_INPUT_CHARS: usize = 60_000;
pub const MAX_SUMMARY_WORDS: usize = 250;

const SUMMARY_PROMPT: &str = r#"Você é um analista legislativo. Resuma a proposição abaixo em português, em no máximo 250 palavras, cobrindo:
1. Objetivo: o problema que a proposição pretende resolver.
2. Escopo e impacto: quem é afetado e em que escala.
3. Mecanismo: como a proposição altera a legislação ou cria obrigações.
4. Sustentabilidade fiscal: custos, fontes de financiamento e impacto orçamentário.

Escreva apenas o resumo, sem introdução nem comentários.

Proposição: {label}
Ementa: {ementa}

Texto:
{text}"#;

pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
    max_input_chars: usize,
    max_words: usize,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>, max_input_chars: usize) -> Self {
        Self {
            llm,
            max_input_chars,
            max_words: MAX_SUMMARY_WORDS,
        }
    }

    pub fn build_prompt(&self, proposal: &Proposal, text: &str) -> String {
        let input = truncate_chars(text, self.max_input_chars);
        if input.len() < text.len() {
            tracing::debug!(
                proposal_id = proposal.id,
                max_input_chars = self.max_input_chars,
                "Bill text truncated for summarization"
            );
        }

        SUMMARY_PROMPT
            .replace("{label}", &proposal.label())
            .replace("{ementa}", proposal.summary_line.as_deref().unwrap_or("(sem ementa)"))
            .replace("{text}", input)
    }

    /// Summarize `text`; the result is trimmed and capped at 250 words
    pub async fn summarize(&self, proposal: &Proposal, text: &str) -> Result<String, LlmError> {
        let prompt = self.build_prompt(proposal, text);
        let reply = self.llm.complete(&prompt).await?;

        let summary = reply.trim();
        if summary.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let bounded = limit_words(summary, self.max_words);
        if bounded.len() != summary.len() {
            tracing::warn!(
                proposal_id = proposal.id,
                words = summary.split_whitespace().count(),
                max_words = self.max_words,
                "Summary exceeded word limit, truncated"
            );
        }

        Ok(bounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoLlm {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn proposal() -> Proposal {
        Proposal {
            id: 1,
            camara_id: 10,
            kind: "PL".to_string(),
            number: Some(5),
            year: Some(2025),
            summary_line: Some("Institui o programa".to_string()),
            explanation: None,
            presented_at: None,
            full_text_url: None,
            storage_url: None,
        }
    }

    fn llm(reply: &str) -> Arc<EchoLlm> {
        Arc::new(EchoLlm {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_prompt_carries_label_and_truncated_text() {
        let client = llm("Resumo.");
        let summarizer = Summarizer::new(client.clone(), 10);

        let summary = summarizer.summarize(&proposal(), "0123456789ABCDEF").await.unwrap();
        assert_eq!(summary, "Resumo.");

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("PL 5/2025"));
        assert!(prompts[0].contains("Institui o programa"));
        assert!(prompts[0].contains("0123456789"));
        assert!(!prompts[0].contains("ABCDEF"));
    }

    #[tokio::test]
    async fn test_long_summary_is_capped() {
        let long = "palavra ".repeat(400);
        let summarizer = Summarizer::new(llm(&long), DEFAULT_MAX_INPUT_CHARS);

        let summary = summarizer.summarize(&proposal(), "texto").await.unwrap();
        // 250 words plus the truncation marker
        assert_eq!(summary.split_whitespace().count(), MAX_SUMMARY_WORDS + 1);
    }

    #[tokio::test]
    async fn test_blank_reply_is_error() {
        let summarizer = Summarizer::new(llm("   \n"), DEFAULT_MAX_INPUT_CHARS);
        let result = summarizer.summarize(&proposal(), "texto").await;
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }
}
