//! Triviality filter stage
//!
//! Separates symbolic proposals (naming a road, creating a commemorative
//! date, granting honorary titles) from substantive policy. Obvious cases
//! are caught by keyword before spending an LLM call.

use kritikos_common::db::Proposal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::llm::{LlmClient, LlmError};
use crate::utils::text::extract_json_object;

/// Lower-case markers of symbolic proposals
pub const TRIVIAL_KEYWORDS: &[&str] = &[
    "denomina",
    "logradouro",
    "homenagem",
    "batiza",
    "nomeia",
    "data comemorativa",
    "calendário oficial",
    "símbolo nacional",
    "cidadão honorário",
    "título de",
    "capital nacional de",
];

const FILTER_PROMPT: &str = r#"Você classifica proposições legislativas brasileiras.
Uma proposição é TRIVIAL quando tem caráter apenas simbólico ou honorífico: denominar vias, pontes ou prédios públicos, instituir datas comemorativas, conceder títulos honoríficos, declarar capitais nacionais de algo ou incluir eventos no calendário oficial.
É NAO_TRIVIAL quando altera políticas públicas, direitos, obrigações, tributos, orçamento ou a organização do Estado.

Responda somente com JSON no formato:
{"trivial": true ou false, "motivo": "justificativa em uma frase"}

Ementa: {ementa}

Resumo:
{summary}"#;

/// How the verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictMethod {
    Keyword,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrivialityVerdict {
    pub is_trivial: bool,
    pub reason: String,
    pub method: VerdictMethod,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(alias = "is_trivial", alias = "trivial_flag")]
    trivial: Option<serde_json::Value>,
    #[serde(alias = "reason", alias = "justificativa")]
    motivo: Option<String>,
}

pub struct TrivialityFilter {
    llm: Arc<dyn LlmClient>,
}

impl TrivialityFilter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, proposal: &Proposal, summary: &str) -> Result<TrivialityVerdict, LlmError> {
        let ementa = proposal.summary_line.as_deref().unwrap_or("");

        if let Some(keyword) = keyword_match(ementa).or_else(|| keyword_match(summary)) {
            tracing::debug!(proposal_id = proposal.id, keyword, "Trivial by keyword");
            return Ok(TrivialityVerdict {
                is_trivial: true,
                reason: format!("palavra-chave: {}", keyword),
                method: VerdictMethod::Keyword,
            });
        }

        let prompt = FILTER_PROMPT
            .replace("{ementa}", if ementa.is_empty() { "(sem ementa)" } else { ementa })
            .replace("{summary}", summary);
        let reply = self.llm.complete(&prompt).await?;

        let (is_trivial, reason) = parse_verdict(&reply)?;
        Ok(TrivialityVerdict {
            is_trivial,
            reason,
            method: VerdictMethod::Llm,
        })
    }
}

/// First trivial keyword contained in `text`, case-insensitively
pub fn keyword_match(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    TRIVIAL_KEYWORDS.iter().copied().find(|k| lowered.contains(k))
}

/// Read the model's verdict: JSON first, bare labels second
pub fn parse_verdict(reply: &str) -> Result<(bool, String), LlmError> {
    if let Some(json) = extract_json_object(reply) {
        if let Ok(raw) = serde_json::from_str::<RawVerdict>(json) {
            if let Some(flag) = raw.trivial.as_ref().and_then(json_bool) {
                return Ok((flag, raw.motivo.unwrap_or_default()));
            }
        }
    }

    let normalized = reply.trim().to_uppercase().replace('Ã', "A");
    let reason = reply.trim().to_string();
    if normalized.contains("NAO_TRIVIAL") || normalized.contains("NAO TRIVIAL") {
        return Ok((false, reason));
    }
    if normalized.contains("TRIVIAL") {
        return Ok((true, reason));
    }
    if normalized.starts_with("SIM") {
        return Ok((true, reason));
    }
    if normalized.starts_with("NAO") {
        return Ok((false, reason));
    }

    Err(LlmError::Parse(format!(
        "unrecognized triviality verdict: {}",
        crate::utils::text::truncate_chars(reply.trim(), 200)
    )))
}

fn json_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "sim" | "trivial" => Some(true),
            "false" | "não" | "nao" | "nao_trivial" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        assert_eq!(keyword_match("DENOMINA Viaduto Presidente X"), Some("denomina"));
        assert_eq!(keyword_match("Inclui no Calendário Oficial a festa"), Some("calendário oficial"));
        assert_eq!(keyword_match("Altera a Lei de Diretrizes Orçamentárias"), None);
    }

    #[test]
    fn test_parse_json_verdicts() {
        assert_eq!(
            parse_verdict(r#"```json
{"trivial": false, "motivo": "altera tributo"}
```"#)
            .unwrap(),
            (false, "altera tributo".to_string())
        );
        assert_eq!(
            parse_verdict(r#"{"is_trivial": "true", "reason": "homenagem"}"#).unwrap(),
            (true, "homenagem".to_string())
        );
    }

    #[test]
    fn test_parse_label_fallback() {
        assert!(!parse_verdict("NAO_TRIVIAL").unwrap().0);
        assert!(!parse_verdict("Classificação: NÃO TRIVIAL").unwrap().0);
        assert!(parse_verdict("TRIVIAL - apenas simbólica").unwrap().0);
        assert!(parse_verdict("Sim, é trivial").unwrap().0);
        assert!(!parse_verdict("Não.").unwrap().0);
    }

    #[test]
    fn test_unrecognized_verdict_is_parse_error() {
        assert!(matches!(parse_verdict("talvez"), Err(LlmError::Parse(_))));
        assert!(matches!(parse_verdict(r#"{"motivo": "sem flag"}"#), Err(LlmError::Parse(_))));
    }
}
