//! PAR analyzer stage
//!
//! Applies the public-interest rubric to a non-trivial proposal's summary.
//! The model's sub-scores are clamped to the rubric ranges and the final
//! score is recomputed from them; the model's own total is only compared.

use kritikos_common::db::Proposal;
use serde_json::Value;
use std::sync::Arc;

use crate::llm::{LlmClient, LlmError};
use crate::models::par_score::{
    ParScore, BURDEN_PENALTY_MAX, FISCAL_SUSTAINABILITY_MAX, INNOVATION_EFFICIENCY_MAX,
    SCOPE_IMPACT_MAX, SDG_ALIGNMENT_MAX,
};
use crate::utils::text::extract_json_object;

const PAR_PROMPT: &str = r#"Você avalia a relevância de interesse público de proposições legislativas brasileiras (índice PAR).
Atribua as notas abaixo com base no resumo:
- escopo_impacto (0 a 30): amplitude da população afetada e profundidade do efeito.
- alinhamento_ods (0 a 30): alinhamento com os Objetivos de Desenvolvimento Sustentável da ONU.
- inovacao_eficiencia (0 a 20): inovação e eficiência do mecanismo proposto.
- sustentabilidade_fiscal (0 a 20): viabilidade orçamentária e indicação de fontes de custeio.
- penalidade_oneracao (0 a 15): penalidade por criar despesas ou encargos sem fonte definida.
par_final = escopo_impacto + alinhamento_ods + inovacao_eficiencia + sustentabilidade_fiscal - penalidade_oneracao.

Responda somente com JSON:
{"escopo_impacto": n, "alinhamento_ods": n, "inovacao_eficiencia": n, "sustentabilidade_fiscal": n, "penalidade_oneracao": n, "par_final": n, "resumo_analise": "duas ou três frases", "ods_identificados": [números de 1 a 17]}

Proposição: {label}

Resumo:
{summary}"#;

/// Divergence between the model's total and the recomputed one worth a warning
const PAR_TOLERANCE: f64 = 0.5;

pub struct ParAnalyzer {
    llm: Arc<dyn LlmClient>,
}

impl ParAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, proposal: &Proposal, summary: &str) -> Result<ParScore, LlmError> {
        let prompt = PAR_PROMPT
            .replace("{label}", &proposal.label())
            .replace("{summary}", summary);
        let reply = self.llm.complete(&prompt).await?;

        let (score, reported) = parse_par_response(&reply)?;
        if let Some(reported) = reported {
            if (reported - score.par_final).abs() > PAR_TOLERANCE {
                tracing::warn!(
                    proposal_id = proposal.id,
                    reported,
                    recomputed = score.par_final,
                    "Model par_final disagrees with sub-scores, using recomputed value"
                );
            }
        }

        Ok(score)
    }
}

/// Parse the rubric JSON
///
/// Returns the normalized score and the model-reported `par_final`, if any.
pub fn parse_par_response(reply: &str) -> Result<(ParScore, Option<f64>), LlmError> {
    let json = extract_json_object(reply)
        .ok_or_else(|| LlmError::Parse("no JSON object in PAR reply".to_string()))?;
    let value: Value = serde_json::from_str(json).map_err(|e| LlmError::Parse(e.to_string()))?;

    let required = |key: &str, max: f64| -> Result<f64, LlmError> {
        number_field(&value, key)
            .map(|n| n.clamp(0.0, max))
            .ok_or_else(|| LlmError::Parse(format!("missing or non-numeric field: {}", key)))
    };

    let scope_impact = required("escopo_impacto", SCOPE_IMPACT_MAX)?;
    let sdg_alignment = required("alinhamento_ods", SDG_ALIGNMENT_MAX)?;
    let innovation_efficiency = required("inovacao_eficiencia", INNOVATION_EFFICIENCY_MAX)?;
    let fiscal_sustainability = required("sustentabilidade_fiscal", FISCAL_SUSTAINABILITY_MAX)?;
    let burden_penalty = number_field(&value, "penalidade_oneracao")
        .unwrap_or(0.0)
        .clamp(0.0, BURDEN_PENALTY_MAX);

    let par_final = ParScore::compute_final(
        scope_impact,
        sdg_alignment,
        innovation_efficiency,
        fiscal_sustainability,
        burden_penalty,
    );

    let mut sdg_goals: Vec<u8> = value
        .get("ods_identificados")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().trim_start_matches("ODS").trim().parse().ok(),
                    _ => None,
                })
                .filter(|n| n.fract() == 0.0 && (1.0..=17.0).contains(n))
                .map(|n| n as u8)
                .collect()
        })
        .unwrap_or_default();
    sdg_goals.sort_unstable();
    sdg_goals.dedup();

    let notes = value
        .get("resumo_analise")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let score = ParScore {
        scope_impact,
        sdg_alignment,
        innovation_efficiency,
        fiscal_sustainability,
        burden_penalty,
        par_final,
        sdg_goals,
        notes,
    };

    Ok((score, number_field(&value, "par_final")))
}

/// Number or numeric string (comma decimals accepted)
fn number_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}
