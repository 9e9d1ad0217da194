//! Consolidator stage
//!
//! Takes the raw SQL fragment from the domain expert and produces the
//! final formatted query via the LLM, plus a deterministic explanation
//! built locally from the classification metadata. The explanation
//! never depends on an LLM call.

use std::sync::Arc;

use crate::classification::{ClassificationMetadata, QueryDomain};
use crate::llm_client::{strip_code_blocks, LlmClient};
use crate::synthesizer::render_metadata;

const SYSTEM_PROMPT: &str = include_str!("prompts/consolidator_system.md");

/// Result of consolidating one fragment.
#[derive(Debug, Clone)]
pub struct Consolidation {
    pub sql_query: String,
    /// Present only when formatting fell back to the raw fragment,
    /// with the failure embedded for logging.
    pub explanation: Option<String>,
}

pub struct Consolidator {
    client: Arc<dyn LlmClient>,
}

impl Consolidator {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    /// Format the fragment into the final query. On any failure the
    /// fragment passes through untouched.
    pub async fn consolidate(
        &self,
        fragment: &str,
        metadata: &ClassificationMetadata,
    ) -> Consolidation {
        let user_prompt = build_user_prompt(fragment, metadata);

        match self.client.chat(SYSTEM_PROMPT, &user_prompt).await {
            Ok(response) => {
                let sql = strip_code_blocks(&response);
                if sql.is_empty() {
                    tracing::warn!("consolidation returned an empty response, keeping raw fragment");
                    Consolidation {
                        sql_query: fragment.to_string(),
                        explanation: Some(
                            "Consolidation returned an empty response; the unformatted query was kept."
                                .to_string(),
                        ),
                    }
                } else {
                    Consolidation {
                        sql_query: sql,
                        explanation: None,
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "consolidation failed, keeping raw fragment");
                Consolidation {
                    sql_query: fragment.to_string(),
                    explanation: Some(format!(
                        "Consolidation fell back to the unformatted query: {}",
                        e
                    )),
                }
            }
        }
    }

    /// Build the canonical explanation for a generated query.
    ///
    /// Four fixed parts: a summary of what was asked, a strategy bullet
    /// per recognized metric, a structure sentence keyed on whether the
    /// fragment uses CTEs, and the list of returned metrics. Sections
    /// with no content are omitted.
    pub fn explain(&self, fragment: &str, metadata: &ClassificationMetadata) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.push(build_summary(metadata));

        let strategy = build_strategy(metadata);
        if !strategy.is_empty() {
            parts.push(strategy);
        }

        parts.push(build_structure(fragment));

        let metrics = build_metrics(metadata);
        if !metrics.is_empty() {
            parts.push(metrics);
        }

        parts.join("\n\n")
    }
}

fn build_user_prompt(fragment: &str, metadata: &ClassificationMetadata) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Draft SQL\n\n");
    prompt.push_str(fragment);
    prompt.push('\n');

    prompt.push_str("\n## Request metadata\n\n");
    prompt.push_str(&render_metadata(metadata));

    prompt
}

fn build_summary(metadata: &ClassificationMetadata) -> String {
    let mut summary = format!("This query answers a {} question", metadata.domain);

    if !metadata.metrics.is_empty() {
        summary.push_str(&format!(" covering {}", metadata.metrics.join(", ")));
    }

    if !metadata.filters.is_empty() {
        let clauses: Vec<String> = metadata
            .filters
            .iter()
            .map(|f| format!("{} {} {}", f.column, f.operator.as_sql(), f.value_text()))
            .collect();
        summary.push_str(&format!(", filtered by {}", clauses.join(" and ")));
    }

    if !metadata.groupby.is_empty() {
        summary.push_str(&format!(", grouped by {}", metadata.groupby.join(", ")));
    }

    summary.push('.');
    summary
}

fn build_strategy(metadata: &ClassificationMetadata) -> String {
    let bullets: Vec<&'static str> = metadata
        .metrics
        .iter()
        .filter_map(|m| strategy_note(metadata.domain, m))
        .collect();

    if bullets.is_empty() {
        return String::new();
    }

    let mut out = String::from("Strategy:");
    for bullet in bullets {
        out.push_str(&format!("\n- {}", bullet));
    }
    out
}

fn build_structure(fragment: &str) -> String {
    if fragment.to_lowercase().contains("with") {
        "Structure: the query stages intermediate results in CTEs (WITH clauses) before the final SELECT.".to_string()
    } else {
        "Structure: the query is a single SELECT without intermediate CTEs.".to_string()
    }
}

fn build_metrics(metadata: &ClassificationMetadata) -> String {
    if metadata.metrics.is_empty() {
        return String::new();
    }

    let mut out = String::from("Metrics returned:");
    for metric in &metadata.metrics {
        out.push_str(&format!("\n- {}", metric));
    }
    out
}

/// Fixed strategy wording per domain and metric. Unrecognized metrics
/// get no strategy bullet.
fn strategy_note(domain: QueryDomain, metric: &str) -> Option<&'static str> {
    match (domain, metric) {
        (QueryDomain::Sales, "faturamento_total") => {
            Some("Revenue is computed as the sum of order totals over the selected window.")
        }
        (QueryDomain::Sales, "quantidade_pedidos") => {
            Some("Order volume counts distinct orders in the window.")
        }
        (QueryDomain::Sales, "ticket_medio") => {
            Some("Average ticket divides total revenue by the distinct order count.")
        }
        (QueryDomain::Products, "estoque_atual") => {
            Some("Current stock sums units on hand across warehouses.")
        }
        (QueryDomain::Products, "itens_vendidos") => {
            Some("Items sold are summed from order line quantities in the window.")
        }
        (QueryDomain::Products, "giro_estoque") => {
            Some("Stock turnover divides units sold by the average stock on hand.")
        }
        (QueryDomain::Users, "novos_usuarios") => {
            Some("New users are counted by signup timestamp in the window.")
        }
        (QueryDomain::Users, "usuarios_ativos") => {
            Some("Active users are counted by last login within the window.")
        }
        _ => None,
    }
}
