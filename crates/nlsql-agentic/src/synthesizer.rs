//! Domain expert synthesizer stage
//!
//! Picks a generation strategy from the classified domain, renders the
//! expert prompt with the business context and request metadata, and
//! asks the LLM for a raw SQL fragment. Never fails outward: any error
//! yields the literal fallback query over the default sales table.

use std::sync::Arc;

use crate::business_context::BusinessContext;
use crate::classification::ClassificationMetadata;
use crate::llm_client::{strip_code_blocks, LlmClient};

/// Returned whenever synthesis cannot produce a usable fragment.
pub const FALLBACK_QUERY: &str = "SELECT * FROM ORDERS LIMIT 100;";

pub struct DomainExpertSynthesizer {
    client: Arc<dyn LlmClient>,
    context: Arc<BusinessContext>,
}

impl DomainExpertSynthesizer {
    pub fn new(client: Arc<dyn LlmClient>, context: Arc<BusinessContext>) -> Self {
        Self { client, context }
    }

    /// Generate a raw SQL fragment for the question.
    pub async fn generate(&self, question: &str, metadata: &ClassificationMetadata) -> String {
        let strategy = metadata.domain.strategy();
        tracing::debug!(domain = %metadata.domain, strategy = %strategy, "synthesizing SQL fragment");

        let user_prompt = self.build_user_prompt(question, metadata);
        match self.client.chat(strategy.system_prompt(), &user_prompt).await {
            Ok(response) => {
                let sql = strip_code_blocks(&response);
                if sql.is_empty() {
                    tracing::warn!(strategy = %strategy, "synthesis returned an empty fragment, using fallback query");
                    FALLBACK_QUERY.to_string()
                } else {
                    sql
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, strategy = %strategy, "synthesis failed, using fallback query");
                FALLBACK_QUERY.to_string()
            }
        }
    }

    fn build_user_prompt(&self, question: &str, metadata: &ClassificationMetadata) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Question\n\n");
        prompt.push_str(question);
        prompt.push('\n');

        prompt.push_str("\n## Request metadata\n\n");
        prompt.push_str(&render_metadata(metadata));

        prompt.push_str("\n## Business context\n\n");
        prompt.push_str(&self.context.format_for_prompt());

        prompt
    }
}

/// Render the metadata fields the expert should honor. Empty fields
/// are omitted rather than rendered as empty lists.
pub(crate) fn render_metadata(metadata: &ClassificationMetadata) -> String {
    let mut out = String::new();

    out.push_str(&format!("- domain: {}\n", metadata.domain));

    if !metadata.metrics.is_empty() {
        out.push_str(&format!("- metrics: {}\n", metadata.metrics.join(", ")));
    }

    if !metadata.filters.is_empty() {
        let clauses: Vec<String> = metadata
            .filters
            .iter()
            .map(|f| format!("{} {} {}", f.column, f.operator.as_sql(), f.value_text()))
            .collect();
        out.push_str(&format!("- filters: {}\n", clauses.join("; ")));
    }

    if !metadata.groupby.is_empty() {
        out.push_str(&format!("- group by: {}\n", metadata.groupby.join(", ")));
    }

    if let Some(tf) = &metadata.timeframe {
        let mut line = format!("- timeframe: {}", tf.column);
        if let Some(range) = &tf.range {
            line.push_str(&format!(" over {}", range));
        }
        if let (Some(start), Some(end)) = (&tf.start_date, &tf.end_date) {
            line.push_str(&format!(" from {} to {}", start, end));
        }
        if let Some(period) = tf.period {
            line.push_str(&format!(" bucketed by {}", period.as_str()));
        }
        line.push('\n');
        out.push_str(&line);
    }

    if !metadata.order_by.is_empty() {
        let clauses: Vec<String> = metadata
            .order_by
            .iter()
            .map(|o| format!("{} {}", o.column, o.direction.as_sql()))
            .collect();
        out.push_str(&format!("- order by: {}\n", clauses.join(", ")));
    }

    if metadata.is_degraded() {
        out.push_str("- note: classification unavailable, work from the question alone\n");
    }

    out
}
