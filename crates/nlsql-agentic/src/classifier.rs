//! Query classifier stage
//!
//! Turns a business question into structured classification metadata
//! by prompting the LLM and strictly parsing its JSON reply. The stage
//! never fails outward: anything that goes wrong degrades to default
//! metadata carrying an error note, and the pipeline continues.

use std::sync::Arc;

use crate::business_context::BusinessContext;
use crate::classification::ClassificationMetadata;
use crate::llm_client::{extract_json, LlmClient};
use crate::memory::LearningPattern;

const SYSTEM_PROMPT: &str = include_str!("prompts/classifier_system.md");

/// Result of parsing one LLM classification response.
/// The response shape is never trusted without validation.
#[derive(Debug)]
pub enum ClassificationOutcome {
    Parsed(ClassificationMetadata),
    Unparseable(String),
}

/// Parse an LLM response into classification metadata, stripping any
/// code fences first.
pub fn parse_classification(response: &str) -> ClassificationOutcome {
    let clean_json = extract_json(response);
    match serde_json::from_str::<ClassificationMetadata>(&clean_json) {
        Ok(metadata) => ClassificationOutcome::Parsed(metadata),
        Err(e) => ClassificationOutcome::Unparseable(format!(
            "Failed to parse classification JSON: {}\n\nJSON was:\n{}",
            e, clean_json
        )),
    }
}

pub struct QueryClassifier {
    client: Arc<dyn LlmClient>,
    context: Arc<BusinessContext>,
}

impl QueryClassifier {
    pub fn new(client: Arc<dyn LlmClient>, context: Arc<BusinessContext>) -> Self {
        Self { client, context }
    }

    /// Classify a question, using similar past patterns as reference.
    ///
    /// On a clean parse the default region filter rule is applied to
    /// the metadata. On any failure (network, non-JSON reply, schema
    /// mismatch) returns degraded metadata instead of an error.
    pub async fn classify(
        &self,
        question: &str,
        similar: &[LearningPattern],
    ) -> ClassificationMetadata {
        let user_prompt = self.build_user_prompt(question, similar);

        let response = match self.client.chat_json(SYSTEM_PROMPT, &user_prompt).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "classification call failed, using default metadata");
                return ClassificationMetadata::degraded(e.to_string());
            }
        };

        match parse_classification(&response) {
            ClassificationOutcome::Parsed(mut metadata) => {
                if metadata.apply_default_region_filter() {
                    tracing::debug!(
                        domain = %metadata.domain,
                        "no region filter in question, defaulting to LATAM"
                    );
                }
                metadata
            }
            ClassificationOutcome::Unparseable(reason) => {
                tracing::warn!(%reason, "unparseable classification, using default metadata");
                ClassificationMetadata::degraded(reason)
            }
        }
    }

    fn build_user_prompt(&self, question: &str, similar: &[LearningPattern]) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Question\n\n");
        prompt.push_str(question);
        prompt.push('\n');

        prompt.push_str("\n## Available metrics\n\n");
        for name in self.context.metric_names() {
            prompt.push_str(&format!("- {}\n", name));
        }

        prompt.push_str("\n## Similar past questions\n\n");
        prompt.push_str(&render_similar_patterns(similar));
        prompt.push('\n');

        prompt
    }
}

/// Render retrieved patterns for the classifier prompt, with an
/// explicit marker when there are none.
pub fn render_similar_patterns(similar: &[LearningPattern]) -> String {
    if similar.is_empty() {
        return "No similar patterns found in learning memory.".to_string();
    }

    let mut out = String::new();
    for pattern in similar {
        out.push_str(&format!("- question: {}\n", pattern.question));
        out.push_str(&format!("  domain: {}\n", pattern.domain));
        if !pattern.metrics.is_empty() {
            out.push_str(&format!("  metrics: {}\n", pattern.metrics.join(", ")));
        }
        out.push_str(&format!("  sql: {}\n", pattern.sql_pattern));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::QueryDomain;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::Utc;

    struct MockClient {
        response: Result<String, String>,
    }

    #[async_trait]
    impl LlmClient for MockClient {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            self.response.clone().map_err(|e| anyhow!(e))
        }

        async fn chat_json(&self, system: &str, user: &str) -> Result<String> {
            self.chat(system, user).await
        }

        fn model_name(&self) -> &str {
            "mock"
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    fn classifier_with(response: Result<String, String>) -> QueryClassifier {
        QueryClassifier::new(
            Arc::new(MockClient { response }),
            Arc::new(BusinessContext::embedded().unwrap()),
        )
    }

    fn pattern(question: &str) -> LearningPattern {
        LearningPattern {
            question: question.to_string(),
            domain: QueryDomain::Sales,
            metrics: vec!["faturamento_total".to_string()],
            filters: vec![],
            sql_pattern: "SELECT 1;".to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_parse_classification_fenced() {
        let response = "```json\n{\"domain\": \"vendas\", \"metrics\": [\"ticket_medio\"]}\n```";
        match parse_classification(response) {
            ClassificationOutcome::Parsed(meta) => {
                assert_eq!(meta.domain, QueryDomain::Sales);
                assert_eq!(meta.metrics, vec!["ticket_medio"]);
            }
            ClassificationOutcome::Unparseable(reason) => panic!("should parse: {}", reason),
        }
    }

    #[test]
    fn test_parse_classification_garbage() {
        match parse_classification("I cannot classify this question, sorry!") {
            ClassificationOutcome::Parsed(_) => panic!("garbage should not parse"),
            ClassificationOutcome::Unparseable(reason) => {
                assert!(reason.contains("Failed to parse classification JSON"));
            }
        }
    }

    #[test]
    fn test_render_similar_patterns_empty() {
        assert_eq!(
            render_similar_patterns(&[]),
            "No similar patterns found in learning memory."
        );
    }

    #[test]
    fn test_render_similar_patterns() {
        let rendered = render_similar_patterns(&[pattern("faturamento do mes")]);
        assert!(rendered.contains("- question: faturamento do mes"));
        assert!(rendered.contains("domain: sales"));
        assert!(rendered.contains("metrics: faturamento_total"));
    }

    #[tokio::test]
    async fn test_classify_injects_region_filter() {
        let classifier = classifier_with(Ok(r#"{"domain": "sales", "metrics": ["faturamento_total"]}"#.to_string()));
        let meta = classifier.classify("total revenue last month", &[]).await;
        assert!(!meta.is_degraded());
        assert_eq!(meta.filters.len(), 1);
        assert_eq!(meta.filters[0].column, "REGION");
        assert_eq!(meta.filters[0].value_text(), "LATAM");
    }

    #[tokio::test]
    async fn test_classify_degrades_on_garbage() {
        let classifier = classifier_with(Ok("not json".to_string()));
        let meta = classifier.classify("total revenue last month", &[]).await;
        assert!(meta.is_degraded());
        assert_eq!(meta.domain, QueryDomain::Sales);
        assert!(meta.metrics.is_empty());
        assert!(meta.filters.is_empty());
        assert!(meta.timeframe.is_none());
    }

    #[tokio::test]
    async fn test_classify_degrades_on_client_error() {
        let classifier = classifier_with(Err("connection refused".to_string()));
        let meta = classifier.classify("total revenue last month", &[]).await;
        assert!(meta.is_degraded());
        assert!(meta.error.as_deref().unwrap_or_default().contains("connection refused"));
    }
}
