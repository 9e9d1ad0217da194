//! End-to-end pipeline tests driven by a scripted LLM client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use nlsql_agentic::business_context::BusinessContext;
use nlsql_agentic::llm_client::LlmClient;
use nlsql_agentic::memory::LearningMemory;
use nlsql_agentic::orchestrator::{PipelineError, QueryOrchestrator, ResponseStatus};

/// Replays a fixed sequence of responses, one per LLM call, and
/// records every prompt it sees.
struct ScriptedClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedClient {
    fn new(responses: Vec<Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn user_prompt(&self, call: usize) -> String {
        self.calls.lock().unwrap()[call].1.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("scripted client ran out of responses")),
        }
    }

    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.chat(system_prompt, user_prompt).await
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

fn orchestrator_with(client: Arc<ScriptedClient>) -> QueryOrchestrator {
    QueryOrchestrator::new(
        client,
        BusinessContext::embedded().unwrap(),
        LearningMemory::ephemeral(),
    )
}

/// An orchestrator whose memory file cannot be written, forcing the
/// primary pipeline to fail at the record step.
fn orchestrator_with_broken_memory(
    client: Arc<ScriptedClient>,
    dir: &tempfile::TempDir,
) -> QueryOrchestrator {
    let missing_parent = dir.path().join("missing").join("memory.json");
    QueryOrchestrator::new(
        client,
        BusinessContext::embedded().unwrap(),
        LearningMemory::new(missing_parent),
    )
}

fn sales_classification() -> String {
    r#"```json
{
  "domain": "vendas",
  "metrics": ["faturamento_total"],
  "filters": [],
  "groupby": ["REGION"],
  "timeframe": {"column": "CREATED_AT", "period": "month", "range": "last_30_days"}
}
```"#
        .to_string()
}

const SALES_FRAGMENT: &str =
    "WITH revenue AS (SELECT REGION, SUM(TOTAL_VALUE) AS faturamento_total FROM ORDERS GROUP BY REGION) SELECT * FROM revenue;";

#[tokio::test]
async fn query_happy_path() {
    let client = ScriptedClient::new(vec![
        Ok(sales_classification()),
        Ok(SALES_FRAGMENT.to_string()),
        Ok(format!("```sql\n{}\n```", SALES_FRAGMENT)),
    ]);
    let orchestrator = orchestrator_with(client);

    let response = orchestrator
        .query("Qual o total de vendas por região no último mês?", None)
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.iteration, Some(1));
    assert!(response.used_fallback.is_none());
    assert!(!response.conversation_id.clone().unwrap().is_empty());

    let sql = response.sql_query.unwrap();
    assert!(sql.to_lowercase().starts_with("with") || sql.to_lowercase().starts_with("select"));

    // The default LATAM region filter was injected and shows up in the
    // deterministic explanation.
    let explanation = response.explanation.unwrap();
    assert!(explanation.contains("sales question"));
    assert!(explanation.contains("REGION = LATAM"));
    assert!(explanation.contains("grouped by REGION"));
    assert!(explanation.contains("CTEs (WITH clauses)"));
    assert!(explanation.contains("faturamento_total"));
}

#[tokio::test]
async fn query_keeps_supplied_conversation_id() {
    let client = ScriptedClient::new(vec![
        Ok(sales_classification()),
        Ok("SELECT 1;".to_string()),
        Ok("SELECT 1;".to_string()),
    ]);
    let orchestrator = orchestrator_with(client);

    let response = orchestrator
        .query("total de vendas", Some("conv-42".to_string()))
        .await
        .unwrap();
    assert_eq!(response.conversation_id.as_deref(), Some("conv-42"));
}

#[tokio::test]
async fn refine_twice_then_iteration_limit() {
    let client = ScriptedClient::new(vec![
        // query: classify, synthesize, consolidate
        Ok(sales_classification()),
        Ok("SELECT 1;".to_string()),
        Ok("SELECT 1;".to_string()),
        // first refine: synthesize, consolidate
        Ok("SELECT 2;".to_string()),
        Ok("SELECT 2;".to_string()),
        // second refine: synthesize, consolidate
        Ok("SELECT 3;".to_string()),
        Ok("SELECT 3;".to_string()),
    ]);
    let orchestrator = orchestrator_with(client);

    let response = orchestrator
        .query("total de vendas", Some("conv-1".to_string()))
        .await
        .unwrap();
    assert_eq!(response.iteration, Some(1));

    let second = orchestrator.refine("break it down by product", "conv-1").await.unwrap();
    assert_eq!(second.iteration, Some(2));
    assert_eq!(second.sql_query.as_deref(), Some("SELECT 2;"));
    assert_eq!(
        second.explanation.as_deref(),
        Some("Query refined per feedback: break it down by product")
    );

    let third = orchestrator.refine("only paid orders", "conv-1").await.unwrap();
    assert_eq!(third.iteration, Some(3));

    // The conversation is full now; further refinements are rejected
    // without changing state.
    let limit = orchestrator.refine("one more change", "conv-1").await;
    assert!(matches!(limit, Err(PipelineError::IterationLimitExceeded(_))));

    let again = orchestrator.refine("and another", "conv-1").await;
    assert!(matches!(again, Err(PipelineError::IterationLimitExceeded(_))));
}

#[tokio::test]
async fn refine_unknown_conversation() {
    let client = ScriptedClient::new(vec![]);
    let orchestrator = orchestrator_with(client);

    let result = orchestrator.refine("feedback", "never-created").await;
    assert!(matches!(result, Err(PipelineError::ConversationNotFound(_))));
}

#[tokio::test]
async fn query_succeeds_when_classification_is_garbage() {
    let client = ScriptedClient::new(vec![
        Ok("I am sorry, I cannot classify that.".to_string()),
        Ok("SELECT * FROM ORDERS;".to_string()),
        Ok("SELECT * FROM ORDERS;".to_string()),
    ]);
    let orchestrator = orchestrator_with(client);

    let response = orchestrator.query("total de vendas", None).await.unwrap();

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.iteration, Some(1));

    // Degraded classification: default sales domain, no injected
    // region filter, no metrics.
    let explanation = response.explanation.unwrap();
    assert!(explanation.contains("This query answers a sales question."));
    assert!(!explanation.contains("LATAM"));
    assert!(!explanation.contains("Metrics returned"));
}

#[tokio::test]
async fn query_falls_back_when_memory_is_unwritable() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![
        // Primary pipeline runs fully, then fails at the record step.
        Ok(sales_classification()),
        Ok("SELECT 1;".to_string()),
        Ok("SELECT 1;".to_string()),
        // Single-shot fallback.
        Ok("Total revenue across all orders.\nSELECT SUM(TOTAL_VALUE) FROM ORDERS;".to_string()),
    ]);
    let orchestrator = orchestrator_with_broken_memory(client, &dir);

    let response = orchestrator.query("total de vendas", None).await.unwrap();

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.used_fallback, Some(true));
    assert_eq!(
        response.sql_query.as_deref(),
        Some("SELECT SUM(TOTAL_VALUE) FROM ORDERS;")
    );
    assert_eq!(
        response.explanation.as_deref(),
        Some("Total revenue across all orders.")
    );
    assert_eq!(response.iteration, Some(1));
}

#[tokio::test]
async fn refine_after_fallback_uses_direct_prompt_path() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![
        Ok(sales_classification()),
        Ok("SELECT 1;".to_string()),
        Ok("SELECT 1;".to_string()),
        Ok("Overview.\nSELECT SUM(TOTAL_VALUE) FROM ORDERS;".to_string()),
        // Refinement of a fallback conversation goes through one
        // direct completion call.
        Ok("Now grouped by region.\nSELECT REGION, SUM(TOTAL_VALUE) FROM ORDERS GROUP BY REGION;".to_string()),
    ]);
    let orchestrator = orchestrator_with_broken_memory(client, &dir);

    let first = orchestrator
        .query("total de vendas", Some("fb-1".to_string()))
        .await
        .unwrap();
    assert_eq!(first.used_fallback, Some(true));

    let refined = orchestrator.refine("group by region", "fb-1").await.unwrap();
    assert_eq!(refined.iteration, Some(2));
    assert_eq!(refined.used_fallback, Some(true));
    assert_eq!(refined.explanation.as_deref(), Some("Now grouped by region."));
    assert_eq!(
        refined.sql_query.as_deref(),
        Some("SELECT REGION, SUM(TOTAL_VALUE) FROM ORDERS GROUP BY REGION;")
    );
}

#[tokio::test]
async fn total_failure_surfaces_both_errors() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![
        Ok(sales_classification()),
        Ok("SELECT 1;".to_string()),
        Ok("SELECT 1;".to_string()),
        Err("completion service is down".to_string()),
    ]);
    let orchestrator = orchestrator_with_broken_memory(client, &dir);

    let result = orchestrator.query("total de vendas", None).await;
    match result {
        Err(PipelineError::TotalFailure { primary, fallback }) => {
            assert!(primary.contains("learning memory"));
            assert_eq!(fallback, "completion service is down");
        }
        other => panic!("expected TotalFailure, got {:?}", other.map(|r| r.status)),
    }
}

#[tokio::test]
async fn recorded_patterns_feed_later_classifications() {
    let client = ScriptedClient::new(vec![
        // First query.
        Ok(sales_classification()),
        Ok("SELECT 1;".to_string()),
        Ok("SELECT 1;".to_string()),
        // Second query, same question.
        Ok(sales_classification()),
        Ok("SELECT 1;".to_string()),
        Ok("SELECT 1;".to_string()),
    ]);
    let orchestrator = orchestrator_with(client.clone());

    let question = "Qual o faturamento total do último mês?";
    orchestrator.query(question, None).await.unwrap();

    // First classification saw no prior patterns.
    let first_classifier_prompt = client.user_prompt(0);
    assert!(first_classifier_prompt.contains("No similar patterns found in learning memory."));

    orchestrator.query(question, None).await.unwrap();

    // Second classification was shown the recorded pattern.
    let second_classifier_prompt = client.user_prompt(3);
    assert!(second_classifier_prompt.contains(&format!("- question: {}", question)));
    assert!(!second_classifier_prompt.contains("No similar patterns found"));
}
