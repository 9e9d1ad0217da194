//! Pipeline orchestrator
//!
//! Sequences memory lookup, classification, synthesis and
//! consolidation for the `query` operation, and drives the bounded
//! `refine` loop. Owns the degraded single-shot fallback used when the
//! primary pipeline fails outright.

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::backend::create_llm_client;
use crate::business_context::BusinessContext;
use crate::classification::ClassificationMetadata;
use crate::classifier::QueryClassifier;
use crate::consolidator::Consolidator;
use crate::conversation::{
    create_conversation_store, Conversation, ConversationStore, Iteration,
};
use crate::llm_client::LlmClient;
use crate::memory::LearningMemory;
use crate::synthesizer::DomainExpertSynthesizer;

const FALLBACK_SYSTEM_PROMPT: &str = include_str!("prompts/fallback_system.md");
const REFINEMENT_SYSTEM_PROMPT: &str = include_str!("prompts/refinement_system.md");

static SELECT_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bselect\b").unwrap());

/// Errors that reach the caller. Everything else is absorbed into a
/// degraded result and logged.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("iteration limit reached for conversation {0}")]
    IterationLimitExceeded(String),

    #[error("refinement failed: {0}")]
    RefinementFailed(String),

    /// Both the primary pipeline and the single-shot fallback failed.
    /// The message carries both errors, primary first.
    #[error("{primary}, {fallback}")]
    TotalFailure { primary: String, fallback: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Wire-shaped result of a `query` or `refine` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: ResponseStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_fallback: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QueryResponse {
    fn success(
        sql_query: String,
        explanation: String,
        conversation_id: String,
        iteration: usize,
    ) -> Self {
        Self {
            status: ResponseStatus::Success,
            sql_query: Some(sql_query),
            explanation: Some(explanation),
            conversation_id: Some(conversation_id),
            iteration: Some(iteration),
            used_fallback: None,
            message: None,
        }
    }

    /// Error payload in the same wire shape, used by the request layer.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            sql_query: None,
            explanation: None,
            conversation_id: None,
            iteration: None,
            used_fallback: None,
            message: Some(message.into()),
        }
    }
}

/// Owns the pipeline stages and the shared stores. One instance serves
/// the whole process; calls may run concurrently.
pub struct QueryOrchestrator {
    client: Arc<dyn LlmClient>,
    classifier: QueryClassifier,
    synthesizer: DomainExpertSynthesizer,
    consolidator: Consolidator,
    memory: Arc<LearningMemory>,
    conversations: ConversationStore,
    context: Arc<BusinessContext>,
}

impl QueryOrchestrator {
    pub fn new(
        client: Arc<dyn LlmClient>,
        context: BusinessContext,
        memory: LearningMemory,
    ) -> Self {
        let context = Arc::new(context);
        Self {
            classifier: QueryClassifier::new(client.clone(), context.clone()),
            synthesizer: DomainExpertSynthesizer::new(client.clone(), context.clone()),
            consolidator: Consolidator::new(client.clone()),
            memory: Arc::new(memory),
            conversations: create_conversation_store(),
            context,
            client,
        }
    }

    /// Build the orchestrator from environment configuration: backend
    /// selection, business context path and learning memory path.
    pub fn from_env() -> Result<Self> {
        let client = create_llm_client()?;
        let context = BusinessContext::from_env()?;
        let memory = LearningMemory::from_env();
        Ok(Self::new(client, context, memory))
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    pub fn provider_name(&self) -> &str {
        self.client.provider_name()
    }

    /// Answer a business question with SQL.
    ///
    /// Runs the staged pipeline; if that fails outright, retries once
    /// through the single-shot fallback prompt. Only when both fail
    /// does the caller see an error.
    pub async fn query(
        &self,
        question: &str,
        conversation_id: Option<String>,
    ) -> Result<QueryResponse, PipelineError> {
        let conversation_id =
            conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::info!(%conversation_id, "processing query");

        match self.primary_query(question, &conversation_id).await {
            Ok(response) => Ok(response),
            Err(primary) => {
                tracing::warn!(error = %primary, "primary pipeline failed, trying single-shot fallback");
                match self.fallback_query(question, &conversation_id).await {
                    Ok(response) => Ok(response),
                    Err(fallback) => Err(PipelineError::TotalFailure {
                        primary: primary.to_string(),
                        fallback: fallback.to_string(),
                    }),
                }
            }
        }
    }

    /// The staged pipeline: lookup, classify, synthesize, consolidate,
    /// record, store.
    async fn primary_query(&self, question: &str, conversation_id: &str) -> Result<QueryResponse> {
        let similar = self.memory.lookup(question).await;
        tracing::debug!(patterns = similar.len(), "looked up similar questions");

        let metadata = self.classifier.classify(question, &similar).await;

        let fragment = self.synthesizer.generate(question, &metadata).await;

        let consolidation = self.consolidator.consolidate(&fragment, &metadata).await;
        if let Some(note) = &consolidation.explanation {
            tracing::warn!(%note, "consolidation degraded");
        }
        let explanation = self.consolidator.explain(&fragment, &metadata);

        self.memory
            .record(question, &metadata, &consolidation.sql_query, true)
            .await?;

        let mut conversation = Conversation::new(conversation_id, question);
        conversation.metadata = Some(metadata);
        conversation.push_iteration(Iteration {
            feedback: None,
            explanation: explanation.clone(),
            sql_query: consolidation.sql_query.clone(),
        });
        self.store_conversation(conversation).await;

        Ok(QueryResponse::success(
            consolidation.sql_query,
            explanation,
            conversation_id.to_string(),
            1,
        ))
    }

    /// Degraded single-shot path: one combined prompt, answer split at
    /// the first SELECT token.
    async fn fallback_query(&self, question: &str, conversation_id: &str) -> Result<QueryResponse> {
        // Best-effort failure record; a second memory error must not
        // mask the failure that brought us here.
        if let Err(e) = self
            .memory
            .record(question, &ClassificationMetadata::default(), "", false)
            .await
        {
            tracing::warn!(error = %e, "could not record failure pattern");
        }

        let user_prompt = build_fallback_prompt(question, &self.context);
        let response = self.client.chat(FALLBACK_SYSTEM_PROMPT, &user_prompt).await?;
        let (explanation, sql_query) = split_sql_response(&response);

        let mut conversation = Conversation::new(conversation_id, question);
        conversation.fallback_used = true;
        conversation.push_iteration(Iteration {
            feedback: None,
            explanation: explanation.clone(),
            sql_query: sql_query.clone(),
        });
        self.store_conversation(conversation).await;

        let mut response =
            QueryResponse::success(sql_query, explanation, conversation_id.to_string(), 1);
        response.used_fallback = Some(true);
        Ok(response)
    }

    /// Refine the latest query of a conversation with user feedback.
    ///
    /// The conversation lock is held across the iteration-limit check
    /// and the append, so concurrent refinements of one conversation
    /// serialize and cannot blow past the cap.
    pub async fn refine(
        &self,
        feedback: &str,
        conversation_id: &str,
    ) -> Result<QueryResponse, PipelineError> {
        let handle = self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| PipelineError::ConversationNotFound(conversation_id.to_string()))?;

        let mut conversation = handle.lock().await;

        if conversation.at_iteration_limit() {
            return Err(PipelineError::IterationLimitExceeded(
                conversation_id.to_string(),
            ));
        }
        tracing::info!(%conversation_id, iteration = conversation.iteration_count() + 1, "refining query");

        let (explanation, sql_query) = match conversation.metadata.clone() {
            Some(metadata) => {
                // Classified conversation: re-run the expert with the
                // question annotated by the feedback.
                let annotated = format!(
                    "{}\n\nUser feedback on the previous query: {}",
                    conversation.original_question, feedback
                );
                let fragment = self.synthesizer.generate(&annotated, &metadata).await;
                let consolidation = self.consolidator.consolidate(&fragment, &metadata).await;
                if let Some(note) = &consolidation.explanation {
                    tracing::warn!(%note, "consolidation degraded during refinement");
                }
                (
                    format!("Query refined per feedback: {}", feedback),
                    consolidation.sql_query,
                )
            }
            None => {
                // Fallback-originated conversation: no metadata to work
                // from, refine through a direct prompt.
                let previous_sql = conversation.latest_sql().unwrap_or_default().to_string();
                let user_prompt = build_refinement_prompt(
                    &conversation.original_question,
                    &previous_sql,
                    feedback,
                    &self.context,
                );
                let response = self
                    .client
                    .chat(REFINEMENT_SYSTEM_PROMPT, &user_prompt)
                    .await
                    .map_err(|e| PipelineError::RefinementFailed(e.to_string()))?;
                split_sql_response(&response)
            }
        };

        conversation.push_iteration(Iteration {
            feedback: Some(feedback.to_string()),
            explanation: explanation.clone(),
            sql_query: sql_query.clone(),
        });

        let mut response = QueryResponse::success(
            sql_query,
            explanation,
            conversation_id.to_string(),
            conversation.iteration_count(),
        );
        if conversation.fallback_used {
            response.used_fallback = Some(true);
        }
        Ok(response)
    }

    async fn store_conversation(&self, conversation: Conversation) {
        let id = conversation.id.clone();
        self.conversations
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(conversation)));
    }
}

fn build_fallback_prompt(question: &str, context: &BusinessContext) -> String {
    let mut prompt = String::new();
    prompt.push_str("## Question\n\n");
    prompt.push_str(question);
    prompt.push('\n');
    prompt.push_str("\n## Business context\n\n");
    prompt.push_str(&context.format_for_prompt());
    prompt
}

fn build_refinement_prompt(
    question: &str,
    previous_sql: &str,
    feedback: &str,
    context: &BusinessContext,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("## Original question\n\n");
    prompt.push_str(question);
    prompt.push('\n');
    prompt.push_str("\n## Current SQL\n\n");
    prompt.push_str(previous_sql);
    prompt.push('\n');
    prompt.push_str("\n## Feedback\n\n");
    prompt.push_str(feedback);
    prompt.push('\n');
    prompt.push_str("\n## Business context\n\n");
    prompt.push_str(&context.format_for_prompt());
    prompt
}

/// Split a free-text reply into (explanation, sql) at the first SELECT
/// token. Degrades to a literal substring search, then to treating the
/// whole reply as explanation with no SQL.
pub(crate) fn split_sql_response(response: &str) -> (String, String) {
    let text = response.trim();

    if let Some(m) = SELECT_TOKEN.find(text) {
        let (before, after) = text.split_at(m.start());
        return (before.trim().to_string(), after.trim().to_string());
    }

    if let Some(pos) = text.find("SELECT") {
        let (before, after) = text.split_at(pos);
        return (before.trim().to_string(), after.trim().to_string());
    }

    (text.to_string(), String::new())
}
