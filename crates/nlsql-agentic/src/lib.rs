//! # nlsql-agentic
//!
//! LLM-powered pipeline that turns natural-language business questions
//! into SQL queries. No HTTP server dependencies; the request layer
//! lives in the parent crate.
//!
//! ## Architecture
//!
//! ```text
//! question
//!    |
//!    v
//! LearningMemory::lookup ──> similar past patterns
//!    |
//!    v
//! QueryClassifier ──> ClassificationMetadata (strict parse, degrades)
//!    |
//!    v
//! DomainExpertSynthesizer ──> raw SQL fragment (per-domain strategy)
//!    |
//!    v
//! Consolidator ──> final SQL + deterministic explanation
//!    |
//!    v
//! Conversation store (refine loop, max 3 iterations)
//! ```
//!
//! The orchestrator owns a degraded single-shot fallback for when the
//! staged pipeline fails outright, so callers only see an error when
//! both paths fail.
//!
//! ## Backend selection
//!
//! - `AGENT_BACKEND`: `deepseek` (default) or `openai`
//! - `DEEPSEEK_API_KEY` / `LLM_API_KEY`: DeepSeek credentials
//! - `DEEPSEEK_MODEL`: override the default `deepseek-chat`
//! - `OPENAI_API_KEY` / `OPENAI_MODEL`: OpenAI credentials and model
//! - `BUSINESS_CONTEXT_PATH`: YAML catalog override (embedded default)
//! - `LEARNING_MEMORY_PATH`: memory file (default `learning_memory.json`)

pub mod backend;
pub mod business_context;
pub mod classification;
pub mod classifier;
pub mod consolidator;
pub mod conversation;
pub mod deepseek_client;
pub mod domain;
pub mod llm_client;
pub mod memory;
pub mod openai_client;
pub mod orchestrator;
pub mod synthesizer;

pub use backend::{
    create_llm_client, create_llm_client_for, create_llm_client_with_key, AgentBackend,
};
pub use business_context::{BusinessContext, BusinessContextError, DomainContext};
pub use classification::{ClassificationMetadata, QueryDomain, QueryFilter, Timeframe};
pub use classifier::{parse_classification, ClassificationOutcome, QueryClassifier};
pub use consolidator::{Consolidation, Consolidator};
pub use conversation::{
    create_conversation_store, Conversation, ConversationStore, Iteration, MAX_ITERATIONS,
};
pub use deepseek_client::DeepSeekClient;
pub use domain::DomainStrategy;
pub use llm_client::LlmClient;
pub use memory::{LearningMemory, LearningPattern};
pub use openai_client::OpenAiClient;
pub use orchestrator::{PipelineError, QueryOrchestrator, QueryResponse, ResponseStatus};
pub use synthesizer::{DomainExpertSynthesizer, FALLBACK_QUERY};
