//! # nlsql
//!
//! Natural-language to SQL service. The pipeline itself lives in the
//! `nlsql-agentic` crate; this crate adds the HTTP request layer and
//! the server binary.

#[cfg(feature = "server")]
pub mod api;

pub use nlsql_agentic::orchestrator::{PipelineError, QueryOrchestrator, QueryResponse};
