//! Business context catalog
//!
//! Describes the warehouse schema (tables, relationships, metrics) per
//! business domain. The catalog is loaded from YAML so analysts can
//! extend it without recompiling; a default catalog is embedded in the
//! binary for zero-config startup.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default catalog compiled into the binary.
const DEFAULT_CONTEXTS_YAML: &str = include_str!("contexts/default_contexts.yaml");

/// Conventional override location checked when no env path is set.
const DEFAULT_CONTEXTS_PATH: &str = "config/contexts.yaml";

#[derive(Debug, Error)]
pub enum BusinessContextError {
    #[error("failed to read business context file '{path}'")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse business context YAML: {0}")]
    ParseError(String),
}

/// The full catalog, keyed by domain name (e.g. "sales", "products").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusinessContext {
    #[serde(default)]
    pub contexts: HashMap<String, DomainContext>,
}

/// Schema knowledge for one business domain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomainContext {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tables: HashMap<String, TableDefinition>,

    /// Join paths, e.g. "ORDERS.CUSTOMER_ID -> CUSTOMERS.ID".
    #[serde(default)]
    pub relationships: Vec<String>,

    /// Metrics the domain supports, keyed by the identifier the
    /// classifier emits.
    #[serde(default)]
    pub aggregation_fields: HashMap<String, MetricDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableDefinition {
    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,

    /// Column name to column description.
    #[serde(default)]
    pub columns: HashMap<String, String>,
}

/// A metric entry is either a bare description string or a documented
/// entry with a display name and example questions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MetricDefinition {
    Description(String),
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        examples: Vec<String>,
    },
}

impl MetricDefinition {
    /// Human-readable label, falling back to the metric key.
    pub fn display_name<'a>(&'a self, key: &'a str) -> &'a str {
        match self {
            MetricDefinition::Description(_) => key,
            MetricDefinition::Detailed { display_name, .. } => {
                display_name.as_deref().unwrap_or(key)
            }
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            MetricDefinition::Description(desc) => Some(desc),
            MetricDefinition::Detailed { description, .. } => description.as_deref(),
        }
    }
}

impl BusinessContext {
    /// Load the catalog from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, BusinessContextError> {
        let path_ref = path.as_ref();
        let content =
            std::fs::read_to_string(path_ref).map_err(|e| BusinessContextError::IoError {
                path: path_ref.display().to_string(),
                source: e,
            })?;
        Self::load_from_str(&content)
    }

    /// Parse the catalog from a YAML string.
    pub fn load_from_str(yaml: &str) -> Result<Self, BusinessContextError> {
        serde_yaml::from_str(yaml).map_err(|e| BusinessContextError::ParseError(e.to_string()))
    }

    /// The catalog compiled into the binary.
    pub fn embedded() -> Result<Self, BusinessContextError> {
        Self::load_from_str(DEFAULT_CONTEXTS_YAML)
    }

    /// Load from `BUSINESS_CONTEXT_PATH` if set, else `config/contexts.yaml`
    /// if present, else the embedded catalog.
    pub fn from_env() -> Result<Self, BusinessContextError> {
        if let Ok(path) = std::env::var("BUSINESS_CONTEXT_PATH") {
            return Self::load_from_file(path);
        }
        if Path::new(DEFAULT_CONTEXTS_PATH).exists() {
            return Self::load_from_file(DEFAULT_CONTEXTS_PATH);
        }
        Self::embedded()
    }

    /// Look up a domain context by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&DomainContext> {
        let lower = name.to_lowercase();
        self.contexts
            .iter()
            .find(|(key, _)| key.to_lowercase() == lower)
            .map(|(_, ctx)| ctx)
    }

    /// Domain names in the catalog, sorted for stable output.
    pub fn context_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contexts.keys().cloned().collect();
        names.sort();
        names
    }

    /// All metric identifiers across domains, sorted and deduplicated.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .contexts
            .values()
            .flat_map(|ctx| ctx.aggregation_fields.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Render the whole catalog as prompt text for the LLM stages.
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::from("BUSINESS CONTEXT:\n");
        for name in self.context_names() {
            if let Some(ctx) = self.contexts.get(&name) {
                out.push('\n');
                out.push_str(&format!("=== {} ===\n", name));
                out.push_str(&ctx.format_for_prompt());
            }
        }
        out
    }
}

impl DomainContext {
    /// Render one domain section as prompt text.
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();

        if !self.description.is_empty() {
            out.push_str(&format!("Description: {}\n", self.description));
        }

        if !self.tables.is_empty() {
            out.push_str("Relevant tables:\n");
            let mut table_names: Vec<&String> = self.tables.keys().collect();
            table_names.sort();
            for table_name in table_names {
                let table = &self.tables[table_name];
                out.push_str(&format!("- {}: {}\n", table_name, table.description));
                if let Some(pk) = &table.primary_key {
                    out.push_str(&format!("  primary key: {}\n", pk));
                }
                let mut columns: Vec<(&String, &String)> = table.columns.iter().collect();
                columns.sort();
                for (column, description) in columns {
                    out.push_str(&format!("  * {}: {}\n", column, description));
                }
            }
        }

        if !self.relationships.is_empty() {
            out.push_str("Relationships:\n");
            for rel in &self.relationships {
                out.push_str(&format!("- {}\n", rel));
            }
        }

        if !self.aggregation_fields.is_empty() {
            out.push_str("Available metrics:\n");
            let mut metric_keys: Vec<&String> = self.aggregation_fields.keys().collect();
            metric_keys.sort();
            for key in metric_keys {
                let metric = &self.aggregation_fields[key];
                match metric.description() {
                    Some(desc) => {
                        out.push_str(&format!("- {}: {}\n", metric.display_name(key), desc))
                    }
                    None => out.push_str(&format!("- {}\n", metric.display_name(key))),
                }
            }
        }

        out
    }
}
