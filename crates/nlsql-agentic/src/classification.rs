//! Typed classification metadata
//!
//! The structured output of the query classifier. Field names and
//! value vocabularies match the JSON contract in the classifier
//! system prompt, so the whole struct round-trips through serde.

use serde::{Deserialize, Serialize};

use crate::domain::DomainStrategy;

/// Column used when the classifier injects the default region filter.
pub const DEFAULT_REGION_COLUMN: &str = "REGION";
/// Region the operation defaults to when the question names none.
pub const DEFAULT_REGION_VALUE: &str = "LATAM";

/// Structured understanding of a business question.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassificationMetadata {
    /// Business domain the question belongs to.
    #[serde(default)]
    pub domain: QueryDomain,

    /// Metric identifiers from the business context catalog.
    #[serde(default)]
    pub metrics: Vec<String>,

    /// WHERE-clause conditions extracted from the question.
    #[serde(default)]
    pub filters: Vec<QueryFilter>,

    /// Columns to group results by.
    #[serde(default)]
    pub groupby: Vec<String>,

    /// Time window the question refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,

    /// Requested result ordering, outermost first.
    #[serde(default)]
    pub order_by: Vec<OrderBy>,

    /// Set when classification failed and defaults are in effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassificationMetadata {
    /// Metadata for a question the classifier could not parse.
    /// Downstream stages fall back to the raw question text.
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    /// Inject the default LATAM region filter when the question targets
    /// sales or products and names no country or region of its own.
    /// Returns true if a filter was added.
    pub fn apply_default_region_filter(&mut self) -> bool {
        if !matches!(self.domain, QueryDomain::Sales | QueryDomain::Products) {
            return false;
        }
        if self.filters.iter().any(|f| f.is_region_filter()) {
            return false;
        }
        self.filters.push(QueryFilter {
            column: DEFAULT_REGION_COLUMN.to_string(),
            operator: FilterOperator::Eq,
            value: serde_json::Value::String(DEFAULT_REGION_VALUE.to_string()),
        });
        true
    }
}

/// Business domains the classifier can assign.
///
/// Aliases accept the Portuguese vocabulary used in the classifier
/// prompt and in recorded learning patterns.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryDomain {
    #[default]
    #[serde(alias = "vendas")]
    Sales,
    #[serde(alias = "produtos")]
    Products,
    #[serde(alias = "usuarios", alias = "usuários")]
    Users,
}

impl QueryDomain {
    pub fn label(&self) -> &'static str {
        match self {
            QueryDomain::Sales => "sales",
            QueryDomain::Products => "products",
            QueryDomain::Users => "users",
        }
    }

    /// Which domain expert handles questions in this domain.
    /// Only products questions get the inventory specialist; everything
    /// else is answered with the sales playbook.
    pub fn strategy(&self) -> DomainStrategy {
        match self {
            QueryDomain::Products => DomainStrategy::Inventory,
            QueryDomain::Sales | QueryDomain::Users => DomainStrategy::Sales,
        }
    }
}

impl std::fmt::Display for QueryDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A single WHERE-clause condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryFilter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: serde_json::Value,
}

impl QueryFilter {
    /// Whether this filter already constrains country or region.
    /// Checked before injecting the default region filter.
    pub fn is_region_filter(&self) -> bool {
        let column = self.column.to_lowercase();
        column == "region" || column == "country"
    }

    /// The filter value as plain text, without JSON string quoting.
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "like")]
    Like,
}

impl FilterOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Gt => ">",
            FilterOperator::Lt => "<",
            FilterOperator::Gte => ">=",
            FilterOperator::Lte => "<=",
            FilterOperator::Like => "LIKE",
        }
    }
}

/// Time window extracted from the question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timeframe {
    /// Timestamp column the window applies to.
    #[serde(default = "default_time_column")]
    pub column: String,

    /// Granularity for time-bucketed results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<TimePeriod>,

    /// Named window such as "last_7_days" or "last_30_days",
    /// or "custom" when explicit dates are given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

fn default_time_column() -> String {
    "CREATED_AT".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimePeriod {
    Day,
    Week,
    Month,
}

impl TimePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimePeriod::Day => "day",
            TimePeriod::Week => "week",
            TimePeriod::Month => "month",
        }
    }
}

/// Requested ORDER BY clause.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}
