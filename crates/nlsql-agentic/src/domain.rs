//! Domain expert strategies
//!
//! Each strategy pairs a system prompt with SQL-shape conventions for
//! one kind of business question. The products domain gets the
//! inventory specialist; every other domain uses the sales expert.

use std::fmt;

/// SQL generation strategy selected from the classified domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainStrategy {
    /// Revenue, orders and customer questions. CTE-based queries over
    /// ORDERS and ORDER_ITEMS with period comparisons.
    Sales,
    /// Stock and catalog questions. Joins PRODUCTS with INVENTORY and
    /// aggregates units on hand.
    Inventory,
}

impl DomainStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            DomainStrategy::Sales => "sales",
            DomainStrategy::Inventory => "inventory",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DomainStrategy::Sales => "Sales expert: revenue, order and customer analytics",
            DomainStrategy::Inventory => "Inventory expert: stock levels and product movement",
        }
    }

    /// The system prompt handed to the LLM for this strategy.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            DomainStrategy::Sales => include_str!("prompts/sales_expert.md"),
            DomainStrategy::Inventory => include_str!("prompts/inventory_expert.md"),
        }
    }
}

impl fmt::Display for DomainStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
