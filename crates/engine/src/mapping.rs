//! Plan mapping table
//!
//! Translates a checkout platform's product id into the owner's internal plan.
//! Lookups are exact; an unknown id is reported as
//! [`EngineError::UnresolvedMapping`] and never guessed.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMapping {
    pub checkout_product_id: String,
    pub internal_plan_name: String,
    pub is_recurring: bool,
}

impl PlanMapping {
    pub fn new(
        checkout_product_id: impl Into<String>,
        internal_plan_name: impl Into<String>,
        is_recurring: bool,
    ) -> Self {
        Self {
            checkout_product_id: checkout_product_id.into(),
            internal_plan_name: internal_plan_name.into(),
            is_recurring,
        }
    }
}

/// Result of [`PlanMappingTable::upsert`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// An existing mapping with the same product id was overwritten
    Replaced(PlanMapping),
}

/// Per-owner mapping table, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanMappingTable {
    mappings: Vec<PlanMapping>,
}

impl PlanMappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, product_id: &str) -> EngineResult<&PlanMapping> {
        self.mappings
            .iter()
            .find(|m| m.checkout_product_id == product_id)
            .ok_or_else(|| EngineError::UnresolvedMapping {
                product_id: product_id.to_string(),
            })
    }

    pub fn upsert(&mut self, mapping: PlanMapping) -> EngineResult<UpsertOutcome> {
        let mapping = PlanMapping {
            checkout_product_id: mapping.checkout_product_id.trim().to_string(),
            internal_plan_name: mapping.internal_plan_name.trim().to_string(),
            is_recurring: mapping.is_recurring,
        };

        if mapping.checkout_product_id.is_empty() {
            return Err(EngineError::InvalidMapping(
                "checkout product id must not be empty".to_string(),
            ));
        }
        if mapping.internal_plan_name.is_empty() {
            return Err(EngineError::InvalidMapping(format!(
                "plan name for '{}' must not be empty",
                mapping.checkout_product_id
            )));
        }

        match self
            .mappings
            .iter_mut()
            .find(|m| m.checkout_product_id == mapping.checkout_product_id)
        {
            Some(existing) => {
                let previous = std::mem::replace(existing, mapping);
                tracing::warn!(
                    product_id = %previous.checkout_product_id,
                    previous_plan = %previous.internal_plan_name,
                    new_plan = %existing.internal_plan_name,
                    "Plan mapping replaced - duplicate checkout product id"
                );
                Ok(UpsertOutcome::Replaced(previous))
            }
            None => {
                self.mappings.push(mapping);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    pub fn remove(&mut self, product_id: &str) -> Option<PlanMapping> {
        let index = self
            .mappings
            .iter()
            .position(|m| m.checkout_product_id == product_id)?;
        Some(self.mappings.remove(index))
    }

    /// First configured mapping, used as the default product for test events
    pub fn first(&self) -> Option<&PlanMapping> {
        self.mappings.first()
    }

    pub fn list(&self) -> &[PlanMapping] {
        &self.mappings
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
