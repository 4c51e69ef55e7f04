//! Ledger commands.

use chrono::{DateTime, Utc};
use common::{Money, Tenancy, TenantScope};

use super::ReferenceType;

/// Receive stock into a location at a unit cost.
#[derive(Debug, Clone)]
pub struct ReceiveStock {
    pub tenancy: Tenancy,
    pub sku: String,
    pub quantity: u64,
    pub unit_cost: Money,
    pub location_id: String,
    /// Purchase order or ASN.
    pub reference_id: String,
    pub received_by: String,
    pub occurred_at: DateTime<Utc>,
}

impl ReceiveStock {
    pub fn new(
        tenancy: Tenancy,
        sku: impl Into<String>,
        quantity: u64,
        unit_cost: Money,
        location_id: impl Into<String>,
        reference_id: impl Into<String>,
        received_by: impl Into<String>,
    ) -> Self {
        Self {
            tenancy,
            sku: sku.into(),
            quantity,
            unit_cost,
            location_id: location_id.into(),
            reference_id: reference_id.into(),
            received_by: received_by.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Consume stock, recognising cost of goods sold.
#[derive(Debug, Clone)]
pub struct ConsumeStock {
    pub scope: TenantScope,
    pub sku: String,
    pub quantity: u64,
    pub location_id: String,
    pub reference_id: String,
    pub reference_type: ReferenceType,
    pub consumed_by: String,
    pub occurred_at: DateTime<Utc>,
}

impl ConsumeStock {
    pub fn new(
        scope: TenantScope,
        sku: impl Into<String>,
        quantity: u64,
        location_id: impl Into<String>,
        reference_id: impl Into<String>,
        reference_type: ReferenceType,
        consumed_by: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            sku: sku.into(),
            quantity,
            location_id: location_id.into(),
            reference_id: reference_id.into(),
            reference_type,
            consumed_by: consumed_by.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Signed correction of the on-hand quantity.
#[derive(Debug, Clone)]
pub struct AdjustStock {
    pub scope: TenantScope,
    pub sku: String,
    pub quantity_delta: i64,
    pub reason: String,
    pub location_id: String,
    pub reference_id: String,
    pub adjusted_by: String,
    pub occurred_at: DateTime<Utc>,
}

impl AdjustStock {
    pub fn new(
        scope: TenantScope,
        sku: impl Into<String>,
        quantity_delta: i64,
        reason: impl Into<String>,
        location_id: impl Into<String>,
        reference_id: impl Into<String>,
        adjusted_by: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            sku: sku.into(),
            quantity_delta,
            reason: reason.into(),
            location_id: location_id.into(),
            reference_id: reference_id.into(),
            adjusted_by: adjusted_by.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}
