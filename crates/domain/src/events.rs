//! Inventory domain events.

use chrono::{DateTime, Utc};
use common::{Money, TenantScope};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::allocation::AllocationStatus;
use crate::ledger::{LedgerTransactionId, ReferenceType, ValuationMethod};
use crate::reservation::ReservationStatus;

/// Events raised by the ledger, reservation and allocation aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventoryEvent {
    InventoryReceived(InventoryReceivedData),
    InventoryAdjusted(InventoryAdjustedData),
    InventoryValued(InventoryValuedData),
    LowStockAlert(LowStockAlertData),
    LedgerTransactionRecorded(LedgerTransactionRecordedData),
    ReservationCreated(ReservationCreatedData),
    ReservationStaged(ReservationTransitionData),
    ReservationFulfilled(ReservationTransitionData),
    ReservationCancelled(ReservationCancelledData),
    ReservationExpired(ReservationExpiredData),
    AllocationStatusChanged(AllocationStatusChangedData),
}

impl DomainEvent for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::InventoryReceived(_) => "wms.inventory.received",
            InventoryEvent::InventoryAdjusted(_) => "wms.inventory.adjusted",
            InventoryEvent::InventoryValued(_) => "wms.inventory.valued",
            InventoryEvent::LowStockAlert(_) => "wms.inventory.low-stock-alert",
            InventoryEvent::LedgerTransactionRecorded(_) => "wms.ledger.transaction-recorded",
            InventoryEvent::ReservationCreated(_) => "wms.reservation.created",
            InventoryEvent::ReservationStaged(_) => "wms.reservation.staged",
            InventoryEvent::ReservationFulfilled(_) => "wms.reservation.fulfilled",
            InventoryEvent::ReservationCancelled(_) => "wms.reservation.cancelled",
            InventoryEvent::ReservationExpired(_) => "wms.reservation.expired",
            InventoryEvent::AllocationStatusChanged(_) => "wms.allocation.status-changed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::InventoryReceived(d) => d.received_at,
            InventoryEvent::InventoryAdjusted(d) => d.adjusted_at,
            InventoryEvent::InventoryValued(d) => d.valued_at,
            InventoryEvent::LowStockAlert(d) => d.detected_at,
            InventoryEvent::LedgerTransactionRecorded(d) => d.recorded_at,
            InventoryEvent::ReservationCreated(d) => d.created_at,
            InventoryEvent::ReservationStaged(d) | InventoryEvent::ReservationFulfilled(d) => {
                d.changed_at
            }
            InventoryEvent::ReservationCancelled(d) => d.cancelled_at,
            InventoryEvent::ReservationExpired(d) => d.expired_at,
            InventoryEvent::AllocationStatusChanged(d) => d.changed_at,
        }
    }

    fn data(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            InventoryEvent::InventoryReceived(d) => serde_json::to_value(d),
            InventoryEvent::InventoryAdjusted(d) => serde_json::to_value(d),
            InventoryEvent::InventoryValued(d) => serde_json::to_value(d),
            InventoryEvent::LowStockAlert(d) => serde_json::to_value(d),
            InventoryEvent::LedgerTransactionRecorded(d) => serde_json::to_value(d),
            InventoryEvent::ReservationCreated(d) => serde_json::to_value(d),
            InventoryEvent::ReservationStaged(d) | InventoryEvent::ReservationFulfilled(d) => {
                serde_json::to_value(d)
            }
            InventoryEvent::ReservationCancelled(d) => serde_json::to_value(d),
            InventoryEvent::ReservationExpired(d) => serde_json::to_value(d),
            InventoryEvent::AllocationStatusChanged(d) => serde_json::to_value(d),
        }
    }
}

/// Stock received into a location and costed as a new layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryReceivedData {
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub warehouse_id: String,
    pub location_id: String,
    pub quantity: u64,
    pub unit_cost: Money,
    pub total_value: Money,
    /// Purchase order or ASN the stock arrived against.
    pub reference_id: String,
    pub transaction_id: LedgerTransactionId,
    pub received_by: String,
    pub received_at: DateTime<Utc>,
}

/// Manual or cycle-count correction. `quantity_delta` is signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryAdjustedData {
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub location_id: String,
    pub quantity_delta: i64,
    pub value: Money,
    pub reason: String,
    pub reference_id: String,
    pub transaction_id: LedgerTransactionId,
    pub new_balance: u64,
    pub adjusted_by: String,
    pub adjusted_at: DateTime<Utc>,
}

/// Valuation snapshot published after every ledger mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryValuedData {
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub valuation_method: ValuationMethod,
    pub total_quantity: u64,
    pub total_value: Money,
    pub average_unit_cost: Money,
    pub cost_layer_count: usize,
    pub valued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowStockAlertData {
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub location_id: String,
    pub current_balance: u64,
    pub reorder_point: u64,
    pub detected_at: DateTime<Utc>,
}

/// Summary of one balanced double-entry transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransactionRecordedData {
    pub transaction_id: LedgerTransactionId,
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub reference_id: String,
    pub reference_type: ReferenceType,
    pub entry_count: usize,
    pub total_debit: Money,
    pub total_credit: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_of_goods_sold: Option<Money>,
    pub running_balance: u64,
    pub running_value: Money,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationCreatedData {
    pub reservation_id: String,
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub order_id: String,
    pub location_id: String,
    pub quantity: u64,
    pub expires_at: DateTime<Utc>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Shared body for the staged and fulfilled transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationTransitionData {
    pub reservation_id: String,
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub order_id: String,
    pub quantity: u64,
    pub status: ReservationStatus,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationCancelledData {
    pub reservation_id: String,
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub order_id: String,
    pub quantity: u64,
    pub previous_status: ReservationStatus,
    pub reason: String,
    pub cancelled_by: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationExpiredData {
    pub reservation_id: String,
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub order_id: String,
    pub quantity: u64,
    pub expires_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Raised on allocation creation (`from` is `None`) and every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationStatusChangedData {
    pub allocation_id: String,
    pub reservation_id: String,
    pub sku: String,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub order_id: String,
    pub quantity: u64,
    pub source_location_id: String,
    pub staging_location_id: String,
    pub from: Option<AllocationStatus>,
    pub to: AllocationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}
