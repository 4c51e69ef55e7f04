//! Allocation aggregate implementation.

use chrono::{DateTime, Utc};
use common::{Tenancy, TenantScope, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::events::{AllocationStatusChangedData, InventoryEvent};

use super::{AllocationError, AllocationStatus};

/// Parameters for creating an allocation.
#[derive(Debug, Clone)]
pub struct NewAllocation {
    pub allocation_id: String,
    pub tenancy: Tenancy,
    pub sku: String,
    pub reservation_id: String,
    pub order_id: String,
    pub quantity: u64,
    pub source_location_id: String,
    pub staging_location_id: String,
    pub staged_by: String,
}

impl NewAllocation {
    /// Generates an `ALC-` prefixed id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenancy: Tenancy,
        sku: impl Into<String>,
        reservation_id: impl Into<String>,
        order_id: impl Into<String>,
        quantity: u64,
        source_location_id: impl Into<String>,
        staging_location_id: impl Into<String>,
        staged_by: impl Into<String>,
    ) -> Self {
        Self {
            allocation_id: format!("ALC-{}", Uuid::new_v4().simple()),
            tenancy,
            sku: sku.into(),
            reservation_id: reservation_id.into(),
            order_id: order_id.into(),
            quantity,
            source_location_id: source_location_id.into(),
            staging_location_id: staging_location_id.into(),
            staged_by: staged_by.into(),
        }
    }

    pub fn with_id(mut self, allocation_id: impl Into<String>) -> Self {
        self.allocation_id = allocation_id.into();
        self
    }
}

/// Inventory allocation aggregate root.
///
/// Created when reserved stock is picked to staging; follows the stock
/// through packing and shipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryAllocation {
    allocation_id: String,
    sku: String,
    order_id: String,
    reservation_id: String,
    quantity: u64,
    source_location_id: String,
    staging_location_id: String,
    status: AllocationStatus,
    staged_by: String,
    #[serde(default)]
    packed_by: Option<String>,
    #[serde(default)]
    shipped_by: Option<String>,
    #[serde(default)]
    packed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    shipped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    returned_at: Option<DateTime<Utc>>,
    tenancy: Tenancy,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    #[serde(skip)]
    version: Version,
    #[serde(skip)]
    pending_events: Vec<InventoryEvent>,
}

impl AggregateRoot for InventoryAllocation {
    type Event = InventoryEvent;

    fn aggregate_type() -> &'static str {
        "InventoryAllocation"
    }

    fn aggregate_id(&self) -> String {
        self.allocation_id.clone()
    }

    fn tenancy(&self) -> &Tenancy {
        &self.tenancy
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending_events(&self) -> &[InventoryEvent] {
        &self.pending_events
    }

    fn clear_pending_events(&mut self) {
        self.pending_events.clear();
    }
}

// Query methods
impl InventoryAllocation {
    pub fn allocation_id(&self) -> &str {
        &self.allocation_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn reservation_id(&self) -> &str {
        &self.reservation_id
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn source_location_id(&self) -> &str {
        &self.source_location_id
    }

    pub fn staging_location_id(&self) -> &str {
        &self.staging_location_id
    }

    pub fn status(&self) -> AllocationStatus {
        self.status
    }

    pub fn staged_by(&self) -> &str {
        &self.staged_by
    }

    pub fn packed_by(&self) -> Option<&str> {
        self.packed_by.as_deref()
    }

    pub fn shipped_by(&self) -> Option<&str> {
        self.shipped_by.as_deref()
    }

    pub fn packed_at(&self) -> Option<DateTime<Utc>> {
        self.packed_at
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn returned_at(&self) -> Option<DateTime<Utc>> {
        self.returned_at
    }

    pub fn scope(&self) -> TenantScope {
        self.tenancy.scope()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

// Command methods
impl InventoryAllocation {
    /// Creates a staged allocation against a reservation.
    pub fn new(params: NewAllocation) -> Result<Self, AllocationError> {
        if params.reservation_id.trim().is_empty() {
            return Err(AllocationError::ReservationRequired);
        }
        if params.quantity == 0 {
            return Err(AllocationError::InvalidQuantity { quantity: 0 });
        }

        let now = Utc::now();
        let mut allocation = Self {
            allocation_id: params.allocation_id,
            sku: params.sku,
            order_id: params.order_id,
            reservation_id: params.reservation_id,
            quantity: params.quantity,
            source_location_id: params.source_location_id,
            staging_location_id: params.staging_location_id,
            status: AllocationStatus::Staged,
            staged_by: params.staged_by,
            packed_by: None,
            shipped_by: None,
            packed_at: None,
            shipped_at: None,
            returned_at: None,
            tenancy: params.tenancy,
            created_at: now,
            updated_at: now,
            version: Version::initial(),
            pending_events: Vec::new(),
        };

        let actor = allocation.staged_by.clone();
        allocation.raise_status_changed(None, &actor, None, now);
        Ok(allocation)
    }

    /// `Staged -> Packed`.
    pub fn mark_packed(&mut self, actor: &str) -> Result<(), AllocationError> {
        if !self.status.can_pack() {
            return Err(self.transition_error("pack"));
        }

        let now = Utc::now();
        let from = self.status;
        self.status = AllocationStatus::Packed;
        self.packed_by = Some(actor.to_string());
        self.packed_at = Some(now);
        self.updated_at = now;
        self.raise_status_changed(Some(from), actor, None, now);
        Ok(())
    }

    /// `Packed -> Shipped`.
    pub fn mark_shipped(&mut self, actor: &str) -> Result<(), AllocationError> {
        if !self.status.can_ship() {
            return Err(self.transition_error("ship"));
        }

        let now = Utc::now();
        let from = self.status;
        self.status = AllocationStatus::Shipped;
        self.shipped_by = Some(actor.to_string());
        self.shipped_at = Some(now);
        self.updated_at = now;
        self.raise_status_changed(Some(from), actor, None, now);
        Ok(())
    }

    /// Moves the allocation to `Returned` from any non-terminal state.
    pub fn mark_returned(&mut self, actor: &str, reason: &str) -> Result<(), AllocationError> {
        if !self.status.can_return() {
            return Err(self.transition_error("return"));
        }

        let now = Utc::now();
        let from = self.status;
        self.status = AllocationStatus::Returned;
        self.returned_at = Some(now);
        self.updated_at = now;
        self.raise_status_changed(Some(from), actor, Some(reason.to_string()), now);
        Ok(())
    }

    /// Direct status write backing `AllocationRepository::update_status`.
    /// Bypasses the state machine and raises no event.
    pub fn overwrite_status(&mut self, status: AllocationStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
    }

    fn transition_error(&self, action: &'static str) -> AllocationError {
        if self.status.is_terminal() {
            AllocationError::AlreadyTerminal {
                allocation_id: self.allocation_id.clone(),
                status: self.status,
            }
        } else {
            AllocationError::InvalidTransition {
                allocation_id: self.allocation_id.clone(),
                current: self.status,
                action,
            }
        }
    }

    fn raise_status_changed(
        &mut self,
        from: Option<AllocationStatus>,
        actor: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.pending_events.push(InventoryEvent::AllocationStatusChanged(
            AllocationStatusChangedData {
                allocation_id: self.allocation_id.clone(),
                reservation_id: self.reservation_id.clone(),
                sku: self.sku.clone(),
                scope: self.scope(),
                order_id: self.order_id.clone(),
                quantity: self.quantity,
                source_location_id: self.source_location_id.clone(),
                staging_location_id: self.staging_location_id.clone(),
                from,
                to: self.status,
                reason,
                changed_by: actor.to_string(),
                changed_at: now,
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NewAllocation {
        NewAllocation::new(
            Tenancy::new("T1", "F1", "W1"),
            "SKU-1",
            "RSV-1",
            "O-1",
            10,
            "A-01-01",
            "STAGE-1",
            "picker",
        )
        .with_id("ALC-1")
    }

    fn transitions(a: &InventoryAllocation) -> Vec<(Option<AllocationStatus>, AllocationStatus)> {
        a.pending_events()
            .iter()
            .map(|e| match e {
                InventoryEvent::AllocationStatusChanged(d) => (d.from, d.to),
                other => panic!("unexpected event: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_create_allocation() {
        let a = InventoryAllocation::new(params()).unwrap();

        assert_eq!(a.status(), AllocationStatus::Staged);
        assert_eq!(a.aggregate_id(), "ALC-1");
        assert!(a.is_active());
        assert_eq!(transitions(&a), vec![(None, AllocationStatus::Staged)]);
    }

    #[test]
    fn test_create_requires_reservation() {
        let mut p = params();
        p.reservation_id = String::new();
        assert_eq!(
            InventoryAllocation::new(p).unwrap_err(),
            AllocationError::ReservationRequired
        );

        let mut p = params();
        p.quantity = 0;
        assert_eq!(
            InventoryAllocation::new(p).unwrap_err(),
            AllocationError::InvalidQuantity { quantity: 0 }
        );
    }

    #[test]
    fn test_full_lifecycle() {
        let mut a = InventoryAllocation::new(params()).unwrap();
        a.mark_packed("packer").unwrap();
        a.mark_shipped("shipper").unwrap();

        assert_eq!(a.status(), AllocationStatus::Shipped);
        assert_eq!(a.packed_by(), Some("packer"));
        assert_eq!(a.shipped_by(), Some("shipper"));
        assert!(a.packed_at().is_some());
        assert!(a.shipped_at().is_some());
        assert!(!a.is_active());
        assert_eq!(
            transitions(&a),
            vec![
                (None, AllocationStatus::Staged),
                (Some(AllocationStatus::Staged), AllocationStatus::Packed),
                (Some(AllocationStatus::Packed), AllocationStatus::Shipped),
            ]
        );
    }

    #[test]
    fn test_ship_requires_packed() {
        let mut a = InventoryAllocation::new(params()).unwrap();
        assert!(matches!(
            a.mark_shipped("shipper"),
            Err(AllocationError::InvalidTransition {
                current: AllocationStatus::Staged,
                action: "ship",
                ..
            })
        ));
    }

    #[test]
    fn test_return_after_ship() {
        let mut a = InventoryAllocation::new(params()).unwrap();
        a.mark_packed("packer").unwrap();
        a.mark_shipped("shipper").unwrap();
        a.clear_pending_events();

        a.mark_returned("clerk", "damaged in transit").unwrap();
        assert_eq!(a.status(), AllocationStatus::Returned);
        match &a.pending_events()[0] {
            InventoryEvent::AllocationStatusChanged(d) => {
                assert_eq!(d.reason.as_deref(), Some("damaged in transit"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(matches!(
            a.mark_returned("clerk", "again"),
            Err(AllocationError::AlreadyTerminal { .. })
        ));
        assert!(matches!(
            a.mark_packed("packer"),
            Err(AllocationError::AlreadyTerminal { .. })
        ));
    }

    #[test]
    fn test_return_from_staged() {
        let mut a = InventoryAllocation::new(params()).unwrap();
        a.mark_returned("clerk", "short pick").unwrap();
        assert_eq!(a.status(), AllocationStatus::Returned);
        assert!(a.returned_at().is_some());
    }
}
