//! Reservation aggregate implementation.

use chrono::{DateTime, Duration, Utc};
use common::{Tenancy, TenantScope, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::events::{
    InventoryEvent, ReservationCancelledData, ReservationCreatedData, ReservationExpiredData,
    ReservationTransitionData,
};

use super::{ReservationError, ReservationStatus};

/// Expiry applied when a reservation is created without one.
pub const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 30;

/// Parameters for creating a reservation.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub reservation_id: String,
    pub tenancy: Tenancy,
    pub sku: String,
    pub order_id: String,
    pub location_id: String,
    pub quantity: u64,
    /// Defaults to 30 minutes.
    pub expiry: Option<Duration>,
    pub created_by: String,
}

impl NewReservation {
    /// Generates a `RSV-` prefixed id.
    pub fn new(
        tenancy: Tenancy,
        sku: impl Into<String>,
        order_id: impl Into<String>,
        location_id: impl Into<String>,
        quantity: u64,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            reservation_id: format!("RSV-{}", Uuid::new_v4().simple()),
            tenancy,
            sku: sku.into(),
            order_id: order_id.into(),
            location_id: location_id.into(),
            quantity,
            expiry: None,
            created_by: created_by.into(),
        }
    }

    pub fn with_id(mut self, reservation_id: impl Into<String>) -> Self {
        self.reservation_id = reservation_id.into();
        self
    }

    pub fn expiring_in(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

/// Inventory reservation aggregate root.
///
/// A short-lived claim on `quantity` units of a SKU at a location for an
/// order. Active claims lapse at `expires_at` and are moved to `Expired` by
/// the sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservation {
    reservation_id: String,
    sku: String,
    order_id: String,
    location_id: String,
    quantity: u64,
    status: ReservationStatus,
    expires_at: DateTime<Utc>,
    created_by: String,
    updated_by: String,
    tenancy: Tenancy,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    #[serde(skip)]
    version: Version,
    #[serde(skip)]
    pending_events: Vec<InventoryEvent>,
}

impl AggregateRoot for InventoryReservation {
    type Event = InventoryEvent;

    fn aggregate_type() -> &'static str {
        "InventoryReservation"
    }

    fn aggregate_id(&self) -> String {
        self.reservation_id.clone()
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
impl InventoryReservation {
    pub fn reservation_id(&self) -> &str {
        &self.reservation_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn updated_by(&self) -> &str {
        &self.updated_by
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

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Active and past `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && now > self.expires_at
    }

    /// Active and not yet expired.
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && now <= self.expires_at
    }
}

// Command methods
impl InventoryReservation {
    /// Creates an active reservation. Raises `ReservationCreated`.
    pub fn new(params: NewReservation) -> Result<Self, ReservationError> {
        Self::new_at(params, Utc::now())
    }

    pub fn new_at(params: NewReservation, now: DateTime<Utc>) -> Result<Self, ReservationError> {
        if params.quantity == 0 {
            return Err(ReservationError::InvalidQuantity { quantity: 0 });
        }

        let expiry = params
            .expiry
            .unwrap_or_else(|| Duration::minutes(DEFAULT_RESERVATION_TTL_MINUTES));
        let mut reservation = Self {
            reservation_id: params.reservation_id,
            sku: params.sku,
            order_id: params.order_id,
            location_id: params.location_id,
            quantity: params.quantity,
            status: ReservationStatus::Active,
            expires_at: now + expiry,
            updated_by: params.created_by.clone(),
            created_by: params.created_by,
            tenancy: params.tenancy,
            created_at: now,
            updated_at: now,
            version: Version::initial(),
            pending_events: Vec::new(),
        };

        reservation.raise(InventoryEvent::ReservationCreated(ReservationCreatedData {
            reservation_id: reservation.reservation_id.clone(),
            sku: reservation.sku.clone(),
            scope: reservation.scope(),
            order_id: reservation.order_id.clone(),
            location_id: reservation.location_id.clone(),
            quantity: reservation.quantity,
            expires_at: reservation.expires_at,
            created_by: reservation.created_by.clone(),
            created_at: now,
        }));
        Ok(reservation)
    }

    /// `Active -> Staged`. Fails with `Expired` once the claim has lapsed.
    pub fn mark_staged(&mut self, actor: &str) -> Result<(), ReservationError> {
        self.mark_staged_at(actor, Utc::now())
    }

    pub fn mark_staged_at(&mut self, actor: &str, now: DateTime<Utc>) -> Result<(), ReservationError> {
        if !self.status.can_stage() {
            return Err(self.invalid_transition("stage"));
        }
        if self.is_expired_at(now) {
            return Err(ReservationError::Expired {
                reservation_id: self.reservation_id.clone(),
                expires_at: self.expires_at,
            });
        }

        self.transition(ReservationStatus::Staged, actor, now);
        self.raise(InventoryEvent::ReservationStaged(self.transition_data(actor, now)));
        Ok(())
    }

    /// `Staged -> Fulfilled`.
    pub fn mark_fulfilled(&mut self, actor: &str) -> Result<(), ReservationError> {
        if !self.status.can_fulfill() {
            return Err(self.invalid_transition("fulfill"));
        }

        let now = Utc::now();
        self.transition(ReservationStatus::Fulfilled, actor, now);
        self.raise(InventoryEvent::ReservationFulfilled(self.transition_data(actor, now)));
        Ok(())
    }

    /// Releases an active or staged claim.
    pub fn cancel(&mut self, actor: &str, reason: &str) -> Result<(), ReservationError> {
        if self.status.is_terminal() {
            return Err(self.already_terminal());
        }

        let now = Utc::now();
        let previous_status = self.status;
        self.transition(ReservationStatus::Cancelled, actor, now);
        self.raise(InventoryEvent::ReservationCancelled(ReservationCancelledData {
            reservation_id: self.reservation_id.clone(),
            sku: self.sku.clone(),
            scope: self.scope(),
            order_id: self.order_id.clone(),
            quantity: self.quantity,
            previous_status,
            reason: reason.to_string(),
            cancelled_by: actor.to_string(),
            cancelled_at: now,
        }));
        Ok(())
    }

    /// Expires the claim if it is active and past `expires_at`.
    ///
    /// Returns whether the status changed; any other state is left alone.
    pub fn mark_expired(&mut self) -> bool {
        self.mark_expired_at(Utc::now())
    }

    pub fn mark_expired_at(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expired_at(now) {
            return false;
        }

        self.transition(ReservationStatus::Expired, "system", now);
        self.raise(InventoryEvent::ReservationExpired(ReservationExpiredData {
            reservation_id: self.reservation_id.clone(),
            sku: self.sku.clone(),
            scope: self.scope(),
            order_id: self.order_id.clone(),
            quantity: self.quantity,
            expires_at: self.expires_at,
            expired_at: now,
        }));
        true
    }

    /// Pushes `expires_at` out by `duration`. Only active claims expire.
    pub fn extend_expiration(&mut self, duration: Duration) -> Result<DateTime<Utc>, ReservationError> {
        if self.status.is_terminal() {
            return Err(self.already_terminal());
        }
        if self.status != ReservationStatus::Active {
            return Err(self.invalid_transition("extend"));
        }

        self.expires_at += duration;
        self.updated_at = Utc::now();
        Ok(self.expires_at)
    }

    /// Direct status write backing `ReservationRepository::update_status`.
    /// Bypasses the state machine and raises no event.
    pub fn overwrite_status(&mut self, status: ReservationStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
    }

    fn transition(&mut self, status: ReservationStatus, actor: &str, now: DateTime<Utc>) {
        self.status = status;
        self.updated_by = actor.to_string();
        self.updated_at = now;
    }

    fn transition_data(&self, actor: &str, now: DateTime<Utc>) -> ReservationTransitionData {
        ReservationTransitionData {
            reservation_id: self.reservation_id.clone(),
            sku: self.sku.clone(),
            scope: self.scope(),
            order_id: self.order_id.clone(),
            quantity: self.quantity,
            status: self.status,
            changed_by: actor.to_string(),
            changed_at: now,
        }
    }

    fn invalid_transition(&self, action: &'static str) -> ReservationError {
        ReservationError::InvalidTransition {
            reservation_id: self.reservation_id.clone(),
            current: self.status,
            action,
        }
    }

    fn already_terminal(&self) -> ReservationError {
        ReservationError::AlreadyTerminal {
            reservation_id: self.reservation_id.clone(),
            status: self.status,
        }
    }

    fn raise(&mut self, event: InventoryEvent) {
        self.pending_events.push(event);
    }
}
