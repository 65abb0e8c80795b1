//! Order lifecycle service.
//!
//! Sits between the transport layer and the stores and owns every state
//! transition guard: flag gating at placement, the acceptance limit, the
//! single-delivery-in-flight rule, OTP verification and flag escalation on
//! cancellation. All races on assignment are settled by the stores'
//! conditional updates; this layer turns the lost race into a client error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use sqlx::SqlitePool;

use crate::error::{MarketError, MarketResult};
use crate::geo::within_radius;
use crate::model::{
    dedup_items, ItemRequest, ModelId, NewOrder, NewScheduledOrder, OpenOrder, OrderMode,
    OrderStatus, OrderType, StaffLocation, ORDER_ACCEPTANCE_LIMIT, STAFF_ACCEPT_TIMEOUT_SECS,
};
use crate::notify::{dispatch_status_update, Notifier};
use crate::patch::OrderPatch;
use crate::store::{
    AddressStore, DisputeStore, OfferStore, OrderStore, ScheduledOrderStore, UserStore,
};

/// Inbound order request, before server-side validation.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub user_id: ModelId,
    pub address_id: ModelId,
    pub mode: OrderMode,
    pub delivery_time: Option<DateTime<Utc>>,
    pub items: Vec<ItemRequest>,
}

/// Inbound scheduled-order template request.
#[derive(Debug, Clone)]
pub struct PlaceScheduledOrder {
    pub user_id: ModelId,
    pub address_id: ModelId,
    pub mode: OrderMode,
    pub start_date: chrono::NaiveDate,
    pub end_date: Option<chrono::NaiveDate>,
    pub delivery_time: chrono::NaiveTime,
    pub weekdays: Vec<chrono::Weekday>,
    pub items: Vec<ItemRequest>,
}

#[derive(Clone)]
pub struct Lifecycle {
    orders: OrderStore,
    scheduled: ScheduledOrderStore,
    addresses: AddressStore,
    users: UserStore,
    offers: OfferStore,
    disputes: DisputeStore,
    notifier: Arc<dyn Notifier>,
}

impl Lifecycle {
    pub fn new(pool: SqlitePool, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            orders: OrderStore::new(pool.clone()),
            scheduled: ScheduledOrderStore::new(pool.clone()),
            addresses: AddressStore::new(pool.clone()),
            users: UserStore::new(pool.clone()),
            offers: OfferStore::new(pool.clone()),
            disputes: DisputeStore::new(pool),
            notifier,
        }
    }

    pub fn orders(&self) -> &OrderStore {
        &self.orders
    }

    pub fn scheduled(&self) -> &ScheduledOrderStore {
        &self.scheduled
    }

    pub fn addresses(&self) -> &AddressStore {
        &self.addresses
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn offers(&self) -> &OfferStore {
        &self.offers
    }

    pub fn disputes(&self) -> &DisputeStore {
        &self.disputes
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.notifier)
    }

    /// Places an immediate order: flag gate, delivery-address lookup,
    /// service-area check, then the transactional insert. Staff fan-out
    /// happens off the request path.
    pub async fn place_order(&self, req: PlaceOrder) -> MarketResult<ModelId> {
        let flag_state = self.users.flag_state(req.user_id).await?;
        if flag_state.is_blocked() {
            return Err(MarketError::precondition(
                "account is blocked due to repeated cancellations",
            ));
        }

        let address = self.addresses.get(req.user_id, req.address_id, false).await?;
        let sm_id = self.store_manager_near(address.lat, address.long).await?;

        let order = NewOrder {
            mode: req.mode,
            order_type: OrderType::Now,
            user_id: req.user_id,
            address_id: req.address_id,
            delivery_time: req.delivery_time.unwrap_or_else(Utc::now),
            sm_id,
            items: dedup_items(req.items),
        };
        let order_id = self.orders.insert(&order).await?;
        info!("order {order_id} placed by user {} ({:?})", req.user_id, req.mode);

        let this = self.clone();
        let (mode, user_id, address_id) = (req.mode, req.user_id, req.address_id);
        tokio::spawn(async move {
            if let Err(e) = this.find_and_ping(mode, user_id, address_id, order_id).await {
                error!("staff fan-out for order {order_id} failed: {e}");
            }
        });

        Ok(order_id)
    }

    /// Creates a scheduled-order template. Same address and service-area
    /// checks as an immediate order; the template stays inert until the
    /// materializer stamps occurrences out of it.
    pub async fn place_scheduled_order(&self, req: PlaceScheduledOrder) -> MarketResult<ModelId> {
        let address = self.addresses.get(req.user_id, req.address_id, false).await?;
        let sm_id = self.store_manager_near(address.lat, address.long).await?;

        let template = NewScheduledOrder {
            user_id: req.user_id,
            address_id: req.address_id,
            mode: req.mode,
            start_date: req.start_date,
            end_date: req.end_date,
            delivery_time: req.delivery_time,
            weekdays: req.weekdays,
            sm_id,
            items: dedup_items(req.items),
        };
        let template_id = self.scheduled.insert(&template).await?;
        info!(
            "scheduled order {template_id} created by user {}",
            req.user_id
        );
        Ok(template_id)
    }

    /// Fans a fresh order out to every in-range staff member holding the
    /// permission for its mode. Finding nobody is not an error; the order
    /// stays visible in the open-order feed until the watchdog declines it.
    pub async fn find_and_ping(
        &self,
        mode: OrderMode,
        user_id: ModelId,
        address_id: ModelId,
        order_id: ModelId,
    ) -> MarketResult<()> {
        let address = self.addresses.get(user_id, address_id, true).await?;
        let candidates = self.users.staff_locations(mode.staff_permission()).await?;
        let in_range: Vec<ModelId> = candidates
            .iter()
            .filter(|loc| location_in_radius(loc, address.long, address.lat))
            .map(|loc| loc.staff_id)
            .collect();

        if in_range.is_empty() {
            warn!("no staff in range for order {order_id}");
            return Ok(());
        }
        if let Err(e) = self
            .notifier
            .new_order(&in_range, order_id, address.lat, address.long, &address.address_data)
            .await
        {
            error!("new-order push for order {order_id} failed: {e}");
        }
        Ok(())
    }

    /// Staff self-assignment. The acceptance limit is checked first; the
    /// assignment itself is settled by a conditional update so concurrent
    /// acceptors cannot both win.
    pub async fn accept_order(&self, staff_id: ModelId, order_id: ModelId) -> MarketResult<()> {
        let active = self.orders.active_count_for_staff(staff_id).await?;
        if active >= ORDER_ACCEPTANCE_LIMIT {
            return Err(MarketError::precondition("order acceptance limit reached"));
        }
        if !self.orders.try_accept(order_id, staff_id).await? {
            return Err(MarketError::precondition("order already accepted"));
        }
        info!("order {order_id} accepted by staff {staff_id}");

        let user_id = self.orders.owner_of(order_id).await?;
        dispatch_status_update(
            Arc::clone(&self.notifier),
            user_id,
            order_id,
            OrderStatus::Accepted,
        );
        Ok(())
    }

    /// Store-manager reassignment of a stuck order. Skips the acceptance
    /// limit on purpose: the manager is overriding, not volunteering.
    pub async fn reassign_order(&self, order_id: ModelId, staff_id: ModelId) -> MarketResult<()> {
        if !self.orders.try_reassign(order_id, staff_id).await? {
            return Err(MarketError::precondition(
                "order is no longer awaiting assignment",
            ));
        }
        info!("order {order_id} reassigned to staff {staff_id}");

        let user_id = self.orders.owner_of(order_id).await?;
        dispatch_status_update(
            Arc::clone(&self.notifier),
            user_id,
            order_id,
            OrderStatus::Accepted,
        );
        Ok(())
    }

    /// Marks an accepted order out for delivery. A staff member may only
    /// have one order in flight at a time.
    pub async fn start_delivery(&self, staff_id: ModelId, order_id: ModelId) -> MarketResult<()> {
        let in_flight = self
            .orders
            .other_out_for_delivery_count(staff_id, order_id)
            .await?;
        if in_flight > 0 {
            return Err(MarketError::precondition(
                "complete the previous order before starting another delivery",
            ));
        }
        if !self.orders.try_start_delivery(order_id, staff_id).await? {
            return Err(MarketError::precondition("order is not ready for delivery"));
        }

        let user_id = self.orders.owner_of(order_id).await?;
        dispatch_status_update(
            Arc::clone(&self.notifier),
            user_id,
            order_id,
            OrderStatus::OutForDelivery,
        );
        Ok(())
    }

    /// Confirms hand-off against the order's OTP. A wrong code changes
    /// nothing; a correct one settles the order, re-derives the final
    /// amount from the item snapshot and burns the code. Only the staff
    /// member holding the order, and only while it is out for delivery.
    pub async fn confirm_delivery(
        &self,
        staff_id: ModelId,
        order_id: ModelId,
        submitted_otp: i64,
        user_rating: Option<f64>,
    ) -> MarketResult<()> {
        let expected = self.orders.otp(order_id).await?;
        if submitted_otp != expected {
            return Err(MarketError::precondition("invalid otp"));
        }
        if !self.orders.try_deliver(order_id, staff_id, user_rating).await? {
            return Err(MarketError::precondition("order is not out for delivery"));
        }
        self.orders.recompute_amount(order_id).await?;
        self.orders.delete_otp(order_id).await?;
        info!("order {order_id} delivered by staff {staff_id}");

        let user_id = self.orders.owner_of(order_id).await?;
        dispatch_status_update(
            Arc::clone(&self.notifier),
            user_id,
            order_id,
            OrderStatus::Delivered,
        );
        Ok(())
    }

    /// User cancellation. Cancelling before anyone accepted is free;
    /// cancelling after acceptance adds a flag when the user's previous
    /// settled order was also a cancellation.
    pub async fn cancel_order(&self, user_id: ModelId, order_id: ModelId) -> MarketResult<()> {
        let status = self.orders.status_of(order_id).await?;
        if status.is_terminal() {
            return Err(MarketError::precondition("order is already settled"));
        }

        // Snapshot the flag state before the update so the order being
        // cancelled does not count as its own predecessor.
        let flag_state = self.users.flag_state(user_id).await?;

        if !self.orders.try_cancel(order_id, user_id, status).await? {
            // The order moved under us: re-read to tell a settled order
            // apart from a foreign one.
            let current = self.orders.status_of(order_id).await?;
            if current.is_terminal() {
                return Err(MarketError::precondition("order is already settled"));
            }
            return Err(MarketError::NotFound);
        }
        info!("order {order_id} cancelled by user {user_id}");

        let left_processing = status != OrderStatus::Processing && status != OrderStatus::Scheduled;
        if left_processing && flag_state.last_terminal_status == Some(OrderStatus::Cancelled) {
            self.users.set_flags(user_id, flag_state.flags + 1).await?;
            warn!(
                "user {user_id} flagged for consecutive cancellations ({} flags)",
                flag_state.flags + 1
            );
        }

        let tracking = self.orders.tracking(order_id).await?;
        if let Some(staff_id) = tracking.staff_id {
            dispatch_status_update(
                Arc::clone(&self.notifier),
                staff_id,
                order_id,
                OrderStatus::Cancelled,
            );
        }
        Ok(())
    }

    /// Post-delivery staff rating by the order's owner.
    pub async fn rate_order(
        &self,
        user_id: ModelId,
        order_id: ModelId,
        staff_rating: f64,
    ) -> MarketResult<()> {
        let patch = OrderPatch {
            staff_rating: Some(staff_rating),
            ..OrderPatch::default()
        };
        let rows = self.orders.update(order_id, &patch, Some(user_id)).await?;
        if rows == 0 {
            return Err(MarketError::NotFound);
        }
        Ok(())
    }

    /// Open-order feed for a staff member, trimmed to their service radius
    /// and to orders they have not rejected.
    pub async fn new_orders_for_staff(
        &self,
        staff_id: ModelId,
        mode: OrderMode,
    ) -> MarketResult<Vec<OpenOrder>> {
        let location = self.users.location_of(staff_id).await?;
        let orders = self.orders.open_orders(staff_id, mode).await?;
        let (Some(lat), Some(long)) = (location.lat, location.long) else {
            return Ok(Vec::new());
        };
        Ok(orders
            .into_iter()
            .filter(|order| within_radius(order.long, order.lat, long, lat))
            .collect())
    }

    /// Escalation feed for store managers: orders nobody accepted within
    /// the staff-acceptance window, oldest first.
    pub async fn orders_needing_reassignment(&self) -> MarketResult<Vec<OpenOrder>> {
        let cutoff = Utc::now() - chrono::Duration::seconds(STAFF_ACCEPT_TIMEOUT_SECS);
        self.orders.stale_unassigned(cutoff).await
    }

    pub async fn dispute_order(&self, user_id: ModelId, order_id: ModelId) -> MarketResult<()> {
        self.disputes.open(order_id, user_id).await
    }

    pub async fn resolve_dispute(
        &self,
        order_id: ModelId,
        resolver_id: ModelId,
    ) -> MarketResult<()> {
        self.disputes.resolve(order_id, resolver_id).await
    }

    /// Store-manager override that clears a user's flag count.
    pub async fn unflag_user(&self, user_id: ModelId) -> MarketResult<()> {
        self.users.unflag(user_id).await?;
        info!("user {user_id} unflagged");
        Ok(())
    }

    /// First store manager whose registered position covers the point.
    /// Order of iteration is whatever the store returns; any covering
    /// manager will do.
    async fn store_manager_near(&self, lat: f64, long: f64) -> MarketResult<ModelId> {
        let managers = self.users.store_manager_locations().await?;
        managers
            .iter()
            .find(|loc| location_in_radius(loc, long, lat))
            .map(|loc| loc.staff_id)
            .ok_or_else(|| MarketError::precondition("service is not available in this area"))
    }
}

fn location_in_radius(location: &StaffLocation, origin_lng: f64, origin_lat: f64) -> bool {
    match (location.lat, location.long) {
        (Some(lat), Some(long)) => within_radius(long, lat, origin_lng, origin_lat),
        _ => false,
    }
}
