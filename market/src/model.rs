use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub type ModelId = i64;

/// Radius within which staff and store managers are matched, in kilometres.
pub const RADIUS_KM: f64 = 5.0;

/// A staff member may hold at most this many non-terminal assignments.
pub const ORDER_ACCEPTANCE_LIMIT: i64 = 3;

/// Order placement is blocked once a user's flag counter reaches this value.
pub const MAX_FLAG_COUNT: i64 = 50;

/// Seconds a `processing` order waits for staff self-acceptance.
pub const STAFF_ACCEPT_TIMEOUT_SECS: i64 = 30;

/// Seconds a `processing` order waits for a store-manager assignment before
/// the watchdog declines it.
pub const SM_ASSIGN_TIMEOUT_SECS: i64 = 180;

/// Window before delivery time in which a materialized `scheduled` order is
/// activated and fanned out to staff.
pub const SCHEDULED_ACTIVATION_SECS: i64 = 900;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub enum OrderStatus {
    Processing,
    Accepted,
    OutForDelivery,
    Delivered,
    Cancelled,
    Declined,
    /// Materialized from a template, not yet fanned out to staff.
    Scheduled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Declined
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OrderMode {
    /// Cart contents are fulfilled off-platform; no item snapshot.
    Cart,
    Delivery,
}

impl OrderMode {
    /// Staff permission that fulfils orders of this mode.
    pub fn staff_permission(self) -> Permission {
        match self {
            OrderMode::Cart => Permission::CartBoy,
            OrderMode::Delivery => Permission::DeliveryBoy,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OrderType {
    Now,
    Scheduled,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum Permission {
    User,
    CartBoy,
    DeliveryBoy,
    StoreManager,
    Guest,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: ModelId,
    pub mode: OrderMode,
    pub order_type: OrderType,
    pub user_id: ModelId,
    pub staff_id: Option<ModelId>,
    pub address_id: ModelId,
    pub status: OrderStatus,
    pub amount: f64,
    pub otp: Option<i64>,
    pub user_rating: Option<f64>,
    pub staff_rating: Option<f64>,
    pub delivery_time: DateTime<Utc>,
    pub sm_id: ModelId,
    pub template_id: Option<ModelId>,
    pub occurrence_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[sqlx(skip)]
    pub items: Vec<OrderItem>,
}

/// Item state copied from the catalog at order-creation time. Later catalog
/// edits never alter historical orders.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub item_id: Option<ModelId>,
    pub name: String,
    pub price: f64,
    pub category: String,
    pub base_quantity: String,
    pub strikethrough_price: Option<f64>,
    pub quantity: i64,
    pub discount: i64,
}

impl OrderItem {
    /// Discounted line total for this snapshot entry.
    pub fn line_total(&self) -> f64 {
        (self.price - self.price * self.discount as f64 / 100.0) * self.quantity as f64
    }
}

/// A requested item line in a new order: the catalog id plus a quantity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRequest {
    pub item_id: ModelId,
    pub quantity: i64,
}

/// Drops duplicate item ids, keeping the first occurrence.
pub fn dedup_items(items: Vec<ItemRequest>) -> Vec<ItemRequest> {
    let mut seen = Vec::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if !seen.contains(&item.item_id) {
            seen.push(item.item_id);
            out.push(item);
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub mode: OrderMode,
    pub order_type: OrderType,
    pub user_id: ModelId,
    pub address_id: ModelId,
    pub delivery_time: DateTime<Utc>,
    pub sm_id: ModelId,
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledOrder {
    pub id: ModelId,
    pub user_id: ModelId,
    pub staff_id: Option<ModelId>,
    pub address_id: ModelId,
    pub mode: OrderMode,
    pub amount: f64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub sm_id: ModelId,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub days: Vec<ScheduledOrderDay>,
    #[sqlx(skip)]
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledOrderDay {
    pub weekday: String,
    pub delivery_time: NaiveTime,
}

#[derive(Debug, Clone)]
pub struct NewScheduledOrder {
    pub user_id: ModelId,
    pub address_id: ModelId,
    pub mode: OrderMode,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub delivery_time: NaiveTime,
    pub weekdays: Vec<Weekday>,
    pub sm_id: ModelId,
    pub items: Vec<ItemRequest>,
}

/// Full English weekday name, matching the `scheduled_orders_days.weekday`
/// column values.
pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: ModelId,
    pub user_id: ModelId,
    pub address_data: String,
    pub address_tag: Option<String>,
    pub lat: f64,
    pub long: f64,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAddress {
    pub user_id: ModelId,
    pub address_data: String,
    pub address_tag: Option<String>,
    pub lat: f64,
    pub long: f64,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: ModelId,
    pub title: String,
    pub description: Option<String>,
    pub discount: i64,
}

/// A staff member's last reported position, for radius matching.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StaffLocation {
    pub staff_id: ModelId,
    pub lat: Option<f64>,
    pub long: Option<f64>,
}

/// Status + assigned-staff position for one order, the polling answer for
/// "where is my order".
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderTracking {
    pub status: OrderStatus,
    pub staff_id: Option<ModelId>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
}

/// Flag counter plus the most recent terminal order status since the user
/// was last unflagged.
#[derive(Debug, Clone)]
pub struct FlagState {
    pub flags: i64,
    pub last_terminal_status: Option<OrderStatus>,
}

impl FlagState {
    pub fn is_blocked(&self) -> bool {
        self.flags >= MAX_FLAG_COUNT
    }
}

/// A scheduled-order template due for materialization today.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueTemplate {
    pub id: ModelId,
    pub mode: OrderMode,
    pub user_id: ModelId,
    pub delivery_time: NaiveTime,
}

/// An order awaiting staff, as surfaced to the new-order feed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub order_id: ModelId,
    pub user_id: ModelId,
    pub address_data: String,
    pub lat: f64,
    pub long: f64,
    pub delivery_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Declined.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(!OrderStatus::Scheduled.is_terminal());
    }

    #[test]
    fn line_total_applies_discount() {
        let item = OrderItem {
            item_id: Some(1),
            name: "Milk".to_string(),
            price: 50.0,
            category: "Dairy".to_string(),
            base_quantity: "1L".to_string(),
            strikethrough_price: None,
            quantity: 2,
            discount: 10,
        };
        assert!((item.line_total() - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let items = vec![
            ItemRequest { item_id: 1, quantity: 2 },
            ItemRequest { item_id: 2, quantity: 1 },
            ItemRequest { item_id: 1, quantity: 5 },
        ];
        let deduped = dedup_items(items);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].quantity, 2);
    }
}
