use crate::model::{ModelId, OrderStatus};

/// Sparse update for an order row.
///
/// Only supplied fields are written. The patch renders to a parameterized
/// UPDATE - values always travel as placeholders, never interpolated into
/// the SQL text.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub staff_id: Option<ModelId>,
    pub amount: Option<f64>,
    pub user_rating: Option<f64>,
    pub staff_rating: Option<f64>,
    pub status: Option<OrderStatus>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.staff_id.is_none()
            && self.amount.is_none()
            && self.user_rating.is_none()
            && self.staff_rating.is_none()
            && self.status.is_none()
    }

    /// Renders the SET clause with one `?` placeholder per supplied field,
    /// plus `updated_at`. Bind order matches field declaration order.
    pub(crate) fn set_clause(&self) -> String {
        let mut sets = Vec::new();
        if self.staff_id.is_some() {
            sets.push("staff_id = ?");
        }
        if self.amount.is_some() {
            sets.push("amount = ?");
        }
        if self.user_rating.is_some() {
            sets.push("user_rating = ?");
        }
        if self.staff_rating.is_some() {
            sets.push("staff_rating = ?");
        }
        if self.status.is_some() {
            sets.push("status = ?");
        }
        sets.push("updated_at = ?");
        sets.join(", ")
    }
}
