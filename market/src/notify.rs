//! Push-notification seam.
//!
//! Delivery itself is an external collaborator; the core only produces
//! payloads. Every notification is best-effort: dispatch never blocks a
//! state transition and failures are logged, never surfaced.

use crate::model::{ModelId, OrderStatus};
use async_trait::async_trait;
use log::{error, info};
use std::error::Error;
use std::sync::Arc;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tells a user (or assigned staff member) that their order changed
    /// state.
    async fn order_status_update(
        &self,
        user_id: ModelId,
        order_id: ModelId,
        status: OrderStatus,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Fans a new order out to every staff member found in range.
    async fn new_order(
        &self,
        staff_ids: &[ModelId],
        order_id: ModelId,
        lat: f64,
        long: f64,
        address: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Spawns a status notification without awaiting it. Errors are swallowed
/// after logging - notifications are not part of the consistency contract.
pub fn dispatch_status_update(
    notifier: Arc<dyn Notifier>,
    user_id: ModelId,
    order_id: ModelId,
    status: OrderStatus,
) {
    tokio::spawn(async move {
        if let Err(e) = notifier.order_status_update(user_id, order_id, status).await {
            error!("failed to notify user {user_id} about order {order_id}: {e}");
        }
    });
}

/// Fallback notifier that only logs. Stands in where no push backend is
/// wired up, and in the scheduler binary's default configuration.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_status_update(
        &self,
        user_id: ModelId,
        order_id: ModelId,
        status: OrderStatus,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        info!("order {order_id} is now {status:?}, notifying user {user_id}");
        Ok(())
    }

    async fn new_order(
        &self,
        staff_ids: &[ModelId],
        order_id: ModelId,
        _lat: f64,
        _long: f64,
        _address: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        info!("new order {order_id}, pinging staff {staff_ids:?}");
        Ok(())
    }
}
