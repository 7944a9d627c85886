//! Notification service trait and implementations.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::{Order, OrderStatus};

use crate::error::OrderError;

/// Trait for customer-facing notifications sent after order events.
///
/// Notifications are best-effort: the caller commits first and treats a
/// failed send as a warning, never as a reason to fail the operation.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Sent once when an order is committed.
    async fn order_confirmed(&self, order: &Order) -> Result<(), OrderError>;

    /// Sent when an order's status changes.
    async fn order_status_changed(
        &self,
        order: &Order,
        previous: OrderStatus,
    ) -> Result<(), OrderError>;
}

/// Notification service that writes to the log instead of an outbound
/// channel. The production default until a real provider is wired in.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotificationService;

impl LoggingNotificationService {
    /// Creates a new logging notification service.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationService for LoggingNotificationService {
    async fn order_confirmed(&self, order: &Order) -> Result<(), OrderError> {
        tracing::info!(
            order_number = %order.order_number,
            customer = %order.customer_email,
            total_cents = order.total.cents(),
            "order confirmation"
        );
        Ok(())
    }

    async fn order_status_changed(
        &self,
        order: &Order,
        previous: OrderStatus,
    ) -> Result<(), OrderError> {
        tracing::info!(
            order_number = %order.order_number,
            customer = %order.customer_email,
            from = %previous,
            to = %order.status,
            "order status notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    confirmations: Vec<String>,
    status_changes: Vec<(String, OrderStatus, OrderStatus)>,
    fail_on_send: bool,
}

/// In-memory notification service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationService {
    /// Creates a new in-memory notification service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on the next send call.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.write().unwrap().fail_on_send = fail;
    }

    /// Order numbers that received a confirmation.
    pub fn confirmations(&self) -> Vec<String> {
        self.state.read().unwrap().confirmations.clone()
    }

    /// Recorded status change notifications as (order number, from, to).
    pub fn status_changes(&self) -> Vec<(String, OrderStatus, OrderStatus)> {
        self.state.read().unwrap().status_changes.clone()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn order_confirmed(&self, order: &Order) -> Result<(), OrderError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_send {
            return Err(OrderError::Notification("delivery failed".to_string()));
        }
        state.confirmations.push(order.order_number.clone());
        Ok(())
    }

    async fn order_status_changed(
        &self,
        order: &Order,
        previous: OrderStatus,
    ) -> Result<(), OrderError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_send {
            return Err(OrderError::Notification("delivery failed".to_string()));
        }
        state
            .status_changes
            .push((order.order_number.clone(), previous, order.status));
        Ok(())
    }
}
