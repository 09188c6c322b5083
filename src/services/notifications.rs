use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::entity::orders::OrderStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderStatusEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
}

/// Receives order status transitions for customer-facing delivery.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn order_status_changed(&self, event: &OrderStatusEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn order_status_changed(&self, event: &OrderStatusEvent) -> anyhow::Result<()> {
        tracing::info!(
            order_id = %event.order_id,
            order_number = %event.order_number,
            user_id = %event.user_id,
            from = ?event.from,
            to = ?event.to,
            "order status notification"
        );
        Ok(())
    }
}

/// Fire-and-forget: a failing notifier is logged and otherwise ignored.
pub async fn notify(notifier: &dyn OrderNotifier, event: &OrderStatusEvent) {
    if let Err(err) = notifier.order_status_changed(event).await {
        tracing::warn!(error = %err, order_id = %event.order_id, "order notification failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording(Mutex<Vec<OrderStatusEvent>>);

    #[async_trait]
    impl OrderNotifier for Recording {
        async fn order_status_changed(&self, event: &OrderStatusEvent) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl OrderNotifier for Failing {
        async fn order_status_changed(&self, _event: &OrderStatusEvent) -> anyhow::Result<()> {
            anyhow::bail!("mail server down")
        }
    }

    fn event() -> OrderStatusEvent {
        OrderStatusEvent {
            order_id: Uuid::new_v4(),
            order_number: "ORD-TEST0001".into(),
            user_id: Uuid::new_v4(),
            from: Some(OrderStatus::Pending),
            to: OrderStatus::Processing,
        }
    }

    #[tokio::test]
    async fn notify_passes_the_event_through() {
        let notifier = Recording::default();
        let event = event();
        notify(&notifier, &event).await;
        assert_eq!(notifier.0.lock().unwrap().as_slice(), &[event]);
    }

    #[tokio::test]
    async fn failing_notifier_is_swallowed() {
        notify(&Failing, &event()).await;
    }
}
