use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Events emitted by the services for asynchronous observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded { session_id: String, product_id: Uuid },
    CartItemUpdated { session_id: String, product_id: Uuid },
    CartItemRemoved { session_id: String, product_id: Uuid },
    CartCleared { session_id: String },

    // Coupon events
    CouponApplied { session_id: String, coupon_id: Uuid },
    CouponRemoved { session_id: String },

    // Order events
    OrderCreated(Uuid),
    OrderPaid(Uuid),

    // Payment events
    CheckoutSessionCreated { order_id: Uuid },

    // Recommender events
    PurchaseRecorded { order_id: Uuid, product_count: usize },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging the failure instead of propagating it. Event
    /// delivery never fails the business operation that emitted it.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            error!("Event dropped: {}", e);
        }
    }
}

/// Drains the event channel and logs each event. Observers with real side
/// effects subscribe through the message queue instead.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::OrderPaid(order_id) => {
                info!(order_id = %order_id, "Order paid");
            }
            other => {
                info!(event = ?other, "Event received");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_does_not_panic_on_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.send_or_log(Event::CartCleared { session_id: "s".into() }).await;
    }

    #[tokio::test]
    async fn events_flow_through_the_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let order_id = Uuid::new_v4();
        sender.send(Event::OrderCreated(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
