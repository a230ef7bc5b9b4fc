/*!
 * # Message Queue
 *
 * Fire-and-forget dispatch of notification work (order confirmation and
 * invoice e-mails). Producers enqueue and move on; delivery retries belong
 * to the consumer.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Topic for the order-confirmation e-mail, published at order creation.
pub const TOPIC_ORDER_CREATED: &str = "emails.order_created";
/// Topic for the invoice e-mail, published exactly once per paid order.
pub const TOPIC_INVOICE: &str = "emails.invoice";

/// Message queue errors
#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Message envelope for queue items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Message {
    pub fn new(topic: String, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            payload,
            timestamp: chrono::Utc::now(),
            retry_count: 0,
            max_retries: 3,
        }
    }

    /// Order-confirmation message for a freshly created order.
    pub fn order_created(order_id: Uuid, email: &str) -> Self {
        Self::new(
            TOPIC_ORDER_CREATED.to_string(),
            serde_json::json!({ "order_id": order_id, "email": email }),
        )
    }

    /// Invoice message for a freshly paid order.
    pub fn invoice(order_id: Uuid, email: &str) -> Self {
        Self::new(
            TOPIC_INVOICE.to_string(),
            serde_json::json!({ "order_id": order_id, "email": email }),
        )
    }
}

/// Message queue trait for different implementations
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError>;
    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError>;
    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
    async fn nack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
}

/// In-memory message queue implementation
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    queues: Arc<Mutex<std::collections::HashMap<String, VecDeque<Message>>>>,
    max_size: usize,
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(std::collections::HashMap::new())),
            max_size: 1000,
        }
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            queues: Arc::new(Mutex::new(std::collections::HashMap::new())),
            max_size,
        }
    }

    /// Number of pending messages on a topic. Test helper.
    pub fn pending(&self, topic: &str) -> usize {
        let queues = self.queues.lock().unwrap();
        queues.get(topic).map_or(0, |q| q.len())
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues
            .entry(message.topic.clone())
            .or_insert_with(VecDeque::new);

        if queue.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        queue.push_back(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(queue) = queues.get_mut(topic) {
            Ok(queue.pop_front())
        } else {
            Ok(None)
        }
    }

    async fn ack(&self, _message_id: &Uuid) -> Result<(), MessageQueueError> {
        // In-memory implementation doesn't need explicit acking
        Ok(())
    }

    async fn nack(&self, _message_id: &Uuid) -> Result<(), MessageQueueError> {
        // In-memory implementation doesn't support nacking
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_subscribe_round_trips() {
        let queue = InMemoryMessageQueue::new();
        let order_id = Uuid::new_v4();
        let message = Message::order_created(order_id, "jo@example.com");

        queue.publish(message).await.unwrap();

        let received = queue.subscribe(TOPIC_ORDER_CREATED).await.unwrap();
        let received = received.expect("message should be queued");
        assert_eq!(received.topic, TOPIC_ORDER_CREATED);
        assert_eq!(received.payload["order_id"], order_id.to_string());

        assert!(queue.subscribe(TOPIC_ORDER_CREATED).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_queue_rejects_publish() {
        let queue = InMemoryMessageQueue::with_max_size(1);
        queue
            .publish(Message::invoice(Uuid::new_v4(), "a@example.com"))
            .await
            .unwrap();
        let err = queue
            .publish(Message::invoice(Uuid::new_v4(), "b@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessageQueueError::QueueFull));
    }
}
