//! NATS event publisher.

use async_trait::async_trait;

use crate::domain::DomainEvent;
use crate::ports::{EventPublisher, PublishError};

/// Publishes each event as JSON on `<prefix>.<subject>`, e.g. `escrow.order.placed`.
#[derive(Clone)]
pub struct NatsEventPublisher {
    client: async_nats::Client,
    prefix: String,
}

impl NatsEventPublisher {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self { client, prefix: prefix.into() }
    }

    pub fn subject_for(&self, event: &DomainEvent) -> String { subject(&self.prefix, event) }
}

fn subject(prefix: &str, event: &DomainEvent) -> String {
    if prefix.is_empty() { event.subject().to_string() } else { format!("{prefix}.{}", event.subject()) }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event).map_err(|e| PublishError { message: e.to_string() })?;
        let subject = self.subject_for(event);
        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| PublishError { message: format!("{subject}: {e}") })?;
        tracing::debug!(%subject, "published event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CartEvent, CartId, Money, OrderEvent, OrderId, OwnerId};

    #[test]
    fn test_subject_is_prefixed() {
        let event = DomainEvent::Order(OrderEvent::Deleted { order_id: OrderId::new() });
        assert_eq!(subject("escrow", &event), "escrow.order.deleted");
        assert_eq!(subject("", &event), "order.deleted");
    }

    #[test]
    fn test_payload_shape() {
        let cart_id = CartId::new();
        let event = DomainEvent::Cart(CartEvent::ItemsChanged {
            cart_id,
            owner_id: OwnerId::new("buyer-1").unwrap(),
            version: 3,
            total: Money::from_minor(2550, "USD"),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["aggregate"], "Cart");
        assert_eq!(json["event"]["type"], "ItemsChanged");
        assert_eq!(json["event"]["cartId"], cart_id.to_string());
        assert_eq!(json["event"]["total"]["amount"], 25.5);
    }
}
