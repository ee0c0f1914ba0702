//! Port for publishing domain events.

use async_trait::async_trait;

use crate::domain::DomainEvent;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event publish failed: {message}")]
pub struct PublishError {
    pub message: String,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Publisher used when no message bus is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        tracing::trace!(subject = event.subject(), "no event bus configured; dropping event");
        Ok(())
    }
}
