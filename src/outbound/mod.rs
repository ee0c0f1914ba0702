//! Adapters implementing the ports: PostgreSQL and in-memory storage, NATS
//! event publishing.

pub mod memory;
pub mod nats;
pub mod postgres;
