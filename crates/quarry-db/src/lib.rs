//! Quarry Database — per-tenant SurrealDB resource lifecycle.
//!
//! This crate provides:
//! - Connection management ([`ConnectionManager`], [`ConnectionHandle`])
//! - Model registration and DDL compilation ([`ModelRegistry`])
//! - Generic CRUD over registered models ([`SurrealRecordAccessor`])
//! - The user account repository ([`repository::SurrealUserRepository`])
//! - A durable, retention-bounded log sink ([`LogSink`])
//! - The tenant value tying them together ([`Tenant`])

mod accessor;
mod connection;
mod error;
pub mod log_sink;
mod registry;
pub mod repository;
mod schema;
mod tenant;

pub use accessor::SurrealRecordAccessor;
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionState};
pub use error::DbError;
pub use log_sink::{LogSink, LogSinkLayer, LogTransport, SinkFailure};
pub use registry::{ModelRegistry, RegisteredModel};
pub use schema::model_ddl;
pub use tenant::Tenant;
