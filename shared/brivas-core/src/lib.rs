//! Brivas Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - The service trait and runtime every microservice binary uses
//! - Domain identifiers and enums shared with the message bus
//! - Bus message shapes (outbound, inbound, events, failures)
//! - Error handling utilities

pub mod config;
pub mod domain;
pub mod error;
pub mod message;
pub mod service;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{BrivasError, Result};
pub use message::{BusMessage, FailureMessage, InboundMessage, OutboundMessage, TransportEvent};
pub use service::{BrivasService, DependencyStatus, HealthStatus, MicroserviceRuntime, ReadinessStatus};
