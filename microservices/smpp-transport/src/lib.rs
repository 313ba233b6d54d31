//! SMPP Transport - bridge between the message bus and an SMSC
//!
//! Capabilities:
//! - Reconnecting ESME session (transceiver, receiver or transmitter bind)
//! - Sequence number and SMSC message id correlation with bounded lifetimes
//! - Long message delivery via message_payload, SAR parameters or UDH
//! - Throttling backpressure with delayed retry
//! - Delivery reports and USSD session traffic

pub mod bus;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod dispatcher;
pub mod encoding;
pub mod error;
pub mod fragment;
pub mod inbound;
pub mod metrics;
pub mod outbound;
pub mod pdu;
pub mod reconnect;
pub mod sequence;
pub mod session;
pub mod store;
pub mod throttle;
pub mod transport;

pub use bus::{ChannelPublisher, LogPublisher, MessagePublisher};
pub use config::SmppTransportConfig;
pub use dispatcher::{ResponseDispatcher, SubmitOutcome};
pub use error::{Result, TransportError};
pub use fragment::FragmentationStrategy;
pub use session::{BindRole, Session, SessionState};
pub use store::{KeyValueStore, MemoryStore, NamespacedStore};
pub use throttle::{AcceptanceGate, PauseReason, Throttle};
pub use transport::SmppTransport;
