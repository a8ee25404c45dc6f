//! CRM relay - forwards CRM webhook events to two analytics endpoints.
//!
//! Lead and purchase events posted by the CRM are verified, pseudonymized
//! and sent once to a conversions API and once to a measurement endpoint.
//! Each attempt is recorded in an append-only outcome log.
//!
//! ## Architecture
//!
//! ```text
//! CRM → /webhook → Relay ─┬→ ConversionsApi
//!                         ├→ MeasurementProtocol
//!                         └→ RelayStore (log + enabled flag) ← /admin
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod normalize;
pub mod relay;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{
    ConversionsApi, Destination, DispatchOutcome, DispatchReport, Dispatcher, MeasurementProtocol,
    NormalizedEvent,
};
pub use error::{ConfigError, DeliveryError, StoreError};
pub use event::{classify, CanonicalEvent, InboundEvent};
pub use normalize::{normalize, CommerceAttributes, IdentityAttributes};
pub use relay::{Relay, RelayOutcome};
pub use store::{InMemoryStore, JsonFileStore, LogRecord, RelayConfig, RelayStore};
pub use web::AppState;
