//! Dual-destination dispatch.
//!
//! Every classified event is sent once to the conversions API and once to
//! the measurement endpoint. The two sends run as independent tasks; a
//! failure, timeout or panic in one is captured as that destination's
//! outcome and never touches the other.
//!
//! ```text
//! NormalizedEvent ─┬─> ConversionsApi     ─> DispatchOutcome
//!                  └─> MeasurementProtocol ─> DispatchOutcome
//! ```

pub mod conversions;
pub mod measurement;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::DeliveryError;
use crate::event::CanonicalEvent;
use crate::normalize::{CommerceAttributes, IdentityAttributes};

pub use conversions::ConversionsApi;
pub use measurement::MeasurementProtocol;

/// Event after classification and normalization, ready for fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub event: CanonicalEvent,
    /// Unix seconds at which the relay accepted the event
    pub event_time: i64,
    pub identity: IdentityAttributes,
    pub commerce: CommerceAttributes,
    pub client_id: Option<String>,
    pub source_url: Option<String>,
}

/// A remote analytics endpoint that accepts one event per call.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Send the event, returning the remote status code on a 2xx response.
    async fn send(&self, event: &NormalizedEvent) -> Result<u16, DeliveryError>;
}

/// Result of one send: the remote status code, or the `"error"` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Status(u16),
    /// The send failed; `status` is set when the remote answered non-2xx.
    Error { status: Option<u16> },
}

impl DispatchOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, DispatchOutcome::Error { .. })
    }
}

impl From<Result<u16, DeliveryError>> for DispatchOutcome {
    fn from(result: Result<u16, DeliveryError>) -> Self {
        match result {
            Ok(status) => DispatchOutcome::Status(status),
            Err(e) => DispatchOutcome::Error { status: e.status() },
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum OutcomeRepr {
    Code(u16),
    Sentinel(String),
}

// Persisted as a bare number or the string "error".
impl Serialize for DispatchOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DispatchOutcome::Status(code) => OutcomeRepr::Code(*code),
            DispatchOutcome::Error { .. } => OutcomeRepr::Sentinel("error".to_string()),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DispatchOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match OutcomeRepr::deserialize(deserializer)? {
            OutcomeRepr::Code(code) => Ok(DispatchOutcome::Status(code)),
            OutcomeRepr::Sentinel(s) if s == "error" => Ok(DispatchOutcome::Error { status: None }),
            OutcomeRepr::Sentinel(other) => Err(serde::de::Error::custom(format!(
                "unknown dispatch outcome {other:?}"
            ))),
        }
    }
}

/// Outcomes of both sends for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub conversions: DispatchOutcome,
    pub measurement: DispatchOutcome,
}

/// Fans an event out to both destinations with a per-call timeout.
#[derive(Clone)]
pub struct Dispatcher {
    conversions: Arc<dyn Destination>,
    measurement: Arc<dyn Destination>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        conversions: Arc<dyn Destination>,
        measurement: Arc<dyn Destination>,
        timeout: Duration,
    ) -> Self {
        Self {
            conversions,
            measurement,
            timeout,
        }
    }

    /// Send `event` to both destinations and wait for both to settle.
    ///
    /// Single attempt per destination; no retries.
    pub async fn dispatch(&self, event: &NormalizedEvent) -> DispatchReport {
        let event = Arc::new(event.clone());

        let conversions = self.spawn_send(self.conversions.clone(), event.clone());
        let measurement = self.spawn_send(self.measurement.clone(), event.clone());

        let (conversions, measurement) = futures::future::join(
            settle(self.conversions.name(), conversions),
            settle(self.measurement.name(), measurement),
        )
        .await;

        info!(
            event = %event.event,
            conversions_status = ?conversions,
            measurement_status = ?measurement,
            "dispatch_complete"
        );

        DispatchReport {
            conversions,
            measurement,
        }
    }

    fn spawn_send(
        &self,
        destination: Arc<dyn Destination>,
        event: Arc<NormalizedEvent>,
    ) -> JoinHandle<DispatchOutcome> {
        let timeout = self.timeout;
        tokio::spawn(async move { send_with_timeout(destination.as_ref(), &event, timeout).await })
    }
}

async fn send_with_timeout(
    destination: &dyn Destination,
    event: &NormalizedEvent,
    timeout: Duration,
) -> DispatchOutcome {
    let name = destination.name();

    let result = match tokio::time::timeout(timeout, destination.send(event)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout),
    };

    match &result {
        Ok(status) => info!(
            destination = name,
            event = %event.event,
            status_code = status,
            "destination_send_complete"
        ),
        Err(e) => warn!(
            destination = name,
            event = %event.event,
            status_code = ?e.status(),
            error = %e,
            "destination_send_failed"
        ),
    }

    result.into()
}

/// Await a spawned send, turning a panicked or cancelled task into an error outcome.
async fn settle(name: &'static str, handle: JoinHandle<DispatchOutcome>) -> DispatchOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(destination = name, error = %e, "destination_task_failed");
            DispatchOutcome::Error { status: None }
        }
    }
}
