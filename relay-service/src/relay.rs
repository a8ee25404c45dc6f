//! Webhook relay pipeline.
//!
//! ```text
//! raw body → verify signature → config gate → parse → classify
//!          → normalize → dispatch (fan-out) → append log record
//! ```
//!
//! Only authentication and the disabled gate are reported to the caller as
//! failures. Downstream delivery failures end up in the log record only.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::dispatch::{Dispatcher, NormalizedEvent};
use crate::error::StoreError;
use crate::event::{classify, InboundEvent};
use crate::normalize::normalize;
use crate::store::{LogRecord, RelayStore};
use crate::web::signature::verify_signature;

/// What happened to one inbound webhook.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Signature missing or wrong. Nothing else was done.
    Unauthorized,
    /// Forwarding is switched off. Nothing was dispatched.
    Disabled,
    /// Signed body that is not a valid event document.
    InvalidPayload(String),
    /// Event type has no canonical mapping. Acknowledged, not forwarded.
    Ignored { event_type: String },
    /// Event was forwarded; the record holds both destination outcomes.
    Processed(LogRecord),
}

#[derive(Clone)]
pub struct Relay {
    secret: Arc<str>,
    store: Arc<dyn RelayStore>,
    dispatcher: Dispatcher,
}

impl Relay {
    pub fn new(secret: &str, store: Arc<dyn RelayStore>, dispatcher: Dispatcher) -> Self {
        Self {
            secret: Arc::from(secret),
            store,
            dispatcher,
        }
    }

    pub fn store(&self) -> &Arc<dyn RelayStore> {
        &self.store
    }

    /// Run one webhook through the pipeline.
    ///
    /// `raw_body` must be the exact bytes received; the signature is checked
    /// against them before any parsing. Errors only when the enabled flag
    /// cannot be read.
    pub async fn handle(&self, raw_body: &[u8], signature: Option<&str>) -> Result<RelayOutcome, StoreError> {
        let verified = signature
            .map(|sig| verify_signature(raw_body, sig, &self.secret))
            .unwrap_or(false);

        if !verified {
            warn!(
                has_signature = signature.is_some(),
                body_length = raw_body.len(),
                "signature_invalid"
            );
            return Ok(RelayOutcome::Unauthorized);
        }

        let config = self.store.read_config().await?;
        if !config.enabled {
            info!("relay_disabled");
            return Ok(RelayOutcome::Disabled);
        }

        let inbound: InboundEvent = match serde_json::from_slice(raw_body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, body_length = raw_body.len(), "webhook_payload_invalid");
                return Ok(RelayOutcome::InvalidPayload(e.to_string()));
            }
        };

        info!(
            event_type = %inbound.event_type,
            has_email = inbound.contact.email.is_some(),
            has_phone = inbound.contact.phone.is_some(),
            has_amount = inbound.custom_fields.amount.is_some(),
            has_client_id = inbound.custom_fields.client_id.is_some(),
            "webhook_received"
        );

        let Some(canonical) = classify(&inbound.event_type) else {
            info!(event_type = %inbound.event_type, "event_ignored");
            return Ok(RelayOutcome::Ignored {
                event_type: inbound.event_type,
            });
        };

        let (identity, commerce) = normalize(&inbound.contact, &inbound.custom_fields);

        let event = NormalizedEvent {
            event: canonical,
            event_time: Utc::now().timestamp(),
            identity,
            commerce,
            client_id: inbound.custom_fields.client_id,
            source_url: inbound.custom_fields.source_url,
        };

        let report = self.dispatcher.dispatch(&event).await;
        let record = LogRecord::new(canonical, report);

        // The event is already forwarded; a lost record must not fail the request.
        match self.store.append_log(record.clone()).await {
            Ok(()) => info!(
                event = %canonical,
                conversions_status = ?record.conversions_status,
                measurement_status = ?record.measurement_status,
                "log_record_appended"
            ),
            Err(e) => error!(event = %canonical, error = %e, "log_record_append_failed"),
        }

        Ok(RelayOutcome::Processed(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::dispatch::{Destination, DispatchOutcome};
    use crate::error::DeliveryError;
    use crate::event::CanonicalEvent;
    use crate::normalize::sha256_hex;
    use crate::store::InMemoryStore;
    use crate::web::signature::compute_signature;

    const SECRET: &str = "test-secret";

    struct RecordingDestination {
        result: Result<u16, DeliveryError>,
        seen: Mutex<Vec<NormalizedEvent>>,
    }

    impl RecordingDestination {
        fn returning(result: Result<u16, DeliveryError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<NormalizedEvent> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Destination for RecordingDestination {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, event: &NormalizedEvent) -> Result<u16, DeliveryError> {
            self.seen.lock().unwrap().push(event.clone());
            self.result.clone()
        }
    }

    struct FailingStore;

    #[async_trait]
    impl RelayStore for FailingStore {
        async fn read_config(&self) -> Result<crate::store::RelayConfig, StoreError> {
            Ok(Default::default())
        }
        async fn set_enabled(&self, _: bool) -> Result<crate::store::RelayConfig, StoreError> {
            Ok(Default::default())
        }
        async fn toggle_enabled(&self) -> Result<crate::store::RelayConfig, StoreError> {
            Ok(Default::default())
        }
        async fn append_log(&self, _: LogRecord) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
        async fn recent_logs(&self, _: usize) -> Result<Vec<LogRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        relay: Relay,
        store: Arc<InMemoryStore>,
        conversions: Arc<RecordingDestination>,
        measurement: Arc<RecordingDestination>,
    }

    fn harness(
        enabled: bool,
        conversions: Result<u16, DeliveryError>,
        measurement: Result<u16, DeliveryError>,
    ) -> Harness {
        let store = Arc::new(InMemoryStore::with_enabled(enabled));
        let conversions = RecordingDestination::returning(conversions);
        let measurement = RecordingDestination::returning(measurement);
        let dispatcher = Dispatcher::new(conversions.clone(), measurement.clone(), Duration::from_secs(1));

        Harness {
            relay: Relay::new(SECRET, store.clone(), dispatcher),
            store,
            conversions,
            measurement,
        }
    }

    async fn post(h: &Harness, body: &str) -> RelayOutcome {
        let sig = compute_signature(body.as_bytes(), SECRET);
        h.relay.handle(body.as_bytes(), Some(&sig)).await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_signature_is_unauthorized() {
        let h = harness(true, Ok(200), Ok(200));
        let outcome = h.relay.handle(br#"{"type":"lead"}"#, None).await.unwrap();

        assert_eq!(outcome, RelayOutcome::Unauthorized);
        assert!(h.conversions.seen().is_empty());
        assert!(h.store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_signature_is_unauthorized() {
        let h = harness(true, Ok(200), Ok(200));
        let body = br#"{"type":"lead"}"#;
        let sig = compute_signature(b"{\"type\":\"purchase\"}", SECRET);

        let outcome = h.relay.handle(body, Some(&sig)).await.unwrap();
        assert_eq!(outcome, RelayOutcome::Unauthorized);
        assert!(h.store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_short_circuits() {
        let h = harness(false, Ok(200), Ok(200));
        let outcome = post(&h, r#"{"type":"lead","contact":{"email":"a@b.com"}}"#).await;

        assert_eq!(outcome, RelayOutcome::Disabled);
        assert!(h.conversions.seen().is_empty());
        assert!(h.measurement.seen().is_empty());
        assert!(h.store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_unmapped_type_is_ignored() {
        let h = harness(true, Ok(200), Ok(200));
        let outcome = post(&h, r#"{"type":"Lead"}"#).await;

        assert_eq!(
            outcome,
            RelayOutcome::Ignored {
                event_type: "Lead".to_string()
            }
        );
        assert!(h.conversions.seen().is_empty());
        assert!(h.store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_null_sections_are_processed() {
        let h = harness(true, Ok(200), Ok(200));
        let outcome = post(&h, r#"{"type":"lead","contact":null,"custom_fields":null}"#).await;

        let RelayOutcome::Processed(record) = outcome else {
            panic!("expected processed outcome");
        };
        assert_eq!(record.event, CanonicalEvent::Lead);
        assert!(h.conversions.seen()[0].identity.is_empty());
        assert!(h.measurement.seen()[0].commerce.is_empty());
        assert_eq!(h.store.logs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_after_valid_signature() {
        let h = harness(true, Ok(200), Ok(200));
        let outcome = post(&h, "not json").await;

        assert!(matches!(outcome, RelayOutcome::InvalidPayload(_)));
        assert!(h.store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_purchase_is_forwarded_hashed_and_logged() {
        let h = harness(true, Ok(200), Ok(204));
        let body = r#"{
            "type": "purchase",
            "contact": {"email": " Buyer@Example.COM ", "phone": "+52 (55) 1234-5678"},
            "custom_fields": {"amount": 100, "currency": "MXN", "client_id": "555.777"}
        }"#;

        let outcome = post(&h, body).await;

        let RelayOutcome::Processed(record) = outcome else {
            panic!("expected processed outcome");
        };
        assert_eq!(record.event, CanonicalEvent::Purchase);
        assert_eq!(record.conversions_status, DispatchOutcome::Status(200));
        assert_eq!(record.measurement_status, DispatchOutcome::Status(204));

        let sent = h.conversions.seen();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].identity.em, Some(vec![sha256_hex("buyer@example.com")]));
        assert_eq!(sent[0].identity.ph, Some(vec![sha256_hex("525512345678")]));
        assert_eq!(sent[0].commerce.value, Some(100.0));
        assert_eq!(sent[0].commerce.currency.as_deref(), Some("MXN"));
        assert_eq!(h.measurement.seen()[0].client_id.as_deref(), Some("555.777"));

        let logs = h.store.logs().await;
        assert_eq!(logs, vec![record]);
    }

    #[tokio::test]
    async fn test_destination_failures_are_recorded_not_raised() {
        let h = harness(true, Err(DeliveryError::Rejected { status: 500 }), Ok(200));
        let outcome = post(&h, r#"{"type":"lead"}"#).await;

        let RelayOutcome::Processed(record) = outcome else {
            panic!("expected processed outcome");
        };
        assert!(record.conversions_status.is_error());
        assert_eq!(record.measurement_status, DispatchOutcome::Status(200));
        assert_eq!(h.store.logs().await.len(), 1);

        let h = harness(true, Ok(200), Err(DeliveryError::Timeout));
        let RelayOutcome::Processed(record) = post(&h, r#"{"type":"lead"}"#).await else {
            panic!("expected processed outcome");
        };
        assert_eq!(record.conversions_status, DispatchOutcome::Status(200));
        assert!(record.measurement_status.is_error());
    }

    #[tokio::test]
    async fn test_log_append_failure_still_processed() {
        let conversions = RecordingDestination::returning(Ok(200));
        let measurement = RecordingDestination::returning(Ok(200));
        let dispatcher = Dispatcher::new(conversions.clone(), measurement, Duration::from_secs(1));
        let relay = Relay::new(SECRET, Arc::new(FailingStore), dispatcher);

        let body = r#"{"type":"lead"}"#;
        let sig = compute_signature(body.as_bytes(), SECRET);
        let outcome = relay.handle(body.as_bytes(), Some(&sig)).await.unwrap();

        assert!(matches!(outcome, RelayOutcome::Processed(_)));
        assert_eq!(conversions.seen().len(), 1);
    }
}
