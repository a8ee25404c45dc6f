//! Destination B: analytics measurement protocol.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::warn;
use url::Url;

use super::{Destination, NormalizedEvent};
use crate::error::{ConfigError, DeliveryError};
use crate::normalize::DEFAULT_CURRENCY;

#[derive(Debug, Serialize)]
pub struct MeasurementPayload<'a> {
    pub client_id: &'a str,
    pub events: [MeasurementEvent<'a>; 1],
}

#[derive(Debug, Serialize)]
pub struct MeasurementEvent<'a> {
    pub name: &'static str,
    pub params: MeasurementParams<'a>,
}

#[derive(Debug, Serialize)]
pub struct MeasurementParams<'a> {
    pub value: f64,
    pub currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_location: Option<&'a str>,
}

/// Build the client-scoped envelope for `event`.
///
/// Events without a client id are attributed to `fallback_client_id`.
pub fn measurement_payload<'a>(
    event: &'a NormalizedEvent,
    fallback_client_id: &'a str,
) -> MeasurementPayload<'a> {
    let client_id = match event.client_id.as_deref().filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => {
            warn!(
                event = %event.event,
                fallback_client_id = fallback_client_id,
                "measurement_client_id_fallback"
            );
            fallback_client_id
        }
    };

    MeasurementPayload {
        client_id,
        events: [MeasurementEvent {
            name: event.event.measurement_name(),
            params: MeasurementParams {
                value: event.commerce.value.unwrap_or(0.0),
                currency: event.commerce.currency.as_deref().unwrap_or(DEFAULT_CURRENCY),
                page_location: event.source_url.as_deref(),
            },
        }],
    }
}

/// HTTP client for the measurement endpoint.
#[derive(Clone)]
pub struct MeasurementProtocol {
    client: Client,
    url: Url,
    fallback_client_id: String,
}

impl MeasurementProtocol {
    pub fn new(
        client: Client,
        endpoint: &str,
        measurement_id: &str,
        api_secret: &str,
        fallback_client_id: String,
    ) -> Result<Self, ConfigError> {
        let url = Url::parse_with_params(
            endpoint,
            &[("measurement_id", measurement_id), ("api_secret", api_secret)],
        )
        .map_err(|source| ConfigError::InvalidUrl {
            var: "GA4_ENDPOINT",
            source,
        })?;

        Ok(Self {
            client,
            url,
            fallback_client_id,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Destination for MeasurementProtocol {
    fn name(&self) -> &'static str {
        "measurement"
    }

    async fn send(&self, event: &NormalizedEvent) -> Result<u16, DeliveryError> {
        let payload = measurement_payload(event, &self.fallback_client_id);

        let resp = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}
