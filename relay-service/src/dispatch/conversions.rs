//! Destination A: server-side conversions API.
//!
//! Posts a single-event batch to `{base}/{pixel_id}/events` carrying the
//! hashed identity attributes, commerce attributes and the access token.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use url::Url;

use super::{Destination, NormalizedEvent};
use crate::error::{ConfigError, DeliveryError};
use crate::normalize::{CommerceAttributes, IdentityAttributes};

const ACTION_SOURCE: &str = "website";

/// Request body for the conversions endpoint.
#[derive(Debug, Serialize)]
pub struct ConversionsPayload<'a> {
    pub data: [ConversionsEvent<'a>; 1],
    pub access_token: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ConversionsEvent<'a> {
    pub event_name: &'static str,
    pub event_time: i64,
    pub action_source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_source_url: Option<&'a str>,
    pub user_data: &'a IdentityAttributes,
    pub custom_data: &'a CommerceAttributes,
}

/// Build the single-event envelope for `event`.
pub fn conversions_payload<'a>(event: &'a NormalizedEvent, access_token: &'a str) -> ConversionsPayload<'a> {
    ConversionsPayload {
        data: [ConversionsEvent {
            event_name: event.event.as_str(),
            event_time: event.event_time,
            action_source: ACTION_SOURCE,
            event_source_url: event.source_url.as_deref(),
            user_data: &event.identity,
            custom_data: &event.commerce,
        }],
        access_token,
    }
}

/// HTTP client for the conversions API.
#[derive(Clone)]
pub struct ConversionsApi {
    client: Client,
    endpoint: Url,
    access_token: String,
}

impl ConversionsApi {
    pub fn new(
        client: Client,
        base_url: &str,
        pixel_id: &str,
        access_token: String,
    ) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(&format!("{}/{}/events", base_url.trim_end_matches('/'), pixel_id))
            .map_err(|source| ConfigError::InvalidUrl {
                var: "CAPI_BASE_URL",
                source,
            })?;

        Ok(Self {
            client,
            endpoint,
            access_token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Destination for ConversionsApi {
    fn name(&self) -> &'static str {
        "conversions"
    }

    async fn send(&self, event: &NormalizedEvent) -> Result<u16, DeliveryError> {
        let payload = conversions_payload(event, &self.access_token);

        let resp = self
            .client
            .post(self.endpoint.clone())
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
