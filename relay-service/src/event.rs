//! Inbound CRM event types and event-name classification.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Webhook body posted by the CRM.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contact: Contact,
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_fields: CustomFields,
}

/// Treat an explicit `null` section the same as a missing one.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomFields {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

/// Event name shared by both downstream integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanonicalEvent {
    Lead,
    Purchase,
}

impl CanonicalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalEvent::Lead => "Lead",
            CanonicalEvent::Purchase => "Purchase",
        }
    }

    /// Lowercased name used by the measurement endpoint.
    pub fn measurement_name(&self) -> &'static str {
        match self {
            CanonicalEvent::Lead => "lead",
            CanonicalEvent::Purchase => "purchase",
        }
    }
}

impl fmt::Display for CanonicalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a CRM event type to its canonical event.
///
/// Matching is exact and case-sensitive: `"Lead"` is not `"lead"`.
pub fn classify(event_type: &str) -> Option<CanonicalEvent> {
    match event_type {
        "lead" => Some(CanonicalEvent::Lead),
        "purchase" => Some(CanonicalEvent::Purchase),
        _ => None,
    }
}
