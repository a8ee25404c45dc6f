//! Payload normalization.
//!
//! Turns CRM contact and custom-field data into the two fragments the
//! destinations consume. Contact values leave this module only as SHA-256
//! hex digests; nothing downstream ever sees a raw email or phone number.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::event::{Contact, CustomFields};

pub const DEFAULT_CURRENCY: &str = "USD";

/// Hashed identity attributes keyed the way the conversions API expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub em: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ph: Option<Vec<String>>,
}

impl IdentityAttributes {
    pub fn is_empty(&self) -> bool {
        self.em.is_none() && self.ph.is_none()
    }
}

/// Value and currency, present only when the CRM sent an amount.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommerceAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl CommerceAttributes {
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

/// Derive hashed identity and commerce attributes from an inbound event.
pub fn normalize(contact: &Contact, fields: &CustomFields) -> (IdentityAttributes, CommerceAttributes) {
    let identity = IdentityAttributes {
        em: contact
            .email
            .as_deref()
            .and_then(normalize_email)
            .map(|e| vec![sha256_hex(&e)]),
        ph: contact
            .phone
            .as_deref()
            .and_then(normalize_phone)
            .map(|p| vec![sha256_hex(&p)]),
    };

    let commerce = match fields.amount {
        Some(amount) => CommerceAttributes {
            value: Some(amount),
            currency: Some(
                fields
                    .currency
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            ),
        },
        None => CommerceAttributes::default(),
    };

    (identity, commerce)
}

/// Trim and lowercase. Blank emails count as not supplied.
fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
}

/// Keep digits only. A value with no digits counts as not supplied.
fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Hex-encoded SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
